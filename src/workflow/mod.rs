//! Workflow engine for the rescue lifecycle.
//!
//! This module sits between the HTTP layer and the repository traits. It
//! owns the two rules the storage layer is not allowed to know about:
//! which role may perform each operation, and which inputs are acceptable
//! before a transition is attempted. The state machine itself (Pending ->
//! InTreatment -> Completed, plus release eligibility) is enforced by the
//! repositories via state-guarded updates; this layer turns the resulting
//! errors into a stable taxonomy for the API.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::info;

use crate::api::*;
use crate::db::repository::{FullRepository, RepositoryError};

/// The authenticated staff member performing an operation.
///
/// Built by the HTTP session layer; every workflow function receives it
/// explicitly rather than reading ambient request state.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub employee_id: EmployeeId,
    pub roles: HashSet<Role>,
}

impl ActorContext {
    pub fn new(employee_id: EmployeeId, roles: HashSet<Role>) -> Self {
        Self { employee_id, roles }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Error taxonomy exposed to the API layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The request is malformed or references unknown reference data.
    #[error("{0}")]
    Validation(String),

    /// The target entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The operation lost against the current state of the record.
    #[error("{0}")]
    Conflict(String),

    /// The actor lacks the role this operation requires.
    #[error("Operation requires the {required} role")]
    Forbidden { required: Role },

    /// The actor holds the role but may not act on this record, e.g. a
    /// caregiver observing a treatment assigned to someone else.
    #[error("{0}")]
    Denied(String),

    /// Anything else: storage failed in a way the caller cannot fix.
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for WorkflowError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { ref message, .. } => {
                WorkflowError::NotFound(message.clone())
            }
            RepositoryError::ValidationError { ref message, .. } => {
                WorkflowError::Validation(message.clone())
            }
            RepositoryError::ConflictError { ref message, .. } => {
                WorkflowError::Conflict(message.clone())
            }
            other => WorkflowError::Repository(other),
        }
    }
}

/// Check that the actor holds `role`, or fail with `Forbidden`.
///
/// Every role-gated operation funnels through here; handlers never check
/// roles themselves.
pub fn require_role(actor: &ActorContext, role: Role) -> WorkflowResult<()> {
    if actor.has_role(role) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden { required: role })
    }
}

fn require_text(value: &str, what: &str) -> WorkflowResult<()> {
    if value.trim().is_empty() {
        Err(WorkflowError::Validation(format!(
            "{} must not be empty",
            what
        )))
    } else {
        Ok(())
    }
}

fn require_max_len(value: &str, what: &str, max: usize) -> WorkflowResult<()> {
    if value.chars().count() > max {
        Err(WorkflowError::Validation(format!(
            "{} must not exceed {} characters",
            what, max
        )))
    } else {
        Ok(())
    }
}

// =============================================================================
// Operation inputs
// =============================================================================

/// Intake request: one rescue event with the animals brought in.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeRequest {
    pub date: chrono::NaiveDate,
    pub location: String,
    #[serde(default)]
    pub details: String,
    pub animals: Vec<NewAnimal>,
}

/// Evaluation request: first veterinary contact with an animal.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateRequest {
    pub animal_id: AnimalId,
    pub problem_type: String,
    pub diagnosis: String,
    pub state: HealthState,
    pub plan: String,
    #[serde(default)]
    pub care_notes: Option<String>,
    #[serde(default)]
    pub medications: Vec<NewTreatmentMedication>,
}

/// Reconsult request: revise an in-progress treatment.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReconsultRequest {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub care_notes: Option<String>,
    #[serde(default)]
    pub medications: Option<Vec<NewTreatmentMedication>>,
}

/// Observation request from a caregiver.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserveRequest {
    pub treatment_id: TreatmentId,
    pub text: String,
    pub condition: AnimalCondition,
}

/// Release request from a rescuer.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseRequest {
    pub animal_id: AnimalId,
    pub location: String,
    #[serde(default)]
    pub notes: String,
}

/// Follow-up request against an existing release.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowUpRequest {
    pub tracking_method: String,
    pub observed_state: String,
    #[serde(default)]
    pub sighting_location: Option<String>,
    #[serde(default)]
    pub notes: String,
}

// =============================================================================
// Rescuer operations
// =============================================================================

/// Intake: record a rescue with its animals. The actor becomes the rescue's
/// rescuer; every animal starts a `PENDING` treatment.
pub async fn record_rescue<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    request: &IntakeRequest,
) -> WorkflowResult<RescueWithAnimals> {
    require_role(actor, Role::Rescuer)?;
    require_text(&request.location, "Rescue location")?;
    if request.animals.is_empty() {
        return Err(WorkflowError::Validation(
            "A rescue must include at least one animal".to_string(),
        ));
    }

    let rescue = NewRescue {
        date: request.date,
        location: request.location.clone(),
        details: request.details.clone(),
        rescuer_id: actor.employee_id,
    };
    let stored = repo.store_rescue(&rescue, &request.animals).await?;
    info!(
        rescue_id = %stored.rescue.id,
        animals = stored.animals.len(),
        "Rescue recorded"
    );
    Ok(stored)
}

/// List all rescues with their animals.
pub async fn list_rescues<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<RescueWithAnimals>> {
    Ok(repo.fetch_rescues().await?)
}

/// Get one rescue with its animals.
pub async fn get_rescue<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
    id: RescueId,
) -> WorkflowResult<RescueWithAnimals> {
    Ok(repo.fetch_rescue(id).await?)
}

/// Replace a rescue's fields and animal set.
pub async fn update_rescue<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    id: RescueId,
    request: &IntakeRequest,
) -> WorkflowResult<RescueWithAnimals> {
    require_role(actor, Role::Rescuer)?;
    require_text(&request.location, "Rescue location")?;
    if request.animals.is_empty() {
        return Err(WorkflowError::Validation(
            "A rescue must include at least one animal".to_string(),
        ));
    }

    let rescue = NewRescue {
        date: request.date,
        location: request.location.clone(),
        details: request.details.clone(),
        rescuer_id: actor.employee_id,
    };
    Ok(repo.update_rescue(id, &rescue, &request.animals).await?)
}

/// Delete a rescue, cascading to its animals and their records.
pub async fn delete_rescue<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    id: RescueId,
) -> WorkflowResult<RescueDeletion> {
    require_role(actor, Role::Rescuer)?;
    let deleted = repo.delete_rescue(id).await?;
    info!(
        rescue_id = %id,
        animals_removed = deleted.animals_removed.len(),
        "Rescue deleted"
    );
    Ok(deleted)
}

// =============================================================================
// Veterinarian operations
// =============================================================================

/// Animals awaiting their first evaluation. Open to any authenticated
/// staff member, like the other dashboard reads.
pub async fn pending_animals<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<PendingAnimal>> {
    Ok(repo.fetch_pending_animals().await?)
}

/// Treatments currently in progress.
pub async fn active_treatments<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<ActiveTreatment>> {
    Ok(repo.fetch_active_treatments().await?)
}

/// Treatments whose medical phase has concluded.
pub async fn completed_treatments<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<CompletedTreatment>> {
    Ok(repo.fetch_completed_treatments().await?)
}

/// Evaluate: record the health assessment and move the animal's pending
/// treatment into `IN_TREATMENT` under the acting veterinarian.
///
/// When two veterinarians race on the same animal, the state guard in the
/// repository lets exactly one through; the other gets `Conflict`.
pub async fn evaluate_animal<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    request: &EvaluateRequest,
) -> WorkflowResult<Treatment> {
    require_role(actor, Role::Veterinarian)?;
    require_text(&request.diagnosis, "Diagnosis")?;
    require_text(&request.plan, "Treatment plan")?;

    let assessment = NewAssessment {
        animal_id: request.animal_id,
        problem_type: request.problem_type.clone(),
        diagnosis: request.diagnosis.clone(),
        state: request.state,
        veterinarian_id: actor.employee_id,
    };
    // A healthy animal gets no prescriptions even if some were supplied.
    let medications: &[NewTreatmentMedication] = if request.state == HealthState::Healthy {
        &[]
    } else {
        &request.medications
    };
    let treatment = repo
        .begin_treatment(
            &assessment,
            &request.plan,
            request.care_notes.as_deref(),
            medications,
        )
        .await?;
    info!(
        treatment_id = %treatment.id,
        animal_id = %request.animal_id,
        "Treatment started"
    );
    Ok(treatment)
}

/// Reconsult: revise the plan, notes or prescriptions of an in-progress
/// treatment.
pub async fn reconsult<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    treatment_id: TreatmentId,
    request: &ReconsultRequest,
) -> WorkflowResult<Treatment> {
    require_role(actor, Role::Veterinarian)?;
    if let Some(plan) = &request.plan {
        require_text(plan, "Treatment plan")?;
    }

    let changes = TreatmentChanges {
        plan: request.plan.clone(),
        care_notes: request.care_notes.clone(),
        medications: request.medications.clone(),
    };
    Ok(repo.update_treatment(treatment_id, &changes).await?)
}

/// Complete: conclude the medical phase of a treatment.
pub async fn conclude_treatment<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    treatment_id: TreatmentId,
) -> WorkflowResult<Treatment> {
    require_role(actor, Role::Veterinarian)?;
    let treatment = repo.complete_treatment(treatment_id).await?;
    info!(treatment_id = %treatment_id, "Treatment completed");
    Ok(treatment)
}

/// Assign a caregiver to a completed treatment. The assignee must hold
/// the Caregiver role; reassignment overwrites the previous assignee.
pub async fn assign_caregiver<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    treatment_id: TreatmentId,
    caregiver_id: EmployeeId,
) -> WorkflowResult<Treatment> {
    require_role(actor, Role::Veterinarian)?;

    let assignee_roles = repo.fetch_employee_roles(caregiver_id).await?;
    if !assignee_roles.contains(&Role::Caregiver) {
        return Err(WorkflowError::Validation(format!(
            "Employee {} does not hold the Caregiver role",
            caregiver_id
        )));
    }

    Ok(repo.assign_caregiver(treatment_id, caregiver_id).await?)
}

/// One treatment by id.
pub async fn treatment_detail<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
    treatment_id: TreatmentId,
) -> WorkflowResult<Treatment> {
    Ok(repo.fetch_treatment(treatment_id).await?)
}

/// Full record for one animal.
pub async fn animal_record<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
    animal_id: AnimalId,
) -> WorkflowResult<AnimalRecord> {
    Ok(repo.fetch_animal_record(animal_id).await?)
}

// =============================================================================
// Caregiver operations
// =============================================================================

/// Animals in aftercare. With `only_mine`, restricted to the actor's
/// assignments.
pub async fn in_care_animals<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    only_mine: bool,
) -> WorkflowResult<Vec<InCareAnimal>> {
    let filter = only_mine.then_some(actor.employee_id);
    Ok(repo.fetch_in_care(filter).await?)
}

/// Observe: record a periodic note against a completed treatment. An
/// observation tagged ready-for-release clears the animal for the Release
/// transition.
///
/// Only the treatment's assigned caregiver may observe it.
pub async fn observe<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    request: &ObserveRequest,
) -> WorkflowResult<CaregiverObservation> {
    require_role(actor, Role::Caregiver)?;
    require_text(&request.text, "Observation text")?;
    require_max_len(&request.text, "Observation text", 500)?;

    let treatment = repo.fetch_treatment(request.treatment_id).await?;
    if treatment.state != TreatmentState::Completed {
        return Err(WorkflowError::Conflict(format!(
            "Treatment {} is not in aftercare yet",
            request.treatment_id
        )));
    }
    if treatment.caregiver_id != Some(actor.employee_id) {
        return Err(WorkflowError::Denied(format!(
            "Employee {} is not the assigned caregiver of treatment {}",
            actor.employee_id, request.treatment_id
        )));
    }

    let observation = NewObservation {
        treatment_id: request.treatment_id,
        caregiver_id: actor.employee_id,
        text: request.text.clone(),
        condition: request.condition,
    };
    let stored = repo.record_observation(&observation).await?;
    info!(
        treatment_id = %request.treatment_id,
        condition = %request.condition.as_str(),
        "Observation recorded"
    );
    Ok(stored)
}

/// Observation history for a treatment, newest first.
pub async fn observations<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
    treatment_id: TreatmentId,
) -> WorkflowResult<Vec<ObservationEntry>> {
    Ok(repo.fetch_observations(treatment_id).await?)
}

// =============================================================================
// Release operations
// =============================================================================

/// Animals cleared for release.
pub async fn release_candidates<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<ReleaseCandidate>> {
    Ok(repo.fetch_release_candidates().await?)
}

/// Release: return a cleared animal to the wild. The eligibility check and
/// insert happen in one atomic unit, so an animal can never be released
/// twice.
pub async fn release_animal<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    request: &ReleaseRequest,
) -> WorkflowResult<Release> {
    require_role(actor, Role::Rescuer)?;
    require_text(&request.location, "Release location")?;

    let release = NewRelease {
        animal_id: request.animal_id,
        location: request.location.clone(),
        notes: request.notes.clone(),
        rescuer_id: actor.employee_id,
    };
    let stored = repo.store_release(&release).await?;
    info!(
        release_id = %stored.id,
        animal_id = %request.animal_id,
        "Animal released"
    );
    Ok(stored)
}

/// All releases with follow-up summaries.
pub async fn releases<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<ReleasedAnimal>> {
    Ok(repo.fetch_releases().await?)
}

/// FollowUp: append a monitoring entry to a release.
pub async fn record_follow_up<R: FullRepository + ?Sized>(
    repo: &R,
    actor: &ActorContext,
    release_id: ReleaseId,
    request: &FollowUpRequest,
) -> WorkflowResult<ReleaseFollowUp> {
    require_role(actor, Role::Rescuer)?;
    require_text(&request.tracking_method, "Tracking method")?;
    require_text(&request.observed_state, "Observed state")?;

    let follow_up = NewFollowUp {
        release_id,
        tracking_method: request.tracking_method.clone(),
        observed_state: request.observed_state.clone(),
        sighting_location: request.sighting_location.clone(),
        notes: request.notes.clone(),
        rescuer_id: actor.employee_id,
    };
    Ok(repo.store_follow_up(&follow_up).await?)
}

/// Follow-up history for a release, newest first.
pub async fn follow_ups<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
    release_id: ReleaseId,
) -> WorkflowResult<Vec<FollowUpEntry>> {
    Ok(repo.fetch_follow_ups(release_id).await?)
}

// =============================================================================
// Directory reads (any authenticated staff member)
// =============================================================================

/// List all employees.
pub async fn list_employees<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<Employee>> {
    Ok(repo.fetch_employees().await?)
}

/// Species catalog.
pub async fn list_species<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<Species>> {
    Ok(repo.fetch_species().await?)
}

/// Medication catalog.
pub async fn list_medications<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<Medication>> {
    Ok(repo.fetch_medications().await?)
}

/// Employees holding the Caregiver role, for the assignment picker.
pub async fn list_caregivers<R: FullRepository + ?Sized>(
    repo: &R,
    _actor: &ActorContext,
) -> WorkflowResult<Vec<Employee>> {
    let mut caregivers = Vec::new();
    for employee in repo.fetch_employees().await? {
        let roles = repo.fetch_employee_roles(employee.id).await?;
        if roles.contains(&Role::Caregiver) {
            caregivers.push(employee);
        }
    }
    Ok(caregivers)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod engine_tests;
