//! Treatment repository trait: veterinary evaluation through aftercare.
//!
//! Every state transition here is guarded: the update only applies while
//! the treatment is still in the expected state, and a guard that matches
//! nothing surfaces as `ConflictError`. That is what keeps two concurrent
//! evaluations of the same animal from both succeeding.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::api::{
    ActiveTreatment, AnimalId, AnimalRecord, CaregiverObservation, CompletedTreatment,
    EmployeeId, InCareAnimal, NewAssessment, NewObservation, NewTreatmentMedication,
    ObservationEntry, PendingAnimal, Treatment, TreatmentChanges, TreatmentId,
};

/// Repository trait for the treatment lifecycle.
#[async_trait]
pub trait TreatmentRepository: Send + Sync {
    // ==================== Veterinarian queues ====================

    /// Animals whose treatment is `PENDING`, oldest rescue first.
    async fn fetch_pending_animals(&self) -> RepositoryResult<Vec<PendingAnimal>>;

    /// Treatments currently `IN_TREATMENT`, joined with the animal's
    /// latest health assessment.
    async fn fetch_active_treatments(&self) -> RepositoryResult<Vec<ActiveTreatment>>;

    /// Treatments in `COMPLETED`, with aftercare assignment info.
    async fn fetch_completed_treatments(&self) -> RepositoryResult<Vec<CompletedTreatment>>;

    /// One treatment by id.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the treatment doesn't exist
    async fn fetch_treatment(&self, id: TreatmentId) -> RepositoryResult<Treatment>;

    // ==================== Veterinary transitions ====================

    /// Evaluate an animal: store the health assessment, move its `PENDING`
    /// treatment to `IN_TREATMENT`, attach the veterinarian, plan and
    /// prescriptions. Atomic.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the animal has no treatment
    /// * `Err(RepositoryError::ConflictError)` - If the treatment already
    ///   left `PENDING` (e.g. a concurrent evaluation won)
    async fn begin_treatment(
        &self,
        assessment: &NewAssessment,
        plan: &str,
        care_notes: Option<&str>,
        medications: &[NewTreatmentMedication],
    ) -> RepositoryResult<Treatment>;

    /// Revise an `IN_TREATMENT` treatment (reconsult): plan, care notes
    /// and optionally the whole prescription set. Atomic.
    ///
    /// # Returns
    /// * `Err(RepositoryError::ConflictError)` - If the treatment is not
    ///   `IN_TREATMENT`
    async fn update_treatment(
        &self,
        id: TreatmentId,
        changes: &TreatmentChanges,
    ) -> RepositoryResult<Treatment>;

    /// Conclude medical care: `IN_TREATMENT` -> `COMPLETED`, stamping the
    /// end time.
    ///
    /// # Returns
    /// * `Err(RepositoryError::ConflictError)` - If the treatment is not
    ///   `IN_TREATMENT`
    async fn complete_treatment(&self, id: TreatmentId) -> RepositoryResult<Treatment>;

    // ==================== Aftercare ====================

    /// Assign (or reassign) a caregiver to a `COMPLETED` treatment.
    ///
    /// # Returns
    /// * `Err(RepositoryError::ValidationError)` - If the employee doesn't exist
    /// * `Err(RepositoryError::ConflictError)` - If the treatment is not
    ///   `COMPLETED`
    async fn assign_caregiver(
        &self,
        id: TreatmentId,
        caregiver_id: EmployeeId,
    ) -> RepositoryResult<Treatment>;

    /// Record a caregiver observation against a `COMPLETED` treatment.
    ///
    /// # Returns
    /// * `Err(RepositoryError::ConflictError)` - If the treatment is not
    ///   `COMPLETED` or has no caregiver assigned
    async fn record_observation(
        &self,
        observation: &NewObservation,
    ) -> RepositoryResult<CaregiverObservation>;

    /// Animals in aftercare (completed treatment with an assigned
    /// caregiver), with their latest observation. Optionally filtered to
    /// one caregiver.
    async fn fetch_in_care(
        &self,
        caregiver_id: Option<EmployeeId>,
    ) -> RepositoryResult<Vec<InCareAnimal>>;

    /// Observation history for a treatment, newest first.
    async fn fetch_observations(
        &self,
        treatment_id: TreatmentId,
    ) -> RepositoryResult<Vec<ObservationEntry>>;

    // ==================== Aggregate views ====================

    /// Full record for one animal: rescue context, latest assessment,
    /// current treatment and prescriptions.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the animal doesn't exist
    async fn fetch_animal_record(&self, animal_id: AnimalId) -> RepositoryResult<AnimalRecord>;
}
