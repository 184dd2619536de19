//! Public API surface for the rescue-center backend.
//!
//! This file consolidates the domain types shared by the workflow engine,
//! the repository layer and the HTTP API. All types derive
//! Serialize/Deserialize for JSON serialization.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Defines a newtype ID wrapper around `i64` and generates:
/// - derives (Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)
/// - `Display`
/// - `From<i64> for $name` and `From<$name> for i64`
macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(pub i64);

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::write!(f, "{}", self.0)
            }
        }

        impl ::std::convert::From<i64> for $name {
            fn from(v: i64) -> Self {
                $name(v)
            }
        }

        impl ::std::convert::From<$name> for i64 {
            fn from(v: $name) -> Self {
                v.0
            }
        }

        impl $name {
            pub fn new(value: i64) -> Self {
                $name(value)
            }

            pub fn value(&self) -> i64 {
                self.0
            }
        }
    };
}

define_id_type!(EmployeeId);
define_id_type!(SpeciesId);
define_id_type!(RescueId);
define_id_type!(AnimalId);
define_id_type!(TreatmentId);
define_id_type!(AssessmentId);
define_id_type!(MedicationId);
define_id_type!(ObservationId);
define_id_type!(ReleaseId);
define_id_type!(FollowUpId);

// =============================================================================
// Enumerations
// =============================================================================

/// Staff role gating workflow transitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Rescuer,
    Veterinarian,
    Caregiver,
}

impl Role {
    /// Stable text code used in the database junction table.
    pub fn as_code(&self) -> &'static str {
        match self {
            Role::Rescuer => "RESCUER",
            Role::Veterinarian => "VETERINARIAN",
            Role::Caregiver => "CAREGIVER",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESCUER" => Ok(Role::Rescuer),
            "VETERINARIAN" => Ok(Role::Veterinarian),
            "CAREGIVER" => Ok(Role::Caregiver),
            other => Err(format!("Unknown role code: {}", other)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Lifecycle state of a treatment.
///
/// The only legal transitions are Pending -> InTreatment -> Completed; they
/// are performed exclusively by the workflow engine. There is no transition
/// back to an earlier state and no cancellation path.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TreatmentState {
    Pending,
    InTreatment,
    Completed,
}

impl TreatmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentState::Pending => "PENDING",
            TreatmentState::InTreatment => "IN_TREATMENT",
            TreatmentState::Completed => "COMPLETED",
        }
    }

    /// Whether the treatment still counts against the one-active-treatment
    /// invariant (at most one Pending/InTreatment treatment per animal).
    pub fn is_active(&self) -> bool {
        !matches!(self, TreatmentState::Completed)
    }
}

impl FromStr for TreatmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TreatmentState::Pending),
            "IN_TREATMENT" => Ok(TreatmentState::InTreatment),
            "COMPLETED" => Ok(TreatmentState::Completed),
            other => Err(format!("Unknown treatment state: {}", other)),
        }
    }
}

impl std::fmt::Display for TreatmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health state recorded by a veterinarian during evaluation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Sick,
    Injured,
    Recovering,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Sick => "sick",
            HealthState::Injured => "injured",
            HealthState::Recovering => "recovering",
        }
    }
}

impl FromStr for HealthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(HealthState::Healthy),
            "sick" => Ok(HealthState::Sick),
            "injured" => Ok(HealthState::Injured),
            "recovering" => Ok(HealthState::Recovering),
            other => Err(format!("Unknown health state: {}", other)),
        }
    }
}

/// Condition tag attached to a caregiver observation.
///
/// `ReadyForRelease` is the tag that makes an animal eligible for the
/// Release transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimalCondition {
    InCare,
    Recovering,
    Critical,
    ReadyForRelease,
}

impl AnimalCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimalCondition::InCare => "in_care",
            AnimalCondition::Recovering => "recovering",
            AnimalCondition::Critical => "critical",
            AnimalCondition::ReadyForRelease => "ready_for_release",
        }
    }
}

impl FromStr for AnimalCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_care" => Ok(AnimalCondition::InCare),
            "recovering" => Ok(AnimalCondition::Recovering),
            "critical" => Ok(AnimalCondition::Critical),
            "ready_for_release" => Ok(AnimalCondition::ReadyForRelease),
            other => Err(format!("Unknown animal condition: {}", other)),
        }
    }
}

// =============================================================================
// Reference / actor entities
// =============================================================================

/// A staff member. Provisioning is administrative and out of scope; the
/// backend only reads employees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub surname: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub username: String,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.surname)
    }
}

/// Species reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    pub id: SpeciesId,
    pub scientific_name: String,
    pub family: String,
    pub habitat: String,
    pub conservation_status: String,
    pub diet: String,
}

/// Medication catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: MedicationId,
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
}

// =============================================================================
// Lifecycle entities
// =============================================================================

/// A field rescue event. Owns its animals: deleting the rescue cascades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rescue {
    pub id: RescueId,
    pub date: NaiveDate,
    pub location: String,
    pub details: String,
    pub rescuer_id: EmployeeId,
}

/// An animal taken in by a rescue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Animal {
    pub id: AnimalId,
    pub name: String,
    pub species_id: SpeciesId,
    pub breed: Option<String>,
    pub age: Option<i32>,
    pub sex: String,
    pub rescue_id: RescueId,
}

/// A rescue together with its animals and the rescuer's display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescueWithAnimals {
    #[serde(flatten)]
    pub rescue: Rescue,
    pub rescuer_name: String,
    pub animals: Vec<Animal>,
}

/// The medical lifecycle record for one animal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treatment {
    pub id: TreatmentId,
    pub animal_id: AnimalId,
    pub veterinarian_id: Option<EmployeeId>,
    pub caregiver_id: Option<EmployeeId>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub plan: Option<String>,
    pub care_notes: Option<String>,
    pub state: TreatmentState,
}

/// A veterinarian's diagnostic snapshot for an animal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAssessment {
    pub id: AssessmentId,
    pub animal_id: AnimalId,
    pub evaluated_at: DateTime<Utc>,
    pub problem_type: String,
    pub diagnosis: String,
    pub state: HealthState,
    pub veterinarian_id: EmployeeId,
}

/// A medication prescribed within a treatment (junction row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentMedication {
    pub treatment_id: TreatmentId,
    pub medication_id: MedicationId,
    pub dose: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// A caregiver's periodic note on an animal whose treatment completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaregiverObservation {
    pub id: ObservationId,
    pub treatment_id: TreatmentId,
    pub caregiver_id: EmployeeId,
    pub observed_at: DateTime<Utc>,
    pub text: String,
    pub condition: AnimalCondition,
}

/// The record of returning an animal to the wild. At most one per animal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub animal_id: AnimalId,
    pub released_at: DateTime<Utc>,
    pub location: String,
    pub notes: String,
    pub rescuer_id: EmployeeId,
}

/// Post-release monitoring entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseFollowUp {
    pub id: FollowUpId,
    pub release_id: ReleaseId,
    pub recorded_at: DateTime<Utc>,
    pub tracking_method: String,
    pub observed_state: String,
    pub sighting_location: Option<String>,
    pub notes: String,
    pub rescuer_id: EmployeeId,
}

// =============================================================================
// Repository input types
// =============================================================================

/// Fields for a new rescue (id is database-generated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRescue {
    pub date: NaiveDate,
    pub location: String,
    pub details: String,
    pub rescuer_id: EmployeeId,
}

/// Descriptor for one animal taken in during intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnimal {
    pub name: String,
    pub species_id: SpeciesId,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
    pub sex: String,
}

/// One prescribed medication line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTreatmentMedication {
    pub medication_id: MedicationId,
    pub dose: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Diagnostic fields recorded when a veterinarian evaluates an animal.
#[derive(Debug, Clone)]
pub struct NewAssessment {
    pub animal_id: AnimalId,
    pub problem_type: String,
    pub diagnosis: String,
    pub state: HealthState,
    pub veterinarian_id: EmployeeId,
}

/// Partial update applied to a treatment by a veterinarian reconsult.
///
/// `medications: Some(..)` replaces the prescription set wholesale
/// (delete-then-reinsert); `None` leaves it untouched.
#[derive(Debug, Clone, Default)]
pub struct TreatmentChanges {
    pub plan: Option<String>,
    pub care_notes: Option<String>,
    pub medications: Option<Vec<NewTreatmentMedication>>,
}

/// Fields for a new caregiver observation.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub treatment_id: TreatmentId,
    pub caregiver_id: EmployeeId,
    pub text: String,
    pub condition: AnimalCondition,
}

/// Fields for a new release record.
#[derive(Debug, Clone)]
pub struct NewRelease {
    pub animal_id: AnimalId,
    pub location: String,
    pub notes: String,
    pub rescuer_id: EmployeeId,
}

/// Fields for a new post-release follow-up entry.
#[derive(Debug, Clone)]
pub struct NewFollowUp {
    pub release_id: ReleaseId,
    pub tracking_method: String,
    pub observed_state: String,
    pub sighting_location: Option<String>,
    pub notes: String,
    pub rescuer_id: EmployeeId,
}

// =============================================================================
// Read models (dashboard queues and joined views)
// =============================================================================

/// Veterinarian queue entry: animal awaiting first evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAnimal {
    pub animal_id: AnimalId,
    pub animal_name: String,
    pub species_name: String,
    pub age: Option<i32>,
    pub sex: String,
    pub rescue_date: NaiveDate,
    pub rescue_location: String,
    pub rescue_details: String,
    pub rescuer_name: String,
}

/// Veterinarian queue entry: treatment currently in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTreatment {
    pub treatment_id: TreatmentId,
    pub animal_id: AnimalId,
    pub animal_name: String,
    pub species_name: String,
    pub plan: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub health_state: Option<HealthState>,
    pub diagnosis: Option<String>,
    pub veterinarian_name: Option<String>,
}

/// Veterinarian queue entry: treatment completed, animal in aftercare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTreatment {
    pub treatment_id: TreatmentId,
    pub animal_id: AnimalId,
    pub animal_name: String,
    pub species_name: String,
    pub plan: Option<String>,
    pub care_notes: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    pub veterinarian_name: Option<String>,
    pub caregiver_id: Option<EmployeeId>,
}

/// Caregiver dashboard entry: completed treatment with an assigned caregiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InCareAnimal {
    pub treatment_id: TreatmentId,
    pub animal_id: AnimalId,
    pub animal_name: String,
    pub species_name: String,
    pub caregiver_id: EmployeeId,
    pub caregiver_name: String,
    pub assigned_at: Option<DateTime<Utc>>,
    pub last_observation: Option<String>,
    pub last_condition: Option<AnimalCondition>,
}

/// Observation history entry with the caregiver's display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEntry {
    #[serde(flatten)]
    pub observation: CaregiverObservation,
    pub caregiver_name: String,
}

/// Rescuer dashboard entry: animal cleared for release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseCandidate {
    pub animal_id: AnimalId,
    pub animal_name: String,
    pub species_name: String,
    pub treatment_id: TreatmentId,
    pub caregiver_name: String,
    pub last_observation: String,
    pub cleared_at: DateTime<Utc>,
}

/// Rescuer dashboard entry: released animal with follow-up summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasedAnimal {
    pub release_id: ReleaseId,
    pub animal_id: AnimalId,
    pub animal_name: String,
    pub species_name: String,
    pub released_at: DateTime<Utc>,
    pub location: String,
    pub notes: String,
    pub rescuer_name: String,
    pub follow_up_count: usize,
    pub last_follow_up: Option<DateTime<Utc>>,
}

/// Follow-up history entry with the recording rescuer's display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpEntry {
    #[serde(flatten)]
    pub follow_up: ReleaseFollowUp,
    pub rescuer_name: String,
}

/// Full record for one animal: rescue context, latest assessment, the
/// current treatment and its prescriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimalRecord {
    pub animal: Animal,
    pub species_name: String,
    pub rescue: Option<Rescue>,
    pub rescuer_name: Option<String>,
    pub latest_assessment: Option<HealthAssessment>,
    pub treatment: Option<Treatment>,
    pub medications: Vec<MedicationLine>,
}

/// A prescription line joined with its catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationLine {
    pub medication_id: MedicationId,
    pub medication_name: String,
    pub kind: String,
    pub dose: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Audit summary returned by the rescue cascade delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescueDeletion {
    pub rescue_id: RescueId,
    pub animals_removed: Vec<RemovedAnimal>,
}

/// One animal removed by a rescue cascade delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedAnimal {
    pub id: AnimalId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn treatment_state_round_trips_through_codes() {
        for state in [
            TreatmentState::Pending,
            TreatmentState::InTreatment,
            TreatmentState::Completed,
        ] {
            assert_eq!(state.as_str().parse::<TreatmentState>().unwrap(), state);
        }
        assert!("CANCELLED".parse::<TreatmentState>().is_err());
    }

    #[test]
    fn only_completed_is_terminal() {
        assert!(TreatmentState::Pending.is_active());
        assert!(TreatmentState::InTreatment.is_active());
        assert!(!TreatmentState::Completed.is_active());
    }

    #[test]
    fn role_codes_are_stable() {
        assert_eq!(Role::Rescuer.as_code(), "RESCUER");
        assert_eq!("CAREGIVER".parse::<Role>().unwrap(), Role::Caregiver);
        assert!("JANITOR".parse::<Role>().is_err());
    }

    #[test]
    fn condition_serializes_snake_case() {
        let json = serde_json::to_string(&AnimalCondition::ReadyForRelease).unwrap();
        assert_eq!(json, "\"ready_for_release\"");
    }
}
