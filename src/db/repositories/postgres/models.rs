use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

use super::schema::{
    animals, caregiver_observations, employees, health_assessments, medications,
    release_follow_ups, releases, rescues, species, treatment_medications, treatments,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = employees)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EmployeeRow {
    pub employee_id: i64,
    pub name: String,
    pub surname: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub username: String,
    pub password_digest: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = species)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SpeciesRow {
    pub species_id: i64,
    pub scientific_name: String,
    pub family: String,
    pub habitat: String,
    pub conservation_status: String,
    pub diet: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = medications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MedicationRow {
    pub medication_id: i64,
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = rescues)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RescueRow {
    pub rescue_id: i64,
    pub rescue_date: NaiveDate,
    pub location: String,
    pub details: String,
    pub rescuer_id: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = rescues)]
pub struct NewRescueRow {
    pub rescue_date: NaiveDate,
    pub location: String,
    pub details: String,
    pub rescuer_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = animals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AnimalRow {
    pub animal_id: i64,
    pub name: String,
    pub species_id: i64,
    pub breed: Option<String>,
    pub age: Option<i32>,
    pub sex: String,
    pub rescue_id: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = animals)]
pub struct NewAnimalRow {
    pub name: String,
    pub species_id: i64,
    pub breed: Option<String>,
    pub age: Option<i32>,
    pub sex: String,
    pub rescue_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = treatments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TreatmentRow {
    pub treatment_id: i64,
    pub animal_id: i64,
    pub veterinarian_id: Option<i64>,
    pub caregiver_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub plan: Option<String>,
    pub care_notes: Option<String>,
    pub state: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = treatments)]
pub struct NewTreatmentRow {
    pub animal_id: i64,
    pub state: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = health_assessments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AssessmentRow {
    pub assessment_id: i64,
    pub animal_id: i64,
    pub evaluated_at: DateTime<Utc>,
    pub problem_type: String,
    pub diagnosis: String,
    pub state: String,
    pub veterinarian_id: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = health_assessments)]
pub struct NewAssessmentRow {
    pub animal_id: i64,
    pub problem_type: String,
    pub diagnosis: String,
    pub state: String,
    pub veterinarian_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = treatment_medications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TreatmentMedicationRow {
    pub treatment_id: i64,
    pub medication_id: i64,
    pub dose: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = treatment_medications)]
pub struct NewTreatmentMedicationRow {
    pub treatment_id: i64,
    pub medication_id: i64,
    pub dose: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = caregiver_observations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ObservationRow {
    pub observation_id: i64,
    pub treatment_id: i64,
    pub caregiver_id: i64,
    pub observed_at: DateTime<Utc>,
    pub text: String,
    pub condition: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = caregiver_observations)]
pub struct NewObservationRow {
    pub treatment_id: i64,
    pub caregiver_id: i64,
    pub text: String,
    pub condition: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = releases)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReleaseRow {
    pub release_id: i64,
    pub animal_id: i64,
    pub released_at: DateTime<Utc>,
    pub location: String,
    pub notes: String,
    pub rescuer_id: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = releases)]
pub struct NewReleaseRow {
    pub animal_id: i64,
    pub location: String,
    pub notes: String,
    pub rescuer_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = release_follow_ups)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FollowUpRow {
    pub follow_up_id: i64,
    pub release_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub tracking_method: String,
    pub observed_state: String,
    pub sighting_location: Option<String>,
    pub notes: String,
    pub rescuer_id: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = release_follow_ups)]
pub struct NewFollowUpRow {
    pub release_id: i64,
    pub tracking_method: String,
    pub observed_state: String,
    pub sighting_location: Option<String>,
    pub notes: String,
    pub rescuer_id: i64,
}
