//! In-memory local repository implementation.
//!
//! This module provides a local implementation of all repository traits
//! suitable for unit testing and local development. All data is stored in
//! memory using HashMap structures, providing fast, deterministic, and
//! isolated execution.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::api::*;
use crate::db::repository::*;

/// In-memory local repository.
///
/// Every multi-table mutation runs under a single write lock, which gives
/// the same atomicity the Postgres backend gets from a transaction.
///
/// # Example
/// ```ignore
/// let repo = LocalRepository::new();
/// let vet = repo.add_employee("Ana", "Marquez", "amarquez", "digest", &[Role::Veterinarian]);
///
/// let animals = repo.fetch_pending_animals().await.unwrap();
/// assert!(animals.is_empty());
/// ```
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
}

struct LocalData {
    // Reference data
    employees: HashMap<EmployeeId, Employee>,
    credentials: HashMap<String, (EmployeeId, String)>,
    roles: HashMap<EmployeeId, HashSet<Role>>,
    species: HashMap<SpeciesId, Species>,
    medications: HashMap<MedicationId, Medication>,

    // Lifecycle data
    rescues: HashMap<RescueId, Rescue>,
    animals: HashMap<AnimalId, Animal>,
    treatments: HashMap<TreatmentId, Treatment>,
    assessments: HashMap<AssessmentId, HealthAssessment>,
    treatment_medications: Vec<TreatmentMedication>,
    observations: HashMap<ObservationId, CaregiverObservation>,
    releases: HashMap<ReleaseId, Release>,
    follow_ups: HashMap<FollowUpId, ReleaseFollowUp>,

    // ID counters
    next_employee_id: i64,
    next_species_id: i64,
    next_medication_id: i64,
    next_rescue_id: i64,
    next_animal_id: i64,
    next_treatment_id: i64,
    next_assessment_id: i64,
    next_observation_id: i64,
    next_release_id: i64,
    next_follow_up_id: i64,

    // Connection health
    is_healthy: bool,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            employees: HashMap::new(),
            credentials: HashMap::new(),
            roles: HashMap::new(),
            species: HashMap::new(),
            medications: HashMap::new(),
            rescues: HashMap::new(),
            animals: HashMap::new(),
            treatments: HashMap::new(),
            assessments: HashMap::new(),
            treatment_medications: Vec::new(),
            observations: HashMap::new(),
            releases: HashMap::new(),
            follow_ups: HashMap::new(),
            next_employee_id: 1,
            next_species_id: 1,
            next_medication_id: 1,
            next_rescue_id: 1,
            next_animal_id: 1,
            next_treatment_id: 1,
            next_assessment_id: 1,
            next_observation_id: 1,
            next_release_id: 1,
            next_follow_up_id: 1,
            is_healthy: true,
        }
    }
}

impl LocalRepository {
    /// Create a new empty local repository.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData::default())),
        }
    }

    // ==================== Seed helpers ====================

    /// Add an employee with credentials and role assignments.
    ///
    /// This is a helper method for setting up data; employee provisioning
    /// is not part of the repository traits.
    pub fn add_employee(
        &self,
        name: &str,
        surname: &str,
        username: &str,
        password_digest: &str,
        roles: &[Role],
    ) -> EmployeeId {
        let mut data = self.data.write().unwrap();
        let id = EmployeeId(data.next_employee_id);
        data.next_employee_id += 1;

        data.employees.insert(
            id,
            Employee {
                id,
                name: name.to_string(),
                surname: surname.to_string(),
                phone: None,
                email: None,
                username: username.to_string(),
            },
        );
        data.credentials
            .insert(username.to_string(), (id, password_digest.to_string()));
        data.roles.insert(id, roles.iter().copied().collect());
        id
    }

    /// Add a species catalog entry.
    pub fn add_species(&self, scientific_name: &str, family: &str) -> SpeciesId {
        let mut data = self.data.write().unwrap();
        let id = SpeciesId(data.next_species_id);
        data.next_species_id += 1;

        data.species.insert(
            id,
            Species {
                id,
                scientific_name: scientific_name.to_string(),
                family: family.to_string(),
                habitat: String::new(),
                conservation_status: String::new(),
                diet: String::new(),
            },
        );
        id
    }

    /// Add a medication catalog entry.
    pub fn add_medication(&self, name: &str, kind: &str) -> MedicationId {
        let mut data = self.data.write().unwrap();
        let id = MedicationId(data.next_medication_id);
        data.next_medication_id += 1;

        data.medications.insert(
            id,
            Medication {
                id,
                name: name.to_string(),
                kind: kind.to_string(),
                description: None,
            },
        );
        id
    }

    /// Set the health status for testing connection failures.
    pub fn set_healthy(&self, healthy: bool) {
        let mut data = self.data.write().unwrap();
        data.is_healthy = healthy;
    }

    /// Clear all data from the repository.
    pub fn clear(&self) {
        let mut data = self.data.write().unwrap();
        let healthy = data.is_healthy;
        *data = LocalData {
            is_healthy: healthy,
            ..Default::default()
        };
    }

    // ==================== Internal helpers ====================

    /// Helper to check health and return error if unhealthy.
    fn check_health(&self) -> RepositoryResult<()> {
        let data = self.data.read().unwrap();
        if !data.is_healthy {
            return Err(RepositoryError::connection("Database is not healthy"));
        }
        Ok(())
    }
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

// Free functions over LocalData so they can be called while a lock is held.

fn employee_name(data: &LocalData, id: EmployeeId) -> Option<String> {
    data.employees.get(&id).map(Employee::full_name)
}

fn species_name(data: &LocalData, id: SpeciesId) -> String {
    data.species
        .get(&id)
        .map(|s| s.scientific_name.clone())
        .unwrap_or_default()
}

fn rescue_view(data: &LocalData, rescue: &Rescue) -> RescueWithAnimals {
    let mut animals: Vec<Animal> = data
        .animals
        .values()
        .filter(|a| a.rescue_id == rescue.id)
        .cloned()
        .collect();
    animals.sort_by_key(|a| a.id);

    RescueWithAnimals {
        rescue: rescue.clone(),
        rescuer_name: employee_name(data, rescue.rescuer_id).unwrap_or_default(),
        animals,
    }
}

/// Latest treatment row for an animal, by ID.
fn treatment_for_animal<'a>(data: &'a LocalData, animal_id: AnimalId) -> Option<&'a Treatment> {
    data.treatments
        .values()
        .filter(|t| t.animal_id == animal_id)
        .max_by_key(|t| t.id)
}

/// Latest assessment for an animal (timestamp, then ID as tiebreak).
fn latest_assessment<'a>(data: &'a LocalData, animal_id: AnimalId) -> Option<&'a HealthAssessment> {
    data.assessments
        .values()
        .filter(|a| a.animal_id == animal_id)
        .max_by_key(|a| (a.evaluated_at, a.id))
}

/// Latest observation for a treatment (timestamp, then ID as tiebreak).
fn latest_observation<'a>(
    data: &'a LocalData,
    treatment_id: TreatmentId,
) -> Option<&'a CaregiverObservation> {
    data.observations
        .values()
        .filter(|o| o.treatment_id == treatment_id)
        .max_by_key(|o| (o.observed_at, o.id))
}

/// Most recent ready-for-release observation for a treatment, if any.
/// Clearance is sticky: a later, worse observation does not withdraw it.
fn ready_observation<'a>(
    data: &'a LocalData,
    treatment_id: TreatmentId,
) -> Option<&'a CaregiverObservation> {
    data.observations
        .values()
        .filter(|o| {
            o.treatment_id == treatment_id && o.condition == AnimalCondition::ReadyForRelease
        })
        .max_by_key(|o| (o.observed_at, o.id))
}

fn release_for_animal<'a>(data: &'a LocalData, animal_id: AnimalId) -> Option<&'a Release> {
    data.releases.values().find(|r| r.animal_id == animal_id)
}

fn medication_lines(data: &LocalData, treatment_id: TreatmentId) -> Vec<MedicationLine> {
    data.treatment_medications
        .iter()
        .filter(|tm| tm.treatment_id == treatment_id)
        .map(|tm| {
            let catalog = data.medications.get(&tm.medication_id);
            MedicationLine {
                medication_id: tm.medication_id,
                medication_name: catalog.map(|m| m.name.clone()).unwrap_or_default(),
                kind: catalog.map(|m| m.kind.clone()).unwrap_or_default(),
                dose: tm.dose.clone(),
                start_date: tm.start_date,
                end_date: tm.end_date,
            }
        })
        .collect()
}

/// Remove an animal and every record hanging off it. Used by the rescue
/// cascade paths; the caller already holds the write lock.
fn remove_animal_cascade(data: &mut LocalData, animal_id: AnimalId) {
    let treatment_ids: Vec<TreatmentId> = data
        .treatments
        .values()
        .filter(|t| t.animal_id == animal_id)
        .map(|t| t.id)
        .collect();
    for tid in &treatment_ids {
        data.treatments.remove(tid);
        data.treatment_medications.retain(|tm| tm.treatment_id != *tid);
        data.observations.retain(|_, o| o.treatment_id != *tid);
    }
    data.assessments.retain(|_, a| a.animal_id != animal_id);

    let release_ids: Vec<ReleaseId> = data
        .releases
        .values()
        .filter(|r| r.animal_id == animal_id)
        .map(|r| r.id)
        .collect();
    for rid in &release_ids {
        data.releases.remove(rid);
        data.follow_ups.retain(|_, f| f.release_id != *rid);
    }

    data.animals.remove(&animal_id);
}

/// Validate animal descriptors before any map is touched, so a failed
/// intake leaves no partial state.
fn validate_animals(data: &LocalData, animals: &[NewAnimal]) -> RepositoryResult<()> {
    for descriptor in animals {
        if descriptor.name.trim().is_empty() {
            return Err(RepositoryError::validation("Animal name must not be empty"));
        }
        if !data.species.contains_key(&descriptor.species_id) {
            return Err(RepositoryError::validation_with_context(
                "Unknown species",
                ErrorContext::new("store_rescue")
                    .with_entity("species")
                    .with_entity_id(descriptor.species_id),
            ));
        }
    }
    Ok(())
}

/// Insert animals plus their pending treatments. Inputs are already
/// validated; the caller holds the write lock.
fn insert_animals(data: &mut LocalData, rescue_id: RescueId, animals: &[NewAnimal]) {
    for descriptor in animals {
        let animal_id = AnimalId(data.next_animal_id);
        data.next_animal_id += 1;
        data.animals.insert(
            animal_id,
            Animal {
                id: animal_id,
                name: descriptor.name.clone(),
                species_id: descriptor.species_id,
                breed: descriptor.breed.clone(),
                age: descriptor.age,
                sex: descriptor.sex.clone(),
                rescue_id,
            },
        );

        let treatment_id = TreatmentId(data.next_treatment_id);
        data.next_treatment_id += 1;
        data.treatments.insert(
            treatment_id,
            Treatment {
                id: treatment_id,
                animal_id,
                veterinarian_id: None,
                caregiver_id: None,
                started_at: None,
                ended_at: None,
                plan: None,
                care_notes: None,
                state: TreatmentState::Pending,
            },
        );
    }
}

#[async_trait]
impl DirectoryRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        let data = self.data.read().unwrap();
        Ok(data.is_healthy)
    }

    async fn fetch_employees(&self) -> RepositoryResult<Vec<Employee>> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        let mut employees: Vec<Employee> = data.employees.values().cloned().collect();
        employees.sort_by_key(|e| e.id);
        Ok(employees)
    }

    async fn fetch_employee(&self, id: EmployeeId) -> RepositoryResult<Employee> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        data.employees
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("Employee {} not found", id)))
    }

    async fn find_employee_by_credentials(
        &self,
        username: &str,
        password_digest: &str,
    ) -> RepositoryResult<Option<Employee>> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        Ok(data.credentials.get(username).and_then(|(id, digest)| {
            if digest == password_digest {
                data.employees.get(id).cloned()
            } else {
                None
            }
        }))
    }

    async fn fetch_employee_roles(&self, id: EmployeeId) -> RepositoryResult<HashSet<Role>> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        Ok(data.roles.get(&id).cloned().unwrap_or_default())
    }

    async fn fetch_species(&self) -> RepositoryResult<Vec<Species>> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        let mut species: Vec<Species> = data.species.values().cloned().collect();
        species.sort_by_key(|s| s.id);
        Ok(species)
    }

    async fn fetch_species_by_id(&self, id: SpeciesId) -> RepositoryResult<Species> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        data.species
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("Species {} not found", id)))
    }

    async fn fetch_medications(&self) -> RepositoryResult<Vec<Medication>> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        let mut medications: Vec<Medication> = data.medications.values().cloned().collect();
        medications.sort_by_key(|m| m.id);
        Ok(medications)
    }
}

#[async_trait]
impl RescueRepository for LocalRepository {
    async fn store_rescue(
        &self,
        rescue: &NewRescue,
        animals: &[NewAnimal],
    ) -> RepositoryResult<RescueWithAnimals> {
        self.check_health()?;
        if animals.is_empty() {
            return Err(RepositoryError::validation(
                "A rescue must include at least one animal",
            ));
        }

        let mut data = self.data.write().unwrap();
        if !data.employees.contains_key(&rescue.rescuer_id) {
            return Err(RepositoryError::validation_with_context(
                "Unknown rescuer",
                ErrorContext::new("store_rescue")
                    .with_entity("employee")
                    .with_entity_id(rescue.rescuer_id),
            ));
        }
        validate_animals(&data, animals)?;

        let rescue_id = RescueId(data.next_rescue_id);
        data.next_rescue_id += 1;
        let stored = Rescue {
            id: rescue_id,
            date: rescue.date,
            location: rescue.location.clone(),
            details: rescue.details.clone(),
            rescuer_id: rescue.rescuer_id,
        };
        data.rescues.insert(rescue_id, stored.clone());

        insert_animals(&mut data, rescue_id, animals);

        Ok(rescue_view(&data, &stored))
    }

    async fn fetch_rescues(&self) -> RepositoryResult<Vec<RescueWithAnimals>> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        let mut rescues: Vec<&Rescue> = data.rescues.values().collect();
        rescues.sort_by_key(|r| (std::cmp::Reverse(r.date), std::cmp::Reverse(r.id)));
        Ok(rescues.into_iter().map(|r| rescue_view(&data, r)).collect())
    }

    async fn fetch_rescue(&self, id: RescueId) -> RepositoryResult<RescueWithAnimals> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        let rescue = data
            .rescues
            .get(&id)
            .ok_or_else(|| RepositoryError::not_found(format!("Rescue {} not found", id)))?;
        Ok(rescue_view(&data, rescue))
    }

    async fn update_rescue(
        &self,
        id: RescueId,
        rescue: &NewRescue,
        animals: &[NewAnimal],
    ) -> RepositoryResult<RescueWithAnimals> {
        self.check_health()?;
        if animals.is_empty() {
            return Err(RepositoryError::validation(
                "A rescue must include at least one animal",
            ));
        }

        let mut data = self.data.write().unwrap();
        if !data.rescues.contains_key(&id) {
            return Err(RepositoryError::not_found(format!(
                "Rescue {} not found",
                id
            )));
        }
        if !data.employees.contains_key(&rescue.rescuer_id) {
            return Err(RepositoryError::validation_with_context(
                "Unknown rescuer",
                ErrorContext::new("update_rescue")
                    .with_entity("employee")
                    .with_entity_id(rescue.rescuer_id),
            ));
        }
        validate_animals(&data, animals)?;

        // Replace the animal set wholesale, removing dependent records.
        let old_animals: Vec<AnimalId> = data
            .animals
            .values()
            .filter(|a| a.rescue_id == id)
            .map(|a| a.id)
            .collect();
        for animal_id in old_animals {
            remove_animal_cascade(&mut data, animal_id);
        }

        let updated = Rescue {
            id,
            date: rescue.date,
            location: rescue.location.clone(),
            details: rescue.details.clone(),
            rescuer_id: rescue.rescuer_id,
        };
        data.rescues.insert(id, updated.clone());

        insert_animals(&mut data, id, animals);

        Ok(rescue_view(&data, &updated))
    }

    async fn delete_rescue(&self, id: RescueId) -> RepositoryResult<RescueDeletion> {
        self.check_health()?;
        let mut data = self.data.write().unwrap();
        if data.rescues.remove(&id).is_none() {
            return Err(RepositoryError::not_found(format!(
                "Rescue {} not found",
                id
            )));
        }

        let mut removed: Vec<RemovedAnimal> = data
            .animals
            .values()
            .filter(|a| a.rescue_id == id)
            .map(|a| RemovedAnimal {
                id: a.id,
                name: a.name.clone(),
            })
            .collect();
        removed.sort_by_key(|a| a.id);

        for animal in &removed {
            remove_animal_cascade(&mut data, animal.id);
        }

        Ok(RescueDeletion {
            rescue_id: id,
            animals_removed: removed,
        })
    }
}

#[async_trait]
impl TreatmentRepository for LocalRepository {
    async fn fetch_pending_animals(&self) -> RepositoryResult<Vec<PendingAnimal>> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        let mut pending: Vec<PendingAnimal> = data
            .treatments
            .values()
            .filter(|t| t.state == TreatmentState::Pending)
            .filter_map(|t| {
                let animal = data.animals.get(&t.animal_id)?;
                let rescue = data.rescues.get(&animal.rescue_id)?;
                Some(PendingAnimal {
                    animal_id: animal.id,
                    animal_name: animal.name.clone(),
                    species_name: species_name(&data, animal.species_id),
                    age: animal.age,
                    sex: animal.sex.clone(),
                    rescue_date: rescue.date,
                    rescue_location: rescue.location.clone(),
                    rescue_details: rescue.details.clone(),
                    rescuer_name: employee_name(&data, rescue.rescuer_id).unwrap_or_default(),
                })
            })
            .collect();

        // Oldest rescues first so the longest-waiting animals surface.
        pending.sort_by_key(|p| (p.rescue_date, p.animal_id));
        Ok(pending)
    }

    async fn fetch_active_treatments(&self) -> RepositoryResult<Vec<ActiveTreatment>> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        let mut active: Vec<ActiveTreatment> = data
            .treatments
            .values()
            .filter(|t| t.state == TreatmentState::InTreatment)
            .filter_map(|t| {
                let animal = data.animals.get(&t.animal_id)?;
                let assessment = latest_assessment(&data, animal.id);
                Some(ActiveTreatment {
                    treatment_id: t.id,
                    animal_id: animal.id,
                    animal_name: animal.name.clone(),
                    species_name: species_name(&data, animal.species_id),
                    plan: t.plan.clone(),
                    started_at: t.started_at,
                    health_state: assessment.map(|a| a.state),
                    diagnosis: assessment.map(|a| a.diagnosis.clone()),
                    veterinarian_name: t
                        .veterinarian_id
                        .and_then(|id| employee_name(&data, id)),
                })
            })
            .collect();

        active.sort_by_key(|t| t.treatment_id);
        Ok(active)
    }

    async fn fetch_completed_treatments(&self) -> RepositoryResult<Vec<CompletedTreatment>> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        let mut completed: Vec<CompletedTreatment> = data
            .treatments
            .values()
            .filter(|t| t.state == TreatmentState::Completed)
            .filter_map(|t| {
                let animal = data.animals.get(&t.animal_id)?;
                Some(CompletedTreatment {
                    treatment_id: t.id,
                    animal_id: animal.id,
                    animal_name: animal.name.clone(),
                    species_name: species_name(&data, animal.species_id),
                    plan: t.plan.clone(),
                    care_notes: t.care_notes.clone(),
                    ended_at: t.ended_at,
                    veterinarian_name: t
                        .veterinarian_id
                        .and_then(|id| employee_name(&data, id)),
                    caregiver_id: t.caregiver_id,
                })
            })
            .collect();

        completed.sort_by_key(|t| t.treatment_id);
        Ok(completed)
    }

    async fn begin_treatment(
        &self,
        assessment: &NewAssessment,
        plan: &str,
        care_notes: Option<&str>,
        medications: &[NewTreatmentMedication],
    ) -> RepositoryResult<Treatment> {
        self.check_health()?;
        let mut data = self.data.write().unwrap();

        if !data.animals.contains_key(&assessment.animal_id) {
            return Err(RepositoryError::not_found(format!(
                "Animal {} not found",
                assessment.animal_id
            )));
        }
        if !data.employees.contains_key(&assessment.veterinarian_id) {
            return Err(RepositoryError::validation_with_context(
                "Unknown veterinarian",
                ErrorContext::new("begin_treatment")
                    .with_entity("employee")
                    .with_entity_id(assessment.veterinarian_id),
            ));
        }
        for line in medications {
            if !data.medications.contains_key(&line.medication_id) {
                return Err(RepositoryError::validation_with_context(
                    "Unknown medication",
                    ErrorContext::new("begin_treatment")
                        .with_entity("medication")
                        .with_entity_id(line.medication_id),
                ));
            }
        }

        let treatment_id = match treatment_for_animal(&data, assessment.animal_id) {
            Some(t) if t.state == TreatmentState::Pending => t.id,
            Some(t) => {
                return Err(RepositoryError::conflict_with_context(
                    format!("Treatment {} already left PENDING", t.id),
                    ErrorContext::new("begin_treatment")
                        .with_entity("treatment")
                        .with_entity_id(t.id)
                        .with_details(format!("state={}", t.state)),
                ))
            }
            None => {
                return Err(RepositoryError::not_found(format!(
                    "Animal {} has no treatment record",
                    assessment.animal_id
                )))
            }
        };

        let now = Utc::now();
        let assessment_id = AssessmentId(data.next_assessment_id);
        data.next_assessment_id += 1;
        data.assessments.insert(
            assessment_id,
            HealthAssessment {
                id: assessment_id,
                animal_id: assessment.animal_id,
                evaluated_at: now,
                problem_type: assessment.problem_type.clone(),
                diagnosis: assessment.diagnosis.clone(),
                state: assessment.state,
                veterinarian_id: assessment.veterinarian_id,
            },
        );

        for line in medications {
            data.treatment_medications.push(TreatmentMedication {
                treatment_id,
                medication_id: line.medication_id,
                dose: line.dose.clone(),
                start_date: line.start_date,
                end_date: line.end_date,
            });
        }

        let vet_id = assessment.veterinarian_id;
        let plan = plan.to_string();
        let treatment = data
            .treatments
            .get_mut(&treatment_id)
            .ok_or_else(|| RepositoryError::internal("Treatment vanished under write lock"))?;
        treatment.veterinarian_id = Some(vet_id);
        treatment.plan = Some(plan);
        treatment.care_notes = care_notes.map(str::to_string);
        treatment.started_at = Some(now);
        treatment.state = TreatmentState::InTreatment;

        Ok(treatment.clone())
    }

    async fn update_treatment(
        &self,
        id: TreatmentId,
        changes: &TreatmentChanges,
    ) -> RepositoryResult<Treatment> {
        self.check_health()?;
        let mut data = self.data.write().unwrap();

        for line in changes.medications.iter().flatten() {
            if !data.medications.contains_key(&line.medication_id) {
                return Err(RepositoryError::validation_with_context(
                    "Unknown medication",
                    ErrorContext::new("update_treatment")
                        .with_entity("medication")
                        .with_entity_id(line.medication_id),
                ));
            }
        }

        {
            let treatment = data
                .treatments
                .get(&id)
                .ok_or_else(|| RepositoryError::not_found(format!("Treatment {} not found", id)))?;
            if treatment.state != TreatmentState::InTreatment {
                return Err(RepositoryError::conflict_with_context(
                    format!("Treatment {} is not in treatment", id),
                    ErrorContext::new("update_treatment")
                        .with_entity("treatment")
                        .with_entity_id(id)
                        .with_details(format!("state={}", treatment.state)),
                ));
            }
        }

        if let Some(lines) = &changes.medications {
            data.treatment_medications.retain(|tm| tm.treatment_id != id);
            for line in lines {
                data.treatment_medications.push(TreatmentMedication {
                    treatment_id: id,
                    medication_id: line.medication_id,
                    dose: line.dose.clone(),
                    start_date: line.start_date,
                    end_date: line.end_date,
                });
            }
        }

        let plan = changes.plan.clone();
        let care_notes = changes.care_notes.clone();
        let treatment = data
            .treatments
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::internal("Treatment vanished under write lock"))?;
        if let Some(plan) = plan {
            treatment.plan = Some(plan);
        }
        if let Some(notes) = care_notes {
            treatment.care_notes = Some(notes);
        }

        Ok(treatment.clone())
    }

    async fn fetch_treatment(&self, id: TreatmentId) -> RepositoryResult<Treatment> {
        self.check_health()?;
        let data = self.data.read().unwrap();
        data.treatments
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("Treatment {} not found", id)))
    }

    async fn complete_treatment(&self, id: TreatmentId) -> RepositoryResult<Treatment> {
        self.check_health()?;
        let mut data = self.data.write().unwrap();

        let treatment = data
            .treatments
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(format!("Treatment {} not found", id)))?;
        if treatment.state != TreatmentState::InTreatment {
            return Err(RepositoryError::conflict_with_context(
                format!("Treatment {} is not in treatment", id),
                ErrorContext::new("complete_treatment")
                    .with_entity("treatment")
                    .with_entity_id(id)
                    .with_details(format!("state={}", treatment.state)),
            ));
        }

        treatment.state = TreatmentState::Completed;
        treatment.ended_at = Some(Utc::now());
        Ok(treatment.clone())
    }

    async fn assign_caregiver(
        &self,
        id: TreatmentId,
        caregiver_id: EmployeeId,
    ) -> RepositoryResult<Treatment> {
        self.check_health()?;
        let mut data = self.data.write().unwrap();

        if !data.employees.contains_key(&caregiver_id) {
            return Err(RepositoryError::validation_with_context(
                "Unknown caregiver",
                ErrorContext::new("assign_caregiver")
                    .with_entity("employee")
                    .with_entity_id(caregiver_id),
            ));
        }

        let treatment = data
            .treatments
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(format!("Treatment {} not found", id)))?;
        if treatment.state != TreatmentState::Completed {
            return Err(RepositoryError::conflict_with_context(
                format!("Treatment {} is not completed", id),
                ErrorContext::new("assign_caregiver")
                    .with_entity("treatment")
                    .with_entity_id(id)
                    .with_details(format!("state={}", treatment.state)),
            ));
        }

        // Reassignment overwrites; observation history keeps per-entry authors.
        treatment.caregiver_id = Some(caregiver_id);
        Ok(treatment.clone())
    }

    async fn record_observation(
        &self,
        observation: &NewObservation,
    ) -> RepositoryResult<CaregiverObservation> {
        self.check_health()?;
        let mut data = self.data.write().unwrap();

        if !data.employees.contains_key(&observation.caregiver_id) {
            return Err(RepositoryError::validation_with_context(
                "Unknown caregiver",
                ErrorContext::new("record_observation")
                    .with_entity("employee")
                    .with_entity_id(observation.caregiver_id),
            ));
        }

        let treatment = data.treatments.get(&observation.treatment_id).ok_or_else(|| {
            RepositoryError::not_found(format!(
                "Treatment {} not found",
                observation.treatment_id
            ))
        })?;
        // The assignment may change between the engine's check and this insert;
        // the author must still be the assigned caregiver under the write lock.
        if treatment.state != TreatmentState::Completed
            || treatment.caregiver_id != Some(observation.caregiver_id)
        {
            return Err(RepositoryError::conflict_with_context(
                format!(
                    "Treatment {} is not in aftercare under caregiver {}",
                    observation.treatment_id, observation.caregiver_id
                ),
                ErrorContext::new("record_observation")
                    .with_entity("treatment")
                    .with_entity_id(observation.treatment_id)
                    .with_details(format!("state={}", treatment.state)),
            ));
        }

        let id = ObservationId(data.next_observation_id);
        data.next_observation_id += 1;
        let stored = CaregiverObservation {
            id,
            treatment_id: observation.treatment_id,
            caregiver_id: observation.caregiver_id,
            observed_at: Utc::now(),
            text: observation.text.clone(),
            condition: observation.condition,
        };
        data.observations.insert(id, stored.clone());
        Ok(stored)
    }

    async fn fetch_in_care(
        &self,
        caregiver_id: Option<EmployeeId>,
    ) -> RepositoryResult<Vec<InCareAnimal>> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        let mut in_care: Vec<InCareAnimal> = data
            .treatments
            .values()
            .filter(|t| t.state == TreatmentState::Completed)
            .filter(|t| release_for_animal(&data, t.animal_id).is_none())
            .filter_map(|t| {
                let assigned = t.caregiver_id?;
                if let Some(wanted) = caregiver_id {
                    if assigned != wanted {
                        return None;
                    }
                }
                let animal = data.animals.get(&t.animal_id)?;
                let last = latest_observation(&data, t.id);
                Some(InCareAnimal {
                    treatment_id: t.id,
                    animal_id: animal.id,
                    animal_name: animal.name.clone(),
                    species_name: species_name(&data, animal.species_id),
                    caregiver_id: assigned,
                    caregiver_name: employee_name(&data, assigned).unwrap_or_default(),
                    assigned_at: t.ended_at,
                    last_observation: last.map(|o| o.text.clone()),
                    last_condition: last.map(|o| o.condition),
                })
            })
            .collect();

        in_care.sort_by_key(|a| a.treatment_id);
        Ok(in_care)
    }

    async fn fetch_observations(
        &self,
        treatment_id: TreatmentId,
    ) -> RepositoryResult<Vec<ObservationEntry>> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        let mut entries: Vec<ObservationEntry> = data
            .observations
            .values()
            .filter(|o| o.treatment_id == treatment_id)
            .map(|o| ObservationEntry {
                observation: o.clone(),
                caregiver_name: employee_name(&data, o.caregiver_id).unwrap_or_default(),
            })
            .collect();

        entries.sort_by_key(|e| {
            (
                std::cmp::Reverse(e.observation.observed_at),
                std::cmp::Reverse(e.observation.id),
            )
        });
        Ok(entries)
    }

    async fn fetch_animal_record(&self, animal_id: AnimalId) -> RepositoryResult<AnimalRecord> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        let animal = data
            .animals
            .get(&animal_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("Animal {} not found", animal_id)))?;

        let rescue = data.rescues.get(&animal.rescue_id).cloned();
        let treatment = treatment_for_animal(&data, animal_id).cloned();
        let medications = treatment
            .as_ref()
            .map(|t| medication_lines(&data, t.id))
            .unwrap_or_default();

        Ok(AnimalRecord {
            species_name: species_name(&data, animal.species_id),
            rescuer_name: rescue
                .as_ref()
                .and_then(|r| employee_name(&data, r.rescuer_id)),
            latest_assessment: latest_assessment(&data, animal_id).cloned(),
            animal,
            rescue,
            treatment,
            medications,
        })
    }
}

#[async_trait]
impl ReleaseRepository for LocalRepository {
    async fn fetch_release_candidates(&self) -> RepositoryResult<Vec<ReleaseCandidate>> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        let mut candidates: Vec<ReleaseCandidate> = data
            .treatments
            .values()
            .filter(|t| t.state == TreatmentState::Completed && t.caregiver_id.is_some())
            .filter(|t| release_for_animal(&data, t.animal_id).is_none())
            .filter_map(|t| {
                let cleared = ready_observation(&data, t.id)?;
                let last = latest_observation(&data, t.id)?;
                let animal = data.animals.get(&t.animal_id)?;
                Some(ReleaseCandidate {
                    animal_id: animal.id,
                    animal_name: animal.name.clone(),
                    species_name: species_name(&data, animal.species_id),
                    treatment_id: t.id,
                    caregiver_name: t
                        .caregiver_id
                        .and_then(|id| employee_name(&data, id))
                        .unwrap_or_default(),
                    last_observation: last.text.clone(),
                    cleared_at: cleared.observed_at,
                })
            })
            .collect();

        candidates.sort_by_key(|c| c.animal_id);
        Ok(candidates)
    }

    async fn store_release(&self, release: &NewRelease) -> RepositoryResult<Release> {
        self.check_health()?;
        let mut data = self.data.write().unwrap();

        if !data.employees.contains_key(&release.rescuer_id) {
            return Err(RepositoryError::validation_with_context(
                "Unknown rescuer",
                ErrorContext::new("store_release")
                    .with_entity("employee")
                    .with_entity_id(release.rescuer_id),
            ));
        }
        if !data.animals.contains_key(&release.animal_id) {
            return Err(RepositoryError::not_found(format!(
                "Animal {} not found",
                release.animal_id
            )));
        }
        if release_for_animal(&data, release.animal_id).is_some() {
            return Err(RepositoryError::conflict_with_context(
                format!("Animal {} is already released", release.animal_id),
                ErrorContext::new("store_release")
                    .with_entity("animal")
                    .with_entity_id(release.animal_id),
            ));
        }

        // Eligibility re-checked under the same write lock as the insert.
        let eligible = treatment_for_animal(&data, release.animal_id)
            .filter(|t| t.state == TreatmentState::Completed && t.caregiver_id.is_some())
            .and_then(|t| ready_observation(&data, t.id))
            .is_some();
        if !eligible {
            return Err(RepositoryError::conflict_with_context(
                format!("Animal {} is not cleared for release", release.animal_id),
                ErrorContext::new("store_release")
                    .with_entity("animal")
                    .with_entity_id(release.animal_id),
            ));
        }

        let id = ReleaseId(data.next_release_id);
        data.next_release_id += 1;
        let stored = Release {
            id,
            animal_id: release.animal_id,
            released_at: Utc::now(),
            location: release.location.clone(),
            notes: release.notes.clone(),
            rescuer_id: release.rescuer_id,
        };
        data.releases.insert(id, stored.clone());
        Ok(stored)
    }

    async fn fetch_releases(&self) -> RepositoryResult<Vec<ReleasedAnimal>> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        let mut releases: Vec<ReleasedAnimal> = data
            .releases
            .values()
            .filter_map(|r| {
                let animal = data.animals.get(&r.animal_id)?;
                let follow_ups: Vec<&ReleaseFollowUp> = data
                    .follow_ups
                    .values()
                    .filter(|f| f.release_id == r.id)
                    .collect();
                Some(ReleasedAnimal {
                    release_id: r.id,
                    animal_id: animal.id,
                    animal_name: animal.name.clone(),
                    species_name: species_name(&data, animal.species_id),
                    released_at: r.released_at,
                    location: r.location.clone(),
                    notes: r.notes.clone(),
                    rescuer_name: employee_name(&data, r.rescuer_id).unwrap_or_default(),
                    follow_up_count: follow_ups.len(),
                    last_follow_up: follow_ups.iter().map(|f| f.recorded_at).max(),
                })
            })
            .collect();

        releases.sort_by_key(|r| {
            (
                std::cmp::Reverse(r.released_at),
                std::cmp::Reverse(r.release_id),
            )
        });
        Ok(releases)
    }

    async fn store_follow_up(&self, follow_up: &NewFollowUp) -> RepositoryResult<ReleaseFollowUp> {
        self.check_health()?;
        let mut data = self.data.write().unwrap();

        if !data.releases.contains_key(&follow_up.release_id) {
            return Err(RepositoryError::not_found(format!(
                "Release {} not found",
                follow_up.release_id
            )));
        }
        if !data.employees.contains_key(&follow_up.rescuer_id) {
            return Err(RepositoryError::validation_with_context(
                "Unknown rescuer",
                ErrorContext::new("store_follow_up")
                    .with_entity("employee")
                    .with_entity_id(follow_up.rescuer_id),
            ));
        }

        let id = FollowUpId(data.next_follow_up_id);
        data.next_follow_up_id += 1;
        let stored = ReleaseFollowUp {
            id,
            release_id: follow_up.release_id,
            recorded_at: Utc::now(),
            tracking_method: follow_up.tracking_method.clone(),
            observed_state: follow_up.observed_state.clone(),
            sighting_location: follow_up.sighting_location.clone(),
            notes: follow_up.notes.clone(),
            rescuer_id: follow_up.rescuer_id,
        };
        data.follow_ups.insert(id, stored.clone());
        Ok(stored)
    }

    async fn fetch_follow_ups(
        &self,
        release_id: ReleaseId,
    ) -> RepositoryResult<Vec<FollowUpEntry>> {
        self.check_health()?;
        let data = self.data.read().unwrap();

        if !data.releases.contains_key(&release_id) {
            return Err(RepositoryError::not_found(format!(
                "Release {} not found",
                release_id
            )));
        }

        let mut entries: Vec<FollowUpEntry> = data
            .follow_ups
            .values()
            .filter(|f| f.release_id == release_id)
            .map(|f| FollowUpEntry {
                follow_up: f.clone(),
                rescuer_name: employee_name(&data, f.rescuer_id).unwrap_or_default(),
            })
            .collect();

        entries.sort_by_key(|e| {
            (
                std::cmp::Reverse(e.follow_up.recorded_at),
                std::cmp::Reverse(e.follow_up.id),
            )
        });
        Ok(entries)
    }
}
