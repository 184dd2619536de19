//! End-to-end workflow tests over the in-memory backend.
//!
//! Each test drives the engine the way the HTTP handlers do: an actor
//! with a role set calls the workflow operations and the dashboards are
//! checked after every transition.

use std::collections::HashSet;

use chrono::NaiveDate;
use refugio_rust::api::*;
use refugio_rust::db::repositories::LocalRepository;
use refugio_rust::workflow::{
    self, ActorContext, EvaluateRequest, FollowUpRequest, IntakeRequest, ObserveRequest,
    ReconsultRequest, ReleaseRequest, WorkflowError,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn actor(id: EmployeeId, roles: &[Role]) -> ActorContext {
    ActorContext::new(id, roles.iter().copied().collect::<HashSet<_>>())
}

struct Center {
    repo: LocalRepository,
    rescuer: ActorContext,
    vet: ActorContext,
    caregiver: ActorContext,
    species: SpeciesId,
    medication: MedicationId,
}

fn center() -> Center {
    let repo = LocalRepository::new();
    let rescuer_id = repo.add_employee("Carmen", "Ruiz", "cruiz", "digest-a", &[Role::Rescuer]);
    let vet_id = repo.add_employee("Ana", "Marquez", "amarquez", "digest-b", &[Role::Veterinarian]);
    let caregiver_id = repo.add_employee("Luis", "Vega", "lvega", "digest-c", &[Role::Caregiver]);
    let species = repo.add_species("Buteo buteo", "Accipitridae");
    let medication = repo.add_medication("Amoxicillin", "antibiotic");
    Center {
        repo,
        rescuer: actor(rescuer_id, &[Role::Rescuer]),
        vet: actor(vet_id, &[Role::Veterinarian]),
        caregiver: actor(caregiver_id, &[Role::Caregiver]),
        species,
        medication,
    }
}

fn intake(c: &Center, names: &[&str]) -> IntakeRequest {
    IntakeRequest {
        date: date(2026, 4, 10),
        location: "Valle del Jerte".to_string(),
        details: "Reported by a forest ranger".to_string(),
        animals: names
            .iter()
            .map(|name| NewAnimal {
                name: name.to_string(),
                species_id: c.species,
                breed: None,
                age: Some(1),
                sex: "M".to_string(),
            })
            .collect(),
    }
}

fn evaluate(animal_id: AnimalId) -> EvaluateRequest {
    EvaluateRequest {
        animal_id,
        problem_type: "injury".to_string(),
        diagnosis: "Broken wing".to_string(),
        state: HealthState::Injured,
        plan: "Immobilize and monitor".to_string(),
        care_notes: Some("Keep isolated from other birds".to_string()),
        medications: Vec::new(),
    }
}

#[tokio::test]
async fn full_lifecycle_from_intake_to_follow_up() {
    let c = center();

    // Intake by the rescuer.
    let rescue = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &["Halcon"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;

    // The animal shows up in the veterinarian's pending queue.
    let pending = workflow::pending_animals(&c.repo, &c.vet).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].animal_name, "Halcon");

    // Evaluation moves it to the active queue.
    let treatment = workflow::evaluate_animal(&c.repo, &c.vet, &evaluate(animal_id))
        .await
        .unwrap();
    assert_eq!(treatment.state, TreatmentState::InTreatment);
    assert_eq!(
        treatment.care_notes.as_deref(),
        Some("Keep isolated from other birds")
    );
    assert!(workflow::pending_animals(&c.repo, &c.vet)
        .await
        .unwrap()
        .is_empty());
    let active = workflow::active_treatments(&c.repo, &c.vet).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].diagnosis.as_deref(), Some("Broken wing"));

    // Reconsult adjusts the plan and prescribes a medication.
    workflow::reconsult(
        &c.repo,
        &c.vet,
        treatment.id,
        &ReconsultRequest {
            plan: Some("Immobilize, antibiotics for ten days".to_string()),
            care_notes: Some("Keep in a quiet enclosure".to_string()),
            medications: Some(vec![NewTreatmentMedication {
                medication_id: c.medication,
                dose: "10mg daily".to_string(),
                start_date: Some(date(2026, 4, 11)),
                end_date: Some(date(2026, 4, 21)),
            }]),
        },
    )
    .await
    .unwrap();

    // Conclude, then hand over to the caregiver.
    workflow::conclude_treatment(&c.repo, &c.vet, treatment.id)
        .await
        .unwrap();
    assert!(workflow::active_treatments(&c.repo, &c.vet)
        .await
        .unwrap()
        .is_empty());
    let completed = workflow::completed_treatments(&c.repo, &c.vet)
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert!(completed[0].caregiver_id.is_none());

    workflow::assign_caregiver(&c.repo, &c.vet, treatment.id, c.caregiver.employee_id)
        .await
        .unwrap();

    // Caregiver sees the animal and records observations.
    let mine = workflow::in_care_animals(&c.repo, &c.caregiver, true)
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].caregiver_name, "Luis Vega");

    workflow::observe(
        &c.repo,
        &c.caregiver,
        &ObserveRequest {
            treatment_id: treatment.id,
            text: "Perching and feeding normally".to_string(),
            condition: AnimalCondition::ReadyForRelease,
        },
    )
    .await
    .unwrap();

    // The rescuer now sees a release candidate and releases the animal.
    let candidates = workflow::release_candidates(&c.repo, &c.rescuer)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].animal_id, animal_id);
    assert_eq!(candidates[0].last_observation, "Perching and feeding normally");

    let release = workflow::release_animal(
        &c.repo,
        &c.rescuer,
        &ReleaseRequest {
            animal_id,
            location: "Valle del Jerte".to_string(),
            notes: "Released where found".to_string(),
        },
    )
    .await
    .unwrap();

    // Released animals leave every queue.
    assert!(workflow::release_candidates(&c.repo, &c.rescuer)
        .await
        .unwrap()
        .is_empty());
    assert!(workflow::in_care_animals(&c.repo, &c.caregiver, false)
        .await
        .unwrap()
        .is_empty());

    // Follow-up entries accumulate on the release summary.
    workflow::record_follow_up(
        &c.repo,
        &c.rescuer,
        release.id,
        &FollowUpRequest {
            tracking_method: "radio collar".to_string(),
            observed_state: "hunting on its own".to_string(),
            sighting_location: Some("2km north of release point".to_string()),
            notes: String::new(),
        },
    )
    .await
    .unwrap();

    let released = workflow::releases(&c.repo, &c.rescuer).await.unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].follow_up_count, 1);
    assert!(released[0].last_follow_up.is_some());

    let history = workflow::follow_ups(&c.repo, &c.rescuer, release.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].rescuer_name, "Carmen Ruiz");
}

#[tokio::test]
async fn animal_record_tracks_the_whole_journey() {
    let c = center();
    let rescue = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &["Halcon"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;

    let before = workflow::animal_record(&c.repo, &c.rescuer, animal_id)
        .await
        .unwrap();
    assert!(before.latest_assessment.is_none());
    assert_eq!(
        before.treatment.as_ref().map(|t| t.state),
        Some(TreatmentState::Pending)
    );

    let treatment = workflow::evaluate_animal(&c.repo, &c.vet, &evaluate(animal_id))
        .await
        .unwrap();
    workflow::reconsult(
        &c.repo,
        &c.vet,
        treatment.id,
        &ReconsultRequest {
            plan: None,
            care_notes: None,
            medications: Some(vec![NewTreatmentMedication {
                medication_id: c.medication,
                dose: "10mg daily".to_string(),
                start_date: None,
                end_date: None,
            }]),
        },
    )
    .await
    .unwrap();

    let after = workflow::animal_record(&c.repo, &c.vet, animal_id)
        .await
        .unwrap();
    let assessment = after.latest_assessment.unwrap();
    assert_eq!(assessment.diagnosis, "Broken wing");
    assert_eq!(assessment.state, HealthState::Injured);
    assert_eq!(after.rescuer_name.as_deref(), Some("Carmen Ruiz"));
    assert_eq!(after.medications.len(), 1);
    assert_eq!(after.medications[0].medication_name, "Amoxicillin");
}

#[tokio::test]
async fn every_transition_is_role_gated() {
    let c = center();
    let rescue = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &["Halcon"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;

    // Only rescuers record rescues.
    let denied = workflow::record_rescue(&c.repo, &c.vet, &intake(&c, &["Otro"])).await;
    assert!(matches!(
        denied,
        Err(WorkflowError::Forbidden {
            required: Role::Rescuer
        })
    ));

    // Only veterinarians evaluate.
    let denied = workflow::evaluate_animal(&c.repo, &c.caregiver, &evaluate(animal_id)).await;
    assert!(matches!(
        denied,
        Err(WorkflowError::Forbidden {
            required: Role::Veterinarian
        })
    ));

    let treatment = workflow::evaluate_animal(&c.repo, &c.vet, &evaluate(animal_id))
        .await
        .unwrap();
    workflow::conclude_treatment(&c.repo, &c.vet, treatment.id)
        .await
        .unwrap();
    workflow::assign_caregiver(&c.repo, &c.vet, treatment.id, c.caregiver.employee_id)
        .await
        .unwrap();

    // Only caregivers observe, only rescuers release.
    let denied = workflow::observe(
        &c.repo,
        &c.rescuer,
        &ObserveRequest {
            treatment_id: treatment.id,
            text: "note".to_string(),
            condition: AnimalCondition::InCare,
        },
    )
    .await;
    assert!(matches!(
        denied,
        Err(WorkflowError::Forbidden {
            required: Role::Caregiver
        })
    ));

    let denied = workflow::release_animal(
        &c.repo,
        &c.vet,
        &ReleaseRequest {
            animal_id,
            location: "somewhere".to_string(),
            notes: String::new(),
        },
    )
    .await;
    assert!(matches!(
        denied,
        Err(WorkflowError::Forbidden {
            required: Role::Rescuer
        })
    ));
}

#[tokio::test]
async fn caregiver_must_hold_the_caregiver_role() {
    let c = center();
    let rescue = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &["Halcon"]))
        .await
        .unwrap();
    let treatment = workflow::evaluate_animal(&c.repo, &c.vet, &evaluate(rescue.animals[0].id))
        .await
        .unwrap();
    workflow::conclude_treatment(&c.repo, &c.vet, treatment.id)
        .await
        .unwrap();

    // Assigning the rescuer as caregiver is a validation error, not a
    // role check on the caller.
    let result = workflow::assign_caregiver(
        &c.repo,
        &c.vet,
        treatment.id,
        c.rescuer.employee_id,
    )
    .await;
    assert!(matches!(result, Err(WorkflowError::Validation(_))));
}

#[tokio::test]
async fn out_of_order_transitions_are_conflicts() {
    let c = center();
    let rescue = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &["Halcon"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;
    let treatment_id = workflow::animal_record(&c.repo, &c.vet, animal_id)
        .await
        .unwrap()
        .treatment
        .unwrap()
        .id;

    // Conclude before evaluate.
    let result = workflow::conclude_treatment(&c.repo, &c.vet, treatment_id).await;
    assert!(matches!(result, Err(WorkflowError::Conflict(_))));

    // Assign before conclude.
    workflow::evaluate_animal(&c.repo, &c.vet, &evaluate(animal_id))
        .await
        .unwrap();
    let result =
        workflow::assign_caregiver(&c.repo, &c.vet, treatment_id, c.caregiver.employee_id).await;
    assert!(matches!(result, Err(WorkflowError::Conflict(_))));

    // Evaluate twice.
    let result = workflow::evaluate_animal(&c.repo, &c.vet, &evaluate(animal_id)).await;
    assert!(matches!(result, Err(WorkflowError::Conflict(_))));

    // Release before clearance.
    let result = workflow::release_animal(
        &c.repo,
        &c.rescuer,
        &ReleaseRequest {
            animal_id,
            location: "somewhere".to_string(),
            notes: String::new(),
        },
    )
    .await;
    assert!(matches!(result, Err(WorkflowError::Conflict(_))));
}

#[tokio::test]
async fn blank_required_text_is_rejected_before_storage() {
    let c = center();

    let mut request = intake(&c, &["Halcon"]);
    request.location = "  ".to_string();
    let result = workflow::record_rescue(&c.repo, &c.rescuer, &request).await;
    assert!(matches!(result, Err(WorkflowError::Validation(_))));
    assert!(workflow::list_rescues(&c.repo, &c.rescuer)
        .await
        .unwrap()
        .is_empty());

    let rescue = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &["Halcon"]))
        .await
        .unwrap();
    let mut request = evaluate(rescue.animals[0].id);
    request.plan = String::new();
    let result = workflow::evaluate_animal(&c.repo, &c.vet, &request).await;
    assert!(matches!(result, Err(WorkflowError::Validation(_))));
}

#[tokio::test]
async fn intake_with_no_animals_is_rejected() {
    let c = center();
    let result = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &[])).await;
    assert!(matches!(result, Err(WorkflowError::Validation(_))));
}

#[tokio::test]
async fn in_care_filter_respects_only_mine() {
    let c = center();
    let other_caregiver_id =
        c.repo
            .add_employee("Marta", "Sol", "msol", "digest-d", &[Role::Caregiver]);
    let other_caregiver = actor(other_caregiver_id, &[Role::Caregiver]);

    let rescue = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &["Uno", "Dos"]))
        .await
        .unwrap();
    for (animal, assignee) in rescue
        .animals
        .iter()
        .zip([c.caregiver.employee_id, other_caregiver_id])
    {
        let treatment = workflow::evaluate_animal(&c.repo, &c.vet, &evaluate(animal.id))
            .await
            .unwrap();
        workflow::conclude_treatment(&c.repo, &c.vet, treatment.id)
            .await
            .unwrap();
        workflow::assign_caregiver(&c.repo, &c.vet, treatment.id, assignee)
            .await
            .unwrap();
    }

    let all = workflow::in_care_animals(&c.repo, &c.caregiver, false)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let mine = workflow::in_care_animals(&c.repo, &other_caregiver, true)
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].animal_name, "Dos");
}

#[tokio::test]
async fn directory_reads_are_open_to_any_staff() {
    let c = center();
    let employees = workflow::list_employees(&c.repo, &c.caregiver)
        .await
        .unwrap();
    assert_eq!(employees.len(), 3);

    let species = workflow::list_species(&c.repo, &c.vet).await.unwrap();
    assert_eq!(species.len(), 1);
    assert_eq!(species[0].scientific_name, "Buteo buteo");

    let medications = workflow::list_medications(&c.repo, &c.rescuer)
        .await
        .unwrap();
    assert_eq!(medications.len(), 1);
}

#[tokio::test]
async fn queue_reads_are_open_to_any_staff() {
    let c = center();
    let rescue = workflow::record_rescue(&c.repo, &c.rescuer, &intake(&c, &["Halcon"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;

    // The pending queue is visible to rescuers, not just veterinarians.
    let pending = workflow::pending_animals(&c.repo, &c.rescuer).await.unwrap();
    assert_eq!(pending.len(), 1);

    let treatment = workflow::evaluate_animal(&c.repo, &c.vet, &evaluate(animal_id))
        .await
        .unwrap();
    let active = workflow::active_treatments(&c.repo, &c.caregiver)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);

    workflow::conclude_treatment(&c.repo, &c.vet, treatment.id)
        .await
        .unwrap();
    workflow::assign_caregiver(&c.repo, &c.vet, treatment.id, c.caregiver.employee_id)
        .await
        .unwrap();
    let completed = workflow::completed_treatments(&c.repo, &c.rescuer)
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);

    // Release dashboards too: the vet can read them, only rescuers mutate.
    let in_care = workflow::in_care_animals(&c.repo, &c.vet, false)
        .await
        .unwrap();
    assert_eq!(in_care.len(), 1);
    assert!(workflow::release_candidates(&c.repo, &c.vet)
        .await
        .unwrap()
        .is_empty());
    assert!(workflow::releases(&c.repo, &c.caregiver)
        .await
        .unwrap()
        .is_empty());
}
