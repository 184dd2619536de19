//! Unit tests for the workflow engine against the in-memory repository.

use super::*;
use crate::db::repositories::LocalRepository;
use chrono::NaiveDate;

struct Fixture {
    repo: LocalRepository,
    rescuer: ActorContext,
    vet: ActorContext,
    caregiver: ActorContext,
    caregiver_id: EmployeeId,
    species: SpeciesId,
    medication: MedicationId,
}

fn fixture() -> Fixture {
    let repo = LocalRepository::new();
    let rescuer_id = repo.add_employee("Lucia", "Paredes", "lparedes", "d1", &[Role::Rescuer]);
    let vet_id = repo.add_employee("Ana", "Marquez", "amarquez", "d2", &[Role::Veterinarian]);
    let caregiver_id = repo.add_employee("Tomas", "Rivas", "trivas", "d3", &[Role::Caregiver]);
    let species = repo.add_species("Vultur gryphus", "Cathartidae");
    let medication = repo.add_medication("Meloxicam", "anti-inflammatory");

    let actor = |id: EmployeeId, role: Role| ActorContext::new(id, [role].into_iter().collect());

    Fixture {
        rescuer: actor(rescuer_id, Role::Rescuer),
        vet: actor(vet_id, Role::Veterinarian),
        caregiver: actor(caregiver_id, Role::Caregiver),
        caregiver_id,
        species,
        medication,
        repo,
    }
}

fn intake_request(species: SpeciesId, names: &[&str]) -> IntakeRequest {
    IntakeRequest {
        date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        location: "Quebrada del Condorito".to_string(),
        details: "Found grounded after a storm".to_string(),
        animals: names
            .iter()
            .map(|name| NewAnimal {
                name: name.to_string(),
                species_id: species,
                breed: None,
                age: Some(2),
                sex: "F".to_string(),
            })
            .collect(),
    }
}

fn evaluate_request(animal_id: AnimalId, medication: MedicationId) -> EvaluateRequest {
    EvaluateRequest {
        animal_id,
        problem_type: "trauma".to_string(),
        diagnosis: "Fractured wing".to_string(),
        state: HealthState::Injured,
        plan: "Immobilize and medicate".to_string(),
        care_notes: None,
        medications: vec![NewTreatmentMedication {
            medication_id: medication,
            dose: "0.2 mg/kg daily".to_string(),
            start_date: None,
            end_date: None,
        }],
    }
}

/// Run the animal all the way to aftercare: intake, evaluate, complete,
/// assign caregiver. Returns (animal_id, treatment_id).
async fn bring_to_aftercare(f: &Fixture) -> (AnimalId, TreatmentId) {
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;

    let treatment = evaluate_animal(&f.repo, &f.vet, &evaluate_request(animal_id, f.medication))
        .await
        .unwrap();
    conclude_treatment(&f.repo, &f.vet, treatment.id)
        .await
        .unwrap();
    assign_caregiver(&f.repo, &f.vet, treatment.id, f.caregiver_id)
        .await
        .unwrap();
    (animal_id, treatment.id)
}

#[tokio::test]
async fn intake_requires_rescuer_role() {
    let f = fixture();
    let err = record_rescue(&f.repo, &f.vet, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Forbidden {
            required: Role::Rescuer
        }
    ));
}

#[tokio::test]
async fn intake_rejects_empty_animal_list() {
    let f = fixture();
    let err = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[tokio::test]
async fn intake_queues_every_animal_for_evaluation() {
    let f = fixture();
    let rescue = record_rescue(
        &f.repo,
        &f.rescuer,
        &intake_request(f.species, &["Inti", "Killa"]),
    )
    .await
    .unwrap();
    assert_eq!(rescue.animals.len(), 2);

    let pending = pending_animals(&f.repo, &f.vet).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].rescuer_name, "Lucia Paredes");
}

#[tokio::test]
async fn evaluate_moves_treatment_into_progress() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;

    let treatment = evaluate_animal(&f.repo, &f.vet, &evaluate_request(animal_id, f.medication))
        .await
        .unwrap();
    assert_eq!(treatment.state, TreatmentState::InTreatment);
    assert_eq!(treatment.veterinarian_id, Some(f.vet.employee_id));
    assert!(treatment.started_at.is_some());

    assert!(pending_animals(&f.repo, &f.vet).await.unwrap().is_empty());
    let active = active_treatments(&f.repo, &f.vet).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].health_state, Some(HealthState::Injured));

    let record = animal_record(&f.repo, &f.vet, animal_id).await.unwrap();
    assert_eq!(record.medications.len(), 1);
    assert_eq!(record.medications[0].medication_name, "Meloxicam");
    assert!(record.latest_assessment.is_some());
}

#[tokio::test]
async fn second_evaluation_conflicts() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;
    let request = evaluate_request(animal_id, f.medication);

    evaluate_animal(&f.repo, &f.vet, &request).await.unwrap();
    let err = evaluate_animal(&f.repo, &f.vet, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));
}

#[tokio::test]
async fn racing_evaluations_admit_exactly_one() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;
    let request = evaluate_request(animal_id, f.medication);

    let (a, b) = tokio::join!(
        evaluate_animal(&f.repo, &f.vet, &request),
        evaluate_animal(&f.repo, &f.vet, &request),
    );
    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser.unwrap_err(), WorkflowError::Conflict(_)));
}

#[tokio::test]
async fn reconsult_revises_plan_and_prescriptions() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;
    let treatment = evaluate_animal(&f.repo, &f.vet, &evaluate_request(animal_id, f.medication))
        .await
        .unwrap();

    let revised = reconsult(
        &f.repo,
        &f.vet,
        treatment.id,
        &ReconsultRequest {
            plan: Some("Extended immobilization".to_string()),
            care_notes: Some("Keep in low-stress enclosure".to_string()),
            medications: Some(vec![]),
        },
    )
    .await
    .unwrap();
    assert_eq!(revised.plan.as_deref(), Some("Extended immobilization"));

    let record = animal_record(&f.repo, &f.vet, animal_id).await.unwrap();
    assert!(record.medications.is_empty());
}

#[tokio::test]
async fn reconsult_after_completion_conflicts() {
    let f = fixture();
    let (_, treatment_id) = bring_to_aftercare(&f).await;

    let err = reconsult(&f.repo, &f.vet, treatment_id, &ReconsultRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));
}

#[tokio::test]
async fn complete_requires_in_treatment() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;

    // Still PENDING: there is nothing to conclude yet.
    let record = animal_record(&f.repo, &f.vet, animal_id).await.unwrap();
    let treatment_id = record.treatment.unwrap().id;
    let err = conclude_treatment(&f.repo, &f.vet, treatment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));
}

#[tokio::test]
async fn caregiver_assignment_checks_assignee_role() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;
    let treatment = evaluate_animal(&f.repo, &f.vet, &evaluate_request(animal_id, f.medication))
        .await
        .unwrap();
    conclude_treatment(&f.repo, &f.vet, treatment.id)
        .await
        .unwrap();

    // The vet does not hold the Caregiver role.
    let err = assign_caregiver(&f.repo, &f.vet, treatment.id, f.vet.employee_id)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));

    assign_caregiver(&f.repo, &f.vet, treatment.id, f.caregiver_id)
        .await
        .unwrap();
    let in_care = in_care_animals(&f.repo, &f.caregiver, true).await.unwrap();
    assert_eq!(in_care.len(), 1);
    assert_eq!(in_care[0].caregiver_name, "Tomas Rivas");
}

#[tokio::test]
async fn observation_requires_completed_treatment() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;
    let treatment = evaluate_animal(&f.repo, &f.vet, &evaluate_request(animal_id, f.medication))
        .await
        .unwrap();

    let err = observe(
        &f.repo,
        &f.caregiver,
        &ObserveRequest {
            treatment_id: treatment.id,
            text: "Feeding well".to_string(),
            condition: AnimalCondition::InCare,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));
}

#[tokio::test]
async fn observation_rejects_oversized_text() {
    let f = fixture();
    let (_, treatment_id) = bring_to_aftercare(&f).await;

    let err = observe(
        &f.repo,
        &f.caregiver,
        &ObserveRequest {
            treatment_id,
            text: "x".repeat(501),
            condition: AnimalCondition::InCare,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[tokio::test]
async fn only_the_assigned_caregiver_may_observe() {
    let f = fixture();
    let (_, treatment_id) = bring_to_aftercare(&f).await;

    let other_id = f.repo.add_employee("Nora", "Salas", "nsalas", "d4", &[Role::Caregiver]);
    let other = ActorContext::new(other_id, [Role::Caregiver].into_iter().collect());

    let err = observe(
        &f.repo,
        &other,
        &ObserveRequest {
            treatment_id,
            text: "Feeding well".to_string(),
            condition: AnimalCondition::InCare,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WorkflowError::Denied(_)));
}

#[tokio::test]
async fn healthy_evaluation_records_no_prescriptions() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();
    let animal_id = rescue.animals[0].id;

    let mut request = evaluate_request(animal_id, f.medication);
    request.state = HealthState::Healthy;
    evaluate_animal(&f.repo, &f.vet, &request).await.unwrap();

    let record = animal_record(&f.repo, &f.vet, animal_id).await.unwrap();
    assert!(record.medications.is_empty());
}

#[tokio::test]
async fn treatment_detail_looks_up_by_id() {
    let f = fixture();
    let (_, treatment_id) = bring_to_aftercare(&f).await;

    let treatment = treatment_detail(&f.repo, &f.vet, treatment_id)
        .await
        .unwrap();
    assert_eq!(treatment.id, treatment_id);
    assert_eq!(treatment.state, TreatmentState::Completed);

    let err = treatment_detail(&f.repo, &f.vet, TreatmentId(999))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn caregiver_directory_filters_by_role() {
    let f = fixture();
    let caregivers = list_caregivers(&f.repo, &f.vet).await.unwrap();
    assert_eq!(caregivers.len(), 1);
    assert_eq!(caregivers[0].id, f.caregiver_id);
}

#[tokio::test]
async fn release_requires_ready_clearance() {
    let f = fixture();
    let (animal_id, treatment_id) = bring_to_aftercare(&f).await;

    // No observation yet: not eligible.
    let request = ReleaseRequest {
        animal_id,
        location: "Quebrada del Condorito".to_string(),
        notes: String::new(),
    };
    let err = release_animal(&f.repo, &f.rescuer, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    // An observation that is not ready-for-release does not clear it.
    observe(
        &f.repo,
        &f.caregiver,
        &ObserveRequest {
            treatment_id,
            text: "Still underweight".to_string(),
            condition: AnimalCondition::Recovering,
        },
    )
    .await
    .unwrap();
    assert!(release_candidates(&f.repo, &f.rescuer)
        .await
        .unwrap()
        .is_empty());
    let err = release_animal(&f.repo, &f.rescuer, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));
}

#[tokio::test]
async fn ready_clearance_survives_later_observations() {
    let f = fixture();
    let (animal_id, treatment_id) = bring_to_aftercare(&f).await;

    observe(
        &f.repo,
        &f.caregiver,
        &ObserveRequest {
            treatment_id,
            text: "Flight recovered".to_string(),
            condition: AnimalCondition::ReadyForRelease,
        },
    )
    .await
    .unwrap();
    assert_eq!(
        release_candidates(&f.repo, &f.rescuer).await.unwrap().len(),
        1
    );

    // One ready observation clears the animal for good; a later, worse
    // entry is recorded but does not take the clearance back.
    observe(
        &f.repo,
        &f.caregiver,
        &ObserveRequest {
            treatment_id,
            text: "Relapsed overnight".to_string(),
            condition: AnimalCondition::Critical,
        },
    )
    .await
    .unwrap();
    assert_eq!(
        release_candidates(&f.repo, &f.rescuer).await.unwrap().len(),
        1
    );

    let release = release_animal(
        &f.repo,
        &f.rescuer,
        &ReleaseRequest {
            animal_id,
            location: "Quebrada del Condorito".to_string(),
            notes: String::new(),
        },
    )
    .await
    .unwrap();
    assert_eq!(release.animal_id, animal_id);
}

#[tokio::test]
async fn release_is_once_only() {
    let f = fixture();
    let (animal_id, treatment_id) = bring_to_aftercare(&f).await;
    observe(
        &f.repo,
        &f.caregiver,
        &ObserveRequest {
            treatment_id,
            text: "Flight recovered".to_string(),
            condition: AnimalCondition::ReadyForRelease,
        },
    )
    .await
    .unwrap();

    let request = ReleaseRequest {
        animal_id,
        location: "Quebrada del Condorito".to_string(),
        notes: "Tagged before release".to_string(),
    };
    let release = release_animal(&f.repo, &f.rescuer, &request)
        .await
        .unwrap();
    assert_eq!(release.rescuer_id, f.rescuer.employee_id);

    let err = release_animal(&f.repo, &f.rescuer, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    // Released animals leave the aftercare dashboard.
    assert!(in_care_animals(&f.repo, &f.caregiver, false)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn follow_ups_accumulate_on_release() {
    let f = fixture();
    let (animal_id, treatment_id) = bring_to_aftercare(&f).await;
    observe(
        &f.repo,
        &f.caregiver,
        &ObserveRequest {
            treatment_id,
            text: "Flight recovered".to_string(),
            condition: AnimalCondition::ReadyForRelease,
        },
    )
    .await
    .unwrap();
    let release = release_animal(
        &f.repo,
        &f.rescuer,
        &ReleaseRequest {
            animal_id,
            location: "Quebrada del Condorito".to_string(),
            notes: String::new(),
        },
    )
    .await
    .unwrap();

    record_follow_up(
        &f.repo,
        &f.rescuer,
        release.id,
        &FollowUpRequest {
            tracking_method: "radio collar".to_string(),
            observed_state: "hunting normally".to_string(),
            sighting_location: Some("5 km north of release site".to_string()),
            notes: String::new(),
        },
    )
    .await
    .unwrap();

    let listed = releases(&f.repo, &f.rescuer).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].follow_up_count, 1);

    let history = follow_ups(&f.repo, &f.rescuer, release.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].rescuer_name, "Lucia Paredes");

    let err = record_follow_up(
        &f.repo,
        &f.rescuer,
        ReleaseId(999),
        &FollowUpRequest {
            tracking_method: "radio collar".to_string(),
            observed_state: "unknown".to_string(),
            sighting_location: None,
            notes: String::new(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn rescue_deletion_cascades() {
    let f = fixture();
    let rescue = record_rescue(
        &f.repo,
        &f.rescuer,
        &intake_request(f.species, &["Inti", "Killa"]),
    )
    .await
    .unwrap();

    let deletion = delete_rescue(&f.repo, &f.rescuer, rescue.rescue.id)
        .await
        .unwrap();
    assert_eq!(deletion.animals_removed.len(), 2);
    assert!(pending_animals(&f.repo, &f.vet).await.unwrap().is_empty());

    let err = delete_rescue(&f.repo, &f.rescuer, rescue.rescue.id)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn rescue_update_replaces_animals() {
    let f = fixture();
    let rescue = record_rescue(&f.repo, &f.rescuer, &intake_request(f.species, &["Inti"]))
        .await
        .unwrap();

    let updated = update_rescue(
        &f.repo,
        &f.rescuer,
        rescue.rescue.id,
        &intake_request(f.species, &["Killa", "Wayra"]),
    )
    .await
    .unwrap();
    assert_eq!(updated.animals.len(), 2);

    // Old animal's pending treatment is gone; the new ones are queued.
    let pending = pending_animals(&f.repo, &f.vet).await.unwrap();
    let names: Vec<&str> = pending.iter().map(|p| p.animal_name.as_str()).collect();
    assert_eq!(names, vec!["Killa", "Wayra"]);
}
