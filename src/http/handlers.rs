//! HTTP handlers for the REST API.
//!
//! Each handler corresponds to an API endpoint and delegates to the
//! workflow engine for role checks and business logic. Handlers only
//! translate between HTTP and the engine's types.

use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::AppendHeaders,
    Json,
};

use super::auth::{
    clear_session_cookie, extract_token, password_digest, session_cookie, CurrentActor,
};
use super::dto::{
    ApiResponse, AssignCaregiverRequest, CreateFollowUpRequest, HealthResponse, LoginRequest,
    SessionInfo,
};
use super::error::AppError;
use super::state::AppState;
use crate::api::*;
use crate::workflow::{self, IntakeRequest, ObserveRequest, ReleaseRequest};

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// Result type for handlers that create a resource.
pub type CreatedResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), AppError>;

fn ok<T>(data: T) -> HandlerResult<T> {
    Ok(Json(ApiResponse::new(data)))
}

fn created<T>(data: T, message: &str) -> CreatedResult<T> {
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(data, message)),
    ))
}

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
///
/// Verify the service is running and the database is reachable. The only
/// endpoint that does not require a session.
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    let database = match state.repository.health_check().await {
        Ok(true) => "connected".to_string(),
        Ok(false) => "disconnected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    ok(HealthResponse {
        status: "ok".to_string(),
        database,
    })
}

// =============================================================================
// Authentication
// =============================================================================

/// POST /login
///
/// Verify credentials, open a session and set the session cookie.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<(AppendHeaders<[(axum::http::HeaderName, String); 1]>, Json<ApiResponse<SessionInfo>>), AppError>
{
    let digest = password_digest(&request.password);
    let employee = state
        .repository
        .find_employee_by_credentials(&request.username, &digest)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Invalid username or password".to_string()))?;

    let roles = state.repository.fetch_employee_roles(employee.id).await?;
    let token = state.sessions.create(employee.id);
    tracing::info!(employee_id = %employee.id, "Session opened");

    Ok((
        AppendHeaders([(SET_COOKIE, session_cookie(&token))]),
        Json(ApiResponse::new(SessionInfo {
            employee,
            roles: roles.into_iter().collect(),
        })),
    ))
}

/// GET /logout
///
/// Destroy the current session, if any, and clear the cookie.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(AppendHeaders<[(axum::http::HeaderName, String); 1]>, Json<ApiResponse<()>>), AppError>
{
    if let Some(token) = extract_token(&headers) {
        state.sessions.destroy(&token);
    }
    Ok((
        AppendHeaders([(SET_COOKIE, clear_session_cookie())]),
        Json(ApiResponse::with_message((), "Session closed")),
    ))
}

/// GET /api/sesion
///
/// Return the authenticated employee and their roles.
pub async fn session(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<SessionInfo> {
    let employee = state.repository.fetch_employee(actor.employee_id).await?;
    ok(SessionInfo {
        employee,
        roles: actor.roles.into_iter().collect(),
    })
}

// =============================================================================
// Directory
// =============================================================================

/// GET /api/empleados
pub async fn list_employees(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<Employee>> {
    ok(workflow::list_employees(state.repository.as_ref(), &actor).await?)
}

/// GET /api/especies
pub async fn list_species(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<Species>> {
    ok(workflow::list_species(state.repository.as_ref(), &actor).await?)
}

/// GET /api/medicamentos
pub async fn list_medications(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<Medication>> {
    ok(workflow::list_medications(state.repository.as_ref(), &actor).await?)
}

/// GET /api/cuidadores
pub async fn list_caregivers(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<Employee>> {
    ok(workflow::list_caregivers(state.repository.as_ref(), &actor).await?)
}

// =============================================================================
// Rescues
// =============================================================================

/// POST /api/rescates
pub async fn create_rescue(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<IntakeRequest>,
) -> CreatedResult<RescueWithAnimals> {
    let rescue = workflow::record_rescue(state.repository.as_ref(), &actor, &request).await?;
    created(rescue, "Rescue recorded")
}

/// GET /api/rescates
pub async fn list_rescues(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<RescueWithAnimals>> {
    ok(workflow::list_rescues(state.repository.as_ref(), &actor).await?)
}

/// GET /api/rescates/{id}
pub async fn get_rescue(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> HandlerResult<RescueWithAnimals> {
    ok(workflow::get_rescue(state.repository.as_ref(), &actor, RescueId(id)).await?)
}

/// PUT /api/rescates/{id}
pub async fn update_rescue(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(request): Json<IntakeRequest>,
) -> HandlerResult<RescueWithAnimals> {
    ok(workflow::update_rescue(state.repository.as_ref(), &actor, RescueId(id), &request).await?)
}

/// DELETE /api/rescates/{id}
pub async fn delete_rescue(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> HandlerResult<RescueDeletion> {
    ok(workflow::delete_rescue(state.repository.as_ref(), &actor, RescueId(id)).await?)
}

// =============================================================================
// Veterinarian
// =============================================================================

/// GET /api/veterinario/pendientes
pub async fn pending_animals(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<PendingAnimal>> {
    ok(workflow::pending_animals(state.repository.as_ref(), &actor).await?)
}

/// GET /api/veterinario/en-tratamiento
pub async fn active_treatments(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<ActiveTreatment>> {
    ok(workflow::active_treatments(state.repository.as_ref(), &actor).await?)
}

/// GET /api/veterinario/listos
pub async fn completed_treatments(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<CompletedTreatment>> {
    ok(workflow::completed_treatments(state.repository.as_ref(), &actor).await?)
}

/// POST /api/veterinario/tratamientos
///
/// Evaluate an animal: record the assessment and start its treatment.
pub async fn evaluate_animal(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<workflow::EvaluateRequest>,
) -> CreatedResult<Treatment> {
    let treatment = workflow::evaluate_animal(state.repository.as_ref(), &actor, &request).await?;
    created(treatment, "Treatment started")
}

/// GET /api/veterinario/tratamientos/{id}
pub async fn treatment_detail(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> HandlerResult<Treatment> {
    ok(workflow::treatment_detail(state.repository.as_ref(), &actor, TreatmentId(id)).await?)
}

/// PUT /api/veterinario/tratamientos/{id}
pub async fn reconsult(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(request): Json<workflow::ReconsultRequest>,
) -> HandlerResult<Treatment> {
    ok(workflow::reconsult(state.repository.as_ref(), &actor, TreatmentId(id), &request).await?)
}

/// PUT /api/veterinario/completar/{id}
pub async fn complete_treatment(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> HandlerResult<Treatment> {
    ok(workflow::conclude_treatment(state.repository.as_ref(), &actor, TreatmentId(id)).await?)
}

/// PUT /api/veterinario/asignar-cuidador/{id}
pub async fn assign_caregiver(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    Json(request): Json<AssignCaregiverRequest>,
) -> HandlerResult<Treatment> {
    ok(workflow::assign_caregiver(
        state.repository.as_ref(),
        &actor,
        TreatmentId(id),
        request.caregiver_id,
    )
    .await?)
}

/// GET /api/veterinario/animal-completo/{id}
pub async fn animal_record(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> HandlerResult<AnimalRecord> {
    ok(workflow::animal_record(state.repository.as_ref(), &actor, AnimalId(id)).await?)
}

// =============================================================================
// Caregiver
// =============================================================================

/// GET /api/cuidador/en-cuidado
pub async fn in_care_animals(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<InCareAnimal>> {
    ok(workflow::in_care_animals(state.repository.as_ref(), &actor, false).await?)
}

/// GET /api/cuidador/mis-animales
pub async fn my_in_care_animals(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<InCareAnimal>> {
    ok(workflow::in_care_animals(state.repository.as_ref(), &actor, true).await?)
}

/// POST /api/cuidador/observaciones
pub async fn create_observation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<ObserveRequest>,
) -> CreatedResult<CaregiverObservation> {
    let observation = workflow::observe(state.repository.as_ref(), &actor, &request).await?;
    created(observation, "Observation recorded")
}

/// GET /api/cuidador/observaciones/{tratamiento_id}
pub async fn list_observations(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(treatment_id): Path<i64>,
) -> HandlerResult<Vec<ObservationEntry>> {
    ok(
        workflow::observations(state.repository.as_ref(), &actor, TreatmentId(treatment_id))
            .await?,
    )
}

// =============================================================================
// Releases
// =============================================================================

/// GET /api/liberaciones/listos
pub async fn release_candidates(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<ReleaseCandidate>> {
    ok(workflow::release_candidates(state.repository.as_ref(), &actor).await?)
}

/// POST /api/liberaciones
pub async fn create_release(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<ReleaseRequest>,
) -> CreatedResult<Release> {
    let release = workflow::release_animal(state.repository.as_ref(), &actor, &request).await?;
    created(release, "Animal released")
}

/// GET /api/liberaciones
pub async fn list_releases(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> HandlerResult<Vec<ReleasedAnimal>> {
    ok(workflow::releases(state.repository.as_ref(), &actor).await?)
}

/// POST /api/liberaciones/seguimientos
pub async fn create_follow_up(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<CreateFollowUpRequest>,
) -> CreatedResult<ReleaseFollowUp> {
    let follow_up = workflow::record_follow_up(
        state.repository.as_ref(),
        &actor,
        request.release_id,
        &request.follow_up,
    )
    .await?;
    created(follow_up, "Follow-up recorded")
}

/// GET /api/liberaciones/{id}/seguimientos
pub async fn list_follow_ups(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> HandlerResult<Vec<FollowUpEntry>> {
    ok(workflow::follow_ups(state.repository.as_ref(), &actor, ReleaseId(id)).await?)
}
