//! Router configuration for the HTTP API.
//!
//! This module sets up all routes, middleware (CORS, compression, tracing),
//! and creates the axum router ready for serving.

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Create the main application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration - permissive for development, should be restricted in production
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Session
        .route("/sesion", get(handlers::session))
        // Directory
        .route("/empleados", get(handlers::list_employees))
        .route("/especies", get(handlers::list_species))
        .route("/medicamentos", get(handlers::list_medications))
        .route("/cuidadores", get(handlers::list_caregivers))
        // Rescues
        .route("/rescates", post(handlers::create_rescue))
        .route("/rescates", get(handlers::list_rescues))
        .route("/rescates/{id}", get(handlers::get_rescue))
        .route("/rescates/{id}", put(handlers::update_rescue))
        .route("/rescates/{id}", delete(handlers::delete_rescue))
        // Veterinarian
        .route("/veterinario/pendientes", get(handlers::pending_animals))
        .route(
            "/veterinario/en-tratamiento",
            get(handlers::active_treatments),
        )
        .route("/veterinario/listos", get(handlers::completed_treatments))
        .route(
            "/veterinario/tratamientos",
            post(handlers::evaluate_animal),
        )
        .route(
            "/veterinario/tratamientos/{id}",
            get(handlers::treatment_detail),
        )
        .route("/veterinario/tratamientos/{id}", put(handlers::reconsult))
        .route(
            "/veterinario/completar/{id}",
            put(handlers::complete_treatment),
        )
        .route(
            "/veterinario/asignar-cuidador/{id}",
            put(handlers::assign_caregiver),
        )
        .route(
            "/veterinario/animal-completo/{id}",
            get(handlers::animal_record),
        )
        // Caregiver
        .route("/cuidador/en-cuidado", get(handlers::in_care_animals))
        .route("/cuidador/mis-animales", get(handlers::my_in_care_animals))
        .route(
            "/cuidador/observaciones",
            post(handlers::create_observation),
        )
        .route(
            "/cuidador/observaciones/{tratamiento_id}",
            get(handlers::list_observations),
        )
        // Releases
        .route("/liberaciones/listos", get(handlers::release_candidates))
        .route("/liberaciones", post(handlers::create_release))
        .route("/liberaciones", get(handlers::list_releases))
        .route(
            "/liberaciones/seguimientos",
            post(handlers::create_follow_up),
        )
        .route(
            "/liberaciones/{id}/seguimientos",
            get(handlers::list_follow_ups),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/login", post(handlers::login))
        .route("/logout", get(handlers::logout))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::LocalRepository;
    use std::sync::Arc;

    #[test]
    fn router_creation() {
        let repo =
            Arc::new(LocalRepository::new()) as Arc<dyn crate::db::repository::FullRepository>;
        let state = AppState::new(repo);
        let _router = create_router(state);
        // If we got here, router was created successfully
    }
}
