//! Data transfer objects for the HTTP API.
//!
//! Domain types from `crate::api` serialize directly; this module only adds
//! the response envelope and the request shapes that have no domain
//! counterpart.

use serde::{Deserialize, Serialize};

use crate::api::{Employee, EmployeeId, ReleaseId, Role};
use crate::workflow::FollowUpRequest;

/// Uniform success envelope for every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: Some(message.into()),
        }
    }
}

/// POST /api/login request body.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Session payload returned by login and the session endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub employee: Employee,
    pub roles: Vec<Role>,
}

/// PUT /api/veterinario/asignar-cuidador/{id} request body.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignCaregiverRequest {
    pub caregiver_id: EmployeeId,
}

/// POST /api/liberaciones/seguimientos request body: the follow-up fields
/// plus the release they belong to.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFollowUpRequest {
    pub release_id: ReleaseId,
    #[serde(flatten)]
    pub follow_up: FollowUpRequest,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_absent_message() {
        let json = serde_json::to_string(&ApiResponse::new(7)).unwrap();
        assert_eq!(json, r#"{"success":true,"data":7}"#);

        let json = serde_json::to_string(&ApiResponse::with_message(7, "stored")).unwrap();
        assert_eq!(json, r#"{"success":true,"data":7,"message":"stored"}"#);
    }
}
