//! Session-cookie authentication.
//!
//! Sessions are opaque uuid tokens held in an in-memory store and carried
//! by an HttpOnly cookie. Passwords are compared as sha256 hex digests;
//! cleartext never reaches the repository layer.

use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AppError;
use super::state::AppState;
use crate::api::EmployeeId;
use crate::workflow::ActorContext;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "refugio_session";

/// Compute the lowercase hex sha256 digest of a password.
pub fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// One live session. Roles are deliberately not stored here: the gate
/// re-reads them from the repository on every request, so a role change
/// takes effect without re-login.
#[derive(Debug, Clone)]
pub struct Session {
    pub employee_id: EmployeeId,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory session store.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    /// Create a new empty session store.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a session and return its token.
    pub fn create(&self, employee_id: EmployeeId) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            employee_id,
            created_at: chrono::Utc::now(),
        };
        self.sessions.write().insert(token.clone(), session);
        token
    }

    /// Look up a session by token.
    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions.read().get(token).cloned()
    }

    /// Destroy a session. Returns whether it existed.
    pub fn destroy(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the Set-Cookie value for a new session.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax",
        SESSION_COOKIE, token
    )
}

/// Build the Set-Cookie value that clears the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{}=; HttpOnly; Path=/; Max-Age=0", SESSION_COOKIE)
}

/// Pull the session token out of the Cookie header, if present.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Extractor producing the authenticated actor for a request.
///
/// Rejects with 401 when the cookie is missing or the session expired.
/// Roles are fetched from the repository here, not from the session, so
/// the gate always reflects the latest persisted assignment; role checks
/// themselves happen later, in the workflow engine.
pub struct CurrentActor(pub ActorContext);

impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthenticated("Missing session cookie".to_string()))?;
        let session = state
            .sessions
            .get(&token)
            .ok_or_else(|| AppError::Unauthenticated("Session expired".to_string()))?;
        let roles = state
            .repository
            .fetch_employee_roles(session.employee_id)
            .await?;
        Ok(CurrentActor(ActorContext::new(session.employee_id, roles)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Role;
    use crate::db::repositories::LocalRepository;

    #[test]
    fn digest_is_stable_hex() {
        let digest = password_digest("secret");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, password_digest("secret"));
        assert_ne!(digest, password_digest("Secret"));
    }

    #[test]
    fn sessions_round_trip() {
        let store = SessionStore::new();
        let token = store.create(EmployeeId(7));

        let session = store.get(&token).unwrap();
        assert_eq!(session.employee_id, EmployeeId(7));

        assert!(store.destroy(&token));
        assert!(store.get(&token).is_none());
        assert!(!store.destroy(&token));
    }

    fn parts_with_cookie(token: &str) -> Parts {
        axum::http::Request::builder()
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, token))
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[tokio::test]
    async fn actor_roles_are_read_from_the_repository() {
        let repo = LocalRepository::new();
        let vet = repo.add_employee("Ana", "Marquez", "amarquez", "d1", &[Role::Veterinarian]);
        let state = AppState::new(Arc::new(repo));

        let token = state.sessions.create(vet);
        let mut parts = parts_with_cookie(&token);
        let CurrentActor(actor) = CurrentActor::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(actor.roles.contains(&Role::Veterinarian));

        // A session whose employee the repository no longer knows carries
        // no roles, whatever it held at login time.
        let token = state.sessions.create(EmployeeId(999));
        let mut parts = parts_with_cookie(&token);
        let CurrentActor(actor) = CurrentActor::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(actor.roles.is_empty());
    }
}
