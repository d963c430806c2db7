//! Session guard: turns a presented portal token into an authenticated principal.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::codes::hash_session_token;
use crate::error::AuthError;
use crate::store::SharedStore;

pub const PORTAL_TOKEN_HEADER: &str = "x-portal-token";

/// Case identity bound to a valid portal token.
#[derive(Clone, Debug)]
pub struct PortalPrincipal {
    pub case_id: Uuid,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl PortalPrincipal {
    /// Reject access to a record owned by another case.
    pub fn ensure_case(&self, case_id: Uuid) -> Result<(), AuthError> {
        if self.case_id == case_id {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

#[derive(Clone)]
pub struct SessionGuard {
    store: SharedStore,
}

impl SessionGuard {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Resolve a token whose expiry is strictly after the store's current time.
    /// The value is hashed as presented.
    ///
    /// # Errors
    /// `Unauthorized` for unknown and expired tokens alike, `Datastore` on storage failure.
    pub async fn validate_token(&self, token: &str) -> Result<PortalPrincipal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthorized);
        }
        let session = self
            .store
            .find_active_session(&hash_session_token(token))
            .await
            .map_err(AuthError::datastore)?
            .ok_or(AuthError::Unauthorized)?;
        Ok(PortalPrincipal {
            case_id: session.case_id,
            session_id: session.session_id,
            expires_at: session.token_expires_at,
        })
    }

    /// Validate the token carried by a request.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<PortalPrincipal, AuthError> {
        let token = extract_portal_token(headers).ok_or(AuthError::Unauthorized)?;
        self.validate_token(&token).await
    }
}

/// Read the token from `x-portal-token`, falling back to `Authorization: Bearer`.
#[must_use]
pub fn extract_portal_token(headers: &HeaderMap) -> Option<String> {
    let custom = headers
        .get(PORTAL_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(token) = custom {
        return Some(token.to_string());
    }
    extract_bearer_token(headers)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
