//! Route handlers and the shared state they receive through `Extension`.

pub mod health;
pub mod m365;
pub mod permissions;
pub mod portal;
pub mod portal_records;
pub mod types;

use axum::{Json, extract::rejection::JsonRejection};
use uuid::Uuid;

use crate::error::AuthError;
use crate::oauth::DelegatedAuth;
use crate::portal::{PortalAuth, SessionGuard};
use crate::rbac::PermissionResolver;
use crate::store::SharedStore;

/// Components shared by every handler. Each holds the same store handle.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub portal: PortalAuth,
    pub guard: SessionGuard,
    pub delegated: DelegatedAuth,
    pub permissions: PermissionResolver,
}

impl AppState {
    #[must_use]
    pub fn new(store: SharedStore, portal: PortalAuth, delegated: DelegatedAuth) -> Self {
        Self {
            guard: SessionGuard::new(store.clone()),
            permissions: PermissionResolver::new(store.clone()),
            store,
            portal,
            delegated,
        }
    }
}

/// Unwrap a JSON body, turning any rejection into a validation error.
pub(crate) fn json_payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(payload)| payload)
        .map_err(|_| AuthError::Validation("invalid JSON body"))
}

/// Parse a staff member id passed as a query parameter.
pub(crate) fn parse_member_id(value: Option<&str>) -> Result<Uuid, AuthError> {
    let value = value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::Validation("member id is required"))?;
    Uuid::parse_str(value).map_err(|_| AuthError::Validation("member id must be a UUID"))
}
