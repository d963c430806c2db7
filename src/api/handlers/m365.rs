//! Staff delegated authorization endpoints (Microsoft 365).

use axum::{
    Json,
    extract::{Extension, Query, rejection::QueryRejection},
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::types::{AuthorizeQuery, CallbackQuery, ConnectionStatusResponse, MemberQuery};
use super::{AppState, parse_member_id};
use crate::error::{AuthError, ErrorBody};
use crate::oauth::{CallbackParams, ConnectionStatus};

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AuthError> {
    query
        .map(|Query(query)| query)
        .map_err(|_| AuthError::Validation("invalid query string"))
}

impl From<ConnectionStatus> for ConnectionStatusResponse {
    fn from(status: ConnectionStatus) -> Self {
        Self {
            connected: status.connected,
            email: status.email,
            display_name: status.display_name,
            token_expires: status.expires_at,
        }
    }
}

/// Redirect the staff member's browser to the Microsoft sign-in page.
#[utoipa::path(
    get,
    path = "/auth/m365/authorize",
    params(AuthorizeQuery),
    responses(
        (status = 302, description = "Redirect to the identity provider"),
        (status = 400, description = "Missing member id or invalid redirect", body = ErrorBody),
        (status = 404, description = "Unknown staff member", body = ErrorBody),
        (status = 503, description = "Provider client id not configured", body = ErrorBody)
    ),
    tag = "m365"
)]
pub async fn authorize(
    state: Extension<Arc<AppState>>,
    params: Result<Query<AuthorizeQuery>, QueryRejection>,
) -> Result<Response, AuthError> {
    let params = query(params)?;
    let member_id = parse_member_id(params.member_id.as_deref())?;
    let url = state
        .delegated
        .initiate_authorization(member_id, params.redirect.as_deref())
        .await?;
    Ok(found(url.as_str()))
}

/// Provider redirect target; completes the code exchange.
#[utoipa::path(
    get,
    path = "/auth/m365/callback",
    params(CallbackQuery),
    responses(
        (status = 302, description = "Connected; redirect to the stored destination"),
        (status = 401, description = "Unknown, expired or replayed state", body = ErrorBody),
        (status = 502, description = "Provider rejected or failed the exchange", body = ErrorBody)
    ),
    tag = "m365"
)]
pub async fn callback(
    state: Extension<Arc<AppState>>,
    params: Result<Query<CallbackQuery>, QueryRejection>,
) -> Result<Response, AuthError> {
    let params = query(params)?;
    let redirect = state
        .delegated
        .complete_authorization(CallbackParams {
            code: params.code,
            state: params.state,
            error: params.error,
            error_description: params.error_description,
        })
        .await?;
    Ok(found(&redirect))
}

/// Mailbox connection metadata for a staff member.
#[utoipa::path(
    get,
    path = "/auth/m365/status",
    params(MemberQuery),
    responses(
        (status = 200, description = "Connection status", body = ConnectionStatusResponse),
        (status = 400, description = "Missing member id", body = ErrorBody)
    ),
    tag = "m365"
)]
pub async fn status(
    state: Extension<Arc<AppState>>,
    params: Result<Query<MemberQuery>, QueryRejection>,
) -> Result<Json<ConnectionStatusResponse>, AuthError> {
    let params = query(params)?;
    let member_id = parse_member_id(params.member_id.as_deref())?;
    let status = state.delegated.connection_status(member_id).await?;
    Ok(Json(status.into()))
}
