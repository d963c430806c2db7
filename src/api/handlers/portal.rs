//! Unauthenticated portal login endpoints.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
};
use std::sync::Arc;

use super::types::{PortalAuthRequest, PortalAuthResponse, PortalVerifyRequest, PortalVerifyResponse};
use super::{AppState, json_payload};
use crate::error::{AuthError, ErrorBody};

/// Send a one-time code to the client of a case.
#[utoipa::path(
    post,
    path = "/portal/auth",
    request_body = PortalAuthRequest,
    responses(
        (status = 200, description = "Code issued and handed to the notifier", body = PortalAuthResponse),
        (status = 400, description = "Missing reference or last name", body = ErrorBody),
        (status = 404, description = "No matching case", body = ErrorBody),
        (status = 409, description = "Reference matches more than one case", body = ErrorBody)
    ),
    tag = "portal"
)]
pub async fn request_code(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<PortalAuthRequest>, JsonRejection>,
) -> Result<Json<PortalAuthResponse>, AuthError> {
    let request = json_payload(payload)?;
    let issued = state
        .portal
        .request_code(&request.reference, &request.last_name)
        .await?;
    Ok(Json(PortalAuthResponse {
        success: true,
        message: "An access code has been sent to the contact details on file".to_string(),
        reference: issued.reference,
    }))
}

/// Exchange a code for a portal bearer token.
#[utoipa::path(
    post,
    path = "/portal/verify",
    request_body = PortalVerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = PortalVerifyResponse),
        (status = 400, description = "Missing reference or code", body = ErrorBody),
        (status = 401, description = "Invalid or expired credentials", body = ErrorBody),
        (status = 429, description = "Too many failed attempts", body = ErrorBody)
    ),
    tag = "portal"
)]
pub async fn verify_code(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<PortalVerifyRequest>, JsonRejection>,
) -> Result<Json<PortalVerifyResponse>, AuthError> {
    let request = json_payload(payload)?;
    let issued = state
        .portal
        .verify_code(&request.reference, &request.code, request.remember_me)
        .await?;
    Ok(Json(PortalVerifyResponse {
        success: true,
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}
