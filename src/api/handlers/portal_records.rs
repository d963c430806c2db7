//! Portal endpoints behind the session guard.
//!
//! Every handler resolves the token first and scopes all reads and writes to the
//! principal's case.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use super::types::{
    DocRequestResponse, DocRequestsResponse, MessageResponse, MessagesResponse, NewMessageRequest,
    SubmitDocRequest, TasksResponse,
};
use super::{AppState, json_payload};
use crate::error::{AuthError, ErrorBody};

const MAX_MESSAGE_LEN: usize = 10_000;
const MAX_NOTE_LEN: usize = 2_000;

/// List the case's messages and mark staff messages read.
///
/// `unread_from_staff` counts the staff messages this call marked read.
#[utoipa::path(
    get,
    path = "/portal/messages",
    params(
        ("x-portal-token" = String, Header, description = "Portal bearer token")
    ),
    responses(
        (status = 200, description = "Messages for the case", body = MessagesResponse),
        (status = 401, description = "Invalid or expired credentials", body = ErrorBody)
    ),
    tag = "portal"
)]
pub async fn list_messages(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<MessagesResponse>, AuthError> {
    let principal = state.guard.authenticate(&headers).await?;
    let listing = state
        .store
        .list_messages_marking_read(principal.case_id)
        .await
        .map_err(AuthError::datastore)?;
    Ok(Json(MessagesResponse {
        success: true,
        messages: listing.messages,
        unread_from_staff: listing.newly_read,
    }))
}

/// Post a message from the client to the case team.
#[utoipa::path(
    post,
    path = "/portal/messages",
    request_body = NewMessageRequest,
    params(
        ("x-portal-token" = String, Header, description = "Portal bearer token")
    ),
    responses(
        (status = 201, description = "Message stored", body = MessageResponse),
        (status = 400, description = "Empty or oversized message", body = ErrorBody),
        (status = 401, description = "Invalid or expired credentials", body = ErrorBody)
    ),
    tag = "portal"
)]
pub async fn post_message(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Result<Json<NewMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AuthError> {
    let principal = state.guard.authenticate(&headers).await?;
    let request = json_payload(payload)?;
    let body = request.body.trim();
    if body.is_empty() {
        return Err(AuthError::Validation("message body is required"));
    }
    if body.len() > MAX_MESSAGE_LEN {
        return Err(AuthError::Validation("message body is too long"));
    }

    let message = state
        .store
        .insert_client_message(principal.case_id, body)
        .await
        .map_err(AuthError::datastore)?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            success: true,
            message,
        }),
    ))
}

/// Client-visible tasks of the case.
#[utoipa::path(
    get,
    path = "/portal/tasks",
    params(
        ("x-portal-token" = String, Header, description = "Portal bearer token")
    ),
    responses(
        (status = 200, description = "Tasks for the case", body = TasksResponse),
        (status = 401, description = "Invalid or expired credentials", body = ErrorBody)
    ),
    tag = "portal"
)]
pub async fn list_tasks(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<TasksResponse>, AuthError> {
    let principal = state.guard.authenticate(&headers).await?;
    let tasks = state
        .store
        .list_client_tasks(principal.case_id)
        .await
        .map_err(AuthError::datastore)?;
    Ok(Json(TasksResponse {
        success: true,
        tasks,
    }))
}

/// Document requests open for the case.
#[utoipa::path(
    get,
    path = "/portal/doc-requests",
    params(
        ("x-portal-token" = String, Header, description = "Portal bearer token")
    ),
    responses(
        (status = 200, description = "Document requests for the case", body = DocRequestsResponse),
        (status = 401, description = "Invalid or expired credentials", body = ErrorBody)
    ),
    tag = "portal"
)]
pub async fn list_doc_requests(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<DocRequestsResponse>, AuthError> {
    let principal = state.guard.authenticate(&headers).await?;
    let requests = state
        .store
        .list_document_requests(principal.case_id)
        .await
        .map_err(AuthError::datastore)?;
    Ok(Json(DocRequestsResponse {
        success: true,
        requests,
    }))
}

/// Mark a document request of the case as submitted.
#[utoipa::path(
    post,
    path = "/portal/doc-requests",
    request_body = SubmitDocRequest,
    params(
        ("x-portal-token" = String, Header, description = "Portal bearer token")
    ),
    responses(
        (status = 200, description = "Request marked submitted", body = DocRequestResponse),
        (status = 400, description = "Malformed body", body = ErrorBody),
        (status = 401, description = "Invalid or expired credentials", body = ErrorBody),
        (status = 403, description = "Request belongs to another case", body = ErrorBody),
        (status = 404, description = "Unknown request", body = ErrorBody)
    ),
    tag = "portal"
)]
pub async fn submit_doc_request(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Result<Json<SubmitDocRequest>, JsonRejection>,
) -> Result<Json<DocRequestResponse>, AuthError> {
    let principal = state.guard.authenticate(&headers).await?;
    let request = json_payload(payload)?;
    let note = request
        .note
        .as_deref()
        .map(str::trim)
        .filter(|note| !note.is_empty());
    if note.is_some_and(|note| note.len() > MAX_NOTE_LEN) {
        return Err(AuthError::Validation("note is too long"));
    }

    let existing = state
        .store
        .get_document_request(request.request_id)
        .await
        .map_err(AuthError::datastore)?
        .ok_or(AuthError::NotFound("document request"))?;
    principal.ensure_case(existing.case_id)?;

    let updated = state
        .store
        .submit_document_request(request.request_id, principal.case_id, note)
        .await
        .map_err(AuthError::datastore)?
        .ok_or(AuthError::NotFound("document request"))?;
    Ok(Json(DocRequestResponse {
        success: true,
        request: updated,
    }))
}
