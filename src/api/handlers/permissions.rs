//! Permission resolution endpoints.

use axum::{
    Json,
    extract::{Extension, Path, Query, rejection::QueryRejection},
};
use std::sync::Arc;

use super::types::{PermissionsQuery, PermissionsResponse, RoleResponse, RolesResponse};
use super::{AppState, parse_member_id};
use crate::error::{AuthError, ErrorBody};
use crate::rbac::{Role, get_permissions};

/// Resolve a staff member's role into permissions.
#[utoipa::path(
    get,
    path = "/auth/permissions",
    params(PermissionsQuery),
    responses(
        (status = 200, description = "Member permissions", body = PermissionsResponse),
        (status = 400, description = "Missing member id", body = ErrorBody),
        (status = 404, description = "Unknown staff member", body = ErrorBody),
        (status = 500, description = "Stored role is not recognized", body = ErrorBody)
    ),
    tag = "rbac"
)]
pub async fn member_permissions(
    state: Extension<Arc<AppState>>,
    params: Result<Query<PermissionsQuery>, QueryRejection>,
) -> Result<Json<PermissionsResponse>, AuthError> {
    let Query(params) = params.map_err(|_| AuthError::Validation("invalid query string"))?;
    let member_id = parse_member_id(params.member_id.as_deref())?;
    let member = state.permissions.get_member_permissions(member_id).await?;
    Ok(Json(PermissionsResponse {
        member_id: member.member_id,
        name: member.name,
        role: member.role,
        permissions: member.permissions.into_iter().collect(),
    }))
}

/// Every role with its permissions.
#[utoipa::path(
    get,
    path = "/auth/roles",
    responses(
        (status = 200, description = "Role catalogue", body = RolesResponse)
    ),
    tag = "rbac"
)]
pub async fn list_roles() -> Json<RolesResponse> {
    let roles = Role::ALL
        .into_iter()
        .map(|role| RoleResponse {
            role,
            permissions: role.permissions().to_vec(),
        })
        .collect();
    Json(RolesResponse { roles })
}

/// Permissions of one role.
#[utoipa::path(
    get,
    path = "/auth/roles/{role}",
    params(
        ("role" = String, Path, description = "Role identifier, e.g. attorney")
    ),
    responses(
        (status = 200, description = "Role permissions", body = RoleResponse),
        (status = 404, description = "Unknown role", body = ErrorBody)
    ),
    tag = "rbac"
)]
pub async fn role_permissions(Path(role): Path<String>) -> Result<Json<RoleResponse>, AuthError> {
    let permissions = get_permissions(&role).map_err(|err| match err {
        AuthError::UnknownRole(_) => AuthError::NotFound("role"),
        other => other,
    })?;
    let role: Role = role.parse()?;
    Ok(Json(RoleResponse {
        role,
        permissions: permissions.into_iter().collect(),
    }))
}
