//! Request/response types for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::rbac::{Permission, Role};
use crate::store::{ClientTask, DocumentRequest, PortalMessage};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PortalAuthRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    pub last_name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PortalAuthResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PortalVerifyRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    pub code: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PortalVerifyResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct MessagesResponse {
    pub success: bool,
    pub messages: Vec<PortalMessage>,
    /// Staff messages that were unread before this request.
    pub unread_from_staff: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NewMessageRequest {
    pub body: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct MessageResponse {
    pub success: bool,
    pub message: PortalMessage,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct TasksResponse {
    pub success: bool,
    pub tasks: Vec<ClientTask>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct DocRequestsResponse {
    pub success: bool,
    pub requests: Vec<DocumentRequest>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDocRequest {
    pub request_id: Uuid,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct DocRequestResponse {
    pub success: bool,
    pub request: DocumentRequest,
}

#[derive(IntoParams, Deserialize, Debug)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeQuery {
    /// Staff member starting the connection.
    pub member_id: Option<String>,
    /// Post-login destination (relative path or frontend URL).
    pub redirect: Option<String>,
}

#[derive(IntoParams, Deserialize, Debug)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct MemberQuery {
    pub member_id: Option<String>,
}

#[derive(IntoParams, Deserialize, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusResponse {
    pub connected: bool,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub token_expires: Option<DateTime<Utc>>,
}

#[derive(IntoParams, Deserialize, Debug)]
#[into_params(parameter_in = Query)]
pub struct PermissionsQuery {
    pub member_id: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct PermissionsResponse {
    pub member_id: Uuid,
    pub name: String,
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RoleResponse {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RolesResponse {
    pub roles: Vec<RoleResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use serde_json::json;

    #[test]
    fn portal_requests_use_wire_names() -> Result<()> {
        let auth: PortalAuthRequest =
            serde_json::from_value(json!({ "ref": "DL-0042", "lastName": "Smith" }))?;
        assert_eq!(auth.reference, "DL-0042");
        assert_eq!(auth.last_name, "Smith");

        let verify: PortalVerifyRequest =
            serde_json::from_value(json!({ "ref": "DL-0042", "code": "123456" }))?;
        assert!(!verify.remember_me);

        let verify: PortalVerifyRequest = serde_json::from_value(
            json!({ "ref": "DL-0042", "code": "123456", "rememberMe": true }),
        )?;
        assert!(verify.remember_me);
        Ok(())
    }

    #[test]
    fn status_response_uses_camel_case() -> Result<()> {
        let value = serde_json::to_value(ConnectionStatusResponse {
            connected: true,
            email: Some("alex@firm.example".to_string()),
            display_name: Some("Alex".to_string()),
            token_expires: None,
        })?;
        let name = value
            .get("displayName")
            .and_then(serde_json::Value::as_str)
            .context("missing displayName")?;
        assert_eq!(name, "Alex");
        assert!(value.get("tokenExpires").is_some());
        Ok(())
    }

    #[test]
    fn auth_response_serializes_ref() -> Result<()> {
        let value = serde_json::to_value(PortalAuthResponse {
            success: true,
            message: "sent".to_string(),
            reference: "DL-1".to_string(),
        })?;
        assert_eq!(value["ref"], "DL-1");
        Ok(())
    }
}
