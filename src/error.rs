//! Error taxonomy shared by the portal, delegated-auth and RBAC operations.
//!
//! Every operation resolves its failures into an [`AuthError`] at its own
//! boundary. The HTTP mapping lives here too so handlers can return the error
//! directly. Datastore and upstream detail is logged, never echoed.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// Message returned for every credential failure.
pub const UNAUTHORIZED_MESSAGE: &str = "Invalid or expired credentials";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Invalid, expired or consumed credential. Causes are not distinguished.
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("too many attempts")]
    RateLimited,

    #[error("reference matches more than one case")]
    Ambiguous,

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("not configured: {0}")]
    Configuration(&'static str),

    #[error("identity provider error: {0}")]
    Upstream(String),

    #[error("datastore error: {0:#}")]
    Datastore(#[source] anyhow::Error),
}

impl AuthError {
    /// Wrap a storage failure. Callers may retry these with backoff.
    pub fn datastore(err: impl Into<anyhow::Error>) -> Self {
        Self::Datastore(err.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Datastore(_) | Self::Upstream(_))
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Ambiguous => StatusCode::CONFLICT,
            Self::UnknownRole(_) | Self::Datastore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::Ambiguous => "ambiguous",
            Self::UnknownRole(_) => "unknown_role",
            Self::Configuration(_) => "configuration_error",
            Self::Upstream(_) => "upstream_error",
            Self::Datastore(_) => "datastore_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Validation(_) | Self::NotFound(_) => self.to_string(),
            Self::Unauthorized => UNAUTHORIZED_MESSAGE.to_string(),
            Self::Forbidden => "Access to this resource is not allowed".to_string(),
            Self::RateLimited => "Too many attempts, try again later".to_string(),
            Self::Ambiguous => {
                "More than one case matches; contact your case manager".to_string()
            }
            Self::UnknownRole(_) => "Member role is not recognized".to_string(),
            Self::Configuration(_) => "Service is not configured for this operation".to_string(),
            Self::Upstream(_) => "Identity provider request failed".to_string(),
            Self::Datastore(_) => "Internal error".to_string(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            Self::Datastore(err) => error!("Datastore error: {err:#}"),
            Self::Upstream(detail) => error!("Identity provider error: {detail}"),
            Self::UnknownRole(role) => error!("Stored role is not in the permission table: {role}"),
            Self::Configuration(what) => error!("Missing configuration: {what}"),
            _ => {}
        }

        let body = ErrorBody {
            success: false,
            error: self.kind().to_string(),
            message: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
