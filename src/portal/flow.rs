//! Code request and verification.
//!
//! Flow Overview:
//! 1) `request_code` resolves exactly one case from reference + last name, replaces
//!    any pending session for it, and hands the code to the notifier.
//! 2) `verify_code` consumes the code in one conditional update and returns a fresh
//!    bearer token. Every mismatch is the same `Unauthorized`.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::codes::{generate_code, generate_session_token, hash_session_token};
use super::config::PortalConfig;
use super::rate_limit::{RateLimitDecision, VerifyRateLimiter};
use crate::error::AuthError;
use crate::notify::{Notifier, PortalCodeNotice};
use crate::store::SharedStore;

/// Generic acknowledgment of a code request; never carries the code.
#[derive(Clone, Debug)]
pub struct CodeRequested {
    pub reference: String,
}

/// Result of a successful verification. `token` is only ever returned here.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub case_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PortalAuth {
    store: SharedStore,
    notifier: Arc<dyn Notifier>,
    limiter: Arc<dyn VerifyRateLimiter>,
    config: PortalConfig,
}

impl PortalAuth {
    #[must_use]
    pub fn new(
        store: SharedStore,
        notifier: Arc<dyn Notifier>,
        limiter: Arc<dyn VerifyRateLimiter>,
        config: PortalConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            limiter,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Issue a six-digit code for the single case matching `reference` and `last_name`.
    ///
    /// # Errors
    /// `Validation` for blank input, `NotFound` without a match, `Ambiguous` when more
    /// than one case matches, `Datastore` on storage failure.
    pub async fn request_code(
        &self,
        reference: &str,
        last_name: &str,
    ) -> Result<CodeRequested, AuthError> {
        let reference = reference.trim();
        let last_name = last_name.trim();
        if reference.is_empty() {
            return Err(AuthError::Validation("case reference is required"));
        }
        if last_name.is_empty() {
            return Err(AuthError::Validation("last name is required"));
        }

        let mut cases = self
            .store
            .find_cases(reference, last_name)
            .await
            .map_err(AuthError::datastore)?;
        let case = match cases.len() {
            0 => return Err(AuthError::NotFound("case")),
            1 => cases.remove(0),
            matches => {
                warn!(matches, "portal code request matched more than one case");
                return Err(AuthError::Ambiguous);
            }
        };

        let code = generate_code().map_err(AuthError::datastore)?;
        self.store
            .replace_pending_session(&case, &code, self.config.code_ttl())
            .await
            .map_err(AuthError::datastore)?;

        let notice = PortalCodeNotice {
            case_reference: case.reference.clone(),
            client_name: case.client_name.clone(),
            email: case.client_email.clone(),
            phone: case.client_phone.clone(),
            code: SecretString::from(code),
            expires_in_minutes: self.config.code_ttl().as_secs() / 60,
        };
        if !notice.has_destination() {
            warn!(case_id = %case.id, "case has no email or phone for portal code delivery");
        }
        if let Err(err) = self.notifier.send_portal_code(&notice).await {
            error!(case_id = %case.id, "failed to deliver portal code: {err:#}");
        }

        info!(case_id = %case.id, "portal code issued");
        Ok(CodeRequested {
            reference: case.reference,
        })
    }

    /// Consume a code and issue a bearer token.
    ///
    /// # Errors
    /// `Validation` for blank input, `RateLimited` once the attempt limit for the
    /// reference is reached (unresolved attempts count), `Unauthorized` for any
    /// mismatch, `Datastore` on storage failure.
    pub async fn verify_code(
        &self,
        reference: &str,
        code: &str,
        remember_me: bool,
    ) -> Result<IssuedToken, AuthError> {
        let reference = reference.trim();
        let code = code.trim();
        if reference.is_empty() {
            return Err(AuthError::Validation("case reference is required"));
        }
        if code.is_empty() {
            return Err(AuthError::Validation("code is required"));
        }

        let attempt = match self.limiter.acquire(reference).await? {
            RateLimitDecision::Allowed { attempt } => attempt,
            RateLimitDecision::Limited => {
                warn!("portal verification limited for reference");
                return Err(AuthError::RateLimited);
            }
        };

        let token = generate_session_token().map_err(AuthError::datastore)?;
        let verified = self
            .store
            .consume_code(
                reference,
                code,
                &hash_session_token(&token),
                self.config.token_ttl(remember_me),
            )
            .await
            .map_err(AuthError::datastore)?;

        let Some(verified) = verified else {
            info!("portal verification failed");
            return Err(AuthError::Unauthorized);
        };
        // The token is already issued; a stale attempt row only ages out.
        if let Err(err) = self.limiter.release(attempt).await {
            warn!(case_id = %verified.case_id, "failed to release verification attempt: {err}");
        }

        info!(
            case_id = %verified.case_id,
            session_id = %verified.session_id,
            remember_me,
            "portal session authenticated"
        );
        Ok(IssuedToken {
            token,
            case_id: verified.case_id,
            expires_at: verified.token_expires_at,
        })
    }
}
