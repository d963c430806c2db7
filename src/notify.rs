//! Outbound notification abstraction for portal codes.
//!
//! `RequestCode` never returns the code; it hands a [`PortalCodeNotice`] to a
//! [`Notifier`] which decides how to reach the client (email, SMS, etc.).
//! The default `LogNotifier` records that a notice was produced without the code.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::info;

#[derive(Clone)]
pub struct PortalCodeNotice {
    pub case_reference: String,
    pub client_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub code: SecretString,
    pub expires_in_minutes: u64,
}

impl PortalCodeNotice {
    /// Plain-text body suitable for email or SMS transports.
    #[must_use]
    pub fn body(&self) -> String {
        format!(
            "Your access code for case {} is {}. It expires in {} minutes.",
            self.case_reference,
            self.code.expose_secret(),
            self.expires_in_minutes
        )
    }

    #[must_use]
    pub fn has_destination(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }
}

impl fmt::Debug for PortalCodeNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalCodeNotice")
            .field("case_reference", &self.case_reference)
            .field("client_name", &self.client_name)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("code", &"[redacted]")
            .field("expires_in_minutes", &self.expires_in_minutes)
            .finish()
    }
}

/// Delivery abstraction used by the portal flow.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notice or return an error; the caller logs failures.
    async fn send_portal_code(&self, notice: &PortalCodeNotice) -> Result<()>;
}

/// Local dev notifier that logs the destination instead of delivering.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_portal_code(&self, notice: &PortalCodeNotice) -> Result<()> {
        info!(
            case_reference = %notice.case_reference,
            has_email = notice.email.is_some(),
            has_phone = notice.phone.is_some(),
            expires_in_minutes = notice.expires_in_minutes,
            "portal code notice stub"
        );
        Ok(())
    }
}
