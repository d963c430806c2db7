//! Verification-attempt limiting for the portal login.
//!
//! An attempt is reserved in the store before the code is checked, so every
//! instance sees the same window and in-flight attempts already count.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::AuthError;
use crate::store::SharedStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// `attempt` is handed back to `release` when the code matches.
    Allowed { attempt: Option<i64> },
    Limited,
}

#[async_trait]
pub trait VerifyRateLimiter: Send + Sync {
    async fn acquire(&self, reference: &str) -> Result<RateLimitDecision, AuthError>;
    async fn release(&self, attempt: Option<i64>) -> Result<(), AuthError>;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl VerifyRateLimiter for NoopRateLimiter {
    async fn acquire(&self, _reference: &str) -> Result<RateLimitDecision, AuthError> {
        Ok(RateLimitDecision::Allowed { attempt: None })
    }

    async fn release(&self, _attempt: Option<i64>) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Sliding-window attempt counter per case reference.
#[derive(Clone)]
pub struct StoreRateLimiter {
    store: SharedStore,
    max_failures: u32,
    window: Duration,
}

impl StoreRateLimiter {
    #[must_use]
    pub fn new(store: SharedStore, max_failures: u32, window: Duration) -> Self {
        Self {
            store,
            max_failures,
            window,
        }
    }
}

#[async_trait]
impl VerifyRateLimiter for StoreRateLimiter {
    async fn acquire(&self, reference: &str) -> Result<RateLimitDecision, AuthError> {
        if self.max_failures == 0 {
            return Ok(RateLimitDecision::Allowed { attempt: None });
        }
        let attempt = self
            .store
            .reserve_verify_attempt(reference, self.window)
            .await
            .map_err(AuthError::datastore)?;
        if attempt.attempts_in_window > i64::from(self.max_failures) {
            Ok(RateLimitDecision::Limited)
        } else {
            Ok(RateLimitDecision::Allowed {
                attempt: Some(attempt.id),
            })
        }
    }

    async fn release(&self, attempt: Option<i64>) -> Result<(), AuthError> {
        let Some(attempt) = attempt else {
            return Ok(());
        };
        self.store
            .release_verify_attempt(attempt)
            .await
            .map_err(AuthError::datastore)
    }
}
