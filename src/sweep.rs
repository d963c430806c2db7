//! Out-of-band expiry sweep.
//!
//! Request handling never deletes expired rows. A background task periodically
//! removes pending sessions whose code expired, authenticated sessions past the
//! retention window, stale OAuth states and old verification failures.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::store::{SharedStore, SweepPolicy, SweepReport};

const DEFAULT_INTERVAL_SECONDS: u64 = 5 * 60;
const DEFAULT_RETENTION_SECONDS: u64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug)]
pub struct SweepConfig {
    interval: Duration,
    session_retention: Duration,
    oauth_state_ttl: Duration,
    attempt_window: Duration,
}

impl SweepConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECONDS),
            session_retention: Duration::from_secs(DEFAULT_RETENTION_SECONDS),
            oauth_state_ttl: Duration::from_secs(600),
            attempt_window: Duration::from_secs(900),
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_retention_seconds(mut self, seconds: u64) -> Self {
        self.session_retention = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_oauth_state_ttl(mut self, ttl: Duration) -> Self {
        self.oauth_state_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_attempt_window(mut self, window: Duration) -> Self {
        self.attempt_window = window;
        self
    }

    /// Zero interval becomes one second.
    #[must_use]
    pub fn interval(&self) -> Duration {
        if self.interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.interval
        }
    }

    #[must_use]
    pub fn policy(&self) -> SweepPolicy {
        SweepPolicy {
            session_retention: self.session_retention,
            oauth_state_ttl: self.oauth_state_ttl,
            attempt_window: self.attempt_window,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one sweep pass.
pub async fn sweep_once(store: &SharedStore, config: &SweepConfig) -> anyhow::Result<SweepReport> {
    let report = store.sweep_expired(&config.policy()).await?;
    if report.total() > 0 {
        info!(
            pending_sessions = report.pending_sessions,
            expired_sessions = report.expired_sessions,
            oauth_states = report.oauth_states,
            verify_attempts = report.verify_attempts,
            "expired credentials swept"
        );
    } else {
        debug!("expiry sweep found nothing to remove");
    }
    Ok(report)
}

/// Spawn a background task that sweeps on a fixed cadence.
pub fn spawn_sweeper(store: SharedStore, config: SweepConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = config.interval();
        loop {
            sleep(interval).await;
            if let Err(err) = sweep_once(&store, &config).await {
                error!("expiry sweep failed: {err:#}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialStore, MemoryStore};
    use anyhow::Result;
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn zero_interval_is_clamped() {
        let config = SweepConfig::new().with_interval_seconds(0);
        assert_eq!(config.interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn sweep_once_removes_expired_pending_sessions() -> Result<()> {
        let memory = Arc::new(MemoryStore::new());
        memory.freeze_at(Utc::now()).await;
        let case = memory.add_case("DL-3", "Kim Park").await;
        memory
            .replace_pending_session(&case, "123456", Duration::from_secs(60))
            .await?;
        memory.advance(Duration::from_secs(61)).await;

        let store: SharedStore = memory.clone();
        let report = sweep_once(&store, &SweepConfig::default()).await?;
        assert_eq!(report.pending_sessions, 1);
        assert!(memory.sessions_for_case(case.id).await.is_empty());

        let report = sweep_once(&store, &SweepConfig::default()).await?;
        assert_eq!(report.total(), 0);
        Ok(())
    }
}
