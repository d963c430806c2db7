use std::time::Duration;

const DEFAULT_CODE_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_REMEMBER_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_VERIFY_MAX_FAILURES: u32 = 5;
const DEFAULT_VERIFY_WINDOW_SECONDS: u64 = 15 * 60;

#[derive(Clone, Debug)]
pub struct PortalConfig {
    code_ttl: Duration,
    session_ttl: Duration,
    remember_ttl: Duration,
    verify_max_failures: u32,
    verify_window: Duration,
}

impl PortalConfig {
    /// Defaults: 10 minute codes, 24 hour tokens (30 days with remember-me),
    /// and 5 failed verifications per reference per 15 minutes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECONDS),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
            remember_ttl: Duration::from_secs(DEFAULT_REMEMBER_TTL_SECONDS),
            verify_max_failures: DEFAULT_VERIFY_MAX_FAILURES,
            verify_window: Duration::from_secs(DEFAULT_VERIFY_WINDOW_SECONDS),
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.code_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: u64) -> Self {
        self.remember_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_verify_max_failures(mut self, failures: u32) -> Self {
        self.verify_max_failures = failures;
        self
    }

    #[must_use]
    pub fn with_verify_window_seconds(mut self, seconds: u64) -> Self {
        self.verify_window = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    /// Token lifetime for a verification with or without remember-me.
    #[must_use]
    pub fn token_ttl(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_ttl
        } else {
            self.session_ttl
        }
    }

    #[must_use]
    pub fn verify_max_failures(&self) -> u32 {
        self.verify_max_failures
    }

    #[must_use]
    pub fn verify_window(&self) -> Duration {
        self.verify_window
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self::new()
    }
}
