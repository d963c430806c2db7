use crate::portal::PortalConfig;
use clap::{Arg, ArgMatches, Command};

pub const ARG_PORTAL_CODE_TTL_SECONDS: &str = "portal-code-ttl-seconds";
pub const ARG_PORTAL_SESSION_TTL_SECONDS: &str = "portal-session-ttl-seconds";
pub const ARG_PORTAL_REMEMBER_TTL_SECONDS: &str = "portal-remember-ttl-seconds";
pub const ARG_PORTAL_VERIFY_MAX_FAILURES: &str = "portal-verify-max-failures";
pub const ARG_PORTAL_VERIFY_WINDOW_SECONDS: &str = "portal-verify-window-seconds";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub code_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
    pub remember_ttl_seconds: u64,
    pub verify_max_failures: u32,
    pub verify_window_seconds: u64,
}

impl Options {
    /// Parse portal arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a lifetime is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_seconds = |id: &str| -> anyhow::Result<u64> {
            match matches.get_one::<u64>(id).copied() {
                Some(0) => anyhow::bail!("--{id} must be greater than zero"),
                Some(value) => Ok(value),
                None => anyhow::bail!("missing required argument: --{id}"),
            }
        };

        Ok(Self {
            code_ttl_seconds: read_seconds(ARG_PORTAL_CODE_TTL_SECONDS)?,
            session_ttl_seconds: read_seconds(ARG_PORTAL_SESSION_TTL_SECONDS)?,
            remember_ttl_seconds: read_seconds(ARG_PORTAL_REMEMBER_TTL_SECONDS)?,
            // 0 disables the limiter
            verify_max_failures: matches
                .get_one::<u32>(ARG_PORTAL_VERIFY_MAX_FAILURES)
                .copied()
                .unwrap_or(0),
            verify_window_seconds: read_seconds(ARG_PORTAL_VERIFY_WINDOW_SECONDS)?,
        })
    }

    #[must_use]
    pub fn config(&self) -> PortalConfig {
        PortalConfig::new()
            .with_code_ttl_seconds(self.code_ttl_seconds)
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_remember_ttl_seconds(self.remember_ttl_seconds)
            .with_verify_max_failures(self.verify_max_failures)
            .with_verify_window_seconds(self.verify_window_seconds)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PORTAL_CODE_TTL_SECONDS)
                .long(ARG_PORTAL_CODE_TTL_SECONDS)
                .help("Lifetime of a portal one-time code in seconds")
                .env("CASEWARD_PORTAL_CODE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PORTAL_SESSION_TTL_SECONDS)
                .long(ARG_PORTAL_SESSION_TTL_SECONDS)
                .help("Lifetime of a portal token in seconds")
                .env("CASEWARD_PORTAL_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PORTAL_REMEMBER_TTL_SECONDS)
                .long(ARG_PORTAL_REMEMBER_TTL_SECONDS)
                .help("Lifetime of a portal token issued with rememberMe, in seconds")
                .env("CASEWARD_PORTAL_REMEMBER_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PORTAL_VERIFY_MAX_FAILURES)
                .long(ARG_PORTAL_VERIFY_MAX_FAILURES)
                .help("Failed code verifications per case reference before lockout (0 disables)")
                .env("CASEWARD_PORTAL_VERIFY_MAX_FAILURES")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_PORTAL_VERIFY_WINDOW_SECONDS)
                .long(ARG_PORTAL_VERIFY_WINDOW_SECONDS)
                .help("Sliding window for counting failed verifications, in seconds")
                .env("CASEWARD_PORTAL_VERIFY_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn command() -> Command {
        with_args(Command::new("caseward"))
    }

    #[test]
    fn defaults_match_portal_lifetimes() -> Result<()> {
        let matches = command().try_get_matches_from(["caseward"])?;
        let options = Options::parse(&matches)?;
        assert_eq!(
            options,
            Options {
                code_ttl_seconds: 600,
                session_ttl_seconds: 86_400,
                remember_ttl_seconds: 2_592_000,
                verify_max_failures: 5,
                verify_window_seconds: 900,
            }
        );
        let config = options.config();
        assert_eq!(config.code_ttl().as_secs(), 600);
        assert_eq!(config.token_ttl(true).as_secs(), 2_592_000);
        Ok(())
    }

    #[test]
    fn env_overrides_defaults() {
        temp_env::with_vars(
            [
                ("CASEWARD_PORTAL_CODE_TTL_SECONDS", Some("120")),
                ("CASEWARD_PORTAL_VERIFY_MAX_FAILURES", Some("0")),
            ],
            || {
                let options = command()
                    .try_get_matches_from(["caseward"])
                    .map_err(anyhow::Error::from)
                    .and_then(|matches| Options::parse(&matches));
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.code_ttl_seconds, 120);
                    assert_eq!(options.verify_max_failures, 0);
                }
            },
        );
    }

    #[test]
    fn zero_lifetime_is_rejected() -> Result<()> {
        let matches =
            command().try_get_matches_from(["caseward", "--portal-session-ttl-seconds", "0"])?;
        let err = Options::parse(&matches).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("--portal-session-ttl-seconds must be greater than zero")
        );
        Ok(())
    }
}
