use crate::oauth::OAuthConfig;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_M365_CLIENT_ID: &str = "m365-client-id";
pub const ARG_M365_CLIENT_SECRET: &str = "m365-client-secret";
pub const ARG_M365_TENANT: &str = "m365-tenant";
pub const ARG_M365_REDIRECT_URI: &str = "m365-redirect-uri";
pub const ARG_M365_SCOPES: &str = "m365-scopes";
pub const ARG_M365_AUTHORITY_URL: &str = "m365-authority-url";
pub const ARG_M365_GRAPH_URL: &str = "m365-graph-url";
pub const ARG_M365_TIMEOUT_SECONDS: &str = "m365-timeout-seconds";
pub const ARG_OAUTH_STATE_TTL_SECONDS: &str = "oauth-state-ttl-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub tenant: String,
    pub redirect_uri: String,
    pub scopes: String,
    pub authority_url: String,
    pub graph_url: String,
    pub timeout_seconds: u64,
    pub state_ttl_seconds: u64,
}

impl Options {
    /// Parse Microsoft 365 arguments from matches.
    ///
    /// The client id stays optional so the portal can run without staff
    /// delegation; authorize requests then fail with a configuration error.
    ///
    /// # Errors
    /// Returns an error if a URL argument is not absolute.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let read_required = |id: &str| -> anyhow::Result<String> {
            get_non_empty(id).ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let read_url = |id: &str| -> anyhow::Result<String> {
            let value = read_required(id)?;
            url::Url::parse(&value)
                .map_err(|e| anyhow::anyhow!("invalid --{id} '{value}': {e}"))?;
            Ok(value)
        };

        Ok(Self {
            client_id: get_non_empty(ARG_M365_CLIENT_ID),
            client_secret: get_non_empty(ARG_M365_CLIENT_SECRET).map(SecretString::from),
            tenant: read_required(ARG_M365_TENANT)?,
            redirect_uri: read_url(ARG_M365_REDIRECT_URI)?,
            scopes: read_required(ARG_M365_SCOPES)?,
            authority_url: read_url(ARG_M365_AUTHORITY_URL)?,
            graph_url: read_url(ARG_M365_GRAPH_URL)?,
            timeout_seconds: matches
                .get_one::<u64>(ARG_M365_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
            state_ttl_seconds: matches
                .get_one::<u64>(ARG_OAUTH_STATE_TTL_SECONDS)
                .copied()
                .unwrap_or(600),
        })
    }

    #[must_use]
    pub fn config(&self) -> OAuthConfig {
        OAuthConfig::new()
            .with_client_id(self.client_id.clone())
            .with_client_secret(self.client_secret.clone())
            .with_tenant(self.tenant.clone())
            .with_redirect_uri(self.redirect_uri.clone())
            .with_scopes(self.scopes.clone())
            .with_authority_url(self.authority_url.clone())
            .with_graph_url(self.graph_url.clone())
            .with_timeout_seconds(self.timeout_seconds)
            .with_state_ttl_seconds(self.state_ttl_seconds)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command
        .arg(
            Arg::new(ARG_M365_CLIENT_ID)
                .long(ARG_M365_CLIENT_ID)
                .help("Microsoft Entra application (client) id")
                .env("CASEWARD_M365_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_M365_CLIENT_SECRET)
                .long(ARG_M365_CLIENT_SECRET)
                .help("Microsoft Entra client secret (confidential clients only)")
                .env("CASEWARD_M365_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_M365_TENANT)
                .long(ARG_M365_TENANT)
                .help("Tenant id or alias used in the authority path")
                .env("CASEWARD_M365_TENANT")
                .default_value("common"),
        )
        .arg(
            Arg::new(ARG_M365_REDIRECT_URI)
                .long(ARG_M365_REDIRECT_URI)
                .help("Redirect URI registered for the application")
                .env("CASEWARD_M365_REDIRECT_URI")
                .default_value("http://localhost:8080/auth/m365/callback"),
        )
        .arg(
            Arg::new(ARG_M365_SCOPES)
                .long(ARG_M365_SCOPES)
                .help("Space separated delegated scopes")
                .env("CASEWARD_M365_SCOPES")
                .default_value("offline_access User.Read Mail.ReadWrite Mail.Send"),
        );

    command
        .arg(
            Arg::new(ARG_M365_AUTHORITY_URL)
                .long(ARG_M365_AUTHORITY_URL)
                .help("Identity platform authority base URL")
                .env("CASEWARD_M365_AUTHORITY_URL")
                .default_value("https://login.microsoftonline.com"),
        )
        .arg(
            Arg::new(ARG_M365_GRAPH_URL)
                .long(ARG_M365_GRAPH_URL)
                .help("Microsoft Graph base URL used for the profile lookup")
                .env("CASEWARD_M365_GRAPH_URL")
                .default_value("https://graph.microsoft.com/v1.0"),
        )
        .arg(
            Arg::new(ARG_M365_TIMEOUT_SECONDS)
                .long(ARG_M365_TIMEOUT_SECONDS)
                .help("Timeout for identity provider requests, in seconds")
                .env("CASEWARD_M365_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OAUTH_STATE_TTL_SECONDS)
                .long(ARG_OAUTH_STATE_TTL_SECONDS)
                .help("Lifetime of a pending authorization state, in seconds")
                .env("CASEWARD_OAUTH_STATE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::ExposeSecret;

    fn without_m365_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("CASEWARD_M365_CLIENT_ID", None::<&str>),
                ("CASEWARD_M365_CLIENT_SECRET", None::<&str>),
            ],
            f,
        );
    }

    #[test]
    fn client_id_is_optional() {
        without_m365_env(|| {
            let options = with_args(Command::new("caseward"))
                .try_get_matches_from(["caseward"])
                .map_err(anyhow::Error::from)
                .and_then(|matches| Options::parse(&matches));
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert!(options.client_id.is_none());
                assert!(options.config().client_id().is_none());
                assert_eq!(options.tenant, "common");
                assert_eq!(options.state_ttl_seconds, 600);
            }
        });
    }

    #[test]
    fn reads_credentials_from_env() {
        temp_env::with_vars(
            [
                ("CASEWARD_M365_CLIENT_ID", Some("app-123")),
                ("CASEWARD_M365_CLIENT_SECRET", Some("s3cret")),
                ("CASEWARD_M365_TENANT", Some("firm.onmicrosoft.com")),
            ],
            || {
                let options = with_args(Command::new("caseward"))
                    .try_get_matches_from(["caseward"])
                    .map_err(anyhow::Error::from)
                    .and_then(|matches| Options::parse(&matches));
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.client_id.as_deref(), Some("app-123"));
                    assert_eq!(
                        options
                            .client_secret
                            .as_ref()
                            .map(|s| s.expose_secret().to_string()),
                        Some("s3cret".to_string())
                    );
                    assert!(
                        options
                            .config()
                            .token_endpoint()
                            .contains("/firm.onmicrosoft.com/oauth2/v2.0/token")
                    );
                }
            },
        );
    }

    #[test]
    fn blank_client_id_counts_as_missing() {
        temp_env::with_vars([("CASEWARD_M365_CLIENT_ID", Some("  "))], || {
            let options = with_args(Command::new("caseward"))
                .try_get_matches_from(["caseward"])
                .map_err(anyhow::Error::from)
                .and_then(|matches| Options::parse(&matches));
            assert!(options.is_ok_and(|options| options.client_id.is_none()));
        });
    }

    #[test]
    fn relative_redirect_uri_is_rejected() -> Result<()> {
        let matches = with_args(Command::new("caseward")).try_get_matches_from([
            "caseward",
            "--m365-redirect-uri",
            "/auth/m365/callback",
        ])?;
        assert!(Options::parse(&matches).is_err());
        Ok(())
    }
}
