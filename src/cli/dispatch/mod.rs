//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{self, oauth, portal, sweep};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let frontend_base_url = matches
        .get_one::<String>(commands::ARG_FRONTEND_BASE_URL)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    if let Some(url) = &frontend_base_url {
        url::Url::parse(url).with_context(|| format!("invalid --frontend-base-url '{url}'"))?;
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url,
        portal: portal::Options::parse(matches)?,
        oauth: oauth::Options::parse(matches)?,
        sweep: sweep::Options::parse(matches),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSN: &str = "postgres://caseward@localhost:5432/caseward";

    #[test]
    fn builds_server_action_with_defaults() {
        temp_env::with_vars(
            [
                ("CASEWARD_FRONTEND_BASE_URL", None::<&str>),
                ("CASEWARD_M365_CLIENT_ID", None::<&str>),
                ("CASEWARD_PORT", None::<&str>),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["caseward", "--dsn", DSN]);
                let action = handler(&matches);
                assert!(action.is_ok());
                if let Ok(Action::Server(args)) = action {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.dsn, DSN);
                    assert!(args.frontend_base_url.is_none());
                    assert_eq!(args.portal.code_ttl_seconds, 600);
                    assert!(args.oauth.client_id.is_none());
                    assert_eq!(args.sweep.interval_seconds, 300);
                }
            },
        );
    }

    #[test]
    fn invalid_frontend_base_url_fails() {
        let matches = commands::new().get_matches_from(vec![
            "caseward",
            "--dsn",
            DSN,
            "--frontend-base-url",
            "portal.firm.example",
        ]);
        let result = handler(&matches);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("invalid --frontend-base-url"));
        }
    }
}
