pub mod logging;
pub mod oauth;
pub mod portal;
pub mod sweep;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("caseward")
        .about("Client portal and staff delegated authentication")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("CASEWARD_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .env("CASEWARD_DSN")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used as the CORS origin and for relative redirects")
                .env("CASEWARD_FRONTEND_BASE_URL"),
        );

    let command = portal::with_args(command);
    let command = oauth::with_args(command);
    let command = sweep::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSN: &str = "postgres://caseward@localhost:5432/caseward";

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "caseward");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Client portal and staff delegated authentication".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_check_port_and_dsn() {
        let matches = new().get_matches_from(vec!["caseward", "--port", "9090", "--dsn", DSN]);

        assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9090));
        assert_eq!(
            matches.get_one::<String>(ARG_DSN).cloned(),
            Some(DSN.to_string())
        );
    }

    #[test]
    fn test_dsn_required() {
        temp_env::with_vars([("CASEWARD_DSN", None::<&str>)], || {
            let result = new().try_get_matches_from(vec!["caseward"]);
            assert_eq!(
                result.map(|_| ()).map_err(|e| e.kind()),
                Err(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("CASEWARD_PORT", Some("443")),
                ("CASEWARD_DSN", Some(DSN)),
                ("CASEWARD_FRONTEND_BASE_URL", Some("https://portal.firm.example")),
                ("CASEWARD_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["caseward"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(ARG_DSN).cloned(),
                    Some(DSN.to_string())
                );
                assert_eq!(
                    matches.get_one::<String>(ARG_FRONTEND_BASE_URL).cloned(),
                    Some("https://portal.firm.example".to_string())
                );
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("CASEWARD_LOG_LEVEL", Some(level)),
                    ("CASEWARD_DSN", Some(DSN)),
                ],
                || {
                    let matches = new().get_matches_from(vec!["caseward"]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5_usize {
            temp_env::with_vars([("CASEWARD_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["caseward".to_string(), "--dsn".to_string(), DSN.to_string()];
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        temp_env::with_vars([("CASEWARD_LOG_LEVEL", Some("loud"))], || {
            let result = new().try_get_matches_from(vec!["caseward", "--dsn", DSN]);
            assert!(result.is_err());
        });
    }
}
