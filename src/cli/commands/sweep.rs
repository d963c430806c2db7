use crate::sweep::SweepConfig;
use clap::{Arg, ArgMatches, Command};

pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";
pub const ARG_SWEEP_RETENTION_SECONDS: &str = "sweep-retention-seconds";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub interval_seconds: u64,
    pub retention_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            interval_seconds: matches
                .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(300),
            retention_seconds: matches
                .get_one::<u64>(ARG_SWEEP_RETENTION_SECONDS)
                .copied()
                .unwrap_or(86_400),
        }
    }

    #[must_use]
    pub fn config(&self) -> SweepConfig {
        SweepConfig::new()
            .with_interval_seconds(self.interval_seconds)
            .with_retention_seconds(self.retention_seconds)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Seconds between expired-credential sweeps")
                .env("CASEWARD_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_RETENTION_SECONDS)
                .long(ARG_SWEEP_RETENTION_SECONDS)
                .help("How long expired portal sessions are kept before deletion, in seconds")
                .env("CASEWARD_SWEEP_RETENTION_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
}
