mod health;
mod metrics;
mod run;

use ferrofeed_core::FeedConfig;
use serde_json::Value;

use crate::cli::{Cli, Command, MetricsCommand};
use crate::error::CliError;

/// JSON payload of a finished command. `failed` maps to exit code 3.
pub struct CommandResult {
    pub data: Value,
    pub failed: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failed: false,
        }
    }

    pub fn failed(data: Value) -> Self {
        Self { data, failed: true }
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let config = FeedConfig::from_env()?;

    match &cli.command {
        Command::Run => run::run(&config).await,
        Command::Metrics(args) => match &args.command {
            MetricsCommand::Counts(counts) => metrics::counts(&config, counts.offset_minutes),
            MetricsCommand::PullIntervals => metrics::pull_intervals(&config),
        },
        Command::Health => Ok(health::run(&config)),
    }
}
