//! CLI argument definitions for ferrofeed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Poll the event feed until Ctrl-C |
//! | `metrics counts` | Events per type in a recent window |
//! | `metrics pull-intervals` | Mean pull request interval per repository |
//! | `health` | Check that the database answers |
//!
//! # Examples
//!
//! ```bash
//! FERROFEED_GITHUB_TOKEN=ghp_... ferrofeed run
//! ferrofeed metrics counts --offset-minutes 30 --pretty
//! ferrofeed health
//! ```

use clap::{Args, Parser, Subcommand};

/// Rate-limit-aware GitHub event feed poller.
///
/// Configuration is read from `FERROFEED_*` environment variables.
#[derive(Debug, Parser)]
#[command(name = "ferrofeed", author, version, about)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll the feed and store events until interrupted.
    Run,
    /// Query metrics over stored events.
    Metrics(MetricsArgs),
    /// Report whether the event database is reachable.
    Health,
}

#[derive(Debug, Args)]
pub struct MetricsArgs {
    #[command(subcommand)]
    pub command: MetricsCommand,
}

#[derive(Debug, Subcommand)]
pub enum MetricsCommand {
    /// Count events per type created within the last N minutes.
    Counts(CountsArgs),
    /// Mean seconds between consecutive pull request events per repository.
    PullIntervals,
}

#[derive(Debug, Args)]
pub struct CountsArgs {
    #[arg(long)]
    pub offset_minutes: u32,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parses_metrics_counts_with_global_flag() {
        let cli = Cli::try_parse_from([
            "ferrofeed",
            "metrics",
            "counts",
            "--offset-minutes",
            "30",
            "--pretty",
        ])
        .expect("parse");

        assert!(cli.pretty);
        let Command::Metrics(MetricsArgs {
            command: MetricsCommand::Counts(args),
        }) = cli.command
        else {
            panic!("expected metrics counts");
        };
        assert_eq!(args.offset_minutes, 30);
    }

    #[test]
    fn offset_is_required() {
        assert!(Cli::try_parse_from(["ferrofeed", "metrics", "counts"]).is_err());
    }

    #[test]
    fn rejects_negative_offset() {
        assert!(
            Cli::try_parse_from(["ferrofeed", "metrics", "counts", "--offset-minutes", "-5"])
                .is_err()
        );
    }
}
