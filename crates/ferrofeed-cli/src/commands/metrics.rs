use ferrofeed_core::FeedConfig;
use ferrofeed_warehouse::Warehouse;
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct CountsResponseData {
    offset_minutes: u32,
    counts: Vec<ferrofeed_warehouse::EventTypeCount>,
}

#[derive(Debug, Serialize)]
struct PullIntervalsResponseData {
    /// Repository name to mean seconds between pull request events.
    intervals: std::collections::BTreeMap<String, f64>,
}

pub fn counts(config: &FeedConfig, offset_minutes: u32) -> Result<CommandResult, CliError> {
    if offset_minutes == 0 {
        return Err(CliError::Command(String::from(
            "--offset-minutes must be greater than zero",
        )));
    }

    let warehouse = Warehouse::open(config.warehouse_config())?;
    let counts = warehouse.event_counts_in_window(offset_minutes)?;
    let data = serde_json::to_value(CountsResponseData {
        offset_minutes,
        counts,
    })?;
    Ok(CommandResult::ok(data))
}

pub fn pull_intervals(config: &FeedConfig) -> Result<CommandResult, CliError> {
    let warehouse = Warehouse::open(config.warehouse_config())?;
    let intervals = warehouse.avg_pull_request_interval()?;
    let data = serde_json::to_value(PullIntervalsResponseData { intervals })?;
    Ok(CommandResult::ok(data))
}
