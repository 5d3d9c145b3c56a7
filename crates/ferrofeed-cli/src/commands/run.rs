use ferrofeed_core::{FeedConfig, Poller};
use serde_json::json;
use tracing::info;

use crate::error::CliError;

use super::CommandResult;

/// Start the poller in the background and wait for Ctrl-C.
pub async fn run(config: &FeedConfig) -> Result<CommandResult, CliError> {
    let poller = Poller::from_config(config)?;
    info!(
        db_path = %config.db_path.display(),
        etag_path = %config.etag_path.display(),
        max_retries = poller.retry_config().max_retries,
        "starting poller"
    );

    let mut handle = poller.spawn();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupt received, stopping poller");
            handle.abort();
            Ok(CommandResult::ok(json!({ "status": "stopped" })))
        }
        joined = &mut handle => {
            let detail = match joined {
                Ok(()) => String::from("poller exited"),
                Err(error) => format!("poller task failed: {error}"),
            };
            Err(CliError::Command(detail))
        }
    }
}
