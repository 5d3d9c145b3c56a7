use ferrofeed_core::FeedConfig;
use ferrofeed_warehouse::Warehouse;
use serde_json::json;
use tracing::warn;

use super::CommandResult;

/// `{"status":"ok"}` when the database opens and answers, otherwise
/// `{"status":"nok"}` with the reason.
pub fn run(config: &FeedConfig) -> CommandResult {
    match Warehouse::open(config.warehouse_config()).and_then(|warehouse| warehouse.ping()) {
        Ok(()) => CommandResult::ok(json!({ "status": "ok" })),
        Err(error) => {
            warn!(%error, "health check failed");
            CommandResult::failed(json!({ "status": "nok", "detail": error.to_string() }))
        }
    }
}
