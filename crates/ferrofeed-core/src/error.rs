use thiserror::Error;

/// Validation and contract errors exposed by `ferrofeed-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("epoch seconds {value} are outside the supported range")]
    EpochOutOfRange { value: i64 },

    #[error("event id cannot be empty")]
    EmptyEventId,
    #[error("event type '{value}' is not tracked")]
    UntrackedEventKind { value: String },

    #[error("environment variable {name} must be set")]
    MissingSetting { name: &'static str },
    #[error("environment variable {name} has an invalid value '{value}'")]
    InvalidSetting { name: &'static str, value: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Warehouse(#[from] ferrofeed_warehouse::WarehouseError),
}
