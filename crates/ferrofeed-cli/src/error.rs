use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ferrofeed_core::ValidationError),

    #[error(transparent)]
    Core(#[from] ferrofeed_core::CoreError),

    #[error(transparent)]
    Warehouse(#[from] ferrofeed_warehouse::WarehouseError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Command(_) => 2,
            Self::Core(ferrofeed_core::CoreError::Validation(_)) => 2,
            Self::Core(ferrofeed_core::CoreError::Warehouse(_)) => 6,
            Self::Warehouse(_) => 6,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
