use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] aerofeed_core::ConfigError),

    #[error(transparent)]
    Validation(#[from] aerofeed_core::ValidationError),

    #[error(transparent)]
    Collect(#[from] aerofeed_core::CollectError),

    #[error(transparent)]
    Storage(#[from] aerofeed_storage::StorageError),

    #[error("no stored entry for {0}")]
    NotFound(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Collect(_) | Self::Storage(_) => 1,
            Self::Config(_) | Self::Validation(_) => 2,
            Self::NotFound(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
