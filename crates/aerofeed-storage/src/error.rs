use thiserror::Error;

/// Backend read/write failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("remote store returned status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("remote store request failed: {0}")]
    Transport(String),

    #[error("write conflict at '{path}': {message}")]
    Conflict { path: String, message: String },

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("stored entry at '{path}' is corrupt: {message}")]
    Corrupt { path: String, message: String },

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Task(error.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => Self::Remote {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None => Self::Transport(error.to_string()),
        }
    }
}
