use std::time::Duration;

use aerofeed_storage::StorageBackend;
use thiserror::Error;

use crate::retry::{Classify, RetryClass};
use crate::transport::TransportError;

/// Validation and contract errors exposed by `aerofeed-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("flight record is missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("invalid source '{value}', expected one of sfo, yyz, mia")]
    InvalidSource { value: String },
    #[error("invalid transport strategy '{value}', expected one of standard, curl, browser")]
    InvalidTransport { value: String },

    #[error("{feed} payload has no '{field}' array")]
    MissingRecords { feed: &'static str, field: &'static str },

    #[error("airport code cannot be empty")]
    EmptyAirport,
}

/// Failure of one collection, as carried by a failed
/// [`CollectionResult`](crate::CollectionResult).
///
/// Variants mirror the error taxonomy operators act on: `Challenge` means the
/// transport strategy must change, `Network` and `RateLimited` may clear up on
/// their own, `Validation` means the source changed shape.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollectError {
    #[error("network error: {message}")]
    Network { message: String, status: Option<u16> },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limited with status {status}")]
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("blocked by automated challenge at {url} (marker '{marker}'); switch transport strategy")]
    Challenge { url: String, marker: String },

    #[error("{backend} storage failed for {key}: {message}")]
    Storage {
        key: String,
        backend: StorageBackend,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no collector is configured for airport '{0}'")]
    UnknownAirport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CollectError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Validation(_) => "validation",
            Self::RateLimited { .. } => "rate_limit",
            Self::Challenge { .. } => "challenge",
            Self::Storage { .. } => "storage",
            Self::Config(_) => "config",
            Self::UnknownAirport(_) => "unknown_airport",
            Self::Internal(_) => "internal",
        }
    }

    /// Stable machine-readable code, e.g. `collect.network`.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "collect.network",
            Self::Validation(_) => "collect.validation",
            Self::RateLimited { .. } => "collect.rate_limit",
            Self::Challenge { .. } => "collect.challenge",
            Self::Storage { .. } => "collect.storage",
            Self::Config(_) => "collect.config",
            Self::UnknownAirport(_) => "collect.unknown_airport",
            Self::Internal(_) => "collect.internal",
        }
    }
}

impl From<ValidationError> for CollectError {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<TransportError> for CollectError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Network { message, status } => Self::Network { message, status },
            TransportError::RateLimited {
                status,
                retry_after,
            } => Self::RateLimited {
                status,
                retry_after,
            },
            TransportError::Challenge { url, marker } => Self::Challenge { url, marker },
            TransportError::Tool(message) => Self::Config(message),
            TransportError::Browser(message) => Self::Network {
                message: format!("browser: {message}"),
                status: None,
            },
        }
    }
}

impl Classify for CollectError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Network {
                status: Some(status),
                ..
            } => RetryClass::Status(*status),
            Self::Network { status: None, .. } => RetryClass::Network,
            Self::RateLimited { retry_after, .. } => RetryClass::RateLimited {
                retry_after: *retry_after,
            },
            Self::Challenge { .. } => RetryClass::Blocked,
            Self::Validation(_) => RetryClass::Validation,
            Self::Storage { .. } | Self::Config(_) | Self::UnknownAirport(_) | Self::Internal(_) => {
                RetryClass::Other
            }
        }
    }
}
