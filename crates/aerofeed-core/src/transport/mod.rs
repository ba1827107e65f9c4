//! Strategy-selectable fetch layer.
//!
//! | Strategy | Type | Used for |
//! |----------|------|----------|
//! | `standard` | [`ReqwestTransport`] | feeds without automated-access defenses |
//! | `curl` | [`CurlTransport`] | feeds that fingerprint TLS or HTTP/2 clients |
//! | `browser` | [`BrowserTransport`] | feeds behind a JavaScript challenge page |
//!
//! A fresh transport is opened per collection run through a
//! [`TransportFactory`] and closed when the run ends.

pub mod browser;
pub mod challenge;
pub mod curl;
pub mod http;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::retry::{Classify, RetryClass};
use crate::ValidationError;

pub use browser::BrowserTransport;
pub use curl::CurlTransport;
pub use http::ReqwestTransport;

/// Request headers; names are sent as given.
pub type Headers = BTreeMap<String, String>;

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Response body, decoded as JSON when possible.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBody {
    Json(Value),
    Text(String),
}

impl RawBody {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {message}")]
    Network { message: String, status: Option<u16> },

    #[error("rate limited with status {status}")]
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("automated challenge at {url} (marker '{marker}')")]
    Challenge { url: String, marker: String },

    /// The external client tool is missing or misbehaved.
    #[error("client tool error: {0}")]
    Tool(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status: None,
        }
    }

    /// Classifies a non-2xx response. Challenge pages served with an error
    /// status are reported as challenges, everything else by status.
    pub fn from_response(
        url: &str,
        status: u16,
        retry_after: Option<Duration>,
        body: &str,
    ) -> Self {
        match challenge::detect(body) {
            Some(marker) => Self::Challenge {
                url: url.to_owned(),
                marker: marker.to_owned(),
            },
            None => Self::from_status(status, retry_after),
        }
    }

    /// Maps a non-2xx status onto the error the retry policy expects.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        if status == 429 {
            Self::RateLimited {
                status,
                retry_after,
            }
        } else {
            Self::Network {
                message: format!("upstream returned status {status}"),
                status: Some(status),
            }
        }
    }
}

impl Classify for TransportError {
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
            Self::Browser(_) => RetryClass::Network,
            Self::Tool(_) => RetryClass::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStrategy {
    Standard,
    #[serde(rename = "curl", alias = "command_line")]
    CommandLine,
    Browser,
}

impl TransportStrategy {
    pub const ALL: [Self; 3] = [Self::Standard, Self::CommandLine, Self::Browser];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::CommandLine => "curl",
            Self::Browser => "browser",
        }
    }
}

impl Display for TransportStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportStrategy {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" | "http" | "reqwest" => Ok(Self::Standard),
            "curl" | "command_line" | "cli" => Ok(Self::CommandLine),
            "browser" | "chromium" => Ok(Self::Browser),
            other => Err(ValidationError::InvalidTransport {
                value: other.to_owned(),
            }),
        }
    }
}

/// Knobs shared by every transport implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
    pub curl_bin: String,
    /// Chromium executable; auto-detected when `None`.
    pub chrome_bin: Option<String>,
    pub challenge_timeout: Duration,
    pub challenge_poll: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_redirects: 5,
            user_agent: String::from(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            ),
            curl_bin: String::from("curl"),
            chrome_bin: None,
            challenge_timeout: Duration::from_secs(30),
            challenge_poll: Duration::from_millis(500),
        }
    }
}

/// Fetch contract implemented by every strategy.
pub trait Transport: Send + Sync {
    fn strategy(&self) -> TransportStrategy;

    fn get<'a>(&'a self, url: &'a str, headers: &'a Headers) -> TransportFuture<'a, RawBody>;

    fn post<'a>(
        &'a self,
        url: &'a str,
        body: &'a str,
        headers: &'a Headers,
    ) -> TransportFuture<'a, RawBody>;

    /// Releases held resources. Stateless transports keep the default.
    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

impl Transport for Arc<dyn Transport> {
    fn strategy(&self) -> TransportStrategy {
        self.as_ref().strategy()
    }

    fn get<'a>(&'a self, url: &'a str, headers: &'a Headers) -> TransportFuture<'a, RawBody> {
        self.as_ref().get(url, headers)
    }

    fn post<'a>(
        &'a self,
        url: &'a str,
        body: &'a str,
        headers: &'a Headers,
    ) -> TransportFuture<'a, RawBody> {
        self.as_ref().post(url, body, headers)
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        self.as_ref().close()
    }
}

/// Opens one transport per collection run.
pub trait TransportFactory: Send + Sync {
    fn open(&self, strategy: TransportStrategy) -> TransportFuture<'_, Box<dyn Transport>>;
}

/// Builds real transports from [`TransportSettings`].
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory {
    settings: TransportSettings,
}

impl DefaultTransportFactory {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn open(&self, strategy: TransportStrategy) -> TransportFuture<'_, Box<dyn Transport>> {
        Box::pin(async move {
            let transport: Box<dyn Transport> = match strategy {
                TransportStrategy::Standard => {
                    Box::new(ReqwestTransport::new(&self.settings)?)
                }
                TransportStrategy::CommandLine => {
                    Box::new(CurlTransport::new(self.settings.clone()))
                }
                TransportStrategy::Browser => {
                    Box::new(BrowserTransport::launch(self.settings.clone()).await?)
                }
            };
            tracing::debug!(strategy = %strategy, "transport opened");
            Ok(transport)
        })
    }
}

/// Hands out the same transport regardless of strategy; used to inject mocks.
#[derive(Clone)]
pub struct FixedTransport(pub Arc<dyn Transport>);

impl TransportFactory for FixedTransport {
    fn open(&self, _strategy: TransportStrategy) -> TransportFuture<'_, Box<dyn Transport>> {
        let transport = Arc::clone(&self.0);
        Box::pin(async move { Ok(Box::new(transport) as Box<dyn Transport>) })
    }
}
