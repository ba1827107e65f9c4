//! Environment configuration.
//!
//! Everything is read through a lookup function so tests can supply a map
//! instead of mutating the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use aerofeed_storage::{
    open_store, FlightStore, GitHubConfig, StorageConfig, StorageError, DEFAULT_GITHUB_API_URL,
    DEFAULT_GITHUB_BRANCH,
};
use thiserror::Error;

use crate::retry::{Backoff, RetryPolicy};
use crate::transport::{DefaultTransportFactory, TransportFactory, TransportSettings, TransportStrategy};
use crate::{AirportCollector, AirportProfile, CollectionService, Endpoints, SourceKind};

pub const DEFAULT_AIRPORTS: &str = "SFO,YYZ,MIA";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {name}: {reason}")]
    Missing { name: String, reason: &'static str },

    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    /// Airports visited by `collect_all`, uppercase.
    pub airports: Vec<String>,
    pub profiles: Vec<AirportProfile>,
    pub retry: RetryPolicy,
    pub transport: TransportSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let storage = storage_config(&env)?;

        let airports: Vec<String> = env
            .get("AEROFEED_AIRPORTS")
            .unwrap_or_else(|| String::from(DEFAULT_AIRPORTS))
            .split(',')
            .map(|code| code.trim().to_ascii_uppercase())
            .filter(|code| !code.is_empty())
            .fold(Vec::new(), |mut codes, code| {
                if !codes.contains(&code) {
                    codes.push(code);
                }
                codes
            });

        let mut profiles = Vec::with_capacity(airports.len());
        for code in &airports {
            profiles.push(airport_profile(&env, code)?);
        }

        let max_attempts: u32 = env.parse_or("AEROFEED_RETRY_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: String::from("AEROFEED_RETRY_MAX_ATTEMPTS"),
                value: String::from("0"),
                reason: String::from("at least one attempt is required"),
            });
        }
        let retry = RetryPolicy::new(
            max_attempts,
            Backoff::Exponential {
                base: Duration::from_millis(env.parse_or("AEROFEED_RETRY_BASE_MS", 1_000)?),
                factor: 2.0,
                max: Duration::from_millis(env.parse_or("AEROFEED_RETRY_MAX_DELAY_MS", 30_000)?),
                jitter: true,
            },
        );

        let defaults = TransportSettings::default();
        let transport = TransportSettings {
            timeout: Duration::from_millis(env.parse_or("AEROFEED_HTTP_TIMEOUT_MS", 30_000)?),
            challenge_timeout: Duration::from_millis(
                env.parse_or("AEROFEED_CHALLENGE_TIMEOUT_MS", 30_000)?,
            ),
            curl_bin: env.get("AEROFEED_CURL_BIN").unwrap_or(defaults.curl_bin.clone()),
            chrome_bin: env.get("AEROFEED_CHROME_BIN"),
            ..defaults
        };

        Ok(Self {
            storage,
            airports,
            profiles,
            retry,
            transport,
        })
    }

    pub fn profile(&self, code: &str) -> Option<&AirportProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.code.eq_ignore_ascii_case(code.trim()))
    }

    /// Opens the configured store and wires one collector per airport.
    pub async fn build_service(&self) -> Result<CollectionService, StorageError> {
        let store = open_store(&self.storage).await?;
        let transports = Arc::new(DefaultTransportFactory::new(self.transport.clone()));
        Ok(self.service_with(store, transports))
    }

    pub fn service_with(
        &self,
        store: Arc<dyn FlightStore>,
        transports: Arc<dyn TransportFactory>,
    ) -> CollectionService {
        self.profiles
            .iter()
            .fold(CollectionService::new(store), |service, profile| {
                service.with_collector(Arc::new(AirportCollector::new(
                    profile.clone(),
                    Arc::clone(&transports),
                    self.retry.clone(),
                )))
            })
            .with_airports(&self.airports)
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn require(&self, name: &str, reason: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::Missing {
            name: name.to_owned(),
            reason,
        })
    }

    fn parse_or<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|error: T::Err| ConfigError::Invalid {
                name: name.to_owned(),
                reason: error.to_string(),
                value,
            }),
        }
    }
}

fn storage_config<F: Fn(&str) -> Option<String>>(env: &Env<'_, F>) -> Result<StorageConfig, ConfigError> {
    let backend = env
        .get("AEROFEED_STORAGE")
        .unwrap_or_else(|| String::from("filesystem"))
        .to_ascii_lowercase();

    match backend.as_str() {
        "filesystem" | "fs" | "file" => Ok(StorageConfig::FileSystem {
            base_dir: PathBuf::from(
                env.get("AEROFEED_DATA_DIR")
                    .unwrap_or_else(|| String::from(DEFAULT_DATA_DIR)),
            ),
        }),
        "github" => {
            let token = env
                .get("AEROFEED_GITHUB_TOKEN")
                .or_else(|| env.get("GITHUB_TOKEN"))
                .ok_or_else(|| ConfigError::Missing {
                    name: String::from("AEROFEED_GITHUB_TOKEN"),
                    reason: "the github backend needs a token (GITHUB_TOKEN is also accepted)",
                })?;
            let repository = env.require("AEROFEED_GITHUB_REPO", "the github backend needs owner/repo")?;
            let (owner, repo) = repository
                .split_once('/')
                .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty() && !repo.contains('/'))
                .ok_or_else(|| ConfigError::Invalid {
                    name: String::from("AEROFEED_GITHUB_REPO"),
                    value: repository.clone(),
                    reason: String::from("expected owner/repo"),
                })?;

            Ok(StorageConfig::GitHub(GitHubConfig {
                token,
                owner: owner.to_owned(),
                repo: repo.to_owned(),
                branch: env
                    .get("AEROFEED_GITHUB_BRANCH")
                    .unwrap_or_else(|| String::from(DEFAULT_GITHUB_BRANCH)),
                api_url: env
                    .get("AEROFEED_GITHUB_API_URL")
                    .unwrap_or_else(|| String::from(DEFAULT_GITHUB_API_URL)),
                base_path: env
                    .get("AEROFEED_GITHUB_PATH")
                    .unwrap_or_else(|| String::from(DEFAULT_DATA_DIR)),
            }))
        }
        "duckdb" => Ok(StorageConfig::DuckDb {
            path: PathBuf::from(env.require(
                "AEROFEED_DUCKDB_PATH",
                "the duckdb backend needs a database file",
            )?),
        }),
        "sqlite" => Ok(StorageConfig::Sqlite {
            url: env.require("AEROFEED_SQLITE_URL", "the sqlite backend needs a connection url")?,
        }),
        other => Err(ConfigError::Invalid {
            name: String::from("AEROFEED_STORAGE"),
            value: other.to_owned(),
            reason: String::from("expected one of filesystem, github, duckdb, sqlite"),
        }),
    }
}

/// Built-in profile for `code` with `AEROFEED_<CODE>_*` overrides applied.
///
/// Airports without a built-in profile need at least `_SOURCE` and an endpoint.
fn airport_profile<F: Fn(&str) -> Option<String>>(
    env: &Env<'_, F>,
    code: &str,
) -> Result<AirportProfile, ConfigError> {
    let var = |suffix: &str| format!("AEROFEED_{code}_{suffix}");
    let invalid = |name: String, value: String, reason: String| ConfigError::Invalid {
        name,
        value,
        reason,
    };

    let source = match env.get(&var("SOURCE")) {
        Some(value) => Some(
            value
                .parse::<SourceKind>()
                .map_err(|error| invalid(var("SOURCE"), value.clone(), error.to_string()))?,
        ),
        None => None,
    };

    let mut profile = match (AirportProfile::builtin(code), source) {
        (Some(mut profile), source) => {
            if let Some(source) = source {
                profile.source = source;
            }
            profile
        }
        (None, Some(source)) => AirportProfile {
            code: code.to_owned(),
            name: code.to_owned(),
            source,
            endpoints: Endpoints::Single { url: String::new() },
            referer: None,
            headers: Default::default(),
            transport: TransportStrategy::Standard,
        },
        (None, None) => {
            return Err(ConfigError::Missing {
                name: var("SOURCE"),
                reason: "airport has no built-in profile",
            })
        }
    };

    match (
        env.get(&var("URL")),
        env.get(&var("DEPARTURES_URL")),
        env.get(&var("ARRIVALS_URL")),
    ) {
        (Some(url), None, None) => profile.endpoints = Endpoints::Single { url },
        (None, Some(departures), Some(arrivals)) => {
            profile.endpoints = Endpoints::Dual {
                departures,
                arrivals,
            }
        }
        (None, None, None) => {}
        (Some(url), _, _) => {
            return Err(invalid(
                var("URL"),
                url,
                String::from("set either _URL or both _DEPARTURES_URL and _ARRIVALS_URL"),
            ))
        }
        (None, Some(_), None) | (None, None, Some(_)) => {
            return Err(ConfigError::Missing {
                name: var("DEPARTURES_URL / ARRIVALS_URL"),
                reason: "dual feeds need both endpoints",
            })
        }
    }
    if matches!(&profile.endpoints, Endpoints::Single { url } if url.is_empty()) {
        return Err(ConfigError::Missing {
            name: var("URL"),
            reason: "airport has no built-in endpoint",
        });
    }

    let dual = matches!(profile.endpoints, Endpoints::Dual { .. });
    if profile.source.is_dual_feed() != dual {
        let reason = if dual {
            format!("{} feeds take a single _URL", profile.source)
        } else {
            format!(
                "{} feeds need both _DEPARTURES_URL and _ARRIVALS_URL",
                profile.source
            )
        };
        return Err(invalid(var("SOURCE"), profile.source.to_string(), reason));
    }

    if let Some(referer) = env.get(&var("REFERER")) {
        profile.referer = Some(referer);
    }
    if let Some(value) = env.get(&var("TRANSPORT")) {
        profile.transport = value
            .parse()
            .map_err(|error: crate::ValidationError| invalid(var("TRANSPORT"), value.clone(), error.to_string()))?;
    }
    Ok(profile)
}
