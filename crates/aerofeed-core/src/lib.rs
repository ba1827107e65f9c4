//! # Aerofeed Core
//!
//! Collection pipeline for airport flight feeds.
//!
//! ## Overview
//!
//! This crate turns airport-operated schedule endpoints into canonical flight
//! records and hands them to a storage backend:
//!
//! - **Transports** with three strategies (plain HTTP, `curl`, headless browser)
//! - **Retry policy** with exponential backoff and error-class aware eligibility
//! - **Canonical flight model** reconciling the SFO, YYZ and MIA feed schemas
//! - **Collectors**, one per configured airport
//! - **Collection service** routing airports to collectors and persisting results
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`collection`] | Collection results, payloads and collector states |
//! | [`collector`] | `Collector` trait, airport profiles, `AirportCollector` |
//! | [`config`] | Environment configuration |
//! | [`domain`] | `FlightRecord`, statuses, per-source parsers, summaries |
//! | [`error`] | Validation and collection errors |
//! | [`retry`] | Backoff and retry policy |
//! | [`service`] | `CollectionService` and result listeners |
//! | [`source`] | Source feed identifiers |
//! | [`transport`] | Transport strategies and challenge detection |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aerofeed_core::{AppConfig, CollectOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::from_env()?;
//!     let service = config.build_service().await?;
//!
//!     let result = service.collect("SFO", &CollectOptions::default()).await?;
//!     println!("collected {:?}", result.metadata.counts);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │  CLI / scheduler   │
//! └─────────┬──────────┘
//!           │
//!           ▼
//! ┌────────────────────┐     ┌──────────────────┐
//! │ CollectionService  │────▶│ FlightStore      │
//! └─────────┬──────────┘     │ (aerofeed-storage)│
//!           │                └──────────────────┘
//!           ▼
//! ┌────────────────────┐     ┌──────────────────┐
//! │ AirportCollector   │────▶│ RetryPolicy      │
//! └─────────┬──────────┘     └──────────────────┘
//!           │
//!           ▼
//! ┌────────────────────┐     ┌──────────────────┐
//! │ Transport          │────▶│ FlightRecord     │
//! │ (http/curl/browser)│     │ parsers          │
//! └────────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Collectors never fail outright; failures travel inside
//! [`CollectionResult`] as a [`CollectError`] with a stable code:
//!
//! ```rust
//! use aerofeed_core::CollectError;
//!
//! fn describe(error: &CollectError) -> &'static str {
//!     match error {
//!         CollectError::Challenge { .. } => "switch transport strategy",
//!         CollectError::RateLimited { .. } | CollectError::Network { .. } => "try again later",
//!         _ => "inspect the source",
//!     }
//! }
//! ```

pub mod collection;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod retry;
pub mod service;
pub mod source;
pub mod transport;

// Collection results
pub use collection::{CollectedPayload, CollectionMetadata, CollectionResult, CollectorState};

// Collectors
pub use collector::{
    expand_url, AirportCollector, AirportProfile, CollectFuture, CollectOptions, CollectRequest,
    Collector, Endpoints,
};

// Configuration
pub use config::{AppConfig, ConfigError};

// Domain models
pub use domain::{Airline, FlightDirection, FlightRecord, FlightStatus, FlightSummary, ParseContext};

// Error types
pub use error::{CollectError, ValidationError};

// Retry logic
pub use retry::{Backoff, RetryDecision, RetryPolicy, RetryableOperation};

// Orchestration
pub use service::{CollectAllOptions, CollectionListener, CollectionService};

// Source identifiers
pub use source::SourceKind;

// Transports
pub use transport::{
    RawBody, Transport, TransportError, TransportFactory, TransportSettings, TransportStrategy,
};
