use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use aerofeed_storage::key::format_date;
use aerofeed_storage::FlightType;
use serde::Serialize;
use serde_json::{json, Value};
use time::{Date, OffsetDateTime};

use crate::transport::TransportStrategy;
use crate::{CollectError, FlightRecord, SourceKind};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Validated records of one collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum CollectedPayload {
    /// Single-feed sources: both directions in one list.
    Flights { flights: Vec<FlightRecord> },
    /// Dual-feed sources, one list per query half.
    ByDirection {
        departures: Vec<FlightRecord>,
        arrivals: Vec<FlightRecord>,
    },
}

impl CollectedPayload {
    pub fn flights(flights: Vec<FlightRecord>) -> Self {
        Self::Flights { flights }
    }

    /// Record count per stored flight type.
    pub fn counts(&self) -> BTreeMap<FlightType, usize> {
        match self {
            Self::Flights { flights } => BTreeMap::from([(FlightType::Flights, flights.len())]),
            Self::ByDirection {
                departures,
                arrivals,
            } => BTreeMap::from([
                (FlightType::Departures, departures.len()),
                (FlightType::Arrivals, arrivals.len()),
            ]),
        }
    }

    pub fn total(&self) -> usize {
        self.counts().values().sum()
    }

    pub fn records(&self) -> impl Iterator<Item = &FlightRecord> {
        let (first, second): (&[FlightRecord], &[FlightRecord]) = match self {
            Self::Flights { flights } => (flights, &[]),
            Self::ByDirection {
                departures,
                arrivals,
            } => (departures, arrivals),
        };
        first.iter().chain(second.iter())
    }

    /// Splits the payload into the documents persisted per flight type.
    pub fn documents(
        &self,
        airport: &str,
        flight_date: Date,
        collected_at: &str,
    ) -> Vec<(FlightType, Value)> {
        let document = |flight_type: FlightType, flights: &[FlightRecord]| {
            (
                flight_type,
                json!({
                    "airport": airport,
                    "flight_type": flight_type,
                    "flight_date": format_date(flight_date),
                    "collected_at": collected_at,
                    "count": flights.len(),
                    "flights": flights,
                }),
            )
        };

        match self {
            Self::Flights { flights } => vec![document(FlightType::Flights, flights)],
            Self::ByDirection {
                departures,
                arrivals,
            } => vec![
                document(FlightType::Departures, departures),
                document(FlightType::Arrivals, arrivals),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionMetadata {
    pub airport: String,
    pub source: Option<SourceKind>,
    pub transport: Option<TransportStrategy>,
    #[serde(with = "time::serde::rfc3339")]
    pub collected_at: OffsetDateTime,
    #[serde(with = "iso_date")]
    pub flight_date: Date,
    pub counts: BTreeMap<FlightType, usize>,
    /// Source elements dropped because they failed validation.
    pub rejected: usize,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl CollectionMetadata {
    pub fn new(airport: impl Into<String>, flight_date: Date) -> Self {
        Self {
            airport: airport.into(),
            source: None,
            transport: None,
            collected_at: OffsetDateTime::now_utc(),
            flight_date,
            counts: BTreeMap::new(),
            rejected: 0,
            attempts: 0,
            duration_ms: 0,
        }
    }
}

/// Outcome of one collection; holds either a payload or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionResult {
    pub metadata: CollectionMetadata,
    pub outcome: Result<CollectedPayload, CollectError>,
}

impl CollectionResult {
    pub fn success(mut metadata: CollectionMetadata, payload: CollectedPayload) -> Self {
        metadata.counts = payload.counts();
        Self {
            metadata,
            outcome: Ok(payload),
        }
    }

    pub fn failure(metadata: CollectionMetadata, error: CollectError) -> Self {
        Self {
            metadata,
            outcome: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn payload(&self) -> Option<&CollectedPayload> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&CollectError> {
        self.outcome.as_ref().err()
    }

    /// Turns a success into a failure, keeping the metadata.
    pub fn into_failure(self, error: CollectError) -> Self {
        Self::failure(self.metadata, error)
    }
}

/// Lifecycle of a single collector run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Requesting,
    Parsing,
    Success,
    Failure,
}

impl CollectorState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Parsing => "parsing",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl Display for CollectorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
