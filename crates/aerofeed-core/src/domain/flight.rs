use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::parsers;
use crate::{SourceKind, ValidationError};

/// Marketing carrier of a flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airline {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightDirection {
    Arrival,
    Departure,
}

impl FlightDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Arrival => "arrival",
            Self::Departure => "departure",
        }
    }
}

impl Display for FlightDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    Scheduled,
    Boarding,
    Departed,
    InFlight,
    Landed,
    Delayed,
    Cancelled,
}

impl FlightStatus {
    pub const ALL: [Self; 7] = [
        Self::Scheduled,
        Self::Boarding,
        Self::Departed,
        Self::InFlight,
        Self::Landed,
        Self::Delayed,
        Self::Cancelled,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Boarding => "boarding",
            Self::Departed => "departed",
            Self::InFlight => "in_flight",
            Self::Landed => "landed",
            Self::Delayed => "delayed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Maps a free-text source label onto a status; `None` when unrecognized.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label
            .trim()
            .to_ascii_lowercase()
            .replace(['-', '_'], " ");

        let status = match normalized.as_str() {
            "on time" | "ontime" | "scheduled" | "sched" | "expected" => Self::Scheduled,
            "boarding" | "final call" | "gate open" | "now boarding" | "gate closed" => {
                Self::Boarding
            }
            "departed" | "dep" | "airborne" | "took off" => Self::Departed,
            "en route" | "enroute" | "in flight" | "inflight" | "in air" => Self::InFlight,
            "landed" | "arrived" | "arr" | "at gate" | "baggage delivered" => Self::Landed,
            "delayed" | "dly" | "late" => Self::Delayed,
            "cancelled" | "canceled" | "cnl" | "cancel" => Self::Cancelled,
            other if other.starts_with("delayed") => Self::Delayed,
            other if other.starts_with("landed") || other.starts_with("arrived") => Self::Landed,
            other if other.starts_with("departed") => Self::Departed,
            _ => return None,
        };
        Some(status)
    }
}

impl Display for FlightStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parser input that does not come from the payload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseContext {
    /// Home airport of the feed, uppercase IATA code.
    pub airport: String,
    /// Direction of the query half, for dual feeds.
    pub direction: Option<FlightDirection>,
}

impl ParseContext {
    pub fn new(airport: impl Into<String>) -> Self {
        Self {
            airport: airport.into().to_ascii_uppercase(),
            direction: None,
        }
    }

    pub fn with_direction(mut self, direction: FlightDirection) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// Canonical flight record.
///
/// Required fields are plain strings so that a partially populated record can
/// still be built and inspected; [`FlightRecord::validate`] enforces presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    pub id: String,
    pub flight_number: String,
    pub airline: Airline,
    pub origin: String,
    pub destination: String,
    pub scheduled_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_time: Option<String>,
    pub status: FlightStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
    pub direction: Option<FlightDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl FlightRecord {
    /// Builds a record from one element of a source payload.
    pub fn from_source_data(kind: SourceKind, raw: &Value, context: &ParseContext) -> Self {
        match kind {
            SourceKind::Sfo => parsers::sfo::parse(raw, context),
            SourceKind::Yyz => parsers::yyz::parse(raw, context),
            SourceKind::Mia => parsers::mia::parse(raw, context),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("id", self.id.as_str()),
            ("flight_number", self.flight_number.as_str()),
            ("airline", self.airline.code.as_str()),
            ("scheduled_time", self.scheduled_time.as_str()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ValidationError::MissingField { field: *field });
        }
        if self.direction.is_none() {
            return Err(ValidationError::MissingField { field: "direction" });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FlightRecord {
        FlightRecord {
            id: String::from("UA100-2026-10-19"),
            flight_number: String::from("UA100"),
            airline: Airline {
                code: String::from("UA"),
                name: String::from("United Airlines"),
            },
            origin: String::from("SFO"),
            destination: String::from("LAX"),
            scheduled_time: String::from("2026-10-19T08:00:00"),
            actual_time: None,
            status: FlightStatus::Scheduled,
            gate: None,
            terminal: None,
            direction: Some(FlightDirection::Departure),
            aircraft_type: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn status_labels_map_case_insensitively() {
        let cases = [
            ("On Time", FlightStatus::Scheduled),
            ("FINAL CALL", FlightStatus::Boarding),
            ("Airborne", FlightStatus::Departed),
            ("en-route", FlightStatus::InFlight),
            ("ARR", FlightStatus::Landed),
            ("Delayed to 14:05", FlightStatus::Delayed),
            ("Canceled", FlightStatus::Cancelled),
        ];
        for (label, expected) in cases {
            assert_eq!(FlightStatus::from_label(label), Some(expected), "{label}");
        }
        assert_eq!(FlightStatus::from_label("Diverted"), None);
    }

    #[test]
    fn validate_names_the_first_missing_field() {
        assert!(record().is_valid());

        let mut missing_airline = record();
        missing_airline.airline.code.clear();
        assert_eq!(
            missing_airline.validate(),
            Err(ValidationError::MissingField { field: "airline" })
        );

        let mut missing_direction = record();
        missing_direction.direction = None;
        assert_eq!(
            missing_direction.validate(),
            Err(ValidationError::MissingField { field: "direction" })
        );
    }

    #[test]
    fn serializes_status_in_snake_case_and_skips_empty_optionals() {
        let mut flight = record();
        flight.status = FlightStatus::InFlight;

        let json = serde_json::to_value(&flight).expect("serialize");
        assert_eq!(json["status"], "in_flight");
        assert_eq!(json["direction"], "departure");
        assert!(json.get("gate").is_none());
        assert!(json.get("metadata").is_none());
    }
}
