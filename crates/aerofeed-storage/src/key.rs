//! Natural keys and path naming for stored flight entries.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::StorageError;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

// Fixed-width so stored timestamps order lexically.
const TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
);

const TEST_STAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]");

/// Which half of an airport's traffic a stored document holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightType {
    /// Both directions in one document (single-feed sources).
    Flights,
    Departures,
    Arrivals,
}

impl FlightType {
    pub const ALL: [Self; 3] = [Self::Flights, Self::Departures, Self::Arrivals];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flights => "flights",
            Self::Departures => "departures",
            Self::Arrivals => "arrivals",
        }
    }
}

impl Display for FlightType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlightType {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flights" => Ok(Self::Flights),
            "departures" => Ok(Self::Departures),
            "arrivals" => Ok(Self::Arrivals),
            other => Err(StorageError::InvalidKey(format!(
                "unknown flight type '{other}', expected one of flights, departures, arrivals"
            ))),
        }
    }
}

/// Natural key `(airport_code, flight_type, flight_date)`.
///
/// A key may additionally carry a test-run stamp; such keys are written to a
/// separate `test/` subtree (file backends) or under a `TEST_` airport prefix
/// (relational backends) so they never collide with production entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    airport_code: String,
    flight_type: FlightType,
    flight_date: Date,
    test_stamp: Option<String>,
}

impl StorageKey {
    pub fn new(
        airport_code: &str,
        flight_type: FlightType,
        flight_date: Date,
    ) -> Result<Self, StorageError> {
        let code = airport_code.trim();
        if code.len() < 2 || code.len() > 8 {
            return Err(StorageError::InvalidKey(format!(
                "airport code '{code}' must be 2 to 8 characters"
            )));
        }
        if let Some(ch) = code.chars().find(|ch| !ch.is_ascii_alphanumeric()) {
            return Err(StorageError::InvalidKey(format!(
                "airport code '{code}' contains invalid character '{ch}'"
            )));
        }

        Ok(Self {
            airport_code: code.to_ascii_uppercase(),
            flight_type,
            flight_date,
            test_stamp: None,
        })
    }

    /// Marks the key as belonging to a test run, stamped with `at`.
    pub fn for_test_run(mut self, at: OffsetDateTime) -> Self {
        let stamp = at
            .format(TEST_STAMP_FORMAT)
            .unwrap_or_else(|_| at.unix_timestamp().to_string());
        self.test_stamp = Some(stamp);
        self
    }

    pub fn airport_code(&self) -> &str {
        &self.airport_code
    }

    pub const fn flight_type(&self) -> FlightType {
        self.flight_type
    }

    pub const fn flight_date(&self) -> Date {
        self.flight_date
    }

    pub fn is_test_run(&self) -> bool {
        self.test_stamp.is_some()
    }

    pub fn date_string(&self) -> String {
        format_date(self.flight_date)
    }

    /// Airport column value used by relational backends.
    pub fn storage_airport_code(&self) -> String {
        if self.is_test_run() {
            format!("TEST_{}", self.airport_code)
        } else {
            self.airport_code.clone()
        }
    }

    /// `<airport>/<airport>_<type>_<date>.json`, or under `test/` with a stamp suffix.
    pub fn relative_path(&self) -> String {
        let airport = self.airport_code.to_ascii_lowercase();
        let date = self.date_string();
        match &self.test_stamp {
            None => format!("{airport}/{airport}_{}_{date}.json", self.flight_type),
            Some(stamp) => format!(
                "test/{airport}/{airport}_{}_{date}_{stamp}.json",
                self.flight_type
            ),
        }
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.storage_airport_code(),
            self.flight_type,
            self.date_string()
        )
    }
}

pub fn parse_date(value: &str) -> Result<Date, StorageError> {
    Date::parse(value.trim(), DATE_FORMAT).map_err(|_| {
        StorageError::InvalidKey(format!("date '{value}' must be formatted as YYYY-MM-DD"))
    })
}

pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT)
        .unwrap_or_else(|_| date.to_string())
}

/// Current UTC time in the fixed-width stored timestamp format.
pub fn now_timestamp() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

pub fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .to_offset(time::UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}
