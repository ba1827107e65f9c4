//! Per-source payload parsers.
//!
//! Each parser is a pure function from one payload element to a
//! [`FlightRecord`](crate::FlightRecord). Parsers never fail: missing fields
//! are left empty and caught afterwards by `FlightRecord::validate`.

pub mod mia;
pub mod sfo;
pub mod yyz;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{FlightStatus, SourceKind, ValidationError};

/// Returns the record array of a full source payload.
pub fn records(kind: SourceKind, payload: &Value) -> Result<&[Value], ValidationError> {
    payload
        .get(kind.records_field())
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or(ValidationError::MissingRecords {
            feed: kind.as_str(),
            field: kind.records_field(),
        })
}

/// First non-empty value among `keys`, with numbers rendered as text.
pub(crate) fn text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_owned()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    })
}

/// Airport code from either a plain string or an object carrying `iata_code`/`code`.
pub(crate) fn airport_code(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(code) if !code.trim().is_empty() => Some(code.trim().to_ascii_uppercase()),
        object @ Value::Object(_) => {
            text(object, &["iata_code", "iata", "code"]).map(|code| code.to_ascii_uppercase())
        }
        _ => None,
    }
}

/// Flight number with inner whitespace removed, uppercase (`"ua 837"` -> `"UA837"`).
pub(crate) fn flight_number(raw: &Value, keys: &[&str]) -> Option<String> {
    text(raw, keys).map(|number| {
        number
            .split_whitespace()
            .collect::<String>()
            .to_ascii_uppercase()
    })
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64().is_some_and(|n| n != 0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1"
        ),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

/// Maps a status label; unknown labels become `Scheduled` and are kept as `raw_status`.
pub(crate) fn status(label: Option<String>, metadata: &mut BTreeMap<String, Value>) -> FlightStatus {
    let Some(label) = label else {
        return FlightStatus::Scheduled;
    };
    match FlightStatus::from_label(&label) {
        Some(status) => status,
        None => {
            metadata.insert(String::from("raw_status"), Value::String(label));
            FlightStatus::Scheduled
        }
    }
}

/// Records `codeshare` as a flag, plus `codeshare_flights` when the source
/// lists the marketing flight numbers.
pub(crate) fn insert_codeshare(metadata: &mut BTreeMap<String, Value>, value: Option<&Value>) {
    let Some(value) = value else {
        return;
    };
    metadata.insert(String::from("codeshare"), Value::Bool(truthy(value)));
    if let Some(flights) = value.as_array().filter(|flights| !flights.is_empty()) {
        metadata.insert(String::from("codeshare_flights"), Value::Array(flights.clone()));
    }
}

pub(crate) fn insert_text(metadata: &mut BTreeMap<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        metadata.insert(key.to_owned(), Value::String(value));
    }
}
