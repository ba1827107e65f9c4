//! MIA feed: one list with an explicit `A`/`D` type flag.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{flight_number, insert_codeshare, insert_text, status, text};
use crate::{Airline, FlightDirection, FlightRecord, ParseContext};

fn direction(raw: &Value, home: &str, origin: Option<&str>, destination: Option<&str>) -> Option<FlightDirection> {
    match text(raw, &["type"]).map(|flag| flag.to_ascii_uppercase()).as_deref() {
        Some("D") => return Some(FlightDirection::Departure),
        Some("A") => return Some(FlightDirection::Arrival),
        _ => {}
    }
    if origin == Some(home) {
        Some(FlightDirection::Departure)
    } else if destination == Some(home) {
        Some(FlightDirection::Arrival)
    } else {
        None
    }
}

pub fn parse(raw: &Value, context: &ParseContext) -> FlightRecord {
    let home = context.airport.as_str();
    let origin = text(raw, &["origin"]).map(|code| code.to_ascii_uppercase());
    let destination = text(raw, &["destination"]).map(|code| code.to_ascii_uppercase());
    let direction = direction(raw, home, origin.as_deref(), destination.as_deref());

    let (origin, destination) = match direction {
        Some(FlightDirection::Departure) => {
            (origin.unwrap_or_else(|| home.to_owned()), destination.unwrap_or_default())
        }
        Some(FlightDirection::Arrival) => {
            (origin.unwrap_or_default(), destination.unwrap_or_else(|| home.to_owned()))
        }
        None => (origin.unwrap_or_default(), destination.unwrap_or_default()),
    };

    let carrier = raw.get("carrier").cloned().unwrap_or(Value::Null);
    let schedule = raw.get("schedule").cloned().unwrap_or(Value::Null);

    let mut metadata = BTreeMap::new();
    let status = status(text(raw, &["statusText", "status"]), &mut metadata);
    insert_text(&mut metadata, "baggage_carousel", text(raw, &["bagClaim"]));
    insert_codeshare(&mut metadata, raw.get("codeshares"));

    FlightRecord {
        id: text(raw, &["flightId"]).unwrap_or_default(),
        flight_number: flight_number(raw, &["number"]).unwrap_or_default(),
        airline: Airline {
            code: text(&carrier, &["code"]).unwrap_or_default(),
            name: text(&carrier, &["name"]).unwrap_or_default(),
        },
        origin,
        destination,
        scheduled_time: text(&schedule, &["scheduled"]).unwrap_or_default(),
        actual_time: text(&schedule, &["actual", "estimated"]),
        status,
        gate: text(raw, &["gate"]),
        terminal: text(raw, &["terminal"]),
        direction,
        aircraft_type: text(raw, &["equipment"]),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlightStatus;
    use serde_json::json;

    #[test]
    fn explicit_flag_wins_and_codeshares_are_kept() {
        let raw = json!({
            "flightId": "AA-1001-20261019",
            "number": "AA1001",
            "carrier": {"code": "AA", "name": "American Airlines"},
            "type": "a",
            "origin": "bog",
            "schedule": {"scheduled": "2026-10-19T14:30:00", "actual": "2026-10-19T14:22:00"},
            "statusText": "Arrived",
            "codeshares": ["BA4521", "IB2331"],
            "bagClaim": "12"
        });

        let record = parse(&raw, &ParseContext::new("MIA"));
        assert_eq!(record.direction, Some(FlightDirection::Arrival));
        assert_eq!(record.origin, "BOG");
        assert_eq!(record.destination, "MIA");
        assert_eq!(record.status, FlightStatus::Landed);
        assert_eq!(record.actual_time.as_deref(), Some("2026-10-19T14:22:00"));
        assert_eq!(record.metadata["codeshare"], true);
        assert_eq!(record.metadata["codeshare_flights"], json!(["BA4521", "IB2331"]));
        assert!(record.is_valid());
    }

    #[test]
    fn missing_flag_falls_back_to_home_origin() {
        let raw = json!({
            "flightId": "x",
            "number": "LA500",
            "carrier": {"code": "LA"},
            "origin": "MIA",
            "destination": "LIM",
            "schedule": {"scheduled": "2026-10-19T20:00:00"}
        });

        let record = parse(&raw, &ParseContext::new("MIA"));
        assert_eq!(record.direction, Some(FlightDirection::Departure));
    }
}
