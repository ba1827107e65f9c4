//! SFO feed: one list for both directions.
//!
//! Direction is implicit. A populated `to_airport` marks a departure from the
//! home airport, a populated `from_airport` an arrival to it.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{airport_code, flight_number, insert_codeshare, insert_text, status, text};
use crate::{Airline, FlightDirection, FlightRecord, ParseContext};

pub fn parse(raw: &Value, context: &ParseContext) -> FlightRecord {
    let home = context.airport.as_str();
    let from = airport_code(raw, "from_airport");
    let to = airport_code(raw, "to_airport");

    let direction = match (&from, &to) {
        (_, Some(to)) if to == home => Some(FlightDirection::Arrival),
        (_, Some(_)) => Some(FlightDirection::Departure),
        (Some(_), None) => Some(FlightDirection::Arrival),
        (None, None) => context.direction,
    };
    let (origin, destination) = match direction {
        Some(FlightDirection::Departure) => (home.to_owned(), to.unwrap_or_default()),
        Some(FlightDirection::Arrival) => (from.unwrap_or_default(), home.to_owned()),
        None => (from.unwrap_or_default(), to.unwrap_or_default()),
    };

    let airline = raw.get("airline").map_or_else(
        || Airline {
            code: text(raw, &["airline_code"]).unwrap_or_default(),
            name: text(raw, &["airline_name"]).unwrap_or_default(),
        },
        |airline| Airline {
            code: text(airline, &["iata_code", "code"]).unwrap_or_default(),
            name: text(airline, &["name"]).unwrap_or_default(),
        },
    );

    let mut metadata = BTreeMap::new();
    let status = status(text(raw, &["status", "flight_status"]), &mut metadata);
    insert_text(&mut metadata, "baggage_carousel", text(raw, &["baggage_carousel"]));
    insert_text(&mut metadata, "remarks", text(raw, &["remarks"]));
    insert_codeshare(&mut metadata, raw.get("codeshare"));

    FlightRecord {
        id: text(raw, &["id"]).unwrap_or_default(),
        flight_number: flight_number(raw, &["flight_number"]).unwrap_or_default(),
        airline,
        origin,
        destination,
        scheduled_time: text(raw, &["scheduled_time"]).unwrap_or_default(),
        actual_time: text(raw, &["actual_time", "estimated_time"]),
        status,
        gate: text(raw, &["gate"]),
        terminal: text(raw, &["terminal"]),
        direction,
        aircraft_type: text(raw, &["aircraft", "aircraft_type"]),
        metadata,
    }
}
