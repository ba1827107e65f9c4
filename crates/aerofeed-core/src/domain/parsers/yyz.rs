//! YYZ feed: departures and arrivals are queried separately.
//!
//! Each element names only the far-end airport, so the home airport fills the
//! near end on the side given by the query direction.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{flight_number, insert_codeshare, insert_text, status, text};
use crate::{Airline, FlightDirection, FlightRecord, ParseContext};

pub fn parse(raw: &Value, context: &ParseContext) -> FlightRecord {
    let home = context.airport.clone();
    let direction = context.direction;
    let far_end = text(raw, &["airportCode"])
        .map(|code| code.to_ascii_uppercase())
        .unwrap_or_default();

    let (origin, destination) = match direction {
        Some(FlightDirection::Departure) => (home.clone(), far_end),
        Some(FlightDirection::Arrival) => (far_end, home.clone()),
        None => (String::new(), far_end),
    };

    let flight_number = flight_number(raw, &["flightNumber"]).unwrap_or_default();
    let scheduled_time = text(raw, &["schedTime"]).unwrap_or_default();

    let id = match direction {
        Some(direction) if !flight_number.is_empty() && !scheduled_time.is_empty() => {
            format!("{home}-{direction}-{flight_number}-{scheduled_time}")
        }
        _ => String::new(),
    };

    let mut metadata = BTreeMap::new();
    let status = status(text(raw, &["status"]), &mut metadata);
    insert_text(&mut metadata, "city", text(raw, &["city"]));
    insert_text(&mut metadata, "baggage_carousel", text(raw, &["carousel"]));
    insert_text(&mut metadata, "remarks", text(raw, &["remarks"]));
    insert_codeshare(&mut metadata, raw.get("codeShare"));

    FlightRecord {
        id,
        flight_number,
        airline: Airline {
            code: text(raw, &["airlineCode"]).unwrap_or_default(),
            name: text(raw, &["airlineName"]).unwrap_or_default(),
        },
        origin,
        destination,
        scheduled_time,
        actual_time: text(raw, &["latestTm"]),
        status,
        gate: text(raw, &["gate"]),
        terminal: text(raw, &["terminal"]),
        direction,
        aircraft_type: text(raw, &["aircraftType"]),
        metadata,
    }
}
