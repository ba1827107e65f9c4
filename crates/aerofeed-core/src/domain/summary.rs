use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::{FlightDirection, FlightRecord, FlightStatus};

/// Status breakdown of one stored document or collected payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlightSummary {
    pub total: usize,
    pub arrivals: usize,
    pub departures: usize,
    pub by_status: BTreeMap<FlightStatus, usize>,
    /// Flights delayed outright or running later than scheduled.
    pub delayed: usize,
    pub cancelled: usize,
    /// Elements that did not deserialize as flight records.
    pub unreadable: usize,
}

impl FlightSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a FlightRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(record);
        }
        summary
    }

    /// Summarizes the `flights` array of a stored document.
    pub fn from_document(document: &Value) -> Self {
        let mut summary = Self::default();
        let flights = document
            .get("flights")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for flight in flights {
            match serde_json::from_value::<FlightRecord>(flight.clone()) {
                Ok(record) => summary.add(&record),
                Err(_) => summary.unreadable += 1,
            }
        }
        summary
    }

    fn add(&mut self, record: &FlightRecord) {
        self.total += 1;
        match record.direction {
            Some(FlightDirection::Arrival) => self.arrivals += 1,
            Some(FlightDirection::Departure) => self.departures += 1,
            None => {}
        }
        *self.by_status.entry(record.status).or_default() += 1;

        let running_late = record
            .actual_time
            .as_deref()
            .is_some_and(|actual| actual > record.scheduled_time.as_str());
        match record.status {
            FlightStatus::Cancelled => self.cancelled += 1,
            FlightStatus::Delayed => self.delayed += 1,
            _ if running_late => self.delayed += 1,
            _ => {}
        }
    }

    pub fn count(&self, status: FlightStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}
