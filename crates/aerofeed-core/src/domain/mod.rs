//! # Domain Models
//!
//! Canonical flight representation and the per-source parsers that build it.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`FlightRecord`] | Normalized flight, identical for every source |
//! | [`FlightStatus`] | Lifecycle status mapped from free-text labels |
//! | [`FlightDirection`] | Arrival or departure relative to the home airport |
//! | [`ParseContext`] | Home airport and query direction handed to parsers |
//! | [`FlightSummary`] | Status breakdown of a payload |
//!
//! Timestamps are carried as the source sends them; no timezone conversion
//! happens anywhere in the pipeline.

mod flight;
pub mod parsers;
mod summary;

pub use flight::{Airline, FlightDirection, FlightRecord, FlightStatus, ParseContext};
pub use summary::FlightSummary;
