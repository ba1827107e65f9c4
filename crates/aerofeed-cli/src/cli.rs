//! CLI argument definitions for aerofeed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `collect` | Collect one airport, or every configured airport |
//! | `airports` | List configured airports with source and transport |
//! | `show` | Summarize a stored entry |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--log-level` | `RUST_LOG`, else `warn` | Tracing filter directive |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! # Collect every airport in AEROFEED_AIRPORTS
//! aerofeed collect
//!
//! # Collect one airport for a given day into the test subtree
//! aerofeed collect YYZ --date 2026-10-19 --test
//!
//! # Inspect what was stored
//! aerofeed show YYZ --type departures --date 2026-10-19 --pretty
//! ```

use aerofeed_storage::FlightType;
use clap::{Args, Parser, Subcommand, ValueEnum};
use time::Date;

/// Airport flight feed collector.
///
/// Storage backend and airports are configured through `AEROFEED_*`
/// environment variables; a `.env` file in the working directory is loaded
/// first.
#[derive(Debug, Parser)]
#[command(name = "aerofeed", author, version, about = "Airport flight feed collector")]
pub struct Cli {
    /// Tracing filter, e.g. `info` or `aerofeed_core=debug`.
    #[arg(long, global = true, env = "AEROFEED_LOG")]
    pub log_level: Option<String>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Collect flights and persist them.
    ///
    /// Without an airport every configured airport is collected. Exits with
    /// status 1 when any airport fails.
    ///
    /// # Examples
    ///
    ///   aerofeed collect
    ///   aerofeed collect SFO
    ///   aerofeed collect --airport MIA --throw-on-error
    Collect(CollectArgs),

    /// List configured airports.
    Airports,

    /// Load a stored entry and print its flight summary.
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct CollectArgs {
    /// Airport code to collect.
    #[arg(conflicts_with = "airport_flag")]
    pub airport: Option<String>,

    /// Airport code to collect (same as the positional argument).
    #[arg(long = "airport", id = "airport_flag", value_name = "CODE")]
    pub airport_flag: Option<String>,

    /// Flight date as YYYY-MM-DD; defaults to today (UTC).
    #[arg(long, value_parser = parse_date)]
    pub date: Option<Date>,

    /// Write to the test subtree instead of production entries.
    #[arg(long, default_value_t = false)]
    pub test: bool,

    /// Stop at the first failure instead of collecting the rest.
    #[arg(long, default_value_t = false)]
    pub throw_on_error: bool,

    /// Maximum airports collected at once.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override the retry attempt limit.
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl CollectArgs {
    pub fn airport(&self) -> Option<&str> {
        self.airport.as_deref().or(self.airport_flag.as_deref())
    }
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Airport code.
    pub airport: String,

    /// Entry type; every stored type is shown when omitted.
    #[arg(long = "type", value_enum)]
    pub flight_type: Option<FlightTypeArg>,

    /// Flight date as YYYY-MM-DD; defaults to today (UTC).
    #[arg(long, value_parser = parse_date)]
    pub date: Option<Date>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FlightTypeArg {
    Flights,
    Departures,
    Arrivals,
}

impl From<FlightTypeArg> for FlightType {
    fn from(value: FlightTypeArg) -> Self {
        match value {
            FlightTypeArg::Flights => Self::Flights,
            FlightTypeArg::Departures => Self::Departures,
            FlightTypeArg::Arrivals => Self::Arrivals,
        }
    }
}

fn parse_date(value: &str) -> Result<Date, String> {
    aerofeed_storage::key::parse_date(value).map_err(|error| error.to_string())
}
