use aerofeed_core::{AppConfig, Endpoints};
use serde::Serialize;

use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct AirportRow<'a> {
    code: &'a str,
    name: &'a str,
    source: &'static str,
    transport: &'static str,
    endpoints: Vec<&'a str>,
}

pub fn run(config: &AppConfig) -> Result<CommandOutput, CliError> {
    let airports: Vec<AirportRow<'_>> = config
        .profiles
        .iter()
        .map(|profile| AirportRow {
            code: &profile.code,
            name: &profile.name,
            source: profile.source.as_str(),
            transport: profile.transport.as_str(),
            endpoints: match &profile.endpoints {
                Endpoints::Single { url } => vec![url.as_str()],
                Endpoints::Dual {
                    departures,
                    arrivals,
                } => vec![departures.as_str(), arrivals.as_str()],
            },
        })
        .collect();

    Ok(CommandOutput::ok(serde_json::json!({
        "storage": config.storage.backend(),
        "airports": airports,
    })))
}
