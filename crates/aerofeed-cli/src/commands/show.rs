use aerofeed_core::{AppConfig, FlightSummary};
use aerofeed_storage::{open_store, FlightType, LoadOptions, StorageKey};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::cli::ShowArgs;
use crate::error::CliError;

use super::CommandOutput;

pub async fn run(args: &ShowArgs, config: &AppConfig) -> Result<CommandOutput, CliError> {
    let store = open_store(&config.storage).await?;
    let date = args
        .date
        .unwrap_or_else(|| OffsetDateTime::now_utc().date());
    let flight_types = match args.flight_type {
        Some(flight_type) => vec![FlightType::from(flight_type)],
        None => FlightType::ALL.to_vec(),
    };

    let mut entries = Vec::new();
    for flight_type in flight_types {
        let key = StorageKey::new(&args.airport, flight_type, date)?;
        let Some(entry) = store.load(&key, &LoadOptions::default()).await? else {
            continue;
        };

        let summary = FlightSummary::from_document(&entry.data);
        entries.push(json!({
            "key": key.to_string(),
            "collection_date": entry.collection_date,
            "created_at": entry.created_at,
            "updated_at": entry.updated_at,
            "summary": summary,
        }));
    }

    if entries.is_empty() {
        return Err(CliError::NotFound(format!(
            "{} on {}",
            args.airport.to_ascii_uppercase(),
            aerofeed_storage::key::format_date(date)
        )));
    }
    Ok(CommandOutput::ok(Value::Array(entries)))
}
