use std::collections::BTreeMap;

use aerofeed_core::{AppConfig, CollectAllOptions, CollectOptions, CollectionResult};
use serde_json::{json, Value};

use crate::cli::CollectArgs;
use crate::error::CliError;

use super::CommandOutput;

pub async fn run(args: &CollectArgs, config: &AppConfig) -> Result<CommandOutput, CliError> {
    let service = config.build_service().await?;
    let options = CollectOptions {
        date: args.date,
        test: args.test,
        throw_on_error: args.throw_on_error,
        max_attempts: args.max_attempts,
    };

    let results = match args.airport() {
        Some(airport) => {
            let result = service.collect(airport, &options).await?;
            BTreeMap::from([(result.metadata.airport.clone(), result)])
        }
        None => {
            service
                .collect_all(&CollectAllOptions {
                    airports: None,
                    collect: options,
                    concurrency: args.concurrency,
                })
                .await?
        }
    };

    let failures = results
        .iter()
        .filter_map(|(airport, result)| {
            result
                .error()
                .map(|error| format!("{airport}: [{}] {error}", error.code()))
        })
        .collect();

    let data: serde_json::Map<String, Value> = results
        .iter()
        .map(|(airport, result)| (airport.clone(), describe(result)))
        .collect();

    Ok(CommandOutput::ok(Value::Object(data)).with_failures(failures))
}

fn describe(result: &CollectionResult) -> Value {
    let metadata = serde_json::to_value(&result.metadata).unwrap_or(Value::Null);
    match result.error() {
        None => json!({
            "status": "ok",
            "metadata": metadata,
        }),
        Some(error) => json!({
            "status": "failed",
            "metadata": metadata,
            "error": {
                "code": error.code(),
                "message": error.to_string(),
            },
        }),
    }
}
