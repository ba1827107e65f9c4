mod airports;
mod collect;
mod show;

use aerofeed_core::AppConfig;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// What a command prints: JSON on stdout, failures on stderr.
pub struct CommandOutput {
    pub data: Value,
    pub failures: Vec<String>,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failures: Vec::new(),
        }
    }

    pub fn with_failures(mut self, failures: Vec<String>) -> Self {
        self.failures.extend(failures);
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let config = AppConfig::from_env()?;
    tracing::debug!(
        storage = %config.storage.backend(),
        airports = ?config.airports,
        "configuration loaded"
    );

    match &cli.command {
        Command::Collect(args) => collect::run(args, &config).await,
        Command::Airports => airports::run(&config),
        Command::Show(args) => show::run(args, &config).await,
    }
}
