//! # Aerofeed Storage
//!
//! Persistence for collected flight documents behind one [`FlightStore`]
//! contract.
//!
//! | Backend | Module | Key mapping |
//! |---------|--------|-------------|
//! | Local filesystem | [`filesystem`] | `<base>/<airport>/<airport>_<type>_<date>.json` |
//! | GitHub contents API | [`github`] | same path inside a repository tree |
//! | DuckDB | [`duckdb_store`] | `flights` row keyed by `(airport_code, flight_type, flight_date)` |
//! | SQLite | [`sqlite`] | same relational schema via sqlx |
//!
//! Every backend upserts by natural key: a repeated save for the same key
//! updates the existing entry and keeps its `created_at`.

pub mod config;
pub mod duckdb;
pub mod duckdb_store;
pub mod error;
pub mod filesystem;
pub mod github;
pub mod key;
pub mod migrations;
pub mod sqlite;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::ops::Range;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use config::{
    open_store, GitHubConfig, StorageConfig, DEFAULT_GITHUB_API_URL, DEFAULT_GITHUB_BRANCH,
};
pub use duckdb::DuckDbConnectionManager;
pub use duckdb_store::{DuckDbStore, DUCKDB_BATCH_SIZE};
pub use error::StorageError;
pub use filesystem::FileSystemStore;
pub use github::{ContentsApi, GitHubContentsClient, GitHubStore, RemoteFile};
pub use key::{FlightType, StorageKey};
pub use sqlite::{SqliteStore, SQLITE_BATCH_SIZE};

/// Boxed future returned by storage operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Identifies the active backend in logs and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    FileSystem,
    GitHub,
    DuckDb,
    Sqlite,
}

impl StorageBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileSystem => "filesystem",
            Self::GitHub => "github",
            Self::DuckDb => "duckdb",
            Self::Sqlite => "sqlite",
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted entry for one natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFlightEntry {
    pub airport_code: String,
    pub flight_type: FlightType,
    pub flight_date: String,
    pub collection_date: String,
    pub created_at: String,
    pub updated_at: String,
    pub data: Value,
}

impl StoredFlightEntry {
    /// Builds the entry written for `key`, keeping `created_at` from `previous`.
    pub fn upserted(
        key: &StorageKey,
        data: &Value,
        options: &SaveOptions,
        previous_created_at: Option<String>,
    ) -> Self {
        let now = key::now_timestamp();
        Self {
            airport_code: key.storage_airport_code(),
            flight_type: key.flight_type(),
            flight_date: key.date_string(),
            collection_date: options
                .collection_date
                .clone()
                .unwrap_or_else(|| now.clone()),
            created_at: previous_created_at.unwrap_or_else(|| now.clone()),
            updated_at: now,
            data: data.clone(),
        }
    }

    /// Rebuilds an entry from the text columns of a relational row.
    pub(crate) fn from_columns(
        key: &StorageKey,
        columns: EntryColumns,
    ) -> Result<Self, StorageError> {
        let corrupt = |message: String| StorageError::Corrupt {
            path: key.to_string(),
            message,
        };
        let flight_type = columns
            .flight_type
            .parse()
            .map_err(|error: StorageError| corrupt(error.to_string()))?;
        let data = serde_json::from_str(&columns.data).map_err(|error| corrupt(error.to_string()))?;

        Ok(Self {
            airport_code: columns.airport_code,
            flight_type,
            flight_date: columns.flight_date,
            collection_date: columns.collection_date,
            created_at: columns.created_at,
            updated_at: columns.updated_at,
            data,
        })
    }

    /// Number of records in the `flights` array of the payload.
    pub fn record_count(&self) -> usize {
        self.data
            .get("flights")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

/// Raw `flights` row as read back by the relational backends.
pub(crate) struct EntryColumns {
    pub airport_code: String,
    pub flight_type: String,
    pub flight_date: String,
    pub collection_date: String,
    pub data: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of `flight_status_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusHistoryEntry {
    pub flight_id: String,
    pub flight_number: Option<String>,
    pub status: String,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Collection timestamp recorded alongside the entry; defaults to now.
    pub collection_date: Option<String>,
    /// Commit message for version-controlled backends.
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Branch, tag or commit to read from (GitHub backend only).
    pub git_ref: Option<String>,
}

/// Storage contract shared by every backend.
///
/// Implementations are selected once at startup (see [`open_store`]) and
/// shared as `Arc<dyn FlightStore>`.
pub trait FlightStore: Send + Sync {
    fn backend(&self) -> StorageBackend;

    /// Inserts or updates the entry at `key` and returns what was written.
    fn save<'a>(
        &'a self,
        key: &'a StorageKey,
        data: &'a Value,
        options: &'a SaveOptions,
    ) -> StoreFuture<'a, StoredFlightEntry>;

    fn load<'a>(
        &'a self,
        key: &'a StorageKey,
        options: &'a LoadOptions,
    ) -> StoreFuture<'a, Option<StoredFlightEntry>>;

    fn exists<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool>;

    /// Removes the entry; returns `false` when nothing was stored at `key`.
    fn delete<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool>;
}

/// Flat row accepted by the relational bulk-insert paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightEntryRow {
    pub airport_code: String,
    pub flight_type: String,
    pub flight_date: String,
    pub collection_date: String,
    pub data: String,
}

/// A batch that failed to commit during a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchError {
    pub start: usize,
    pub end: usize,
    pub message: String,
}

impl BatchError {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkInsertReport {
    pub rows_inserted: usize,
    pub batches: usize,
    pub errors: Vec<BatchError>,
}

impl BulkInsertReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, range: Range<usize>, outcome: Result<(), StorageError>) {
        self.batches += 1;
        match outcome {
            Ok(()) => self.rows_inserted += range.len(),
            Err(error) => {
                tracing::warn!(
                    start = range.start,
                    end = range.end,
                    error = %error,
                    "bulk insert batch rolled back"
                );
                self.errors.push(BatchError {
                    start: range.start,
                    end: range.end,
                    message: error.to_string(),
                });
            }
        }
    }
}

/// Splits `len` rows into consecutive ranges of at most `batch_size`.
pub fn batch_ranges(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect()
}

/// One status observation extracted from a stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusObservation {
    pub flight_id: String,
    pub flight_number: Option<String>,
    pub status: String,
}

/// Reads `(id, flight_number, status)` from each element of `data.flights`.
pub(crate) fn status_observations(data: &Value) -> Vec<StatusObservation> {
    let Some(flights) = data.get("flights").and_then(Value::as_array) else {
        return Vec::new();
    };

    flights
        .iter()
        .filter_map(|flight| {
            let flight_id = flight.get("id")?.as_str()?.to_owned();
            let status = flight.get("status")?.as_str()?.to_owned();
            let flight_number = flight
                .get("flight_number")
                .and_then(Value::as_str)
                .map(str::to_owned);
            Some(StatusObservation {
                flight_id,
                flight_number,
                status,
            })
        })
        .collect()
}
