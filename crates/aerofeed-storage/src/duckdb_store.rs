//! Embedded analytical backend on DuckDB.
//!
//! `duckdb::Connection` is blocking, so every operation checks a connection
//! out of the pool inside `spawn_blocking`.

use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Connection};
use serde_json::Value;
use uuid::Uuid;

use crate::duckdb::DuckDbConnectionManager;
use crate::migrations::apply_duckdb_migrations;
use crate::{
    batch_ranges, status_observations, BulkInsertReport, EntryColumns, FlightEntryRow,
    FlightStore, LoadOptions, SaveOptions, StatusHistoryEntry, StorageBackend, StorageError,
    StorageKey, StoreFuture, StoredFlightEntry,
};

/// Rows committed per transaction by [`DuckDbStore::bulk_insert`].
pub const DUCKDB_BATCH_SIZE: usize = 100;

const DEFAULT_POOL_SIZE: usize = 4;

#[derive(Clone)]
pub struct DuckDbStore {
    manager: DuckDbConnectionManager,
}

impl DuckDbStore {
    /// Opens the database file, creating it and its parent directory if needed,
    /// and applies pending migrations.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::open_blocking(&path)).await?
    }

    fn open_blocking(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(path, DEFAULT_POOL_SIZE)?;
        let connection = manager.acquire()?;
        apply_duckdb_migrations(&connection)?;
        drop(connection);

        tracing::debug!(path = %path.display(), "opened duckdb store");
        Ok(Self { manager })
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    async fn with_connection<T, F>(&self, operation: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let manager = self.manager.clone();
        tokio::task::spawn_blocking(move || {
            let connection = manager.acquire()?;
            operation(&connection)
        })
        .await?
    }

    /// Upserts `rows` in batches of [`DUCKDB_BATCH_SIZE`], one transaction per
    /// batch. A failing batch is rolled back and reported; later batches still run.
    pub async fn bulk_insert(&self, rows: &[FlightEntryRow]) -> Result<BulkInsertReport, StorageError> {
        let rows = rows.to_vec();
        self.with_connection(move |connection| {
            let mut report = BulkInsertReport::default();
            for range in batch_ranges(rows.len(), DUCKDB_BATCH_SIZE) {
                let outcome = insert_batch(connection, &rows[range.clone()]);
                report.record(range, outcome);
            }
            tracing::info!(
                rows = rows.len(),
                inserted = report.rows_inserted,
                failed_batches = report.errors.len(),
                "duckdb bulk insert finished"
            );
            Ok(report)
        })
        .await
    }

    /// Recorded status transitions for the entry at `key`, oldest first.
    pub async fn status_history(
        &self,
        key: &StorageKey,
    ) -> Result<Vec<StatusHistoryEntry>, StorageError> {
        let key = key.clone();
        self.with_connection(move |connection| {
            let Some((entry_id, _)) = find_entry(connection, &key)? else {
                return Ok(Vec::new());
            };

            let mut statement = connection.prepare(
                "SELECT flight_id, flight_number, status, recorded_at \
                 FROM flight_status_history WHERE flight_entry_id = ? \
                 ORDER BY recorded_at, flight_id",
            )?;
            let rows = statement.query_map([entry_id.as_str()], |row| {
                Ok(StatusHistoryEntry {
                    flight_id: row.get(0)?,
                    flight_number: row.get(1)?,
                    status: row.get(2)?,
                    recorded_at: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn optional<T>(result: Result<T, ::duckdb::Error>) -> Result<Option<T>, StorageError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(::duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, StorageError>,
) -> Result<T, StorageError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn insert_batch(connection: &Connection, rows: &[FlightEntryRow]) -> Result<(), StorageError> {
    connection.execute_batch("BEGIN TRANSACTION")?;
    let result = (|| -> Result<(), StorageError> {
        let now = crate::key::now_timestamp();
        for row in rows {
            connection.execute(
                "INSERT INTO flights \
                 (id, airport_code, flight_type, flight_date, collection_date, data, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (airport_code, flight_type, flight_date) DO UPDATE SET \
                 collection_date = excluded.collection_date, \
                 data = excluded.data, \
                 updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    row.airport_code,
                    row.flight_type,
                    row.flight_date,
                    row.collection_date,
                    row.data,
                    now,
                    now,
                ],
            )?;
        }
        Ok(())
    })();

    finalize_transaction(connection, result)
}

fn find_entry(
    connection: &Connection,
    key: &StorageKey,
) -> Result<Option<(String, String)>, StorageError> {
    optional(connection.query_row(
        "SELECT id, created_at FROM flights \
         WHERE airport_code = ? AND flight_type = ? AND flight_date = ?",
        params![
            key.storage_airport_code(),
            key.flight_type().as_str(),
            key.date_string()
        ],
        |row| Ok((row.get(0)?, row.get(1)?)),
    ))
}

fn record_status_changes(
    connection: &Connection,
    entry_id: &str,
    data: &Value,
    recorded_at: &str,
) -> Result<usize, StorageError> {
    let mut appended = 0;
    for observation in status_observations(data) {
        let last: Option<String> = optional(connection.query_row(
            "SELECT status FROM flight_status_history \
             WHERE flight_entry_id = ? AND flight_id = ? \
             ORDER BY recorded_at DESC LIMIT 1",
            params![entry_id, observation.flight_id],
            |row| row.get(0),
        ))?;

        if last.as_deref() == Some(observation.status.as_str()) {
            continue;
        }

        connection.execute(
            "INSERT INTO flight_status_history \
             (id, flight_entry_id, flight_id, flight_number, status, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                entry_id,
                observation.flight_id,
                observation.flight_number,
                observation.status,
                recorded_at,
            ],
        )?;
        appended += 1;
    }
    Ok(appended)
}

fn save_entry(
    connection: &Connection,
    key: &StorageKey,
    data: &Value,
    options: &SaveOptions,
) -> Result<StoredFlightEntry, StorageError> {
    connection.execute_batch("BEGIN TRANSACTION")?;
    let result = (|| -> Result<StoredFlightEntry, StorageError> {
        let existing = find_entry(connection, key)?;
        let (entry_id, previous_created_at) = match existing {
            Some((id, created_at)) => (id, Some(created_at)),
            None => (Uuid::new_v4().to_string(), None),
        };
        let is_update = previous_created_at.is_some();
        let entry = StoredFlightEntry::upserted(key, data, options, previous_created_at);
        let body = serde_json::to_string(&entry.data)?;

        if is_update {
            connection.execute(
                "UPDATE flights SET collection_date = ?, data = ?, updated_at = ? WHERE id = ?",
                params![entry.collection_date, body, entry.updated_at, entry_id],
            )?;
        } else {
            connection.execute(
                "INSERT INTO flights \
                 (id, airport_code, flight_type, flight_date, collection_date, data, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry_id,
                    entry.airport_code,
                    entry.flight_type.as_str(),
                    entry.flight_date,
                    entry.collection_date,
                    body,
                    entry.created_at,
                    entry.updated_at,
                ],
            )?;
        }

        let appended = record_status_changes(connection, &entry_id, data, &entry.updated_at)?;
        tracing::debug!(key = %key, updated = is_update, status_changes = appended, "saved duckdb entry");
        Ok(entry)
    })();

    finalize_transaction(connection, result)
}

fn load_entry(
    connection: &Connection,
    key: &StorageKey,
) -> Result<Option<StoredFlightEntry>, StorageError> {
    let columns = optional(connection.query_row(
        "SELECT airport_code, flight_type, flight_date, collection_date, data, created_at, updated_at \
         FROM flights WHERE airport_code = ? AND flight_type = ? AND flight_date = ?",
        params![
            key.storage_airport_code(),
            key.flight_type().as_str(),
            key.date_string()
        ],
        |row| {
            Ok(EntryColumns {
                airport_code: row.get(0)?,
                flight_type: row.get(1)?,
                flight_date: row.get(2)?,
                collection_date: row.get(3)?,
                data: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        },
    ))?;

    columns
        .map(|columns| StoredFlightEntry::from_columns(key, columns))
        .transpose()
}

fn delete_entry(connection: &Connection, key: &StorageKey) -> Result<bool, StorageError> {
    connection.execute_batch("BEGIN TRANSACTION")?;
    let result = (|| -> Result<bool, StorageError> {
        let Some((entry_id, _)) = find_entry(connection, key)? else {
            return Ok(false);
        };
        connection.execute(
            "DELETE FROM flight_status_history WHERE flight_entry_id = ?",
            [entry_id.as_str()],
        )?;
        connection.execute("DELETE FROM flights WHERE id = ?", [entry_id.as_str()])?;
        Ok(true)
    })();

    finalize_transaction(connection, result)
}

impl FlightStore for DuckDbStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::DuckDb
    }

    fn save<'a>(
        &'a self,
        key: &'a StorageKey,
        data: &'a Value,
        options: &'a SaveOptions,
    ) -> StoreFuture<'a, StoredFlightEntry> {
        let key = key.clone();
        let data = data.clone();
        let options = options.clone();
        Box::pin(self.with_connection(move |connection| {
            save_entry(connection, &key, &data, &options)
        }))
    }

    fn load<'a>(
        &'a self,
        key: &'a StorageKey,
        _options: &'a LoadOptions,
    ) -> StoreFuture<'a, Option<StoredFlightEntry>> {
        let key = key.clone();
        Box::pin(self.with_connection(move |connection| load_entry(connection, &key)))
    }

    fn exists<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool> {
        let key = key.clone();
        Box::pin(self.with_connection(move |connection| {
            Ok(find_entry(connection, &key)?.is_some())
        }))
    }

    fn delete<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool> {
        let key = key.clone();
        Box::pin(self.with_connection(move |connection| delete_entry(connection, &key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlightType;
    use serde_json::json;
    use tempfile::tempdir;
    use time::macros::date;

    fn key() -> StorageKey {
        StorageKey::new("SFO", FlightType::Flights, date!(2026 - 10 - 19)).expect("valid key")
    }

    #[tokio::test]
    async fn status_history_appends_only_changed_statuses() {
        let temp = tempdir().expect("tempdir");
        let store = DuckDbStore::open(temp.path().join("flights.duckdb"))
            .await
            .expect("open");
        let key = key();

        for status in ["scheduled", "scheduled", "boarding"] {
            let data = json!({"flights": [{"id": "UA1-0800", "flight_number": "UA1", "status": status}]});
            store
                .save(&key, &data, &SaveOptions::default())
                .await
                .expect("save");
        }

        let history = store.status_history(&key).await.expect("history");
        let statuses: Vec<_> = history.iter().map(|h| h.status.as_str()).collect();
        assert_eq!(statuses, vec!["scheduled", "boarding"]);
        assert_eq!(history[0].flight_number.as_deref(), Some("UA1"));
    }

    #[tokio::test]
    async fn delete_removes_entry_and_its_history() {
        let temp = tempdir().expect("tempdir");
        let store = DuckDbStore::open(temp.path().join("flights.duckdb"))
            .await
            .expect("open");
        let key = key();
        let data = json!({"flights": [{"id": "a", "status": "landed"}]});
        store
            .save(&key, &data, &SaveOptions::default())
            .await
            .expect("save");

        assert!(store.delete(&key).await.expect("delete"));
        assert!(!store.exists(&key).await.expect("exists"));
        assert!(store.status_history(&key).await.expect("history").is_empty());
        assert!(!store.delete(&key).await.expect("second delete"));
    }

    #[tokio::test]
    async fn delete_leaves_no_orphaned_history_rows() {
        let temp = tempdir().expect("tempdir");
        let store = DuckDbStore::open(temp.path().join("flights.duckdb"))
            .await
            .expect("open");
        let kept = StorageKey::new("MIA", FlightType::Flights, date!(2026 - 10 - 19)).expect("key");
        let removed = key();

        for status in ["scheduled", "boarding", "departed"] {
            let data = json!({"flights": [{"id": "a", "status": status}]});
            for key in [&kept, &removed] {
                store
                    .save(key, &data, &SaveOptions::default())
                    .await
                    .expect("save");
            }
        }
        assert!(store.delete(&removed).await.expect("delete"));

        let orphaned: i64 = store
            .with_connection(|connection| {
                connection
                    .query_row(
                        "SELECT COUNT(*) FROM flight_status_history h \
                         LEFT JOIN flights f ON f.id = h.flight_entry_id WHERE f.id IS NULL",
                        [],
                        |row| row.get(0),
                    )
                    .map_err(StorageError::from)
            })
            .await
            .expect("count");
        assert_eq!(orphaned, 0);
        assert_eq!(store.status_history(&kept).await.expect("history").len(), 3);
    }

    #[tokio::test]
    async fn test_run_keys_do_not_collide_with_production_rows() {
        let temp = tempdir().expect("tempdir");
        let store = DuckDbStore::open(temp.path().join("flights.duckdb"))
            .await
            .expect("open");
        let production = key();
        let test_run = key().for_test_run(time::OffsetDateTime::now_utc());

        store
            .save(&production, &json!({"flights": []}), &SaveOptions::default())
            .await
            .expect("save production");
        store
            .save(&test_run, &json!({"flights": [{"id": "t"}]}), &SaveOptions::default())
            .await
            .expect("save test run");

        let loaded = store
            .load(&production, &LoadOptions::default())
            .await
            .expect("load")
            .expect("present");
        assert_eq!(loaded.airport_code, "SFO");
        assert_eq!(loaded.record_count(), 0);
    }
}
