//! SQLite backend via sqlx.

use std::str::FromStr;

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::migrations::apply_sqlite_migrations;
use crate::{
    batch_ranges, status_observations, BulkInsertReport, EntryColumns, FlightEntryRow,
    FlightStore, LoadOptions, SaveOptions, StatusHistoryEntry, StorageBackend, StorageError,
    StorageKey, StoreFuture, StoredFlightEntry,
};

/// Rows committed per transaction by [`SqliteStore::bulk_insert`].
pub const SQLITE_BATCH_SIZE: usize = 50;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

type EntryRow = (String, String, String, String, String, String, String);

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to `url` (e.g. `sqlite://data/flights.db` or `sqlite::memory:`),
    /// creating the file if missing, and applies pending migrations.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is a separate database.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(DEFAULT_MAX_CONNECTIONS)
                .connect_with(options)
                .await?
        };

        apply_sqlite_migrations(&pool).await?;
        tracing::debug!(url = %url, "opened sqlite store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upserts `rows` in batches of [`SQLITE_BATCH_SIZE`], one transaction per
    /// batch. A failing batch is rolled back and reported; later batches still run.
    pub async fn bulk_insert(&self, rows: &[FlightEntryRow]) -> Result<BulkInsertReport, StorageError> {
        let mut report = BulkInsertReport::default();
        for range in batch_ranges(rows.len(), SQLITE_BATCH_SIZE) {
            let outcome = self.insert_batch(&rows[range.clone()]).await;
            report.record(range, outcome);
        }
        tracing::info!(
            rows = rows.len(),
            inserted = report.rows_inserted,
            failed_batches = report.errors.len(),
            "sqlite bulk insert finished"
        );
        Ok(report)
    }

    async fn insert_batch(&self, rows: &[FlightEntryRow]) -> Result<(), StorageError> {
        let now = crate::key::now_timestamp();
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO flights \
                 (id, airport_code, flight_type, flight_date, collection_date, data, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (airport_code, flight_type, flight_date) DO UPDATE SET \
                 collection_date = excluded.collection_date, \
                 data = excluded.data, \
                 updated_at = excluded.updated_at",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&row.airport_code)
            .bind(&row.flight_type)
            .bind(&row.flight_date)
            .bind(&row.collection_date)
            .bind(&row.data)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Recorded status transitions for the entry at `key`, oldest first.
    pub async fn status_history(
        &self,
        key: &StorageKey,
    ) -> Result<Vec<StatusHistoryEntry>, StorageError> {
        let rows: Vec<(String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT h.flight_id, h.flight_number, h.status, h.recorded_at \
             FROM flight_status_history h JOIN flights f ON f.id = h.flight_entry_id \
             WHERE f.airport_code = ? AND f.flight_type = ? AND f.flight_date = ? \
             ORDER BY h.recorded_at, h.flight_id",
        )
        .bind(key.storage_airport_code())
        .bind(key.flight_type().as_str())
        .bind(key.date_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(flight_id, flight_number, status, recorded_at)| StatusHistoryEntry {
                flight_id,
                flight_number,
                status,
                recorded_at,
            })
            .collect())
    }

    async fn find_entry(
        tx: &mut Transaction<'_, Sqlite>,
        key: &StorageKey,
    ) -> Result<Option<(String, String)>, StorageError> {
        Ok(sqlx::query_as(
            "SELECT id, created_at FROM flights \
             WHERE airport_code = ? AND flight_type = ? AND flight_date = ?",
        )
        .bind(key.storage_airport_code())
        .bind(key.flight_type().as_str())
        .bind(key.date_string())
        .fetch_optional(&mut **tx)
        .await?)
    }

    async fn record_status_changes(
        tx: &mut Transaction<'_, Sqlite>,
        entry_id: &str,
        data: &Value,
        recorded_at: &str,
    ) -> Result<usize, StorageError> {
        let mut appended = 0;
        for observation in status_observations(data) {
            let last: Option<String> = sqlx::query_scalar(
                "SELECT status FROM flight_status_history \
                 WHERE flight_entry_id = ? AND flight_id = ? \
                 ORDER BY recorded_at DESC LIMIT 1",
            )
            .bind(entry_id)
            .bind(&observation.flight_id)
            .fetch_optional(&mut **tx)
            .await?;

            if last.as_deref() == Some(observation.status.as_str()) {
                continue;
            }

            sqlx::query(
                "INSERT INTO flight_status_history \
                 (id, flight_entry_id, flight_id, flight_number, status, recorded_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(entry_id)
            .bind(&observation.flight_id)
            .bind(&observation.flight_number)
            .bind(&observation.status)
            .bind(recorded_at)
            .execute(&mut **tx)
            .await?;
            appended += 1;
        }
        Ok(appended)
    }
}

impl FlightStore for SqliteStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }

    fn save<'a>(
        &'a self,
        key: &'a StorageKey,
        data: &'a Value,
        options: &'a SaveOptions,
    ) -> StoreFuture<'a, StoredFlightEntry> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            let existing = Self::find_entry(&mut tx, key).await?;
            let (entry_id, previous_created_at) = match existing {
                Some((id, created_at)) => (id, Some(created_at)),
                None => (Uuid::new_v4().to_string(), None),
            };
            let is_update = previous_created_at.is_some();
            let entry = StoredFlightEntry::upserted(key, data, options, previous_created_at);
            let body = serde_json::to_string(&entry.data)?;

            if is_update {
                sqlx::query(
                    "UPDATE flights SET collection_date = ?, data = ?, updated_at = ? WHERE id = ?",
                )
                .bind(&entry.collection_date)
                .bind(&body)
                .bind(&entry.updated_at)
                .bind(&entry_id)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query(
                    "INSERT INTO flights \
                     (id, airport_code, flight_type, flight_date, collection_date, data, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&entry_id)
                .bind(&entry.airport_code)
                .bind(entry.flight_type.as_str())
                .bind(&entry.flight_date)
                .bind(&entry.collection_date)
                .bind(&body)
                .bind(&entry.created_at)
                .bind(&entry.updated_at)
                .execute(&mut *tx)
                .await?;
            }

            let appended =
                Self::record_status_changes(&mut tx, &entry_id, data, &entry.updated_at).await?;
            tx.commit().await?;

            tracing::debug!(key = %key, updated = is_update, status_changes = appended, "saved sqlite entry");
            Ok(entry)
        })
    }

    fn load<'a>(
        &'a self,
        key: &'a StorageKey,
        _options: &'a LoadOptions,
    ) -> StoreFuture<'a, Option<StoredFlightEntry>> {
        Box::pin(async move {
            let row: Option<EntryRow> = sqlx::query_as(
                "SELECT airport_code, flight_type, flight_date, collection_date, data, created_at, updated_at \
                 FROM flights WHERE airport_code = ? AND flight_type = ? AND flight_date = ?",
            )
            .bind(key.storage_airport_code())
            .bind(key.flight_type().as_str())
            .bind(key.date_string())
            .fetch_optional(&self.pool)
            .await?;

            row.map(
                |(airport_code, flight_type, flight_date, collection_date, data, created_at, updated_at)| {
                    StoredFlightEntry::from_columns(
                        key,
                        EntryColumns {
                            airport_code,
                            flight_type,
                            flight_date,
                            collection_date,
                            data,
                            created_at,
                            updated_at,
                        },
                    )
                },
            )
            .transpose()
        })
    }

    fn exists<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM flights \
                 WHERE airport_code = ? AND flight_type = ? AND flight_date = ?",
            )
            .bind(key.storage_airport_code())
            .bind(key.flight_type().as_str())
            .bind(key.date_string())
            .fetch_one(&self.pool)
            .await?;
            Ok(count > 0)
        })
    }

    fn delete<'a>(&'a self, key: &'a StorageKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            // History rows go with the entry through ON DELETE CASCADE.
            let result = sqlx::query(
                "DELETE FROM flights WHERE airport_code = ? AND flight_type = ? AND flight_date = ?",
            )
            .bind(key.storage_airport_code())
            .bind(key.flight_type().as_str())
            .bind(key.date_string())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}
