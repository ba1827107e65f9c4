//! Versioned schema bootstrap for the relational backends.
//!
//! Both engines share the same logical schema and indexes, with one DuckDB
//! difference. DuckDB rewrites an updated row as delete plus insert, which
//! trips foreign-key checks against the parent row. Its history table
//! therefore carries no `REFERENCES` clause, and [`crate::DuckDbStore`]
//! removes history rows itself before deleting an entry.

use ::duckdb::Connection;
use sqlx::SqlitePool;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const DUCKDB_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_flight_entries",
        sql: r#"
CREATE TABLE IF NOT EXISTS flights (
    id TEXT PRIMARY KEY,
    airport_code TEXT NOT NULL,
    flight_type TEXT NOT NULL CHECK (flight_type IN ('flights', 'departures', 'arrivals')),
    flight_date TEXT NOT NULL,
    collection_date TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (airport_code, flight_type, flight_date)
);

CREATE TABLE IF NOT EXISTS flight_status_history (
    id TEXT PRIMARY KEY,
    flight_entry_id TEXT NOT NULL,
    flight_id TEXT NOT NULL,
    flight_number TEXT,
    status TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_flights_airport_date ON flights(airport_code, flight_date);
CREATE INDEX IF NOT EXISTS idx_status_history_entry ON flight_status_history(flight_entry_id, flight_id);
"#,
    },
    Migration {
        version: "0003_collection_date_index",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_flights_collection_date ON flights(collection_date);
"#,
    },
];

const SQLITE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_flight_entries",
        sql: r#"
CREATE TABLE IF NOT EXISTS flights (
    id TEXT PRIMARY KEY,
    airport_code TEXT NOT NULL,
    flight_type TEXT NOT NULL CHECK (flight_type IN ('flights', 'departures', 'arrivals')),
    flight_date TEXT NOT NULL,
    collection_date TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (airport_code, flight_type, flight_date)
);

CREATE TABLE IF NOT EXISTS flight_status_history (
    id TEXT PRIMARY KEY,
    flight_entry_id TEXT NOT NULL REFERENCES flights(id) ON DELETE CASCADE,
    flight_id TEXT NOT NULL,
    flight_number TEXT,
    status TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_flights_airport_date ON flights(airport_code, flight_date);
CREATE INDEX IF NOT EXISTS idx_flights_collection_date ON flights(collection_date);
CREATE INDEX IF NOT EXISTS idx_status_history_entry ON flight_status_history(flight_entry_id, flight_id);
"#,
    },
];

pub fn apply_duckdb_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in DUCKDB_MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
            tracing::debug!(version = migration.version, "applied duckdb migration");
        }
    }

    Ok(())
}

pub async fn apply_sqlite_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )
    .execute(pool)
    .await?;

    for migration in SQLITE_MIGRATIONS {
        let applied_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations WHERE version = ?")
                .bind(migration.version)
                .fetch_one(pool)
                .await?;

        if applied_count == 0 {
            let mut tx = pool.begin().await?;
            sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_migrations (version) VALUES (?)")
                .bind(migration.version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::debug!(version = migration.version, "applied sqlite migration");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duckdb_migrations_are_idempotent() {
        let connection = Connection::open_in_memory().expect("in-memory duckdb");
        apply_duckdb_migrations(&connection).expect("first run");
        apply_duckdb_migrations(&connection).expect("second run");

        let versions: i64 = connection
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("count");
        assert_eq!(versions, DUCKDB_MIGRATIONS.len() as i64);
    }

    #[test]
    fn duckdb_indexes_collection_date() {
        let connection = Connection::open_in_memory().expect("in-memory duckdb");
        apply_duckdb_migrations(&connection).expect("migrate");

        let indexes: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM duckdb_indexes() WHERE index_name = 'idx_flights_collection_date'",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(indexes, 1);
    }

    #[test]
    fn duckdb_schema_rejects_unknown_flight_types() {
        let connection = Connection::open_in_memory().expect("in-memory duckdb");
        apply_duckdb_migrations(&connection).expect("migrate");

        let result = connection.execute(
            "INSERT INTO flights VALUES ('x', 'SFO', 'both', '2026-10-19', 'c', '{}', 'c', 'u')",
            [],
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sqlite_migrations_are_idempotent() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("pool");
        apply_sqlite_migrations(&pool).await.expect("first run");
        apply_sqlite_migrations(&pool).await.expect("second run");

        let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(versions, SQLITE_MIGRATIONS.len() as i64);
    }
}
