//! SQLite persistence for issues, batches, jobs and pipelines.
//!
//! All access is serialized through a `Mutex<Connection>`; every dispatcher
//! in the process shares one handle, and multi-statement work goes through
//! [`Database::with_tx`] so it commits or rolls back as a unit.
//!
//! Repository functions take a plain `&Connection` so they compose inside
//! a transaction (`Transaction` derefs to `Connection`).

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};

pub mod action_repo;
pub mod batch_repo;
pub mod error;
pub mod flagged_repo;
pub mod issue_repo;
pub mod job_repo;
pub mod migrations;
pub mod pipeline_repo;
pub mod reference_repo;

pub use error::DatabaseError;

/// The shared handle every dispatcher and CLI command works through.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled for file databases
/// so the operator CLIs can read while the job runner writes.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the database file and upgrades its schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A private, fully migrated database that lives as long as the handle.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside an immediate (write-locking) transaction. The
    /// transaction commits only when `f` returns `Ok`; any error rolls back
    /// every statement `f` executed.
    pub fn with_tx<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DatabaseError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(value)
    }
}

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Formats a timestamp for storage. The format is fixed-width so string
/// comparison in SQL matches chronological order.
pub fn to_sql_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parses a stored timestamp. Accepts the storage format as well as any
/// RFC 3339 string, so hand-edited rows still load.
pub fn parse_sql_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map(|n| n.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
        })
}

fn conversion_error(column: &str, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        format!("column {}: {}", column, reason).into(),
    )
}

/// Reads a required timestamp column.
pub(crate) fn get_time(row: &Row<'_>, column: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(column)?;
    parse_sql_time(&raw).ok_or_else(|| conversion_error(column, format!("bad timestamp {:?}", raw)))
}

/// Reads a nullable timestamp column; empty strings count as NULL.
pub(crate) fn get_opt_time(
    row: &Row<'_>,
    column: &str,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let raw: Option<String> = row.get(column)?;
    match raw {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => parse_sql_time(&s)
            .map(Some)
            .ok_or_else(|| conversion_error(column, format!("bad timestamp {:?}", s))),
    }
}

/// Reads a text column into any type implementing `FromStr`, which is how
/// the status and type enums are persisted.
pub(crate) fn get_parsed<T>(row: &Row<'_>, column: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(column)?;
    raw.parse::<T>()
        .map_err(|e| conversion_error(column, e.to_string()))
}

pub(crate) fn opt_sql_time(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(to_sql_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_db_is_migrated_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("nca.db");
        let first = Database::open(&path).unwrap();
        let version = first.with_conn(migrations::current_version).unwrap();
        assert!(version > 0);
        assert!(path.exists());
        drop(first);

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.with_conn(migrations::current_version).unwrap(), version);
        let journal: String = reopened
            .with_conn(|c| Ok(c.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(journal.to_lowercase(), "wal");
    }

    #[test]
    fn test_database_is_clone() {
        let db = Database::open_in_memory().unwrap();
        let db2 = db.clone();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO mocs (code, name) VALUES ('oru', 'Oregon')", [])?;
            Ok(())
        })
        .unwrap();
        db2.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM mocs", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.with_tx(|tx| {
            tx.execute("INSERT INTO mocs (code) VALUES ('oru')", [])?;
            Err(DatabaseError::invalid("moc", "simulated"))
        });
        assert!(result.is_err());

        let count: u32 = db
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM mocs", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_sql_time_round_trip_and_order() {
        let a = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 8).unwrap();
        let sa = to_sql_time(a);
        let sb = to_sql_time(b);
        assert_eq!(sa, "2021-03-04T05:06:07.000000Z");
        assert!(sa < sb);
        assert_eq!(parse_sql_time(&sa), Some(a));
        assert_eq!(parse_sql_time("2021-03-04T05:06:07+00:00"), Some(a));
        assert_eq!(parse_sql_time("yesterday"), None);
    }
}
