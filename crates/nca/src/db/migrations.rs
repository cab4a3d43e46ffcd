//! Embedded schema migrations for the NCA database.
//!
//! Applied versions are recorded in `_migrations`. Each pending step runs
//! together with its bookkeeping row in one transaction, so an interrupted
//! upgrade is retried from the failed step on the next open. Added columns
//! are skipped when a hand-built database already has them.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
    /// `(table, column)` this step adds; the step is recorded without
    /// running when the column is already there.
    adds_column: Option<(&'static str, &'static str)>,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "create_reference_tables",
        sql: include_str!("sql/001_create_reference_tables.sql"),
        adds_column: None,
    },
    Step {
        version: 2,
        name: "create_workflow_tables",
        sql: include_str!("sql/002_create_workflow_tables.sql"),
        adds_column: None,
    },
    Step {
        version: 3,
        name: "create_job_tables",
        sql: include_str!("sql/003_create_job_tables.sql"),
        adds_column: None,
    },
    Step {
        version: 4,
        name: "add_batch_went_live_at",
        sql: include_str!("sql/004_add_batch_went_live_at.sql"),
        adds_column: Some(("batches", "went_live_at")),
    },
];

const BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);";

/// Brings the schema up to the newest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(BOOKKEEPING)?;
    let applied = current_version(conn)?;

    for step in STEPS.iter().filter(|s| s.version > applied) {
        let skip = match step.adds_column {
            Some((table, column)) => column_exists(conn, table, column)?,
            None => false,
        };
        if skip {
            log::info!("Schema v{} ({}) already present, recording only", step.version, step.name);
        } else {
            log::info!("Applying schema v{}: {}", step.version, step.name);
        }
        apply(conn, step, skip)?;
    }

    Ok(())
}

fn apply(conn: &Connection, step: &Step, record_only: bool) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: step.version,
        reason: e.to_string(),
    };

    conn.execute_batch("BEGIN IMMEDIATE").map_err(failed)?;
    let result = (|| {
        if !record_only {
            conn.execute_batch(step.sql)?;
        }
        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![step.version, step.name],
        )?;
        Ok::<_, rusqlite::Error>(())
    })();

    match result {
        Ok(()) => conn.execute_batch("COMMIT").map_err(failed),
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::error!("Rollback of schema v{} failed: {}", step.version, rollback);
            }
            Err(failed(e))
        }
    }
}

/// Highest applied schema version, 0 for a new database.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| r.get(0))?;
    Ok(version)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("refusing to inspect table {:?}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("SELECT name FROM pragma_table_info('{}')", table))?;
    let mut names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(names.any(|name| matches!(name, Ok(n) if n == column)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    fn recorded(conn: &Connection) -> u32 {
        conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_new_database_reaches_latest() {
        let conn = fresh();
        assert!(run_all(&conn).is_ok());
        assert_eq!(current_version(&conn).unwrap(), STEPS.len() as u32);
        assert_eq!(recorded(&conn), STEPS.len() as u32);

        // Second open is a no-op
        run_all(&conn).unwrap();
        assert_eq!(recorded(&conn), STEPS.len() as u32);
    }

    #[test]
    fn test_existing_column_is_only_recorded() {
        let conn = fresh();
        conn.execute_batch(BOOKKEEPING).unwrap();
        for step in &STEPS[..3] {
            apply(&conn, step, false).unwrap();
        }
        conn.execute_batch("ALTER TABLE batches ADD COLUMN went_live_at TEXT;")
            .unwrap();

        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 4);
        assert!(column_exists(&conn, "batches", "went_live_at").unwrap());
    }

    #[test]
    fn test_failed_step_leaves_no_record() {
        let conn = fresh();
        conn.execute_batch(BOOKKEEPING).unwrap();
        let broken = Step {
            version: 99,
            name: "broken",
            sql: "CREATE TABLE ok_then (id INTEGER); THIS IS NOT SQL;",
            adds_column: None,
        };
        let err = apply(&conn, &broken, false).unwrap_err();
        assert!(matches!(err, DatabaseError::Migration { version: 99, .. }));
        assert_eq!(recorded(&conn), 0);
        assert!(!column_exists(&conn, "ok_then", "id").unwrap());
    }

    #[test]
    fn test_column_lookup_rejects_odd_table_names() {
        let conn = fresh();
        run_all(&conn).unwrap();
        assert!(column_exists(&conn, "jobs", "pipeline_id").unwrap());
        assert!(!column_exists(&conn, "jobs", "nope").unwrap());
        assert!(column_exists(&conn, "jobs; DROP TABLE jobs", "id").is_err());
    }

    #[test]
    fn test_active_issue_keys_are_unique() {
        let conn = fresh();
        run_all(&conn).unwrap();

        let insert = "INSERT INTO issues (lccn, date, edition, workflow_step, ignored)
                      VALUES ('sn12345678', '2020-01-02', 1, 'AwaitingProcessing', ?1)";
        conn.execute(insert, [0]).unwrap();
        assert!(conn.execute(insert, [0]).is_err());

        // An ignored duplicate is allowed
        conn.execute(insert, [1]).unwrap();
    }
}
