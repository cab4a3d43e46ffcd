//! Issues flagged during QC for removal from their batch.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{get_time, to_sql_time, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedIssue {
    pub batch_id: i64,
    pub issue_id: i64,
    pub flagged_by_user_id: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

fn from_row(row: &Row<'_>) -> Result<FlaggedIssue, rusqlite::Error> {
    Ok(FlaggedIssue {
        batch_id: row.get("batch_id")?,
        issue_id: row.get("issue_id")?,
        flagged_by_user_id: row.get("flagged_by_user_id")?,
        reason: row.get("reason")?,
        created_at: get_time(row, "created_at")?,
    })
}

pub fn insert(conn: &Connection, flag: &FlaggedIssue) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO batches_flagged_issues (created_at, batch_id, issue_id, flagged_by_user_id, reason)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            to_sql_time(flag.created_at),
            flag.batch_id,
            flag.issue_id,
            flag.flagged_by_user_id,
            flag.reason,
        ],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, batch_id: i64, issue_id: i64) -> Result<Option<FlaggedIssue>, DatabaseError> {
    let flag = conn
        .query_row(
            "SELECT * FROM batches_flagged_issues WHERE batch_id = ?1 AND issue_id = ?2",
            params![batch_id, issue_id],
            from_row,
        )
        .optional()?;
    Ok(flag)
}

pub fn find_for_batch(conn: &Connection, batch_id: i64) -> Result<Vec<FlaggedIssue>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM batches_flagged_issues WHERE batch_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![batch_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Removes one flag; removing a flag that does not exist is not an error.
pub fn delete(conn: &Connection, batch_id: i64, issue_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM batches_flagged_issues WHERE batch_id = ?1 AND issue_id = ?2",
        params![batch_id, issue_id],
    )?;
    Ok(())
}

pub fn delete_for_batch(conn: &Connection, batch_id: i64) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM batches_flagged_issues WHERE batch_id = ?1",
        params![batch_id],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn flag(batch_id: i64, issue_id: i64) -> FlaggedIssue {
        FlaggedIssue {
            batch_id,
            issue_id,
            flagged_by_user_id: 3,
            reason: "bad scan".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_flag_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|c| {
            insert(c, &flag(1, 10))?;
            insert(c, &flag(1, 11))?;
            insert(c, &flag(2, 12))
        })
        .unwrap();

        assert!(db.with_conn(|c| insert(c, &flag(1, 10))).is_err());
        assert_eq!(db.with_conn(|c| find_for_batch(c, 1)).unwrap().len(), 2);
        let found = db.with_conn(|c| find(c, 1, 11)).unwrap().unwrap();
        assert_eq!(found.reason, "bad scan");

        db.with_conn(|c| delete(c, 1, 11)).unwrap();
        db.with_conn(|c| delete(c, 1, 11)).unwrap();
        assert!(db.with_conn(|c| find(c, 1, 11)).unwrap().is_none());

        assert_eq!(db.with_conn(|c| delete_for_batch(c, 1)).unwrap(), 1);
        assert_eq!(db.with_conn(|c| find_for_batch(c, 2)).unwrap().len(), 1);
    }
}
