//! Issue repository.
//!
//! `save` is the single entry point for persisting an issue: it writes the
//! row, assigns the human name the first time an id exists, and stores the
//! page labels as CSV.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{action_repo, get_opt_time, get_parsed, opt_sql_time, Database, DatabaseError};
use crate::models::{Action, Issue, WorkflowStep};

fn from_row(row: &Row<'_>) -> Result<Issue, rusqlite::Error> {
    let edition: i64 = row.get("edition")?;
    let page_count: i64 = row.get("page_count")?;
    let labels: String = row.get("page_labels_csv")?;

    let mut issue = Issue {
        id: row.get("id")?,
        marc_org_code: row.get("marc_org_code")?,
        lccn: row.get("lccn")?,
        date: row.get("date")?,
        date_as_labeled: row.get("date_as_labeled")?,
        volume: row.get("volume")?,
        issue: row.get("issue")?,
        edition: edition.max(0) as u32,
        edition_label: row.get("edition_label")?,
        page_labels: Vec::new(),
        page_count: page_count.max(0) as u32,
        location: row.get("location")?,
        backup_location: row.get("backup_location")?,
        human_name: row.get("human_name")?,
        is_from_scanner: row.get("is_from_scanner")?,
        workflow_step: get_parsed(row, "workflow_step")?,
        workflow_owner_id: row.get("workflow_owner_id")?,
        workflow_owner_expires_at: get_opt_time(row, "workflow_owner_expires_at")?,
        metadata_entry_user_id: row.get("metadata_entry_user_id")?,
        metadata_entered_at: get_opt_time(row, "metadata_entered_at")?,
        reviewed_by_user_id: row.get("reviewed_by_user_id")?,
        metadata_approved_at: get_opt_time(row, "metadata_approved_at")?,
        rejected_by_user_id: row.get("rejected_by_user_id")?,
        batch_id: row.get("batch_id")?,
        ignored: row.get("ignored")?,
        draft_comment: row.get("draft_comment")?,
    };
    issue.set_page_labels_csv(&labels);
    issue.ensure_human_name();
    Ok(issue)
}

/// Creates or updates an issue without recording an action. Use sparingly;
/// the action log is how curators see what happened to an issue.
pub fn save(conn: &Connection, issue: &mut Issue) -> Result<(), DatabaseError> {
    if issue.id == 0 {
        conn.execute(
            "INSERT INTO issues (lccn, date, edition, ignored, workflow_step)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                issue.lccn,
                issue.date,
                issue.edition,
                issue.ignored,
                issue.workflow_step.as_str()
            ],
        )?;
        issue.id = conn.last_insert_rowid();
    }
    issue.ensure_human_name();

    conn.execute(
        "UPDATE issues SET marc_org_code=?2, lccn=?3, date=?4, date_as_labeled=?5, volume=?6,
         issue=?7, edition=?8, edition_label=?9, page_labels_csv=?10, page_count=?11,
         location=?12, backup_location=?13, is_from_scanner=?14, workflow_step=?15,
         workflow_owner_id=?16, workflow_owner_expires_at=?17, metadata_entry_user_id=?18,
         reviewed_by_user_id=?19, rejected_by_user_id=?20, metadata_entered_at=?21,
         metadata_approved_at=?22, batch_id=?23, ignored=?24, draft_comment=?25, human_name=?26
         WHERE id=?1",
        params![
            issue.id,
            issue.marc_org_code,
            issue.lccn,
            issue.date,
            issue.date_as_labeled,
            issue.volume,
            issue.issue,
            issue.edition,
            issue.edition_label,
            issue.page_labels_csv(),
            issue.page_count,
            issue.location,
            issue.backup_location,
            issue.is_from_scanner,
            issue.workflow_step.as_str(),
            issue.workflow_owner_id,
            opt_sql_time(issue.workflow_owner_expires_at),
            issue.metadata_entry_user_id,
            issue.reviewed_by_user_id,
            issue.rejected_by_user_id,
            opt_sql_time(issue.metadata_entered_at),
            opt_sql_time(issue.metadata_approved_at),
            issue.batch_id,
            issue.ignored,
            issue.draft_comment,
            issue.human_name,
        ],
    )?;
    Ok(())
}

/// Saves an issue and its audit action on the given connection. Callers
/// already inside a transaction use this directly.
pub fn save_op(conn: &Connection, issue: &mut Issue, action: Action) -> Result<(), DatabaseError> {
    save(conn, issue)?;
    let mut action = action;
    action.object_id = issue.id;
    action_repo::insert(conn, &mut action)?;
    Ok(())
}

/// Saves an issue together with its action in one transaction.
pub fn save_with_action(db: &Database, issue: &mut Issue, action: Action) -> Result<(), DatabaseError> {
    db.with_tx(|tx| save_op(tx, issue, action))
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Issue>, DatabaseError> {
    let issue = conn
        .query_row("SELECT * FROM issues WHERE id = ?1", params![id], from_row)
        .optional()?;
    Ok(issue)
}

pub fn get(conn: &Connection, id: i64) -> Result<Issue, DatabaseError> {
    find_by_id(conn, id)?.ok_or(DatabaseError::NotFound { entity: "issue", id })
}

fn query_issues(
    conn: &Connection,
    sql: &str,
    values: impl rusqlite::Params,
) -> Result<Vec<Issue>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(values, from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Non-ignored issues matching an `lccn`, `YYYY-MM-DD` date and edition.
pub fn find_by_key(
    conn: &Connection,
    lccn: &str,
    date: &str,
    edition: u32,
) -> Result<Option<Issue>, DatabaseError> {
    let issue = conn
        .query_row(
            "SELECT * FROM issues WHERE lccn = ?1 AND date = ?2 AND edition = ?3 AND ignored = 0",
            params![lccn, date, edition],
            from_row,
        )
        .optional()?;
    Ok(issue)
}

/// Non-ignored issues currently in a workflow step.
pub fn find_in_step(conn: &Connection, step: WorkflowStep) -> Result<Vec<Issue>, DatabaseError> {
    query_issues(
        conn,
        "SELECT * FROM issues WHERE workflow_step = ?1 AND ignored = 0 ORDER BY id",
        params![step.as_str()],
    )
}

/// Issues ready for batching: approved, METS built, not yet on a batch.
pub fn find_ready_for_batching(conn: &Connection) -> Result<Vec<Issue>, DatabaseError> {
    query_issues(
        conn,
        "SELECT * FROM issues WHERE workflow_step = ?1 AND batch_id = 0 AND ignored = 0 ORDER BY id",
        params![WorkflowStep::ReadyForBatching.as_str()],
    )
}

/// Members of a batch. Live batches' issues are ignored by the workflow, so
/// `include_ignored` must be set to see them.
pub fn find_by_batch(
    conn: &Connection,
    batch_id: i64,
    include_ignored: bool,
) -> Result<Vec<Issue>, DatabaseError> {
    if include_ignored {
        query_issues(
            conn,
            "SELECT * FROM issues WHERE batch_id = ?1 ORDER BY id",
            params![batch_id],
        )
    } else {
        query_issues(
            conn,
            "SELECT * FROM issues WHERE batch_id = ?1 AND ignored = 0 ORDER BY id",
            params![batch_id],
        )
    }
}

/// Issues of closed batches that still occupy disk space.
pub fn find_completed_for_removal(conn: &Connection) -> Result<Vec<Issue>, DatabaseError> {
    query_issues(
        conn,
        "SELECT * FROM issues WHERE batch_id IN (SELECT id FROM batches WHERE status = 'live_done')
         AND ignored = 1 AND location <> '' ORDER BY id",
        [],
    )
}
