//! Batch repository and the multi-row batch operations.
//!
//! Every operation that touches a batch and its member issues runs in one
//! transaction; issue membership is only ever changed here.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::flagged_repo::{self, FlaggedIssue};
use super::{action_repo, get_opt_time, get_parsed, get_time, issue_repo, opt_sql_time, to_sql_time};
use super::{Database, DatabaseError};
use crate::models::action::SYSTEM_USER_ID;
use crate::models::batch::BatchError;
use crate::models::batch_name::{name_seed, random_batch_name};
use crate::models::{Action, ActionType, Batch, BatchStatus, Issue, WorkflowStep};

fn from_row(row: &Row<'_>) -> Result<Batch, rusqlite::Error> {
    Ok(Batch {
        id: row.get("id")?,
        marc_org_code: row.get("marc_org_code")?,
        name: row.get("name")?,
        created_at: get_time(row, "created_at")?,
        archived_at: get_opt_time(row, "archived_at")?,
        went_live_at: get_opt_time(row, "went_live_at")?,
        status: get_parsed(row, "status")?,
        location: row.get("location")?,
        oni_agent_job_id: row.get("oni_agent_job_id")?,
    })
}

/// Creates or updates a batch row without an action.
pub fn save(conn: &Connection, batch: &mut Batch) -> Result<(), DatabaseError> {
    if batch.id == 0 {
        conn.execute(
            "INSERT INTO batches (marc_org_code, created_at, status) VALUES (?1, ?2, ?3)",
            params![
                batch.marc_org_code,
                to_sql_time(batch.created_at),
                batch.status.as_str()
            ],
        )?;
        batch.id = conn.last_insert_rowid();
    }

    conn.execute(
        "UPDATE batches SET marc_org_code=?2, name=?3, created_at=?4, archived_at=?5,
         went_live_at=?6, status=?7, location=?8, oni_agent_job_id=?9 WHERE id=?1",
        params![
            batch.id,
            batch.marc_org_code,
            batch.name,
            to_sql_time(batch.created_at),
            opt_sql_time(batch.archived_at),
            opt_sql_time(batch.went_live_at),
            batch.status.as_str(),
            batch.location,
            batch.oni_agent_job_id,
        ],
    )?;
    Ok(())
}

pub fn save_op(conn: &Connection, batch: &mut Batch, action: Action) -> Result<(), DatabaseError> {
    save(conn, batch)?;
    let mut action = action;
    action.object_id = batch.id;
    action_repo::insert(conn, &mut action)?;
    Ok(())
}

pub fn save_with_action(db: &Database, batch: &mut Batch, action: Action) -> Result<(), DatabaseError> {
    db.with_tx(|tx| save_op(tx, batch, action))
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Batch>, DatabaseError> {
    let batch = conn
        .query_row("SELECT * FROM batches WHERE id = ?1", params![id], from_row)
        .optional()?;
    Ok(batch)
}

pub fn get(conn: &Connection, id: i64) -> Result<Batch, DatabaseError> {
    find_by_id(conn, id)?.ok_or(DatabaseError::NotFound { entity: "batch", id })
}

pub fn find_by_status(conn: &Connection, status: BatchStatus) -> Result<Vec<Batch>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM batches WHERE status = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![status.as_str()], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Built batches waiting for a staging load.
pub fn ready_for_staging(conn: &Connection) -> Result<Vec<Batch>, DatabaseError> {
    find_by_status(conn, BatchStatus::QcReady)
}

/// Batches that passed QC and can go to production.
pub fn ready_for_production(conn: &Connection) -> Result<Vec<Batch>, DatabaseError> {
    find_by_status(conn, BatchStatus::PassedQc)
}

/// Member issues. A live batch's issues are ignored by the workflow but
/// still belong to it.
pub fn issues(conn: &Connection, batch: &Batch) -> Result<Vec<Issue>, DatabaseError> {
    issue_repo::find_by_batch(conn, batch.id, batch.status.is_live())
}

/// Creates a pending batch for `moc` and assigns `issues` to it.
///
/// The batch's name is derived from its new id and the CRC32 of `webroot`,
/// so it is generated after the first insert within the same transaction.
pub fn create(
    db: &Database,
    webroot: &str,
    moc: &str,
    issues: &mut [Issue],
) -> Result<Batch, DatabaseError> {
    db.with_tx(|tx| {
        let mut batch = Batch::new(moc, Utc::now());
        save(tx, &mut batch)?;

        batch.name = random_batch_name(name_seed(batch.id, webroot));
        save(tx, &mut batch)?;

        let message = format!("added to batch {:?}", batch.name);
        for issue in issues.iter_mut() {
            if issue.marc_org_code != moc {
                return Err(DatabaseError::invalid(
                    "batch",
                    format!("issue {} has MOC {:?}, not {:?}", issue.key(), issue.marc_org_code, moc),
                ));
            }
            issue.batch_id = batch.id;
            let action = Action::for_issue(issue.id, ActionType::InternalProcess, SYSTEM_USER_ID, &message);
            issue_repo::save_op(tx, issue, action)?;
        }
        Ok(batch)
    })
}

/// Marks the batch deleted and detaches every member issue.
pub fn delete(db: &Database, batch: &mut Batch) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        batch.transition(BatchStatus::Deleted)?;
        batch.location = String::new();
        save(tx, batch)?;

        let message = format!("removed from batch {:?} - batch deleted", batch.name);
        for mut issue in issue_repo::find_by_batch(tx, batch.id, true)? {
            issue.batch_id = 0;
            let action = Action::for_issue(issue.id, ActionType::InternalProcess, SYSTEM_USER_ID, &message);
            issue_repo::save_op(tx, &mut issue, action)?;
        }
        Ok(())
    })
}

/// Marks the batch live and takes its issues out of the workflow.
pub fn set_live(db: &Database, batch: &mut Batch, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        batch.set_live(now)?;
        save(tx, batch)?;
        tx.execute(
            "UPDATE issues SET ignored = 1, workflow_step = ?2 WHERE batch_id = ?1",
            params![batch.id, WorkflowStep::InProduction.as_str()],
        )?;
        Ok(())
    })
}

/// Closes a live, long-archived batch.
pub fn close(db: &Database, batch: &mut Batch, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    batch.close(now)?;
    db.with_conn(|conn| save(conn, batch))
}

/// Same as [`close`]; the name operators know it by.
pub fn finalize(db: &Database, batch: &mut Batch, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    close(db, batch, now)
}

pub fn set_oni_agent_job_id(conn: &Connection, batch: &mut Batch, job_id: i64) -> Result<(), DatabaseError> {
    batch.oni_agent_job_id = job_id;
    conn.execute(
        "UPDATE batches SET oni_agent_job_id = ?2 WHERE id = ?1",
        params![batch.id, job_id],
    )?;
    Ok(())
}

fn ensure_member(batch: &Batch, issue: &Issue) -> Result<(), BatchError> {
    if issue.batch_id != batch.id {
        return Err(BatchError::NotMember {
            name: batch.full_name(),
            issue_id: issue.id,
        });
    }
    Ok(())
}

/// Flags an issue of a QC-rejected batch for removal.
pub fn flag_issue(
    conn: &Connection,
    batch: &Batch,
    issue: &Issue,
    user_id: i64,
    reason: &str,
) -> Result<(), DatabaseError> {
    batch.ensure_flaggable()?;
    ensure_member(batch, issue)?;
    flagged_repo::insert(
        conn,
        &FlaggedIssue {
            batch_id: batch.id,
            issue_id: issue.id,
            flagged_by_user_id: user_id,
            reason: reason.to_string(),
            created_at: Utc::now(),
        },
    )
}

pub fn unflag_issue(conn: &Connection, batch: &Batch, issue: &Issue) -> Result<(), DatabaseError> {
    batch.ensure_flaggable()?;
    ensure_member(batch, issue)?;
    flagged_repo::delete(conn, batch.id, issue.id)
}

/// Gives up on QC rejection: the batch goes back to staging untouched and
/// all flags are dropped.
pub fn abort_issue_flagging(db: &Database, batch: &mut Batch, user_id: i64) -> Result<(), DatabaseError> {
    if !matches!(batch.status, BatchStatus::FailedQc | BatchStatus::Pending) {
        return Err(BatchError::FlaggingNotAllowed {
            name: batch.full_name(),
            status: batch.status,
        }
        .into());
    }
    let mut updated = batch.clone();
    updated.status = BatchStatus::OnStaging;
    db.with_tx::<_, _, DatabaseError>(|tx| {
        let action = Action::for_batch(updated.id, ActionType::AbortBatchRejection, user_id, "");
        save_op(tx, &mut updated, action)?;
        flagged_repo::delete_for_batch(tx, updated.id)?;
        Ok(())
    })?;
    *batch = updated;
    Ok(())
}

/// Pulls one flagged issue out of its batch and marks it unfixable, with an
/// internal action and the flagging user's reason recorded against it.
pub fn remove_flagged_issue(db: &Database, issue: &mut Issue) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let batch_id = issue.batch_id;
        let flag = flagged_repo::find(tx, batch_id, issue.id)?.ok_or_else(|| {
            DatabaseError::invalid(
                "flagged issue",
                format!("issue {} is not flagged in batch {}", issue.id, batch_id),
            )
        })?;

        issue.batch_id = 0;
        issue.workflow_owner_id = 0;
        issue.workflow_owner_expires_at = None;
        issue.workflow_step = WorkflowStep::UnfixableMetadataError;
        let internal = Action::for_issue(
            issue.id,
            ActionType::InternalProcess,
            SYSTEM_USER_ID,
            "removed from batch due to errors",
        );
        issue_repo::save_op(tx, issue, internal)?;

        let mut report = Action::for_issue(
            issue.id,
            ActionType::ReportUnfixableError,
            flag.flagged_by_user_id,
            &flag.reason,
        );
        action_repo::insert(tx, &mut report)?;
        Ok(())
    })
}

/// Batch actions in chronological order.
pub fn activity_log(conn: &Connection, batch: &Batch) -> Result<Vec<Action>, DatabaseError> {
    action_repo::find_for_object(conn, crate::models::ObjectType::Batch, batch.id)
}
