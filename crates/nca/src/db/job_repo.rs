//! Job repository: the durable queue behind every dispatcher.
//!
//! Status changes that touch more than one row (retry clones, successor
//! release, renewals) each run in a single transaction so a crash never
//! leaves a pipeline with two live copies of a job or an orphaned successor.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{get_opt_time, get_parsed, get_time, opt_sql_time, to_sql_time, Database, DatabaseError};
use crate::models::job::retry_delay;
use crate::models::{Args, Job, JobLog, JobLogLevel, JobStatus, JobType, ObjectType};

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let raw_args: String = row.get("extra_data")?;
    let args = Args::decode(&raw_args).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("column extra_data: {}", e).into(),
        )
    })?;
    let retry_count: i64 = row.get("retry_count")?;

    Ok(Job {
        id: row.get("id")?,
        job_type: get_parsed(row, "job_type")?,
        object_type: get_parsed(row, "object_type")?,
        object_id: row.get("object_id")?,
        status: get_parsed(row, "status")?,
        created_at: get_time(row, "created_at")?,
        started_at: get_opt_time(row, "started_at")?,
        completed_at: get_opt_time(row, "completed_at")?,
        run_at: get_time(row, "run_at")?,
        retry_count: retry_count.max(0) as u32,
        args,
        queue_job_id: row.get("queue_job_id")?,
        pipeline_id: row.get("pipeline_id")?,
    })
}

fn log_from_row(row: &Row<'_>) -> Result<JobLog, rusqlite::Error> {
    Ok(JobLog {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        created_at: get_time(row, "created_at")?,
        level: get_parsed(row, "log_level")?,
        message: row.get("message")?,
    })
}

/// Inserts a new job and stores the generated id on it.
pub fn insert(conn: &Connection, job: &mut Job) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (created_at, started_at, completed_at, job_type, object_type,
         object_id, status, run_at, retry_count, extra_data, queue_job_id, pipeline_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            to_sql_time(job.created_at),
            opt_sql_time(job.started_at),
            opt_sql_time(job.completed_at),
            job.job_type.as_str(),
            job.object_type.as_str(),
            job.object_id,
            job.status.as_str(),
            to_sql_time(job.run_at),
            job.retry_count,
            job.args.encode(),
            job.queue_job_id,
            job.pipeline_id,
        ],
    )?;
    job.id = conn.last_insert_rowid();
    Ok(job.id)
}

/// Creates or updates a job. Unsaved jobs (id 0) are inserted.
pub fn save(conn: &Connection, job: &mut Job) -> Result<(), DatabaseError> {
    if job.id == 0 {
        insert(conn, job)?;
        return Ok(());
    }

    let changed = conn.execute(
        "UPDATE jobs SET started_at=?2, completed_at=?3, job_type=?4, object_type=?5,
         object_id=?6, status=?7, run_at=?8, retry_count=?9, extra_data=?10,
         queue_job_id=?11, pipeline_id=?12
         WHERE id=?1",
        params![
            job.id,
            opt_sql_time(job.started_at),
            opt_sql_time(job.completed_at),
            job.job_type.as_str(),
            job.object_type.as_str(),
            job.object_id,
            job.status.as_str(),
            to_sql_time(job.run_at),
            job.retry_count,
            job.args.encode(),
            job.queue_job_id,
            job.pipeline_id,
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "job",
            id: job.id,
        });
    }
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Job>, DatabaseError> {
    let job = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row)
        .optional()?;
    Ok(job)
}

/// Like [`find_by_id`], but a missing row is an error.
pub fn get(conn: &Connection, id: i64) -> Result<Job, DatabaseError> {
    find_by_id(conn, id)?.ok_or(DatabaseError::NotFound { entity: "job", id })
}

fn query_jobs(
    conn: &Connection,
    sql: &str,
    values: impl rusqlite::Params,
) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let jobs = stmt
        .query_map(values, job_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// All jobs ever queued against an issue, batch, or job.
pub fn find_by_object(
    conn: &Connection,
    object_type: ObjectType,
    object_id: i64,
) -> Result<Vec<Job>, DatabaseError> {
    query_jobs(
        conn,
        "SELECT * FROM jobs WHERE object_type = ?1 AND object_id = ?2 ORDER BY created_at, id",
        params![object_type.as_str(), object_id],
    )
}

/// Jobs of a type created at or after `since`.
pub fn find_recent(
    conn: &Connection,
    job_type: JobType,
    since: DateTime<Utc>,
) -> Result<Vec<Job>, DatabaseError> {
    query_jobs(
        conn,
        "SELECT * FROM jobs WHERE job_type = ?1 AND created_at >= ?2 ORDER BY created_at, id",
        params![job_type.as_str(), to_sql_time(since)],
    )
}

/// Jobs in a status, optionally restricted to one type.
pub fn find_by_status_type(
    conn: &Connection,
    status: JobStatus,
    job_type: Option<JobType>,
) -> Result<Vec<Job>, DatabaseError> {
    match job_type {
        Some(t) => query_jobs(
            conn,
            "SELECT * FROM jobs WHERE status = ?1 AND job_type = ?2 ORDER BY created_at, id",
            params![status.as_str(), t.as_str()],
        ),
        None => query_jobs(
            conn,
            "SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at, id",
            params![status.as_str()],
        ),
    }
}

pub fn find_by_pipeline(conn: &Connection, pipeline_id: i64) -> Result<Vec<Job>, DatabaseError> {
    query_jobs(
        conn,
        "SELECT * FROM jobs WHERE pipeline_id = ?1 ORDER BY id",
        params![pipeline_id],
    )
}

/// Jobs still `in_process` that started before `started_before`; these
/// usually belong to a runner that died mid-handler.
pub fn find_stuck(
    conn: &Connection,
    started_before: DateTime<Utc>,
) -> Result<Vec<Job>, DatabaseError> {
    query_jobs(
        conn,
        "SELECT * FROM jobs WHERE status = ?1 AND started_at < ?2 ORDER BY started_at, id",
        params![JobStatus::InProcess.as_str(), to_sql_time(started_before)],
    )
}

/// Claims the oldest runnable job of the given types.
///
/// Runs inside an immediate transaction, so two runners can never both
/// claim the same row. Rows that cannot be decoded (unknown type, corrupt
/// args) are failed on the spot with a log line explaining why, and the
/// search continues.
pub fn pop_next(
    db: &Database,
    types: &[JobType],
    now: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    if types.is_empty() {
        return Ok(None);
    }

    let placeholders = (0..types.len())
        .map(|i| format!("?{}", i + 3))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT id FROM jobs WHERE status = ?1 AND run_at <= ?2 AND job_type IN ({})
         ORDER BY created_at, id LIMIT 1",
        placeholders
    );

    db.with_tx(|tx| loop {
        let mut values: Vec<String> = vec![JobStatus::Pending.as_str().to_string(), to_sql_time(now)];
        values.extend(types.iter().map(|t| t.as_str().to_string()));

        let id: Option<i64> = tx
            .query_row(&sql, params_from_iter(values.iter()), |r| r.get(0))
            .optional()?;
        let Some(id) = id else {
            return Ok(None);
        };

        let loaded = tx.query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row);
        let mut job = match loaded {
            Ok(job) => job,
            Err(e @ rusqlite::Error::FromSqlConversionFailure(..)) => {
                tracing::error!(job_id = id, "Unable to load job: {}", e);
                tx.execute(
                    "UPDATE jobs SET status = ?2, completed_at = ?3 WHERE id = ?1",
                    params![id, JobStatus::Failed.as_str(), to_sql_time(now)],
                )?;
                write_log(tx, id, JobLogLevel::Error, &format!("unable to load job: {}", e))?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        job.status = JobStatus::InProcess;
        job.started_at = Some(now);
        tx.execute(
            "UPDATE jobs SET status = ?2, started_at = ?3 WHERE id = ?1",
            params![job.id, job.status.as_str(), to_sql_time(now)],
        )?;
        if job.pipeline_id != 0 {
            tx.execute(
                "UPDATE pipelines SET started_at = ?2 WHERE id = ?1 AND started_at IS NULL",
                params![job.pipeline_id, to_sql_time(now)],
            )?;
        }
        return Ok(Some(job));
    })
}

/// Marks a job successful and releases its successor. When the job was the
/// last link of its pipeline, the pipeline is marked complete.
pub fn complete(db: &Database, job: &mut Job, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        job.status = JobStatus::Success;
        job.completed_at = Some(now);
        save(tx, job)?;

        if job.queue_job_id != 0 {
            let released = tx.execute(
                "UPDATE jobs SET status = ?2, run_at = ?3 WHERE id = ?1 AND status = ?4",
                params![
                    job.queue_job_id,
                    JobStatus::Pending.as_str(),
                    to_sql_time(now),
                    JobStatus::OnHold.as_str(),
                ],
            )?;
            if released == 0 {
                tracing::warn!(
                    job_id = job.id,
                    successor = job.queue_job_id,
                    "Successor job was not on hold; leaving it untouched"
                );
            }
        } else if job.pipeline_id != 0 {
            tx.execute(
                "UPDATE pipelines SET completed_at = ?2 WHERE id = ?1",
                params![job.pipeline_id, to_sql_time(now)],
            )?;
        }
        Ok(())
    })
}

/// Marks a job failed with no retry. Its successor stays on hold.
pub fn fail(db: &Database, job: &mut Job, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    job.status = JobStatus::Failed;
    job.completed_at = Some(now);
    db.with_conn(|conn| save(conn, job))
}

/// Closes out a failed attempt and queues a delayed clone with the retry
/// count bumped. Returns the clone.
pub fn fail_and_retry(db: &Database, job: &mut Job, now: DateTime<Utc>) -> Result<Job, DatabaseError> {
    let delay = TimeDelta::from_std(retry_delay(job.retry_count))
        .unwrap_or_else(|_| TimeDelta::hours(24));
    let mut clone = job.clone_for_retry(now);
    clone.retry_count = job.retry_count + 1;
    clone.run_at = now + delay;

    db.with_tx(|tx| {
        job.status = JobStatus::FailedDone;
        job.completed_at = Some(now);
        save(tx, job)?;
        insert(tx, &mut clone)?;
        repoint_predecessors(tx, job.id, clone.id)?;
        Ok(clone)
    })
}

/// Operator action: replaces a `failed` job with a fresh clone whose retry
/// count starts over.
pub fn renew(db: &Database, job: &mut Job, now: DateTime<Utc>) -> Result<Job, DatabaseError> {
    if job.status != JobStatus::Failed {
        return Err(DatabaseError::invalid(
            "job",
            format!("job {} is {}; only failed jobs can be renewed", job.id, job.status),
        ));
    }

    let mut clone = job.clone_for_retry(now);
    clone.retry_count = 0;

    db.with_tx(|tx| {
        job.status = JobStatus::FailedDone;
        save(tx, job)?;
        insert(tx, &mut clone)?;
        repoint_predecessors(tx, job.id, clone.id)?;
        Ok(clone)
    })
}

/// Renews every `failed` job. Returns the clones.
pub fn requeue_failed(db: &Database, now: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError> {
    let failed = db.with_conn(|conn| find_by_status_type(conn, JobStatus::Failed, None))?;
    let mut clones = Vec::with_capacity(failed.len());
    for mut job in failed {
        clones.push(renew(db, &mut job, now)?);
    }
    Ok(clones)
}

/// Keeps any predecessor chained to a replaced job pointed at its clone.
fn repoint_predecessors(conn: &Connection, old_id: i64, new_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET queue_job_id = ?2 WHERE queue_job_id = ?1",
        params![old_id, new_id],
    )?;
    Ok(())
}

/// Puts a job back in the queue for a later attempt without counting it as
/// a failure.
pub fn try_later(
    db: &Database,
    job: &mut Job,
    delay: Duration,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let delay = TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::hours(24));
    job.status = JobStatus::Pending;
    job.started_at = None;
    job.run_at = now + delay;
    db.with_conn(|conn| save(conn, job))
}

/// Appends a line to a job's log.
pub fn write_log(
    conn: &Connection,
    job_id: i64,
    level: JobLogLevel,
    message: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_logs (job_id, created_at, log_level, message) VALUES (?1, ?2, ?3, ?4)",
        params![job_id, to_sql_time(Utc::now()), level.as_str(), message],
    )?;
    Ok(())
}

pub fn logs(conn: &Connection, job_id: i64) -> Result<Vec<JobLog>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM job_logs WHERE job_id = ?1 ORDER BY id")?;
    let logs = stmt
        .query_map(params![job_id], log_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(logs)
}
