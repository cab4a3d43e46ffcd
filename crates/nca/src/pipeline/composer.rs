use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::{batch_repo, issue_repo, job_repo, pipeline_repo, Database};
use crate::error::PipelineError;
use crate::models::{Batch, BatchStatus, Issue, Job, JobStatus, ObjectType, Pipeline, WorkflowStep};

/// Puts the issue back into `AwaitingProcessing` so nobody works on it in
/// the UI, then queues `jobs` as one pipeline. Either everything is
/// written or nothing is.
pub fn queue_for_issue(
    db: &Database,
    name: &str,
    issue: &mut Issue,
    jobs: Vec<Job>,
) -> Result<Pipeline, PipelineError> {
    db.with_tx(|tx| queue_for_issue_op(tx, name, issue, jobs, Utc::now()))
}

/// Resets the batch to `pending` and queues `jobs` as one pipeline, in a
/// single transaction.
pub fn queue_for_batch(
    db: &Database,
    name: &str,
    batch: &mut Batch,
    jobs: Vec<Job>,
) -> Result<Pipeline, PipelineError> {
    db.with_tx(|tx| queue_for_batch_op(tx, name, batch, jobs, Utc::now()))
}

/// Queues jobs that are not about a single issue or batch. The first job
/// must not be issue- or batch-typed: those pipelines need their object's
/// state set up by [`queue_for_issue`] or [`queue_for_batch`].
pub fn queue_simple(db: &Database, name: &str, jobs: Vec<Job>) -> Result<Pipeline, PipelineError> {
    if let Some(first) = jobs.first() {
        if matches!(first.object_type, ObjectType::Issue | ObjectType::Batch) {
            return Err(PipelineError::TypedFirstJob(first.object_type.to_string()));
        }
    }
    db.with_tx(|tx| {
        let mut pipeline = Pipeline::new(name, name.to_string(), None, 0);
        queue_serial(tx, &mut pipeline, jobs, Utc::now())?;
        Ok(pipeline)
    })
}

pub(crate) fn queue_for_issue_op(
    conn: &Connection,
    name: &str,
    issue: &mut Issue,
    jobs: Vec<Job>,
    now: DateTime<Utc>,
) -> Result<Pipeline, PipelineError> {
    ensure_targets(&jobs, ObjectType::Issue, issue.id)?;
    issue.workflow_step = WorkflowStep::AwaitingProcessing;
    issue_repo::save(conn, issue)?;

    let description = format!("{}: issue {}", name, issue.key());
    let mut pipeline = Pipeline::new(name, description, Some(ObjectType::Issue), issue.id);
    queue_serial(conn, &mut pipeline, jobs, now)?;
    Ok(pipeline)
}

pub(crate) fn queue_for_batch_op(
    conn: &Connection,
    name: &str,
    batch: &mut Batch,
    jobs: Vec<Job>,
    now: DateTime<Utc>,
) -> Result<Pipeline, PipelineError> {
    ensure_targets(&jobs, ObjectType::Batch, batch.id)?;
    batch.transition(BatchStatus::Pending).map_err(crate::db::DatabaseError::from)?;
    batch_repo::save(conn, batch)?;

    let description = format!("{}: batch {}", name, batch.full_name());
    let mut pipeline = Pipeline::new(name, description, Some(ObjectType::Batch), batch.id);
    queue_serial(conn, &mut pipeline, jobs, now)?;
    Ok(pipeline)
}

/// Jobs of the pipeline's own object type must all point at that object.
fn ensure_targets(jobs: &[Job], object_type: ObjectType, object_id: i64) -> Result<(), PipelineError> {
    if object_id == 0 {
        return Err(PipelineError::Rejected(format!("the {} has not been saved", object_type)));
    }
    for job in jobs {
        if job.object_type == object_type && job.object_id != object_id {
            return Err(PipelineError::WrongObject {
                job_type: job.job_type.to_string(),
                object_id: job.object_id,
                expected: object_id,
            });
        }
    }
    Ok(())
}

/// Writes the pipeline row and chains `jobs` through `queue_job_id`.
///
/// Jobs are inserted last to first so each one can point at its already
/// saved successor. Every job but the first starts `on_hold`; the first is
/// `pending` and runnable at `now`.
fn queue_serial(
    conn: &Connection,
    pipeline: &mut Pipeline,
    jobs: Vec<Job>,
    now: DateTime<Utc>,
) -> Result<(), PipelineError> {
    if jobs.is_empty() {
        return Err(PipelineError::Empty);
    }

    pipeline.created_at = now;
    pipeline.started_at = Some(now);
    pipeline_repo::insert(conn, pipeline)?;

    let mut next_id = 0;
    let last = jobs.len() - 1;
    for (i, mut job) in jobs.into_iter().rev().enumerate() {
        let is_first = i == last;
        job.id = 0;
        job.pipeline_id = pipeline.id;
        job.queue_job_id = next_id;
        job.status = if is_first { JobStatus::Pending } else { JobStatus::OnHold };
        job.created_at = now;
        job.run_at = now;
        next_id = job_repo::insert(conn, &mut job)?;
    }

    tracing::debug!(pipeline_id = pipeline.id, name = %pipeline.name, first_job = next_id, "Queued pipeline");
    Ok(())
}
