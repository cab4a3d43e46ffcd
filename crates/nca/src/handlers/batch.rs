//! Batch lifecycle jobs and the job-targeting cancel.

use super::{OrRespond, ProcessResponse, Run, Step};
use crate::db::{batch_repo, flagged_repo, job_repo, DatabaseError};
use crate::models::JobStatus;

/// Closes out a job that is waiting or has failed for good. Running or
/// finished jobs can't be cancelled.
pub(super) fn cancel_job(run: &Run<'_>) -> Step {
    let mut target = run.target_job()?;
    if !matches!(target.status, JobStatus::OnHold | JobStatus::Failed) {
        run.log.error(format!(
            "Job {} is {}; only on-hold or failed jobs can be cancelled",
            target.id, target.status
        ));
        return Err(ProcessResponse::Fatal);
    }

    run.log.info(format!("Cancelling job {} ({})", target.id, target.job_type));
    target.status = JobStatus::FailedDone;
    target.completed_at = Some(run.now());
    run.db()
        .with_conn(|conn| job_repo::save(conn, &mut target))
        .or_failure(&run.log, &format!("Unable to cancel job {}", target.id))
}

pub(super) fn mark_batch_live(run: &Run<'_>) -> Step {
    let mut batch = run.batch()?;
    match batch_repo::set_live(run.db(), &mut batch, run.now()) {
        Ok(()) => {
            run.log.info(format!("Batch {} is live", batch.full_name()));
            Ok(())
        }
        Err(e @ DatabaseError::Batch(_)) => Err(e).or_fatal(&run.log, "Unable to mark batch live"),
        Err(e) => Err(e).or_failure(&run.log, "Unable to mark batch live"),
    }
}

/// Deletes the batch record's membership; files are handled by the jobs
/// around this one.
pub(super) fn delete_batch(run: &Run<'_>) -> Step {
    let mut batch = run.batch()?;
    match batch_repo::delete(run.db(), &mut batch) {
        Ok(()) => {
            run.log.info(format!("Batch {} deleted", batch.full_name()));
            Ok(())
        }
        Err(e @ DatabaseError::Batch(_)) => Err(e).or_fatal(&run.log, "Unable to delete batch"),
        Err(e) => Err(e).or_failure(&run.log, "Unable to delete batch"),
    }
}

pub(super) fn empty_batch_flagged_issues_list(run: &Run<'_>) -> Step {
    let batch = run.batch()?;
    let removed = run
        .db()
        .with_conn(|conn| flagged_repo::delete_for_batch(conn, batch.id))
        .or_failure(&run.log, "Unable to clear flagged issues")?;
    run.log.info(format!("Cleared {} flagged issue(s) from batch {}", removed, batch.id));
    Ok(())
}

/// Takes a QC-flagged issue out of its batch and marks it unfixable, with
/// the flagger's reason copied into the issue's history.
pub(super) fn finalize_batch_flagged_issue(run: &Run<'_>) -> Step {
    let mut issue = run.issue()?;
    let batch_id = issue.batch_id;
    match batch_repo::remove_flagged_issue(run.db(), &mut issue) {
        Ok(()) => {
            run.log.info(format!("Removed issue {} from batch {}", issue.id, batch_id));
            Ok(())
        }
        Err(e @ DatabaseError::InvalidState { .. }) => {
            Err(e).or_fatal(&run.log, "Unable to finalize flagged issue")
        }
        Err(e) => Err(e).or_failure(&run.log, "Unable to finalize flagged issue"),
    }
}
