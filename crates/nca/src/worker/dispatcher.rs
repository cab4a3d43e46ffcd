//! A single job-running loop.
//!
//! Dispatchers share nothing but the database: `pop_next` claims a job in
//! an immediate transaction, so any number of them can poll the same queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, info_span, warn};

use crate::db::{job_repo, Database, DatabaseError};
use crate::handlers::{self, JobContext, JobLogger, ProcessResponse};
use crate::models::{Job, JobType};
use crate::retry::{run_critical, RetryError};

pub struct Dispatcher {
    name: String,
    types: Vec<JobType>,
    ctx: JobContext,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, types: Vec<JobType>, ctx: JobContext) -> Self {
        let poll_interval = ctx.config.job_poll_interval;
        Self {
            name: name.into(),
            types,
            ctx,
            poll_interval,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claims and runs one job. Returns `None` when nothing of this
    /// dispatcher's types is runnable at `now`.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<Option<(Job, ProcessResponse)>, DatabaseError> {
        let Some(mut job) = job_repo::pop_next(&self.ctx.db, &self.types, now)? else {
            return Ok(None);
        };

        let span = info_span!("job", job_id = job.id, job_type = %job.job_type);
        let _enter = span.enter();

        debug!(object_id = job.object_id, retry = job.retry_count, "Starting job");
        let response = handlers::process(&self.ctx, &job);
        if let Err(e) = finish(&self.ctx.db, &mut job, response, Utc::now()) {
            // The job stays in_process; find_stuck is how an operator sees it
            error!(error = %e, %response, "Unable to record job outcome");
        }
        Ok(Some((job, response)))
    }

    /// Runs jobs until `stop` is set. Between empty polls the loop waits on
    /// `wake`, which the pool closes on shutdown so idle dispatchers exit at
    /// once. A running handler is always allowed to finish.
    pub fn run(&self, stop: &AtomicBool, wake: &Receiver<()>) {
        let span = info_span!("runner", runner = %self.name);
        let _enter = span.enter();
        info!(types = self.types.len(), "Dispatcher started");

        while !stop.load(Ordering::SeqCst) {
            match self.run_once(Utc::now()) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(error = %e, "Unable to fetch next job"),
            }
            match wake.recv_timeout(self.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if !stop.load(Ordering::SeqCst) {
                        std::thread::sleep(self.poll_interval);
                    }
                }
            }
        }

        info!("Dispatcher stopped");
    }
}

/// Records a handler's outcome on the job and its pipeline.
///
/// Success releases the successor. Failure is retried through a delayed
/// clone until the type's retry limit, after which the job is failed. Fatal
/// fails the job and leaves the rest of the pipeline on hold.
pub fn finish(
    db: &Database,
    job: &mut Job,
    response: ProcessResponse,
    now: DateTime<Utc>,
) -> Result<(), RetryError<DatabaseError>> {
    match response {
        ProcessResponse::Success => {
            run_critical(|| job_repo::complete(db, job, now))?;
            debug!("Job succeeded");
        }
        ProcessResponse::Failure if job.retry_count < job.job_type.max_retries() => {
            let clone = run_critical(|| job_repo::fail_and_retry(db, job, now))?;
            JobLogger::new(db, job.id).warn(format!(
                "Job failed; retry {} queued as job {} to run at {}",
                clone.retry_count,
                clone.id,
                clone.run_at.to_rfc3339()
            ));
            warn!(clone_id = clone.id, retry = clone.retry_count, "Job failed, retry queued");
        }
        ProcessResponse::Failure => {
            run_critical(|| job_repo::fail(db, job, now))?;
            JobLogger::new(db, job.id).error(format!(
                "Job failed after {} retries; giving up",
                job.retry_count
            ));
            error!("Job failed permanently");
        }
        ProcessResponse::Fatal => {
            run_critical(|| job_repo::fail(db, job, now))?;
            JobLogger::new(db, job.id).error("Job failed fatally; the rest of its pipeline stays on hold");
            error!("Job failed fatally");
        }
        ProcessResponse::TryLater(delay) => {
            run_critical(|| job_repo::try_later(db, job, delay, now))?;
            debug!(delay_secs = delay.as_secs(), "Job will try again later");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{issue_repo, pipeline_repo};
    use crate::handlers::args::{LocationArgs, TransferArgs, WorkflowStepArgs};
    use crate::handlers::tests::context;
    use crate::models::{Args, Issue, JobLogLevel, JobStatus, WorkflowStep};
    use crate::pipeline::{queue_for_issue, queue_simple};
    use crate::worker::RunnerGroup;
    use chrono::TimeZone;

    fn all_types() -> Vec<JobType> {
        JobType::ALL.to_vec()
    }

    fn jobs_of(db: &Database, pipeline_id: i64) -> Vec<Job> {
        let mut jobs = db
            .with_conn(|conn| job_repo::find_by_pipeline(conn, pipeline_id))
            .unwrap();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut issue = Issue::new("oru", "sn83025138", "1899-12-30", 1);
        ctx.db.with_conn(|conn| issue_repo::save(conn, &mut issue)).unwrap();

        let jobs = vec![
            Job::new(JobType::SetIssueLocation, issue.id, LocationArgs::new("/nca/x").to_args()),
            Job::new(
                JobType::SetIssueWorkflowStep,
                issue.id,
                WorkflowStepArgs {
                    step: WorkflowStep::ReadyForMetadataEntry,
                }
                .to_args(),
            ),
        ];
        let pipeline = queue_for_issue(&ctx.db, "test", &mut issue, jobs).unwrap();

        let dispatcher = Dispatcher::new("metadata", RunnerGroup::Metadata.job_types(), ctx.clone());
        let (first, r) = dispatcher.run_once(Utc::now()).unwrap().unwrap();
        assert_eq!(r, ProcessResponse::Success);
        assert_eq!(first.job_type, JobType::SetIssueLocation);
        let (second, _) = dispatcher.run_once(Utc::now()).unwrap().unwrap();
        assert_eq!(second.job_type, JobType::SetIssueWorkflowStep);
        assert!(dispatcher.run_once(Utc::now()).unwrap().is_none());

        assert!(jobs_of(&ctx.db, pipeline.id)
            .iter()
            .all(|j| j.status == JobStatus::Success));
        let pipeline = ctx
            .db
            .with_conn(|conn| pipeline_repo::find_by_id(conn, pipeline.id))
            .unwrap()
            .unwrap();
        assert!(pipeline.completed_at.is_some());

        let issue = ctx.db.with_conn(|conn| issue_repo::get(conn, issue.id)).unwrap();
        assert_eq!(issue.location, "/nca/x");
        assert_eq!(issue.workflow_step, WorkflowStep::ReadyForMetadataEntry);
    }

    #[test]
    fn test_other_types_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        queue_simple(&ctx.db, "kill", vec![Job::general(JobType::KillDir, Args::new())]).unwrap();

        let oni = Dispatcher::new("oni", RunnerGroup::Oni.job_types(), ctx.clone());
        assert!(oni.run_once(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_failure_queues_delayed_retry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let missing = dir.path().join("missing");
        let rename = Job::general(
            JobType::RenameDir,
            TransferArgs::new(&missing, dir.path().join("dest")).to_args(),
        );
        let pipeline = queue_simple(&ctx.db, "rename", vec![rename]).unwrap();

        let dispatcher = Dispatcher::new("all", all_types(), ctx.clone());
        let now = Utc::now();
        let (job, r) = dispatcher.run_once(now).unwrap().unwrap();
        assert_eq!(r, ProcessResponse::Failure);
        assert_eq!(job.status, JobStatus::FailedDone);

        let jobs = jobs_of(&ctx.db, pipeline.id);
        assert_eq!(jobs.len(), 2);
        let clone = &jobs[1];
        assert_eq!(clone.status, JobStatus::Pending);
        assert_eq!(clone.retry_count, 1);
        assert!(clone.run_at > now);

        // The clone isn't runnable until its delay passes
        assert!(dispatcher.run_once(now).unwrap().is_none());
    }

    #[test]
    fn test_failure_past_retry_limit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut rename = Job::general(
            JobType::RenameDir,
            TransferArgs::new(dir.path().join("missing"), dir.path().join("dest")).to_args(),
        );
        rename.retry_count = JobType::RenameDir.max_retries();
        let pipeline = queue_simple(&ctx.db, "rename", vec![rename]).unwrap();

        let dispatcher = Dispatcher::new("all", all_types(), ctx.clone());
        let (job, r) = dispatcher.run_once(Utc::now()).unwrap().unwrap();
        assert_eq!(r, ProcessResponse::Failure);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(jobs_of(&ctx.db, pipeline.id).len(), 1);
    }

    #[test]
    fn test_fatal_holds_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let jobs = vec![
            Job::general(JobType::KillDir, Args::new()),
            Job::general(JobType::KillDir, LocationArgs::new("/nowhere").to_args()),
        ];
        let pipeline = queue_simple(&ctx.db, "broken", jobs).unwrap();

        let dispatcher = Dispatcher::new("all", all_types(), ctx.clone());
        let (_, r) = dispatcher.run_once(Utc::now()).unwrap().unwrap();
        assert_eq!(r, ProcessResponse::Fatal);
        assert!(dispatcher.run_once(Utc::now()).unwrap().is_none());

        let jobs = jobs_of(&ctx.db, pipeline.id);
        let statuses: Vec<JobStatus> = jobs.iter().map(|j| j.status).collect();
        // Inserted last to first
        assert_eq!(statuses, vec![JobStatus::OnHold, JobStatus::Failed]);

        let logs = ctx.db.with_conn(|conn| job_repo::logs(conn, jobs[1].id)).unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.level, JobLogLevel::Error);
        assert!(last.message.contains("failed fatally"));
    }

    #[test]
    fn test_try_later_requeues_without_clone() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let pipeline = queue_simple(&ctx.db, "wait", vec![Job::general(JobType::KillDir, Args::new())]).unwrap();
        let mut job = jobs_of(&ctx.db, pipeline.id).remove(0);

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        finish(&ctx.db, &mut job, ProcessResponse::TryLater(Duration::from_secs(30)), now).unwrap();
        let jobs = jobs_of(&ctx.db, pipeline.id);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].run_at, now + chrono::TimeDelta::seconds(30));
        assert_eq!(jobs[0].retry_count, 0);
    }
}
