//! Job handlers.
//!
//! [`process`] resolves a job's handler from its type, runs it, and turns
//! the outcome into a [`ProcessResponse`] for the dispatcher. Handlers never
//! return errors across that boundary: every problem is written to the job's
//! log stream first and then mapped to `Failure` (retry), `Fatal` (stop), or
//! `TryLater` (poll again without counting a failure).

pub mod args;
mod batch;
mod derivatives;
mod fs;
mod metadata;
mod oni;
mod packaging;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use self::args::AgentEnv;
use crate::config::Config;
use crate::db::{batch_repo, issue_repo, job_repo, Database, DatabaseError};
use crate::models::{Batch, Issue, Job, JobLogLevel, JobType};
use crate::oni::OniAgent;

/// What the dispatcher should do with a job after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResponse {
    Success,
    /// Possibly transient; retried with backoff up to the type's limit.
    Failure,
    /// Precondition or invariant violation; never retried.
    Fatal,
    /// Not done yet; requeue after the delay without a retry clone.
    TryLater(Duration),
}

impl fmt::Display for ProcessResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessResponse::Success => f.write_str("success"),
            ProcessResponse::Failure => f.write_str("failure"),
            ProcessResponse::Fatal => f.write_str("fatal"),
            ProcessResponse::TryLater(d) => write!(f, "try later ({}s)", d.as_secs()),
        }
    }
}

/// Builds an ONI client for an environment, or `None` when that
/// environment has no agent configured.
pub type AgentFactory = Arc<dyn Fn(AgentEnv) -> Option<OniAgent> + Send + Sync>;

/// Everything a handler may touch besides the job itself.
#[derive(Clone)]
pub struct JobContext {
    pub db: Database,
    pub config: Arc<Config>,
    agents: AgentFactory,
}

impl JobContext {
    /// A context whose ONI clients talk to the agents named in `config`.
    pub fn new(db: Database, config: Arc<Config>) -> Self {
        let lookup = config.clone();
        let agents: AgentFactory = Arc::new(move |env: AgentEnv| {
            lookup
                .agent_for(env.as_str())
                .map(|conn| OniAgent::over_ssh(conn.clone()))
        });
        Self { db, config, agents }
    }

    pub fn with_agents(mut self, agents: AgentFactory) -> Self {
        self.agents = agents;
        self
    }

    pub fn agent(&self, env: AgentEnv) -> Option<OniAgent> {
        (self.agents)(env)
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Writes a job's log lines to `job_logs` and mirrors them to `tracing`.
pub struct JobLogger<'a> {
    db: &'a Database,
    job_id: i64,
}

impl<'a> JobLogger<'a> {
    pub fn new(db: &'a Database, job_id: i64) -> Self {
        Self { db, job_id }
    }

    fn write(&self, level: JobLogLevel, message: &str) {
        match level {
            JobLogLevel::Debug => tracing::debug!(job_id = self.job_id, "{}", message),
            JobLogLevel::Info => tracing::info!(job_id = self.job_id, "{}", message),
            JobLogLevel::Warn => tracing::warn!(job_id = self.job_id, "{}", message),
            JobLogLevel::Error => tracing::error!(job_id = self.job_id, "{}", message),
        }
        // Losing a log line must not change the job's outcome
        if let Err(e) = self
            .db
            .with_conn(|conn| job_repo::write_log(conn, self.job_id, level, message))
        {
            tracing::warn!(job_id = self.job_id, error = %e, "Unable to store job log line");
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.write(JobLogLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(JobLogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write(JobLogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(JobLogLevel::Error, message.as_ref());
    }
}

/// A handler either completes or stops early with the response to record.
pub(crate) type Step<T = ()> = Result<T, ProcessResponse>;

/// Logs an error and converts it into the response a handler stops with.
pub(crate) trait OrRespond<T> {
    fn or_failure(self, log: &JobLogger<'_>, what: &str) -> Step<T>;
    fn or_fatal(self, log: &JobLogger<'_>, what: &str) -> Step<T>;
}

impl<T, E: fmt::Display> OrRespond<T> for Result<T, E> {
    fn or_failure(self, log: &JobLogger<'_>, what: &str) -> Step<T> {
        self.map_err(|e| {
            log.error(format!("{}: {}", what, e));
            ProcessResponse::Failure
        })
    }

    fn or_fatal(self, log: &JobLogger<'_>, what: &str) -> Step<T> {
        self.map_err(|e| {
            log.error(format!("{}: {}", what, e));
            ProcessResponse::Fatal
        })
    }
}

/// One handler invocation: the job, its context, and its logger.
pub(crate) struct Run<'a> {
    pub ctx: &'a JobContext,
    pub job: &'a Job,
    pub log: JobLogger<'a>,
}

impl<'a> Run<'a> {
    fn new(ctx: &'a JobContext, job: &'a Job) -> Self {
        Self {
            ctx,
            job,
            log: JobLogger::new(&ctx.db, job.id),
        }
    }

    pub fn db(&self) -> &Database {
        &self.ctx.db
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Maps a load failure: a missing row is permanent, anything else may be
    /// a transient database problem.
    fn load_failed(&self, entity: &str, e: DatabaseError) -> ProcessResponse {
        match e {
            DatabaseError::NotFound { .. } => {
                self.log.error(format!("{} {} does not exist", entity, self.job.object_id));
                ProcessResponse::Fatal
            }
            other => {
                self.log
                    .error(format!("Unable to load {} {}: {}", entity, self.job.object_id, other));
                ProcessResponse::Failure
            }
        }
    }

    /// Loads the issue this job targets.
    pub fn issue(&self) -> Step<Issue> {
        self.db()
            .with_conn(|conn| issue_repo::get(conn, self.job.object_id))
            .map_err(|e| self.load_failed("issue", e))
    }

    /// Loads the batch this job targets.
    pub fn batch(&self) -> Step<Batch> {
        self.db()
            .with_conn(|conn| batch_repo::get(conn, self.job.object_id))
            .map_err(|e| self.load_failed("batch", e))
    }

    /// Loads the job this job targets.
    pub fn target_job(&self) -> Step<Job> {
        self.db()
            .with_conn(|conn| job_repo::get(conn, self.job.object_id))
            .map_err(|e| self.load_failed("job", e))
    }

    pub fn save_issue(&self, issue: &mut Issue) -> Step {
        self.db()
            .with_conn(|conn| issue_repo::save(conn, issue))
            .or_failure(&self.log, &format!("Unable to save issue {}", issue.id))
    }

    pub fn save_batch(&self, batch: &mut Batch) -> Step {
        self.db()
            .with_conn(|conn| batch_repo::save(conn, batch))
            .or_failure(&self.log, &format!("Unable to save batch {}", batch.id))
    }
}

/// Runs the handler for `job` and reports what the dispatcher should do
/// with it.
pub fn process(ctx: &JobContext, job: &Job) -> ProcessResponse {
    let run = Run::new(ctx, job);
    let result = dispatch(&run);
    let response = match result {
        Ok(()) => ProcessResponse::Success,
        Err(response) => response,
    };
    tracing::debug!(job_id = job.id, job_type = %job.job_type, %response, "Handler finished");
    response
}

fn dispatch(run: &Run<'_>) -> Step {
    use JobType::*;
    match run.job.job_type {
        CancelJob => batch::cancel_job(run),

        SetIssueWorkflowStep => metadata::set_issue_workflow_step(run),
        SetIssueBackupLocation => metadata::set_issue_backup_location(run),
        SetIssueLocation => metadata::set_issue_location(run),
        IgnoreIssue => metadata::ignore_issue(run),
        SetIssueCurated => metadata::set_issue_curated(run),
        PrepIssuePageLabels => metadata::prep_issue_page_labels(run),
        RecordIssueAction => metadata::record_issue_action(run),
        SetBatchStatus => metadata::set_batch_status(run),
        SetBatchLocation => metadata::set_batch_location(run),
        RecordBatchAction => metadata::record_batch_action(run),

        SyncRecursive => fs::sync_recursive(run),
        VerifyRecursive => fs::verify_recursive(run),
        KillDir => fs::kill_dir(run),
        RenameDir => fs::rename_dir(run),
        CleanFiles => fs::clean_files(run),
        RemoveFile => fs::remove_file(run),
        MakeManifest => fs::make_manifest(run),

        PageSplit => derivatives::page_split(run),
        MakeDerivatives => derivatives::make_derivatives(run),
        MoveDerivatives => derivatives::move_derivatives(run),
        RenumberPages => derivatives::renumber_pages(run),

        BuildMets => packaging::build_mets(run),
        ArchiveBackups => packaging::archive_backups(run),
        WriteActionLog => packaging::write_action_log(run),
        CreateBatchStructure => packaging::create_batch_structure(run),
        MakeBatchXml => packaging::make_batch_xml(run),
        WriteBagitManifest => packaging::write_bagit_manifest(run),
        ValidateTagManifest => packaging::validate_tag_manifest(run),

        MarkBatchLive => batch::mark_batch_live(run),
        DeleteBatch => batch::delete_batch(run),
        EmptyBatchFlaggedIssuesList => batch::empty_batch_flagged_issues_list(run),
        FinalizeBatchFlaggedIssue => batch::finalize_batch_flagged_issue(run),

        OniLoadBatch => oni::load_batch(run),
        OniPurgeBatch => oni::purge_batch(run),
        OniWaitForJob => oni::wait_for_job(run),
    }
}
