//! Job records, their status model, and the args envelope.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::string_enum;

string_enum! {
    /// Every kind of work the dispatchers know how to run.
    pub enum JobType ("job type") {
        // Job-targeting
        CancelJob => "cancel_job",

        // Issue jobs
        ArchiveBackups => "archive_backups",
        BuildMets => "build_mets",
        IgnoreIssue => "ignore_issue",
        RecordIssueAction => "record_issue_action",
        MakeDerivatives => "make_derivatives",
        PrepIssuePageLabels => "prep_issue_page_labels",
        MoveDerivatives => "move_derivatives",
        PageSplit => "page_split",
        RenumberPages => "renumber_pages",
        SetIssueBackupLocation => "set_issue_original_backup_location",
        SetIssueCurated => "set_issue_curated",
        SetIssueLocation => "set_issue_location",
        SetIssueWorkflowStep => "set_issue_workflow_step",
        WriteActionLog => "write_action_log",
        FinalizeBatchFlaggedIssue => "finalize_batch_flagged_issue",

        // Batch jobs
        RecordBatchAction => "record_batch_action",
        CreateBatchStructure => "create_batch_structure",
        DeleteBatch => "delete_batch",
        EmptyBatchFlaggedIssuesList => "empty_batch_flagged_issues_list",
        MakeBatchXml => "make_batch_xml",
        MarkBatchLive => "mark_batch_live",
        SetBatchLocation => "set_batch_location",
        SetBatchStatus => "set_batch_status",
        ValidateTagManifest => "validate_tagmanifest",
        WriteBagitManifest => "write_bagit_manifest",
        OniLoadBatch => "oni_load_batch",
        OniPurgeBatch => "oni_purge_batch",
        OniWaitForJob => "oni_wait_for_job",

        // General-purpose jobs driven only by args
        CleanFiles => "clean_files",
        KillDir => "delete_directory",
        RemoveFile => "remove_file",
        RenameDir => "rename_directory",
        SyncRecursive => "sync_recursive",
        VerifyRecursive => "verify_recursive",
        MakeManifest => "make_manifest",
    }
}

string_enum! {
    pub enum JobStatus ("job status") {
        /// Waiting on a predecessor in its pipeline
        OnHold => "on_hold",
        Pending => "pending",
        InProcess => "in_process",
        Success => "success",
        Failed => "failed",
        /// Closed out: retried, renewed, or cancelled
        FailedDone => "failed_done",
    }
}

string_enum! {
    pub enum ObjectType ("object type") {
        Job => "job",
        Issue => "issue",
        Batch => "batch",
    }
}

/// Retry ceiling for most job types.
pub const DEFAULT_MAX_RETRIES: u32 = 25;

/// Derivative failures are usually deterministic, so they give up sooner.
pub const DERIVATIVE_MAX_RETRIES: u32 = 4;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

impl JobType {
    /// The kind of entity `object_id` refers to for this job type.
    pub fn object_type(&self) -> ObjectType {
        use JobType::*;
        match self {
            CancelJob => ObjectType::Job,
            ArchiveBackups | BuildMets | IgnoreIssue | RecordIssueAction | MakeDerivatives
            | PrepIssuePageLabels | MoveDerivatives | PageSplit | RenumberPages
            | SetIssueBackupLocation | SetIssueCurated | SetIssueLocation
            | SetIssueWorkflowStep | WriteActionLog | FinalizeBatchFlaggedIssue => {
                ObjectType::Issue
            }
            RecordBatchAction | CreateBatchStructure | DeleteBatch
            | EmptyBatchFlaggedIssuesList | MakeBatchXml | MarkBatchLive | SetBatchLocation
            | SetBatchStatus | ValidateTagManifest | WriteBagitManifest | OniLoadBatch
            | OniPurgeBatch | OniWaitForJob => ObjectType::Batch,
            // Args-only jobs still need a non-entity object type so that
            // queue_simple accepts them as the head of a pipeline
            CleanFiles | KillDir | RemoveFile | RenameDir | SyncRecursive | VerifyRecursive
            | MakeManifest => ObjectType::Job,
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            JobType::MakeDerivatives | JobType::PageSplit => DERIVATIVE_MAX_RETRIES,
            _ => DEFAULT_MAX_RETRIES,
        }
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::FailedDone)
    }
}

/// Delay before a retry clone becomes runnable: `1s << (retry_count + 3)`,
/// capped at 24 hours. `retry_count` is the count of the failing job.
pub fn retry_delay(retry_count: u32) -> Duration {
    let shift = retry_count.saturating_add(3);
    if shift >= 17 {
        return MAX_RETRY_DELAY;
    }
    Duration::from_secs(1u64 << shift).min(MAX_RETRY_DELAY)
}

const ARGS_PREFIX: &str = "v.2";
const LEGACY_KEY: &str = "legacy";

/// The weakly typed string map persisted in a job's `extra_data` column.
///
/// Handlers read it through the typed structs in `handlers::args`; only the
/// persistence layer and those structs touch the raw keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args(BTreeMap<String, String>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The opaque pre-envelope value, if this job predates the envelope.
    pub fn legacy(&self) -> Option<&str> {
        self.get(LEGACY_KEY)
    }

    /// Encodes to `"v.2" + JSON`. An empty map encodes to an empty string.
    pub fn encode(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        // A string map always serializes
        let json = serde_json::to_string(&self.0).unwrap_or_default();
        format!("{}{}", ARGS_PREFIX, json)
    }

    /// Decodes a stored value. Values without the envelope prefix are
    /// exposed as a single `legacy` entry.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        match raw.strip_prefix(ARGS_PREFIX) {
            Some(json) => Ok(Self(serde_json::from_str(json)?)),
            None => Ok(Self::default().with(LEGACY_KEY, raw)),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Args {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub job_type: JobType,
    pub object_type: ObjectType,
    pub object_id: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time the job may be popped.
    pub run_at: DateTime<Utc>,
    pub retry_count: u32,
    pub args: Args,
    /// Successor in the pipeline chain; 0 for the last job.
    pub queue_job_id: i64,
    pub pipeline_id: i64,
}

impl Job {
    /// Builds an unsaved job for the given object. Status starts as
    /// `pending` and `run_at` as now; the composer adjusts both.
    pub fn new(job_type: JobType, object_id: i64, args: Args) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            job_type,
            object_type: job_type.object_type(),
            object_id,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            run_at: now,
            retry_count: 0,
            args,
            queue_job_id: 0,
            pipeline_id: 0,
        }
    }

    /// Builds an args-only job with no target entity.
    pub fn general(job_type: JobType, args: Args) -> Self {
        Self::new(job_type, 0, args)
    }

    /// A fresh unsaved copy for retry or renewal: same type, target, args,
    /// chain position, and pipeline.
    pub fn clone_for_retry(&self, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            run_at: now,
            ..self.clone()
        }
    }

    pub fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }
}

string_enum! {
    pub enum JobLogLevel ("job log level") {
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
    }
}

/// One line of a job's log stream.
#[derive(Debug, Clone, PartialEq)]
pub struct JobLog {
    pub id: i64,
    pub job_id: i64,
    pub created_at: DateTime<Utc>,
    pub level: JobLogLevel,
    pub message: String,
}
