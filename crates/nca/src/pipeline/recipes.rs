//! The fixed job sequences behind each business operation.
//!
//! Every function here validates its preconditions, builds the job list,
//! and hands it to the composer, so a rejected request never leaves jobs
//! behind.

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::composer::{queue_for_batch, queue_for_batch_op, queue_for_issue, queue_for_issue_op};
use crate::config::Config;
use crate::db::{action_repo, flagged_repo, Database};
use crate::error::PipelineError;
use crate::handlers::args::{
    AgentEnv, BatchStatusArgs, ForcedArgs, LocationArgs, TransferArgs, WorkflowStepArgs,
};
use crate::models::{Action, ActionType, Args, Batch, BatchStatus, Issue, Job, JobType, Pipeline, WorkflowStep};
use crate::packager::structure::{final_dir, wip_dir};

/// Pipeline names, as stored on the `pipelines` rows.
pub const SFTP_ISSUE_MOVE: &str = "sftp_issue_move";
pub const SCANNED_ISSUE_MOVE: &str = "scanned_issue_move";
pub const FORCE_DERIVATIVES: &str = "force_derivatives";
pub const FINALIZE_ISSUE: &str = "finalize_issue";
pub const MAKE_BATCH: &str = "make_batch";
pub const LOAD_BATCH: &str = "load_batch";
pub const PURGE_BATCH: &str = "purge_batch";
pub const REMOVE_ERRORED_ISSUE: &str = "remove_errored_issue";
pub const FINALIZE_FLAGGED_ISSUES: &str = "finalize_flagged_issues";
pub const DELETE_BATCH: &str = "delete_batch";

fn issue_job(job_type: JobType, issue: &Issue, args: Args) -> Job {
    Job::new(job_type, issue.id, args)
}

fn batch_job(job_type: JobType, batch: &Batch, args: Args) -> Job {
    Job::new(job_type, batch.id, args)
}

fn set_step(issue: &Issue, step: WorkflowStep) -> Job {
    issue_job(JobType::SetIssueWorkflowStep, issue, WorkflowStepArgs { step }.to_args())
}

fn set_status(batch: &Batch, status: BatchStatus) -> Job {
    batch_job(JobType::SetBatchStatus, batch, BatchStatusArgs { status }.to_args())
}

fn location(path: &Path) -> Args {
    LocationArgs::new(path.display().to_string()).to_args()
}

/// `.wip-<name>` next to `dst`.
fn wip_sibling(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = dst.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!(".wip-{}", name))
}

/// Copies a directory tree to `dst` through a WIP sibling, verifies the
/// copy, removes the original, and renames the copy into place. A crash at
/// any point leaves either the original or a complete copy.
fn copy_and_replace(src: &Path, dst: &Path) -> Vec<Job> {
    let wip = wip_sibling(dst);
    vec![
        Job::general(JobType::SyncRecursive, TransferArgs::new(src, &wip).to_args()),
        Job::general(JobType::VerifyRecursive, TransferArgs::new(src, &wip).to_args()),
        Job::general(JobType::KillDir, location(src)),
        Job::general(JobType::RenameDir, TransferArgs::new(&wip, dst).to_args()),
    ]
}

/// [`copy_and_replace`] for the issue's own directory, finishing by
/// pointing the issue at its new home.
fn move_issue(issue: &Issue, src: &Path, dst: &Path) -> Vec<Job> {
    let mut jobs = copy_and_replace(src, dst);
    jobs.push(issue_job(JobType::SetIssueLocation, issue, location(dst)));
    jobs
}

fn require_movable(issue: &Issue) -> Result<PathBuf, PipelineError> {
    if issue.id == 0 || issue.human_name.is_empty() {
        return Err(PipelineError::Rejected(format!("issue {} has not been saved", issue.key())));
    }
    if issue.location.is_empty() {
        return Err(PipelineError::Rejected(format!("issue {} has no location", issue.key())));
    }
    Ok(PathBuf::from(&issue.location))
}

/// Born-digital upload: move into the workflow area, split the uploaded
/// PDFs into single pages, keep the originals as a backup, and send the
/// split pages to page review.
pub fn move_sftp_issue(db: &Database, config: &Config, issue: &mut Issue) -> Result<Pipeline, PipelineError> {
    let upload = require_movable(issue)?;
    let human = issue.human_name.clone();
    let workflow_dir = config.workflow_path.join(&human);
    let split_dir = config.workflow_path.join(format!(".wip-split-{}", human));
    let backup_dir = config.pdf_backup_path.join(&human);
    let review_dir = config.pdf_page_review_path.join(&human);

    let mut jobs = vec![set_step(issue, WorkflowStep::AwaitingProcessing)];
    jobs.extend(move_issue(issue, &upload, &workflow_dir));
    jobs.push(Job::general(JobType::CleanFiles, location(&workflow_dir)));
    jobs.push(issue_job(JobType::PageSplit, issue, location(&split_dir)));
    jobs.push(Job::general(
        JobType::SyncRecursive,
        TransferArgs::new(&workflow_dir, &backup_dir).to_args(),
    ));
    jobs.push(Job::general(
        JobType::VerifyRecursive,
        TransferArgs::new(&workflow_dir, &backup_dir).to_args(),
    ));
    jobs.push(Job::general(JobType::KillDir, location(&workflow_dir)));
    jobs.push(Job::general(
        JobType::RenameDir,
        TransferArgs::new(&split_dir, &workflow_dir).to_args(),
    ));
    jobs.extend(move_issue(issue, &workflow_dir, &review_dir));
    jobs.push(set_step(issue, WorkflowStep::AwaitingPageReview));
    jobs.push(issue_job(JobType::SetIssueBackupLocation, issue, location(&backup_dir)));

    queue_for_issue(db, SFTP_ISSUE_MOVE, issue, jobs)
}

/// Scanned issue: move into the workflow area, number the pages, build
/// derivatives, and open it for metadata entry.
pub fn move_scanned_issue(db: &Database, config: &Config, issue: &mut Issue) -> Result<Pipeline, PipelineError> {
    let upload = require_movable(issue)?;
    let workflow_dir = config.workflow_path.join(&issue.human_name);

    let mut jobs = vec![set_step(issue, WorkflowStep::AwaitingProcessing)];
    jobs.extend(move_issue(issue, &upload, &workflow_dir));
    jobs.push(Job::general(JobType::CleanFiles, location(&workflow_dir)));
    jobs.push(issue_job(JobType::RenumberPages, issue, Args::new()));
    jobs.push(issue_job(JobType::MakeDerivatives, issue, Args::new()));
    jobs.push(issue_job(JobType::PrepIssuePageLabels, issue, Args::new()));
    jobs.push(set_step(issue, WorkflowStep::ReadyForMetadataEntry));

    queue_for_issue(db, SCANNED_ISSUE_MOVE, issue, jobs)
}

/// Rebuilds every derivative of an issue in place, then puts the issue back
/// where it was.
pub fn force_derivatives(db: &Database, issue: &mut Issue) -> Result<Pipeline, PipelineError> {
    require_movable(issue)?;
    let step = issue.workflow_step;
    let jobs = vec![
        issue_job(JobType::MakeDerivatives, issue, ForcedArgs { forced: true }.to_args()),
        set_step(issue, step),
    ];
    queue_for_issue(db, FORCE_DERIVATIVES, issue, jobs)
}

/// After metadata approval: write METS, fold any backup into the issue as
/// `master.tar`, and mark the issue ready for batching.
pub fn finalize_issue(db: &Database, issue: &mut Issue) -> Result<Pipeline, PipelineError> {
    require_movable(issue)?;
    if issue.workflow_step != WorkflowStep::ReadyForMetsXml {
        return Err(PipelineError::Rejected(format!(
            "issue {} is {}, not {}",
            issue.key(),
            issue.workflow_step,
            WorkflowStep::ReadyForMetsXml
        )));
    }

    let mut jobs = vec![issue_job(JobType::BuildMets, issue, Args::new())];
    if !issue.backup_location.is_empty() {
        jobs.push(issue_job(JobType::ArchiveBackups, issue, Args::new()));
        jobs.push(Job::general(JobType::KillDir, location(Path::new(&issue.backup_location))));
        jobs.push(issue_job(JobType::SetIssueBackupLocation, issue, LocationArgs::new("").to_args()));
    }
    jobs.push(set_step(issue, WorkflowStep::ReadyForBatching));
    queue_for_issue(db, FINALIZE_ISSUE, issue, jobs)
}

/// Jobs that assemble a batch directory under the batch output path and
/// leave it ready for QC.
fn make_batch_jobs(config: &Config, batch: &Batch) -> Vec<Job> {
    let wip = wip_dir(&config.batch_output_path, batch);
    let dest = final_dir(&config.batch_output_path, batch);
    vec![
        batch_job(JobType::CreateBatchStructure, batch, location(&wip)),
        batch_job(JobType::SetBatchLocation, batch, location(&wip)),
        batch_job(JobType::MakeBatchXml, batch, Args::new()),
        Job::general(JobType::RenameDir, TransferArgs::new(&wip, &dest).to_args()),
        batch_job(JobType::SetBatchLocation, batch, location(&dest)),
        set_status(batch, BatchStatus::QcReady),
        batch_job(JobType::WriteBagitManifest, batch, Args::new()),
    ]
}

pub fn make_batch(db: &Database, config: &Config, batch: &mut Batch) -> Result<Pipeline, PipelineError> {
    let jobs = make_batch_jobs(config, batch);
    queue_for_batch(db, MAKE_BATCH, batch, jobs)
}

/// Validates the bag and loads it through the agent for `env`. A staging
/// load ends on staging for QC; a production load marks the batch live.
pub fn load_batch(db: &Database, batch: &mut Batch, env: AgentEnv) -> Result<Pipeline, PipelineError> {
    let expected = match env {
        AgentEnv::Staging => BatchStatus::QcReady,
        AgentEnv::Production => BatchStatus::PassedQc,
    };
    if batch.status != expected {
        return Err(PipelineError::Rejected(format!(
            "batch {} is {}; loading onto {} requires {}",
            batch.full_name(),
            batch.status,
            env,
            expected
        )));
    }

    let mut jobs = vec![
        batch_job(JobType::ValidateTagManifest, batch, Args::new()),
        batch_job(JobType::OniLoadBatch, batch, env.to_args()),
        batch_job(JobType::OniWaitForJob, batch, env.to_args()),
    ];
    jobs.push(match env {
        AgentEnv::Staging => set_status(batch, BatchStatus::OnStaging),
        AgentEnv::Production => batch_job(JobType::MarkBatchLive, batch, Args::new()),
    });
    queue_for_batch(db, LOAD_BATCH, batch, jobs)
}

/// Purges a batch from `env` and leaves it in `status` afterward.
pub fn purge_batch(
    db: &Database,
    batch: &mut Batch,
    env: AgentEnv,
    status: BatchStatus,
) -> Result<Pipeline, PipelineError> {
    let jobs = vec![
        batch_job(JobType::OniPurgeBatch, batch, env.to_args()),
        batch_job(JobType::OniWaitForJob, batch, env.to_args()),
        set_status(batch, status),
    ];
    queue_for_batch(db, PURGE_BATCH, batch, jobs)
}

/// Removes a batch that never went live. Its files go first, then the
/// batch row is marked deleted and its issues return to the batching queue.
pub fn delete_batch(db: &Database, batch: &mut Batch) -> Result<Pipeline, PipelineError> {
    if batch.status.is_live() || batch.status == BatchStatus::Deleted {
        return Err(PipelineError::Rejected(format!(
            "batch {} is {} and cannot be deleted",
            batch.full_name(),
            batch.status
        )));
    }

    let mut jobs = Vec::new();
    if !batch.location.is_empty() {
        jobs.push(Job::general(JobType::KillDir, location(Path::new(&batch.location))));
        jobs.push(batch_job(JobType::SetBatchLocation, batch, LocationArgs::new("").to_args()));
    }
    jobs.push(batch_job(JobType::DeleteBatch, batch, Args::new()));
    queue_for_batch(db, DELETE_BATCH, batch, jobs)
}

/// Takes an unfixable issue out of NCA: its history is written next to its
/// files, derivatives are set aside, and everything lands in the errored
/// issues area before the issue is ignored.
pub fn remove_errored_issue(
    db: &Database,
    config: &Config,
    issue: &mut Issue,
    manager_id: i64,
    message: &str,
) -> Result<Pipeline, PipelineError> {
    let src = require_movable(issue)?;
    if issue.workflow_step != WorkflowStep::UnfixableMetadataError {
        return Err(PipelineError::Rejected(format!(
            "issue {} is {}; only unfixable issues can be removed",
            issue.key(),
            issue.workflow_step
        )));
    }
    if issue.batch_id != 0 {
        return Err(PipelineError::Rejected(format!(
            "issue {} is part of batch {}",
            issue.key(),
            issue.batch_id
        )));
    }

    let dest_root = config.errored_issues_path.join(&issue.human_name);
    let mut jobs = vec![
        issue_job(JobType::WriteActionLog, issue, Args::new()),
        issue_job(JobType::MoveDerivatives, issue, location(&src.join("derivatives"))),
    ];
    jobs.extend(move_issue(issue, &src, &dest_root.join("content")));
    if !issue.backup_location.is_empty() {
        let backup = PathBuf::from(&issue.backup_location);
        jobs.extend(copy_and_replace(&backup, &dest_root.join("originals")));
        jobs.push(issue_job(JobType::SetIssueBackupLocation, issue, LocationArgs::new("").to_args()));
    }
    jobs.push(issue_job(JobType::IgnoreIssue, issue, Args::new()));

    db.with_tx(|tx| {
        let mut action = issue.prep_for_removal(manager_id, message);
        action_repo::insert(tx, &mut action)?;
        queue_for_issue_op(tx, REMOVE_ERRORED_ISSUE, issue, jobs, Utc::now())
    })
}

/// Pulls every QC-flagged issue out of a failed batch. With `rebatch` the
/// batch is deleted so its remaining issues return to the batching queue;
/// otherwise the batch is rebuilt from what is left.
pub fn finalize_flagged_issues(
    db: &Database,
    config: &Config,
    batch: &mut Batch,
    user_id: i64,
    rebatch: bool,
) -> Result<Pipeline, PipelineError> {
    if batch.status != BatchStatus::FailedQc {
        return Err(PipelineError::Rejected(format!(
            "batch {} is {}, not {}",
            batch.full_name(),
            batch.status,
            BatchStatus::FailedQc
        )));
    }

    db.with_tx(|tx| {
        let flagged = flagged_repo::find_for_batch(tx, batch.id)?;
        if flagged.is_empty() {
            return Err(PipelineError::Rejected(format!(
                "batch {} has no flagged issues",
                batch.full_name()
            )));
        }

        let mut jobs: Vec<Job> = flagged
            .iter()
            .map(|f| Job::new(JobType::FinalizeBatchFlaggedIssue, f.issue_id, Args::new()))
            .collect();
        jobs.push(batch_job(JobType::EmptyBatchFlaggedIssuesList, batch, Args::new()));
        if !batch.location.is_empty() {
            jobs.push(Job::general(JobType::KillDir, location(Path::new(&batch.location))));
            jobs.push(batch_job(JobType::SetBatchLocation, batch, LocationArgs::new("").to_args()));
        }
        if rebatch {
            jobs.push(batch_job(JobType::DeleteBatch, batch, Args::new()));
        } else {
            jobs.extend(make_batch_jobs(config, batch));
        }

        let mut action = Action::for_batch(batch.id, ActionType::FinalizeBatch, user_id, "");
        action_repo::insert(tx, &mut action)?;
        queue_for_batch_op(tx, FINALIZE_FLAGGED_ISSUES, batch, jobs, Utc::now())
    })
}
