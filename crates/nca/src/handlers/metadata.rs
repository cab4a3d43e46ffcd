//! Small, single-row updates used as pipeline checkpoints, so workflow
//! fields only move once the preceding step has persisted.

use std::path::Path;

use super::args::{BatchStatusArgs, IdArgs, LocationArgs, MessageArgs, WorkflowStepArgs};
use super::{OrRespond, ProcessResponse, Run, Step};
use crate::db::action_repo;
use crate::models::action::SYSTEM_USER_ID;
use crate::models::{Action, ActionType};
use crate::storage::filesystem::list_files;

pub(super) fn set_issue_workflow_step(run: &Run<'_>) -> Step {
    let args = WorkflowStepArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let mut issue = run.issue()?;
    run.log.info(format!(
        "Setting issue {} workflow step: {} -> {}",
        issue.id, issue.workflow_step, args.step
    ));
    issue.workflow_step = args.step;
    run.save_issue(&mut issue)
}

pub(super) fn set_issue_backup_location(run: &Run<'_>) -> Step {
    let args = LocationArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let mut issue = run.issue()?;
    run.log.info(format!("Setting issue {} backup location to {:?}", issue.id, args.location));
    issue.backup_location = args.location;
    run.save_issue(&mut issue)
}

pub(super) fn set_issue_location(run: &Run<'_>) -> Step {
    let args = LocationArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let mut issue = run.issue()?;
    run.log.info(format!("Setting issue {} location to {:?}", issue.id, args.location));
    issue.location = args.location;
    run.save_issue(&mut issue)
}

pub(super) fn ignore_issue(run: &Run<'_>) -> Step {
    let mut issue = run.issue()?;
    issue.ignored = true;
    run.save_issue(&mut issue)
}

/// Records who entered the issue's metadata and when.
pub(super) fn set_issue_curated(run: &Run<'_>) -> Step {
    let args = IdArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let mut issue = run.issue()?;
    issue.metadata_entry_user_id = args.id;
    issue.metadata_entered_at = Some(run.now());
    run.save_issue(&mut issue)
}

/// Gives the issue one empty page label per JP2 on disk. Labels that already
/// match the page count are left alone so curator work is never wiped.
pub(super) fn prep_issue_page_labels(run: &Run<'_>) -> Step {
    let mut issue = run.issue()?;
    if issue.location.is_empty() {
        run.log.error(format!("Issue {} has no location", issue.id));
        return Err(ProcessResponse::Fatal);
    }

    let files = list_files(Path::new(&issue.location))
        .or_failure(&run.log, &format!("Unable to read {:?}", issue.location))?;
    let pages = files
        .iter()
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jp2"))
        })
        .count();

    if pages == 0 {
        run.log.error(format!("No JP2 files found in {:?}", issue.location));
        return Err(ProcessResponse::Fatal);
    }
    if issue.page_labels.len() == pages {
        run.log.info(format!("Issue {} already has {} page labels", issue.id, pages));
        return Ok(());
    }

    run.log.info(format!("Preparing {} page labels for issue {}", pages, issue.id));
    issue.page_labels = vec![String::new(); pages];
    issue.page_count = pages as u32;
    run.save_issue(&mut issue)
}

pub(super) fn record_issue_action(run: &Run<'_>) -> Step {
    let args = MessageArgs::parse(&run.job.args);
    let issue = run.issue()?;
    let mut action = Action::for_issue(issue.id, ActionType::InternalProcess, SYSTEM_USER_ID, &args.message);
    run.db()
        .with_conn(|conn| action_repo::insert(conn, &mut action))
        .or_failure(&run.log, "Unable to record issue action")?;
    Ok(())
}

pub(super) fn set_batch_status(run: &Run<'_>) -> Step {
    let args = BatchStatusArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let mut batch = run.batch()?;
    run.log.info(format!(
        "Setting batch {} status: {} -> {}",
        batch.id, batch.status, args.status
    ));
    batch
        .transition(args.status)
        .or_fatal(&run.log, "Invalid batch status change")?;
    run.save_batch(&mut batch)
}

pub(super) fn set_batch_location(run: &Run<'_>) -> Step {
    let args = LocationArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let mut batch = run.batch()?;
    run.log.info(format!("Setting batch {} location to {:?}", batch.id, args.location));
    batch.location = args.location;
    run.save_batch(&mut batch)
}

pub(super) fn record_batch_action(run: &Run<'_>) -> Step {
    let args = MessageArgs::parse(&run.job.args);
    let batch = run.batch()?;
    let mut action = Action::for_batch(batch.id, ActionType::InternalProcess, SYSTEM_USER_ID, &args.message);
    run.db()
        .with_conn(|conn| action_repo::insert(conn, &mut action))
        .or_failure(&run.log, "Unable to record batch action")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::args::{BATCH_STATUS, ID, WORKFLOW_STEP};
    use super::super::tests::{context, run_job, saved_batch, saved_issue};
    use super::*;
    use crate::db::{batch_repo, issue_repo};
    use crate::models::{Args, Batch, BatchStatus, Issue, Job, JobType, ObjectType, WorkflowStep};
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use chrono::Utc;

    fn reload_issue(ctx: &super::super::JobContext, id: i64) -> Issue {
        ctx.db.with_conn(|conn| issue_repo::get(conn, id)).unwrap()
    }

    #[test]
    fn test_set_workflow_step_and_locations() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(tmp.path());
        let mut issue = Issue::new("oru", "sn83025138", "1899-12-30", 1);
        saved_issue(&ctx, &mut issue);

        let args = WorkflowStepArgs {
            step: WorkflowStep::AwaitingPageReview,
        }
        .to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::SetIssueWorkflowStep, issue.id, args));
        assert_eq!(r, ProcessResponse::Success);

        let loc = LocationArgs::new("/mnt/workflow/x").to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::SetIssueLocation, issue.id, loc));
        assert_eq!(r, ProcessResponse::Success);

        let backup = LocationArgs::new("/mnt/backup/x").to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::SetIssueBackupLocation, issue.id, backup));
        assert_eq!(r, ProcessResponse::Success);

        let issue = reload_issue(&ctx, issue.id);
        assert_eq!(issue.workflow_step, WorkflowStep::AwaitingPageReview);
        assert_eq!(issue.location, "/mnt/workflow/x");
        assert_eq!(issue.backup_location, "/mnt/backup/x");
    }

    #[test]
    fn test_bad_args_are_fatal() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(tmp.path());
        let mut issue = Issue::new("oru", "sn83025138", "1899-12-30", 1);
        saved_issue(&ctx, &mut issue);

        let args = Args::new().with(WORKFLOW_STEP, "Sleeping");
        let (r, _) = run_job(&ctx, Job::new(JobType::SetIssueWorkflowStep, issue.id, args));
        assert_eq!(r, ProcessResponse::Fatal);

        let (r, _) = run_job(&ctx, Job::new(JobType::SetIssueCurated, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Fatal);
    }

    #[test]
    fn test_ignore_and_curate() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(tmp.path());
        let mut issue = Issue::new("oru", "sn83025138", "1899-12-30", 1);
        saved_issue(&ctx, &mut issue);

        let (r, _) = run_job(&ctx, Job::new(JobType::IgnoreIssue, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Success);
        let (r, _) = run_job(
            &ctx,
            Job::new(JobType::SetIssueCurated, issue.id, Args::new().with(ID, "7")),
        );
        assert_eq!(r, ProcessResponse::Success);

        let issue = reload_issue(&ctx, issue.id);
        assert!(issue.ignored);
        assert_eq!(issue.metadata_entry_user_id, 7);
        assert!(issue.metadata_entered_at.is_some());
    }

    #[test]
    fn test_prep_page_labels() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/0001.jp2").touch().unwrap();
        tmp.child("issue/0002.JP2").touch().unwrap();
        tmp.child("issue/0001.pdf").touch().unwrap();
        let ctx = context(tmp.path());
        let mut issue = Issue::new("oru", "sn83025138", "1899-12-30", 1);
        issue.location = tmp.path().join("issue").display().to_string();
        saved_issue(&ctx, &mut issue);

        let (r, _) = run_job(&ctx, Job::new(JobType::PrepIssuePageLabels, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Success);
        let mut reloaded = reload_issue(&ctx, issue.id);
        assert_eq!(reloaded.page_labels, vec![String::new(), String::new()]);
        assert_eq!(reloaded.page_count, 2);

        // Existing labels of the right length survive a rerun
        reloaded.page_labels = vec!["1".into(), "2".into()];
        saved_issue(&ctx, &mut reloaded);
        let (r, _) = run_job(&ctx, Job::new(JobType::PrepIssuePageLabels, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Success);
        assert_eq!(reload_issue(&ctx, issue.id).page_labels, vec!["1", "2"]);
    }

    #[test]
    fn test_prep_page_labels_without_images() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/0001.pdf").touch().unwrap();
        let ctx = context(tmp.path());
        let mut issue = Issue::new("oru", "sn83025138", "1899-12-30", 1);
        issue.location = tmp.path().join("issue").display().to_string();
        saved_issue(&ctx, &mut issue);

        let (r, _) = run_job(&ctx, Job::new(JobType::PrepIssuePageLabels, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Fatal);
    }

    #[test]
    fn test_record_actions() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(tmp.path());
        let mut issue = Issue::new("oru", "sn83025138", "1899-12-30", 1);
        saved_issue(&ctx, &mut issue);
        let mut batch = Batch::new("oru", Utc::now());
        saved_batch(&ctx, &mut batch);

        let msg = MessageArgs::new("moved to page review").to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::RecordIssueAction, issue.id, msg));
        assert_eq!(r, ProcessResponse::Success);
        let msg = MessageArgs::new("built").to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::RecordBatchAction, batch.id, msg));
        assert_eq!(r, ProcessResponse::Success);

        let actions = ctx
            .db
            .with_conn(|conn| action_repo::find_for_object(conn, ObjectType::Issue, issue.id))
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].message, "moved to page review");
        assert_eq!(actions[0].user_id, SYSTEM_USER_ID);

        let actions = ctx
            .db
            .with_conn(|conn| action_repo::find_for_object(conn, ObjectType::Batch, batch.id))
            .unwrap();
        assert_eq!(actions[0].action_type, ActionType::InternalProcess);
    }

    #[test]
    fn test_batch_status_and_location() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(tmp.path());
        let mut batch = Batch::new("oru", Utc::now());
        saved_batch(&ctx, &mut batch);

        let loc = LocationArgs::new("/batches/x").to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::SetBatchLocation, batch.id, loc));
        assert_eq!(r, ProcessResponse::Success);
        let status = Args::new().with(BATCH_STATUS, BatchStatus::QcReady.as_str());
        let (r, _) = run_job(&ctx, Job::new(JobType::SetBatchStatus, batch.id, status));
        assert_eq!(r, ProcessResponse::Success);

        let reloaded = ctx.db.with_conn(|conn| batch_repo::get(conn, batch.id)).unwrap();
        assert_eq!(reloaded.location, "/batches/x");
        assert_eq!(reloaded.status, BatchStatus::QcReady);

        // A QC-ready batch can't skip straight to live
        let status = Args::new().with(BATCH_STATUS, BatchStatus::Live.as_str());
        let (r, _) = run_job(&ctx, Job::new(JobType::SetBatchStatus, batch.id, status));
        assert_eq!(r, ProcessResponse::Fatal);
    }
}
