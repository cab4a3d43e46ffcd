//! Issue finalization and batch assembly: METS, archives, action logs,
//! the NDNP batch tree, batch.xml, and BagIt tag files.

use std::path::{Path, PathBuf};

use super::args::LocationArgs;
use super::{OrRespond, ProcessResponse, Run, Step};
use crate::db::{action_repo, batch_repo, reference_repo};
use crate::error::{BagitError, PackageError, StorageError};
use crate::models::{Action, Batch, ObjectType};
use crate::packager::archive::{archive_backups as write_archive, ArchiveOutcome};
use crate::packager::bagit::Bag;
use crate::packager::{batch_xml, mets, structure};
use crate::storage::filesystem::write_replace;

pub const ACTION_LOG_FILE: &str = "actions.txt";
const WRAP_WIDTH: usize = 80;
const INDENT: &str = "    ";

/// Logs a packaging error. Bad input data and collisions are permanent;
/// everything else is worth retrying.
fn package_failed(run: &Run<'_>, what: &str, e: PackageError) -> ProcessResponse {
    run.log.error(format!("{}: {}", what, e));
    match e {
        PackageError::Issue { .. } | PackageError::Storage(StorageError::AlreadyExists(_)) => {
            ProcessResponse::Fatal
        }
        _ => ProcessResponse::Failure,
    }
}

fn batch_dir(run: &Run<'_>, batch: &Batch) -> Step<PathBuf> {
    if batch.location.is_empty() {
        run.log.error(format!("Batch {} has no location", batch.id));
        return Err(ProcessResponse::Fatal);
    }
    Ok(PathBuf::from(&batch.location))
}

pub(super) fn build_mets(run: &Run<'_>) -> Step {
    let issue = run.issue()?;
    let title = run
        .db()
        .with_conn(|conn| reference_repo::find_title_by_lccn(conn, &issue.lccn))
        .or_failure(&run.log, "Unable to look up title")?;
    let Some(title) = title else {
        run.log.error(format!("No title found for LCCN {:?}", issue.lccn));
        return Err(ProcessResponse::Fatal);
    };

    let path = mets::write(&issue, &title, run.now())
        .map_err(|e| package_failed(run, "Unable to write METS", e))?;
    run.log.info(format!("Wrote METS for issue {} to {:?}", issue.id, path));
    Ok(())
}

/// Tars the issue's original uploads into `master.tar`. Issues without a
/// backup location (scans) have nothing to archive.
pub(super) fn archive_backups(run: &Run<'_>) -> Step {
    let issue = run.issue()?;
    if issue.backup_location.is_empty() {
        run.log.info(format!("Issue {} has no backup location; nothing to archive", issue.id));
        return Ok(());
    }
    if issue.location.is_empty() {
        run.log.error(format!("Issue {} has no location", issue.id));
        return Err(ProcessResponse::Fatal);
    }

    let outcome = write_archive(Path::new(&issue.backup_location), Path::new(&issue.location))
        .map_err(|e| package_failed(run, "Unable to archive backups", e))?;
    match outcome {
        ArchiveOutcome::AlreadyArchived(path) => {
            run.log.info(format!("{:?} already exists; keeping it", path))
        }
        ArchiveOutcome::Created { path, files, bytes } => {
            run.log.info(format!("Archived {} file(s) ({} bytes) to {:?}", files, bytes, path))
        }
    }
    Ok(())
}

/// Wraps `text` at word boundaries to `width` columns. Words longer than
/// the width get a line to themselves.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    lines.push(line);
    lines
}

/// Indents every wrapped line of a possibly multi-line message.
fn indent_message(message: &str) -> String {
    let normalized = message.replace("\r\n", "\n").replace('\r', "\n");
    normalized
        .split('\n')
        .flat_map(|para| wrap(para, WRAP_WIDTH))
        .map(|line| format!("{}{}", INDENT, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_action(action: &Action, login: &str) -> String {
    let when = action.created_at.format("%b %-d, %Y at %-I:%M%P");
    let mut out = format!("<{}> {} on {}", login, action.action_type.describe(), when);
    if !action.message.is_empty() {
        out.push_str(":\n\n");
        out.push_str(&indent_message(&action.message));
    }
    out
}

/// Dumps the issue's workflow history to `actions.txt` in its directory, for
/// issues that leave the system and need their curation notes to travel
/// with them.
pub(super) fn write_action_log(run: &Run<'_>) -> Step {
    let issue = run.issue()?;
    if issue.location.is_empty() {
        run.log.error(format!("Issue {} has no location", issue.id));
        return Err(ProcessResponse::Fatal);
    }

    let text = run
        .db()
        .with_conn(|conn| {
            let mut out = String::new();
            for action in action_repo::find_for_object(conn, ObjectType::Issue, issue.id)? {
                if !action.is_workflow_visible() {
                    continue;
                }
                let login = reference_repo::user_login(conn, action.user_id)?;
                out.push_str(&describe_action(&action, &login));
                out.push_str("\n\n");
            }
            Ok(out)
        })
        .or_failure(&run.log, "Unable to read issue actions")?;

    let path = Path::new(&issue.location).join(ACTION_LOG_FILE);
    write_replace(&path, text.as_bytes())
        .or_failure(&run.log, &format!("Unable to write action log to {:?}", path))?;
    run.log.info(format!("Action log written to {:?}", path));
    Ok(())
}

/// Builds the batch's NDNP directory tree at `Location` by hard-linking each
/// issue's files into `data/<lccn>/print/<date+edition>/`.
pub(super) fn create_batch_structure(run: &Run<'_>) -> Step {
    let dest = LocationArgs::parse_path(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let batch = run.batch()?;
    let issues = run
        .db()
        .with_conn(|conn| batch_repo::issues(conn, &batch))
        .or_failure(&run.log, "Unable to load batch issues")?;
    if issues.is_empty() {
        run.log.error(format!("Batch {} has no issues", batch.id));
        return Err(ProcessResponse::Fatal);
    }

    run.log.info(format!("Creating batch structure for {} issue(s) at {:?}", issues.len(), dest));
    let linked = structure::create_batch_structure(&dest, &issues)
        .map_err(|e| package_failed(run, "Unable to create batch structure", e))?;
    run.log.info(format!("Linked {} file(s)", linked));
    Ok(())
}

pub(super) fn make_batch_xml(run: &Run<'_>) -> Step {
    let batch = run.batch()?;
    let dir = batch_dir(run, &batch)?;
    let issues = run
        .db()
        .with_conn(|conn| batch_repo::issues(conn, &batch))
        .or_failure(&run.log, "Unable to load batch issues")?;

    let path = batch_xml::write(&dir, &batch, &issues)
        .map_err(|e| package_failed(run, "Unable to write batch XML", e))?;
    run.log.info(format!("Wrote {:?}", path));
    Ok(())
}

pub(super) fn write_bagit_manifest(run: &Run<'_>) -> Step {
    let batch = run.batch()?;
    let dir = batch_dir(run, &batch)?;
    run.log.info(format!("Writing BagIt manifests for {:?}", dir));
    match Bag::new(&dir).write_tag_files() {
        Ok(()) => Ok(()),
        Err(e @ BagitError::MissingData(_)) => Err(e).or_fatal(&run.log, "Unable to write BagIt files"),
        Err(e) => Err(e).or_failure(&run.log, "Unable to write BagIt files"),
    }
}

/// Any difference between the stored and the recomputed tag sums fails the
/// job, so a tampered or half-copied bag never reaches an agent.
pub(super) fn validate_tag_manifest(run: &Run<'_>) -> Step {
    let batch = run.batch()?;
    let dir = batch_dir(run, &batch)?;
    Bag::new(&dir)
        .validate_tag_manifest()
        .or_failure(&run.log, &format!("Tag manifest of {:?} is invalid", dir))?;
    run.log.info(format!("Tag manifest of {:?} is valid", dir));
    Ok(())
}
