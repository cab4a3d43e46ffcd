//! General-purpose filesystem jobs, driven only by their args.

use std::path::Path;

use super::args::{LocationArgs, TransferArgs};
use super::{OrRespond, ProcessResponse, Run, Step};
use crate::packager::manifest::Manifest;
use crate::storage::filesystem::{
    ensure_dir, exists, find_fraggable, must_not_exist, parse_exclusions, remove_dir_all,
    remove_file_if_exists, sync_tree,
};

/// Copies files whose size differs or that are missing at the destination.
/// Meant to be followed by [`verify_recursive`], which catches copies a
/// flaky mount reported as good.
pub(super) fn sync_recursive(run: &Run<'_>) -> Step {
    sync(run, false)
}

/// Re-syncs with SHA-256 comparison, re-copying and re-hashing anything
/// that doesn't match.
pub(super) fn verify_recursive(run: &Run<'_>) -> Step {
    sync(run, true)
}

fn sync(run: &Run<'_>, verify: bool) -> Step {
    let args = TransferArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let exclusions = parse_exclusions(&args.exclude).or_fatal(&run.log, "Invalid exclusion list")?;

    let verb = if verify { "Verifying copy of" } else { "Copying" };
    run.log.info(format!(
        "{} {:?} to {:?} excluding {:?}",
        verb, args.source, args.destination, args.exclude
    ));

    if let Some(parent) = args.destination.parent() {
        ensure_dir(parent).or_failure(&run.log, "Unable to create destination parent")?;
    }
    let summary = sync_tree(&args.source, &args.destination, &exclusions, verify).or_failure(
        &run.log,
        &format!("Unable to sync {:?} to {:?}", args.source, args.destination),
    )?;

    run.log.info(format!(
        "Sync complete: {} copied, {} unchanged, {} excluded",
        summary.copied, summary.skipped, summary.excluded
    ));
    Ok(())
}

pub(super) fn kill_dir(run: &Run<'_>) -> Step {
    let location = LocationArgs::parse_path(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    run.log.debug(format!("Removing {:?}", location));
    remove_dir_all(&location).or_failure(&run.log, &format!("Unable to remove {:?}", location))
}

pub(super) fn rename_dir(run: &Run<'_>) -> Step {
    let args = TransferArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    must_not_exist(&args.destination).or_fatal(&run.log, "Refusing to rename directory")?;

    run.log.info(format!("Renaming {:?} to {:?}", args.source, args.destination));
    std::fs::rename(&args.source, &args.destination).or_failure(
        &run.log,
        &format!("Unable to rename directory ({:?} -> {:?})", args.source, args.destination),
    )
}

/// Deletes dotfiles and `Thumbs.db` left behind by desktop tools.
pub(super) fn clean_files(run: &Run<'_>) -> Step {
    let location = LocationArgs::parse_path(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let fraggable = find_fraggable(&location).or_failure(&run.log, "Unable to scan for files to delete")?;

    for path in &fraggable {
        run.log.debug(format!("Removing {:?}", path));
        remove_file_if_exists(path).or_failure(&run.log, &format!("Unable to remove file {:?}", path))?;
    }
    if !fraggable.is_empty() {
        run.log.info(format!("Removed {} unwanted file(s) from {:?}", fraggable.len(), location));
    }
    Ok(())
}

/// A file that is already gone counts as removed.
pub(super) fn remove_file(run: &Run<'_>) -> Step {
    let location = LocationArgs::parse_path(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let removed = remove_file_if_exists(&location).or_failure(&run.log, &format!("Unable to remove {:?}", location))?;
    if removed {
        run.log.debug(format!("Removed {:?}", location));
    } else {
        run.log.debug(format!("{:?} was not present", location));
    }
    Ok(())
}

pub(super) fn make_manifest(run: &Run<'_>) -> Step {
    let location = LocationArgs::parse_path(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    if !exists(&location) {
        run.log.error(format!("{:?} does not exist", location));
        return Err(ProcessResponse::Failure);
    }
    write_manifest(run, &location)
}

fn write_manifest(run: &Run<'_>, dir: &Path) -> Step {
    let manifest = Manifest::build_hashed(dir).or_failure(&run.log, &format!("Unable to build manifest for {:?}", dir))?;
    manifest
        .write()
        .or_failure(&run.log, &format!("Unable to write manifest for {:?}", dir))?;
    run.log.debug(format!("Wrote manifest of {} file(s) for {:?}", manifest.files.len(), dir));
    Ok(())
}
