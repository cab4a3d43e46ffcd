use std::fs::{self, File};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PackageError, StorageError};
use crate::storage::filesystem::{exists, remove_file_if_exists};

pub const ARCHIVE_NAME: &str = "master.tar";

/// Result of an archive run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// A non-empty archive from an earlier attempt was kept.
    AlreadyArchived(PathBuf),
    Created { path: PathBuf, files: usize, bytes: u64 },
}

/// Tars every regular file under `backup_dir` into `<issue_dir>/master.tar`,
/// storing each as `master/<relative path>`. The archive is written under a
/// temporary name and renamed when complete, so a non-empty `master.tar`
/// always means a finished archive.
pub fn archive_backups(backup_dir: &Path, issue_dir: &Path) -> Result<ArchiveOutcome, PackageError> {
    let dest = issue_dir.join(ARCHIVE_NAME);
    if let Ok(meta) = fs::metadata(&dest) {
        if meta.len() > 0 {
            return Ok(ArchiveOutcome::AlreadyArchived(dest));
        }
        remove_file_if_exists(&dest)?;
    }
    if !backup_dir.is_dir() {
        return Err(StorageError::NotADirectory(backup_dir.to_path_buf()).into());
    }

    let tmp = issue_dir.join(format!(".{}.partial", ARCHIVE_NAME));
    if exists(&tmp) {
        remove_file_if_exists(&tmp)?;
    }

    let archive_err = |e| PackageError::Archive {
        path: tmp.clone(),
        source: e,
    };

    let file = File::create(&tmp).map_err(archive_err)?;
    let mut builder = tar::Builder::new(file);
    let mut files = 0;

    let mut entries: Vec<_> = Vec::new();
    for entry in WalkDir::new(backup_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Scan {
            path: backup_dir.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_file() {
            entries.push(entry.into_path());
        }
    }

    for path in entries {
        let rel = path.strip_prefix(backup_dir).unwrap_or(&path);
        let name = Path::new("master").join(rel);
        builder.append_path_with_name(&path, &name).map_err(archive_err)?;
        files += 1;
    }
    let file = builder.into_inner().map_err(archive_err)?;
    file.sync_all().map_err(archive_err)?;
    drop(file);

    let bytes = fs::metadata(&tmp).map_err(archive_err)?.len();
    if bytes == 0 {
        remove_file_if_exists(&tmp)?;
        return Err(PackageError::EmptyArchive(dest));
    }

    fs::rename(&tmp, &dest).map_err(|e| StorageError::MoveFile {
        from: tmp.clone(),
        to: dest.clone(),
        source: e,
    })?;

    Ok(ArchiveOutcome::Created {
        path: dest,
        files,
        bytes,
    })
}
