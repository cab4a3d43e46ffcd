use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::StorageError;

pub fn ensure_dir(path: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Fails with `AlreadyExists` if anything (including a dangling symlink)
/// sits at `path`.
pub fn must_not_exist(path: &Path) -> Result<(), StorageError> {
    if fs::symlink_metadata(path).is_ok() {
        return Err(StorageError::AlreadyExists(path.to_path_buf()));
    }
    Ok(())
}

pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Moves a file or directory. Uses `rename` first (atomic on the same
/// filesystem) and falls back to copy + delete for cross-device moves.
pub fn move_path(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let meta = fs::metadata(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;

    if meta.is_dir() {
        copy_tree(src, dst)?;
        fs::remove_dir_all(src).map_err(|e| StorageError::MoveFile {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        })
    } else {
        copy_file(src, dst)?;
        fs::remove_file(src).map_err(|e| StorageError::MoveFile {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        })
    }
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    fs::copy(src, dst).map_err(|e| StorageError::CopyFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), StorageError> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| StorageError::Scan {
            path: src.to_path_buf(),
            source: e,
        })?;
        let rel = relative(src, entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn relative<'a>(base: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(base).unwrap_or(path)
}

/// Whether `path`'s file name matches any of the glob patterns.
pub fn is_excluded(path: &Path, patterns: &[glob::Pattern]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    patterns.iter().any(|p| p.matches(name))
}

/// Parses a comma-separated exclusion list. Blank entries are skipped.
pub fn parse_exclusions(list: &str) -> Result<Vec<glob::Pattern>, StorageError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            glob::Pattern::new(s).map_err(|e| StorageError::Pattern {
                pattern: s.to_string(),
                source: e,
            })
        })
        .collect()
}

/// Copies `src` to `dst` unless `dst` already exists with the same size.
/// Returns whether a copy happened.
pub fn sync_file_fast(src: &Path, dst: &Path) -> Result<bool, StorageError> {
    if let Ok(dst_meta) = fs::metadata(dst) {
        let src_meta = fs::metadata(src).map_err(|e| StorageError::Read {
            path: src.to_path_buf(),
            source: e,
        })?;
        if src_meta.len() == dst_meta.len() {
            return Ok(false);
        }
    }
    copy_file(src, dst)?;
    Ok(true)
}

/// Outcome of a recursive sync.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub copied: usize,
    pub skipped: usize,
    pub excluded: usize,
}

/// Recursively copies `src` into `dst`. With `verify`, existing files are
/// compared by SHA-256 instead of size and every copy is re-hashed.
pub fn sync_tree(
    src: &Path,
    dst: &Path,
    exclusions: &[glob::Pattern],
    verify: bool,
) -> Result<SyncSummary, StorageError> {
    if !src.is_dir() {
        return Err(StorageError::NotADirectory(src.to_path_buf()));
    }

    let mut summary = SyncSummary::default();
    ensure_dir(dst)?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Scan {
            path: src.to_path_buf(),
            source: e,
        })?;
        let target = dst.join(relative(src, entry.path()));
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir(&target)?;
            continue;
        }
        if !file_type.is_file() {
            return Err(StorageError::Read {
                path: entry.path().to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        if is_excluded(entry.path(), exclusions) {
            summary.excluded += 1;
            continue;
        }

        let copied = if verify {
            verify_file(entry.path(), &target)?
        } else {
            sync_file_fast(entry.path(), &target)?
        };
        if copied {
            summary.copied += 1;
        } else {
            summary.skipped += 1;
        }
    }

    Ok(summary)
}

fn verify_file(src: &Path, dst: &Path) -> Result<bool, StorageError> {
    let expected = sha256_file(src)?;
    if exists(dst) && sha256_file(dst)? == expected {
        return Ok(false);
    }

    copy_file(src, dst)?;
    let actual = sha256_file(dst)?;
    if actual != expected {
        return Err(StorageError::ChecksumMismatch {
            path: dst.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(true)
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, StorageError> {
    let read_err = |e| StorageError::Read {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = File::open(path).map_err(read_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| StorageError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

pub fn sha256_bytes(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Files that may be deleted from an issue or batch without anyone
/// noticing: dotfiles and `Thumbs.db`.
pub fn is_fraggable(name: &str) -> bool {
    name.starts_with('.') || name.eq_ignore_ascii_case("thumbs.db")
}

/// Every fraggable regular file under `dir`, at any depth.
pub fn find_fraggable(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|e| StorageError::Scan {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(is_fraggable) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = fs::read_dir(dir).map_err(|e| StorageError::Read {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::Read {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Hard-links every regular, non-hidden file directly inside `src` into
/// `dst`. Returns the number of links made.
pub fn link_files(src: &Path, dst: &Path) -> Result<usize, StorageError> {
    ensure_dir(dst)?;
    let mut count = 0;
    for file in list_files(src)? {
        let Some(name) = file.file_name() else {
            continue;
        };
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let target = dst.join(name);
        fs::hard_link(&file, &target).map_err(|e| StorageError::LinkFile {
            from: file.clone(),
            to: target.clone(),
            source: e,
        })?;
        count += 1;
    }
    Ok(count)
}

/// Creates `path` exclusively (O_CREAT | O_EXCL) and writes `content`.
pub fn write_new(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                StorageError::AlreadyExists(path.to_path_buf())
            } else {
                StorageError::WriteFile {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
    file.write_all(content).map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Writes `content` to a sibling temp file and renames it over `path`, so
/// readers never see a partial file.
pub fn write_replace(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".tmp-{}", name));
    if exists(&tmp) {
        remove_file_if_exists(&tmp)?;
    }
    write_new(&tmp, content)?;
    fs::rename(&tmp, path).map_err(|e| StorageError::MoveFile {
        from: tmp.clone(),
        to: path.to_path_buf(),
        source: e,
    })
}

/// Removes a file; a file that is already gone counts as removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

pub fn remove_dir_all(path: &Path) -> Result<(), StorageError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

pub fn read_to_string(path: &Path) -> Result<String, StorageError> {
    fs::read_to_string(path).map_err(|e| StorageError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Hard-links `src` to `dst`, copying when the two live on different
/// filesystems. Never replaces an existing `dst`.
pub fn link_or_copy(src: &Path, dst: &Path) -> Result<(), StorageError> {
    must_not_exist(dst)?;
    if fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    copy_file(src, dst)
}

/// A uniquely named working directory that is removed when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates `<parent>/<prefix><uuid>`. Pass the system temp dir for
    /// throwaway files, or a directory on the destination filesystem when
    /// the results will be renamed into place.
    pub fn new_in(parent: &Path, prefix: &str) -> Result<Self, StorageError> {
        let path = parent.join(format!("{}{}", prefix, uuid::Uuid::new_v4()));
        fs::create_dir_all(&path).map_err(|e| StorageError::CreateDirectory {
            path: path.clone(),
            source: e,
        })?;
        Ok(Self { path })
    }

    pub fn new(prefix: &str) -> Result<Self, StorageError> {
        Self::new_in(&std::env::temp_dir(), prefix)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join<P: AsRef<Path>>(&self, part: P) -> PathBuf {
        self.path.join(part)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "unable to remove scratch directory");
            }
        }
    }
}
