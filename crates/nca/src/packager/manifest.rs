//! Per-directory `.manifest` files: a JSON snapshot of a directory's files
//! (name, size, modification time and SHA-256). Written by the MakeManifest
//! job when files land on disk, and read back by the bag writer so large
//! batches need not be hashed twice.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::filesystem::{list_files, read_to_string, sha256_file, write_replace};

pub const MANIFEST_FILE: &str = ".manifest";
pub const SHA256: &str = "sha256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(skip)]
    dir: PathBuf,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub hasher: String,
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            created: Utc::now(),
            hasher: String::new(),
            files: Vec::new(),
        }
    }

    /// Records every regular file directly inside `dir` (the manifest file
    /// itself excluded), hashing each with SHA-256.
    pub fn build_hashed(dir: &Path) -> Result<Self, StorageError> {
        let mut manifest = Self::new(dir);
        manifest.hasher = SHA256.to_string();

        for path in list_files(dir)? {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if name == MANIFEST_FILE {
                continue;
            }
            let meta = fs::metadata(&path).map_err(|e| StorageError::Read {
                path: path.clone(),
                source: e,
            })?;
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            manifest.files.push(FileEntry {
                name,
                size: meta.len(),
                modified,
                sum: sha256_file(&path)?,
            });
        }
        Ok(manifest)
    }

    /// Reads `dir/.manifest`. A missing or unreadable manifest is `None`:
    /// the file is only ever a cache.
    pub fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return None;
        }
        let raw = match read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable manifest");
                return None;
            }
        };
        match serde_json::from_str::<Manifest>(&raw) {
            Ok(mut m) => {
                m.dir = dir.to_path_buf();
                Some(m)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring invalid manifest");
                None
            }
        }
    }

    pub fn write(&self) -> Result<(), StorageError> {
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        write_replace(&path, &json)
    }

    /// Precomputed SHA-256 for `name`, if this manifest carries one.
    pub fn sha256_for(&self, name: &str) -> Option<&str> {
        if self.hasher != SHA256 {
            return None;
        }
        self.files
            .iter()
            .find(|f| f.name == name && !f.sum.is_empty())
            .map(|f| f.sum.as_str())
    }
}

/// Lazily loaded manifests keyed by directory.
#[derive(Debug, Default)]
pub struct ManifestCache {
    dirs: HashMap<PathBuf, Option<Manifest>>,
}

impl ManifestCache {
    /// Looks up a precomputed sum for `path` in its directory's manifest.
    pub fn sha256_for(&mut self, path: &Path) -> Option<String> {
        let dir = path.parent()?;
        let name = path.file_name()?.to_string_lossy().to_string();
        let manifest = self
            .dirs
            .entry(dir.to_path_buf())
            .or_insert_with(|| Manifest::load(dir));
        manifest.as_ref()?.sha256_for(&name).map(str::to_string)
    }
}
