//! BagIt tag files for a batch directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::manifest::ManifestCache;
use crate::error::{BagitError, StorageError};
use crate::storage::filesystem::{read_to_string, sha256_bytes, sha256_file, write_replace};

pub const BAGIT_TXT: &str = "bagit.txt";
pub const DATA_MANIFEST: &str = "manifest-sha256.txt";
pub const TAG_MANIFEST: &str = "tagmanifest-sha256.txt";

const BAGIT_DECLARATION: &str = "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\n";

/// A bag rooted at a batch directory; payload lives under `data/`.
#[derive(Debug, Clone)]
pub struct Bag {
    root: PathBuf,
}

impl Bag {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Writes `bagit.txt`, the payload manifest and the tag manifest,
    /// replacing any previous versions.
    pub fn write_tag_files(&self) -> Result<(), BagitError> {
        let manifest = render(&self.payload_sums()?);
        write_replace(&self.root.join(BAGIT_TXT), BAGIT_DECLARATION.as_bytes())?;
        write_replace(&self.root.join(DATA_MANIFEST), manifest.as_bytes())?;

        let tags = self.tag_sums()?;
        write_replace(&self.root.join(TAG_MANIFEST), render(&tags).as_bytes())?;
        Ok(())
    }

    /// Recomputes the tag file sums and compares them with the stored tag
    /// manifest. Any difference is an error.
    pub fn validate_tag_manifest(&self) -> Result<(), BagitError> {
        let manifest_path = self.root.join(TAG_MANIFEST);
        let stored = parse_manifest(&manifest_path, &read_to_string(&manifest_path)?)?;
        let actual = self.tag_sums()?;

        for (path, sum) in &actual {
            match stored.get(path) {
                None => return Err(BagitError::Mismatch(format!("{} is not listed", path))),
                Some(expected) if expected != sum => {
                    return Err(BagitError::Mismatch(format!(
                        "{}: expected {}, got {}",
                        path, expected, sum
                    )))
                }
                Some(_) => {}
            }
        }
        for path in stored.keys() {
            if !actual.contains_key(path) {
                return Err(BagitError::Mismatch(format!("{} does not exist", path)));
            }
        }
        Ok(())
    }

    /// `data/...` path to SHA-256 for every payload file. Sums already
    /// recorded in a directory's `.manifest` are reused.
    pub fn payload_sums(&self) -> Result<BTreeMap<String, String>, BagitError> {
        let data = self.data_dir();
        if !data.is_dir() {
            return Err(BagitError::MissingData(data));
        }

        let mut cache = ManifestCache::default();
        let mut sums = BTreeMap::new();
        for entry in WalkDir::new(&data).min_depth(1) {
            let entry = entry.map_err(|e| StorageError::Scan {
                path: data.clone(),
                source: e,
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path();
            let sum = match cache.sha256_for(path) {
                Some(sum) => sum,
                None => sha256_file(path)?,
            };
            sums.insert(bag_path(&self.root, path), sum);
        }
        Ok(sums)
    }

    fn tag_sums(&self) -> Result<BTreeMap<String, String>, BagitError> {
        let mut sums = BTreeMap::new();
        for name in [BAGIT_TXT, DATA_MANIFEST] {
            let path = self.root.join(name);
            let content = std::fs::read(&path).map_err(|e| StorageError::Read {
                path: path.clone(),
                source: e,
            })?;
            sums.insert(name.to_string(), sha256_bytes(&content));
        }
        Ok(sums)
    }
}

/// Slash-separated path relative to the bag root.
fn bag_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn render(sums: &BTreeMap<String, String>) -> String {
    sums.iter()
        .map(|(path, sum)| format!("{}  {}\n", sum, path))
        .collect()
}

fn parse_manifest(path: &Path, content: &str) -> Result<BTreeMap<String, String>, BagitError> {
    let mut entries = BTreeMap::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let Some((sum, file)) = line.split_once(char::is_whitespace) else {
            return Err(BagitError::InvalidManifest {
                path: path.to_path_buf(),
                line: line.to_string(),
            });
        };
        let file = file.trim_start();
        if sum.is_empty() || file.is_empty() {
            return Err(BagitError::InvalidManifest {
                path: path.to_path_buf(),
                line: line.to_string(),
            });
        }
        entries.insert(file.to_string(), sum.to_string());
    }
    Ok(entries)
}
