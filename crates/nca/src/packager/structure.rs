use std::path::{Path, PathBuf};

use crate::error::PackageError;
use crate::models::{Batch, Issue};
use crate::storage::filesystem::{ensure_dir, link_files, must_not_exist};

/// Where a batch is assembled before being renamed into place.
pub fn wip_dir(batch_output: &Path, batch: &Batch) -> PathBuf {
    batch_output.join(format!(".wip-{}", batch.full_name()))
}

pub fn final_dir(batch_output: &Path, batch: &Batch) -> PathBuf {
    batch_output.join(batch.full_name())
}

/// NDNP location of an issue inside a batch: `data/<lccn>/print/<date+ed>`.
pub fn issue_dir(batch_dir: &Path, issue: &Issue) -> PathBuf {
    batch_dir
        .join("data")
        .join(&issue.lccn)
        .join("print")
        .join(issue.date_edition())
}

/// Creates the batch directory tree at `dest` and hard-links each issue's
/// files into it. Fails without touching anything if `dest` exists.
pub fn create_batch_structure(dest: &Path, issues: &[Issue]) -> Result<usize, PackageError> {
    must_not_exist(dest)?;

    for issue in issues {
        if issue.location.is_empty() {
            return Err(PackageError::Issue {
                key: issue.key(),
                reason: "issue has no location".to_string(),
            });
        }
    }

    ensure_dir(&dest.join("data"))?;
    let mut linked = 0;
    for issue in issues {
        let target = issue_dir(dest, issue);
        tracing::debug!(issue = %issue.key(), target = %target.display(), "linking issue files");
        linked += link_files(Path::new(&issue.location), &target)?;
    }
    Ok(linked)
}
