//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A row referenced by id does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A batch operation was refused by the batch lifecycle rules.
    #[error("Batch rejected: {0}")]
    Batch(#[from] crate::models::batch::BatchError),

    /// An issue operation was refused by the workflow rules.
    #[error("Issue rejected: {0}")]
    Issue(#[from] crate::models::issue::IssueError),

    /// A stored or requested value is outside the allowed set.
    #[error("Invalid {entity} state: {reason}")]
    InvalidState {
        entity: &'static str,
        reason: String,
    },
}

impl DatabaseError {
    pub(crate) fn invalid(entity: &'static str, reason: impl Into<String>) -> Self {
        DatabaseError::InvalidState {
            entity,
            reason: reason.into(),
        }
    }
}
