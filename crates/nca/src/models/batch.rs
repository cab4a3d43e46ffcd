//! Batches: deliverable groups of issues and their lifecycle.

use chrono::{DateTime, TimeDelta, Utc};

use super::string_enum;

/// Batch directories always carry this version suffix.
pub const BATCH_VERSION: u32 = 1;

/// A live batch must have been archived this long before it can close.
pub const CLOSE_AFTER_ARCHIVE_DAYS: i64 = 28;

string_enum! {
    pub enum BatchStatus ("batch status") {
        /// Build job scheduled but not yet run
        Pending => "pending",
        /// Built and waiting for a staging load
        QcReady => "qc_ready",
        OnStaging => "on_staging",
        /// Rejected in QC; problem issues are being flagged
        FailedQc => "failed_qc",
        PassedQc => "passed_qc",
        Live => "live",
        /// Live, archived, and gone from the workflow
        LiveDone => "live_done",
        Deleted => "deleted",
    }
}

impl BatchStatus {
    /// Whether a batch in this status may move to `next`. Re-saving the
    /// current status is always allowed so retried jobs stay idempotent.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        if *self == next {
            return true;
        }
        match self {
            Pending => true,
            QcReady => matches!(next, Pending | OnStaging | Deleted),
            OnStaging => matches!(next, Pending | FailedQc | PassedQc | QcReady | Deleted),
            FailedQc => matches!(next, Pending | Deleted),
            PassedQc => matches!(next, Pending | Live | OnStaging),
            Live => matches!(next, Pending | LiveDone),
            LiveDone | Deleted => false,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, BatchStatus::Live | BatchStatus::LiveDone)
    }

    pub fn is_staging(&self) -> bool {
        matches!(
            self,
            BatchStatus::OnStaging | BatchStatus::FailedQc | BatchStatus::PassedQc
        )
    }

    /// Human-friendly status text.
    pub fn describe(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "Pending: build job is scheduled but hasn't yet run",
            BatchStatus::QcReady => "Built, awaiting a staging load",
            BatchStatus::OnStaging => "On staging, awaiting quality control check",
            BatchStatus::FailedQc => "Failed quality control, awaiting QC issue flagging",
            BatchStatus::PassedQc => "Passed quality control, awaiting production load",
            BatchStatus::Live => "Live in production, awaiting archiving",
            BatchStatus::LiveDone => {
                "Live in production and archived: no longer available in NCA workflow"
            }
            BatchStatus::Deleted => "Removed from the system. Likely rebuilt under a new name.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("batch {name} cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: BatchStatus,
        to: BatchStatus,
    },
    #[error("cannot close batch {name}: {reason}")]
    NotClosable { name: String, reason: String },
    #[error("batch {name} does not allow issue flagging in status {status}")]
    FlaggingNotAllowed { name: String, status: BatchStatus },
    #[error("issue {issue_id} is not part of batch {name}")]
    NotMember { name: String, issue_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: i64,
    pub marc_org_code: String,
    /// The whimsical suffix, e.g. `A4JadeYetiEatingKelp`.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub went_live_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub location: String,
    /// Remote job id of the most recent ONI agent command.
    pub oni_agent_job_id: i64,
}

impl Batch {
    pub fn new(moc: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            marc_org_code: moc.to_string(),
            name: String::new(),
            created_at: now,
            archived_at: None,
            went_live_at: None,
            status: BatchStatus::Pending,
            location: String::new(),
            oni_agent_job_id: 0,
        }
    }

    /// `batch_<moc>_<YYYYMMDD><name>_ver01`, the directory name ONI ingests.
    pub fn full_name(&self) -> String {
        format!(
            "batch_{}_{}{}_ver{:02}",
            self.marc_org_code,
            self.created_at.format("%Y%m%d"),
            self.name,
            BATCH_VERSION
        )
    }

    /// Award year as NDNP expects it: the creation year.
    pub fn award_year(&self) -> i32 {
        use chrono::Datelike;
        self.created_at.year()
    }

    /// Moves to `next` if the lifecycle allows it.
    pub fn transition(&mut self, next: BatchStatus) -> Result<(), BatchError> {
        if !self.status.can_transition_to(next) {
            return Err(BatchError::InvalidTransition {
                name: self.full_name(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Marks the batch live as of `now`.
    /// Marks the batch live. Repeating this on a live batch keeps the
    /// original go-live time.
    pub fn set_live(&mut self, now: DateTime<Utc>) -> Result<(), BatchError> {
        let already_live = self.status == BatchStatus::Live;
        self.transition(BatchStatus::Live)?;
        if !already_live || self.went_live_at.is_none() {
            self.went_live_at = Some(now);
        }
        Ok(())
    }

    /// Records that the live batch's files have been archived.
    pub fn mark_archived(&mut self, now: DateTime<Utc>) {
        self.archived_at = Some(now);
    }

    /// Closes a live batch that was archived at least four weeks ago.
    pub fn close(&mut self, now: DateTime<Utc>) -> Result<(), BatchError> {
        if self.status != BatchStatus::Live {
            return Err(BatchError::NotClosable {
                name: self.full_name(),
                reason: format!("status is {}, not live", self.status),
            });
        }
        let cutoff = now - TimeDelta::days(CLOSE_AFTER_ARCHIVE_DAYS);
        match self.archived_at {
            Some(at) if at < cutoff => {}
            Some(_) => {
                return Err(BatchError::NotClosable {
                    name: self.full_name(),
                    reason: "archived fewer than four weeks ago".to_string(),
                })
            }
            None => {
                return Err(BatchError::NotClosable {
                    name: self.full_name(),
                    reason: "never archived".to_string(),
                })
            }
        }
        self.status = BatchStatus::LiveDone;
        Ok(())
    }

    /// Issue flagging is only meaningful while QC has rejected the batch.
    pub fn ensure_flaggable(&self) -> Result<(), BatchError> {
        if self.status != BatchStatus::FailedQc {
            return Err(BatchError::FlaggingNotAllowed {
                name: self.full_name(),
                status: self.status,
            });
        }
        Ok(())
    }
}
