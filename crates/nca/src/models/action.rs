//! Audit records attached to issues and batches.

use chrono::{DateTime, Utc};

use super::{string_enum, ObjectType};

/// User id for actions recorded by the system itself.
pub const SYSTEM_USER_ID: i64 = -1;

string_enum! {
    pub enum ActionType ("action type") {
        Comment => "user-comment",
        InternalProcess => "internal-process",
        MetadataRejection => "metadata-rejection",
        MetadataApproval => "metadata-approval",
        MetadataEntry => "metadata-entry",
        ReportUnfixableError => "report-unfixable-error",
        ReturnCurate => "return-metadata-entry",
        ReturnReview => "return-metadata-review",
        RemoveErrorIssue => "remove-error-issue",
        Claim => "claim-issue",
        Unclaim => "unclaim-issue",
        ApproveBatch => "approve-batch",
        RejectBatch => "reject-batch",
        FinalizeBatch => "finalize-batch",
        AbortBatchRejection => "abort-reject-batch",
        FlagBatchQcReady => "flag-batch-qc-ready",
    }
}

impl ActionType {
    /// Human-readable past-tense description, as shown in action logs.
    pub fn describe(&self) -> &'static str {
        match self {
            ActionType::Comment => "wrote a comment",
            ActionType::InternalProcess => "executed an internal process",
            ActionType::MetadataRejection => "rejected the issue's metadata",
            ActionType::MetadataApproval => "approved the issue's metadata",
            ActionType::MetadataEntry => "added metadata and pushed the issue to review",
            ActionType::ReportUnfixableError => "reported an unfixable error",
            ActionType::ReturnCurate => "returned the issue for metadata entry",
            ActionType::ReturnReview => "returned the issue for metadata review",
            ActionType::RemoveErrorIssue => "moved the issue from NCA to the error folder",
            ActionType::Claim => "claimed the issue",
            ActionType::Unclaim => "removed the issue from the prior owner's desk",
            ActionType::ApproveBatch => "approved the batch to be loaded into production",
            ActionType::RejectBatch => "rejected the batch",
            ActionType::FinalizeBatch => {
                "finalized the batch for rebuild after rejecting one or more issues"
            }
            ActionType::AbortBatchRejection => "returned the batch to QC with no changes",
            ActionType::FlagBatchQcReady => "flagged the batch as being ready for QC",
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub object_type: ObjectType,
    pub object_id: i64,
    pub action_type: ActionType,
    pub user_id: i64,
    pub message: String,
}

impl Action {
    pub fn new(
        object_type: ObjectType,
        object_id: i64,
        action_type: ActionType,
        user_id: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            object_type,
            object_id,
            action_type,
            user_id,
            message: message.into(),
        }
    }

    pub fn for_issue(issue_id: i64, action_type: ActionType, user_id: i64, message: &str) -> Self {
        Self::new(ObjectType::Issue, issue_id, action_type, user_id, message)
    }

    pub fn for_batch(batch_id: i64, action_type: ActionType, user_id: i64, message: &str) -> Self {
        Self::new(ObjectType::Batch, batch_id, action_type, user_id, message)
    }

    /// Whether this action belongs in the curation history shown to users
    /// (internal bookkeeping without a message is hidden).
    pub fn is_workflow_visible(&self) -> bool {
        self.action_type != ActionType::InternalProcess || !self.message.is_empty()
    }
}
