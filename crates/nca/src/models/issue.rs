//! Newspaper issues and their curation workflow.
//!
//! Workflow methods only mutate the in-memory record and return the
//! [`Action`] that must be saved alongside it; `issue_repo::save_with_action`
//! persists both in one transaction.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

use super::action::{Action, ActionType};
use super::issue_key::{IssueKey, IssueKeyError};
use super::string_enum;

/// How long a claim keeps an issue on a user's desk.
pub const CLAIM_DURATION_DAYS: i64 = 7;

string_enum! {
    /// Where an issue sits in its curation lifecycle.
    pub enum WorkflowStep ("workflow step") {
        AwaitingProcessing => "AwaitingProcessing",
        AwaitingPageReview => "AwaitingPageReview",
        ReadyForMetadataEntry => "ReadyForMetadataEntry",
        AwaitingMetadataReview => "AwaitingMetadataReview",
        ReadyForMetsXml => "ReadyForMETSXML",
        ReadyForBatching => "ReadyForBatching",
        InProduction => "InProduction",
        UnfixableMetadataError => "UnfixableMetadataError",
    }
}

/// Business-level refusals of a workflow transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssueError {
    #[error("issue {key} must be in {expected} but is in {actual}")]
    WrongStep {
        key: String,
        expected: WorkflowStep,
        actual: WorkflowStep,
    },
    #[error("issue {key} has an invalid date {date:?}")]
    InvalidDate { key: String, date: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub id: i64,
    pub marc_org_code: String,
    pub lccn: String,
    /// Publication date as `YYYY-MM-DD`. Kept as text because drafts may
    /// carry partial metadata.
    pub date: String,
    pub date_as_labeled: String,
    pub volume: String,
    /// The NDNP "issue number", which is free text.
    pub issue: String,
    pub edition: u32,
    pub edition_label: String,
    pub page_labels: Vec<String>,
    pub page_count: u32,

    pub location: String,
    pub backup_location: String,
    pub human_name: String,
    pub is_from_scanner: bool,
    pub workflow_step: WorkflowStep,
    pub workflow_owner_id: i64,
    pub workflow_owner_expires_at: Option<DateTime<Utc>>,
    pub metadata_entry_user_id: i64,
    pub metadata_entered_at: Option<DateTime<Utc>>,
    pub reviewed_by_user_id: i64,
    pub metadata_approved_at: Option<DateTime<Utc>>,
    pub rejected_by_user_id: i64,
    pub batch_id: i64,
    pub ignored: bool,
    pub draft_comment: String,
}

impl Issue {
    /// A new, unsaved issue awaiting processing.
    pub fn new(moc: &str, lccn: &str, date: &str, edition: u32) -> Self {
        Self {
            id: 0,
            marc_org_code: moc.to_string(),
            lccn: lccn.to_string(),
            date: date.to_string(),
            date_as_labeled: String::new(),
            volume: String::new(),
            issue: String::new(),
            edition,
            edition_label: String::new(),
            page_labels: Vec::new(),
            page_count: 0,
            location: String::new(),
            backup_location: String::new(),
            human_name: String::new(),
            is_from_scanner: false,
            workflow_step: WorkflowStep::AwaitingProcessing,
            workflow_owner_id: 0,
            workflow_owner_expires_at: None,
            metadata_entry_user_id: 0,
            metadata_entered_at: None,
            reviewed_by_user_id: 0,
            metadata_approved_at: None,
            rejected_by_user_id: 0,
            batch_id: 0,
            ignored: false,
            draft_comment: String::new(),
        }
    }

    /// `YYYYMMDDee`, the condensed date plus two-digit edition.
    pub fn date_edition(&self) -> String {
        format!("{}{:02}", self.date.replace('-', ""), self.edition)
    }

    /// `lccn/YYYYMMDDee`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.lccn, self.date_edition())
    }

    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()
    }

    /// The typed key; fails when the stored date is not a real date.
    pub fn issue_key(&self) -> Result<IssueKey, IssueKeyError> {
        let key = self.key();
        let date = self.parsed_date().ok_or_else(|| IssueKeyError::Date {
            key: key.clone(),
            reason: format!("unparseable date {:?}", self.date),
        })?;
        Ok(IssueKey::new(self.lccn.clone(), date, self.edition))
    }

    /// Canonical METS path. Only meaningful while the issue is on disk.
    pub fn mets_file(&self) -> PathBuf {
        PathBuf::from(&self.location).join(format!("{}.xml", self.date_edition()))
    }

    pub fn page_labels_csv(&self) -> String {
        self.page_labels.join(",")
    }

    pub fn set_page_labels_csv(&mut self, csv: &str) {
        self.page_labels = if csv.is_empty() {
            Vec::new()
        } else {
            csv.split(',').map(str::to_string).collect()
        };
    }

    /// Fills in the human name once the issue has an id. Never changes an
    /// existing name, so directory names built from it stay stable.
    pub fn ensure_human_name(&mut self) {
        if self.human_name.is_empty() && self.id != 0 {
            self.human_name = format!("{}-{}-{}", self.lccn, self.date_edition(), self.id);
        }
    }

    fn action(&self, action_type: ActionType, user_id: i64, message: &str) -> Action {
        Action::for_issue(self.id, action_type, user_id, message)
    }

    fn set_claim(&mut self, user_id: i64, now: DateTime<Utc>) {
        // The system user and "nobody" never own an issue
        if user_id <= 0 {
            return;
        }
        self.workflow_owner_id = user_id;
        self.workflow_owner_expires_at = Some(now + TimeDelta::days(CLAIM_DURATION_DAYS));
    }

    fn clear_claim(&mut self) {
        self.workflow_owner_id = 0;
        self.workflow_owner_expires_at = None;
    }

    pub fn claim(&mut self, user_id: i64) -> Action {
        self.set_claim(user_id, Utc::now());
        self.action(ActionType::Claim, user_id, "")
    }

    pub fn unclaim(&mut self, user_id: i64) -> Action {
        self.clear_claim();
        self.action(ActionType::Unclaim, user_id, "")
    }

    /// Sends curated metadata to review. A previously rejected issue goes
    /// straight back to the reviewer who rejected it, and the draft comment
    /// becomes the action's message.
    pub fn queue_for_metadata_review(&mut self, curator_id: i64) -> Action {
        let now = Utc::now();
        self.workflow_step = WorkflowStep::AwaitingMetadataReview;
        self.metadata_entry_user_id = curator_id;
        self.metadata_entered_at = Some(now);
        self.clear_claim();
        if self.rejected_by_user_id != 0 {
            self.set_claim(self.rejected_by_user_id, now);
        }

        let message = std::mem::take(&mut self.draft_comment);
        self.action(ActionType::MetadataEntry, curator_id, &message)
    }

    pub fn approve_metadata(&mut self, reviewer_id: i64) -> Action {
        self.clear_claim();
        self.metadata_approved_at = Some(Utc::now());
        self.reviewed_by_user_id = reviewer_id;
        self.workflow_step = WorkflowStep::ReadyForMetsXml;
        self.action(ActionType::MetadataApproval, reviewer_id, "")
    }

    /// Returns the issue to its curator's desk with the reviewer's notes.
    pub fn reject_metadata(&mut self, reviewer_id: i64, notes: &str) -> Action {
        self.set_claim(self.metadata_entry_user_id, Utc::now());
        self.rejected_by_user_id = reviewer_id;
        self.workflow_step = WorkflowStep::ReadyForMetadataEntry;
        self.action(ActionType::MetadataRejection, reviewer_id, notes)
    }

    /// Flags the issue as needing manual repair outside the workflow.
    pub fn report_error(&mut self, user_id: i64, message: &str) -> Action {
        self.workflow_step = WorkflowStep::UnfixableMetadataError;
        self.clear_claim();
        self.action(ActionType::ReportUnfixableError, user_id, message)
    }

    fn return_for(
        &mut self,
        step: WorkflowStep,
        action_type: ActionType,
        manager_id: i64,
        owner_id: i64,
        message: &str,
    ) -> Result<Action, IssueError> {
        if self.workflow_step != WorkflowStep::UnfixableMetadataError {
            return Err(IssueError::WrongStep {
                key: self.key(),
                expected: WorkflowStep::UnfixableMetadataError,
                actual: self.workflow_step,
            });
        }
        self.clear_claim();
        self.workflow_step = step;
        if owner_id > 0 {
            self.set_claim(owner_id, Utc::now());
        }
        Ok(self.action(action_type, manager_id, message))
    }

    /// Manager-only: sends an unfixable issue back to metadata entry,
    /// optionally onto `owner_id`'s desk.
    pub fn return_for_curation(
        &mut self,
        manager_id: i64,
        owner_id: i64,
        message: &str,
    ) -> Result<Action, IssueError> {
        self.return_for(
            WorkflowStep::ReadyForMetadataEntry,
            ActionType::ReturnCurate,
            manager_id,
            owner_id,
            message,
        )
    }

    /// Manager-only: sends an unfixable issue back to metadata review.
    pub fn return_for_review(
        &mut self,
        manager_id: i64,
        owner_id: i64,
        message: &str,
    ) -> Result<Action, IssueError> {
        self.return_for(
            WorkflowStep::AwaitingMetadataReview,
            ActionType::ReturnReview,
            manager_id,
            owner_id,
            message,
        )
    }

    /// Parks the issue where no automated or manual step will pick it up
    /// while removal jobs run.
    pub fn prep_for_removal(&mut self, manager_id: i64, message: &str) -> Action {
        self.clear_claim();
        self.workflow_step = WorkflowStep::AwaitingProcessing;
        self.action(ActionType::RemoveErrorIssue, manager_id, message)
    }

    /// Whether a claim is held and not yet expired.
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.workflow_owner_id > 0 && self.workflow_owner_expires_at.is_some_and(|t| t > now)
    }
}
