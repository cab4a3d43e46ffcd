//! Builders for issues in the states the recipes expect.

#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, Utc};

use nca::models::{Issue, WorkflowStep};

pub const LCCN: &str = "sn83025138";

pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    pub fn new(moc: &str, date: &str) -> Self {
        Self {
            issue: Issue::new(moc, LCCN, date, 1),
        }
    }

    pub fn edition(mut self, edition: u32) -> Self {
        self.issue.edition = edition;
        self
    }

    pub fn pages(mut self, pages: u32) -> Self {
        self.issue.page_count = pages;
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.issue.location = location.into();
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.issue.workflow_step = step;
        self
    }

    /// Approved `days_ago` days before `now` and waiting in the batch queue.
    pub fn ready_for_batching(mut self, now: DateTime<Utc>, days_ago: i64) -> Self {
        self.issue.workflow_step = WorkflowStep::ReadyForBatching;
        self.issue.metadata_approved_at = Some(now - TimeDelta::days(days_ago));
        self
    }

    pub fn build(self) -> Issue {
        self.issue
    }
}
