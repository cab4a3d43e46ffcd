//! Groups issues that are ready for batching into page-bounded queues.
//!
//! Each issue is wrapped with the date its embargo lifts and the moment it
//! became batchable, so the builder can hold back embargoed issues and push
//! out small queues that have waited too long.

mod builder;

pub use builder::{queue_batches, BatchPlan};

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

use crate::error::QueueError;
use crate::models::{Issue, Title};

/// A queue with an issue that has waited longer than this is sent out even
/// when it is under the minimum batch size.
pub const STALE_AFTER_DAYS: i64 = 30;

/// An issue plus the dates that decide when it may be batched.
#[derive(Debug, Clone)]
pub struct QueuedIssue {
    pub issue: Issue,
    /// First day the issue may go public; `None` if it was never embargoed.
    pub embargo_lifts: Option<NaiveDate>,
    /// When the issue became batchable: the later of metadata approval and
    /// the embargo lifting.
    pub ready_since: DateTime<Utc>,
}

impl QueuedIssue {
    /// Wraps `issue` using its title's embargo period, or `default_days`
    /// when the title has none (or is unknown).
    pub fn new(
        issue: Issue,
        title: Option<&Title>,
        default_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, QueueError> {
        let published = issue
            .parsed_date()
            .ok_or_else(|| QueueError::InvalidDate { key: issue.key() })?;

        let fallback = Title::default();
        let title = title.unwrap_or(&fallback);
        let embargo_lifts = title
            .embargo_lift_date(published, default_days)
            .map_err(|source| QueueError::Embargo {
                lccn: issue.lccn.clone(),
                value: title.embargo_period.clone(),
                source,
            })?;

        let approved = issue.metadata_approved_at.unwrap_or(now);
        let ready_since = match embargo_lifts.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(lift) => approved.max(lift.and_utc()),
            None => approved,
        };

        Ok(Self {
            issue,
            embargo_lifts,
            ready_since,
        })
    }

    pub fn is_embargoed(&self, now: DateTime<Utc>) -> bool {
        self.embargo_lifts.is_some_and(|d| d > now.date_naive())
    }

    pub fn waited(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.ready_since
    }

    pub fn pages(&self) -> u32 {
        self.issue.page_count
    }
}

/// An ordered set of issues, unique by issue key, with a running page total.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    entries: Vec<QueuedIssue>,
    keys: HashSet<String>,
    pages: u32,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an issue unless one with the same key is already queued.
    /// Returns whether it was added.
    pub fn append(&mut self, entry: QueuedIssue) -> bool {
        if !self.keys.insert(entry.issue.key()) {
            return false;
        }
        self.pages += entry.pages();
        self.entries.push(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    pub fn entries(&self) -> &[QueuedIssue] {
        &self.entries
    }

    /// A new queue holding only the entries `keep` accepts.
    pub fn filter<F>(&self, mut keep: F) -> Queue
    where
        F: FnMut(&QueuedIssue) -> bool,
    {
        let mut out = Queue::new();
        for entry in self.entries.iter().filter(|e| keep(e)) {
            out.append(entry.clone());
        }
        out
    }

    /// The longest any queued issue has been waiting.
    pub fn longest_wait(&self, now: DateTime<Utc>) -> TimeDelta {
        self.entries
            .iter()
            .map(|e| e.waited(now))
            .max()
            .unwrap_or_else(TimeDelta::zero)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.longest_wait(now) > TimeDelta::days(STALE_AFTER_DAYS)
    }

    /// Splits the queue into the fewest queues that each stay at or under
    /// `max_pages`, balancing pages between them.
    ///
    /// Issues are placed largest first, each onto the lightest queue so
    /// far. When that leaves a queue over the limit, another queue is added
    /// and the placement redone. An issue bigger than `max_pages` on its own
    /// still gets a queue.
    pub fn split(&self, max_pages: u32) -> Vec<Queue> {
        if self.pages <= max_pages || self.entries.len() <= 1 || max_pages == 0 {
            return vec![self.clone()];
        }

        let mut sorted: Vec<&QueuedIssue> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.pages().cmp(&a.pages()));

        let mut count = (self.pages.div_ceil(max_pages) as usize).min(self.entries.len());
        loop {
            let queues = distribute(&sorted, count);
            let over = queues.iter().any(|q| q.pages > max_pages && q.len() > 1);
            if !over || count >= self.entries.len() {
                return queues;
            }
            count += 1;
        }
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.entries.into_iter().map(|e| e.issue).collect()
    }
}

fn distribute(sorted: &[&QueuedIssue], count: usize) -> Vec<Queue> {
    let mut queues: Vec<Queue> = (0..count).map(|_| Queue::new()).collect();
    for entry in sorted {
        // min_by_key keeps the first of equal queues
        if let Some(lightest) = queues.iter_mut().min_by_key(|q| q.pages) {
            lightest.append((*entry).clone());
        }
    }
    queues.retain(|q| !q.is_empty());
    queues
}
