use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{Queue, QueuedIssue};
use crate::config::Config;
use crate::db::{batch_repo, issue_repo, reference_repo, Database};
use crate::error::QueueError;
use crate::models::{Batch, Title};
use crate::pipeline::recipes;

/// A batch created by [`queue_batches`] and the pipeline building it.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub batch: Batch,
    pub pipeline_id: i64,
    pub issues: usize,
    pub pages: u32,
}

/// Collects every issue ready for batching, one queue per MARC org code.
fn load_queues(db: &Database, config: &Config, now: DateTime<Utc>) -> Result<BTreeMap<String, Queue>, QueueError> {
    let issues = db.with_conn(issue_repo::find_ready_for_batching)?;
    let mut titles: HashMap<String, Option<Title>> = HashMap::new();
    let mut queues: BTreeMap<String, Queue> = BTreeMap::new();

    for issue in issues {
        if !titles.contains_key(&issue.lccn) {
            let title = db.with_conn(|conn| reference_repo::find_title_by_lccn(conn, &issue.lccn))?;
            titles.insert(issue.lccn.clone(), title);
        }
        let title = titles.get(&issue.lccn).and_then(Option::as_ref);

        let moc = issue.marc_org_code.clone();
        let entry = QueuedIssue::new(issue, title, config.embargo_days, now)?;
        queues.entry(moc).or_default().append(entry);
    }
    Ok(queues)
}

/// Turns every MOC's ready issues into batches and queues the pipeline
/// that builds each one.
///
/// Embargoed issues stay behind. A queue under `min_batch_size` pages
/// waits for more issues unless one of them is stale. Anything over
/// `max_batch_size` is split into balanced batches.
pub fn queue_batches(db: &Database, config: &Config, now: DateTime<Utc>) -> Result<Vec<BatchPlan>, QueueError> {
    let mut plans = Vec::new();

    for (moc, queue) in load_queues(db, config, now)? {
        let ready = queue.filter(|e| !e.is_embargoed(now));
        if ready.len() < queue.len() {
            debug!(moc = %moc, held = queue.len() - ready.len(), "Holding back embargoed issues");
        }
        if ready.is_empty() {
            continue;
        }

        if ready.pages() < config.min_batch_size && !ready.is_stale(now) {
            info!(
                moc = %moc,
                pages = ready.pages(),
                min = config.min_batch_size,
                "Not enough pages to batch yet"
            );
            continue;
        }

        for part in ready.split(config.max_batch_size) {
            let pages = part.pages();
            if pages > config.max_batch_size {
                warn!(moc = %moc, pages, "A single issue exceeds the maximum batch size");
            }
            let mut issues = part.into_issues();
            let mut batch = batch_repo::create(db, &config.webroot, &moc, &mut issues)?;
            let pipeline = recipes::make_batch(db, config, &mut batch)?;
            info!(
                batch = %batch.full_name(),
                issues = issues.len(),
                pages,
                pipeline_id = pipeline.id,
                "Queued batch"
            );
            plans.push(BatchPlan {
                batch,
                pipeline_id: pipeline.id,
                issues: issues.len(),
                pages,
            });
        }
    }

    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Issue, WorkflowStep};
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn config(min: u32, max: u32) -> Config {
        Config {
            min_batch_size: min,
            max_batch_size: max,
            webroot: "https://oregonnews.uoregon.edu".into(),
            ..Config::default()
        }
    }

    fn ready(db: &Database, moc: &str, date: &str, pages: u32, approved_days_ago: i64) -> Issue {
        let mut issue = Issue::new(moc, "sn83025138", date, 1);
        issue.page_count = pages;
        issue.workflow_step = WorkflowStep::ReadyForBatching;
        issue.metadata_approved_at = Some(now() - TimeDelta::days(approved_days_ago));
        db.with_conn(|conn| issue_repo::save(conn, &mut issue)).unwrap();
        issue
    }

    #[test]
    fn test_splits_large_queue() {
        let db = Database::open_in_memory().unwrap();
        for (day, pages) in [5, 6, 7, 8, 9, 11].iter().enumerate() {
            ready(&db, "oru", &format!("1900-01-{:02}", day + 1), *pages, 1);
        }

        let plans = queue_batches(&db, &config(10, 20), now()).unwrap();
        let mut pages: Vec<u32> = plans.iter().map(|p| p.pages).collect();
        pages.sort_unstable();
        assert_eq!(pages, vec![15, 15, 16]);

        for plan in &plans {
            let members = db.with_conn(|conn| batch_repo::issues(conn, &plan.batch)).unwrap();
            assert_eq!(members.len(), plan.issues);
        }
        assert!(db.with_conn(issue_repo::find_ready_for_batching).unwrap().is_empty());
    }

    #[test]
    fn test_small_queue_waits_unless_stale() {
        let db = Database::open_in_memory().unwrap();
        ready(&db, "oru", "1900-01-01", 4, 2);
        ready(&db, "hoodriverlibrary", "1900-01-02", 4, 45);

        let plans = queue_batches(&db, &config(100, 200), now()).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].batch.marc_org_code, "hoodriverlibrary");

        let left = db.with_conn(issue_repo::find_ready_for_batching).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].marc_org_code, "oru");
    }

    #[test]
    fn test_embargoed_issues_stay_behind() {
        let db = Database::open_in_memory().unwrap();
        let mut title = Title {
            lccn: "sn83025138".into(),
            embargo_period: "1 year".into(),
            ..Title::default()
        };
        db.with_conn(|conn| reference_repo::save_title(conn, &mut title)).unwrap();

        let held = ready(&db, "oru", "2024-03-01", 10, 60);
        ready(&db, "oru", "1900-01-01", 10, 60);

        let plans = queue_batches(&db, &config(1, 100), now()).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].issues, 1);

        let left = db.with_conn(issue_repo::find_ready_for_batching).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, held.id);
    }
}
