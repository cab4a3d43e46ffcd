//! Test harness for isolated pipeline runs.
//!
//! `TestHarness` owns a temporary NCA tree with its own on-disk database and
//! a dispatcher that handles every job type, so a test can queue work and
//! drain it synchronously.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use nca::config::Config;
use nca::db::{batch_repo, issue_repo, job_repo, Database};
use nca::handlers::{JobContext, ProcessResponse};
use nca::models::{Batch, Issue, Job, JobType};
use nca::worker::Dispatcher;

/// Drain stops after this many jobs so a runaway retry loop fails the test
/// instead of hanging it.
const DRAIN_LIMIT: usize = 500;

pub struct TestHarness {
    temp_dir: TempDir,
    pub ctx: JobContext,
    dispatcher: Dispatcher,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();

        let config = Config {
            db_path: root.join("nca.db"),
            workflow_path: root.join("workflow"),
            pdf_page_review_path: root.join("page_review"),
            pdf_backup_path: root.join("backup"),
            batch_output_path: root.join("batches"),
            errored_issues_path: root.join("errors"),
            webroot: "https://oregonnews.example.org".to_string(),
            min_batch_size: 1,
            max_batch_size: 100,
            derivative_workers: 1,
            ..Config::default()
        };
        for dir in [
            &config.workflow_path,
            &config.pdf_page_review_path,
            &config.pdf_backup_path,
            &config.batch_output_path,
            &config.errored_issues_path,
        ] {
            std::fs::create_dir_all(dir).expect("Failed to create NCA directory");
        }

        let db = Database::open(&config.db_path).expect("Failed to open database");
        let ctx = JobContext::new(db, Arc::new(config));
        let dispatcher = Dispatcher::new("test", JobType::ALL.to_vec(), ctx.clone());

        Self {
            temp_dir,
            ctx,
            dispatcher,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn db(&self) -> &Database {
        &self.ctx.db
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Creates `rel` under the harness root with a few small files in it.
    pub fn make_dir(&self, rel: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.root().join(rel);
        std::fs::create_dir_all(&dir).expect("Failed to create dir");
        for (name, content) in files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create parent");
            }
            std::fs::write(path, content).expect("Failed to write file");
        }
        dir
    }

    pub fn save_issue(&self, issue: &mut Issue) {
        self.db()
            .with_conn(|conn| issue_repo::save(conn, issue))
            .expect("Failed to save issue");
    }

    pub fn save_batch(&self, batch: &mut Batch) {
        self.db()
            .with_conn(|conn| batch_repo::save(conn, batch))
            .expect("Failed to save batch");
    }

    pub fn issue(&self, id: i64) -> Issue {
        self.db()
            .with_conn(|conn| issue_repo::get(conn, id))
            .expect("Failed to load issue")
    }

    pub fn batch(&self, id: i64) -> Batch {
        self.db()
            .with_conn(|conn| batch_repo::get(conn, id))
            .expect("Failed to load batch")
    }

    /// Jobs in a pipeline, oldest row first.
    pub fn pipeline_jobs(&self, pipeline_id: i64) -> Vec<Job> {
        let mut jobs = self
            .db()
            .with_conn(|conn| job_repo::find_by_pipeline(conn, pipeline_id))
            .expect("Failed to load jobs");
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub fn count(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        self.db()
            .with_conn(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
            .expect("Failed to count rows")
    }

    /// Runs every job that is runnable now, in the order the queue hands
    /// them out, until nothing is left.
    pub fn drain(&self) -> Vec<(Job, ProcessResponse)> {
        let mut ran = Vec::new();
        while let Some(outcome) = self
            .dispatcher
            .run_once(Utc::now())
            .expect("Failed to pop job")
        {
            ran.push(outcome);
            assert!(ran.len() < DRAIN_LIMIT, "drain did not settle");
        }
        ran
    }
}
