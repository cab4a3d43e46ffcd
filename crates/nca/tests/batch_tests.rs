//! Batch building from the ready queue through to a validated bag.

mod common;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use chrono::Utc;

use common::{IssueBuilder, TestHarness};
use nca::error::BagitError;
use nca::issuequeue::queue_batches;
use nca::models::{BatchStatus, JobType};
use nca::packager::bagit::{Bag, DATA_MANIFEST, TAG_MANIFEST};
use nca::ProcessResponse;

#[test]
fn test_ready_issues_become_a_validated_bag() {
    let h = TestHarness::new();
    let now = Utc::now();
    let mut issues = Vec::new();
    for (n, date) in ["1899-12-30", "1899-12-31"].iter().enumerate() {
        let dir = h.make_dir(
            &format!("workflow/issue{}", n),
            &[("0001.pdf", "page one"), ("0002.pdf", "page two"), ("0001.jp2", "jp2")],
        );
        let mut issue = IssueBuilder::new("oru", date)
            .pages(2)
            .location(dir.display().to_string())
            .ready_for_batching(now, 3)
            .build();
        h.save_issue(&mut issue);
        issues.push(issue);
    }

    let plans = queue_batches(h.db(), h.config(), now).unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].issues, 2);
    assert_eq!(plans[0].pages, 4);
    let batch_id = plans[0].batch.id;

    let ran = h.drain();
    assert!(
        ran.iter().all(|(_, r)| *r == ProcessResponse::Success),
        "{:?}",
        ran.iter().map(|(j, r)| (j.job_type, *r)).collect::<Vec<_>>()
    );
    assert_eq!(ran.last().map(|(j, _)| j.job_type), Some(JobType::WriteBagitManifest));

    let batch = h.batch(batch_id);
    assert_eq!(batch.status, BatchStatus::QcReady);
    let dir = std::path::PathBuf::from(&batch.location);
    assert_eq!(dir, h.config().batch_output_path.join(batch.full_name()));
    assert!(dir.join("data/batch.xml").is_file());
    assert!(dir.join("data/sn83025138/print/1899123001/0002.pdf").is_file());
    for issue in &issues {
        assert_eq!(h.issue(issue.id).batch_id, batch_id);
    }

    let bag = Bag::new(&dir);
    bag.validate_tag_manifest().unwrap();

    // Any change to a tag file must be caught before the bag is loaded
    let manifest = dir.join(DATA_MANIFEST);
    let mut text = std::fs::read_to_string(&manifest).unwrap();
    text.push_str("0000  data/extra.txt\n");
    std::fs::write(&manifest, text).unwrap();
    assert!(matches!(bag.validate_tag_manifest(), Err(BagitError::Mismatch(_))));
}

#[test]
fn test_nothing_ready_builds_nothing() {
    let h = TestHarness::new();
    let mut issue = IssueBuilder::new("oru", "1899-12-30").pages(4).build();
    h.save_issue(&mut issue);

    assert!(queue_batches(h.db(), h.config(), Utc::now()).unwrap().is_empty());
    assert_eq!(h.count("batches"), 0);
    assert_eq!(h.count("jobs"), 0);
}

#[test]
fn test_bag_tag_files_round_trip() {
    let tmp = TempDir::new().unwrap();
    tmp.child("data/sn83025138/print/1899123001/0001.pdf")
        .write_str("pdf")
        .unwrap();
    tmp.child("data/batch.xml").write_str("<batch/>").unwrap();

    let bag = Bag::new(tmp.path());
    bag.write_tag_files().unwrap();
    let declaration = std::fs::read_to_string(tmp.path().join("bagit.txt")).unwrap();
    assert!(declaration.starts_with("BagIt-Version: 1.0"));
    let manifest = std::fs::read_to_string(tmp.path().join(DATA_MANIFEST)).unwrap();
    assert!(manifest.contains("data/batch.xml"));
    assert!(manifest.contains("data/sn83025138/print/1899123001/0001.pdf"));
    bag.validate_tag_manifest().unwrap();

    // A missing tag manifest entry is a mismatch too
    let tags = std::fs::read_to_string(tmp.path().join(TAG_MANIFEST)).unwrap();
    let trimmed: String = tags
        .lines()
        .filter(|l| !l.ends_with("bagit.txt"))
        .map(|l| format!("{}\n", l))
        .collect();
    std::fs::write(tmp.path().join(TAG_MANIFEST), trimmed).unwrap();
    assert!(matches!(bag.validate_tag_manifest(), Err(BagitError::Mismatch(_))));
}

#[test]
fn test_bag_without_payload() {
    let tmp = TempDir::new().unwrap();
    let bag = Bag::new(tmp.path());
    assert!(matches!(bag.write_tag_files(), Err(BagitError::MissingData(_))));
}
