//! Table-driven tests for loading settings files from disk.

use std::time::Duration;

use assert_fs::prelude::*;
use assert_fs::TempDir;

use nca::config::load_config;

/// A settings file to load, with `{root}` replaced by the temp dir.
struct ConfigTestCase {
    name: &'static str,
    settings: &'static str,
    should_succeed: bool,
    expected_error: Option<&'static str>,
}

const BASE: &str = r#"
DB_PATH={root}/nca.db
WORKFLOW_PATH={root}/workflow
PDF_PAGE_REVIEW_PATH={root}/page_review
PDF_BACKUP_PATH={root}/backup
BATCH_OUTPUT_PATH={root}/batches
ERRORED_ISSUES_PATH={root}/errors
DPI=150
QUALITY=75
MIN_BATCH_SIZE=500
MAX_BATCH_SIZE=1000
PDF_BATCH_MARC_ORG_CODE=oru
WEBROOT=https://oregonnews.example.org
"#;

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        settings: "",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_with_exports_and_quotes",
        settings: "# runner tuning\nexport JOB_POLL_INTERVAL_SECS=\"5\"\nDERIVATIVE_WORKERS='3'\nSTAGING_AGENT=staging.example.org:2222\n",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "min_batch_above_max",
        settings: "MIN_BATCH_SIZE=2000\n",
        should_succeed: false,
        expected_error: Some("MIN_BATCH_SIZE (2000) must not exceed MAX_BATCH_SIZE (1000)"),
    },
    ConfigTestCase {
        name: "bad_number",
        settings: "DPI=lots\n",
        should_succeed: false,
        expected_error: Some("DPI has an invalid value"),
    },
    ConfigTestCase {
        name: "garbage_line",
        settings: "this is not a setting\n",
        should_succeed: false,
        expected_error: Some("Invalid config line"),
    },
    ConfigTestCase {
        name: "zero_derivative_workers",
        settings: "DERIVATIVE_WORKERS=0\n",
        should_succeed: false,
        expected_error: Some("DERIVATIVE_WORKERS must be positive"),
    },
];

/// Creates the NCA directories and writes `BASE` plus `extra` (later keys
/// win) to `nca.conf`.
fn write_settings(tmp: &TempDir, extra: &str) -> std::path::PathBuf {
    for dir in ["workflow", "page_review", "backup", "batches", "errors"] {
        tmp.child(dir).create_dir_all().unwrap();
    }
    let root = tmp.path().display().to_string();
    let content = format!("{}{}", BASE, extra).replace("{root}", &root);
    let file = tmp.child("nca.conf");
    file.write_str(&content).unwrap();
    file.path().to_path_buf()
}

#[test]
fn test_config_loading() {
    for case in CONFIG_TESTS {
        let tmp = TempDir::new().unwrap();
        let path = write_settings(&tmp, case.settings);
        let result = load_config(&path);

        if case.should_succeed {
            assert!(result.is_ok(), "{}: {:?}", case.name, result.err());
        } else {
            let err = result.expect_err(case.name).to_string();
            if let Some(expected) = case.expected_error {
                assert!(err.contains(expected), "{}: {:?} lacks {:?}", case.name, err, expected);
            }
        }
    }
}

#[test]
fn test_optional_values() {
    let tmp = TempDir::new().unwrap();
    let path = write_settings(
        &tmp,
        "export JOB_POLL_INTERVAL_SECS=\"5\"\nDERIVATIVE_WORKERS='3'\nEMBARGO_DAYS=30\n",
    );
    let config = load_config(&path).unwrap();

    assert_eq!(config.job_poll_interval, Duration::from_secs(5));
    assert_eq!(config.derivative_workers, 3);
    assert_eq!(config.embargo_days, 30);
    assert_eq!(config.db_path, tmp.path().join("nca.db"));
    assert!(config.staging_agent.is_none());
}

#[test]
fn test_missing_directory() {
    let tmp = TempDir::new().unwrap();
    let path = write_settings(&tmp, "");
    std::fs::remove_dir(tmp.path().join("errors")).unwrap();

    let err = load_config(&path).unwrap_err().to_string();
    assert!(err.contains("ERRORED_ISSUES_PATH"), "{}", err);
}
