use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Address of an ONI agent's command endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConnection {
    pub host: String,
    pub port: u16,
}

impl FromStr for AgentConnection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("{:?} is not host:port", s))?;
        if host.is_empty() {
            return Err(format!("{:?} has no host", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("{:?} has an invalid port", s))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for AgentConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Typed application settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,

    // External tools
    pub ghostscript: String,
    pub pdfseparate: String,
    pub opj_compress: String,
    pub opj_decompress: String,
    pub pdf_to_alto: String,
    pub graphics_magick: String,

    // Filesystem layout
    pub workflow_path: PathBuf,
    pub pdf_page_review_path: PathBuf,
    pub pdf_backup_path: PathBuf,
    pub batch_output_path: PathBuf,
    pub errored_issues_path: PathBuf,

    // Derivatives
    pub dpi: u32,
    pub scanned_pdf_dpi: u32,
    pub quality: f32,
    pub minimum_issue_pages: u32,

    // Batching
    pub min_batch_size: u32,
    pub max_batch_size: u32,
    pub pdf_batch_marc_org_code: String,
    pub embargo_days: u32,

    // ONI agents
    pub staging_agent: Option<AgentConnection>,
    pub production_agent: Option<AgentConnection>,

    pub webroot: String,
    pub job_poll_interval: Duration,
    pub derivative_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("nca.db"),
            ghostscript: "gs".to_string(),
            pdfseparate: "pdfseparate".to_string(),
            opj_compress: "opj_compress".to_string(),
            opj_decompress: "opj_decompress".to_string(),
            pdf_to_alto: "pdftoalto".to_string(),
            graphics_magick: "gm".to_string(),
            workflow_path: PathBuf::new(),
            pdf_page_review_path: PathBuf::new(),
            pdf_backup_path: PathBuf::new(),
            batch_output_path: PathBuf::new(),
            errored_issues_path: PathBuf::new(),
            dpi: 150,
            scanned_pdf_dpi: 300,
            quality: 75.0,
            minimum_issue_pages: 2,
            min_batch_size: 500,
            max_batch_size: 1000,
            pdf_batch_marc_org_code: String::new(),
            embargo_days: 0,
            staging_agent: None,
            production_agent: None,
            webroot: String::new(),
            job_poll_interval: Duration::from_secs(1),
            derivative_workers: num_cpus::get(),
        }
    }
}

/// Pulls typed values out of the raw settings, recording a problem for
/// each key that is missing or malformed instead of stopping at the first.
struct Reader<'a> {
    values: &'a HashMap<String, String>,
    problems: Vec<String>,
}

impl Reader<'_> {
    fn string(&mut self, key: &str) -> String {
        match self.values.get(key) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                self.problems.push(format!("{} is required", key));
                String::new()
            }
        }
    }

    fn string_or(&mut self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => default.to_string(),
        }
    }

    fn path(&mut self, key: &str) -> PathBuf {
        PathBuf::from(self.string(key))
    }

    fn parsed<T: FromStr>(&mut self, key: &str, default: Option<T>) -> T
    where
        T: Default,
    {
        let values = self.values;
        match values.get(key).map(|v| v.trim()) {
            Some(v) if !v.is_empty() => match v.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.problems
                        .push(format!("{} has an invalid value {:?}", key, v));
                    T::default()
                }
            },
            _ => match default {
                Some(d) => d,
                None => {
                    self.problems.push(format!("{} is required", key));
                    T::default()
                }
            },
        }
    }

    fn agent(&mut self, key: &str) -> Option<AgentConnection> {
        let values = self.values;
        let raw = values.get(key)?.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<AgentConnection>() {
            Ok(conn) => Some(conn),
            Err(e) => {
                self.problems.push(format!("{}: {}", key, e));
                None
            }
        }
    }
}

impl Config {
    /// Builds a config from parsed settings. Missing and malformed keys are
    /// all reported together.
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut r = Reader {
            values,
            problems: Vec::new(),
        };
        let defaults = Config::default();

        let config = Config {
            db_path: r.path("DB_PATH"),
            ghostscript: r.string_or("GHOSTSCRIPT", &defaults.ghostscript),
            pdfseparate: r.string_or("PDFSEPARATE", &defaults.pdfseparate),
            opj_compress: r.string_or("OPJ_COMPRESS", &defaults.opj_compress),
            opj_decompress: r.string_or("OPJ_DECOMPRESS", &defaults.opj_decompress),
            pdf_to_alto: r.string_or("PDF_TO_ALTO", &defaults.pdf_to_alto),
            graphics_magick: r.string_or("GRAPHICS_MAGICK", &defaults.graphics_magick),
            workflow_path: r.path("WORKFLOW_PATH"),
            pdf_page_review_path: r.path("PDF_PAGE_REVIEW_PATH"),
            pdf_backup_path: r.path("PDF_BACKUP_PATH"),
            batch_output_path: r.path("BATCH_OUTPUT_PATH"),
            errored_issues_path: r.path("ERRORED_ISSUES_PATH"),
            dpi: r.parsed("DPI", None),
            scanned_pdf_dpi: r.parsed("SCANNED_PDF_DPI", Some(defaults.scanned_pdf_dpi)),
            quality: r.parsed("QUALITY", None),
            minimum_issue_pages: r.parsed("MINIMUM_ISSUE_PAGES", Some(defaults.minimum_issue_pages)),
            min_batch_size: r.parsed("MIN_BATCH_SIZE", None),
            max_batch_size: r.parsed("MAX_BATCH_SIZE", None),
            pdf_batch_marc_org_code: r.string("PDF_BATCH_MARC_ORG_CODE"),
            embargo_days: r.parsed("EMBARGO_DAYS", Some(0)),
            staging_agent: r.agent("STAGING_AGENT"),
            production_agent: r.agent("PRODUCTION_AGENT"),
            webroot: r.string("WEBROOT"),
            job_poll_interval: Duration::from_secs(r.parsed("JOB_POLL_INTERVAL_SECS", Some(1u64))),
            derivative_workers: r.parsed("DERIVATIVE_WORKERS", Some(defaults.derivative_workers)),
        };

        if r.problems.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Validation {
                problems: r.problems,
            })
        }
    }

    /// Checks value ranges and that every configured directory exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.dpi < 72 {
            problems.push(format!("DPI must be at least 72 (got {})", self.dpi));
        }
        if self.scanned_pdf_dpi < 72 {
            problems.push(format!(
                "SCANNED_PDF_DPI must be at least 72 (got {})",
                self.scanned_pdf_dpi
            ));
        }
        if self.quality <= 0.0 {
            problems.push(format!("QUALITY must be positive (got {})", self.quality));
        }
        if self.minimum_issue_pages == 0 {
            problems.push("MINIMUM_ISSUE_PAGES must be positive".to_string());
        }
        if self.max_batch_size == 0 {
            problems.push("MAX_BATCH_SIZE must be positive".to_string());
        }
        if self.min_batch_size > self.max_batch_size {
            problems.push(format!(
                "MIN_BATCH_SIZE ({}) must not exceed MAX_BATCH_SIZE ({})",
                self.min_batch_size, self.max_batch_size
            ));
        }
        if self.derivative_workers == 0 {
            problems.push("DERIVATIVE_WORKERS must be positive".to_string());
        }

        for (key, path) in self.directories() {
            if !path.is_dir() {
                problems.push(format!("{} ({}) is not a directory", key, path.display()));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation { problems })
        }
    }

    fn directories(&self) -> [(&'static str, &PathBuf); 5] {
        [
            ("WORKFLOW_PATH", &self.workflow_path),
            ("PDF_PAGE_REVIEW_PATH", &self.pdf_page_review_path),
            ("PDF_BACKUP_PATH", &self.pdf_backup_path),
            ("BATCH_OUTPUT_PATH", &self.batch_output_path),
            ("ERRORED_ISSUES_PATH", &self.errored_issues_path),
        ]
    }

    /// Connection for the named ONI environment (`staging` or `production`).
    pub fn agent_for(&self, env: &str) -> Option<&AgentConnection> {
        match env {
            "staging" => self.staging_agent.as_ref(),
            "production" => self.production_agent.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(dir: &std::path::Path) -> HashMap<String, String> {
        let d = dir.display();
        [
            ("DB_PATH", format!("{d}/nca.db")),
            ("WORKFLOW_PATH", format!("{d}")),
            ("PDF_PAGE_REVIEW_PATH", format!("{d}")),
            ("PDF_BACKUP_PATH", format!("{d}")),
            ("BATCH_OUTPUT_PATH", format!("{d}")),
            ("ERRORED_ISSUES_PATH", format!("{d}")),
            ("DPI", "150".into()),
            ("QUALITY", "75".into()),
            ("MIN_BATCH_SIZE", "10".into()),
            ("MAX_BATCH_SIZE", "20".into()),
            ("PDF_BATCH_MARC_ORG_CODE", "oru".into()),
            ("STAGING_AGENT", "staging.example.org:2222".into()),
            ("WEBROOT", "https://example.org".into()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn test_from_values() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_values(&values(dir.path())).unwrap();
        config.validate().unwrap();

        assert_eq!(config.dpi, 150);
        assert_eq!(config.scanned_pdf_dpi, 300);
        assert_eq!(config.max_batch_size, 20);
        assert_eq!(config.job_poll_interval, Duration::from_secs(1));
        let agent = config.agent_for("staging").unwrap();
        assert_eq!(agent.host, "staging.example.org");
        assert_eq!(agent.port, 2222);
        assert!(config.agent_for("production").is_none());
    }

    #[test]
    fn test_missing_keys_reported_together() {
        let err = Config::from_values(&HashMap::new()).unwrap_err();
        match err {
            ConfigError::Validation { problems } => {
                assert!(problems.iter().any(|p| p.starts_with("DB_PATH")));
                assert!(problems.iter().any(|p| p.starts_with("WEBROOT")));
                assert!(problems.iter().any(|p| p.starts_with("DPI")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_ranges_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = values(dir.path());
        v.insert("DPI".into(), "50".into());
        v.insert("MIN_BATCH_SIZE".into(), "30".into());
        v.insert("BATCH_OUTPUT_PATH".into(), "/nonexistent/batches".into());
        let config = Config::from_values(&v).unwrap();

        let ConfigError::Validation { problems } = config.validate().unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_bad_agent_and_number() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = values(dir.path());
        v.insert("PRODUCTION_AGENT".into(), "nohost".into());
        v.insert("QUALITY".into(), "high".into());
        let ConfigError::Validation { problems } = Config::from_values(&v).unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_agent_connection_display() {
        let conn: AgentConnection = "oni.local:22".parse().unwrap();
        assert_eq!(conn.to_string(), "oni.local:22");
        assert!(":22".parse::<AgentConnection>().is_err());
        assert!("host:http".parse::<AgentConnection>().is_err());
    }
}
