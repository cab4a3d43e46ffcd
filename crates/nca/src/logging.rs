//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `NCA_LOG` environment variable (any `EnvFilter` directive string)
//! 3. `info`
//!
//! Records emitted through the `log` crate are bridged with `LogTracer`.

use std::str::FromStr;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::NcaError;

pub const LOG_ENV_VAR: &str = "NCA_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    /// JSON lines, including span fields
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" | "jsonl" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {:?}", other)),
        }
    }
}

/// Filter directives for the given CLI level, falling back to `NCA_LOG`.
fn filter_directives(cli_level: Option<&str>) -> String {
    let base = cli_level
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV_VAR).ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());

    // rusqlite's own tracing is far too chatty below warn
    format!("{},rusqlite=warn", base)
}

fn build_env_filter(cli_level: Option<&str>) -> Result<EnvFilter, NcaError> {
    let directives = filter_directives(cli_level);
    EnvFilter::try_new(&directives)
        .map_err(|e| NcaError::Logging(format!("invalid filter {:?}: {}", directives, e)))
}

/// Installs the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<&str>, format: LogFormat) -> Result<(), NcaError> {
    tracing_log::LogTracer::init().ok();

    let filter = build_env_filter(cli_level)?;
    let layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::NONE)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| NcaError::Logging(e.to_string()))?;

    tracing::debug!(filter = %filter_directives(cli_level), "logging initialized");
    Ok(())
}
