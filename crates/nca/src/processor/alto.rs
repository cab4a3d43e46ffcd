use std::path::Path;

use super::run_tool;
use crate::error::ToolError;
use crate::storage::filesystem::{exists, remove_file_if_exists};

/// Inputs for one page's ALTO conversion.
#[derive(Debug, Clone)]
pub struct AltoJob<'a> {
    pub pdf: &'a Path,
    pub output: &'a Path,
    /// Resolution the page images are produced at, so ALTO coordinates line
    /// up with the JP2.
    pub dpi: u32,
    /// 1-based page number, recorded in the ALTO page element.
    pub image_number: usize,
    /// ISO 639-2 language of the title, e.g. `eng`.
    pub lang: &'a str,
}

/// Whether the converter actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltoOutcome {
    Skipped,
    Created,
}

/// Runs the configured PDF-to-ALTO converter for a single page. The tool is
/// invoked as `<tool> -dpi N -page N -lang L input.pdf output.xml`.
pub fn make_alto(tool: &str, job: &AltoJob<'_>, overwrite: bool) -> Result<AltoOutcome, ToolError> {
    if exists(job.output) {
        if !overwrite {
            tracing::info!(path = %job.output.display(), "not generating ALTO XML; file already exists");
            return Ok(AltoOutcome::Skipped);
        }
        tracing::debug!(path = %job.output.display(), "removing existing ALTO XML");
        remove_file_if_exists(job.output).map_err(|e| ToolError::Output(e.to_string()))?;
    }

    let lang = if job.lang.trim().is_empty() { "eng" } else { job.lang.trim() };
    let args = [
        "-dpi".to_string(),
        job.dpi.to_string(),
        "-page".to_string(),
        job.image_number.to_string(),
        "-lang".to_string(),
        lang.to_string(),
        job.pdf.display().to_string(),
        job.output.display().to_string(),
    ];

    tracing::info!(pdf = %job.pdf.display(), "generating ALTO XML");
    run_tool(tool, &args)?;

    // A converter that exits cleanly without writing anything is still a failure
    if !exists(job.output) {
        return Err(ToolError::Output(format!(
            "{} did not produce {}",
            tool,
            job.output.display()
        )));
    }
    Ok(AltoOutcome::Created)
}
