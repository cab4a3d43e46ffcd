//! Wrappers around the external programs the derivative and page-split
//! handlers shell out to.

pub mod alto;
pub mod jp2;
pub mod pdf;

use std::ffi::OsStr;
use std::process::Command;

use crate::error::ToolError;

/// Runs `program` with `args`, returning combined stdout on success. On a
/// non-zero exit the captured stderr (or stdout, if stderr is empty) is
/// carried in the error.
pub fn run_tool<I, S>(program: &str, args: I) -> Result<String, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    tracing::debug!(command = ?cmd, "running external tool");

    let output = cmd.output().map_err(|e| ToolError::Spawn {
        program: program.to_string(),
        source: e,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            stdout.trim().to_string()
        } else {
            stderr
        };
        for line in detail.lines() {
            tracing::debug!(program, "--> {}", line);
        }
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: detail,
        });
    }

    Ok(stdout)
}
