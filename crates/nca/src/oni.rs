//! Client for the ONI Agent, the daemon that loads and purges batches on an
//! Open ONI instance. Commands travel over a pluggable transport and every
//! reply is a JSON envelope with a `status` of `success` or `error`.

use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::config::AgentConnection;
use crate::error::AgentError;

/// Seconds allowed for the ssh connection to come up.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Terminates a multi-line payload sent on stdin.
pub const PAYLOAD_TERMINATOR: &str = "\n\nEND\n";

/// Sends a command to an agent and returns its raw reply.
pub trait AgentTransport: Send + Sync {
    fn call(&self, params: &[String], stdin: Option<&str>) -> Result<Vec<u8>, AgentError>;
}

/// Runs commands through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshTransport {
    connection: AgentConnection,
    program: String,
}

impl SshTransport {
    pub fn new(connection: AgentConnection) -> Self {
        Self {
            connection,
            program: "ssh".to_string(),
        }
    }
}

impl AgentTransport for SshTransport {
    fn call(&self, params: &[String], stdin: Option<&str>) -> Result<Vec<u8>, AgentError> {
        let remote = params.iter().map(|p| shell_quote(p)).collect::<Vec<_>>().join(" ");
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(self.connection.port.to_string())
            .arg("-o")
            .arg(format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS))
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg(&self.connection.host)
            .arg(&remote)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(agent = %self.connection, command = %remote, "calling ONI agent");
        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Transport(format!("starting ssh to {}: {}", self.connection, e)))?;

        if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(payload.as_bytes())
                .map_err(|e| AgentError::Transport(format!("sending payload: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| AgentError::Transport(format!("waiting for ssh: {}", e)))?;
        if !output.status.success() {
            return Err(AgentError::Transport(format!(
                "sending command {:?} to {}: {} {}",
                remote,
                self.connection,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Single-quotes `s` for a POSIX shell unless it is plainly safe.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Status of a job running inside the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteJobStatus {
    Pending,
    Started,
    CouldNotStart,
    Successful,
    Failed,
}

impl RemoteJobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "started" => Some(Self::Started),
            "couldn't start" => Some(Self::CouldNotStart),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::CouldNotStart => "couldn't start",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending | Self::Started)
    }
}

impl fmt::Display for RemoteJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    job: Option<Value>,
}

impl Envelope {
    fn job(&self) -> Result<&Value, AgentError> {
        self.job.as_ref().ok_or(AgentError::Missing("\"job\" object"))
    }
}

/// RPC client for a single agent.
#[derive(Clone)]
pub struct OniAgent {
    transport: Arc<dyn AgentTransport>,
}

impl fmt::Debug for OniAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OniAgent").finish_non_exhaustive()
    }
}

impl OniAgent {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self { transport }
    }

    pub fn over_ssh(connection: AgentConnection) -> Self {
        Self::new(Arc::new(SshTransport::new(connection)))
    }

    fn call(&self, params: &[&str], stdin: Option<&str>) -> Result<Envelope, AgentError> {
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        let raw = self.transport.call(&params, stdin)?;
        let text = String::from_utf8_lossy(&raw);

        // Only the first JSON value counts; trailing bytes are ignored
        let envelope = serde_json::Deserializer::from_str(&text)
            .into_iter::<Envelope>()
            .next()
            .unwrap_or_else(|| serde_json::from_str::<Envelope>(""))
            .map_err(|e| AgentError::Decode {
                raw: text.to_string(),
                source: e,
            })?;

        let status = envelope.status.clone();
        match status.as_str() {
            "success" => Ok(envelope),
            "error" => {
                let msg = envelope
                    .message
                    .or(envelope.error)
                    .unwrap_or_else(|| "no message".to_string());
                Err(AgentError::Remote(format!("calling {:?}: {}", params.join(" "), msg)))
            }
            other => Err(AgentError::Remote(format!(
                "parsing status for call to {:?}: invalid value {:?}",
                params.join(" "),
                other
            ))),
        }
    }

    fn job_id(envelope: &Envelope) -> Result<i64, AgentError> {
        envelope
            .job()?
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(AgentError::Missing("job id"))
    }

    /// Asks the agent to load a batch; returns the agent's job id.
    pub fn load_batch(&self, name: &str) -> Result<i64, AgentError> {
        Self::job_id(&self.call(&["load-batch", name], None)?)
    }

    /// Asks the agent to purge a batch; returns the agent's job id.
    pub fn purge_batch(&self, name: &str) -> Result<i64, AgentError> {
        Self::job_id(&self.call(&["purge-batch", name], None)?)
    }

    pub fn version(&self) -> Result<String, AgentError> {
        self.call(&["version"], None)?
            .version
            .ok_or(AgentError::Missing("version"))
    }

    /// Verifies or creates an awardee (MARC org code) in ONI.
    pub fn ensure_awardee(&self, code: &str, name: &str) -> Result<String, AgentError> {
        Ok(self.call(&["ensure-awardee", code, name], None)?.message.unwrap_or_default())
    }

    /// Sends a title's MARC XML to be created or updated; returns the
    /// agent's job id.
    pub fn load_title(&self, marc_xml: &str) -> Result<i64, AgentError> {
        let payload = format!("{}{}", marc_xml.trim_end(), PAYLOAD_TERMINATOR);
        Self::job_id(&self.call(&["load-title"], Some(&payload))?)
    }

    pub fn job_status(&self, id: i64) -> Result<RemoteJobStatus, AgentError> {
        let id = id.to_string();
        let envelope = self.call(&["job-status", &id], None)?;
        let raw = envelope
            .job()?
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        RemoteJobStatus::parse(&raw).ok_or(AgentError::UnknownStatus(raw))
    }

    /// Combined stdout and stderr lines of a remote job, sorted.
    pub fn job_logs(&self, id: i64) -> Result<Vec<String>, AgentError> {
        let id = id.to_string();
        let envelope = self.call(&["job-logs", &id], None)?;
        let job = envelope.job()?;

        let mut logs = Vec::new();
        for stream in ["stdout", "stderr"] {
            if let Some(lines) = job.get(stream).and_then(Value::as_array) {
                logs.extend(lines.iter().map(|l| match l {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }));
            }
        }
        logs.sort();
        Ok(logs)
    }
}
