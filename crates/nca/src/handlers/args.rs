//! Typed views over a job's string args.
//!
//! Each handler parses the args it needs into one of these structs before
//! doing any work; the composer builds args through the same structs, so
//! the raw keys never leak past this module.

use std::path::PathBuf;

use crate::error::ArgsError;
use crate::models::{Args, BatchStatus, WorkflowStep};

pub const WORKFLOW_STEP: &str = "WorkflowStep";
pub const BATCH_STATUS: &str = "BatchStatus";
pub const LOCATION: &str = "Location";
pub const SOURCE: &str = "Source";
pub const DESTINATION: &str = "Destination";
pub const FORCED: &str = "Forced";
pub const MESSAGE: &str = "Message";
pub const EXCLUDE: &str = "Exclude";
pub const ID: &str = "ID";

fn required<'a>(args: &'a Args, key: &'static str) -> Result<&'a str, ArgsError> {
    args.get(key).ok_or(ArgsError::Missing(key))
}

/// Like [`required`], but an empty value is also rejected.
fn non_empty<'a>(args: &'a Args, key: &'static str) -> Result<&'a str, ArgsError> {
    let value = required(args, key)?;
    if value.trim().is_empty() {
        return Err(ArgsError::Invalid {
            key,
            value: value.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value)
}

fn parsed<T>(args: &Args, key: &'static str) -> Result<T, ArgsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = non_empty(args, key)?;
    raw.trim().parse::<T>().map_err(|e| ArgsError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowStepArgs {
    pub step: WorkflowStep,
}

impl WorkflowStepArgs {
    pub fn parse(args: &Args) -> Result<Self, ArgsError> {
        Ok(Self {
            step: parsed(args, WORKFLOW_STEP)?,
        })
    }

    pub fn to_args(self) -> Args {
        Args::new().with(WORKFLOW_STEP, self.step.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStatusArgs {
    pub status: BatchStatus,
}

impl BatchStatusArgs {
    pub fn parse(args: &Args) -> Result<Self, ArgsError> {
        Ok(Self {
            status: parsed(args, BATCH_STATUS)?,
        })
    }

    pub fn to_args(self) -> Args {
        Args::new().with(BATCH_STATUS, self.status.as_str())
    }
}

/// A single `Location` value. Metadata jobs accept an empty location (it
/// clears the field); filesystem jobs use [`LocationArgs::parse_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationArgs {
    pub location: String,
}

impl LocationArgs {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn parse(args: &Args) -> Result<Self, ArgsError> {
        Ok(Self::new(required(args, LOCATION)?))
    }

    /// The location as a path, which must be non-empty.
    pub fn parse_path(args: &Args) -> Result<PathBuf, ArgsError> {
        Ok(PathBuf::from(non_empty(args, LOCATION)?))
    }

    pub fn to_args(&self) -> Args {
        Args::new().with(LOCATION, self.location.as_str())
    }
}

/// Source and destination for copy, sync and rename jobs. `exclude` is a
/// comma-separated list of glob patterns matched against file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferArgs {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub exclude: String,
}

impl TransferArgs {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            exclude: String::new(),
        }
    }

    pub fn excluding(mut self, exclude: &str) -> Self {
        self.exclude = exclude.to_string();
        self
    }

    pub fn parse(args: &Args) -> Result<Self, ArgsError> {
        Ok(Self {
            source: PathBuf::from(non_empty(args, SOURCE)?),
            destination: PathBuf::from(non_empty(args, DESTINATION)?),
            exclude: args.get(EXCLUDE).unwrap_or_default().to_string(),
        })
    }

    pub fn to_args(&self) -> Args {
        let mut args = Args::new()
            .with(SOURCE, self.source.display().to_string())
            .with(DESTINATION, self.destination.display().to_string());
        if !self.exclude.is_empty() {
            args.set(EXCLUDE, self.exclude.as_str());
        }
        args
    }
}

/// `Forced=true` makes derivative jobs overwrite existing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForcedArgs {
    pub forced: bool,
}

impl ForcedArgs {
    pub fn parse(args: &Args) -> Result<Self, ArgsError> {
        let forced = match args.get(FORCED).map(str::trim) {
            None | Some("") => false,
            Some(v) => v.parse::<bool>().map_err(|e| ArgsError::Invalid {
                key: FORCED,
                value: v.to_string(),
                reason: e.to_string(),
            })?,
        };
        Ok(Self { forced })
    }

    pub fn to_args(self) -> Args {
        if self.forced {
            Args::new().with(FORCED, "true")
        } else {
            Args::new()
        }
    }
}

/// Message for the action-recording jobs. A missing message records an
/// action with empty text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageArgs {
    pub message: String,
}

impl MessageArgs {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn parse(args: &Args) -> Self {
        Self::new(args.get(MESSAGE).unwrap_or_default())
    }

    pub fn to_args(&self) -> Args {
        Args::new().with(MESSAGE, self.message.as_str())
    }
}

/// A numeric id: a user for `SetIssueCurated`, a remote job for
/// `OniWaitForJob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdArgs {
    pub id: i64,
}

impl IdArgs {
    pub fn parse(args: &Args) -> Result<Self, ArgsError> {
        let id: i64 = parsed(args, ID)?;
        if id <= 0 {
            return Err(ArgsError::Invalid {
                key: ID,
                value: id.to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        Ok(Self { id })
    }

    /// `None` when the arg is absent.
    pub fn parse_optional(args: &Args) -> Result<Option<Self>, ArgsError> {
        if args.get(ID).is_none() {
            return Ok(None);
        }
        Self::parse(args).map(Some)
    }

    pub fn to_args(self) -> Args {
        Args::new().with(ID, self.id.to_string())
    }
}

/// Which ONI agent an RPC job talks to, carried in `Location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEnv {
    Staging,
    Production,
}

impl AgentEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentEnv::Staging => "staging",
            AgentEnv::Production => "production",
        }
    }

    pub fn parse(args: &Args) -> Result<Self, ArgsError> {
        let raw = required(args, LOCATION)?;
        match raw.trim() {
            "staging" => Ok(AgentEnv::Staging),
            "production" => Ok(AgentEnv::Production),
            other => Err(ArgsError::Invalid {
                key: LOCATION,
                value: other.to_string(),
                reason: "expected staging or production".to_string(),
            }),
        }
    }

    pub fn to_args(self) -> Args {
        Args::new().with(LOCATION, self.as_str())
    }
}

impl std::fmt::Display for AgentEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_step() {
        let args = WorkflowStepArgs {
            step: WorkflowStep::ReadyForBatching,
        }
        .to_args();
        assert_eq!(args.get(WORKFLOW_STEP), Some("ReadyForBatching"));
        assert_eq!(
            WorkflowStepArgs::parse(&args).unwrap().step,
            WorkflowStep::ReadyForBatching
        );

        let bad = Args::new().with(WORKFLOW_STEP, "Napping");
        assert!(matches!(
            WorkflowStepArgs::parse(&bad),
            Err(ArgsError::Invalid { key: WORKFLOW_STEP, .. })
        ));
        assert!(matches!(
            WorkflowStepArgs::parse(&Args::new()),
            Err(ArgsError::Missing(WORKFLOW_STEP))
        ));
    }

    #[test]
    fn test_location_may_be_empty_for_metadata() {
        let args = LocationArgs::new("").to_args();
        assert_eq!(LocationArgs::parse(&args).unwrap().location, "");
        assert!(LocationArgs::parse_path(&args).is_err());
    }

    #[test]
    fn test_transfer_args() {
        let args = TransferArgs::new("/a", "/b").excluding("*.tmp,.DS_Store").to_args();
        assert_eq!(args.get(EXCLUDE), Some("*.tmp,.DS_Store"));
        let parsed = TransferArgs::parse(&args).unwrap();
        assert_eq!(parsed.source, PathBuf::from("/a"));
        assert_eq!(parsed.destination, PathBuf::from("/b"));

        let no_exclude = TransferArgs::new("/a", "/b").to_args();
        assert_eq!(no_exclude.len(), 2);
        assert!(TransferArgs::parse(&Args::new().with(SOURCE, "/a")).is_err());
    }

    #[test]
    fn test_forced() {
        assert!(!ForcedArgs::parse(&Args::new()).unwrap().forced);
        assert!(ForcedArgs::parse(&Args::new().with(FORCED, "true")).unwrap().forced);
        assert!(!ForcedArgs::parse(&Args::new().with(FORCED, "false")).unwrap().forced);
        assert!(ForcedArgs::parse(&Args::new().with(FORCED, "yes please")).is_err());
        assert!(ForcedArgs::default().to_args().is_empty());
    }

    #[test]
    fn test_id() {
        assert_eq!(IdArgs::parse(&Args::new().with(ID, "42")).unwrap().id, 42);
        assert!(IdArgs::parse(&Args::new().with(ID, "0")).is_err());
        assert!(IdArgs::parse(&Args::new().with(ID, "abc")).is_err());
        assert_eq!(IdArgs::parse_optional(&Args::new()).unwrap(), None);
    }

    #[test]
    fn test_agent_env() {
        assert_eq!(
            AgentEnv::parse(&AgentEnv::Production.to_args()).unwrap(),
            AgentEnv::Production
        );
        assert!(AgentEnv::parse(&Args::new().with(LOCATION, "qa")).is_err());
    }
}
