use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NcaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("ONI agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Job args error: {0}")]
    Args(#[from] ArgsError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("BagIt error: {0}")]
    Bagit(#[from] BagitError),

    #[error("Packaging error: {0}")]
    Package(#[from] PackageError),

    #[error("Issue queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config line {line}: {content:?}")]
    Parse { line: usize, content: String },

    #[error("Config validation failed:\n{}", .problems.join("\n"))]
    Validation { problems: Vec<String> },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to link '{from}' to '{to}': {source}")]
    LinkFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory scan failed for '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Not found: {0}")]
    NotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to read PDF '{path}': {reason}")]
    Pdf { path: PathBuf, reason: String },

    #[error("{0}")]
    Output(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent transport failed: {0}")]
    Transport(String),

    #[error("Unable to parse agent response {raw:?}: {source}")]
    Decode {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Agent returned an error: {0}")]
    Remote(String),

    #[error("Agent returned unknown status {0:?}")]
    UnknownStatus(String),

    #[error("Agent response is missing {0}")]
    Missing(&'static str),
}

#[derive(Error, Debug)]
pub enum ArgsError {
    #[error("Missing required arg {0:?}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for arg {key:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cannot queue an empty pipeline")]
    Empty,

    #[error("queue_simple cannot start with a {0} job")]
    TypedFirstJob(String),

    #[error("Job {job_type} targets object {object_id}, expected {expected}")]
    WrongObject {
        job_type: String,
        object_id: i64,
        expected: i64,
    },

    #[error("{0}")]
    Rejected(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum BagitError {
    #[error("Data directory missing: {0}")]
    MissingData(PathBuf),

    #[error("Invalid manifest line in '{path}': {line:?}")]
    InvalidManifest { path: PathBuf, line: String },

    #[error("Tag manifest mismatch: {0}")]
    Mismatch(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to generate {document}: {reason}")]
    Xml {
        document: &'static str,
        reason: String,
    },

    #[error("Failed to write archive '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive '{0}' is empty")]
    EmptyArchive(PathBuf),

    #[error("Issue {key} cannot be packaged: {reason}")]
    Issue { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Issue {key} has an invalid date")]
    InvalidDate { key: String },

    #[error("Invalid embargo {value:?} for title {lccn}: {source}")]
    Embargo {
        lccn: String,
        value: String,
        #[source]
        source: crate::models::reference::PeriodError,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Unable to queue batch: {0}")]
    Pipeline(#[from] PipelineError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker thread panicked: {0}")]
    Panicked(String),

    #[error("Unable to install signal handler: {0}")]
    Signal(String),
}

pub type Result<T> = std::result::Result<T, NcaError>;
