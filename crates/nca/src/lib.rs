pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod issuequeue;
pub mod logging;
pub mod models;
pub mod oni;
pub mod packager;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod storage;
pub mod worker;

pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{NcaError, PipelineError, QueueError, Result, WorkerError};
pub use handlers::{JobContext, ProcessResponse};
pub use worker::{Dispatcher, RunnerGroup, WorkerPool};
