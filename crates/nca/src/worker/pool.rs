use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;
use crate::error::WorkerError;
use crate::handlers::JobContext;
use crate::models::JobType;

/// A set of job types that run on their own dispatcher(s), so slow work
/// such as derivative generation never starves quick metadata updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerGroup {
    Metadata,
    Filesystem,
    PageSplit,
    Derivatives,
    Batch,
    Oni,
}

impl RunnerGroup {
    pub const ALL: &'static [RunnerGroup] = &[
        RunnerGroup::Metadata,
        RunnerGroup::Filesystem,
        RunnerGroup::PageSplit,
        RunnerGroup::Derivatives,
        RunnerGroup::Batch,
        RunnerGroup::Oni,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerGroup::Metadata => "metadata",
            RunnerGroup::Filesystem => "filesystem",
            RunnerGroup::PageSplit => "page-split",
            RunnerGroup::Derivatives => "derivatives",
            RunnerGroup::Batch => "batch",
            RunnerGroup::Oni => "oni",
        }
    }

    pub fn job_types(&self) -> Vec<JobType> {
        use JobType::*;
        match self {
            RunnerGroup::Metadata => vec![
                CancelJob,
                SetIssueWorkflowStep,
                SetIssueBackupLocation,
                SetIssueLocation,
                IgnoreIssue,
                SetIssueCurated,
                PrepIssuePageLabels,
                RecordIssueAction,
                SetBatchStatus,
                SetBatchLocation,
                RecordBatchAction,
                MarkBatchLive,
                DeleteBatch,
                EmptyBatchFlaggedIssuesList,
                FinalizeBatchFlaggedIssue,
            ],
            RunnerGroup::Filesystem => vec![
                SyncRecursive,
                VerifyRecursive,
                KillDir,
                RenameDir,
                CleanFiles,
                RemoveFile,
                MakeManifest,
                MoveDerivatives,
                RenumberPages,
                WriteActionLog,
                ArchiveBackups,
            ],
            RunnerGroup::PageSplit => vec![PageSplit],
            RunnerGroup::Derivatives => vec![MakeDerivatives],
            RunnerGroup::Batch => vec![
                BuildMets,
                CreateBatchStructure,
                MakeBatchXml,
                WriteBagitManifest,
                ValidateTagManifest,
            ],
            RunnerGroup::Oni => vec![OniLoadBatch, OniPurgeBatch, OniWaitForJob],
        }
    }
}

impl fmt::Display for RunnerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        RunnerGroup::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == wanted)
            .ok_or_else(|| format!("unknown runner group {:?}", s))
    }
}

/// Stops a running pool from any thread, e.g. a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    wake: Arc<Mutex<Option<Sender<()>>>>,
}

impl StopHandle {
    /// Asks every dispatcher to exit after its current job. Idle ones wake
    /// immediately.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the only sender disconnects every dispatcher's receiver
        match self.wake.lock() {
            Ok(mut sender) => {
                sender.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Dispatcher threads for a set of runner groups.
pub struct WorkerPool {
    workers: Vec<(String, JoinHandle<()>)>,
    handle: StopHandle,
}

impl WorkerPool {
    /// Starts one dispatcher per group, except derivatives, which get
    /// `derivative_workers` from the config.
    pub fn start(ctx: JobContext, groups: &[RunnerGroup]) -> Result<Self, WorkerError> {
        let (wake_tx, wake_rx) = bounded::<()>(0);
        let handle = StopHandle {
            stop: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Mutex::new(Some(wake_tx))),
        };

        let mut pool = Self {
            workers: Vec::new(),
            handle,
        };

        for group in groups {
            let count = match group {
                RunnerGroup::Derivatives => ctx.config.derivative_workers.max(1),
                _ => 1,
            };
            for n in 0..count {
                let name = if count > 1 {
                    format!("{}-{}", group, n + 1)
                } else {
                    group.to_string()
                };
                let dispatcher = Dispatcher::new(name.clone(), group.job_types(), ctx.clone());
                if let Err(e) = pool.spawn(dispatcher, wake_rx.clone()) {
                    pool.handle.stop();
                    // Already-started threads exit on their own; report the
                    // spawn failure rather than any join problem
                    let _ = pool.wait();
                    return Err(e);
                }
            }
        }

        info!(dispatchers = pool.workers.len(), "Started worker pool");
        Ok(pool)
    }

    fn spawn(&mut self, dispatcher: Dispatcher, wake: Receiver<()>) -> Result<(), WorkerError> {
        let name = dispatcher.name().to_string();
        let stop = Arc::clone(&self.handle.stop);
        let thread = thread::Builder::new()
            .name(format!("nca-{}", name))
            .spawn(move || dispatcher.run(&stop, &wake))
            .map_err(|e| WorkerError::SpawnFailed(format!("{}: {}", name, e)))?;
        self.workers.push((name, thread));
        Ok(())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.handle.stop();
    }

    pub fn is_shutdown(&self) -> bool {
        self.handle.is_stopped()
    }

    /// Blocks until every dispatcher has exited.
    pub fn wait(self) -> Result<(), WorkerError> {
        let mut panicked = Vec::new();
        for (name, worker) in self.workers {
            match worker.join() {
                Ok(()) => debug!(runner = %name, "Dispatcher finished"),
                Err(_) => {
                    error!(runner = %name, "Dispatcher panicked");
                    panicked.push(name);
                }
            }
        }

        info!("All dispatchers have stopped");
        if panicked.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::Panicked(panicked.join(", ")))
        }
    }
}
