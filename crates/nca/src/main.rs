//! `nca` command-line entry point.

use std::error::Error as _;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use nca::db::{batch_repo, issue_repo, job_repo, migrations};
use nca::error::WorkerError;
use nca::handlers::args::AgentEnv;
use nca::issuequeue::queue_batches;
use nca::logging::{self, LogFormat};
use nca::models::action::SYSTEM_USER_ID;
use nca::models::{Args, BatchStatus, Job, JobStatus, JobType};
use nca::pipeline::{queue_simple, recipes};
use nca::{load_config, Config, Database, JobContext, NcaError, RunnerGroup, WorkerPool};

#[derive(Debug, Parser)]
#[command(
    name = "nca",
    version,
    about = "Durable job pipelines for newspaper issue and batch processing.",
    long_about = None
)]
struct Cli {
    /// Settings file (bash-style `KEY=value` lines).
    #[arg(short, long, value_name = "PATH", default_value = "nca.conf")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `nca=trace`. Overrides `NCA_LOG`.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// `compact` or `json`.
    #[arg(long, value_name = "FORMAT", default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run job dispatchers until interrupted.
    RunJobs {
        /// Runner groups to start; repeat for several. Defaults to all.
        #[arg(long = "group", value_name = "GROUP")]
        groups: Vec<RunnerGroup>,
    },
    /// Build batches from every issue ready for batching.
    QueueBatches,
    /// Queue a retry of every failed job.
    RetryFailed,
    /// Queue a retry of one failed job.
    RenewJob { job_id: i64 },
    /// Cancel an on-hold or failed job.
    CancelJob { job_id: i64 },
    /// Delete a batch that never went live.
    DeleteBatch { batch_id: i64 },
    /// Load a batch onto staging, or production with `--production`.
    LoadBatch {
        batch_id: i64,
        #[arg(long)]
        production: bool,
    },
    /// Purge a batch from an ONI environment.
    PurgeBatch {
        batch_id: i64,
        #[arg(value_enum)]
        env: Environment,
    },
    /// Remove QC-flagged issues from a failed batch.
    FinalizeFlagged {
        batch_id: i64,
        /// Delete the batch so its remaining issues are batched again.
        #[arg(long)]
        rebatch: bool,
        #[arg(long, value_name = "ID", default_value_t = SYSTEM_USER_ID, allow_negative_numbers = true)]
        user: i64,
    },
    /// Move an unfixable issue out of the workflow.
    RemoveIssue {
        issue_id: i64,
        #[arg(long, value_name = "ID")]
        user: i64,
        #[arg(long)]
        message: String,
    },
    /// Queue METS generation and backup cleanup for an approved issue.
    FinalizeIssue { issue_id: i64 },
    /// Regenerate an issue's derivatives.
    ForceDerivatives { issue_id: i64 },
    /// Apply database migrations and report the schema version.
    Migrate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Environment {
    Staging,
    Production,
}

impl From<Environment> for AgentEnv {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Staging => AgentEnv::Staging,
            Environment::Production => AgentEnv::Production,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init_logging(cli.log_level.as_deref(), cli.log_format) {
        eprintln!("nca error: {}", e);
        process::exit(1);
    }

    if let Err(e) = run_main(cli) {
        error!(error = %e, "Command failed");
        eprintln!("nca error: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        process::exit(1);
    }
}

fn run_main(cli: Cli) -> nca::Result<()> {
    let config = load_config(&cli.config)?;
    let db = Database::open(&config.db_path)?;
    let now = Utc::now();

    match cli.command {
        Command::RunJobs { groups } => run_jobs(db, config, groups)?,
        Command::QueueBatches => {
            let plans = queue_batches(&db, &config, now)?;
            info!(batches = plans.len(), "Queued batches");
            for plan in plans {
                println!(
                    "{}\t{} issues\t{} pages\tpipeline {}",
                    plan.batch.full_name(),
                    plan.issues,
                    plan.pages,
                    plan.pipeline_id
                );
            }
        }
        Command::RetryFailed => {
            let clones = job_repo::requeue_failed(&db, now)?;
            info!(jobs = clones.len(), "Requeued failed jobs");
            for clone in clones {
                println!("Queued job {} ({})", clone.id, clone.job_type);
            }
        }
        Command::RenewJob { job_id } => {
            let mut job = db.with_conn(|conn| job_repo::get(conn, job_id))?;
            let clone = job_repo::renew(&db, &mut job, now)?;
            println!("Job {} renewed as job {}", job.id, clone.id);
        }
        Command::CancelJob { job_id } => {
            let target = db.with_conn(|conn| job_repo::get(conn, job_id))?;
            if !matches!(target.status, JobStatus::OnHold | JobStatus::Failed) {
                warn!(job_id, status = %target.status, "Cancel will fail: job is neither on hold nor failed");
            }
            let pipeline = queue_simple(
                &db,
                "cancel_job",
                vec![Job::new(JobType::CancelJob, job_id, Args::new())],
            )?;
            println!("Queued pipeline {}", pipeline.id);
        }
        Command::DeleteBatch { batch_id } => {
            let mut batch = db.with_conn(|conn| batch_repo::get(conn, batch_id))?;
            let pipeline = recipes::delete_batch(&db, &mut batch)?;
            println!("Queued pipeline {}", pipeline.id);
        }
        Command::LoadBatch { batch_id, production } => {
            let mut batch = db.with_conn(|conn| batch_repo::get(conn, batch_id))?;
            let env = if production {
                AgentEnv::Production
            } else {
                AgentEnv::Staging
            };
            let pipeline = recipes::load_batch(&db, &mut batch, env)?;
            println!("Queued pipeline {}", pipeline.id);
        }
        Command::PurgeBatch { batch_id, env } => {
            let mut batch = db.with_conn(|conn| batch_repo::get(conn, batch_id))?;
            // A staging purge follows a failed QC; a production purge sends
            // the batch back to be rebuilt
            let status = match env {
                Environment::Staging => BatchStatus::FailedQc,
                Environment::Production => BatchStatus::Pending,
            };
            let pipeline = recipes::purge_batch(&db, &mut batch, env.into(), status)?;
            println!("Queued pipeline {}", pipeline.id);
        }
        Command::FinalizeFlagged {
            batch_id,
            rebatch,
            user,
        } => {
            let mut batch = db.with_conn(|conn| batch_repo::get(conn, batch_id))?;
            let pipeline = recipes::finalize_flagged_issues(&db, &config, &mut batch, user, rebatch)?;
            println!("Queued pipeline {}", pipeline.id);
        }
        Command::RemoveIssue {
            issue_id,
            user,
            message,
        } => {
            let mut issue = db.with_conn(|conn| issue_repo::get(conn, issue_id))?;
            let pipeline = recipes::remove_errored_issue(&db, &config, &mut issue, user, &message)?;
            println!("Queued pipeline {}", pipeline.id);
        }
        Command::FinalizeIssue { issue_id } => {
            let mut issue = db.with_conn(|conn| issue_repo::get(conn, issue_id))?;
            let pipeline = recipes::finalize_issue(&db, &mut issue)?;
            println!("Queued pipeline {}", pipeline.id);
        }
        Command::ForceDerivatives { issue_id } => {
            let mut issue = db.with_conn(|conn| issue_repo::get(conn, issue_id))?;
            let pipeline = recipes::force_derivatives(&db, &mut issue)?;
            println!("Queued pipeline {}", pipeline.id);
        }
        Command::Migrate => {
            let version = db.with_conn(migrations::current_version)?;
            println!("Database {} is at schema version {}", config.db_path.display(), version);
        }
    }

    Ok(())
}

fn run_jobs(db: Database, config: Config, groups: Vec<RunnerGroup>) -> nca::Result<()> {
    let groups = if groups.is_empty() {
        RunnerGroup::ALL.to_vec()
    } else {
        groups
    };
    let names: Vec<String> = groups.iter().map(RunnerGroup::to_string).collect();
    info!(groups = %names.join(","), "Starting job runners");

    let ctx = JobContext::new(db, Arc::new(config));
    let pool = WorkerPool::start(ctx, &groups)?;
    let handle = pool.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, finishing running jobs");
        handle.stop();
    }) {
        pool.shutdown();
        pool.wait()?;
        return Err(NcaError::Worker(WorkerError::Signal(e.to_string())));
    }

    pool.wait()?;
    Ok(())
}
