//! Jobs that drive a remote ONI agent.
//!
//! Loads and purges only ask the agent to start work; the remote job id is
//! stored on the batch so a following [`wait_for_job`] can poll it.

use std::time::Duration;

use super::args::{AgentEnv, IdArgs};
use super::{OrRespond, ProcessResponse, Run, Step};
use crate::db::{action_repo, batch_repo, DatabaseError};
use crate::error::AgentError;
use crate::models::action::SYSTEM_USER_ID;
use crate::models::{Action, ActionType};
use crate::oni::{OniAgent, RemoteJobStatus};
use crate::retry::run_critical;

/// How long to wait before asking about an unfinished remote job again.
pub const POLL_DELAY: Duration = Duration::from_secs(30);

fn agent(run: &Run<'_>) -> Step<(AgentEnv, OniAgent)> {
    let env = AgentEnv::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    match run.ctx.agent(env) {
        Some(agent) => Ok((env, agent)),
        None => {
            run.log.error(format!("No ONI agent is configured for {}", env));
            Err(ProcessResponse::Fatal)
        }
    }
}

/// Sends `command` for the job's batch and records the remote job id. The
/// save is retried hard: once the agent has the command, losing its id
/// would leave the wait job with nothing to poll.
fn send_batch_command(
    run: &Run<'_>,
    command: &str,
    call: impl FnOnce(&OniAgent, &str) -> Result<i64, AgentError>,
) -> Step {
    let (env, agent) = agent(run)?;
    let mut batch = run.batch()?;
    let name = batch.full_name();

    run.log.info(format!("Sending {} {:?} to the {} agent", command, name, env));
    let remote_id = call(&agent, &name).or_failure(&run.log, &format!("Unable to send {}", command))?;

    let message = format!("sent ONI Agent the {} command", command);
    run_critical(|| {
        run.db().with_tx(|tx| {
            batch_repo::set_oni_agent_job_id(tx, &mut batch, remote_id)?;
            let mut action = Action::for_batch(batch.id, ActionType::InternalProcess, SYSTEM_USER_ID, &message);
            action_repo::insert(tx, &mut action)?;
            Ok::<(), DatabaseError>(())
        })
    })
    .or_fatal(&run.log, &format!("Unable to record remote job {}", remote_id))?;

    run.log.info(format!("Agent accepted {} as job {}", command, remote_id));
    Ok(())
}

pub(super) fn load_batch(run: &Run<'_>) -> Step {
    send_batch_command(run, "load-batch", |agent, name| agent.load_batch(name))
}

pub(super) fn purge_batch(run: &Run<'_>) -> Step {
    send_batch_command(run, "purge-batch", |agent, name| agent.purge_batch(name))
}

/// Polls a remote job: unfinished jobs come back later without counting as
/// a failure, and a remote failure stops the pipeline.
pub(super) fn wait_for_job(run: &Run<'_>) -> Step {
    let (env, agent) = agent(run)?;
    let explicit = IdArgs::parse_optional(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let remote_id = match explicit {
        Some(args) => args.id,
        None => {
            let batch = run.batch()?;
            if batch.oni_agent_job_id <= 0 {
                run.log.error(format!("Batch {} has no ONI agent job to wait for", batch.id));
                return Err(ProcessResponse::Fatal);
            }
            batch.oni_agent_job_id
        }
    };

    let status = agent
        .job_status(remote_id)
        .or_failure(&run.log, &format!("Unable to get status of {} job {}", env, remote_id))?;
    run.log.debug(format!("Remote job {} is {}", remote_id, status.as_str()));

    match status {
        RemoteJobStatus::Pending | RemoteJobStatus::Started => Err(ProcessResponse::TryLater(POLL_DELAY)),
        RemoteJobStatus::Successful => {
            run.log.info(format!("Remote job {} finished", remote_id));
            Ok(())
        }
        RemoteJobStatus::CouldNotStart | RemoteJobStatus::Failed => {
            run.log.error(format!("Remote job {} ended with status {:?}", remote_id, status.as_str()));
            match agent.job_logs(remote_id) {
                Ok(lines) => {
                    for line in lines {
                        run.log.error(format!("remote: {}", line));
                    }
                }
                Err(e) => run.log.warn(format!("Unable to fetch logs for {} job {}: {}", env, remote_id, e)),
            }
            Err(ProcessResponse::Fatal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::args::{ID, LOCATION};
    use super::super::tests::{context, log_text, run_job, saved_batch};
    use super::super::{AgentFactory, JobContext};
    use super::*;
    use crate::models::{Args, Batch, Job, JobType, ObjectType};
    use crate::oni::tests::FakeTransport;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn with_fake(ctx: JobContext, replies: &[&str]) -> (JobContext, Arc<FakeTransport>) {
        let fake = FakeTransport::replying(replies);
        let transport = fake.clone();
        let agents: AgentFactory = Arc::new(move |env: AgentEnv| match env {
            AgentEnv::Staging => Some(OniAgent::new(transport.clone())),
            AgentEnv::Production => None,
        });
        (ctx.with_agents(agents), fake)
    }

    fn staged_batch(ctx: &JobContext) -> Batch {
        let mut batch = Batch::new("oru", Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());
        batch.name = "AbbeyBean".into();
        saved_batch(ctx, &mut batch);
        batch
    }

    #[test]
    fn test_load_batch_records_remote_job() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fake) = with_fake(context(dir.path()), &[r#"{"status": "success", "job": {"id": 101}}"#]);
        let batch = staged_batch(&ctx);

        let (r, _) = run_job(&ctx, Job::new(JobType::OniLoadBatch, batch.id, AgentEnv::Staging.to_args()));
        assert_eq!(r, ProcessResponse::Success);
        assert_eq!(
            fake.calls.lock().unwrap()[0].0,
            vec!["load-batch".to_string(), "batch_oru_20240309AbbeyBean_ver01".to_string()]
        );

        let saved = ctx.db.with_conn(|conn| batch_repo::get(conn, batch.id)).unwrap();
        assert_eq!(saved.oni_agent_job_id, 101);
        let actions = ctx
            .db
            .with_conn(|conn| action_repo::find_for_object(conn, ObjectType::Batch, batch.id))
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].message, "sent ONI Agent the load-batch command");
    }

    #[test]
    fn test_remote_error_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = with_fake(context(dir.path()), &[r#"{"status": "error", "message": "fake err"}"#]);
        let batch = staged_batch(&ctx);

        let (r, job) = run_job(&ctx, Job::new(JobType::OniPurgeBatch, batch.id, AgentEnv::Staging.to_args()));
        assert_eq!(r, ProcessResponse::Failure);
        assert!(log_text(&ctx, &job).contains("fake err"));
    }

    #[test]
    fn test_unconfigured_agent_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fake) = with_fake(context(dir.path()), &[]);
        let batch = staged_batch(&ctx);

        let (r, _) = run_job(&ctx, Job::new(JobType::OniLoadBatch, batch.id, AgentEnv::Production.to_args()));
        assert_eq!(r, ProcessResponse::Fatal);
        let (r, _) = run_job(&ctx, Job::new(JobType::OniLoadBatch, batch.id, Args::new().with(LOCATION, "qa")));
        assert_eq!(r, ProcessResponse::Fatal);
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wait_for_job() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, fake) = with_fake(
            context(dir.path()),
            &[
                r#"{"status": "success", "job": {"id": 101, "status": "started"}}"#,
                r#"{"status": "success", "job": {"id": 101, "status": "successful"}}"#,
                r#"{"status": "success", "job": {"id": 55, "status": "failed"}}"#,
                r#"{"status": "success", "job": {"id": 55, "stdout": ["loading"], "stderr": ["boom"]}}"#,
            ],
        );
        let mut batch = staged_batch(&ctx);
        batch.oni_agent_job_id = 101;
        saved_batch(&ctx, &mut batch);

        let wait = || Job::new(JobType::OniWaitForJob, batch.id, AgentEnv::Staging.to_args());
        let (r, _) = run_job(&ctx, wait());
        assert_eq!(r, ProcessResponse::TryLater(POLL_DELAY));
        let (r, _) = run_job(&ctx, wait());
        assert_eq!(r, ProcessResponse::Success);

        // An explicit ID overrides the batch's stored job
        let (r, job) = run_job(&ctx, Job::new(JobType::OniWaitForJob, batch.id, wait().args.with(ID, "55")));
        assert_eq!(r, ProcessResponse::Fatal);
        assert!(log_text(&ctx, &job).contains("remote: boom"));
        assert_eq!(fake.calls.lock().unwrap()[2].0[1], "55");
    }

    #[test]
    fn test_failed_remote_job_without_logs() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = with_fake(
            context(dir.path()),
            &[r#"{"status": "success", "job": {"id": 77, "status": "couldn't start"}}"#],
        );
        let mut batch = staged_batch(&ctx);
        batch.oni_agent_job_id = 77;
        saved_batch(&ctx, &mut batch);

        let (r, job) = run_job(&ctx, Job::new(JobType::OniWaitForJob, batch.id, AgentEnv::Staging.to_args()));
        assert_eq!(r, ProcessResponse::Fatal);
        let log = log_text(&ctx, &job);
        assert!(log.contains("Unable to fetch logs for staging job 77"), "{}", log);
        assert!(log.contains("no reply queued"), "{}", log);
    }

    #[test]
    fn test_wait_without_remote_job_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = with_fake(context(dir.path()), &[]);
        let batch = staged_batch(&ctx);
        let (r, _) = run_job(&ctx, Job::new(JobType::OniWaitForJob, batch.id, AgentEnv::Staging.to_args()));
        assert_eq!(r, ProcessResponse::Fatal);
    }
}
