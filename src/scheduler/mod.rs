//! Recurring-job scheduler.
//!
//! A clocked control loop that claims due jobs, spawns bounded agent runs
//! against their stored prompts, and advances per-job next-fire times. Each
//! execution gets its own session and execution record; a job's failure
//! never propagates to sibling jobs.

pub mod cron;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::agent::{Agent, AgentConfig};
use crate::config::Config;
use crate::error::SchedulerError;
use crate::llm::LlmClient;
use crate::session::manager::SessionManager;
use crate::store::{ExecutionStatus, JobExecution, RecurringJob, Store};
use crate::tools::ToolRegistry;

/// Agent role name for scheduler-spawned sessions.
const JOB_RUNNER_AGENT_ID: &str = "job-runner";

/// Maximum stored execution output before truncation.
const MAX_EXECUTION_OUTPUT: usize = 10_000;

/// Grace period for a timed-out run to observe cancellation and persist.
const TIMEOUT_GRACE: Duration = Duration::from_secs(10);

/// Manages recurring job execution.
pub struct Scheduler {
    config: Config,
    store: Arc<dyn Store>,
    sessions: Arc<SessionManager>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    running: Mutex<bool>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        sessions: Arc<SessionManager>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            llm,
            tools,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: Mutex::new(false),
        }
    }

    /// Start the background control loop. Idempotent; the first tick fires
    /// immediately to pick up jobs that came due while the process was down.
    pub fn start(self: Arc<Self>) {
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if *running {
                return;
            }
            *running = true;
        }

        info!(
            interval_secs = self.config.scheduler_interval.as_secs(),
            "Scheduler started"
        );

        let tracker = self.tracker.clone();
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(self.config.scheduler_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("Scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        Arc::clone(&self).check_and_run_due_jobs().await;
                    }
                }
            }
        });
    }

    /// Stop the control loop and wait for in-flight executions to finish.
    pub async fn shutdown(&self) {
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if !*running {
                return;
            }
            *running = false;
        }

        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Scheduler stopped");
    }

    async fn check_and_run_due_jobs(self: Arc<Self>) {
        let now = Utc::now();
        let jobs = match self.store.get_due_jobs(now).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to get due jobs: {e}");
                return;
            }
        };

        if jobs.is_empty() {
            debug!("No due jobs");
            return;
        }

        info!(count = jobs.len(), "Found due job(s) to execute");
        for job in jobs {
            let scheduler = Arc::clone(&self);
            self.tracker.spawn(async move {
                scheduler.execute_job(job).await;
            });
        }
    }

    /// Run a single due job: execution record, fresh session, bounded agent
    /// run, terminal record, next-fire advance.
    pub async fn execute_job(&self, mut job: RecurringJob) {
        info!(job = %job.name, id = %job.id, "Executing job");
        let now = Utc::now();

        let mut exec = JobExecution::start(&job.id);
        if let Err(e) = self.store.save_job_execution(&exec).await {
            error!(job = %job.id, "Failed to create execution record: {e}");
            return;
        }

        let mut session = match self
            .sessions
            .create_with_job(JOB_RUNNER_AGENT_ID, &job.id)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                exec.status = ExecutionStatus::Failed;
                exec.error = format!("Failed to create session: {e}");
                exec.finished_at = Some(Utc::now());
                if let Err(e) = self.store.save_job_execution(&exec).await {
                    error!(job = %job.id, "Failed to update execution record: {e}");
                }
                return;
            }
        };
        exec.session_id = Some(session.id.clone());

        session.add_user_message(&job.task_prompt);

        let agent = Agent::new(
            AgentConfig {
                name: JOB_RUNNER_AGENT_ID.to_string(),
                model: self.config.default_model.clone(),
                system_prompt: self.config.system_prompt.clone(),
                temperature: self.config.temperature,
                max_steps: self.config.max_steps,
            },
            Arc::clone(&self.llm),
            Arc::clone(&self.tools),
            Arc::clone(&self.sessions),
        );

        let timeout = self.config.job_execution_timeout;
        let run_cancel = self.cancel.child_token();
        let run = agent.run(&run_cancel, &mut session);
        tokio::pin!(run);

        let mut timed_out = false;
        let result = tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(timeout) => {
                timed_out = true;
                run_cancel.cancel();
                match tokio::time::timeout(TIMEOUT_GRACE, &mut run).await {
                    Ok(result) => result,
                    Err(_) => Err(SchedulerError::ExecutionTimeout(timeout).into()),
                }
            }
        };

        exec.finished_at = Some(Utc::now());
        if timed_out {
            error!(job = %job.id, "Job timed out after {timeout:?}");
            exec.status = ExecutionStatus::Failed;
            exec.error = SchedulerError::ExecutionTimeout(timeout).to_string();
        } else {
            match result {
                Ok((output, _usage)) => {
                    info!(job = %job.id, "Job completed successfully");
                    exec.status = ExecutionStatus::Success;
                    exec.output = truncate_execution_output(output);
                }
                Err(e) => {
                    error!(job = %job.id, "Job failed: {e}");
                    exec.status = ExecutionStatus::Failed;
                    exec.error = e.to_string();
                }
            }
        }

        if let Err(e) = self.store.save_job_execution(&exec).await {
            error!(job = %job.id, "Failed to update execution record: {e}");
        }

        // Advance the schedule. Missed intervals are not backfilled: the
        // next fire is computed from this run's claim time.
        job.last_run_at = Some(now);
        match cron::next_after(&job.schedule_cron, now) {
            Ok(next) => {
                info!(job = %job.name, next_run = %next, "Job rescheduled");
                job.next_run_at = Some(next);
            }
            Err(e) => {
                error!(job = %job.id, "Failed to compute next run: {e}");
            }
        }
        job.updated_at = now;

        if let Err(e) = self.store.save_job(&job).await {
            error!(job = %job.id, "Failed to update job after execution: {e}");
        }
    }
}

fn truncate_execution_output(output: String) -> String {
    if output.len() <= MAX_EXECUTION_OUTPUT {
        return output;
    }
    let cut = crate::tools::tool::floor_char_boundary(&output, MAX_EXECUTION_OUTPUT);
    format!("{}... (truncated)", &output[..cut])
}
