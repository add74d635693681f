//! Persistence layer — durable storage for sessions, jobs, and executions.

pub mod libsql_backend;
pub mod migrations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{SchedulerError, StoreError};
use crate::scheduler::cron;
use crate::session::Session;

pub use libsql_backend::LibSqlStore;

/// A stored prompt plus cron schedule that the scheduler turns into
/// periodic agent runs.
#[derive(Debug, Clone)]
pub struct RecurringJob {
    pub id: String,
    pub name: String,
    /// The schedule as the user originally phrased it.
    pub schedule_human: String,
    /// Canonical five-field cron expression.
    pub schedule_cron: String,
    pub task_prompt: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringJob {
    /// Create an enabled job. Rejects invalid cron expressions and seeds
    /// `next_run_at` with the first fire after creation time.
    pub fn new(
        name: impl Into<String>,
        schedule_human: impl Into<String>,
        schedule_cron: impl Into<String>,
        task_prompt: impl Into<String>,
    ) -> Result<Self, SchedulerError> {
        let schedule_cron = schedule_cron.into();
        let now = Utc::now();
        let next_run_at = cron::next_after(&schedule_cron, now)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            schedule_human: schedule_human.into(),
            schedule_cron,
            task_prompt: task_prompt.into(),
            enabled: true,
            last_run_at: None,
            next_run_at: Some(next_run_at),
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the schedule, recomputing `next_run_at` from now.
    pub fn set_schedule(
        &mut self,
        schedule_human: impl Into<String>,
        schedule_cron: impl Into<String>,
    ) -> Result<(), SchedulerError> {
        let schedule_cron = schedule_cron.into();
        let now = Utc::now();
        self.next_run_at = Some(cron::next_after(&schedule_cron, now)?);
        self.schedule_human = schedule_human.into();
        self.schedule_cron = schedule_cron;
        self.updated_at = now;
        Ok(())
    }
}

/// Terminal state of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "success" => ExecutionStatus::Success,
            "failed" => ExecutionStatus::Failed,
            _ => ExecutionStatus::Running,
        }
    }
}

/// One concrete run of a recurring job.
#[derive(Debug, Clone)]
pub struct JobExecution {
    pub id: String,
    pub job_id: String,
    /// Set once the run's session has been created. Readers must tolerate a
    /// dangling reference: deleting a session does not delete executions.
    pub session_id: Option<String>,
    pub status: ExecutionStatus,
    pub output: String,
    pub error: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobExecution {
    /// Create a running execution record for a job.
    pub fn start(job_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            session_id: None,
            status: ExecutionStatus::Running,
            output: String::new(),
            error: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Transactional storage for sessions, jobs, and executions.
///
/// `save_session` must replace the session row and its full message set
/// atomically: a crash mid-save leaves either the previous or the new state,
/// never a partial mix. Callers must not interleave writes to the same
/// session from two tasks.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn get_session(&self, id: &str) -> Result<Session, StoreError>;
    /// All sessions, newest first by creation time. Messages are not loaded.
    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;
    /// Delete a session and all of its messages.
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;
    async fn list_sessions_by_parent(&self, parent_id: &str) -> Result<Vec<Session>, StoreError>;
    async fn list_sessions_by_job(&self, job_id: &str) -> Result<Vec<Session>, StoreError>;

    async fn save_job(&self, job: &RecurringJob) -> Result<(), StoreError>;
    async fn get_job(&self, id: &str) -> Result<RecurringJob, StoreError>;
    async fn list_jobs(&self) -> Result<Vec<RecurringJob>, StoreError>;
    async fn delete_job(&self, id: &str) -> Result<(), StoreError>;
    /// All enabled jobs with `next_run_at <= now`, in unspecified order.
    async fn get_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<RecurringJob>, StoreError>;

    /// Insert or update an execution record.
    async fn save_job_execution(&self, execution: &JobExecution) -> Result<(), StoreError>;
    /// Executions for a job, newest first, capped at `limit`.
    async fn list_job_executions(
        &self,
        job_id: &str,
        limit: usize,
    ) -> Result<Vec<JobExecution>, StoreError>;
}
