//! libSQL backend — async [`Store`] implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use. Session saves run inside a transaction so the
//! message set is replaced atomically.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase};
use tracing::info;

use crate::error::StoreError;
use crate::llm::Role;
use crate::session::{Message, Session, SessionStatus};
use crate::store::migrations;
use crate::store::{ExecutionStatus, JobExecution, RecurringJob, Store};

/// libSQL database backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Format a datetime as fixed-width RFC 3339 (microseconds, `Z` suffix).
///
/// Fixed width keeps lexicographic comparison on TEXT columns equal to
/// chronological comparison, which `get_due_jobs` relies on.
fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 datetime string from storage.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

/// Map a session row (without messages) to a `Session`.
///
/// Column order: 0:id, 1:agent_id, 2:parent_id, 3:job_id, 4:title,
/// 5:status, 6:metadata, 7:created_at, 8:updated_at
fn row_to_session(row: &libsql::Row) -> Result<Session, StoreError> {
    let id: String = row.get(0).map_err(query_err)?;
    let agent_id: String = row.get(1).map_err(query_err)?;
    let parent_id: Option<String> = row.get::<String>(2).ok();
    let job_id: Option<String> = row.get::<String>(3).ok();
    let title: String = row.get::<String>(4).unwrap_or_default();
    let status: String = row.get(5).map_err(query_err)?;
    let metadata: String = row.get::<String>(6).unwrap_or_else(|_| "{}".into());
    let created_at: String = row.get(7).map_err(query_err)?;
    let updated_at: String = row.get(8).map_err(query_err)?;

    Ok(Session {
        id,
        agent_id,
        parent_id,
        job_id,
        title,
        status: SessionStatus::from_str_lossy(&status),
        metadata: serde_json::from_str::<HashMap<String, serde_json::Value>>(&metadata)
            .unwrap_or_default(),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
        messages: Vec::new(),
    })
}

/// Map a job row to a `RecurringJob`.
///
/// Column order: 0:id, 1:name, 2:schedule_human, 3:schedule_cron,
/// 4:task_prompt, 5:enabled, 6:last_run_at, 7:next_run_at, 8:created_at,
/// 9:updated_at
fn row_to_job(row: &libsql::Row) -> Result<RecurringJob, StoreError> {
    Ok(RecurringJob {
        id: row.get(0).map_err(query_err)?,
        name: row.get(1).map_err(query_err)?,
        schedule_human: row.get::<String>(2).unwrap_or_default(),
        schedule_cron: row.get(3).map_err(query_err)?,
        task_prompt: row.get(4).map_err(query_err)?,
        enabled: row.get::<i64>(5).map_err(query_err)? != 0,
        last_run_at: row.get::<String>(6).ok().map(|s| parse_datetime(&s)),
        next_run_at: row.get::<String>(7).ok().map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<String>(8).map_err(query_err)?),
        updated_at: parse_datetime(&row.get::<String>(9).map_err(query_err)?),
    })
}

const SESSION_COLUMNS: &str =
    "id, agent_id, parent_id, job_id, title, status, metadata, created_at, updated_at";
const JOB_COLUMNS: &str = "id, name, schedule_human, schedule_cron, task_prompt, enabled, \
     last_run_at, next_run_at, created_at, updated_at";

impl LibSqlStore {
    async fn list_sessions_where(
        &self,
        predicate: &str,
        param: &str,
    ) -> Result<Vec<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE {predicate} ORDER BY created_at DESC"
        );
        let mut rows = self
            .conn
            .query(&sql, params![param])
            .await
            .map_err(query_err)?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            sessions.push(row_to_session(&row)?);
        }
        Ok(sessions)
    }
}

#[async_trait]
impl Store for LibSqlStore {
    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&session.metadata)?;

        // Serialize message payloads up front so the transaction can't fail
        // halfway through on a serialization error.
        let mut message_rows: Vec<(String, String, String, Option<String>, Option<String>, String)> =
            Vec::with_capacity(session.messages.len());
        for msg in &session.messages {
            let tool_calls = if msg.tool_calls.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&msg.tool_calls)?)
            };
            let tool_results = if msg.tool_results.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&msg.tool_results)?)
            };
            message_rows.push((
                msg.id.clone(),
                msg.role.as_str().to_string(),
                msg.content.clone(),
                tool_calls,
                tool_results,
                fmt_datetime(msg.timestamp),
            ));
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to begin transaction: {e}")))?;

        tx.execute(
            "INSERT INTO sessions (id, agent_id, parent_id, job_id, title, status, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 status = excluded.status,
                 metadata = excluded.metadata,
                 updated_at = excluded.updated_at",
            params![
                session.id.as_str(),
                session.agent_id.as_str(),
                session.parent_id.clone(),
                session.job_id.clone(),
                session.title.as_str(),
                session.status.as_str(),
                metadata,
                fmt_datetime(session.created_at),
                fmt_datetime(session.updated_at),
            ],
        )
        .await
        .map_err(query_err)?;

        // Replace the full message set as one unit.
        tx.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session.id.as_str()],
        )
        .await
        .map_err(query_err)?;

        for (id, role, content, tool_calls, tool_results, timestamp) in message_rows {
            tx.execute(
                "INSERT INTO messages (id, session_id, role, content, tool_calls, tool_results, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    session.id.as_str(),
                    role,
                    content,
                    tool_calls,
                    tool_results,
                    timestamp,
                ],
            )
            .await
            .map_err(query_err)?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to commit session save: {e}")))
    }

    async fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(query_err)?;

        let row = rows.next().await.map_err(query_err)?.ok_or_else(|| {
            StoreError::NotFound {
                entity: "session",
                id: id.to_string(),
            }
        })?;
        let mut session = row_to_session(&row)?;

        // Total order: timestamp first, insertion order breaks ties.
        let mut rows = self
            .conn
            .query(
                "SELECT id, role, content, tool_calls, tool_results, timestamp
                 FROM messages WHERE session_id = ?1 ORDER BY timestamp, rowid",
                params![id],
            )
            .await
            .map_err(query_err)?;

        while let Some(row) = rows.next().await.map_err(query_err)? {
            let msg_id: String = row.get(0).map_err(query_err)?;
            let role: String = row.get(1).map_err(query_err)?;
            let content: String = row.get::<String>(2).unwrap_or_default();
            let tool_calls: Option<String> = row.get::<String>(3).ok();
            let tool_results: Option<String> = row.get::<String>(4).ok();
            let timestamp: String = row.get(5).map_err(query_err)?;

            session.messages.push(Message {
                id: msg_id,
                role: Role::from_str_lossy(&role),
                content,
                tool_calls: tool_calls
                    .map(|s| serde_json::from_str(&s))
                    .transpose()?
                    .unwrap_or_default(),
                tool_results: tool_results
                    .map(|s| serde_json::from_str(&s))
                    .transpose()?
                    .unwrap_or_default(),
                timestamp: parse_datetime(&timestamp),
            });
        }

        Ok(session)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC");
        let mut rows = self.conn.query(&sql, ()).await.map_err(query_err)?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            sessions.push(row_to_session(&row)?);
        }
        Ok(sessions)
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to begin transaction: {e}")))?;

        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![id])
            .await
            .map_err(query_err)?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .await
            .map_err(query_err)?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to commit session delete: {e}")))
    }

    async fn list_sessions_by_parent(&self, parent_id: &str) -> Result<Vec<Session>, StoreError> {
        self.list_sessions_where("parent_id = ?1", parent_id).await
    }

    async fn list_sessions_by_job(&self, job_id: &str) -> Result<Vec<Session>, StoreError> {
        self.list_sessions_where("job_id = ?1", job_id).await
    }

    async fn save_job(&self, job: &RecurringJob) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO recurring_jobs (id, name, schedule_human, schedule_cron, task_prompt,
                     enabled, last_run_at, next_run_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     schedule_human = excluded.schedule_human,
                     schedule_cron = excluded.schedule_cron,
                     task_prompt = excluded.task_prompt,
                     enabled = excluded.enabled,
                     last_run_at = excluded.last_run_at,
                     next_run_at = excluded.next_run_at,
                     updated_at = excluded.updated_at",
                params![
                    job.id.as_str(),
                    job.name.as_str(),
                    job.schedule_human.as_str(),
                    job.schedule_cron.as_str(),
                    job.task_prompt.as_str(),
                    job.enabled as i64,
                    job.last_run_at.map(fmt_datetime),
                    job.next_run_at.map(fmt_datetime),
                    fmt_datetime(job.created_at),
                    fmt_datetime(job.updated_at),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<RecurringJob, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM recurring_jobs WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => row_to_job(&row),
            None => Err(StoreError::NotFound {
                entity: "job",
                id: id.to_string(),
            }),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<RecurringJob>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM recurring_jobs ORDER BY created_at DESC");
        let mut rows = self.conn.query(&sql, ()).await.map_err(query_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM recurring_jobs WHERE id = ?1", params![id])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<RecurringJob>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM recurring_jobs
             WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![fmt_datetime(now)])
            .await
            .map_err(query_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn save_job_execution(&self, execution: &JobExecution) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO job_executions (id, job_id, session_id, status, output, error, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     session_id = excluded.session_id,
                     status = excluded.status,
                     output = excluded.output,
                     error = excluded.error,
                     finished_at = excluded.finished_at",
                params![
                    execution.id.as_str(),
                    execution.job_id.as_str(),
                    execution.session_id.clone(),
                    execution.status.as_str(),
                    execution.output.as_str(),
                    execution.error.as_str(),
                    fmt_datetime(execution.started_at),
                    execution.finished_at.map(fmt_datetime),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_job_executions(
        &self,
        job_id: &str,
        limit: usize,
    ) -> Result<Vec<JobExecution>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, session_id, status, output, error, started_at, finished_at
                 FROM job_executions WHERE job_id = ?1
                 ORDER BY started_at DESC LIMIT ?2",
                params![job_id, limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut executions = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            executions.push(JobExecution {
                id: row.get(0).map_err(query_err)?,
                job_id: row.get(1).map_err(query_err)?,
                session_id: row.get::<String>(2).ok(),
                status: ExecutionStatus::from_str_lossy(&row.get::<String>(3).map_err(query_err)?),
                output: row.get::<String>(4).unwrap_or_default(),
                error: row.get::<String>(5).unwrap_or_default(),
                started_at: parse_datetime(&row.get::<String>(6).map_err(query_err)?),
                finished_at: row.get::<String>(7).ok().map(|s| parse_datetime(&s)),
            });
        }
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ToolCall, ToolResult};

    async fn store() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    fn sample_session() -> Session {
        let mut sess = Session::new("build");
        sess.add_user_message("replace foo with bar");
        sess.add_assistant_message(
            "working on it",
            vec![ToolCall {
                id: "call_1".into(),
                name: "edit".into(),
                input: r#"{"path":"notes.md","old_string":"foo","new_string":"bar"}"#.into(),
            }],
        );
        sess.add_tool_results(vec![ToolResult {
            tool_call_id: "call_1".into(),
            content: "Edited notes.md".into(),
            is_error: false,
        }]);
        sess
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = store().await;
        let sess = sample_session();
        store.save_session(&sess).await.unwrap();

        let loaded = store.get_session(&sess.id).await.unwrap();
        assert_eq!(loaded.id, sess.id);
        assert_eq!(loaded.agent_id, sess.agent_id);
        assert_eq!(loaded.status, sess.status);
        assert_eq!(loaded.messages.len(), 3);
        assert_eq!(loaded.messages[0].content, "replace foo with bar");
        assert_eq!(loaded.messages[1].tool_calls, sess.messages[1].tool_calls);
        assert_eq!(
            loaded.messages[2].tool_results,
            sess.messages[2].tool_results
        );
        // Storage keeps microsecond precision.
        assert_eq!(
            loaded.messages[0].timestamp.timestamp_micros(),
            sess.messages[0].timestamp.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn save_replaces_message_set() {
        let store = store().await;
        let mut sess = sample_session();
        store.save_session(&sess).await.unwrap();

        sess.add_assistant_message("done", Vec::new());
        store.save_session(&sess).await.unwrap();

        let loaded = store.get_session(&sess.id).await.unwrap();
        assert_eq!(loaded.messages.len(), 4);
        assert_eq!(loaded.messages[3].content, "done");
    }

    #[tokio::test]
    async fn get_missing_session_is_not_found() {
        let store = store().await;
        let err = store.get_session("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let store = store().await;
        let sess = sample_session();
        store.save_session(&sess).await.unwrap();
        store.delete_session(&sess.id).await.unwrap();

        assert!(store.get_session(&sess.id).await.unwrap_err().is_not_found());

        let mut rows = store
            .conn
            .query(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                params![sess.id.as_str()],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn list_sessions_newest_first() {
        let store = store().await;
        let mut a = Session::new("build");
        a.created_at = parse_datetime("2026-01-01T00:00:00.000000Z");
        let mut b = Session::new("build");
        b.created_at = parse_datetime("2026-01-02T00:00:00.000000Z");
        store.save_session(&a).await.unwrap();
        store.save_session(&b).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, b.id);
        assert_eq!(sessions[1].id, a.id);
    }

    #[tokio::test]
    async fn list_by_parent_and_job() {
        let store = store().await;
        let parent = Session::new("build");
        store.save_session(&parent).await.unwrap();
        let child = Session::with_parent("explore", parent.id.clone());
        store.save_session(&child).await.unwrap();
        let job_sess = Session::with_job("job-runner", "job-42");
        store.save_session(&job_sess).await.unwrap();

        let children = store.list_sessions_by_parent(&parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);

        let job_sessions = store.list_sessions_by_job("job-42").await.unwrap();
        assert_eq!(job_sessions.len(), 1);
        assert_eq!(job_sessions[0].id, job_sess.id);
    }

    #[tokio::test]
    async fn job_roundtrip_and_due_query() {
        let store = store().await;
        let mut job = RecurringJob::new(
            "weekly-mail",
            "every monday at 9",
            "0 9 * * 1",
            "Summarize weekly mail",
        )
        .unwrap();
        store.save_job(&job).await.unwrap();

        let loaded = store.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.name, "weekly-mail");
        assert_eq!(loaded.schedule_cron, "0 9 * * 1");
        assert!(loaded.enabled);

        // Not due yet: next_run_at is in the future relative to creation.
        let due = store.get_due_jobs(Utc::now()).await.unwrap();
        assert!(due.is_empty());

        // Force the job due.
        job.next_run_at = Some(Utc::now() - chrono::Duration::minutes(5));
        store.save_job(&job).await.unwrap();
        let due = store.get_due_jobs(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);

        // Disabled jobs are never due.
        job.enabled = false;
        store.save_job(&job).await.unwrap();
        let due = store.get_due_jobs(Utc::now()).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn execution_upsert_and_listing() {
        let store = store().await;
        let mut exec = JobExecution::start("job-1");
        store.save_job_execution(&exec).await.unwrap();

        exec.session_id = Some("sess-1".into());
        exec.status = ExecutionStatus::Success;
        exec.output = "all done".into();
        exec.finished_at = Some(Utc::now());
        store.save_job_execution(&exec).await.unwrap();

        let execs = store.list_job_executions("job-1", 10).await.unwrap();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].status, ExecutionStatus::Success);
        assert_eq!(execs[0].output, "all done");
        assert_eq!(execs[0].session_id.as_deref(), Some("sess-1"));
        assert!(execs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn execution_listing_respects_limit_and_order() {
        let store = store().await;
        for i in 0..5 {
            let mut exec = JobExecution::start("job-1");
            exec.started_at = parse_datetime(&format!("2026-01-0{}T00:00:00.000000Z", i + 1));
            store.save_job_execution(&exec).await.unwrap();
        }

        let execs = store.list_job_executions("job-1", 3).await.unwrap();
        assert_eq!(execs.len(), 3);
        assert!(execs[0].started_at > execs[1].started_at);
        assert!(execs[1].started_at > execs[2].started_at);
    }
}
