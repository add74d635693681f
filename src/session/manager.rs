//! Session manager — create/load/save/list operations over the store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::session::{Message, Session, SessionStatus};
use crate::store::Store;

/// A structured question parked on a session awaiting user input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionData {
    pub question: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub custom: bool,
}

/// A single answer choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

const PENDING_QUESTION_KEY: &str = "pending_question";

/// Manages session lifecycle on top of a [`Store`].
///
/// The manager owns in-memory session objects between load and save; the
/// store owns the persisted rows.
pub struct SessionManager {
    store: Arc<dyn Store>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create and persist a new top-level session.
    pub async fn create(&self, agent_id: &str) -> Result<Session, StoreError> {
        let sess = Session::new(agent_id);
        self.store.save_session(&sess).await?;
        Ok(sess)
    }

    /// Create and persist a new sub-session.
    pub async fn create_with_parent(
        &self,
        agent_id: &str,
        parent_id: &str,
    ) -> Result<Session, StoreError> {
        let sess = Session::with_parent(agent_id, parent_id);
        self.store.save_session(&sess).await?;
        Ok(sess)
    }

    /// Create and persist a session for a recurring-job execution.
    pub async fn create_with_job(&self, agent_id: &str, job_id: &str) -> Result<Session, StoreError> {
        let sess = Session::with_job(agent_id, job_id);
        self.store.save_session(&sess).await?;
        Ok(sess)
    }

    pub async fn get(&self, id: &str) -> Result<Session, StoreError> {
        self.store.get_session(id).await
    }

    pub async fn save(&self, sess: &Session) -> Result<(), StoreError> {
        self.store.save_session(sess).await
    }

    pub async fn list(&self) -> Result<Vec<Session>, StoreError> {
        self.store.list_sessions().await
    }

    pub async fn list_by_parent(&self, parent_id: &str) -> Result<Vec<Session>, StoreError> {
        self.store.list_sessions_by_parent(parent_id).await
    }

    pub async fn list_by_job(&self, job_id: &str) -> Result<Vec<Session>, StoreError> {
        self.store.list_sessions_by_job(job_id).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete_session(id).await
    }

    /// Park a session in `input_required` with a pending question in its
    /// metadata.
    pub async fn set_pending_question(
        &self,
        session_id: &str,
        data: &QuestionData,
    ) -> Result<(), StoreError> {
        let mut sess = self.get(session_id).await?;
        sess.metadata.insert(
            PENDING_QUESTION_KEY.to_string(),
            serde_json::to_value(data)?,
        );
        sess.set_status(SessionStatus::InputRequired);
        self.save(&sess).await
    }

    /// The pending question, if the session is waiting for input.
    pub async fn get_pending_question(
        &self,
        session_id: &str,
    ) -> Result<Option<QuestionData>, StoreError> {
        let sess = self.get(session_id).await?;
        if sess.status != SessionStatus::InputRequired {
            return Ok(None);
        }
        match sess.metadata.get(PENDING_QUESTION_KEY) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Answer a pending question: clears the metadata entry, appends the
    /// answer as a user message, and resumes the session.
    pub async fn answer_question(&self, session_id: &str, answer: &str) -> Result<(), StoreError> {
        let mut sess = self.get(session_id).await?;
        if sess.status != SessionStatus::InputRequired {
            return Err(StoreError::Query(format!(
                "session {session_id} is not waiting for input"
            )));
        }

        sess.metadata.remove(PENDING_QUESTION_KEY);
        sess.add_message(Message::new(crate::llm::Role::User, answer));
        sess.set_status(SessionStatus::Running);
        self.save(&sess).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlStore;

    async fn manager() -> SessionManager {
        SessionManager::new(Arc::new(LibSqlStore::new_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn create_persists_immediately() {
        let mgr = manager().await;
        let sess = mgr.create("build").await.unwrap();
        let loaded = mgr.get(&sess.id).await.unwrap();
        assert_eq!(loaded.agent_id, "build");
        assert_eq!(loaded.status, SessionStatus::Created);
    }

    #[tokio::test]
    async fn create_with_links() {
        let mgr = manager().await;
        let parent = mgr.create("build").await.unwrap();
        let child = mgr.create_with_parent("explore", &parent.id).await.unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));

        let job_sess = mgr.create_with_job("job-runner", "job-7").await.unwrap();
        assert_eq!(job_sess.agent_id, "job-runner");
        assert_eq!(job_sess.job_id.as_deref(), Some("job-7"));

        assert_eq!(mgr.list_by_parent(&parent.id).await.unwrap().len(), 1);
        assert_eq!(mgr.list_by_job("job-7").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_question_lifecycle() {
        let mgr = manager().await;
        let sess = mgr.create("build").await.unwrap();

        let question = QuestionData {
            question: "Which branch?".into(),
            header: "Deploy target".into(),
            options: vec![
                QuestionOption {
                    label: "main".into(),
                    description: "production".into(),
                },
                QuestionOption {
                    label: "staging".into(),
                    description: String::new(),
                },
            ],
            multiple: false,
            custom: true,
        };
        mgr.set_pending_question(&sess.id, &question).await.unwrap();

        let loaded = mgr.get(&sess.id).await.unwrap();
        assert_eq!(loaded.status, SessionStatus::InputRequired);

        let pending = mgr.get_pending_question(&sess.id).await.unwrap().unwrap();
        assert_eq!(pending.question, "Which branch?");
        assert_eq!(pending.options.len(), 2);

        mgr.answer_question(&sess.id, "main").await.unwrap();
        let answered = mgr.get(&sess.id).await.unwrap();
        assert_eq!(answered.status, SessionStatus::Running);
        assert_eq!(answered.messages.last().unwrap().content, "main");
        assert!(mgr
            .get_pending_question(&sess.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn answer_without_pending_question_fails() {
        let mgr = manager().await;
        let sess = mgr.create("build").await.unwrap();
        assert!(mgr.answer_question(&sess.id, "yes").await.is_err());
    }
}
