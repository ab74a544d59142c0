//! In-memory session store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::SessionStore;
use crate::domain::{ConversationSession, SessionSummary};
use crate::error::AgentResult;

/// In-memory session store
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<String, ConversationSession>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn save(&self, session: &ConversationSession) -> AgentResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> AgentResult<Option<ConversationSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> AgentResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> AgentResult<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;

        let mut summaries: Vec<SessionSummary> =
            sessions.values().map(|s| s.to_summary()).collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }
}
