//! Session persistence for agent conversations
//!
//! Storage backends for durable conversation history:
//! - In-memory (default, lost on restart)
//! - File-based (persisted to disk)

mod file;
mod in_memory;
mod strategy;

pub use file::FileStore;
pub use in_memory::InMemoryStore;
pub use strategy::apply_strategy;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{MemoryBackend, MemoryConfig};
use crate::domain::{ConversationSession, Message, SessionSummary};
use crate::error::AgentResult;

/// Trait for session storage backends.
///
/// `save` is an idempotent upsert keyed by session id. Callers treat
/// store failures as non-fatal: the in-process transcript stays
/// authoritative for the rest of the process lifetime.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Save a conversation session (upsert)
    async fn save(&self, session: &ConversationSession) -> AgentResult<()>;

    /// Load a conversation session by ID
    async fn load(&self, session_id: &str) -> AgentResult<Option<ConversationSession>>;

    /// Delete a conversation session
    async fn delete(&self, session_id: &str) -> AgentResult<()>;

    /// List stored sessions, most recently updated first
    async fn list(&self, limit: usize, offset: usize) -> AgentResult<Vec<SessionSummary>>;

    /// Add a message to a session, creating the session if needed
    async fn append_message(&self, session_id: &str, message: Message) -> AgentResult<()> {
        let mut session = self.get_or_create(session_id).await?;
        session.add_message(message);
        self.save(&session).await
    }

    /// Get or create a session
    async fn get_or_create(&self, session_id: &str) -> AgentResult<ConversationSession> {
        if let Some(session) = self.load(session_id).await? {
            Ok(session)
        } else {
            let session = ConversationSession::new(session_id.to_string());
            self.save(&session).await?;
            Ok(session)
        }
    }
}

/// Create a session store from configuration
pub fn create_store(config: &MemoryConfig) -> AgentResult<Arc<dyn SessionStore>> {
    match config.backend {
        MemoryBackend::InMemory => Ok(Arc::new(InMemoryStore::new())),
        MemoryBackend::File => {
            let path = config
                .file_path
                .clone()
                .unwrap_or_else(|| "data/sessions".to_string());
            Ok(Arc::new(FileStore::new(path)?))
        }
    }
}
