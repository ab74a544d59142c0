//! Message, transcript and session types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Current time as Unix epoch milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions to the model
    System,
    /// End-user input
    User,
    /// Model output
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged entry in a session's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Author role
    pub role: Role,
    /// Text content
    pub content: String,
    /// Creation time (Unix epoch milliseconds)
    #[serde(default)]
    pub timestamp: u64,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// Ordered, append-only message history for one session.
///
/// Insertion order is semantically meaningful: messages are never
/// reordered or deduplicated. Clearing retains system-role messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Create an empty transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Read-only view of the messages in insertion order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy of the messages in insertion order
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Remove all messages except system-role ones
    pub fn clear(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// Replace the full message list (used when restoring from persistence)
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last message, if any
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// A conversation session: identified, durable message history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Unique session identifier
    pub session_id: String,
    /// Message history
    pub messages: Transcript,
    /// Caller-defined metadata carried with the session
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Session creation timestamp (Unix epoch milliseconds)
    pub created_at: u64,
    /// Last update timestamp (Unix epoch milliseconds)
    pub updated_at: u64,
}

impl ConversationSession {
    /// Create a new conversation session
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            session_id: session_id.into(),
            messages: Transcript::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message and bump the update timestamp
    pub fn add_message(&mut self, message: Message) {
        self.messages.append(message);
        self.updated_at = now_millis();
    }

    /// Number of messages in the session
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Truncated preview of the most recent message
    pub fn last_message_preview(&self, max_len: usize) -> Option<String> {
        self.messages.last().map(|m| {
            if m.content.chars().count() > max_len {
                let truncated: String = m.content.chars().take(max_len).collect();
                format!("{}...", truncated)
            } else {
                m.content.clone()
            }
        })
    }

    /// Summary view for session listings
    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message_preview: self.last_message_preview(100),
        }
    }
}

/// Summary of a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Unique session identifier
    pub session_id: String,
    /// Number of messages in the session
    pub message_count: usize,
    /// Session creation timestamp (Unix epoch milliseconds)
    pub created_at: u64,
    /// Last update timestamp (Unix epoch milliseconds)
    pub updated_at: u64,
    /// Optional preview of the last message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
}
