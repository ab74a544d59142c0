//! Domain types for the agent runtime

mod message;
mod response;
mod tool;

pub use message::{ConversationSession, Message, Role, SessionSummary, Transcript};
pub use response::{AgentResponse, TokenUsage, TurnEvent, TurnStatus};
pub use tool::{ToolCall, ToolCallRecord, ToolContent, ToolDescriptor, ToolResult};

pub(crate) use message::now_millis;
