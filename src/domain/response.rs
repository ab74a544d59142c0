//! Agent response and turn-streaming types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ToolCall, ToolCallRecord, ToolResult};

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens used in the prompt/input
    pub prompt_tokens: u32,
    /// Tokens generated in the response
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Add another usage report into this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Final response from one agent turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Final answer text (empty when the turn failed)
    pub text: String,
    /// Tool calls made during the turn, in request order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Terminal error for the turn, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the task finished (always true for a successful single
    /// round; the bounded multi-step loop sets false at the iteration cap)
    pub is_complete: bool,
    /// Number of model iterations driven
    pub iterations: u32,
    /// Reasoning notes collected by the multi-step loop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_steps: Vec<String>,
    /// Token usage accumulated over the turn, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Wall-clock duration of the turn in milliseconds
    pub duration_ms: u64,
}

impl Default for AgentResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            tool_calls: Vec::new(),
            error: None,
            is_complete: false,
            iterations: 0,
            reasoning_steps: Vec::new(),
            usage: None,
            duration_ms: 0,
        }
    }
}

impl AgentResponse {
    /// Build a failed response carrying a terminal error
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Turn execution status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Turn is starting
    Starting,
    /// Waiting on the completion service
    Thinking,
    /// A tool is being invoked
    CallingTool { tool_name: String },
    /// Final answer is being generated
    Generating,
    /// Turn completed
    Completed,
    /// Turn failed
    Failed { error: String },
}

/// A fragment of streaming output from an agent turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Streamed text content
    Text { content: String },
    /// Reasoning note (multi-step loop)
    Thought { content: String },
    /// Tool call being issued
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Tool execution result
    ToolResult {
        name: String,
        output: String,
        success: bool,
    },
    /// Status update
    Status { status: TurnStatus },
    /// Final complete response
    Complete { response: AgentResponse },
}

impl TurnEvent {
    /// Create a text fragment
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Create a reasoning note
    pub fn thought(content: impl Into<String>) -> Self {
        Self::Thought {
            content: content.into(),
        }
    }

    /// Create a tool call event
    pub fn tool_call(call: &ToolCall) -> Self {
        Self::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }

    /// Create a tool result event
    pub fn tool_result(name: impl Into<String>, result: &ToolResult) -> Self {
        Self::ToolResult {
            name: name.into(),
            output: result.text(),
            success: !result.is_error,
        }
    }

    /// Create a status event
    pub fn status(status: TurnStatus) -> Self {
        Self::Status { status }
    }

    /// Create a completion event
    pub fn complete(response: AgentResponse) -> Self {
        Self::Complete { response }
    }
}
