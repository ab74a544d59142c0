//! Tool capability, call and result types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Published description of a callable tool capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within a registry
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema defining the tool's parameters
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Create a new tool descriptor
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A model-requested invocation of a named tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool being called
    pub name: String,
    /// Arguments passed to the tool (as JSON)
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Generate a unique ID for a tool call
    pub fn generate_id() -> String {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        format!("call_{}", &hex[..24])
    }
}

/// One block of tool output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    /// Block kind reported by the tool server (e.g. "text")
    pub kind: String,
    /// Text payload
    pub text: String,
}

impl ToolContent {
    /// Create a text content block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Result of executing one tool call.
///
/// Failures are carried via the error flag instead of being raised, so
/// a failed call can still feed the conversation as an observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Ordered output blocks
    pub content: Vec<ToolContent>,
    /// Whether the call failed
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful single-block text result
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    /// Create an error-flagged result carrying a diagnostic
    pub fn error(diagnostic: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(diagnostic)],
            is_error: true,
        }
    }

    /// Joined text of all content blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Record of a tool call made during a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// ID of the tool call
    pub tool_call_id: String,
    /// Name of the tool that was called
    pub tool_name: String,
    /// Arguments that were forwarded
    pub arguments: Value,
    /// Output text returned by the tool
    pub output: String,
    /// Whether the call succeeded
    pub success: bool,
    /// Error diagnostic if the call failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution time in milliseconds
    pub duration_ms: u64,
}

impl ToolCallRecord {
    /// Record a completed call from its result
    pub fn from_result(call: &ToolCall, result: &ToolResult, duration_ms: u64) -> Self {
        if result.is_error {
            Self {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                output: String::new(),
                success: false,
                error: Some(result.text()),
                duration_ms,
            }
        } else {
            Self {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                output: result.text(),
                success: true,
                error: None,
                duration_ms,
            }
        }
    }
}
