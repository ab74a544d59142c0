//! Completion service clients with streaming support
//!
//! Provides a unified interface for the completion protocol:
//! - OpenAI-compatible chat completions
//! - Anthropic messages

mod anthropic;
mod openai;
mod sse;
mod stream;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use stream::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{LlmProviderConfig, LlmProviderType};
use crate::domain::{Message, TokenUsage, ToolCall, ToolDescriptor};
use crate::error::LlmResult;

/// Trait for completion clients
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider tag, e.g. "openai"
    fn name(&self) -> &str;

    /// Model this client was configured with
    fn model(&self) -> &str;

    /// Resolve one completion in full
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;

    /// Start a streaming completion; the caller drives consumption
    fn complete_stream(&self, request: CompletionRequest) -> CompletionStream;
}

/// Request for completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Messages in the conversation, roles mapped 1:1 onto the wire
    pub messages: Vec<Message>,
    /// Model to use (overrides client default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Generation cap in tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tool descriptors the service may request calls against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDescriptor>>,
    /// Tool choice mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Ask the service for a streamed response
    #[serde(default)]
    pub stream: bool,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            model: None,
            temperature: None,
            max_tokens: None,
            tools: None,
            tool_choice: None,
            stop: None,
            stream: false,
        }
    }
}

/// Tool choice mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides whether to call tools
    Auto,
    /// Don't use tools
    None,
    /// Must use a tool
    Required,
    /// Force one named tool
    Tool { name: String },
}

/// Response from a completion request.
///
/// Either `text` is the final answer, or `tool_calls` carries the
/// requested invocations (possibly alongside preamble text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text
    pub text: String,
    /// Requested tool calls, in request order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Why generation stopped
    pub finish_reason: FinishReason,
    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    /// Build a plain-text response
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: None,
        }
    }
}

/// Why a completion stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop
    Stop,
    /// Hit max tokens
    Length,
    /// The service requested tool calls
    ToolCalls,
    /// Content filtered
    ContentFilter,
}

/// Create a completion client from configuration
pub fn create_client(config: &LlmProviderConfig) -> LlmResult<Arc<dyn CompletionClient>> {
    match config.provider {
        LlmProviderType::OpenAI => {
            let client = OpenAiClient::new(config)?;
            Ok(Arc::new(client))
        }
        LlmProviderType::Anthropic => {
            let client = AnthropicClient::new(config)?;
            Ok(Arc::new(client))
        }
    }
}
