//! Shared test doubles for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use attache::config::{AgentConfig, LlmProviderConfig, LlmProviderType, MemoryConfig};
use attache::domain::{ConversationSession, SessionSummary, ToolCall, ToolDescriptor, ToolResult};
use attache::error::{AgentError, AgentResult, LlmResult};
use attache::llm::{
    CompletionClient, CompletionRequest, CompletionResponse, CompletionStream, FinishReason,
    StreamChunk, ToolCallDelta,
};
use attache::memory::SessionStore;
use attache::tools::ToolDirectory;

/// Route tracing output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Agent config for tests; small iteration cap, no trimming
pub fn test_config(max_iterations: u32) -> AgentConfig {
    AgentConfig {
        name: "test-agent".to_string(),
        description: "agent under test".to_string(),
        system_prompt: "You are a helpful test assistant.".to_string(),
        llm: LlmProviderConfig {
            provider: LlmProviderType::OpenAI,
            model: "mock-model".to_string(),
            api_key: Some("unused".to_string()),
            api_key_env: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
        },
        memory: MemoryConfig::default(),
        max_iterations,
        temperature: None,
        max_tokens: None,
    }
}

/// Completion response requesting the given tool calls
pub fn tool_call_response(calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse {
        text: String::new(),
        tool_calls: calls,
        finish_reason: FinishReason::ToolCalls,
        usage: None,
    }
}

/// Scripted completion client: pops one scripted response per request.
///
/// Streaming replays the same scripted response as fragments: text in
/// small pieces, tool calls as interleaved name/argument deltas, so the
/// accumulator path is exercised.
pub struct MockClient {
    responses: Mutex<VecDeque<LlmResult<CompletionResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockClient {
    pub fn new(responses: Vec<LlmResult<CompletionResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests the client has seen so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn pop(&self) -> LlmResult<CompletionResponse> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CompletionResponse::from_text("")))
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        self.requests.lock().unwrap().push(request);
        self.pop()
    }

    fn complete_stream(&self, request: CompletionRequest) -> CompletionStream {
        self.requests.lock().unwrap().push(request);
        let next = self.pop();
        let (sender, stream) = CompletionStream::channel(32);

        tokio::spawn(async move {
            match next {
                Ok(response) => {
                    for piece in chunk_string(&response.text, 4) {
                        if sender.send_text(piece).await.is_err() {
                            return;
                        }
                    }
                    for (index, call) in response.tool_calls.iter().enumerate() {
                        let args = serde_json::to_string(&call.arguments).unwrap_or_default();
                        let (name_a, name_b) = call.name.split_at(call.name.len() / 2);
                        let (args_a, args_b) = args.split_at(args.len() / 2);

                        let deltas = vec![
                            ToolCallDelta::new(index).with_id(&call.id).with_name(name_a),
                            ToolCallDelta::new(index).with_name(name_b).with_arguments(args_a),
                            ToolCallDelta::new(index).with_arguments(args_b),
                        ];
                        for delta in deltas {
                            if sender.send(StreamChunk::tool_call(delta)).await.is_err() {
                                return;
                            }
                        }
                    }
                    let _ = sender
                        .send_finish(response.finish_reason, response.usage)
                        .await;
                }
                Err(e) => {
                    let _ = sender.send_error(e).await;
                }
            }
        });

        stream
    }
}

fn chunk_string(s: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in s.chars() {
        current.push(ch);
        if current.chars().count() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// In-process tool directory: fixed descriptors, canned results
pub struct MockTools {
    descriptors: Vec<ToolDescriptor>,
    failing: HashSet<String>,
    invocations: Mutex<Vec<ToolCall>>,
}

impl MockTools {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        Self {
            descriptors,
            failing: HashSet::new(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Make the named tool fail at the transport layer
    pub fn failing(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Calls received so far, in invocation order
    pub fn invocations(&self) -> Vec<ToolCall> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolDirectory for MockTools {
    async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.descriptors.clone()
    }

    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        self.invocations.lock().unwrap().push(call.clone());
        if self.failing.contains(&call.name) {
            ToolResult::error(format!("transport failure calling {}", call.name))
        } else {
            ToolResult::from_text(format!("{} result", call.name))
        }
    }

    async fn refresh(&self) -> usize {
        self.descriptors.len()
    }
}

/// Store whose writes always fail; used to prove persistence failures
/// never break a turn
pub struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn save(&self, _session: &ConversationSession) -> AgentResult<()> {
        Err(AgentError::Persistence("store unavailable".to_string()))
    }

    async fn load(&self, _session_id: &str) -> AgentResult<Option<ConversationSession>> {
        Ok(None)
    }

    async fn delete(&self, _session_id: &str) -> AgentResult<()> {
        Ok(())
    }

    async fn list(&self, _limit: usize, _offset: usize) -> AgentResult<Vec<SessionSummary>> {
        Ok(Vec::new())
    }
}

/// Descriptor for a simple one-argument tool
pub fn descriptor(name: &str) -> ToolDescriptor {
    ToolDescriptor::new(
        name,
        format!("{} test tool", name),
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            }
        }),
    )
}
