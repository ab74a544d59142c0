//! Anthropic completion client with streaming support

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    CompletionClient, CompletionRequest, CompletionResponse, CompletionStream,
    CompletionStreamSender, FinishReason, StreamChunk, ToolCallDelta,
};
use crate::config::LlmProviderConfig;
use crate::domain::{Message, Role, TokenUsage, ToolCall};
use crate::error::{LlmError, LlmResult};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic completion client
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    default_temperature: Option<f32>,
    default_max_tokens: Option<u32>,
}

impl AnthropicClient {
    /// Create a new client from configuration
    pub fn new(config: &LlmProviderConfig) -> LlmResult<Self> {
        let api_key = config.resolve_api_key("ANTHROPIC_API_KEY").ok_or_else(|| {
            LlmError::Authentication(
                "API key not found in config or ANTHROPIC_API_KEY environment variable".to_string(),
            )
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model: config.model.clone(),
            default_temperature: config.temperature,
            default_max_tokens: config.max_tokens,
        })
    }

    /// Build the request body for the messages API
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let (system_prompt, messages) = convert_messages(&request.messages);

        let mut body = json!({
            "model": request.model.as_ref().unwrap_or(&self.model),
            "messages": messages,
            "max_tokens": request.max_tokens.or(self.default_max_tokens).unwrap_or(4096),
        });

        if let Some(system) = system_prompt {
            body["system"] = json!(system);
        }

        if let Some(temp) = request.temperature.or(self.default_temperature) {
            body["temperature"] = json!(temp);
        }

        if let Some(stop) = &request.stop {
            body["stop_sequences"] = json!(stop);
        }

        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = json!(tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters
                        })
                    })
                    .collect::<Vec<_>>());
            }
        }

        if let Some(tool_choice) = &request.tool_choice {
            body["tool_choice"] = match tool_choice {
                super::ToolChoice::Auto => json!({ "type": "auto" }),
                super::ToolChoice::None => json!({ "type": "none" }),
                super::ToolChoice::Required => json!({ "type": "any" }),
                super::ToolChoice::Tool { name } => json!({
                    "type": "tool",
                    "name": name
                }),
            };
        }

        if request.stream {
            body["stream"] = json!(true);
        }

        body
    }

    /// Parse a non-streaming response
    fn parse_response(&self, response: &AnthropicResponse) -> LlmResult<CompletionResponse> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in &response.content {
            match block.block_type.as_str() {
                "text" => {
                    if let Some(t) = &block.text {
                        text.push_str(t);
                    }
                }
                "tool_use" => {
                    if let (Some(id), Some(name), Some(input)) =
                        (&block.id, &block.name, &block.input)
                    {
                        tool_calls.push(ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            arguments: input.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        let finish_reason = map_stop_reason(response.stop_reason.as_deref());

        let usage = Some(TokenUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        });

        Ok(CompletionResponse {
            text,
            tool_calls,
            finish_reason,
            usage,
        })
    }

    /// POST to the messages endpoint, turning non-2xx statuses into
    /// `LlmError::Api`
    async fn post(
        client: &reqwest::Client,
        api_key: &str,
        base_url: &str,
        body: &Value,
    ) -> LlmResult<reqwest::Response> {
        let response = client
            .post(format!("{}/v1/messages", base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn stream_completion(
        client: reqwest::Client,
        api_key: String,
        base_url: String,
        body: Value,
        sender: CompletionStreamSender,
    ) -> LlmResult<()> {
        let response = Self::post(&client, &api_key, &base_url, &body).await?;

        let mut stream = response.bytes_stream();
        let mut lines = super::sse::LineBuffer::new();
        let mut state = SseState::default();

        while let Some(chunk_result) = stream.next().await {
            let bytes = chunk_result.map_err(|e| LlmError::Streaming(e.to_string()))?;
            lines.extend(&bytes);

            while let Some(line) = lines.next_line() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(data) {
                    if event.event_type == "message_stop" {
                        return Ok(());
                    }
                    for chunk in state.map_event(event) {
                        if sender.send(chunk).await.is_err() {
                            // Receiver dropped; stop pulling the wire
                            return Ok(());
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = self.build_request_body(&request);
        let response = Self::post(&self.client, &self.api_key, &self.base_url, &body).await?;

        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        self.parse_response(&anthropic_response)
    }

    fn complete_stream(&self, request: CompletionRequest) -> CompletionStream {
        let (sender, stream) = CompletionStream::channel(64);

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let mut req = request;
        req.stream = true;
        let body = self.build_request_body(&req);

        tokio::spawn(async move {
            let result =
                Self::stream_completion(client, api_key, base_url, body, sender.clone()).await;
            if let Err(e) = result {
                let _ = sender.send_error(e).await;
            }
        });

        stream
    }
}

/// Convert internal messages to the messages API format.
/// Returns (system_prompt, messages); consecutive system messages are
/// folded into one system string.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut converted = Vec::new();

    for m in messages {
        match m.role {
            Role::System => {
                system_parts.push(&m.content);
            }
            Role::User => {
                converted.push(json!({
                    "role": "user",
                    "content": m.content
                }));
            }
            Role::Assistant => {
                converted.push(json!({
                    "role": "assistant",
                    "content": m.content
                }));
            }
        }
    }

    let system_prompt = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system_prompt, converted)
}

fn map_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

/// Per-stream state for mapping messages-API events onto stream chunks
#[derive(Default)]
struct SseState {
    tool_call_index: usize,
}

impl SseState {
    fn map_event(&mut self, event: AnthropicStreamEvent) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();

        match event.event_type.as_str() {
            "content_block_start" => {
                if let Some(content_block) = &event.content_block {
                    if content_block.block_type == "tool_use" {
                        let delta = ToolCallDelta::new(self.tool_call_index)
                            .with_id(content_block.id.clone().unwrap_or_default())
                            .with_name(content_block.name.clone().unwrap_or_default());
                        chunks.push(StreamChunk::tool_call(delta));
                        self.tool_call_index += 1;
                    }
                }
            }
            "content_block_delta" => {
                if let Some(delta) = &event.delta {
                    match delta.delta_type.as_str() {
                        "text_delta" => {
                            if let Some(text) = &delta.text {
                                chunks.push(StreamChunk::text(text));
                            }
                        }
                        "input_json_delta" => {
                            if let Some(partial_json) = &delta.partial_json {
                                let delta =
                                    ToolCallDelta::new(self.tool_call_index.saturating_sub(1))
                                        .with_arguments(partial_json);
                                chunks.push(StreamChunk::tool_call(delta));
                            }
                        }
                        _ => {}
                    }
                }
            }
            "message_delta" => {
                if let Some(delta) = &event.delta {
                    if let Some(stop_reason) = &delta.stop_reason {
                        let finish_reason = map_stop_reason(Some(stop_reason));
                        let usage = event.usage.map(|u| TokenUsage {
                            prompt_tokens: u.input_tokens.unwrap_or(0),
                            completion_tokens: u.output_tokens.unwrap_or(0),
                            total_tokens: u.input_tokens.unwrap_or(0)
                                + u.output_tokens.unwrap_or(0),
                        });
                        chunks.push(StreamChunk::finish(finish_reason, usage));
                    }
                }
            }
            _ => {}
        }

        chunks
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    content_block: Option<StreamContentBlock>,
    delta: Option<StreamDelta>,
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type", default)]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}
