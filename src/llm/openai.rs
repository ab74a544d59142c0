//! OpenAI-compatible completion client with streaming support

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

/// OpenAI-compatible completion client
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    default_temperature: Option<f32>,
    default_max_tokens: Option<u32>,
}

impl OpenAiClient {
    /// Create a new client from configuration
    pub fn new(config: &LlmProviderConfig) -> LlmResult<Self> {
        let api_key = config.resolve_api_key("OPENAI_API_KEY").ok_or_else(|| {
            LlmError::Authentication(
                "API key not found in config or OPENAI_API_KEY environment variable".to_string(),
            )
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model: config.model.clone(),
            default_temperature: config.temperature,
            default_max_tokens: config.max_tokens,
        })
    }

    /// Build the request body for the chat completions API
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model.as_ref().unwrap_or(&self.model),
            "messages": convert_messages(&request.messages),
        });

        if let Some(temp) = request.temperature.or(self.default_temperature) {
            body["temperature"] = json!(temp);
        }

        if let Some(max_tokens) = request.max_tokens.or(self.default_max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }

        if let Some(stop) = &request.stop {
            body["stop"] = json!(stop);
        }

        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = json!(tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": object_schema(&t.parameters)
                            }
                        })
                    })
                    .collect::<Vec<_>>());
            }
        }

        if let Some(tool_choice) = &request.tool_choice {
            body["tool_choice"] = match tool_choice {
                super::ToolChoice::Auto => json!("auto"),
                super::ToolChoice::None => json!("none"),
                super::ToolChoice::Required => json!("required"),
                super::ToolChoice::Tool { name } => json!({
                    "type": "function",
                    "function": { "name": name }
                }),
            };
        }

        if request.stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }

    /// Parse a non-streaming response
    fn parse_response(&self, response: &OpenAiResponse) -> LlmResult<CompletionResponse> {
        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::Parse("No choices in response".to_string()))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .as_ref()
            .map(|tcs| {
                tcs.iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: serde_json::from_str(&tc.function.arguments)
                            .unwrap_or(Value::Object(Default::default())),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = map_finish_reason(choice.finish_reason.as_deref());

        let usage = response.usage.as_ref().map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(CompletionResponse {
            text: choice.message.content.clone().unwrap_or_default(),
            tool_calls,
            finish_reason,
            usage,
        })
    }

    /// POST to the chat-completions endpoint, turning non-2xx statuses
    /// into `LlmError::Api`
    async fn post(
        client: &reqwest::Client,
        api_key: &str,
        base_url: &str,
        body: &Value,
    ) -> LlmResult<reqwest::Response> {
        let response = client
            .post(format!("{}/chat/completions", base_url))
            .header("Authorization", format!("Bearer {}", api_key))
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

        while let Some(chunk_result) = stream.next().await {
            let bytes = chunk_result.map_err(|e| LlmError::Streaming(e.to_string()))?;
            lines.extend(&bytes);

            while let Some(line) = lines.next_line() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }

                if let Some(chunk) = parse_sse_data(data) {
                    if sender.send(chunk).await.is_err() {
                        // Receiver dropped; stop pulling the wire
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = self.build_request_body(&request);
        let response = Self::post(&self.client, &self.api_key, &self.base_url, &body).await?;

        let openai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        self.parse_response(&openai_response)
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

/// Convert internal messages to the chat completions format
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            json!({
                "role": match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": m.content,
            })
        })
        .collect()
}

/// Coerce a descriptor's parameter schema into the object form the
/// chat-completions API insists on
fn object_schema(params: &Value) -> Value {
    let empty = json!({"type": "object", "properties": {}, "required": []});
    match params.as_object() {
        None => empty,
        Some(o) if o.is_empty() => empty,
        Some(o) if !o.contains_key("type") => {
            let mut schema = o.clone();
            schema.insert("type".to_string(), json!("object"));
            Value::Object(schema)
        }
        _ => params.clone(),
    }
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Parse one SSE data payload into a stream chunk
fn parse_sse_data(data: &str) -> Option<StreamChunk> {
    let parsed: OpenAiStreamResponse = serde_json::from_str(data).ok()?;

    let mut chunk = StreamChunk {
        content: String::new(),
        tool_calls: Vec::new(),
        finish_reason: None,
        usage: None,
    };

    if let Some(choice) = parsed.choices.first() {
        chunk.content = choice.delta.content.clone().unwrap_or_default();

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for tc in tool_calls {
                let mut delta = ToolCallDelta::new(tc.index);
                if let Some(id) = &tc.id {
                    delta = delta.with_id(id);
                }
                if let Some(func) = &tc.function {
                    if let Some(name) = &func.name {
                        delta = delta.with_name(name);
                    }
                    if let Some(args) = &func.arguments {
                        delta = delta.with_arguments(args);
                    }
                }
                chunk.tool_calls.push(delta);
            }
        }

        if let Some(reason) = &choice.finish_reason {
            chunk.finish_reason = Some(map_finish_reason(Some(reason)));
        }
    }

    // Usage arrives in a trailing chunk when stream_options is set
    if let Some(usage) = &parsed.usage {
        chunk.usage = Some(TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });
    }

    if chunk.content.is_empty()
        && chunk.tool_calls.is_empty()
        && chunk.finish_reason.is_none()
        && chunk.usage.is_none()
    {
        return None;
    }

    Some(chunk)
}

// Wire types

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamResponse {
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProviderType;

    fn test_client() -> OpenAiClient {
        OpenAiClient::new(&LlmProviderConfig {
            provider: LlmProviderType::OpenAI,
            model: "gpt-4o".to_string(),
            api_key: Some("test-key".to_string()),
            api_key_env: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
        })
        .unwrap()
    }

    #[test]
    fn request_body_maps_roles_one_to_one() {
        let client = test_client();
        let request = CompletionRequest {
            messages: vec![
                Message::system("be brief"),
                Message::user("hi"),
                Message::assistant("hello"),
            ],
            ..Default::default()
        };

        let body = client.build_request_body(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn request_body_attaches_tools_and_defaults_schema() {
        let client = test_client();
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            tools: Some(vec![crate::domain::ToolDescriptor::new(
                "lookup",
                "Look something up",
                serde_json::Value::Null,
            )]),
            ..Default::default()
        };

        let body = client.build_request_body(&request);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools[0]["function"]["name"], "lookup");
        assert_eq!(tools[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn streaming_request_sets_stream_options() {
        let client = test_client();
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            stream: true,
            ..Default::default()
        };

        let body = client.build_request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn parse_sse_text_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let chunk = parse_sse_data(data).unwrap();
        assert_eq!(chunk.content, "Hel");
        assert!(chunk.tool_calls.is_empty());
    }

    #[test]
    fn parse_sse_tool_call_delta() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"lookup","arguments":"{\"q\""}}]},"finish_reason":null}]}"#;
        let chunk = parse_sse_data(data).unwrap();
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].index, 0);
        assert_eq!(chunk.tool_calls[0].name.as_deref(), Some("lookup"));
        assert_eq!(chunk.tool_calls[0].arguments.as_deref(), Some("{\"q\""));
    }

    #[test]
    fn parse_sse_finish_reason() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#;
        let chunk = parse_sse_data(data).unwrap();
        assert_eq!(chunk.finish_reason, Some(FinishReason::ToolCalls));
    }
}
