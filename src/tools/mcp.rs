//! MCP tool server client
//!
//! Speaks JSON-RPC 2.0 over HTTP POST to one tool server: session
//! handshake, capability listing and tool calls.

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::McpServerConfig;
use crate::domain::{ToolContent, ToolResult};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// JSON-RPC request envelope
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[allow(dead_code)]
    data: Option<Value>,
}

/// Tool information published by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// Result payload of `tools/list`
#[derive(Debug, Deserialize)]
struct ListToolsResult {
    tools: Vec<McpToolInfo>,
}

/// Result payload of `tools/call`
#[derive(Debug, Deserialize)]
struct CallToolResult {
    content: Vec<ContentItem>,
    #[serde(rename = "isError")]
    is_error: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
    #[allow(dead_code)]
    data: Option<String>,
    #[serde(rename = "mimeType")]
    #[allow(dead_code)]
    mime_type: Option<String>,
}

/// Session handshake state for one server connection
#[derive(Debug, Clone)]
enum Handshake {
    /// No handshake attempted yet
    NotStarted,
    /// Server issued a session token; sent with every request
    Token(String),
    /// Server issued no token (or reported an existing session);
    /// requests proceed without one
    Tokenless,
}

/// Client for one MCP tool server.
///
/// The session token is obtained once on first use and reused for the
/// process lifetime; it is never re-requested per call.
pub struct McpServer {
    config: McpServerConfig,
    client: Client,
    request_id: AtomicU64,
    handshake: RwLock<Handshake>,
}

impl McpServer {
    /// Create a client for the given server configuration
    pub fn new(config: McpServerConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();

        Self {
            config,
            client,
            request_id: AtomicU64::new(0),
            handshake: RwLock::new(Handshake::NotStarted),
        }
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Perform the session handshake if it has not happened yet and
    /// return the token to use for the next request (if any).
    async fn ensure_handshake(&self) -> Result<Option<String>> {
        {
            let handshake = self.handshake.read().await;
            match &*handshake {
                Handshake::Token(token) => return Ok(Some(token.clone())),
                Handshake::Tokenless => return Ok(None),
                Handshake::NotStarted => {}
            }
        }

        let mut handshake = self.handshake.write().await;
        // Another caller may have finished the handshake while we waited
        match &*handshake {
            Handshake::Token(token) => return Ok(Some(token.clone())),
            Handshake::Tokenless => return Ok(None),
            Handshake::NotStarted => {}
        }

        let params = json!({
            "protocolVersion": "2024-11-05",
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });

        match self.send_raw("initialize", Some(params), None).await {
            Ok((_result, session_token)) => {
                if let Some(token) = session_token {
                    info!(server = %self.config.name, "tool server session established");
                    *handshake = Handshake::Token(token.clone());
                    Ok(Some(token))
                } else {
                    debug!(server = %self.config.name, "tool server issued no session token");
                    *handshake = Handshake::Tokenless;
                    Ok(None)
                }
            }
            Err(e) if is_already_initialized(&e) => {
                // May indicate a misconfigured deployment rather than
                // expected operation; keep it loud.
                warn!(
                    server = %self.config.name,
                    "tool server reports an existing session; continuing without a session token"
                );
                *handshake = Handshake::Tokenless;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Send one JSON-RPC request. The session token comes from the
    /// handshake state; `initialize` itself passes `None`.
    async fn send_raw(
        &self,
        method: &str,
        params: Option<Value>,
        session_token: Option<&str>,
    ) -> Result<(Value, Option<String>)> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method: method.to_string(),
            params,
        };

        let mut req_builder = self.client.post(&self.config.url).json(&request);

        if let Some(api_key) = self.config.resolve_api_key() {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        if let Some(token) = session_token {
            req_builder = req_builder.header(SESSION_HEADER, token);
        }

        let response = req_builder.send().await?;

        let session_token = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "MCP server {} returned error {}: {}",
                self.config.name,
                status,
                text
            );
        }

        let json_response: JsonRpcResponse = response.json().await?;

        if let Some(error) = json_response.error {
            anyhow::bail!(
                "MCP error from {}: [{}] {}",
                self.config.name,
                error.code,
                error.message
            );
        }

        let result = json_response
            .result
            .ok_or_else(|| anyhow::anyhow!("No result in MCP response from {}", self.config.name))?;

        Ok((result, session_token))
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let token = self.ensure_handshake().await?;
        let (result, _) = self.send_raw(method, params, token.as_deref()).await?;
        Ok(result)
    }

    /// List the tool capabilities this server publishes
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let result = self.send_request("tools/list", None).await?;
        let list_result: ListToolsResult = serde_json::from_value(result)?;
        Ok(list_result.tools)
    }

    /// Call a tool by its server-side name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let params = json!({
            "name": name,
            "arguments": arguments
        });

        let result = self.send_request("tools/call", Some(params)).await?;
        let call_result: CallToolResult = serde_json::from_value(result)?;

        Ok(convert_call_result(call_result))
    }
}

fn convert_call_result(result: CallToolResult) -> ToolResult {
    ToolResult {
        content: result
            .content
            .into_iter()
            .map(|item| ToolContent {
                kind: item.content_type,
                text: item.text.unwrap_or_default(),
            })
            .collect(),
        is_error: result.is_error.unwrap_or(false),
    }
}

fn is_already_initialized(error: &anyhow::Error) -> bool {
    error.to_string().to_lowercase().contains("already initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_result_maps_blocks_in_order() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"}
            ],
            "isError": false
        }"#;
        let parsed: CallToolResult = serde_json::from_str(raw).unwrap();
        let result = convert_call_result(parsed);
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.text(), "first\nsecond");
    }

    #[test]
    fn call_result_error_flag_defaults_to_false() {
        let raw = r#"{"content": [{"type": "text", "text": "ok"}]}"#;
        let parsed: CallToolResult = serde_json::from_str(raw).unwrap();
        assert!(!convert_call_result(parsed).is_error);
    }

    #[test]
    fn already_initialized_detection_is_case_insensitive() {
        let err = anyhow::anyhow!("MCP error from x: [-32600] Server Already Initialized");
        assert!(is_already_initialized(&err));

        let other = anyhow::anyhow!("connection refused");
        assert!(!is_already_initialized(&other));
    }

    #[test]
    fn tool_info_reads_input_schema_field() {
        let raw = r#"{"name": "lookup", "description": "d", "inputSchema": {"type": "object"}}"#;
        let info: McpToolInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.name, "lookup");
        assert!(info.input_schema.is_some());
    }
}
