//! Tool discovery and invocation against an in-process MCP server
//!
//! A minimal HTTP responder stands in for a real tool server so the
//! JSON-RPC handshake, discovery cache and argument filtering can be
//! exercised end to end.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use attache::config::McpServerConfig;
use attache::domain::ToolCall;
use attache::tools::{ToolDirectory, ToolRegistry};

/// One request as seen by the fake server
#[derive(Debug, Clone)]
struct SeenRequest {
    method: String,
    params: Value,
    session_header: Option<String>,
}

#[derive(Clone, Default)]
struct ServerOptions {
    /// Session token handed out by `initialize`
    session_token: Option<String>,
    /// Respond to `initialize` with an "already initialized" error
    reject_initialize: bool,
}

/// Spawn a fake MCP server; returns its URL and the request log
async fn spawn_server(options: ServerOptions) -> (String, Arc<Mutex<Vec<SeenRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let log = log.clone();
            let options = options.clone();

            tokio::spawn(async move {
                let Some((headers, body)) = read_request(&mut socket).await else {
                    return;
                };

                let request: Value = match serde_json::from_str(&body) {
                    Ok(v) => v,
                    Err(_) => return,
                };
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let id = request["id"].clone();
                let session_header = header_value(&headers, "mcp-session-id");

                log.lock().unwrap().push(SeenRequest {
                    method: method.clone(),
                    params: request["params"].clone(),
                    session_header,
                });

                let (payload, token) = respond(&method, &request, &options, id);
                write_response(&mut socket, &payload, token.as_deref()).await;
            });
        }
    });

    (format!("http://{}/mcp", addr), seen)
}

fn respond(
    method: &str,
    request: &Value,
    options: &ServerOptions,
    id: Value,
) -> (Value, Option<String>) {
    match method {
        "initialize" => {
            if options.reject_initialize {
                let payload = json!({
                    "jsonrpc": "2.0", "id": id,
                    "error": {"code": -32002, "message": "Server already initialized"}
                });
                return (payload, None);
            }
            let payload = json!({
                "jsonrpc": "2.0", "id": id,
                "result": {"protocolVersion": "2024-11-05", "capabilities": {}}
            });
            (payload, options.session_token.clone())
        }
        "tools/list" => {
            let payload = json!({
                "jsonrpc": "2.0", "id": id,
                "result": {"tools": [
                    {
                        "name": "find_samples",
                        "description": "Find samples matching a query",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"query": {"type": "string"}}
                        }
                    },
                    {
                        "name": "count_records",
                        "description": "Count stored records",
                        "inputSchema": {"type": "object", "properties": {}}
                    }
                ]}
            });
            (payload, None)
        }
        "tools/call" => {
            // Echo the received arguments back as the result text
            let arguments = request["params"]["arguments"].clone();
            let payload = json!({
                "jsonrpc": "2.0", "id": id,
                "result": {
                    "content": [{"type": "text", "text": arguments.to_string()}],
                    "isError": false
                }
            });
            (payload, None)
        }
        _ => {
            let payload = json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            });
            (payload, None)
        }
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<(String, String)> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&raw).to_string();
        if let Some(split) = text.find("\r\n\r\n") {
            let headers = text[..split].to_string();
            let mut body = text[split + 4..].to_string();
            let expected = header_value(&headers, "content-length")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);

            while body.len() < expected {
                let n = socket.read(&mut buf).await.ok()?;
                if n == 0 {
                    break;
                }
                body.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
            return Some((headers, body));
        }
    }
}

fn header_value(headers: &str, name: &str) -> Option<String> {
    headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

async fn write_response(socket: &mut tokio::net::TcpStream, payload: &Value, token: Option<&str>) {
    let body = payload.to_string();
    let session_header = token
        .map(|t| format!("Mcp-Session-Id: {}\r\n", t))
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
        body.len(),
        session_header,
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
}

fn server_config(name: &str, url: &str) -> McpServerConfig {
    McpServerConfig {
        name: name.to_string(),
        url: url.to_string(),
        api_key: None,
        api_key_env: None,
        enabled: true,
        timeout_seconds: 5,
    }
}

#[tokio::test]
async fn discovery_is_idempotent_and_namespaces_tool_names() {
    let (url, _) = spawn_server(ServerOptions::default()).await;
    let registry = ToolRegistry::new(&[server_config("samples", &url)]);

    let first = registry.descriptors().await;
    let names: Vec<&str> = first.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["mcp__samples_count_records", "mcp__samples_find_samples"]);

    let second = registry.descriptors().await;
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.parameters, b.parameters);
    }
}

#[tokio::test]
async fn handshake_runs_once_and_the_token_is_reused() {
    let (url, seen) = spawn_server(ServerOptions {
        session_token: Some("sess-42".to_string()),
        ..Default::default()
    })
    .await;
    let registry = ToolRegistry::new(&[server_config("samples", &url)]);
    registry.refresh().await;

    for _ in 0..2 {
        let call = ToolCall::new(
            ToolCall::generate_id(),
            "mcp__samples_find_samples",
            json!({"query": "enzyme"}),
        );
        let result = registry.invoke(&call).await;
        assert!(!result.is_error);
    }

    let requests = seen.lock().unwrap().clone();
    let initializes: Vec<&SeenRequest> =
        requests.iter().filter(|r| r.method == "initialize").collect();
    assert_eq!(initializes.len(), 1);
    assert!(initializes[0].session_header.is_none());

    // Every request after the handshake carries the issued token
    for request in requests.iter().filter(|r| r.method != "initialize") {
        assert_eq!(request.session_header.as_deref(), Some("sess-42"));
    }
}

#[tokio::test]
async fn already_initialized_server_degrades_to_tokenless_calls() {
    let (url, seen) = spawn_server(ServerOptions {
        reject_initialize: true,
        ..Default::default()
    })
    .await;
    let registry = ToolRegistry::new(&[server_config("samples", &url)]);
    registry.refresh().await;

    let call = ToolCall::new(
        ToolCall::generate_id(),
        "mcp__samples_find_samples",
        json!({"query": "enzyme"}),
    );
    let result = registry.invoke(&call).await;
    assert!(!result.is_error);

    let requests = seen.lock().unwrap().clone();
    let calls: Vec<&SeenRequest> =
        requests.iter().filter(|r| r.method == "tools/call").collect();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].session_header.is_none());
}

#[tokio::test]
async fn undeclared_arguments_never_reach_the_server() {
    let (url, seen) = spawn_server(ServerOptions::default()).await;
    let registry = ToolRegistry::new(&[server_config("samples", &url)]);

    let call = ToolCall::new(
        ToolCall::generate_id(),
        "mcp__samples_find_samples",
        json!({"query": "enzyme", "hallucinated": "field"}),
    );
    let result = registry.invoke(&call).await;
    assert!(!result.is_error);

    let requests = seen.lock().unwrap().clone();
    let call_request = requests.iter().find(|r| r.method == "tools/call").unwrap();
    let forwarded = call_request.params["arguments"].as_object().unwrap();
    assert!(forwarded.contains_key("query"));
    assert!(!forwarded.contains_key("hallucinated"));

    // The echoed result confirms what the tool actually received
    assert!(result.text().contains("query"));
    assert!(!result.text().contains("hallucinated"));
}
