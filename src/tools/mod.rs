//! Tool discovery and invocation
//!
//! The registry discovers capabilities from configured MCP servers,
//! caches their descriptors by name, and routes invocations to the
//! owning server. Dispatch is entirely descriptor-driven: nothing in
//! here enumerates tool names at compile time.

mod mcp;

pub use mcp::{McpServer, McpToolInfo};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::McpServerConfig;
use crate::domain::{ToolCall, ToolDescriptor, ToolResult};
use crate::error::AgentError;

/// Prefix for tools exposed from MCP servers
pub const MCP_TOOL_PREFIX: &str = "mcp__";

/// Directory of callable tools: discovery, cached descriptors, dispatch
#[async_trait]
pub trait ToolDirectory: Send + Sync {
    /// Current cached descriptors (discovering lazily if needed)
    async fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Execute one tool call. Never fails: problems come back as an
    /// error-flagged result.
    async fn invoke(&self, call: &ToolCall) -> ToolResult;

    /// Force re-discovery; returns the number of tools now cached
    async fn refresh(&self) -> usize;

    /// Names of the cached tools
    async fn tool_names(&self) -> Vec<String> {
        self.descriptors().await.into_iter().map(|d| d.name).collect()
    }
}

/// A cached tool entry: its published descriptor plus routing data
#[derive(Debug, Clone)]
struct RegisteredTool {
    descriptor: ToolDescriptor,
    server: String,
    remote_name: String,
}

/// Registry over one or more MCP tool servers
pub struct ToolRegistry {
    servers: HashMap<String, Arc<McpServer>>,
    entries: RwLock<HashMap<String, RegisteredTool>>,
    discovered: AtomicBool,
}

impl ToolRegistry {
    /// Build a registry from server configurations; disabled servers
    /// are skipped
    pub fn new(configs: &[McpServerConfig]) -> Self {
        let mut servers = HashMap::new();
        for config in configs {
            if !config.enabled {
                info!(server = %config.name, "MCP server is disabled, skipping");
                continue;
            }
            servers.insert(config.name.clone(), Arc::new(McpServer::new(config.clone())));
        }

        Self {
            servers,
            entries: RwLock::new(HashMap::new()),
            discovered: AtomicBool::new(false),
        }
    }

    /// Discover once per process; later calls are no-ops until `refresh`
    async fn ensure_discovered(&self) {
        if self.discovered.swap(true, Ordering::SeqCst) {
            return;
        }
        self.discover().await;
    }

    /// Query every server's capability list and rebuild the cache.
    /// An unreachable server is logged and contributes zero tools; the
    /// conversation degrades to whatever remains.
    async fn discover(&self) -> usize {
        let mut entries = self.entries.write().await;
        entries.clear();

        for (server_name, server) in &self.servers {
            match server.list_tools().await {
                Ok(tools) => {
                    info!(
                        server = %server_name,
                        count = tools.len(),
                        "discovered tool capabilities"
                    );
                    for tool in tools {
                        let prefixed = format!("{}{}_{}", MCP_TOOL_PREFIX, server_name, tool.name);
                        debug!(tool = %prefixed, "registered tool");
                        entries.insert(
                            prefixed.clone(),
                            RegisteredTool {
                                descriptor: ToolDescriptor {
                                    name: prefixed,
                                    description: tool.description.unwrap_or_else(|| {
                                        format!("Tool from {}", server_name)
                                    }),
                                    parameters: tool
                                        .input_schema
                                        .unwrap_or_else(|| json!({"type": "object"})),
                                },
                                server: server_name.clone(),
                                remote_name: tool.name,
                            },
                        );
                    }
                }
                Err(e) => {
                    let error = AgentError::Discovery(format!("{:#}", e));
                    warn!(
                        server = %server_name,
                        error = %error,
                        "tool discovery failed; continuing without this server's tools"
                    );
                }
            }
        }

        entries.len()
    }
}

#[async_trait]
impl ToolDirectory for ToolRegistry {
    async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.ensure_discovered().await;
        let entries = self.entries.read().await;
        let mut descriptors: Vec<ToolDescriptor> =
            entries.values().map(|e| e.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        self.ensure_discovered().await;

        let entry = {
            let entries = self.entries.read().await;
            entries.get(&call.name).cloned()
        };

        let Some(entry) = entry else {
            return ToolResult::error(format!("unknown tool: {}", call.name));
        };

        let Some(server) = self.servers.get(&entry.server) else {
            return ToolResult::error(format!("no server registered for tool: {}", call.name));
        };

        let arguments = filter_arguments(&entry.descriptor.parameters, &call.arguments);

        match server.call_tool(&entry.remote_name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                let error = AgentError::Invocation(format!("{:#}", e));
                warn!(
                    tool = %call.name,
                    server = %entry.server,
                    error = %error,
                    "tool call failed"
                );
                ToolResult::error(error.to_string())
            }
        }
    }

    async fn refresh(&self) -> usize {
        self.discovered.store(true, Ordering::SeqCst);
        self.discover().await
    }
}

/// Drop argument keys the tool's schema does not declare.
///
/// Completion services occasionally hallucinate extra fields; those are
/// filtered out rather than forwarded or rejected. A schema without a
/// `properties` map is treated as opaque and the arguments pass through.
fn filter_arguments(schema: &Value, arguments: &Value) -> Value {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return arguments.clone();
    };

    let Some(args) = arguments.as_object() else {
        return arguments.clone();
    };

    let mut filtered = serde_json::Map::new();
    for (key, value) in args {
        if properties.contains_key(key) {
            filtered.insert(key.clone(), value.clone());
        } else {
            debug!(argument = %key, "dropping undeclared tool argument");
        }
    }

    Value::Object(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_drops_undeclared_keys() {
        let schema = json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"}
            }
        });
        let args = json!({
            "query": "rust",
            "limit": 3,
            "hallucinated": true
        });

        let filtered = filter_arguments(&schema, &args);
        let obj = filtered.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("query"));
        assert!(obj.contains_key("limit"));
        assert!(!obj.contains_key("hallucinated"));
    }

    #[test]
    fn filter_passes_through_opaque_schema() {
        let schema = json!({"type": "object"});
        let args = json!({"anything": 1});
        assert_eq!(filter_arguments(&schema, &args), args);
    }

    #[test]
    fn filter_keeps_non_object_arguments_intact() {
        let schema = json!({"type": "object", "properties": {"q": {}}});
        let args = json!("not an object");
        assert_eq!(filter_arguments(&schema, &args), args);
    }

    #[tokio::test]
    async fn invoke_unknown_tool_yields_error_result() {
        let registry = ToolRegistry::new(&[]);
        let call = ToolCall::new("call_1", "mcp__none_missing", json!({}));
        let result = registry.invoke(&call).await;
        assert!(result.is_error);
        assert!(result.text().contains("unknown tool"));
    }

    #[tokio::test]
    async fn empty_registry_has_no_descriptors() {
        let registry = ToolRegistry::new(&[]);
        assert!(registry.descriptors().await.is_empty());
        assert!(registry.tool_names().await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_degrades_to_zero_tools() {
        let registry = ToolRegistry::new(&[McpServerConfig {
            name: "down".to_string(),
            // Nothing listens on port 1
            url: "http://127.0.0.1:1/mcp".to_string(),
            api_key: None,
            api_key_env: None,
            enabled: true,
            timeout_seconds: 1,
        }]);

        let first = registry.descriptors().await;
        let second = registry.descriptors().await;
        assert!(first.is_empty());
        assert_eq!(first.len(), second.len());

        let call = ToolCall::new("c1", "mcp__down_anything", json!({}));
        assert!(registry.invoke(&call).await.is_error);
    }

    #[tokio::test]
    async fn disabled_servers_are_skipped() {
        let registry = ToolRegistry::new(&[McpServerConfig {
            name: "off".to_string(),
            url: "http://127.0.0.1:1/mcp".to_string(),
            api_key: None,
            api_key_env: None,
            enabled: false,
            timeout_seconds: 1,
        }]);
        assert_eq!(registry.refresh().await, 0);
    }
}
