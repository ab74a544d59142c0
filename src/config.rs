//! Configuration types and loading

use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level runtime settings.
///
/// Built in layers: `attache.{toml,yaml,json}` in the working directory,
/// an optional explicit file, then `ATTACHE_*` environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Agent definition
    pub agent: AgentConfig,
    /// External MCP servers providing tools
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Settings {
    /// Load settings from the default layered sources
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::load(None)
    }

    /// Load settings, optionally from an explicit config file
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut builder = Config::builder().add_source(File::with_name("attache").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }

        let built = builder
            .add_source(config::Environment::with_prefix("ATTACHE").separator("__"))
            .build()?;

        let settings: Settings = built.try_deserialize()?;
        Ok(settings)
    }
}

/// Load agent definitions from a directory of YAML/JSON files
pub fn load_agents_from_dir(dir: impl AsRef<Path>) -> Result<Vec<AgentConfig>, anyhow::Error> {
    let pattern = format!("{}/*", dir.as_ref().display());
    let mut agents = Vec::new();

    for entry in glob::glob(&pattern)? {
        let path = entry?;
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if matches!(ext, "json" | "yaml" | "yml") {
                let content = std::fs::read_to_string(&path)?;
                let agent: AgentConfig = serde_yaml::from_str(&content).map_err(|e| {
                    anyhow::anyhow!("Invalid agent definition {}: {}", path.display(), e)
                })?;
                agents.push(agent);
            }
        }
    }

    Ok(agents)
}

/// Definition of one agent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Unique agent name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// System prompt for the agent
    pub system_prompt: String,
    /// Completion provider configuration
    pub llm: LlmProviderConfig,
    /// Session storage configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Maximum iterations for the multi-step planner loop
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Temperature override (if not set, uses provider default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Max tokens override (if not set, uses provider default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_max_iterations() -> u32 {
    10
}

/// Completion provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmProviderConfig {
    /// Provider type
    pub provider: LlmProviderType,
    /// Model identifier sent with each request
    pub model: String,
    /// API key value (prefer `api_key_env` outside of tests)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable containing the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Endpoint override for self-hosted or proxied deployments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Provider-level temperature default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Provider-level max-tokens default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl LlmProviderConfig {
    /// Resolve the API key: direct value first, then the configured
    /// environment variable, then `default_env`
    pub fn resolve_api_key(&self, default_env: &str) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        let env_var = self.api_key_env.as_deref().unwrap_or(default_env);
        std::env::var(env_var).ok()
    }
}

/// Supported completion providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    /// OpenAI-compatible chat completions API
    #[default]
    OpenAI,
    /// Anthropic messages API
    Anthropic,
}

impl std::fmt::Display for LlmProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProviderType::OpenAI => write!(f, "openai"),
            LlmProviderType::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Session storage and request-view shaping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Which backend holds persisted sessions
    #[serde(default)]
    pub backend: MemoryBackend,
    /// Transcript trimming strategy applied when building requests
    #[serde(default)]
    pub strategy: TrimStrategy,
    /// Directory for file-based storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::InMemory,
            strategy: TrimStrategy::Full,
            file_path: None,
        }
    }
}

/// Session storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    /// Keep sessions in process memory; lost on restart
    #[default]
    InMemory,
    /// One JSON document per session on disk
    File,
}

/// Transcript trimming strategies.
///
/// Applied only to the request view sent to the completion service; the
/// stored transcript itself is never trimmed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrimStrategy {
    /// Send all messages
    Full,
    /// Only the most recent messages
    SlidingWindow {
        /// How many recent messages survive
        size: usize,
    },
    /// Head and tail of the conversation, middle dropped
    FirstLast {
        /// How many leading messages survive
        first: usize,
        /// How many trailing messages survive
        last: usize,
    },
}

impl Default for TrimStrategy {
    fn default() -> Self {
        Self::Full
    }
}

/// Configuration for an external MCP tool server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerConfig {
    /// Unique name for this server connection
    pub name: String,
    /// URL of the MCP endpoint (e.g., "http://localhost:3001/mcp")
    pub url: String,
    /// Optional API key for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable containing the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Whether this server is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Connection timeout in seconds
    #[serde(default = "default_mcp_timeout")]
    pub timeout_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_mcp_timeout() -> u64 {
    30
}

impl McpServerConfig {
    /// Resolve the API key: direct value first, then environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        if let Some(env_var) = &self.api_key_env {
            return std::env::var(env_var).ok();
        }
        None
    }
}
