//! # Attache - Tool-Augmented Conversation Agent
//!
//! Attache is a conversational agent runtime built in Rust. It answers
//! questions by combining a remote LLM completion service with tool
//! capabilities discovered dynamically from MCP servers, and can persist
//! conversation state across restarts.
//!
//! ## Features
//!
//! - **Agent loop**: one turn per call, with a tool-execution round
//!   reconciled back into the conversation before the final answer
//! - **Planner loop**: bounded multi-step plan-and-execute mode with an
//!   explicit task-complete signal and iteration cap
//! - **Tool discovery**: descriptor-driven registry over one or more
//!   MCP servers, with session handshake and graceful degradation
//! - **Streaming**: pull-based turn streams; tool-call fragments are
//!   accumulated per index while text is yielded incrementally
//! - **Persistence**: in-memory or file-backed session stores with
//!   upsert semantics; store failures never break the conversation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use attache::agent::ChatAgent;
//! use attache::config::Settings;
//! use attache::llm::create_client;
//! use attache::memory::create_store;
//! use attache::tools::ToolRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new()?;
//!     let llm = create_client(&settings.agent.llm)?;
//!     let tools = Arc::new(ToolRegistry::new(&settings.mcp_servers));
//!     let store = create_store(&settings.agent.memory)?;
//!
//!     let mut agent = ChatAgent::new(settings.agent, llm, tools)
//!         .with_session_id("demo")
//!         .with_store(store);
//!     agent.restore().await?;
//!
//!     let response = agent.process_turn("What can you do?").await;
//!     println!("{}", response.text);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod memory;
pub mod tools;

pub use agent::{ChatAgent, PlannerAgent};
pub use domain::{AgentResponse, Message, Role, TurnEvent, TurnStatus};
pub use error::{AgentError, AgentResult, LlmError, LlmResult};
