//! Agent loop implementations
//!
//! - `ChatAgent`: one conversational turn per call, with at most one
//!   tool-execution round before the final answer
//! - `PlannerAgent`: bounded multi-step plan-and-execute loop

mod planner;

pub use planner::PlannerAgent;

use futures::Stream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::domain::{
    AgentResponse, ConversationSession, Message, TokenUsage, ToolCall, ToolCallRecord, ToolResult,
    TurnEvent, TurnStatus,
};
use crate::error::AgentResult;
use crate::llm::{CompletionClient, CompletionRequest, ToolCallAccumulator};
use crate::memory::{apply_strategy, SessionStore};
use crate::tools::ToolDirectory;

/// Conversational agent bound to exactly one session.
///
/// Turns are serialized by construction: both turn methods take
/// `&mut self`, so a new turn cannot start while a previous one is
/// outstanding.
pub struct ChatAgent {
    config: AgentConfig,
    llm: Arc<dyn CompletionClient>,
    tools: Arc<dyn ToolDirectory>,
    store: Option<Arc<dyn SessionStore>>,
    session: ConversationSession,
}

impl ChatAgent {
    /// Create an agent with a fresh session
    pub fn new(
        config: AgentConfig,
        llm: Arc<dyn CompletionClient>,
        tools: Arc<dyn ToolDirectory>,
    ) -> Self {
        let session = ConversationSession::new(Uuid::new_v4().to_string());
        Self {
            config,
            llm,
            tools,
            store: None,
            session,
        }
    }

    /// Bind the agent to a specific session id
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session = ConversationSession::new(session_id.into());
        self
    }

    /// Attach a durable session store
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Restore the session from the attached store, replacing the
    /// in-memory history. Returns whether a stored session was found.
    pub async fn restore(&mut self) -> AgentResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.load(&self.session.session_id).await? {
            Some(session) => {
                self.session = session;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The session id this agent is bound to
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// Ordered copy of the session history
    pub fn history(&self) -> Vec<Message> {
        self.session.messages.snapshot()
    }

    /// Remove all history except system-role messages
    pub async fn clear_history(&mut self) {
        self.session.messages.clear();
        self.session.updated_at = crate::domain::now_millis();
        self.persist_best_effort().await;
    }

    /// Names of the tools currently registered
    pub async fn tool_names(&self) -> Vec<String> {
        self.tools.tool_names().await
    }

    /// Force tool re-discovery; returns the number of tools cached
    pub async fn refresh_tools(&self) -> usize {
        self.tools.refresh().await
    }

    /// Persist the session to the attached store
    pub async fn persist(&self) -> AgentResult<()> {
        if let Some(store) = &self.store {
            store.save(&self.session).await?;
        }
        Ok(())
    }

    /// Drive one conversational turn to completion.
    ///
    /// Never returns `Err`: a completion failure is terminal for the
    /// turn and rides in `AgentResponse.error`, with the user's message
    /// left in history so the next turn can retry cleanly.
    pub async fn process_turn(&mut self, user_text: impl Into<String>) -> AgentResponse {
        let started = Instant::now();
        self.session.add_message(Message::user(user_text.into()));

        let descriptors = self.tools.descriptors().await;
        let request = self.build_request(descriptors, false);

        let mut usage: Option<TokenUsage> = None;

        let first = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "completion failed; leaving user message for retry");
                self.persist_best_effort().await;
                return AgentResponse {
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..AgentResponse::failed(e.to_string())
                };
            }
        };
        accumulate_usage(&mut usage, first.usage.as_ref());

        if first.tool_calls.is_empty() {
            self.session.add_message(Message::assistant(&first.text));
            self.persist_best_effort().await;
            return AgentResponse {
                text: first.text,
                is_complete: true,
                iterations: 1,
                usage,
                duration_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            };
        }

        // Execute requested calls sequentially, in request order, and
        // collect every result before touching history.
        let mut records = Vec::new();
        let mut results = Vec::new();
        for call in &first.tool_calls {
            let call_started = Instant::now();
            let result = self.tools.invoke(call).await;
            let elapsed = call_started.elapsed().as_millis() as u64;
            records.push(ToolCallRecord::from_result(call, &result, elapsed));
            results.push((call.name.clone(), result));
        }

        self.session
            .add_message(Message::assistant(announcement_text(&first.tool_calls)));
        self.session
            .add_message(Message::user(observation_text(&results)));

        // Final completion, tool descriptors omitted
        let final_request = self.build_request(Vec::new(), false);
        match self.llm.complete(final_request).await {
            Ok(response) => {
                accumulate_usage(&mut usage, response.usage.as_ref());
                self.session.add_message(Message::assistant(&response.text));
                self.persist_best_effort().await;
                AgentResponse {
                    text: response.text,
                    tool_calls: records,
                    is_complete: true,
                    iterations: 1,
                    usage,
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(error = %e, "final completion failed after tool round");
                self.persist_best_effort().await;
                AgentResponse {
                    tool_calls: records,
                    usage,
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..AgentResponse::failed(e.to_string())
                }
            }
        }
    }

    /// Drive one conversational turn as a lazy event stream.
    ///
    /// The consumer controls pacing; dropping the stream abandons the
    /// turn without committing an assistant message.
    pub fn process_turn_stream(
        &mut self,
        user_text: impl Into<String>,
    ) -> impl Stream<Item = TurnEvent> + Send + '_ {
        let user_text = user_text.into();
        async_stream::stream! {
            let started = Instant::now();
            yield TurnEvent::status(TurnStatus::Starting);

            self.session.add_message(Message::user(user_text));

            let descriptors = self.tools.descriptors().await;
            let request = self.build_request(descriptors, true);

            yield TurnEvent::status(TurnStatus::Thinking);

            let mut usage: Option<TokenUsage> = None;
            let mut content = String::new();
            let mut accumulator = ToolCallAccumulator::new();
            let mut stream_error: Option<String> = None;

            {
                let mut stream = self.llm.complete_stream(request);
                while let Some(result) = stream.next().await {
                    match result {
                        Ok(chunk) => {
                            if chunk.has_content() {
                                content.push_str(&chunk.content);
                                yield TurnEvent::text(&chunk.content);
                            }
                            for delta in &chunk.tool_calls {
                                accumulator.apply_delta(delta);
                            }
                            accumulate_usage(&mut usage, chunk.usage.as_ref());
                        }
                        Err(e) => {
                            stream_error = Some(e.to_string());
                            break;
                        }
                    }
                }
            }

            if let Some(error) = stream_error {
                warn!(error = %error, "completion failed; leaving user message for retry");
                self.persist_best_effort().await;
                yield TurnEvent::status(TurnStatus::Failed { error: error.clone() });
                yield TurnEvent::complete(AgentResponse {
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..AgentResponse::failed(error)
                });
                return;
            }

            let calls = accumulator.build();

            if calls.is_empty() {
                self.session.add_message(Message::assistant(&content));
                self.persist_best_effort().await;
                yield TurnEvent::status(TurnStatus::Completed);
                yield TurnEvent::complete(AgentResponse {
                    text: content,
                    is_complete: true,
                    iterations: 1,
                    usage,
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                });
                return;
            }

            let mut records = Vec::new();
            let mut results = Vec::new();
            for call in &calls {
                yield TurnEvent::status(TurnStatus::CallingTool {
                    tool_name: call.name.clone(),
                });
                yield TurnEvent::tool_call(call);

                let call_started = Instant::now();
                let result = self.tools.invoke(call).await;
                let elapsed = call_started.elapsed().as_millis() as u64;

                yield TurnEvent::tool_result(&call.name, &result);
                records.push(ToolCallRecord::from_result(call, &result, elapsed));
                results.push((call.name.clone(), result));
            }

            self.session
                .add_message(Message::assistant(announcement_text(&calls)));
            self.session
                .add_message(Message::user(observation_text(&results)));

            yield TurnEvent::status(TurnStatus::Generating);

            let final_request = self.build_request(Vec::new(), true);
            let mut final_text = String::new();
            let mut stream_error: Option<String> = None;

            {
                let mut stream = self.llm.complete_stream(final_request);
                while let Some(result) = stream.next().await {
                    match result {
                        Ok(chunk) => {
                            if chunk.has_content() {
                                final_text.push_str(&chunk.content);
                                yield TurnEvent::text(&chunk.content);
                            }
                            accumulate_usage(&mut usage, chunk.usage.as_ref());
                        }
                        Err(e) => {
                            stream_error = Some(e.to_string());
                            break;
                        }
                    }
                }
            }

            if let Some(error) = stream_error {
                warn!(error = %error, "final completion failed after tool round");
                self.persist_best_effort().await;
                yield TurnEvent::status(TurnStatus::Failed { error: error.clone() });
                yield TurnEvent::complete(AgentResponse {
                    tool_calls: records,
                    usage,
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..AgentResponse::failed(error)
                });
                return;
            }

            self.session.add_message(Message::assistant(&final_text));
            self.persist_best_effort().await;
            yield TurnEvent::status(TurnStatus::Completed);
            yield TurnEvent::complete(AgentResponse {
                text: final_text,
                tool_calls: records,
                is_complete: true,
                iterations: 1,
                usage,
                duration_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }
    }

    /// Build a completion request from the current history view
    fn build_request(
        &self,
        tools: Vec<crate::domain::ToolDescriptor>,
        stream: bool,
    ) -> CompletionRequest {
        let mut messages = vec![Message::system(&self.config.system_prompt)];
        messages.extend(apply_strategy(
            self.session.messages.messages(),
            &self.config.memory.strategy,
        ));

        CompletionRequest {
            messages,
            model: Some(self.config.llm.model.clone()),
            temperature: self.config.temperature.or(self.config.llm.temperature),
            max_tokens: self.config.max_tokens.or(self.config.llm.max_tokens),
            tools: if tools.is_empty() { None } else { Some(tools) },
            stream,
            ..Default::default()
        }
    }

    async fn persist_best_effort(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.session).await {
                warn!(
                    session = %self.session.session_id,
                    error = %e,
                    "failed to persist session; in-memory history remains authoritative"
                );
            }
        }
    }
}

/// Synthetic assistant message announcing the tools used in a turn
pub(crate) fn announcement_text(calls: &[ToolCall]) -> String {
    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
    format!("Using tools: {}", names.join(", "))
}

/// One observation message concatenating all tool results, tagged by
/// tool name, in request order
pub(crate) fn observation_text(results: &[(String, ToolResult)]) -> String {
    let mut lines = Vec::with_capacity(results.len());
    for (name, result) in results {
        if result.is_error {
            lines.push(format!("[{}] error: {}", name, result.text()));
        } else {
            lines.push(format!("[{}] {}", name, result.text()));
        }
    }
    format!("Tool results:\n{}", lines.join("\n"))
}

pub(crate) fn accumulate_usage(total: &mut Option<TokenUsage>, delta: Option<&TokenUsage>) {
    if let Some(delta) = delta {
        match total {
            Some(t) => t.add(delta),
            None => *total = Some(delta.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn announcement_lists_tools_in_request_order() {
        let calls = vec![
            ToolCall::new("c1", "get_weather", json!({})),
            ToolCall::new("c2", "search", json!({})),
        ];
        assert_eq!(announcement_text(&calls), "Using tools: get_weather, search");
    }

    #[test]
    fn observation_tags_results_and_flags_errors() {
        let results = vec![
            ("get_weather".to_string(), ToolResult::from_text("sunny")),
            ("search".to_string(), ToolResult::error("timeout")),
        ];
        let text = observation_text(&results);
        assert!(text.starts_with("Tool results:\n"));
        assert!(text.contains("[get_weather] sunny"));
        assert!(text.contains("[search] error: timeout"));
    }

    #[test]
    fn usage_accumulates_across_completions() {
        let mut total = None;
        accumulate_usage(
            &mut total,
            Some(&TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        );
        accumulate_usage(
            &mut total,
            Some(&TokenUsage {
                prompt_tokens: 20,
                completion_tokens: 10,
                total_tokens: 30,
            }),
        );
        let total = total.unwrap();
        assert_eq!(total.prompt_tokens, 30);
        assert_eq!(total.total_tokens, 45);
    }
}
