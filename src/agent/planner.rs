//! Bounded plan-and-execute agent
//!
//! Each iteration asks the model for a structured step: a reasoning
//! note, an optional plan, zero or more tool calls, and an explicit
//! task-complete flag. The loop runs until the model signals completion
//! or the iteration cap is hit; hitting the cap returns the best
//! partial answer rather than an error.

use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{accumulate_usage, announcement_text, observation_text};
use crate::config::AgentConfig;
use crate::domain::{
    AgentResponse, ConversationSession, Message, TokenUsage, ToolCall, ToolCallRecord,
    ToolDescriptor, TurnEvent, TurnStatus,
};
use crate::error::AgentResult;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::memory::{apply_strategy, SessionStore};
use crate::tools::ToolDirectory;

const PLANNER_INSTRUCTIONS: &str = r#"Work on the task step by step. On every turn respond with exactly one JSON object, no other text:
{
  "reasoning": "what you concluded this step and why",
  "plan": ["remaining step", "..."],
  "tool_calls": [{"name": "tool name", "arguments": {}}],
  "task_complete": false,
  "final_answer": null
}
Request tools through "tool_calls" only. When the task is done, set "task_complete" to true and put the full answer in "final_answer"."#;

/// One structured step returned by the model
#[derive(Debug, Deserialize)]
struct PlannerStep {
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    plan: Vec<String>,
    #[serde(default)]
    tool_calls: Vec<PlannedCall>,
    #[serde(default)]
    task_complete: bool,
    #[serde(default)]
    final_answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedCall {
    name: String,
    #[serde(default = "empty_object")]
    arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Plan-and-execute agent bound to exactly one session
pub struct PlannerAgent {
    config: AgentConfig,
    llm: Arc<dyn CompletionClient>,
    tools: Arc<dyn ToolDirectory>,
    store: Option<Arc<dyn SessionStore>>,
    session: ConversationSession,
}

impl PlannerAgent {
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

    /// Restore the session from the attached store
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

    /// Drive a task through the bounded multi-step loop.
    ///
    /// Never returns `Err`; completion failures ride in
    /// `AgentResponse.error`, and hitting the iteration cap returns the
    /// best partial answer with `is_complete = false`.
    pub async fn process_task(&mut self, goal: impl Into<String>) -> AgentResponse {
        let started = Instant::now();
        self.session.add_message(Message::user(goal.into()));

        let descriptors = self.tools.descriptors().await;
        let system_prompt = planner_system_prompt(&self.config.system_prompt, &descriptors);

        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut reasoning_steps: Vec<String> = Vec::new();
        let mut usage: Option<TokenUsage> = None;
        let mut iterations = 0u32;
        let mut partial = String::new();

        for _ in 0..self.config.max_iterations {
            iterations += 1;

            let request = self.build_request(&system_prompt);
            let response = match self.llm.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "completion failed; leaving task history for retry");
                    self.persist_best_effort().await;
                    return AgentResponse {
                        tool_calls: records,
                        iterations,
                        reasoning_steps,
                        usage,
                        duration_ms: started.elapsed().as_millis() as u64,
                        ..AgentResponse::failed(e.to_string())
                    };
                }
            };
            accumulate_usage(&mut usage, response.usage.as_ref());

            let step = match parse_step(&response.text) {
                Ok(step) => step,
                Err(e) => {
                    warn!(error = %e, "planner step was not parsable");
                    self.persist_best_effort().await;
                    return AgentResponse {
                        tool_calls: records,
                        iterations,
                        reasoning_steps,
                        usage,
                        duration_ms: started.elapsed().as_millis() as u64,
                        ..AgentResponse::failed(format!("unparsable planner step: {}", e))
                    };
                }
            };

            if !step.reasoning.is_empty() {
                reasoning_steps.push(step.reasoning.clone());
                partial = step.reasoning.clone();
            }
            if !step.plan.is_empty() {
                debug!(steps = step.plan.len(), "planner proposed a plan");
            }

            if step.task_complete {
                let answer = step
                    .final_answer
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| step.reasoning.clone());
                self.session.add_message(Message::assistant(&answer));
                self.persist_best_effort().await;
                return AgentResponse {
                    text: answer,
                    tool_calls: records,
                    is_complete: true,
                    iterations,
                    reasoning_steps,
                    usage,
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                };
            }

            if step.tool_calls.is_empty() {
                // No calls and not complete: keep the note in history so
                // the next iteration can move the task forward
                let note = if step.reasoning.is_empty() {
                    response.text.clone()
                } else {
                    step.reasoning.clone()
                };
                self.session.add_message(Message::assistant(note));
                continue;
            }

            let calls: Vec<ToolCall> = step
                .tool_calls
                .into_iter()
                .map(|c| ToolCall::new(ToolCall::generate_id(), c.name, c.arguments))
                .collect();

            let mut results = Vec::new();
            for call in &calls {
                let call_started = Instant::now();
                let result = self.tools.invoke(call).await;
                let elapsed = call_started.elapsed().as_millis() as u64;
                records.push(ToolCallRecord::from_result(call, &result, elapsed));
                results.push((call.name.clone(), result));
            }

            let announcement = if step.reasoning.is_empty() {
                announcement_text(&calls)
            } else {
                format!("{}\n{}", step.reasoning, announcement_text(&calls))
            };
            self.session.add_message(Message::assistant(announcement));
            self.session
                .add_message(Message::user(observation_text(&results)));
        }

        // Safety valve against runaway iteration, not a failure
        warn!(
            max_iterations = self.config.max_iterations,
            "iteration cap reached without task completion"
        );
        self.persist_best_effort().await;
        AgentResponse {
            text: partial,
            tool_calls: records,
            error: None,
            is_complete: false,
            iterations,
            reasoning_steps,
            usage,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Drive a task through the bounded loop as a lazy event stream.
    ///
    /// Reasoning notes surface as `Thought` events while the task runs;
    /// dropping the stream abandons the task mid-iteration without
    /// committing a final answer.
    pub fn process_task_stream(
        &mut self,
        goal: impl Into<String>,
    ) -> impl Stream<Item = TurnEvent> + Send + '_ {
        let goal = goal.into();
        async_stream::stream! {
            let started = Instant::now();
            yield TurnEvent::status(TurnStatus::Starting);

            self.session.add_message(Message::user(goal));

            let descriptors = self.tools.descriptors().await;
            let system_prompt = planner_system_prompt(&self.config.system_prompt, &descriptors);

            let mut records: Vec<ToolCallRecord> = Vec::new();
            let mut reasoning_steps: Vec<String> = Vec::new();
            let mut usage: Option<TokenUsage> = None;
            let mut iterations = 0u32;
            let mut partial = String::new();

            for _ in 0..self.config.max_iterations {
                iterations += 1;
                yield TurnEvent::status(TurnStatus::Thinking);

                let request = self.build_request(&system_prompt);
                let response = match self.llm.complete(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, "completion failed; leaving task history for retry");
                        self.persist_best_effort().await;
                        yield TurnEvent::status(TurnStatus::Failed { error: e.to_string() });
                        yield TurnEvent::complete(AgentResponse {
                            tool_calls: records,
                            iterations,
                            reasoning_steps,
                            usage,
                            duration_ms: started.elapsed().as_millis() as u64,
                            ..AgentResponse::failed(e.to_string())
                        });
                        return;
                    }
                };
                accumulate_usage(&mut usage, response.usage.as_ref());

                let step = match parse_step(&response.text) {
                    Ok(step) => step,
                    Err(e) => {
                        warn!(error = %e, "planner step was not parsable");
                        self.persist_best_effort().await;
                        let error = format!("unparsable planner step: {}", e);
                        yield TurnEvent::status(TurnStatus::Failed { error: error.clone() });
                        yield TurnEvent::complete(AgentResponse {
                            tool_calls: records,
                            iterations,
                            reasoning_steps,
                            usage,
                            duration_ms: started.elapsed().as_millis() as u64,
                            ..AgentResponse::failed(error)
                        });
                        return;
                    }
                };

                if !step.reasoning.is_empty() {
                    yield TurnEvent::thought(&step.reasoning);
                    reasoning_steps.push(step.reasoning.clone());
                    partial = step.reasoning.clone();
                }

                if step.task_complete {
                    let answer = step
                        .final_answer
                        .filter(|a| !a.is_empty())
                        .unwrap_or_else(|| step.reasoning.clone());
                    self.session.add_message(Message::assistant(&answer));
                    self.persist_best_effort().await;
                    yield TurnEvent::status(TurnStatus::Completed);
                    yield TurnEvent::complete(AgentResponse {
                        text: answer,
                        tool_calls: records,
                        is_complete: true,
                        iterations,
                        reasoning_steps,
                        usage,
                        duration_ms: started.elapsed().as_millis() as u64,
                        ..Default::default()
                    });
                    return;
                }

                if step.tool_calls.is_empty() {
                    let note = if step.reasoning.is_empty() {
                        response.text.clone()
                    } else {
                        step.reasoning.clone()
                    };
                    self.session.add_message(Message::assistant(note));
                    continue;
                }

                let calls: Vec<ToolCall> = step
                    .tool_calls
                    .into_iter()
                    .map(|c| ToolCall::new(ToolCall::generate_id(), c.name, c.arguments))
                    .collect();

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

                let announcement = if step.reasoning.is_empty() {
                    announcement_text(&calls)
                } else {
                    format!("{}\n{}", step.reasoning, announcement_text(&calls))
                };
                self.session.add_message(Message::assistant(announcement));
                self.session
                    .add_message(Message::user(observation_text(&results)));
            }

            warn!(
                max_iterations = self.config.max_iterations,
                "iteration cap reached without task completion"
            );
            self.persist_best_effort().await;
            yield TurnEvent::status(TurnStatus::Completed);
            yield TurnEvent::complete(AgentResponse {
                text: partial,
                tool_calls: records,
                error: None,
                is_complete: false,
                iterations,
                reasoning_steps,
                usage,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
    }

    fn build_request(&self, system_prompt: &str) -> CompletionRequest {
        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(apply_strategy(
            self.session.messages.messages(),
            &self.config.memory.strategy,
        ));

        CompletionRequest {
            messages,
            model: Some(self.config.llm.model.clone()),
            temperature: self.config.temperature.or(self.config.llm.temperature),
            max_tokens: self.config.max_tokens.or(self.config.llm.max_tokens),
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

/// Compose the planner system prompt: base prompt, step contract, tool
/// listing
fn planner_system_prompt(base: &str, tools: &[ToolDescriptor]) -> String {
    let mut sections = vec![base.trim().to_string(), PLANNER_INSTRUCTIONS.to_string()];

    if tools.is_empty() {
        sections.push("No tools are available; work from your own knowledge.".to_string());
    } else {
        let listing = tools
            .iter()
            .map(|t| format!("- {}: {} (parameters: {})", t.name, t.description, t.parameters))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Available tools:\n{}", listing));
    }

    sections.join("\n\n")
}

fn parse_step(text: &str) -> Result<PlannerStep, String> {
    let json_text = extract_json(text).ok_or_else(|| "no JSON object in response".to_string())?;
    serde_json::from_str(json_text).map_err(|e| e.to_string())
}

/// Pull the JSON object out of a model response: a fenced block if
/// present, otherwise the outermost brace span
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if !inner.is_empty() {
                return Some(inner);
            }
        }
    }

    let first = trimmed.find('{')?;
    let last = trimmed.rfind('}')?;
    if last > first {
        Some(trimmed[first..=last].trim())
    } else {
        None
    }
}
