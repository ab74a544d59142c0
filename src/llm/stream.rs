//! Pull-based streaming for completion responses

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::domain::{TokenUsage, ToolCall};
use crate::error::LlmError;

/// One streamed fragment of a completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text delta
    #[serde(default)]
    pub content: String,
    /// Tool-call fragments (partial or complete)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
    /// Set on the fragment that terminates the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<super::FinishReason>,
    /// Token usage, when the provider reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    /// Chunk carrying only text
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Chunk carrying one tool-call fragment
    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![delta],
            finish_reason: None,
            usage: None,
        }
    }

    /// Terminating chunk
    pub fn finish(reason: super::FinishReason, usage: Option<TokenUsage>) -> Self {
        Self {
            content: String::new(),
            tool_calls: Vec::new(),
            finish_reason: Some(reason),
            usage,
        }
    }

    /// Whether this chunk carries text
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}

/// Fragment update for one tool call being streamed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Which call this fragment extends
    pub index: usize,
    /// Call id fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Arguments JSON fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// Create a new tool call delta
    pub fn new(index: usize) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments: None,
        }
    }

    /// Attach an id fragment
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a name fragment
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach an arguments fragment
    pub fn with_arguments(mut self, args: impl Into<String>) -> Self {
        self.arguments = Some(args.into());
        self
    }
}

/// Rebuilds tool calls from interleaved stream fragments.
///
/// Each fragment extends one call's id, name or argument string;
/// fragments are concatenated in arrival order per call index. `build`
/// finalizes at stream end; a call that never received a name stays
/// unfinalized and is dropped.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: BTreeMap<usize, PendingCall>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into the call at its index
    pub fn apply_delta(&mut self, delta: &ToolCallDelta) {
        let pending = self.pending.entry(delta.index).or_default();

        if let Some(id) = &delta.id {
            pending.id.push_str(id);
        }
        if let Some(name) = &delta.name {
            pending.name.push_str(name);
        }
        if let Some(arguments) = &delta.arguments {
            pending.arguments.push_str(arguments);
        }
    }

    /// Finalize every accumulated call, in index order
    pub fn build(self) -> Vec<ToolCall> {
        self.pending
            .into_values()
            .filter(|p| !p.name.is_empty())
            .map(|p| ToolCall {
                id: if p.id.is_empty() {
                    ToolCall::generate_id()
                } else {
                    p.id
                },
                name: p.name,
                arguments: serde_json::from_str(&p.arguments)
                    .unwrap_or(Value::Object(Default::default())),
            })
            .collect()
    }
}

/// Streaming response from a completion provider.
///
/// Pull-based: the consumer drives pacing by polling. Dropping the
/// stream closes the channel; the provider task notices at its next
/// send and stops, discarding anything unfinalized.
pub struct CompletionStream {
    receiver: mpsc::Receiver<Result<StreamChunk, LlmError>>,
}

impl CompletionStream {
    /// Create a channel pair for building a completion stream
    pub fn channel(buffer: usize) -> (CompletionStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (CompletionStreamSender { sender: tx }, Self { receiver: rx })
    }

    /// Drain the stream into a complete response
    pub async fn collect(mut self) -> Result<super::CompletionResponse, LlmError> {
        let mut text = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut finish_reason = None;
        let mut usage = None;

        while let Some(result) = self.receiver.recv().await {
            let chunk = result?;

            text.push_str(&chunk.content);

            for delta in &chunk.tool_calls {
                accumulator.apply_delta(delta);
            }

            if let Some(reason) = chunk.finish_reason {
                finish_reason = Some(reason);
            }

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        Ok(super::CompletionResponse {
            text,
            tool_calls: accumulator.build(),
            finish_reason: finish_reason.unwrap_or(super::FinishReason::Stop),
            usage,
        })
    }
}

impl Stream for CompletionStream {
    type Item = Result<StreamChunk, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Sender half for building a completion stream
#[derive(Clone)]
pub struct CompletionStreamSender {
    sender: mpsc::Sender<Result<StreamChunk, LlmError>>,
}

impl CompletionStreamSender {
    /// Send a chunk
    pub async fn send(
        &self,
        chunk: StreamChunk,
    ) -> Result<(), mpsc::error::SendError<Result<StreamChunk, LlmError>>> {
        self.sender.send(Ok(chunk)).await
    }

    /// Send an error
    pub async fn send_error(
        &self,
        error: LlmError,
    ) -> Result<(), mpsc::error::SendError<Result<StreamChunk, LlmError>>> {
        self.sender.send(Err(error)).await
    }

    /// Send text content
    pub async fn send_text(
        &self,
        text: impl Into<String>,
    ) -> Result<(), mpsc::error::SendError<Result<StreamChunk, LlmError>>> {
        self.send(StreamChunk::text(text)).await
    }

    /// Send the terminating chunk
    pub async fn send_finish(
        &self,
        reason: super::FinishReason,
        usage: Option<TokenUsage>,
    ) -> Result<(), mpsc::error::SendError<Result<StreamChunk, LlmError>>> {
        self.send(StreamChunk::finish(reason, usage)).await
    }

    /// Whether the consumer dropped its end
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
