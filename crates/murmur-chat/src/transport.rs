//! Transport abstraction for sending messages and streaming responses

use std::pin::Pin;

use async_trait::async_trait;
use murmur_core::{ChatTarget, FinishReason, Message, Result, ThreadId};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

/// Events emitted while an assistant response streams in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Assistant message created (usually empty)
    MessageStart { message: Message },

    /// Assistant message content updated during streaming
    MessageUpdate { message: Message },

    /// Assistant message completed
    MessageEnd { message: Message },

    /// The turn ended
    Finish { reason: FinishReason },

    /// The turn failed
    Error { message: String },
}

impl ChatEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Finish { .. } | ChatEvent::Error { .. })
    }
}

/// Everything a transport needs to send one user message
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Thread the message belongs to
    pub thread_id: ThreadId,
    /// Model, agent or gateway to answer
    pub target: ChatTarget,
    /// Messages before the new one
    pub history: Vec<Message>,
    /// The message being sent
    pub message: Message,
}

/// A stream of chat events
pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// Sends user messages and streams back the assistant's response
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Start a turn. The returned stream should end after a terminal event.
    ///
    /// Cancelling `cancel` asks the transport to stop the response early.
    async fn send(&self, request: SendRequest, cancel: CancellationToken)
    -> Result<ChatEventStream>;
}
