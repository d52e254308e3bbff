//! Error types for murmur-core

use thiserror::Error;

/// Result type alias using murmur-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding messages or talking to collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message part carried a kind this version does not know how to render
    #[error("Unknown message part kind: {0}")]
    UnknownPartKind(String),

    /// A message part could not be decoded at all
    #[error("Malformed message part: {0}")]
    MalformedPart(String),

    /// A message (or message list) could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Thread does not exist in the store
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    /// Message does not exist in the thread
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Only user messages can be edited into a branch
    #[error("Message {0} cannot be edited")]
    NotEditable(String),

    /// An operation needed an open thread
    #[error("No active thread")]
    NoActiveThread,

    /// The chat transport reported a failure
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Request was stopped before it finished
    #[error("Request aborted")]
    Aborted,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a transport error from a message
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Check if this error is worth offering a retry for
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) | Error::RateLimited { .. } => true,
            Error::Transport { message } => {
                let msg = message.to_lowercase();
                msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
                    || msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("connection")
                    || msg.contains("503")
                    || msg.contains("529")
            }
            _ => false,
        }
    }
}
