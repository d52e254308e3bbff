//! Error types for murmur-chat

use thiserror::Error;

/// Result type alias using murmur-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during chat session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the data model or a collaborator
    #[error(transparent)]
    Core(#[from] murmur_core::Error),

    /// The response stream reported a failure mid-turn
    #[error("Response failed: {0}")]
    Stream(String),
}

impl Error {
    /// Check if the failed operation is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Core(e) => e.is_retryable(),
            Error::Stream(message) => {
                murmur_core::Error::transport(message.as_str()).is_retryable()
            }
        }
    }
}
