use thiserror::Error;

/// Errors raised while publishing or consuming events.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A queue could not be declared.
    #[error("Failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    /// The broker refused the message.
    #[error("Failed to publish to {topic}: {reason}")]
    Rejected { topic: String, reason: String },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Returned by a message handler to ask for redelivery.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Result type for publisher operations.
pub type Result<T> = std::result::Result<T, PublishError>;
