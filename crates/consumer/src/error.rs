//! Consumer error types.

use thiserror::Error;

/// Reasons an order message cannot be turned into an order request.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The payload is not a JSON order message.
    #[error("Undecodable order message: {0}")]
    Decode(#[from] serde_json::Error),

    /// The payload decoded but describes no valid order.
    #[error("Invalid order message: {0}")]
    Invalid(String),
}

/// Errors that end a subscription and send the consumer back to connecting.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Connecting, declaring streams, or receiving from the queue failed.
    #[error("Queue transport error: {0}")]
    Transport(String),

    /// The server closed the message stream.
    #[error("Message stream closed by server")]
    StreamClosed,
}

impl ConsumerError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        ConsumerError::Transport(err.to_string())
    }
}
