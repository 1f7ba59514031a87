//! Error taxonomy for the conversation core.

use std::time::Duration;

use thiserror::Error;

use crate::core::message::TurnId;

/// Errors raised by the conversation core.
///
/// Backend failures are wrapped here for logging only; the streaming session
/// absorbs them and shows a fixed apology on the affected turn instead.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Empty prompt or negative token increment; rejected before any mutation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A submission or pending assistant turn while another turn is streaming.
    #[error("Turn {0} is still streaming")]
    Conflict(TurnId),

    /// A fragment addressed to a turn that is no longer the active stream.
    #[error("Dropped fragment for inactive turn {0}")]
    StaleFragment(TurnId),

    /// The named turn does not exist in the current conversation.
    #[error("Unknown turn {0}")]
    UnknownTurn(TurnId),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Failures reported by a model-serving client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The request could not be sent or the connection dropped.
    #[error("Request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success HTTP status.
    #[error("Backend returned status {status}: {summary}")]
    Status { status: u16, summary: String },

    /// A stream payload could not be decoded.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The backend reported an error inside the stream.
    #[error("Backend error: {0}")]
    Remote(String),

    /// No response or fragment arrived within the configured idle timeout.
    #[error("No response within {0:?}")]
    Timeout(Duration),
}
