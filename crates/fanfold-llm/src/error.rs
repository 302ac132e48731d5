//! Error types for completion calls.

use std::time::Duration;

use thiserror::Error;

/// Failures a completion service may report.
///
/// The orchestrator never inspects these beyond their display text: a worker
/// failure records the message, a planner failure aborts the run.
#[derive(Error, Debug)]
pub enum CompletionError {
    /// Network or (de)serialization failure talking to the provider
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status
    #[error("provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    /// The provider answered but produced no text content
    #[error("response contained no text content")]
    EmptyResponse,

    /// The call did not finish within the configured timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend cannot be constructed or called as configured
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::Transport(err.to_string())
    }
}
