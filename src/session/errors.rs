//! Errors surfaced to callers of the session handle.

use thiserror::Error;

/// Failure to reach the session runner.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The runner has stopped and no longer accepts work.
    #[error("session runner has shut down")]
    Closed,
    /// The runner dropped the request before producing a response.
    #[error("session runner dropped the request")]
    Dropped,
}
