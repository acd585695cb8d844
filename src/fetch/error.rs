use std::time::Duration;

use thiserror::Error;

use super::transport::TransportError;

/// Errors that can end a single fetch attempt or a whole fetch.
///
/// Each variant maps to one row of the retry dispatch table in
/// [`FetchError::retry_action`]. `Clone` so outcomes can be shared between
/// the batch result and progress reporting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// HTTP 404 or 410. The feed is gone; retrying will not help.
    #[error("Feed not found (HTTP {0})")]
    NotFound(u16),
    /// HTTP 403, usually a User-Agent heuristic on the server side
    #[error("Access blocked (HTTP 403)")]
    Blocked,
    /// HTTP 429 Too Many Requests
    #[error("Rate limited by server (HTTP 429)")]
    RateLimited,
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// DNS failure, refused or reset connection, truncated body
    #[error("Connection failed: {0}")]
    Connection(String),
    /// Any other HTTP status >= 400
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body could not be parsed as a feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Anything the classifier does not recognise
    #[error("Unexpected error: {0}")]
    Unexpected(String),
    /// Every attempt failed with a retryable error
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
    /// The cancellation token fired before the fetch finished
    #[error("Fetch cancelled")]
    Cancelled,
}

/// What the attempt loop does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Stop immediately and report the error.
    Abort,
    /// Try again after `delay`, with the next User-Agent in the rotation.
    Retry { delay: Duration },
}

impl FetchError {
    /// Maps an HTTP error status to its error class.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 | 410 => FetchError::NotFound(status),
            403 => FetchError::Blocked,
            429 => FetchError::RateLimited,
            other => FetchError::HttpStatus(other),
        }
    }

    /// Dispatch table: error class to recovery strategy for a 1-based `attempt`.
    ///
    /// | error | action |
    /// |---|---|
    /// | `NotFound` | abort |
    /// | `Blocked` | retry now |
    /// | `RateLimited` | retry after `5 * attempt` s |
    /// | `HttpStatus` | retry now |
    /// | `Timeout` | retry after `2 * attempt` s |
    /// | `Connection` | retry after `3 * attempt` s |
    /// | everything else | abort |
    pub fn retry_action(&self, attempt: u32) -> RetryAction {
        let attempt = u64::from(attempt.max(1));
        match self {
            FetchError::Blocked => RetryAction::Retry {
                delay: Duration::ZERO,
            },
            FetchError::RateLimited => RetryAction::Retry {
                delay: Duration::from_secs(5 * attempt),
            },
            FetchError::HttpStatus(_) => RetryAction::Retry {
                delay: Duration::ZERO,
            },
            FetchError::Timeout => RetryAction::Retry {
                delay: Duration::from_secs(2 * attempt),
            },
            FetchError::Connection(_) => RetryAction::Retry {
                delay: Duration::from_secs(3 * attempt),
            },
            FetchError::NotFound(_)
            | FetchError::ResponseTooLarge
            | FetchError::Parse(_)
            | FetchError::Unexpected(_)
            | FetchError::RetriesExhausted { .. }
            | FetchError::Cancelled => RetryAction::Abort,
        }
    }
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => FetchError::Timeout,
            TransportError::Connection(msg) => FetchError::Connection(msg),
            e @ TransportError::IncompleteResponse { .. } => FetchError::Connection(e.to_string()),
            TransportError::ResponseTooLarge => FetchError::ResponseTooLarge,
            TransportError::Other(msg) => FetchError::Unexpected(msg),
        }
    }
}
