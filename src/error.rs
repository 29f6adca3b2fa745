//! Error types for response streaming.

use std::time::Duration;

use thiserror::Error;

/// Failure while requesting or consuming a completion response.
///
/// Every variant is local to one response: the conversation keeps whatever
/// content had already been applied and a new message may be submitted.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The outbound request could not be sent or the body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Reading the response body failed.
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),

    /// No chunk arrived within the configured read timeout.
    #[error("no data received for {0:?}")]
    Timeout(Duration),

    /// The completion endpoint answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// The response carried no readable body.
    #[error("response has no readable body")]
    StreamUnavailable,

    /// The response was aborted before it finished.
    #[error("response stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Short machine-readable code for SSE error events.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Io(_) => "io",
            Self::Timeout(_) => "timeout",
            Self::Api { .. } => "api",
            Self::StreamUnavailable => "stream_unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result type alias for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;
