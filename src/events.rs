//! Events relayed to the browser while a response streams.
//!
//! Each [`ChatEvent`] becomes one Server-Sent Event whose `event:` line is
//! the variant's wire name and whose `data:` line is the JSON payload.
//!
//! # Example
//!
//! ```rust
//! use streamchat::events::{ChatEvent, sse_event};
//!
//! let event = ChatEvent::MessageDelta {
//!     message_id: 1,
//!     text: "Hello".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.starts_with("event: message.delta\n"));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Streaming events sent to the chat page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// The assistant placeholder message was created.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Unique identifier for this request/response pair.
        request_id: String,
        /// ID of the assistant message receiving deltas.
        message_id: u64,
    },

    /// Incremental text for the open assistant message.
    #[serde(rename = "message.delta")]
    MessageDelta {
        /// ID of the assistant message.
        message_id: u64,
        /// The text fragment to append.
        text: String,
    },

    /// The response ended abnormally. Content received so far is kept.
    #[serde(rename = "error")]
    Error {
        /// Error message.
        message: String,
        /// Error code for programmatic handling.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// The response is over; the page may re-enable its input.
    #[serde(rename = "done")]
    Done,
}

impl ChatEvent {
    /// Get the SSE event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamStart { .. } => "stream.start",
            Self::MessageDelta { .. } => "message.delta",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

impl From<&StreamError> for ChatEvent {
    fn from(err: &StreamError) -> Self {
        Self::Error {
            message: err.to_string(),
            code: Some(err.code().to_string()),
        }
    }
}

/// Convert a [`ChatEvent`] to an SSE-formatted string.
pub fn sse_event(evt: &ChatEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    format!("event: {}\ndata: {json}\n\n", evt.name())
}
