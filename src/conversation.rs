//! Conversation state and the reducer that folds stream events into it.
//!
//! A [`Conversation`] is an ordered list of [`Message`]s. Insertion order is
//! display order. At most one assistant message is "open" at a time: the last
//! element, while its response stream is still being consumed. Only the open
//! message ever has its content extended.
//!
//! State changes are expressed as [`ConversationEvent`]s and applied with the
//! pure [`reduce`] function, so the whole lifecycle can be exercised without
//! any HTTP or UI harness.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use streamchat::conversation::{Conversation, ConversationEvent, Role, reduce};
//!
//! let state = Conversation::new();
//! let state = reduce(state, &ConversationEvent::user_submitted("Hi", Utc::now()));
//! let state = reduce(state, &ConversationEvent::ResponseStarted { at: Utc::now() });
//! let state = reduce(state, &ConversationEvent::Delta { text: "Hello".into() });
//!
//! assert_eq!(state.len(), 2);
//! assert_eq!(state.messages()[1].role, Role::Assistant);
//! assert_eq!(state.messages()[1].content, "Hello");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a message. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Text typed by the user.
    User,
    /// Text streamed back from the completion endpoint.
    Assistant,
}

impl Role {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position of the message within its conversation.
    pub id: u64,
    /// Author of the message.
    pub role: Role,
    /// Accumulated text.
    pub content: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

/// Input alphabet of the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// The user submitted a message. Closes any open assistant message.
    UserSubmitted {
        /// Message text.
        content: String,
        /// Submission time.
        at: DateTime<Utc>,
    },
    /// A response body became available; opens an empty assistant message.
    ResponseStarted {
        /// Time the response began.
        at: DateTime<Utc>,
    },
    /// One text delta for the open assistant message.
    Delta {
        /// Text to append.
        text: String,
    },
    /// The response stream ended. Closes the open assistant message.
    ResponseEnded,
}

impl ConversationEvent {
    /// Shorthand for [`ConversationEvent::UserSubmitted`].
    pub fn user_submitted(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::UserSubmitted {
            content: content.into(),
            at,
        }
    }
}

/// Ordered message history of one chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    /// Whether the last message is an assistant message still receiving deltas.
    #[serde(default)]
    open: bool,
}

impl Conversation {
    /// Create an empty conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The assistant message currently receiving deltas, if any.
    #[must_use]
    pub fn open_message(&self) -> Option<&Message> {
        if self.open { self.messages.last() } else { None }
    }

    /// Whether an assistant message is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Apply an event in place.
    ///
    /// Equivalent to `*self = reduce(std::mem::take(self), event)`.
    pub fn apply(&mut self, event: &ConversationEvent) {
        match event {
            ConversationEvent::UserSubmitted { content, at } => {
                self.open = false;
                self.push(Role::User, content.clone(), *at);
            }
            ConversationEvent::ResponseStarted { at } => {
                self.push(Role::Assistant, String::new(), *at);
                self.open = true;
            }
            ConversationEvent::Delta { text } => {
                if !self.open {
                    tracing::debug!(
                        delta_length = text.len(),
                        "Delta arrived with no open assistant message, ignoring"
                    );
                    return;
                }
                if let Some(last) = self.messages.last_mut() {
                    last.content.push_str(text);
                }
            }
            ConversationEvent::ResponseEnded => {
                self.open = false;
            }
        }
    }

    fn push(&mut self, role: Role, content: String, timestamp: DateTime<Utc>) {
        let id = self.messages.len() as u64;
        self.messages.push(Message {
            id,
            role,
            content,
            timestamp,
        });
    }
}

/// Fold one event into a conversation, returning the new state.
#[must_use]
pub fn reduce(mut state: Conversation, event: &ConversationEvent) -> Conversation {
    state.apply(event);
    state
}
