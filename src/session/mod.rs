//! Session and conversation management.
//!
//! Sessions are identified by UUID and hold one [`Conversation`] plus the
//! bookkeeping for the response currently streaming into it.
//!
//! # Architecture
//!
//! - [`Session`]: a single chat, its in-flight flag and cancellation handle
//! - [`SessionStore`]: thread-safe store for all active sessions
//!
//! # Example
//!
//! ```rust
//! use streamchat::session::SessionStore;
//!
//! let store = SessionStore::new();
//! let session = store.create();
//! session.submit("Hello!", "").unwrap();
//!
//! assert_eq!(session.message_count(), 1);
//! assert!(session.is_busy());
//! ```
//!
//! [`Conversation`]: crate::conversation::Conversation

mod thread;

pub use thread::{DEFAULT_SESSION_TIMEOUT, PendingTurn, Session, SessionStore, SubmitError};
