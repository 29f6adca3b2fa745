//! Incremental decoding of completion response bodies.
//!
//! # Overview
//!
//! - [`codec`]: splits raw bytes into lines and classifies `0:` delta lines
//! - [`reader`]: drives a body through the codec and emits
//!   [`ConversationEvent`](crate::conversation::ConversationEvent)s, with a
//!   per-read timeout and cooperative cancellation
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use futures::stream;
//! use streamchat::conversation::Conversation;
//! use streamchat::stream::{ReadOptions, read_into};
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test_block_on(async {
//! let body = stream::iter(vec![
//!     Ok::<_, std::io::Error>(Bytes::from_static(b"0:{\"content\":\"Hel\"}\n0:{\"con")),
//!     Ok(Bytes::from_static(b"tent\":\"lo\"}\n")),
//! ]);
//! let mut conversation = Conversation::new();
//! read_into(Some(body), &mut conversation, &ReadOptions::default(), &CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert_eq!(conversation.messages()[0].content, "Hello");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

pub mod codec;
pub mod reader;

pub use codec::{DEFAULT_MAX_LINE_LENGTH, DELTA_PREFIX, DeltaCodec, DeltaPayload, Frame};
pub use reader::{DEFAULT_READ_TIMEOUT, ReadOptions, ReadSummary, read_into, read_response};
