//! HTML rendering for the chat page.
//!
//! # Structure
//!
//! - [`page`]: page shell, message bubbles and the input form
//! - [`scroll`]: auto-scroll policy shared with the bundled script

pub mod page;
pub mod scroll;

pub use page::{chat_page, escape_html, html_shell};
pub use scroll::{AutoScroll, BOTTOM_TOLERANCE_PX, ScrollIntent, Viewport, is_at_bottom};
