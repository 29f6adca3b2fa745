//! Streaming chat relay.
//!
//! Serves a browser chat page, forwards each submitted message to a remote
//! streaming completion endpoint, decodes the `0:`-prefixed response body
//! incrementally and relays the assistant's reply to the page as it arrives.
//!
//! # Modules
//!
//! - [`conversation`]: message model and the pure conversation reducer
//! - [`stream`]: incremental `0:` line decoder and response reader
//! - [`upstream`]: HTTP client for the completion endpoint
//! - [`session`]: in-memory chat sessions
//! - [`events`]: Server-Sent Events relayed to the page
//! - [`server`]: Axum router and handlers
//! - [`ui`]: page rendering and the auto-scroll policy
//! - [`config`]: layered configuration

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod server;
pub mod session;
pub mod stream;
pub mod ui;
pub mod upstream;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::session::SessionStore;
use crate::stream::ReadOptions;
use crate::upstream::UpstreamClient;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session store for conversation management.
    pub sessions: SessionStore,
    /// Client for the completion endpoint.
    pub upstream: Arc<UpstreamClient>,
    /// Read timeout applied to every response body.
    pub read_options: ReadOptions,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build state from configuration.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(config.upstream.settings()?)?;
        Ok(Self {
            sessions: SessionStore::new(),
            upstream: Arc::new(upstream),
            read_options: config.upstream.read_options(),
            config: Arc::new(config),
        })
    }
}
