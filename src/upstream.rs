//! Client for the remote streaming completion endpoint.
//!
//! Sends the conversation history as JSON and hands back the raw response
//! body for [`crate::stream::read_response`]. The endpoint's request shape is
//! `{"messages":[{"role":"user","content":"…"}]}`.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use url::Url;

use crate::conversation::Message;
use crate::error::{Result, StreamError};

/// Raw response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Connection settings for the completion endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Full URL of the completion endpoint.
    pub endpoint: Url,
    /// Token used when the browser did not supply an `Authorization` header.
    pub bearer_token: Option<String>,
    /// Maximum time to establish the connection.
    pub connect_timeout: Duration,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// HTTP client for the completion endpoint.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    settings: UpstreamSettings,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("endpoint", &self.settings.endpoint.as_str())
            .field("has_fallback_token", &self.settings.bearer_token.is_some())
            .finish()
    }
}

impl UpstreamClient {
    /// Build a client from settings.
    pub fn new(settings: UpstreamSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.settings.endpoint
    }

    /// Value for the outbound `Authorization` header.
    ///
    /// A header forwarded from the browser wins; otherwise the configured
    /// fallback token is sent as `Bearer <token>`; otherwise the header is
    /// sent empty. Nothing is validated here.
    #[must_use]
    pub fn authorization(&self, forwarded: Option<&str>) -> String {
        authorization_value(forwarded, self.settings.bearer_token.as_deref())
    }

    /// Post `history` and return the streaming response body.
    ///
    /// Returns `Ok(None)` when the endpoint answers `204 No Content`, i.e. a
    /// successful response with no body to read.
    pub async fn submit(
        &self,
        history: &[Message],
        authorization: &str,
    ) -> Result<Option<ByteStream>> {
        let body = CompletionRequest {
            messages: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };

        tracing::debug!(
            endpoint = %self.settings.endpoint,
            message_count = history.len(),
            has_authorization = !authorization.is_empty(),
            "Submitting chat request"
        );

        let resp = self
            .http
            .post(self.settings.endpoint.clone())
            .header(AUTHORIZATION, authorization)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Completion endpoint rejected request");
            return Err(StreamError::Api {
                status: status.as_u16(),
                message,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        Ok(Some(resp.bytes_stream().boxed()))
    }
}

/// Resolve the outbound `Authorization` header value.
#[must_use]
pub fn authorization_value(forwarded: Option<&str>, fallback_token: Option<&str>) -> String {
    match (forwarded, fallback_token) {
        (Some(header), _) if !header.trim().is_empty() => header.to_string(),
        (_, Some(token)) if !token.trim().is_empty() => format!("Bearer {token}"),
        _ => String::new(),
    }
}
