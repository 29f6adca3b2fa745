//! Drives a response body through [`DeltaCodec`] and emits conversation events.

use std::ops::ControlFlow;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use super::codec::{DEFAULT_MAX_LINE_LENGTH, DeltaCodec, Frame};
use crate::conversation::{Conversation, ConversationEvent};
use crate::error::{Result, StreamError};

/// Default time to wait for the next chunk before giving up.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Tuning for [`read_response`].
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Maximum wait between two chunks.
    pub read_timeout: Duration,
    /// Longest line kept; longer lines count as malformed.
    pub max_line_length: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Counters for a completed response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Deltas applied.
    pub deltas: usize,
    /// Delta lines skipped because their payload was malformed.
    pub malformed: usize,
    /// Lines without the delta prefix.
    pub ignored: usize,
    /// Raw bytes read from the body.
    pub bytes: usize,
}

/// Consume a response body and report every state change to `on_event`.
///
/// Emits [`ConversationEvent::ResponseStarted`] once before reading, one
/// [`ConversationEvent::Delta`] per well-formed delta line in wire order, and
/// [`ConversationEvent::ResponseEnded`] when the body finishes or fails.
///
/// Returning [`ControlFlow::Break`] from `on_event`, or cancelling `cancel`,
/// stops reading immediately and no further events are emitted. Both surface
/// as [`StreamError::Cancelled`].
///
/// A `None` body yields [`StreamError::StreamUnavailable`] without emitting
/// anything.
pub async fn read_response<S, E, F>(
    body: Option<S>,
    options: &ReadOptions,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<ReadSummary>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<StreamError>,
    F: FnMut(ConversationEvent) -> ControlFlow<()>,
{
    let Some(body) = body else {
        tracing::warn!("Response has no readable body");
        return Err(StreamError::StreamUnavailable);
    };
    futures::pin_mut!(body);

    if cancel.is_cancelled() {
        return Err(StreamError::Cancelled);
    }
    emit(&mut on_event, ConversationEvent::ResponseStarted { at: Utc::now() })?;

    let mut codec = DeltaCodec::with_max_length(options.max_line_length);
    let mut buf = BytesMut::new();
    let mut summary = ReadSummary::default();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(bytes = summary.bytes, deltas = summary.deltas, "Response stream cancelled");
                return Err(StreamError::Cancelled);
            }
            next = tokio::time::timeout(options.read_timeout, body.next()) => next,
        };

        let chunk = match next {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                let err: StreamError = e.into();
                tracing::error!(error = %err, deltas = summary.deltas, "Error reading stream");
                return fail(&mut on_event, err);
            }
            Err(_) => {
                tracing::error!(
                    timeout = ?options.read_timeout,
                    deltas = summary.deltas,
                    "Timed out waiting for stream data"
                );
                return fail(&mut on_event, StreamError::Timeout(options.read_timeout));
            }
        };

        summary.bytes += chunk.len();
        buf.extend_from_slice(&chunk);
        while let Some(frame) = codec.decode(&mut buf)? {
            dispatch(frame, &mut summary, &mut on_event)?;
        }
    }

    while let Some(frame) = codec.decode_eof(&mut buf)? {
        dispatch(frame, &mut summary, &mut on_event)?;
    }

    emit(&mut on_event, ConversationEvent::ResponseEnded)?;
    tracing::debug!(
        bytes = summary.bytes,
        deltas = summary.deltas,
        malformed = summary.malformed,
        ignored = summary.ignored,
        "Response stream finished"
    );
    Ok(summary)
}

/// Consume a response body straight into `conversation`.
pub async fn read_into<S, E>(
    body: Option<S>,
    conversation: &mut Conversation,
    options: &ReadOptions,
    cancel: &CancellationToken,
) -> Result<ReadSummary>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<StreamError>,
{
    read_response(body, options, cancel, |event| {
        conversation.apply(&event);
        ControlFlow::Continue(())
    })
    .await
}

fn emit<F>(on_event: &mut F, event: ConversationEvent) -> Result<()>
where
    F: FnMut(ConversationEvent) -> ControlFlow<()>,
{
    match on_event(event) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => Err(StreamError::Cancelled),
    }
}

/// Close the open message and return `err`. Partial content is kept.
fn fail<F, T>(on_event: &mut F, err: StreamError) -> Result<T>
where
    F: FnMut(ConversationEvent) -> ControlFlow<()>,
{
    emit(on_event, ConversationEvent::ResponseEnded)?;
    Err(err)
}

fn dispatch<F>(frame: Frame, summary: &mut ReadSummary, on_event: &mut F) -> Result<()>
where
    F: FnMut(ConversationEvent) -> ControlFlow<()>,
{
    match frame {
        Frame::Delta(text) => {
            summary.deltas += 1;
            tracing::trace!(delta_length = text.len(), "Message delta");
            emit(on_event, ConversationEvent::Delta { text })
        }
        Frame::Malformed { payload, error } => {
            summary.malformed += 1;
            tracing::warn!(payload = %payload, error = %error, "Failed to parse delta payload");
            Ok(())
        }
        Frame::Ignored => {
            summary.ignored += 1;
            Ok(())
        }
    }
}
