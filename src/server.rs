//! HTTP surface: chat page, submit endpoint, SSE relay and session API.

use std::convert::Infallible;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::conversation::{Conversation, ConversationEvent, Message};
use crate::error::StreamError;
use crate::events::{ChatEvent, sse_event};
use crate::session::{PendingTurn, Session, SubmitError};
use crate::stream::{ReadOptions, read_response};
use crate::ui::chat_page;
use crate::upstream::UpstreamClient;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    info!(
        name: "upstream.config.loaded",
        endpoint = %config.upstream.endpoint,
        read_timeout_secs = config.upstream.read_timeout_secs,
        has_fallback_token = config.upstream.bearer_token.is_some(),
        "Upstream configuration loaded"
    );

    let addr = config.bind_address();
    let state = AppState::from_config(config)?;
    spawn_session_sweeper(&state);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = Duration::from_secs(state.config.server.request_timeout_secs);
    let static_dir = state.config.server.static_dir.clone();

    Router::new()
        // API routes
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", get(api_chat_stream))
        .route("/api/chat/{id}/abort", post(api_abort))
        .route("/api/sessions", get(api_list_sessions).post(api_create_session))
        .route(
            "/api/sessions/{id}",
            get(api_get_session).delete(api_delete_session),
        )
        .route("/api/sessions/{id}/messages", get(api_get_messages))
        // HTML pages
        .route("/", get(index_handler))
        // Static assets
        .nest_service("/static", ServeDir::new(static_dir))
        // Only bounds time-to-headers; SSE bodies keep streaming after this resolves.
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn spawn_session_sweeper(state: &AppState) {
    let sessions = state.sessions.clone();
    let ttl = state.config.sessions.ttl();
    let pending_timeout = state.config.sessions.pending_timeout();
    let mut ticker = tokio::time::interval(state.config.sessions.sweep_interval());
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let released = sessions.release_unopened_turns(pending_timeout);
            if released > 0 {
                tracing::warn!(name: "sessions.unopened_released", released, "Released turns whose stream was never opened");
            }
            let removed = sessions.cleanup_expired_with_timeout(ttl);
            if removed > 0 {
                info!(name: "sessions.expired", removed, "Removed idle sessions");
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameters for the chat page.
#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    session_id: Option<String>,
}

/// GET / - Chat page, optionally re-rendering an existing session.
async fn index_handler(State(state): State<AppState>, Query(query): Query<PageQuery>) -> Html<String> {
    let session = query.session_id.as_deref().and_then(|id| state.sessions.get(id));
    let html = match session {
        Some(session) => chat_page(session.id(), &session.conversation(), session.is_busy()),
        None => chat_page("", &Conversation::new(), false),
    };
    Html(html)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Optional session ID (creates new if not provided).
    #[serde(default)]
    session_id: Option<String>,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
struct ChatResponse {
    /// Session ID for this conversation.
    session_id: String,
    /// URL for the SSE stream.
    stream_url: String,
}

/// Query parameters for stream endpoint.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    session_id: String,
}

/// POST /api/chat - Append a user message and get the stream URL.
async fn api_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    tracing::info!(
        message_length = req.message.len(),
        session_id = ?req.session_id,
        "Received chat request"
    );

    let session = match req.session_id.as_deref() {
        Some(id) if !id.is_empty() => state.sessions.get_or_create(id),
        _ => state.sessions.create(),
    };

    let forwarded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let authorization = state.upstream.authorization(forwarded);

    session.submit(req.message, authorization).map_err(|e| {
        let status = match e {
            SubmitError::Busy => StatusCode::CONFLICT,
            SubmitError::Empty => StatusCode::BAD_REQUEST,
        };
        tracing::warn!(session_id = %session.id(), error = %e, "Chat request rejected");
        (status, e.to_string())
    })?;

    let session_id = session.id().to_string();
    let stream_url = format!("/api/chat/stream?session_id={session_id}");

    tracing::debug!(
        session_id = %session_id,
        message_count = session.message_count(),
        "Added user message to session"
    );

    Ok(Json(ChatResponse {
        session_id,
        stream_url,
    }))
}

/// GET /api/chat/stream - SSE relay of the pending response.
async fn api_chat_stream(State(state): State<AppState>, Query(query): Query<StreamQuery>) -> Response {
    let Some(session) = state.sessions.get(&query.session_id) else {
        tracing::error!(session_id = %query.session_id, "Session not found");
        return single_error_sse("Session not found");
    };
    let Some(turn) = session.take_pending() else {
        tracing::warn!(session_id = %query.session_id, "No pending message to stream");
        return single_error_sse("No pending message for this session");
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        session_id = %query.session_id,
        request_id = %request_id,
        "Starting SSE stream"
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(relay_response(
        Arc::clone(&state.upstream),
        state.read_options.clone(),
        session,
        turn,
        request_id,
        tx,
    ));

    let sse_stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<String, Infallible>(sse_event(&event));
        }
    };
    build_sse_response(Body::from_stream(sse_stream))
}

/// Request the completion, fold its deltas into `session` and forward them to `tx`.
///
/// Stops without touching the session once the SSE client has gone away or
/// the turn was aborted.
async fn relay_response(
    upstream: Arc<UpstreamClient>,
    options: ReadOptions,
    session: Session,
    turn: PendingTurn,
    request_id: String,
    tx: mpsc::UnboundedSender<ChatEvent>,
) {
    let history = session.messages();

    // A dropped SSE receiver cancels the turn even while the upstream is silent.
    let disconnected = tx.closed();
    tokio::pin!(disconnected);

    let body = tokio::select! {
        biased;
        () = turn.cancel.cancelled() => Err(StreamError::Cancelled),
        () = &mut disconnected => Err(StreamError::Cancelled),
        body = upstream.submit(&history, &turn.authorization) => body,
    };

    let mut message_id = 0;
    let outcome = match body {
        Ok(body) => {
            let reading = read_response(body, &options, &turn.cancel, |event| {
                if tx.is_closed() {
                    return ControlFlow::Break(());
                }
                session.apply(&event);
                let outgoing = match event {
                    ConversationEvent::ResponseStarted { .. } => {
                        message_id = session.message_count().saturating_sub(1) as u64;
                        ChatEvent::StreamStart {
                            request_id: request_id.clone(),
                            message_id,
                        }
                    }
                    ConversationEvent::Delta { text } => ChatEvent::MessageDelta { message_id, text },
                    _ => return ControlFlow::Continue(()),
                };
                match tx.send(outgoing) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                }
            });
            tokio::select! {
                biased;
                () = &mut disconnected => Err(StreamError::Cancelled),
                outcome = reading => outcome,
            }
        }
        Err(e) => Err(e),
    };

    match &outcome {
        Ok(summary) => {
            tracing::info!(
                request_id = %request_id,
                session_id = %session.id(),
                deltas = summary.deltas,
                malformed = summary.malformed,
                "Stream complete"
            );
        }
        Err(StreamError::Cancelled) => {
            tracing::info!(request_id = %request_id, session_id = %session.id(), "Stream cancelled");
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                session_id = %session.id(),
                error = %e,
                "Stream failed"
            );
            let _ = tx.send(ChatEvent::from(e));
        }
    }

    let _ = tx.send(ChatEvent::Done);
    session.finish();
}

/// POST /api/chat/:id/abort - Cancel the response streaming into a session.
async fn api_abort(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.sessions.get(&id) {
        Some(session) => {
            if session.abort() {
                tracing::info!(session_id = %id, "Response aborted");
                StatusCode::ACCEPTED
            } else {
                StatusCode::NO_CONTENT
            }
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// Session info for listing.
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    message_count: usize,
    busy: bool,
    created_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            message_count: session.message_count(),
            busy: session.is_busy(),
            created_at: session.created_at(),
        }
    }
}

/// GET /api/sessions - List all sessions.
async fn api_list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list().iter().map(SessionInfo::from).collect())
}

/// POST /api/sessions - Create a new session.
async fn api_create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionInfo>) {
    let session = state.sessions.create();
    (StatusCode::CREATED, Json(SessionInfo::from(&session)))
}

/// GET /api/sessions/:id - Get session details.
async fn api_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    state
        .sessions
        .get(&id)
        .map(|s| Json(SessionInfo::from(&s)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// DELETE /api/sessions/:id - Delete a session.
async fn api_delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// GET /api/sessions/:id/messages - Get session messages.
async fn api_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    state
        .sessions
        .get(&id)
        .map(|s| Json(s.messages()))
        .ok_or(StatusCode::NOT_FOUND)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn single_error_sse(message: &str) -> Response {
    let err = ChatEvent::Error {
        message: message.to_string(),
        code: None,
    };
    let payload = format!("{}{}", sse_event(&err), sse_event(&ChatEvent::Done));
    build_sse_response(Body::from(payload))
}

fn build_sse_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}
