//! Chat sessions and session storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::conversation::{Conversation, ConversationEvent, Message};

/// Default session timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Rejections from [`Session::submit`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// A response is still streaming into this session.
    #[error("a response is already in flight for this session")]
    Busy,
    /// The message was empty after trimming.
    #[error("message is empty")]
    Empty,
}

/// A submitted user message waiting for its response stream to be opened.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    /// `Authorization` value to send upstream.
    pub authorization: String,
    /// Cancelled when the turn is aborted or the session is removed.
    pub cancel: CancellationToken,
    /// When the user message was accepted.
    pub submitted_at: DateTime<Utc>,
}

/// A single chat session.
///
/// Cheap to clone; all clones share the same conversation.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    conversation: RwLock<Conversation>,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
    /// Set from submit until the response stream finishes.
    busy: AtomicBool,
    pending: Mutex<Option<PendingTurn>>,
    cancel: Mutex<CancellationToken>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                conversation: RwLock::new(Conversation::new()),
                created_at: now,
                last_activity: RwLock::new(now),
                busy: AtomicBool::new(false),
                pending: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Append a user message and reserve the session for its response.
    ///
    /// Fails with [`SubmitError::Busy`] while a previous response is in
    /// flight, mirroring the disabled submit control in the page.
    pub fn submit(
        &self,
        content: impl Into<String>,
        authorization: impl Into<String>,
    ) -> Result<(), SubmitError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SubmitError::Empty);
        }
        if self.inner.busy.swap(true, Ordering::AcqRel) {
            return Err(SubmitError::Busy);
        }

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();
        *self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(PendingTurn {
            authorization: authorization.into(),
            cancel,
            submitted_at: Utc::now(),
        });
        self.apply(&ConversationEvent::user_submitted(content, Utc::now()));
        Ok(())
    }

    /// Take the turn reserved by the last [`Session::submit`], if not yet taken.
    pub fn take_pending(&self) -> Option<PendingTurn> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Fold a stream event into the conversation.
    pub fn apply(&self, event: &ConversationEvent) {
        self.inner
            .conversation
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event);
        self.touch();
    }

    /// Release the session after its response stream ended, however it ended.
    pub fn finish(&self) {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.busy.store(false, Ordering::Release);
        self.touch();
    }

    /// Cancel the in-flight response, if any. Returns whether one was running.
    ///
    /// A turn whose stream was never opened has no reader to release the
    /// session, so it is released here.
    pub fn abort(&self) -> bool {
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        if self.take_pending().is_some() {
            self.finish();
            return true;
        }
        self.is_busy()
    }

    /// Drop a pending turn whose stream was not opened within `max_wait`.
    ///
    /// Returns whether the session was released.
    pub fn release_unopened(&self, max_wait: Duration) -> bool {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stale = pending.as_ref().is_some_and(|turn| {
            (Utc::now() - turn.submitted_at)
                .to_std()
                .is_ok_and(|waited| waited >= max_wait)
        });
        if !stale {
            return false;
        }
        if let Some(turn) = pending.take() {
            turn.cancel.cancel();
        }
        drop(pending);
        self.finish();
        true
    }

    /// Whether a response is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Snapshot of the conversation.
    #[must_use]
    pub fn conversation(&self) -> Conversation {
        self.inner
            .conversation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get all messages in the conversation.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.conversation().messages().to_vec()
    }

    /// Get the number of messages in the conversation.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner
            .conversation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Session creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    fn touch(&self) {
        *self
            .inner
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Check if the session has been idle for at least `timeout`.
    ///
    /// A session with a response in flight never expires.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        if self.is_busy() {
            return false;
        }
        let last = *self
            .inner
            .last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        // Negative duration means clock skew; treat as fresh.
        (Utc::now() - last)
            .to_std()
            .is_ok_and(|idle| idle >= timeout)
    }
}

/// Thread-safe store for sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

#[derive(Debug)]
struct SessionStoreInner {
    sessions: RwLock<HashMap<String, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create a new session store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create a new session and return it.
    #[must_use]
    pub fn create(&self) -> Session {
        self.create_with_id(Uuid::new_v4().to_string())
    }

    /// Create a new session with a specific ID.
    #[must_use]
    pub fn create_with_id(&self, id: impl Into<String>) -> Session {
        let id = id.into();
        let session = Session::new(id.clone());
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, session.clone());
        session
    }

    /// Get a session by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Get a session by ID, creating it if it doesn't exist.
    #[must_use]
    pub fn get_or_create(&self, id: &str) -> Session {
        let mut guard = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string()))
            .clone()
    }

    /// Remove a session by ID, cancelling any response still streaming into it.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(session) = &removed {
            session.abort();
        }
        removed
    }

    /// Get the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions that have been inactive longer than the timeout.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|_, session| !session.is_expired_with_timeout(timeout));
        before - guard.len()
    }

    /// Release sessions holding a turn nobody opened a stream for.
    ///
    /// Returns the number of sessions released.
    pub fn release_unopened_turns(&self, max_wait: Duration) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|session| session.release_unopened(max_wait))
            .count()
    }

    /// List all sessions, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(Session::created_at);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    #[test]
    fn test_session_lifecycle() {
        let session = Session::new("test-123".to_string());

        assert_eq!(session.id(), "test-123");
        assert_eq!(session.message_count(), 0);

        session.submit("Hello", "").unwrap();
        assert!(session.is_busy());

        session.apply(&ConversationEvent::ResponseStarted { at: Utc::now() });
        session.apply(&ConversationEvent::Delta { text: "Hi there!".into() });
        session.apply(&ConversationEvent::ResponseEnded);
        session.finish();

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there!");
        assert!(!session.is_busy());
    }

    #[test]
    fn test_submit_while_busy_is_rejected() {
        let session = Session::new("busy".to_string());
        session.submit("one", "").unwrap();

        assert_eq!(session.submit("two", ""), Err(SubmitError::Busy));
        assert_eq!(session.message_count(), 1);

        session.finish();
        assert!(session.submit("two", "").is_ok());
    }

    #[test]
    fn test_empty_submit_is_rejected() {
        let session = Session::new("empty".to_string());
        assert_eq!(session.submit("   ", ""), Err(SubmitError::Empty));
        assert!(!session.is_busy());
    }

    #[test]
    fn test_pending_turn_taken_once() {
        let session = Session::new("pending".to_string());
        session.submit("hi", "Bearer t").unwrap();

        let turn = session.take_pending().unwrap();
        assert_eq!(turn.authorization, "Bearer t");
        assert!(session.take_pending().is_none());
    }

    #[test]
    fn test_abort_cancels_pending_token() {
        let session = Session::new("abort".to_string());
        session.submit("hi", "").unwrap();
        let turn = session.take_pending().unwrap();

        assert!(session.abort());
        assert!(turn.cancel.is_cancelled());
    }

    #[test]
    fn test_abort_before_stream_opened_releases_session() {
        let session = Session::new("unopened".to_string());
        session.submit("one", "").unwrap();

        assert!(session.abort());
        assert!(!session.is_busy());
        assert!(session.take_pending().is_none());
        assert!(session.submit("two", "").is_ok());
    }

    #[test]
    fn test_abort_when_idle_reports_nothing_running() {
        let session = Session::new("idle".to_string());
        assert!(!session.abort());
    }

    #[test]
    fn test_unopened_turn_released_after_wait() {
        let session = Session::new("stale".to_string());
        session.submit("hi", "").unwrap();

        assert!(!session.release_unopened(Duration::from_secs(3600)));
        assert!(session.is_busy());

        assert!(session.release_unopened(Duration::ZERO));
        assert!(!session.is_busy());
        assert!(session.take_pending().is_none());
        assert!(session.is_expired_with_timeout(Duration::ZERO));
    }

    #[test]
    fn test_opened_turn_is_not_released() {
        let session = Session::new("opened".to_string());
        session.submit("hi", "").unwrap();
        let _turn = session.take_pending().unwrap();

        assert!(!session.release_unopened(Duration::ZERO));
        assert!(session.is_busy());
    }

    #[test]
    fn test_store_releases_unopened_turns() {
        let store = SessionStore::new();
        let stuck = store.create();
        let streaming = store.create();
        stuck.submit("a", "").unwrap();
        streaming.submit("b", "").unwrap();
        let _turn = streaming.take_pending().unwrap();

        assert_eq!(store.release_unopened_turns(Duration::ZERO), 1);
        assert!(!stuck.is_busy());
        assert!(streaming.is_busy());
        assert_eq!(store.cleanup_expired_with_timeout(Duration::ZERO), 1);
        assert!(store.get(stuck.id()).is_none());
        assert!(store.get(streaming.id()).is_some());
    }

    #[test]
    fn test_session_store() {
        let store = SessionStore::new();

        assert!(store.is_empty());

        let session = store.create();
        assert_eq!(store.len(), 1);

        let retrieved = store.get(session.id()).unwrap();
        assert_eq!(retrieved.id(), session.id());

        store.remove(session.id());
        assert!(store.is_empty());
    }

    #[test]
    fn test_cleanup_skips_busy_sessions() {
        let store = SessionStore::new();
        let idle = store.create();
        let busy = store.create();
        busy.submit("hi", "").unwrap();

        let removed = store.cleanup_expired_with_timeout(Duration::ZERO);

        assert_eq!(removed, 1);
        assert!(store.get(idle.id()).is_none());
        assert!(store.get(busy.id()).is_some());
    }
}
