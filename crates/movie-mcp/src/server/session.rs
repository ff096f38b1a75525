//! Session mailboxes for server-initiated messages.
//!
//! Tools that elicit need a way to reach the client mid-call. Over HTTP that is the
//! `GET /mcp` SSE stream of the caller's session:
//! - Ring buffer of recent events for Last-Event-ID replay
//! - Broadcast channel for live delivery
//! - Background cleanup of idle sessions

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::HeaderValue;
use axum::response::sse::Event;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use crate::error::ElicitationError;

/// Maximum number of events to keep in history per session.
const HISTORY_SIZE: usize = 100;

/// Idle time after which sessions are cleaned up.
const SESSION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Cleanup interval for stale sessions.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Channel to the client for server-initiated JSON-RPC messages.
#[async_trait::async_trait]
pub trait Outbound: Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: Value) -> Result<(), ElicitationError>;
}

/// A buffered SSE event with ID for replay support.
#[derive(Clone, Debug)]
pub struct BufferedEvent {
    /// Monotonically increasing per session.
    pub id: u64,
    /// Event type (e.g. "message").
    pub event_type: String,
    /// JSON payload.
    pub data: String,
}

impl BufferedEvent {
    /// Convert to an Axum SSE Event.
    #[must_use]
    pub fn to_sse_event(&self) -> Event {
        Event::default()
            .id(self.id.to_string())
            .event(self.event_type.clone())
            .data(self.data.clone())
    }
}

/// A single MCP session with message buffer and broadcast channel.
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    tx: broadcast::Sender<BufferedEvent>,
    history: RwLock<VecDeque<BufferedEvent>>,
    next_event_id: AtomicU64,
    last_active: RwLock<Instant>,
}

impl Session {
    /// Create a new session.
    #[must_use]
    pub fn new(id: String) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            id,
            tx,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_SIZE)),
            next_event_id: AtomicU64::new(1),
            last_active: RwLock::new(Instant::now()),
        }
    }

    /// Push an event to the session (stores in history and broadcasts).
    pub async fn push_event(&self, event_type: impl Into<String>, data: impl Into<String>) -> u64 {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let event = BufferedEvent {
            id,
            event_type: event_type.into(),
            data: data.into(),
        };

        {
            let mut history = self.history.write().await;
            if history.len() >= HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No subscriber yet is fine; the event is replayed on connect.
        let _ = self.tx.send(event);

        self.touch().await;
        id
    }

    /// Get events after a given ID (for replay on reconnection).
    pub async fn get_events_after(&self, last_event_id: u64) -> Vec<BufferedEvent> {
        let history = self.history.read().await;
        history.iter().filter(|e| e.id > last_event_id).cloned().collect()
    }

    /// Subscribe to live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BufferedEvent> {
        self.tx.subscribe()
    }

    /// Check if session is stale.
    pub async fn is_stale(&self) -> bool {
        self.last_active.read().await.elapsed() > SESSION_TIMEOUT
    }

    /// Update last activity timestamp.
    pub async fn touch(&self) {
        *self.last_active.write().await = Instant::now();
    }

    /// Session id as a response header value.
    #[must_use]
    pub fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.id).ok()
    }
}

#[async_trait::async_trait]
impl Outbound for Session {
    async fn send(&self, message: Value) -> Result<(), ElicitationError> {
        self.push_event("message", message.to_string()).await;
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("next_event_id", &self.next_event_id.load(Ordering::SeqCst))
            .finish()
    }
}

/// Registry of live HTTP sessions.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    /// Create a new session manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session.
    pub async fn create_session(&self) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone()));
        self.sessions.write().await.insert(id, Arc::clone(&session));

        tracing::info!(session_id = %session.id, "Created new session");
        session
    }

    /// Get an existing session by ID.
    pub async fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Get or create a session.
    pub async fn get_or_create_session(&self, id: Option<&str>) -> Arc<Session> {
        if let Some(id) = id {
            if let Some(session) = self.get_session(id).await {
                session.touch().await;
                return session;
            }
        }
        self.create_session().await
    }

    /// Remove a session.
    pub async fn remove_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Removed session");
        }
        removed
    }

    /// Clean up stale sessions.
    pub async fn cleanup_stale_sessions(&self) -> usize {
        let mut to_remove = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.is_stale().await {
                    to_remove.push(id.clone());
                }
            }
        }

        if !to_remove.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &to_remove {
                sessions.remove(id);
                tracing::info!(session_id = %id, "Cleaned up stale session");
            }
        }
        to_remove.len()
    }

    /// Session count (for monitoring).
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Start background cleanup task.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let cleaned = self.cleanup_stale_sessions().await;
                if cleaned > 0 {
                    tracing::debug!(count = cleaned, "Session cleanup completed");
                }
            }
        });
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish()
    }
}
