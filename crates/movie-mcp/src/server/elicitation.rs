//! Suspended tool calls awaiting structured user input.
//!
//! Each session is a small state machine:
//!
//! ```text
//! Pending ──submit (valid)──▶ Fulfilled
//!    │────cancel / decline──▶ Cancelled
//!    └────deadline──────────▶ Expired
//! ```
//!
//! Transitions happen under one lock and take the session's resume sender, so the
//! handler is resumed exactly once whichever of submit, cancel or the timer wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use jsonschema::Validator;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::ElicitationError;
use crate::schema;

/// How long terminal sessions are kept so late messages get a precise rejection.
const TERMINAL_RETENTION: Duration = Duration::from_secs(600);

/// Interval of the background purge of terminal sessions.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

type Outcome = Result<Value, ElicitationError>;

/// Lifecycle state of an elicitation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a response.
    Pending,
    /// A valid response was delivered.
    Fulfilled,
    /// Cancelled by the client, the server, or too many invalid responses.
    Cancelled,
    /// No response before the deadline.
    Expired,
}

impl SessionState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        })
    }
}

/// Snapshot of a session.
#[derive(Debug, Clone)]
pub struct ElicitationSession {
    /// Session id, also used as the JSON-RPC id of the outbound request.
    pub id: String,
    /// Prompt shown to the user.
    pub prompt: String,
    /// Schema the response must satisfy.
    pub schema: Value,
    /// Response deadline.
    pub deadline: Instant,
    /// Current state.
    pub state: SessionState,
}

struct Entry {
    session: ElicitationSession,
    validator: Validator,
    resume: Option<oneshot::Sender<Outcome>>,
    timer: Option<AbortHandle>,
    invalid_submissions: u32,
    owner: Option<String>,
    settled_at: Option<Instant>,
}

/// Owns every elicitation session.
pub struct ElicitationCoordinator {
    sessions: Mutex<HashMap<String, Entry>>,
    enabled: bool,
    default_timeout: Duration,
    max_invalid_submissions: u32,
}

impl ElicitationCoordinator {
    /// Create a coordinator from configuration.
    #[must_use]
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            enabled: config.enable_elicitation,
            default_timeout: config.elicitation_timeout,
            max_invalid_submissions: config.max_invalid_submissions,
        })
    }

    /// Whether tools may elicit.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register a Pending session and arm its timer.
    ///
    /// `owner` groups sessions opened by one tool call so they can be cancelled together.
    pub fn create(
        self: &Arc<Self>,
        schema: Value,
        prompt: impl Into<String>,
        timeout: Option<Duration>,
        owner: Option<&str>,
    ) -> Result<PendingElicitation, ElicitationError> {
        if !self.enabled {
            return Err(ElicitationError::Disabled);
        }

        let validator = schema::compile(&schema).map_err(ElicitationError::InvalidSchema)?;
        let id = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);
        let (tx, rx) = oneshot::channel();

        let timer = {
            let coordinator = Arc::downgrade(self);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(coordinator) = coordinator.upgrade() {
                    coordinator.expire(&id);
                }
            })
            .abort_handle()
        };

        let entry = Entry {
            session: ElicitationSession {
                id: id.clone(),
                prompt: prompt.into(),
                schema,
                deadline,
                state: SessionState::Pending,
            },
            validator,
            resume: Some(tx),
            timer: Some(timer),
            invalid_submissions: 0,
            owner: owner.map(str::to_string),
            settled_at: None,
        };

        self.lock().insert(id.clone(), entry);
        tracing::debug!(session_id = %id, "Elicitation session created");

        Ok(PendingElicitation {
            id,
            receiver: Some(rx),
            coordinator: Arc::downgrade(self),
            settled: false,
        })
    }

    /// Deliver a response.
    ///
    /// A response that fails the schema leaves the session Pending; the caller may
    /// resubmit until the deadline. After too many failures the session is cancelled.
    pub fn submit(&self, id: &str, response: Value) -> Result<(), ElicitationError> {
        let mut sessions = self.lock();
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ElicitationError::UnknownSession(id.to_string()))?;
        ensure_open(entry, id)?;

        let errors = schema::violations(&entry.validator, &response);
        if errors.is_empty() {
            settle(entry, SessionState::Fulfilled, Ok(response), true);
            tracing::debug!(session_id = %id, "Elicitation fulfilled");
            return Ok(());
        }

        entry.invalid_submissions += 1;
        if entry.invalid_submissions >= self.max_invalid_submissions {
            let err = ElicitationError::TooManyInvalidSubmissions(entry.invalid_submissions);
            settle(entry, SessionState::Cancelled, Err(err.clone()), true);
            tracing::warn!(
                session_id = %id,
                "Elicitation cancelled after repeated invalid responses"
            );
            return Err(err);
        }

        tracing::debug!(
            session_id = %id,
            attempt = entry.invalid_submissions,
            "Elicitation response failed schema validation"
        );
        Err(ElicitationError::SchemaMismatch(errors.join("; ")))
    }

    /// Cancel a Pending session.
    pub fn cancel(&self, id: &str) -> Result<(), ElicitationError> {
        self.resolve(id, SessionState::Cancelled, ElicitationError::Cancelled, true)
    }

    /// The user declined to answer.
    pub fn decline(&self, id: &str) -> Result<(), ElicitationError> {
        self.resolve(id, SessionState::Cancelled, ElicitationError::Declined, true)
    }

    /// Timer path. The timer task is the caller, so it is not aborted.
    fn expire(&self, id: &str) {
        if self.resolve(id, SessionState::Expired, ElicitationError::Expired, false).is_ok() {
            tracing::info!(session_id = %id, "Elicitation expired");
        }
    }

    fn resolve(
        &self,
        id: &str,
        state: SessionState,
        error: ElicitationError,
        abort_timer: bool,
    ) -> Result<(), ElicitationError> {
        let mut sessions = self.lock();
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ElicitationError::UnknownSession(id.to_string()))?;

        if state == SessionState::Expired {
            if entry.session.state.is_terminal() {
                return Err(already_resolved(id, entry.session.state));
            }
        } else {
            ensure_open(entry, id)?;
        }

        settle(entry, state, Err(error), abort_timer);
        Ok(())
    }

    /// Cancel every Pending session opened by `owner`. Returns how many were cancelled.
    pub fn cancel_owned_by(&self, owner: &str) -> usize {
        let mut sessions = self.lock();
        let mut cancelled = 0;
        for entry in sessions.values_mut() {
            if entry.owner.as_deref() == Some(owner) && !entry.session.state.is_terminal() {
                settle(entry, SessionState::Cancelled, Err(ElicitationError::Cancelled), true);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel every Pending session, e.g. when the client disconnects.
    pub fn cancel_all(&self) -> usize {
        let mut sessions = self.lock();
        let mut cancelled = 0;
        for entry in sessions.values_mut().filter(|e| !e.session.state.is_terminal()) {
            settle(entry, SessionState::Cancelled, Err(ElicitationError::Cancelled), true);
            cancelled += 1;
        }
        cancelled
    }

    /// Snapshot of a session.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<ElicitationSession> {
        self.lock().get(id).map(|e| e.session.clone())
    }

    /// Number of Pending sessions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().values().filter(|e| !e.session.state.is_terminal()).count()
    }

    /// Drop terminal sessions settled more than `retention` ago.
    pub fn purge_terminal(&self, retention: Duration) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, e| e.settled_at.is_none_or(|at| at.elapsed() < retention));
        before - sessions.len()
    }

    /// Start background purge of terminal sessions. Stops when the coordinator is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let coordinator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                let purged = coordinator.purge_terminal(TERMINAL_RETENTION);
                if purged > 0 {
                    tracing::debug!(count = purged, "Elicitation cleanup completed");
                }
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave an entry half-updated.
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for ElicitationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElicitationCoordinator")
            .field("enabled", &self.enabled)
            .field("default_timeout", &self.default_timeout)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Fail unless the entry is Pending and inside its deadline.
///
/// A message racing the expiry timer past the deadline expires the session here,
/// so it is rejected the same way whether or not the timer has run.
fn ensure_open(entry: &mut Entry, id: &str) -> Result<(), ElicitationError> {
    if !entry.session.state.is_terminal() && Instant::now() >= entry.session.deadline {
        settle(entry, SessionState::Expired, Err(ElicitationError::Expired), true);
        tracing::info!(session_id = %id, "Elicitation expired");
    }
    if entry.session.state.is_terminal() {
        return Err(already_resolved(id, entry.session.state));
    }
    Ok(())
}

fn already_resolved(id: &str, state: SessionState) -> ElicitationError {
    ElicitationError::AlreadyResolved {
        id: id.to_string(),
        state,
    }
}

/// Move a Pending entry to `state` and resume its handler. Caller holds the lock.
fn settle(entry: &mut Entry, state: SessionState, outcome: Outcome, abort_timer: bool) {
    entry.session.state = state;
    entry.settled_at = Some(Instant::now());

    if let Some(timer) = entry.timer.take() {
        if abort_timer {
            timer.abort();
        }
    }

    if let Some(resume) = entry.resume.take() {
        // The handler may already be gone; nothing is waiting then.
        let _ = resume.send(outcome);
    }
}

/// Handle held by the suspended tool handler.
///
/// Dropping it before the session settles cancels the session.
#[derive(Debug)]
pub struct PendingElicitation {
    id: String,
    receiver: Option<oneshot::Receiver<Outcome>>,
    coordinator: Weak<ElicitationCoordinator>,
    settled: bool,
}

impl PendingElicitation {
    /// Session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Suspend until the session is fulfilled, cancelled or expired.
    pub async fn wait(mut self) -> Result<Value, ElicitationError> {
        let Some(receiver) = self.receiver.take() else {
            return Err(ElicitationError::Cancelled);
        };
        let outcome = receiver.await.unwrap_or(Err(ElicitationError::Cancelled));
        self.settled = true;
        outcome
    }
}

impl Drop for PendingElicitation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(coordinator) = self.coordinator.upgrade() {
            if coordinator.cancel(&self.id).is_ok() {
                tracing::debug!(session_id = %self.id, "Elicitation cancelled by dropped handler");
            }
        }
    }
}
