//! MIDI learning sessions.
//!
//! At most one session exists at a time, carrying the label of the
//! action being bound. While a session is active the dispatcher hands
//! every decoded message here first; the first message that derives a
//! mapping key ends the session and reports the captured key through a
//! LearnState event. Sessions that capture nothing end after a fixed
//! timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult};
use crate::events::{EventEmitter, MidiEvent};
use crate::midi::mapping::derive_mapping_key;
use crate::midi::message::ControlMessage;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::utils::now_millis;

/// How long a session waits for a mappable message before giving up.
const LEARN_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle phase reported in LearnState events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LearnPhase {
    /// No session.
    Idle,
    /// Session active, waiting for input.
    Learning,
    /// A key was captured; session over.
    Completed,
    /// Explicitly cancelled; session over.
    Cancelled,
    /// Nothing captured within the timeout; session over.
    TimedOut,
}

/// What [`LearningCoordinator::observe`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    /// The message ended the session; its mapping key is attached.
    Captured(String),
    /// A session is active but the message cannot derive a key.
    Ignored,
    /// No session is active.
    Inactive,
}

struct LearnSession {
    id: u64,
    label: String,
    cancel: CancellationToken,
}

/// Owns the single learning session and its timeout timer.
///
/// `observe` is called by the dispatcher for every decoded message, so an
/// active session preempts normal dispatch. Completion is reported via
/// events only; binding creation stays with the caller.
pub struct LearningCoordinator {
    session: Mutex<Option<LearnSession>>,
    next_id: AtomicU64,
    emitter: Arc<dyn EventEmitter>,
    spawner: TokioSpawner,
}

impl LearningCoordinator {
    /// Creates an idle coordinator.
    pub fn new(emitter: Arc<dyn EventEmitter>, spawner: TokioSpawner) -> Self {
        Self {
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
            emitter,
            spawner,
        }
    }

    /// Starts a session for the action named by `label`; fails if one is
    /// already active.
    ///
    /// Spawns the timeout timer and emits a Learning LearnState event
    /// whose status names the action, for the host UI to show.
    pub fn start(self: &Arc<Self>, label: &str) -> BridgeResult<()> {
        let id = {
            let mut guard = self.session.lock();
            if guard.is_some() {
                return Err(BridgeError::Learn(
                    "a learning session is already active".to_string(),
                ));
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            let timer_cancel = cancel.clone();
            *guard = Some(LearnSession {
                id,
                label: label.to_string(),
                cancel,
            });

            let coordinator = Arc::clone(self);
            self.spawner.spawn(async move {
                tokio::select! {
                    _ = timer_cancel.cancelled() => {}
                    _ = tokio::time::sleep(LEARN_TIMEOUT) => coordinator.expire(id),
                }
            });
            id
        };

        log::info!("[Learn] Session {} started for '{}'", id, label);
        self.emit_phase(
            LearnPhase::Learning,
            &format!("Move a control to bind {}", label),
            None,
        );
        Ok(())
    }

    /// Feeds a decoded message to the active session, if any.
    ///
    /// Messages without a derivable key keep the session open.
    pub fn observe(&self, msg: &ControlMessage) -> LearnOutcome {
        let (session, key) = {
            let mut guard = self.session.lock();
            if guard.is_none() {
                return LearnOutcome::Inactive;
            }
            let Some(key) = derive_mapping_key(msg) else {
                log::debug!("[Learn] Ignoring {:?} message (no mapping key)", msg.kind);
                return LearnOutcome::Ignored;
            };
            (guard.take().unwrap(), key)
        };
        session.cancel.cancel();

        log::info!(
            "[Learn] Session {} captured key {} for '{}'",
            session.id,
            key,
            session.label
        );
        self.emit_phase(
            LearnPhase::Completed,
            &format!("Captured control {}", key),
            Some(key.clone()),
        );
        LearnOutcome::Captured(key)
    }

    /// Cancels the active session. Returns false if none was active.
    pub fn cancel(&self) -> bool {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return false;
        };
        session.cancel.cancel();

        log::info!("[Learn] Session {} cancelled", session.id);
        self.emit_phase(LearnPhase::Cancelled, "Learning cancelled", None);
        true
    }

    /// True while a session is waiting for input.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Ends session `id` as timed out, unless it already ended or was
    /// replaced by a newer session.
    fn expire(&self, id: u64) {
        let session = {
            let mut guard = self.session.lock();
            match guard.as_ref() {
                Some(session) if session.id == id => guard.take().unwrap(),
                _ => return,
            }
        };

        log::warn!(
            "[Learn] Session {} ('{}') timed out with no input",
            id,
            session.label
        );
        self.emit_phase(LearnPhase::TimedOut, "No control received in time", None);
    }

    fn emit_phase(&self, phase: LearnPhase, status: &str, key: Option<String>) {
        self.emitter.emit_midi(MidiEvent::LearnState {
            phase,
            status: status.to_string(),
            key,
            timestamp: now_millis(),
        });
    }
}
