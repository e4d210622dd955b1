//! The engine: one per process, many sessions, at most one run each.
//!
//! [`Engine::post_user_message`] is the entry point for a user turn. It
//! appends the message, tears down any run still going for that session,
//! and spawns a fresh run task: image interpretation first, then the round
//! loop. The returned [`RunHandle`] lets callers cancel the run or await
//! its natural end; dropping it detaches, the run keeps going.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use troupe_core::constants::DEFAULT_MAX_ROUNDS;
use troupe_core::{BaseEvent, EngineEvent, Message, RunId, SessionId};
use troupe_llm::Gateway;

use crate::emitter::EventEmitter;
use crate::errors::EngineError;
use crate::store::{SessionStore, StoreError};
use crate::{interpreter, rounds};

// ─────────────────────────────────────────────────────────────────────────────
// Run handle
// ─────────────────────────────────────────────────────────────────────────────

/// A live (or finished) run for one session.
///
/// Clones share the same run: cancelling one cancels it for all, and the
/// first `wait` consumes the join handle, so later waits return at once.
#[derive(Clone, Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RunHandle {
    /// Identifier of this run, distinct from the session id.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Requests cancellation. Every in-flight model call for this run
    /// observes the same token; the run still winds down through its normal
    /// exit path and emits its final events.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the run task has ended, by any path.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.lock().as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the run task to end. Does not cancel.
    pub async fn wait(&self) {
        let taken = self.task.lock().take();
        if let Some(handle) = taken {
            if let Err(err) = handle.await {
                warn!(run_id = %self.run_id, error = %err, "run task aborted");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the gateway, store, and event bus, and tracks the active run per
/// session.
pub struct Engine {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn SessionStore>,
    emitter: Arc<EventEmitter>,
    runs: DashMap<SessionId, RunHandle>,
    max_rounds: u32,
}

impl Engine {
    /// An engine over the given model gateway and session store, with the
    /// default round cap.
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            gateway,
            store,
            emitter: Arc::new(EventEmitter::default()),
            runs: DashMap::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Overrides the per-run round cap.
    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// The model gateway shared with one-shot calls (roster, background,
    /// title generation).
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// The session store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// The event bus all runs publish to.
    #[must_use]
    pub fn emitter(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    /// Subscribes to the event bus.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.emitter.subscribe()
    }

    /// Appends a user turn and starts a run for it.
    ///
    /// A session runs one conversation at a time: any previous run is
    /// cancelled and fully awaited before this one's rounds begin. Fails
    /// only when the session is unknown or the append fails.
    #[instrument(skip_all, fields(session_id = %session_id, images = images.len()))]
    pub async fn post_user_message(
        &self,
        session_id: &SessionId,
        text: impl Into<String>,
        images: Vec<String>,
    ) -> Result<RunHandle, EngineError> {
        let text = text.into();
        if self.store.get(session_id).await?.is_none() {
            return Err(EngineError::Store(StoreError::NotFound(session_id.clone())));
        }

        if let Some((_, previous)) = self.runs.remove(session_id) {
            info!(run_id = %previous.run_id(), "displacing previous run");
            previous.cancel();
            previous.wait().await;
        }

        let message = if images.is_empty() {
            Message::user(text)
        } else {
            Message::user_with_images(text, images)
        };
        self.store
            .append_messages(session_id, vec![message.clone()])
            .await?;
        let _ = self.emitter.emit(EngineEvent::UserMessageAdded {
            base: BaseEvent::now(session_id.clone()),
            message: message.clone(),
        });

        let handle = self.spawn_run(session_id.clone(), message);
        if let Some(displaced) = self.runs.insert(session_id.clone(), handle.clone()) {
            // A racing post slipped in between remove and insert. One run
            // per session wins; the loser is torn down like any other.
            displaced.cancel();
            displaced.wait().await;
        }
        info!(run_id = %handle.run_id(), "run started");
        Ok(handle)
    }

    /// Cancels the session's run, if one is going, and awaits its teardown.
    /// Returns whether a live run was actually interrupted.
    pub async fn cancel_run(&self, session_id: &SessionId) -> bool {
        if let Some((_, handle)) = self.runs.remove(session_id) {
            let was_running = !handle.is_finished();
            info!(run_id = %handle.run_id(), was_running, "run cancelled");
            handle.cancel();
            handle.wait().await;
            was_running
        } else {
            false
        }
    }

    /// Whether the session has a run still going.
    #[must_use]
    pub fn is_busy(&self, session_id: &SessionId) -> bool {
        self.runs
            .get(session_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of sessions with a run still going.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.runs
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    fn spawn_run(&self, session_id: SessionId, message: Message) -> RunHandle {
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let gateway = Arc::clone(&self.gateway);
        let store = Arc::clone(&self.store);
        let emitter = Arc::clone(&self.emitter);
        let max_rounds = self.max_rounds;
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            match interpreter::interpret_images(
                &gateway,
                &store,
                &emitter,
                &session_id,
                &message,
                &task_cancel,
            )
            .await
            {
                Ok(()) => {
                    let _ = rounds::run_rounds(
                        &gateway,
                        &store,
                        &emitter,
                        &session_id,
                        max_rounds,
                        &task_cancel,
                    )
                    .await;
                }
                Err(err) => {
                    // The session went away under us; there is nothing to
                    // run rounds against, but the run still closes cleanly.
                    warn!(session_id = %session_id, error = %err, "interpretation could not be stored");
                    let _ = emitter.emit(EngineEvent::LoopCompleted {
                        base: BaseEvent::now(session_id.clone()),
                        rounds: 0,
                    });
                }
            }
        });
        RunHandle {
            run_id,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
