//! Broadcast fan-out for engine events.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use troupe_core::EngineEvent;

/// Default broadcast channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fan-out hub for [`EngineEvent`]s.
///
/// Wraps a tokio broadcast channel. Emitting never blocks the loop: with no
/// subscribers the event is counted and dropped, and a slow subscriber lags
/// rather than applying backpressure.
pub struct EventEmitter {
    tx: broadcast::Sender<EngineEvent>,
    emitted: AtomicU64,
}

impl EventEmitter {
    /// Create an emitter with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            emitted: AtomicU64::new(0),
        }
    }

    /// Subscribe to all events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers, returning how many received
    /// it.
    pub fn emit(&self, event: EngineEvent) -> usize {
        let _ = self.emitted.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Total events emitted since construction, delivered or not.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
