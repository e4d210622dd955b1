//! Moderator-driven conversation loop.
//!
//! A run turns one user message into rounds of group conversation: a
//! moderator picks who answers, an optional narrator sets the scene, and
//! the chosen characters speak concurrently, their lines committed to the
//! session transcript one round at a time. Everything observable happens
//! on a broadcast event bus, so any number of listeners can watch a run
//! live.
//!
//! [`Engine`] is the front door: it owns the model gateway, the session
//! store, and the event bus, and enforces one active run per session.
//! The supporting modules are usable on their own — [`rounds`] drives the
//! loop, [`moderator`], [`speaker`], and [`narrator`] make the individual
//! model calls, [`interpreter`] rewrites image turns, and [`generate`]
//! covers the one-shot design calls (roster, background, title).

#![deny(unsafe_code)]

pub mod emitter;
pub mod engine;
pub mod errors;
pub mod generate;
pub mod interpreter;
pub mod moderator;
pub mod narrator;
pub mod prompts;
pub mod rounds;
pub mod speaker;
pub mod store;

pub use emitter::EventEmitter;
pub use engine::{Engine, RunHandle};
pub use errors::EngineError;
pub use store::{InMemorySessionStore, SessionStore, StoreError};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn reexports_are_usable() {
        let store = InMemorySessionStore::new();
        assert!(store.is_empty());

        let emitter = Arc::new(EventEmitter::default());
        assert_eq!(emitter.emitted(), 0);
    }
}
