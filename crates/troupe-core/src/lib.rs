//! # troupe-core
//!
//! Foundation types for the troupe group-conversation engine.
//!
//! This crate provides the shared vocabulary the other troupe crates build
//! on:
//!
//! - **Branded IDs**: `SessionId`, `CharacterId`, `MessageId`, `RunId` as
//!   newtypes for type safety
//! - **Sessions**: `Session` configuration + roster `Character`s + the
//!   append-only transcript
//! - **Messages**: `Message` enum tagged by role (`user`, `character`,
//!   `narrator`) with denormalized speaker identity
//! - **Decisions**: raw `ModeratorDecision` wire shape and the resolved
//!   `Respondent` union
//! - **Events**: `EngineEvent` lifecycle notifications broadcast to clients
//! - **Constants**: context windows, round cap, prompt fragments

#![deny(unsafe_code)]

pub mod constants;
pub mod decision;
pub mod events;
pub mod ids;
pub mod messages;
pub mod session;
pub mod text;

pub use decision::{ModeratorDecision, Respondent};
pub use events::{BaseEvent, EngineEvent};
pub use ids::{CharacterId, MessageId, RunId, SessionId};
pub use messages::Message;
pub use session::{Character, Session, SessionPatch, SpeakersPerRound};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
