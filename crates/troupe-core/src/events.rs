//! Engine lifecycle events.
//!
//! Every observable step of a run is announced as an [`EngineEvent`]:
//! transcript appends, the image-interpretation pre-pass, moderator
//! activity, per-speaker streaming, round boundaries, and the single
//! loop-completed notification that ends every run. Events are broadcast
//! over WebSocket; clients rely on the exact type strings and field names.
//!
//! Narrator turns reuse the character turn events with no `characterId` and
//! the fixed narrator name.

use serde::{Deserialize, Serialize};

use crate::ids::{CharacterId, SessionId};
use crate::messages::Message;

/// Common fields carried by every event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Session this event belongs to.
    pub session_id: SessionId,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a new base event with the current UTC timestamp.
    #[must_use]
    pub fn now(session_id: SessionId) -> Self {
        Self {
            session_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Lifecycle event with session context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    // -- Transcript --

    /// The user's message was appended to the transcript.
    #[serde(rename = "user_message_added")]
    UserMessageAdded {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// The appended message.
        message: Message,
    },

    /// Image interpretation pre-pass started.
    #[serde(rename = "interpretation_started")]
    InterpretationStarted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Number of images awaiting description.
        #[serde(rename = "imageCount")]
        image_count: u32,
    },

    /// Image interpretation finished and the user message was backfilled.
    #[serde(rename = "interpretation_completed")]
    InterpretationCompleted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// The user message after backfill.
        message: Message,
    },

    // -- Rounds --

    /// The moderator is choosing this round's respondents.
    #[serde(rename = "moderator_thinking")]
    ModeratorThinking {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Round number (1-based).
        round: u32,
    },

    /// A speaker (character or narrator) started its turn.
    #[serde(rename = "character_turn_started")]
    CharacterTurnStarted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Round number (1-based).
        round: u32,
        /// Roster id; absent for narrator turns.
        #[serde(rename = "characterId", skip_serializing_if = "Option::is_none")]
        character_id: Option<CharacterId>,
        /// Speaker display name.
        #[serde(rename = "characterName")]
        character_name: String,
        /// Speaker color.
        #[serde(rename = "characterColor", skip_serializing_if = "Option::is_none")]
        character_color: Option<String>,
    },

    /// Incremental text from a streaming turn.
    #[serde(rename = "character_chunk")]
    CharacterChunk {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Round number (1-based).
        round: u32,
        /// Roster id; absent for narrator turns.
        #[serde(rename = "characterId", skip_serializing_if = "Option::is_none")]
        character_id: Option<CharacterId>,
        /// Speaker display name.
        #[serde(rename = "characterName")]
        character_name: String,
        /// Text fragment.
        delta: String,
        /// Everything streamed so far, fragment included.
        content: String,
    },

    /// A speaker's turn finished. Content is empty when the turn was
    /// cancelled or the speaker declined.
    #[serde(rename = "character_turn_completed")]
    CharacterTurnCompleted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Round number (1-based).
        round: u32,
        /// Roster id; absent for narrator turns.
        #[serde(rename = "characterId", skip_serializing_if = "Option::is_none")]
        character_id: Option<CharacterId>,
        /// Speaker display name.
        #[serde(rename = "characterName")]
        character_name: String,
        /// Full turn text.
        content: String,
        /// Turn duration in milliseconds.
        duration: u64,
    },

    /// A speaker's turn failed; the round continues without it.
    #[serde(rename = "character_turn_failed")]
    CharacterTurnFailed {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Round number (1-based).
        round: u32,
        /// Roster id; absent for narrator turns.
        #[serde(rename = "characterId", skip_serializing_if = "Option::is_none")]
        character_id: Option<CharacterId>,
        /// Speaker display name.
        #[serde(rename = "characterName")]
        character_name: String,
        /// Human-readable error message.
        error: String,
    },

    /// A round committed its results.
    #[serde(rename = "round_completed")]
    RoundCompleted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Round number (1-based).
        round: u32,
        /// Moderator's reason, or the engine's termination reason.
        reason: String,
    },

    /// The run finished. Emitted exactly once per run, on every exit path.
    #[serde(rename = "loop_completed")]
    LoopCompleted {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Rounds fully committed before exit.
        rounds: u32,
    },
}

impl EngineEvent {
    /// The shared base fields.
    #[must_use]
    pub fn base(&self) -> &BaseEvent {
        match self {
            EngineEvent::UserMessageAdded { base, .. }
            | EngineEvent::InterpretationStarted { base, .. }
            | EngineEvent::InterpretationCompleted { base, .. }
            | EngineEvent::ModeratorThinking { base, .. }
            | EngineEvent::CharacterTurnStarted { base, .. }
            | EngineEvent::CharacterChunk { base, .. }
            | EngineEvent::CharacterTurnCompleted { base, .. }
            | EngineEvent::CharacterTurnFailed { base, .. }
            | EngineEvent::RoundCompleted { base, .. }
            | EngineEvent::LoopCompleted { base, .. } => base,
        }
    }

    /// Session this event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.base().session_id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
