//! Session transcript messages.
//!
//! A transcript is an append-only list of [`Message`]s tagged by `role`:
//!
//! - **`user`** — what the human typed, possibly with attached images. Holds
//!   both `content` (what models see, rewritten once image interpretation
//!   lands) and `displayContent` (the original text, what humans see).
//! - **`character`** — one roster character's committed turn, with the
//!   speaker identity denormalized onto the message so transcripts render
//!   without a roster lookup.
//! - **`narrator`** — an off-screen voice-over line under the fixed narrator
//!   pseudo-identity.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::{NARRATOR_COLOR, NARRATOR_NAME};
use crate::ids::{CharacterId, MessageId};
use crate::session::Character;

/// Current time as epoch milliseconds, the transcript timestamp unit.
fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// One transcript entry, tagged by `role` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// A human turn.
    #[serde(rename_all = "camelCase")]
    User {
        /// Message identifier.
        #[serde(default)]
        id: MessageId,
        /// Model-facing text. Rewritten once when image interpretation is
        /// backfilled; plain user text otherwise.
        content: String,
        /// Human-facing text, never rewritten.
        display_content: String,
        /// Attached images (data URLs or fetchable URLs).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
        /// Joined image descriptions. `None` until the interpretation
        /// pre-pass fills it; set at most once.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interpretation: Option<String>,
        /// Epoch milliseconds.
        #[serde(default = "now_ms")]
        timestamp: i64,
    },

    /// A committed character turn.
    #[serde(rename_all = "camelCase")]
    Character {
        /// Message identifier.
        #[serde(default)]
        id: MessageId,
        /// Roster id of the speaker.
        character_id: CharacterId,
        /// Speaker display name at commit time.
        character_name: String,
        /// Speaker color at commit time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        character_color: Option<String>,
        /// Full turn text.
        content: String,
        /// Epoch milliseconds.
        #[serde(default = "now_ms")]
        timestamp: i64,
    },

    /// A narrator voice-over line.
    #[serde(rename_all = "camelCase")]
    Narrator {
        /// Message identifier.
        #[serde(default)]
        id: MessageId,
        /// Narrator display name.
        character_name: String,
        /// Narrator color.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        character_color: Option<String>,
        /// Voice-over text.
        content: String,
        /// Epoch milliseconds.
        #[serde(default = "now_ms")]
        timestamp: i64,
    },
}

impl Message {
    /// Build a plain-text user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        let content = content.into();
        Message::User {
            id: MessageId::new(),
            display_content: content.clone(),
            content,
            images: Vec::new(),
            interpretation: None,
            timestamp: now_ms(),
        }
    }

    /// Build a user message with attached images, interpretation pending.
    #[must_use]
    pub fn user_with_images(content: impl Into<String>, images: Vec<String>) -> Self {
        let content = content.into();
        Message::User {
            id: MessageId::new(),
            display_content: content.clone(),
            content,
            images,
            interpretation: None,
            timestamp: now_ms(),
        }
    }

    /// Build a committed turn for `character`.
    #[must_use]
    pub fn character(character: &Character, content: impl Into<String>) -> Self {
        Message::Character {
            id: MessageId::new(),
            character_id: character.id.clone(),
            character_name: character.name.clone(),
            character_color: character.color.clone(),
            content: content.into(),
            timestamp: now_ms(),
        }
    }

    /// Build a narrator line under the fixed narrator identity.
    #[must_use]
    pub fn narrator(content: impl Into<String>) -> Self {
        Message::Narrator {
            id: MessageId::new(),
            character_name: NARRATOR_NAME.to_owned(),
            character_color: Some(NARRATOR_COLOR.to_owned()),
            content: content.into(),
            timestamp: now_ms(),
        }
    }

    /// Message identifier.
    #[must_use]
    pub fn id(&self) -> &MessageId {
        match self {
            Message::User { id, .. } | Message::Character { id, .. } | Message::Narrator { id, .. } => id,
        }
    }

    /// Model-facing text.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Message::User { content, .. }
            | Message::Character { content, .. }
            | Message::Narrator { content, .. } => content,
        }
    }

    /// Human-facing text: the preserved original for user messages, the
    /// content itself for everything else.
    #[must_use]
    pub fn display_text(&self) -> &str {
        match self {
            Message::User { display_content, .. } => display_content,
            Message::Character { content, .. } | Message::Narrator { content, .. } => content,
        }
    }

    /// Roster id of the speaker, when the message has one.
    #[must_use]
    pub fn character_id(&self) -> Option<&CharacterId> {
        match self {
            Message::Character { character_id, .. } => Some(character_id),
            Message::User { .. } | Message::Narrator { .. } => None,
        }
    }

    /// Display name of the speaker for character and narrator messages.
    #[must_use]
    pub fn speaker_name(&self) -> Option<&str> {
        match self {
            Message::Character { character_name, .. } | Message::Narrator { character_name, .. } => {
                Some(character_name)
            }
            Message::User { .. } => None,
        }
    }

    /// Attached images; empty for non-user messages.
    #[must_use]
    pub fn images(&self) -> &[String] {
        match self {
            Message::User { images, .. } => images,
            Message::Character { .. } | Message::Narrator { .. } => &[],
        }
    }

    /// Epoch-millisecond timestamp.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        match self {
            Message::User { timestamp, .. }
            | Message::Character { timestamp, .. }
            | Message::Narrator { timestamp, .. } => *timestamp,
        }
    }

    /// Whether this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }

    /// Backfill the image interpretation onto a user message, rewriting the
    /// model-facing content in the same step. Returns `false` (and changes
    /// nothing) for non-user messages or when the interpretation was already
    /// filled.
    pub fn fill_interpretation(&mut self, filled: String, rewritten_content: String) -> bool {
        match self {
            Message::User {
                content,
                interpretation,
                ..
            } if interpretation.is_none() => {
                *interpretation = Some(filled);
                *content = rewritten_content;
                true
            }
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn test_character() -> Character {
        Character::new("luna", "Luna", "A dreamy poet").with_color("#6366f1")
    }

    #[test]
    fn user_message_mirrors_content_into_display() {
        let msg = Message::user("hello there");
        assert_eq!(msg.content(), "hello there");
        assert_eq!(msg.display_text(), "hello there");
        assert!(msg.is_user());
        assert!(msg.images().is_empty());
    }

    #[test]
    fn user_serializes_with_role_tag() {
        let msg = Message::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hi");
        assert_eq!(json["displayContent"], "hi");
        // pending interpretation and empty image list stay off the wire
        assert!(json.get("interpretation").is_none());
        assert!(json.get("images").is_none());
    }

    #[test]
    fn character_message_denormalizes_speaker() {
        let msg = Message::character(&test_character(), "I dreamt of rain.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "character");
        assert_eq!(json["characterId"], "luna");
        assert_eq!(json["characterName"], "Luna");
        assert_eq!(json["characterColor"], "#6366f1");
        assert_eq!(msg.character_id().map(AsRef::as_ref), Some("luna"));
        assert_eq!(msg.speaker_name(), Some("Luna"));
    }

    #[test]
    fn narrator_message_uses_fixed_identity() {
        let msg = Message::narrator("夜色渐深。");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "narrator");
        assert_eq!(json["characterName"], NARRATOR_NAME);
        assert_eq!(json["characterColor"], NARRATOR_COLOR);
        assert!(msg.character_id().is_none());
        assert_eq!(msg.speaker_name(), Some(NARRATOR_NAME));
    }

    #[test]
    fn deserializes_legacy_json_without_id() {
        let json = r#"{
            "role": "user",
            "content": "look at this",
            "displayContent": "look at this",
            "images": ["data:image/png;base64,AAAA"],
            "interpretation": null,
            "timestamp": 1700000000000
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_matches!(msg, Message::User { .. });
        assert_eq!(msg.images().len(), 1);
        assert_eq!(msg.timestamp(), 1_700_000_000_000);
        assert!(!msg.id().as_str().is_empty(), "missing id gets generated");
    }

    #[test]
    fn fill_interpretation_rewrites_content_once() {
        let mut msg = Message::user_with_images("what is this", vec!["data:;base64,AA".into()]);
        let filled = msg.fill_interpretation(
            "一只橘猫趴在窗台上".into(),
            "what is this\n[用户发送了1张图片]\n一只橘猫趴在窗台上".into(),
        );
        assert!(filled);
        assert!(msg.content().contains("橘猫"));
        assert_eq!(msg.display_text(), "what is this");

        // second fill is a no-op
        let again = msg.fill_interpretation("x".into(), "y".into());
        assert!(!again);
        assert!(msg.content().contains("橘猫"));
    }

    #[test]
    fn fill_interpretation_ignores_non_user() {
        let mut msg = Message::narrator("风停了。");
        assert!(!msg.fill_interpretation("x".into(), "y".into()));
        assert_eq!(msg.content(), "风停了。");
    }

    #[test]
    fn roundtrip_all_roles() {
        let msgs = vec![
            Message::user("a"),
            Message::character(&test_character(), "b"),
            Message::narrator("c"),
        ];
        let json = serde_json::to_string(&msgs).unwrap();
        let back: Vec<Message> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msgs);
    }
}
