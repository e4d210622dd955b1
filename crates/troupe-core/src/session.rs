//! Sessions and roster characters.
//!
//! A [`Session`] is the unit the engine orchestrates: a purpose, a roster of
//! [`Character`]s, a handful of presentation flags, and the append-only
//! transcript. Wire encoding is camelCase to match the session JSON the
//! clients exchange.

use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{CharacterId, SessionId};
use crate::messages::Message;

/// How many characters the moderator should pick each round.
///
/// Advisory: `Single` switches the moderator instruction to one-speaker
/// turn-taking, but a decision naming several respondents is still honored
/// as given.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakersPerRound {
    /// One speaker per round, rotating.
    Single,
    /// One or two speakers per round, moderator's choice.
    #[default]
    Free,
}

impl SpeakersPerRound {
    /// Whether single-speaker turn-taking was requested.
    #[must_use]
    pub fn is_single(self) -> bool {
        matches!(self, SpeakersPerRound::Single)
    }
}

/// One roster character.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Stable roster id, referenced by moderator decisions.
    pub id: CharacterId,
    /// Display name.
    pub name: String,
    /// Age, kept as text. Roster generation sometimes emits a number here,
    /// so deserialization accepts both.
    #[serde(
        default,
        deserialize_with = "de_age",
        skip_serializing_if = "Option::is_none"
    )]
    pub age: Option<String>,
    /// Display color (`#rrggbb`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Avatar, usually a single emoji.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Persona instructions prepended to every turn this character takes.
    pub prompt: String,
}

fn default_true() -> bool {
    true
}

fn de_age<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Text(String),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(raw.map(|r| match r {
        Raw::Num(n) => n.to_string(),
        Raw::Text(s) => s,
    }))
}

impl Character {
    /// Create a character with the required fields only.
    #[must_use]
    pub fn new(
        id: impl Into<CharacterId>,
        name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            age: None,
            color: None,
            avatar: None,
            prompt: prompt.into(),
        }
    }

    /// Set the display color.
    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Set the avatar.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Set the age text.
    #[must_use]
    pub fn with_age(mut self, age: impl Into<String>) -> Self {
        self.age = Some(age.into());
        self
    }
}

/// One group conversation: configuration plus the append-only transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Short list title, filled by title generation after the first turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// What this conversation is about; anchors every prompt.
    pub purpose: String,
    /// The roster.
    #[serde(default)]
    pub characters: Vec<Character>,
    /// Optional shared backstory woven into character prompts.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub background_story: String,
    /// Speaker-count preference handed to the moderator.
    #[serde(default)]
    pub speakers_per_round: SpeakersPerRound,
    /// Whether the moderator may call on the narrator.
    #[serde(default)]
    pub has_narrator: bool,
    /// Whether character output should include inner-thought lines.
    /// On by default; sessions opt out.
    #[serde(default = "default_true")]
    pub show_thoughts: bool,
    /// Whether character output should include action lines.
    /// On by default; sessions opt out.
    #[serde(default = "default_true")]
    pub show_actions: bool,
    /// Append-only transcript, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    /// Create an empty session around a purpose.
    #[must_use]
    pub fn new(purpose: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            title: None,
            purpose: purpose.into(),
            characters: Vec::new(),
            background_story: String::new(),
            speakers_per_round: SpeakersPerRound::default(),
            has_narrator: false,
            show_thoughts: true,
            show_actions: true,
            messages: Vec::new(),
        }
    }

    /// Look up a roster character by raw id string.
    #[must_use]
    pub fn character_by_id(&self, id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id.as_str() == id)
    }

    /// The last `n` transcript messages, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

/// Partial session update applied by the store.
///
/// Transcript messages are deliberately absent: they only ever change
/// through the store's append and interpretation-backfill operations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New purpose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Replacement roster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<Character>>,
    /// New background story.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_story: Option<String>,
    /// New speaker-count preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speakers_per_round: Option<SpeakersPerRound>,
    /// Toggle the narrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_narrator: Option<bool>,
    /// Toggle inner-thought lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_thoughts: Option<bool>,
    /// Toggle action lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_actions: Option<bool>,
}

impl SessionPatch {
    /// Apply every set field to `session`.
    pub fn apply(self, session: &mut Session) {
        if let Some(title) = self.title {
            session.title = Some(title);
        }
        if let Some(purpose) = self.purpose {
            session.purpose = purpose;
        }
        if let Some(characters) = self.characters {
            session.characters = characters;
        }
        if let Some(background_story) = self.background_story {
            session.background_story = background_story;
        }
        if let Some(speakers_per_round) = self.speakers_per_round {
            session.speakers_per_round = speakers_per_round;
        }
        if let Some(has_narrator) = self.has_narrator {
            session.has_narrator = has_narrator;
        }
        if let Some(show_thoughts) = self.show_thoughts {
            session.show_thoughts = show_thoughts;
        }
        if let Some(show_actions) = self.show_actions {
            session.show_actions = show_actions;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<Character> {
        vec![
            Character::new("luna", "Luna", "A dreamy poet").with_color("#6366f1"),
            Character::new("rex", "Rex", "A blunt skeptic").with_color("#ef4444"),
        ]
    }

    #[test]
    fn speakers_per_round_wire_values() {
        assert_eq!(
            serde_json::to_string(&SpeakersPerRound::Single).unwrap(),
            "\"single\""
        );
        assert_eq!(
            serde_json::to_string(&SpeakersPerRound::Free).unwrap(),
            "\"free\""
        );
        let parsed: SpeakersPerRound = serde_json::from_str("\"single\"").unwrap();
        assert!(parsed.is_single());
    }

    #[test]
    fn character_age_accepts_number_or_string() {
        let from_number: Character =
            serde_json::from_str(r#"{"id":"a","name":"A","age":28,"prompt":"p"}"#).unwrap();
        assert_eq!(from_number.age.as_deref(), Some("28"));

        let from_text: Character =
            serde_json::from_str(r#"{"id":"b","name":"B","age":"三十岁","prompt":"p"}"#).unwrap();
        assert_eq!(from_text.age.as_deref(), Some("三十岁"));

        let absent: Character =
            serde_json::from_str(r#"{"id":"c","name":"C","prompt":"p"}"#).unwrap();
        assert!(absent.age.is_none());
    }

    #[test]
    fn session_defaults_match_new_conversations() {
        let session = Session::new("辩论：远程工作是否优于办公室");
        assert!(session.characters.is_empty());
        assert!(session.background_story.is_empty());
        assert_eq!(session.speakers_per_round, SpeakersPerRound::Free);
        assert!(!session.has_narrator);
        // thought and action lines are on unless a session turns them off
        assert!(session.show_thoughts);
        assert!(session.show_actions);
        assert!(session.messages.is_empty());
    }

    #[test]
    fn absent_display_flags_deserialize_on() {
        let session: Session =
            serde_json::from_str(r#"{"id":"s1","purpose":"p"}"#).unwrap();
        assert!(session.show_thoughts);
        assert!(session.show_actions);
        assert!(!session.has_narrator);
    }

    #[test]
    fn character_lookup_by_raw_id() {
        let mut session = Session::new("test");
        session.characters = roster();
        assert_eq!(session.character_by_id("rex").unwrap().name, "Rex");
        assert!(session.character_by_id("nobody").is_none());
    }

    #[test]
    fn recent_clamps_to_available_messages() {
        let mut session = Session::new("test");
        for i in 0..5 {
            session.messages.push(Message::user(format!("m{i}")));
        }
        assert_eq!(session.recent(3).len(), 3);
        assert_eq!(session.recent(3)[0].content(), "m2");
        assert_eq!(session.recent(99).len(), 5);
        assert_eq!(session.recent(0).len(), 0);
    }

    #[test]
    fn session_json_uses_camel_case() {
        let mut session = Session::new("p");
        session.has_narrator = true;
        session.background_story = "很久以前".into();
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["hasNarrator"], true);
        assert_eq!(json["backgroundStory"], "很久以前");
        assert_eq!(json["speakersPerRound"], "free");
        assert!(json.get("title").is_none());
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut session = Session::new("original purpose");
        session.characters = roster();
        session.show_thoughts = false;

        let patch = SessionPatch {
            title: Some("雨夜辩论".into()),
            has_narrator: Some(true),
            ..SessionPatch::default()
        };
        patch.apply(&mut session);

        assert_eq!(session.title.as_deref(), Some("雨夜辩论"));
        assert!(session.has_narrator);
        // untouched fields keep their values
        assert_eq!(session.purpose, "original purpose");
        assert!(!session.show_thoughts);
        assert_eq!(session.characters.len(), 2);
    }

    #[test]
    fn patch_roundtrip_skips_unset_fields() {
        let patch = SessionPatch {
            background_story: Some("b".into()),
            ..SessionPatch::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["backgroundStory"], "b");
        assert!(json.get("title").is_none());
        assert!(json.get("hasNarrator").is_none());
    }

    #[test]
    fn session_roundtrip_with_messages() {
        let mut session = Session::new("p");
        session.characters = roster();
        let speaker = session.characters[0].clone();
        session.messages.push(Message::user("hello"));
        session.messages.push(Message::character(&speaker, "hi"));

        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
