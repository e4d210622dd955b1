//! Moderator decisions and their resolution against a roster.
//!
//! The moderator replies with a small JSON object; [`ModeratorDecision`] is
//! that wire shape taken at face value. [`Respondent`] is the decoded form
//! the rest of the engine works with: roster-checked character references
//! plus the narrator, resolved exactly once per round.

use serde::{Deserialize, Serialize};

use crate::constants::NARRATOR_SENTINEL;
use crate::ids::CharacterId;
use crate::session::Session;

/// Raw moderator reply.
///
/// Tolerant by construction: every field has a default so a minimal
/// `{"respondents": [...]}` parses, and `continue` defaults to `true` when
/// the moderator omits it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeratorDecision {
    /// Raw respondent ids as the moderator wrote them. May contain the
    /// narrator sentinel and ids that match nothing in the roster.
    #[serde(default)]
    pub respondents: Vec<String>,
    /// Whether the conversation should run another round after this one.
    #[serde(default = "default_true", rename = "continue")]
    pub should_continue: bool,
    /// Moderator's one-line justification, surfaced with round completion.
    #[serde(default)]
    pub reason: String,
}

fn default_true() -> bool {
    true
}

impl ModeratorDecision {
    /// The decision every moderator failure degrades to: nobody speaks and
    /// the conversation does not continue.
    #[must_use]
    pub fn degraded() -> Self {
        Self {
            respondents: Vec::new(),
            should_continue: false,
            reason: String::new(),
        }
    }

    /// Resolve raw respondent ids against the session roster.
    ///
    /// Unknown ids are dropped. The narrator sentinel is honored only when
    /// the session has a narrator, and at most once regardless of how many
    /// times the moderator wrote it. Duplicate character ids are kept as
    /// written.
    #[must_use]
    pub fn resolve(&self, session: &Session) -> Vec<Respondent> {
        let mut resolved = Vec::with_capacity(self.respondents.len());
        for raw in &self.respondents {
            if raw == NARRATOR_SENTINEL {
                if session.has_narrator && !resolved.contains(&Respondent::Narrator) {
                    resolved.push(Respondent::Narrator);
                }
            } else if let Some(character) = session.character_by_id(raw) {
                resolved.push(Respondent::Character(character.id.clone()));
            }
        }
        resolved
    }
}

impl Default for ModeratorDecision {
    fn default() -> Self {
        Self::degraded()
    }
}

/// One resolved respondent for a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Respondent {
    /// A roster character, verified to exist at resolution time.
    Character(CharacterId),
    /// The narrator interjection.
    Narrator,
}

impl Respondent {
    /// The character id, when this respondent is one.
    #[must_use]
    pub fn character_id(&self) -> Option<&CharacterId> {
        match self {
            Respondent::Character(id) => Some(id),
            Respondent::Narrator => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Character;

    fn session_with_roster(has_narrator: bool) -> Session {
        let mut session = Session::new("test");
        session.has_narrator = has_narrator;
        session.characters = vec![
            Character::new("luna", "Luna", "poet"),
            Character::new("rex", "Rex", "skeptic"),
        ];
        session
    }

    #[test]
    fn minimal_reply_parses_with_continue_true() {
        let decision: ModeratorDecision =
            serde_json::from_str(r#"{"respondents": ["luna"]}"#).unwrap();
        assert_eq!(decision.respondents, vec!["luna"]);
        assert!(decision.should_continue);
        assert!(decision.reason.is_empty());
    }

    #[test]
    fn continue_false_is_respected() {
        let decision: ModeratorDecision =
            serde_json::from_str(r#"{"respondents": [], "continue": false, "reason": "辩论结束"}"#)
                .unwrap();
        assert!(!decision.should_continue);
        assert_eq!(decision.reason, "辩论结束");
    }

    #[test]
    fn serializes_continue_under_keyword_name() {
        let decision = ModeratorDecision {
            respondents: vec!["luna".into()],
            should_continue: true,
            reason: "观点交锋".into(),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["continue"], true);
    }

    #[test]
    fn degraded_decision_ends_the_conversation() {
        let degraded = ModeratorDecision::degraded();
        assert!(degraded.respondents.is_empty());
        assert!(!degraded.should_continue);
    }

    #[test]
    fn resolve_drops_unknown_ids() {
        let session = session_with_roster(false);
        let decision = ModeratorDecision {
            respondents: vec!["luna".into(), "ghost".into(), "rex".into()],
            ..ModeratorDecision::degraded()
        };
        let resolved = decision.resolve(&session);
        assert_eq!(
            resolved,
            vec![
                Respondent::Character("luna".into()),
                Respondent::Character("rex".into()),
            ]
        );
    }

    #[test]
    fn resolve_keeps_duplicate_characters_as_written() {
        let session = session_with_roster(false);
        let decision = ModeratorDecision {
            respondents: vec!["luna".into(), "luna".into()],
            ..ModeratorDecision::degraded()
        };
        assert_eq!(decision.resolve(&session).len(), 2);
    }

    #[test]
    fn narrator_requires_session_flag() {
        let decision = ModeratorDecision {
            respondents: vec![NARRATOR_SENTINEL.into(), "luna".into()],
            ..ModeratorDecision::degraded()
        };

        let without = session_with_roster(false);
        assert_eq!(
            decision.resolve(&without),
            vec![Respondent::Character("luna".into())]
        );

        let with = session_with_roster(true);
        assert_eq!(
            decision.resolve(&with),
            vec![Respondent::Narrator, Respondent::Character("luna".into())]
        );
    }

    #[test]
    fn narrator_resolves_at_most_once() {
        let session = session_with_roster(true);
        let decision = ModeratorDecision {
            respondents: vec![NARRATOR_SENTINEL.into(), NARRATOR_SENTINEL.into()],
            ..ModeratorDecision::degraded()
        };
        assert_eq!(decision.resolve(&session), vec![Respondent::Narrator]);
    }

    #[test]
    fn narrator_is_not_a_roster_id() {
        // the sentinel shadows any roster entry with the literal id "narrator"
        let mut session = session_with_roster(false);
        session
            .characters
            .push(Character::new("narrator", "Voice", "meta"));
        let decision = ModeratorDecision {
            respondents: vec!["narrator".into()],
            ..ModeratorDecision::degraded()
        };
        assert!(decision.resolve(&session).is_empty());
    }
}
