//! The round loop: moderator, narrator, speakers, repeat.
//!
//! One run is a bounded sequence of rounds against a single session. Each
//! round asks the moderator who speaks, resolves that against the roster,
//! lets the narrator set the scene first when called, then fans the
//! characters out and commits their lines as one batch. The loop stops when
//! the moderator names nobody, when nothing it names resolves, when it says
//! stop, when the round cap is reached, when session state fails mid-run, or
//! when the run is cancelled.
//!
//! Every entered round ends with exactly one `round_completed`, and every
//! run ends with exactly one `loop_completed`, whatever the exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use troupe_core::constants::ROUND_PAUSE_MS;
use troupe_core::{BaseEvent, Character, EngineEvent, Respondent, SessionId};
use troupe_llm::Gateway;

use crate::emitter::EventEmitter;
use crate::store::SessionStore;
use crate::{moderator, narrator, speaker};

// ─────────────────────────────────────────────────────────────────────────────
// Terminal round reasons
// ─────────────────────────────────────────────────────────────────────────────

/// The moderator named nobody (or its call failed or was cancelled).
pub const REASON_CONVERSATION_ENDED: &str = "Conversation ended";
/// The moderator named only ids that do not resolve against the session.
pub const REASON_NO_VALID_RESPONDENTS: &str = "No valid respondents";
/// Session state could not be read or written mid-round.
pub const REASON_ERROR: &str = "Error occurred";

// ─────────────────────────────────────────────────────────────────────────────
// The loop
// ─────────────────────────────────────────────────────────────────────────────

/// Runs rounds against `session_id` until a terminal condition.
///
/// Returns the number of rounds entered, which is also the count of
/// `round_completed` events emitted and the payload of the final
/// `loop_completed`.
#[instrument(skip_all, fields(session_id = %session_id, max_rounds))]
pub async fn run_rounds(
    gateway: &Arc<dyn Gateway>,
    store: &Arc<dyn SessionStore>,
    emitter: &Arc<EventEmitter>,
    session_id: &SessionId,
    max_rounds: u32,
    cancel: &CancellationToken,
) -> u32 {
    let mut round = 0u32;
    while round < max_rounds && !cancel.is_cancelled() {
        round += 1;
        let _ = emitter.emit(EngineEvent::ModeratorThinking {
            base: BaseEvent::now(session_id.clone()),
            round,
        });

        // Fresh snapshot every round so this round sees the last one's lines.
        let session = match store.get(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(round, "session disappeared mid-run");
                complete_round(emitter, session_id, round, REASON_ERROR);
                break;
            }
            Err(err) => {
                error!(round, error = %err, "session read failed mid-run");
                complete_round(emitter, session_id, round, REASON_ERROR);
                break;
            }
        };

        let decision = moderator::decide(gateway, &session, cancel).await;
        if decision.respondents.is_empty() {
            debug!(round, "moderator named nobody");
            complete_round(emitter, session_id, round, REASON_CONVERSATION_ENDED);
            break;
        }
        let respondents = decision.resolve(&session);
        if respondents.is_empty() {
            warn!(round, named = decision.respondents.len(), "nothing the moderator named resolves");
            complete_round(emitter, session_id, round, REASON_NO_VALID_RESPONDENTS);
            break;
        }

        let narrator_called = respondents.iter().any(|r| matches!(r, Respondent::Narrator));
        let speakers: Vec<Character> = respondents
            .iter()
            .filter_map(Respondent::character_id)
            .filter_map(|id| session.character_by_id(id).cloned())
            .collect();

        // The narrator goes first and alone, so its scene-setting is already
        // in the transcript when the characters build their prompts.
        let mut session = session;
        if narrator_called {
            match narrator::narrate(gateway, store, emitter, &session, round, cancel).await {
                Ok(true) => match store.get(session_id).await {
                    Ok(Some(updated)) => session = updated,
                    Ok(None) | Err(_) => {
                        error!(round, "session refresh after narration failed");
                        complete_round(emitter, session_id, round, REASON_ERROR);
                        break;
                    }
                },
                Ok(false) => {}
                Err(err) => {
                    error!(round, error = %err, "narration commit failed");
                    complete_round(emitter, session_id, round, REASON_ERROR);
                    break;
                }
            }
        }

        if let Err(err) =
            speaker::speak_round(gateway, store, emitter, Arc::new(session), speakers, round, cancel)
                .await
        {
            error!(round, error = %err, "round commit failed");
            complete_round(emitter, session_id, round, REASON_ERROR);
            break;
        }

        complete_round(emitter, session_id, round, &decision.reason);
        if !decision.should_continue {
            debug!(round, "moderator closed the conversation");
            break;
        }

        // Brief pause between rounds; a cancel lands here instead of
        // waiting the pause out.
        select! {
            biased;
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(Duration::from_millis(ROUND_PAUSE_MS)) => {}
        }
    }

    info!(rounds = round, "run finished");
    let _ = emitter.emit(EngineEvent::LoopCompleted {
        base: BaseEvent::now(session_id.clone()),
        rounds: round,
    });
    round
}

fn complete_round(emitter: &Arc<EventEmitter>, session_id: &SessionId, round: u32, reason: &str) {
    let _ = emitter.emit(EngineEvent::RoundCompleted {
        base: BaseEvent::now(session_id.clone()),
        round,
        reason: reason.to_owned(),
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
