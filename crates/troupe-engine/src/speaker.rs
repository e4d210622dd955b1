//! Character turns: streaming one voice, and coordinating a whole round.
//!
//! [`stream_turn`] runs a single streamed completion and narrates it over the
//! event bus (turn-started, a chunk per fragment, then turn-completed or
//! turn-failed). It resolves with the accumulated text, and with an empty
//! string when the turn failed, was cancelled, or the speaker chose to say
//! nothing. Callers can treat "empty" uniformly as "no line this round".
//!
//! [`speak_round`] fans the round's speakers out concurrently, waits for all
//! of them, and commits every non-empty line to the store as one batch in
//! speaking order. Listeners see interleaved chunks live; the transcript
//! gains the whole round atomically.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use troupe_core::constants::{NARRATOR_COLOR, NARRATOR_NAME, SPEAKER_WINDOW};
use troupe_core::{BaseEvent, Character, CharacterId, EngineEvent, Message, Session, SessionId};
use troupe_llm::{CompletionRequest, Gateway};

use crate::emitter::EventEmitter;
use crate::prompts;
use crate::store::{SessionStore, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Turn identity
// ─────────────────────────────────────────────────────────────────────────────

/// Who a streamed turn is attributed to in events.
///
/// Characters carry their id; the narrator has none and uses the fixed
/// narrator name and color.
pub(crate) struct TurnIdentity {
    pub(crate) character_id: Option<CharacterId>,
    pub(crate) name: String,
    pub(crate) color: Option<String>,
}

impl TurnIdentity {
    pub(crate) fn character(character: &Character) -> Self {
        Self {
            character_id: Some(character.id.clone()),
            name: character.name.clone(),
            color: character.color.clone(),
        }
    }

    pub(crate) fn narrator() -> Self {
        Self {
            character_id: None,
            name: NARRATOR_NAME.to_owned(),
            color: Some(NARRATOR_COLOR.to_owned()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One streamed turn
// ─────────────────────────────────────────────────────────────────────────────

/// Streams one completion and emits the turn's event sequence.
///
/// Returns the trimmed accumulated text. Stream errors emit
/// `character_turn_failed` and return empty; cancellation emits
/// `character_turn_completed` with empty content and returns empty, so a
/// cancelled run never commits a partial line.
#[allow(clippy::cast_possible_truncation)]
pub(crate) async fn stream_turn(
    gateway: &Arc<dyn Gateway>,
    emitter: &Arc<EventEmitter>,
    session_id: &SessionId,
    identity: &TurnIdentity,
    round: u32,
    request: &CompletionRequest,
    cancel: &CancellationToken,
) -> String {
    let started = Instant::now();
    let _ = emitter.emit(EngineEvent::CharacterTurnStarted {
        base: BaseEvent::now(session_id.clone()),
        round,
        character_id: identity.character_id.clone(),
        character_name: identity.name.clone(),
        character_color: identity.color.clone(),
    });

    let mut stream = match gateway.stream_chat(request).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(speaker = %identity.name, error = %err, category = err.category(), "turn stream failed to open");
            let _ = emitter.emit(EngineEvent::CharacterTurnFailed {
                base: BaseEvent::now(session_id.clone()),
                round,
                character_id: identity.character_id.clone(),
                character_name: identity.name.clone(),
                error: err.to_string(),
            });
            return String::new();
        }
    };

    let mut text = String::new();
    loop {
        let fragment = select! {
            biased;
            () = cancel.cancelled() => {
                debug!(speaker = %identity.name, "turn cancelled mid-stream");
                let _ = emitter.emit(EngineEvent::CharacterTurnCompleted {
                    base: BaseEvent::now(session_id.clone()),
                    round,
                    character_id: identity.character_id.clone(),
                    character_name: identity.name.clone(),
                    content: String::new(),
                    duration: started.elapsed().as_millis() as u64,
                });
                return String::new();
            }
            fragment = stream.next() => fragment,
        };

        match fragment {
            None => break,
            Some(Ok(delta)) => {
                text.push_str(&delta);
                let _ = emitter.emit(EngineEvent::CharacterChunk {
                    base: BaseEvent::now(session_id.clone()),
                    round,
                    character_id: identity.character_id.clone(),
                    character_name: identity.name.clone(),
                    delta,
                    content: text.clone(),
                });
            }
            Some(Err(err)) => {
                warn!(speaker = %identity.name, error = %err, category = err.category(), "turn stream broke");
                let _ = emitter.emit(EngineEvent::CharacterTurnFailed {
                    base: BaseEvent::now(session_id.clone()),
                    round,
                    character_id: identity.character_id.clone(),
                    character_name: identity.name.clone(),
                    error: err.to_string(),
                });
                return String::new();
            }
        }
    }

    let content = text.trim().to_owned();
    let _ = emitter.emit(EngineEvent::CharacterTurnCompleted {
        base: BaseEvent::now(session_id.clone()),
        round,
        character_id: identity.character_id.clone(),
        character_name: identity.name.clone(),
        content: content.clone(),
        duration: started.elapsed().as_millis() as u64,
    });
    content
}

/// One character's turn against a session snapshot.
pub async fn speak(
    gateway: &Arc<dyn Gateway>,
    emitter: &Arc<EventEmitter>,
    session: &Session,
    character: &Character,
    round: u32,
    cancel: &CancellationToken,
) -> String {
    let window = session.recent(SPEAKER_WINDOW);
    let request = CompletionRequest::new(prompts::character_messages(session, character, window));
    let identity = TurnIdentity::character(character);
    stream_turn(gateway, emitter, &session.id, &identity, round, &request, cancel).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Round coordination
// ─────────────────────────────────────────────────────────────────────────────

/// Runs every speaker of the round concurrently and commits their lines.
///
/// All speakers see the same `session` snapshot, so nobody reacts to a
/// same-round line. Results are gathered in speaking order, empty ones
/// dropped, and the rest appended to the store as a single batch. Returns
/// how many lines were committed.
#[instrument(skip_all, fields(session_id = %session.id, round, speakers = speakers.len()))]
pub async fn speak_round(
    gateway: &Arc<dyn Gateway>,
    store: &Arc<dyn SessionStore>,
    emitter: &Arc<EventEmitter>,
    session: Arc<Session>,
    speakers: Vec<Character>,
    round: u32,
    cancel: &CancellationToken,
) -> Result<usize, StoreError> {
    let mut turns = JoinSet::new();
    for (index, character) in speakers.into_iter().enumerate() {
        let gateway = Arc::clone(gateway);
        let emitter = Arc::clone(emitter);
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        let _ = turns.spawn(async move {
            let text = speak(&gateway, &emitter, &session, &character, round, &cancel).await;
            (index, character, text)
        });
    }

    let mut results = Vec::with_capacity(turns.len());
    while let Some(joined) = turns.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => warn!(round, error = %err, "speaker task aborted"),
        }
    }
    results.sort_by_key(|(index, ..)| *index);

    let batch: Vec<Message> = results
        .into_iter()
        .filter(|(_, _, text)| !text.is_empty())
        .map(|(_, character, text)| Message::character(&character, text))
        .collect();
    let committed = batch.len();
    if !batch.is_empty() {
        store.append_messages(&session.id, batch).await?;
    }
    debug!(committed, "round lines committed");
    Ok(committed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
