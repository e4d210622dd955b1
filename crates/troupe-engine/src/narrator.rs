//! The narrator's scene-setting turn.
//!
//! When the moderator calls for narration, the narrator streams like any
//! speaker but commits alone and first: its line lands in the store before
//! the round's characters build their prompts, so they can react to the
//! scene it sets. A narrator that fails, declines, or is cancelled simply
//! contributes nothing and the round carries on.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use troupe_core::constants::NARRATOR_WINDOW;
use troupe_core::{Message, Session};
use troupe_llm::{CompletionRequest, Gateway};

use crate::emitter::EventEmitter;
use crate::prompts;
use crate::speaker::{stream_turn, TurnIdentity};
use crate::store::{SessionStore, StoreError};

/// Streams one narration and appends it to the transcript.
///
/// Returns `Ok(true)` when a line was committed. Empty output — including
/// failed or cancelled streams, which the turn runner resolves as empty —
/// returns `Ok(false)` without touching the store. Only the append itself
/// can error.
#[instrument(skip_all, fields(session_id = %session.id, round))]
pub async fn narrate(
    gateway: &Arc<dyn Gateway>,
    store: &Arc<dyn SessionStore>,
    emitter: &Arc<EventEmitter>,
    session: &Session,
    round: u32,
    cancel: &CancellationToken,
) -> Result<bool, StoreError> {
    let window = session.recent(NARRATOR_WINDOW);
    let request = CompletionRequest::new(prompts::narrator_messages(session, window));
    let identity = TurnIdentity::narrator();
    let text = stream_turn(gateway, emitter, &session.id, &identity, round, &request, cancel).await;

    if text.is_empty() {
        debug!("narrator had nothing to add");
        return Ok(false);
    }
    store
        .append_messages(&session.id, vec![Message::narrator(text)])
        .await?;
    Ok(true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
