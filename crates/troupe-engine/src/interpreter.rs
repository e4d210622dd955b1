//! Image interpretation for user turns.
//!
//! A user message may carry data-URL images that downstream prompts cannot
//! embed (character and narrator calls are text-only). Before any round runs,
//! each image is described once by the vision model and the user message is
//! rewritten to carry the descriptions inline. The rewrite happens exactly
//! once per message; rounds then see plain text.
//!
//! Interpretation never fails the run: a describe call that errors, returns
//! nothing, or is cancelled yields a fixed placeholder for that image and the
//! pass moves on to the next one.

use std::sync::Arc;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use troupe_core::constants::IMAGE_FALLBACK_TEXT;
use troupe_core::{BaseEvent, EngineEvent, Message, SessionId};
use troupe_llm::{CompletionRequest, Gateway};

use crate::emitter::EventEmitter;
use crate::prompts;
use crate::store::{SessionStore, StoreError};

/// Cap on each image description reply.
const DESCRIPTION_MAX_TOKENS: u32 = 200;

/// Describes every image on `message` and rewrites the message in the store.
///
/// No-op for messages without images. Emits `interpretation_started` before
/// the first describe call and `interpretation_completed` with the rewritten
/// message after the store write. Descriptions run sequentially in image
/// order; with more than one image each line is labelled `[图N]` so speakers
/// can refer to a specific picture.
///
/// Only the store write can fail. Model-side failures degrade to
/// [`IMAGE_FALLBACK_TEXT`] per image.
#[instrument(skip_all, fields(session_id = %session_id, message_id = %message.id()))]
pub async fn interpret_images(
    gateway: &Arc<dyn Gateway>,
    store: &Arc<dyn SessionStore>,
    emitter: &Arc<EventEmitter>,
    session_id: &SessionId,
    message: &Message,
    cancel: &CancellationToken,
) -> Result<(), StoreError> {
    let images = message.images();
    if images.is_empty() {
        return Ok(());
    }

    #[allow(clippy::cast_possible_truncation)]
    let image_count = images.len() as u32;
    let _ = emitter.emit(EngineEvent::InterpretationStarted {
        base: BaseEvent::now(session_id.clone()),
        image_count,
    });

    let mut lines = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let description = describe_image(gateway, image, cancel).await;
        if images.len() > 1 {
            lines.push(format!("[图{}] {}", index + 1, description));
        } else {
            lines.push(description);
        }
    }
    let interpretation = lines.join("\n");
    let content = rewrite_content(message.display_text(), images.len(), &interpretation);

    // Mirror the store write on a local copy so the event carries the
    // message exactly as persisted.
    let mut updated = message.clone();
    let _ = updated.fill_interpretation(interpretation.clone(), content.clone());
    store
        .fill_interpretation(session_id, message.id(), interpretation, content)
        .await?;

    debug!(images = images.len(), "user message rewritten with image descriptions");
    let _ = emitter.emit(EngineEvent::InterpretationCompleted {
        base: BaseEvent::now(session_id.clone()),
        message: updated,
    });
    Ok(())
}

/// One non-streaming describe call. Errors, blank replies, and cancellation
/// all collapse to the placeholder text.
async fn describe_image(
    gateway: &Arc<dyn Gateway>,
    image_url: &str,
    cancel: &CancellationToken,
) -> String {
    let request = CompletionRequest::new(prompts::describe_image_messages(image_url))
        .with_max_tokens(DESCRIPTION_MAX_TOKENS);

    let reply = select! {
        biased;
        () = cancel.cancelled() => {
            debug!("describe call cancelled");
            None
        }
        result = gateway.chat(&request) => match result {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(error = %err, category = err.category(), "describe call failed");
                None
            }
        },
    };

    match reply {
        Some(text) if !text.trim().is_empty() => text.trim().to_owned(),
        _ => IMAGE_FALLBACK_TEXT.to_owned(),
    }
}

/// Builds the rewritten message content: original text (when present), an
/// image-count note, then the description block.
fn rewrite_content(text: &str, count: usize, interpretation: &str) -> String {
    let note = format!("[用户发送了{count}张图片]");
    if text.is_empty() {
        format!("{note}\n{interpretation}")
    } else {
        format!("{text}\n{note}\n{interpretation}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
