//! One-shot design calls: roster, background story, session title.
//!
//! These run outside any round loop and outside any run, so they take no
//! cancellation token. Roster and background surface their failures — the
//! caller asked for them explicitly and can retry — while the title helper
//! degrades to the default, since a failed title should never block saving
//! a chat.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use troupe_core::constants::{CHARACTER_PALETTE, DEFAULT_TITLE};
use troupe_core::Character;
use troupe_llm::{array_from_text, CompletionRequest, Gateway};

use crate::errors::EngineError;
use crate::prompts;

const ROSTER_MAX_TOKENS: u32 = 1500;
const BACKGROUND_MAX_TOKENS: u32 = 500;
const TITLE_MAX_TOKENS: u32 = 30;

/// Designs a cast of characters for the given purpose.
///
/// The reply must parse as a JSON array of characters; anything else is an
/// error. Characters the model left colorless get palette colors in order.
#[instrument(skip_all)]
pub async fn roster(gateway: &Arc<dyn Gateway>, purpose: &str) -> Result<Vec<Character>, EngineError> {
    let request =
        CompletionRequest::new(prompts::roster_messages(purpose)).with_max_tokens(ROSTER_MAX_TOKENS);
    let reply = gateway.chat(&request).await?;
    let mut characters: Vec<Character> = array_from_text(&reply)?;
    for (index, character) in characters.iter_mut().enumerate() {
        if character.color.is_none() {
            character.color = Some(CHARACTER_PALETTE[index % CHARACTER_PALETTE.len()].to_owned());
        }
    }
    debug!(characters = characters.len(), "roster designed");
    Ok(characters)
}

/// Writes an opening background story for the purpose and cast.
pub async fn background(
    gateway: &Arc<dyn Gateway>,
    purpose: &str,
    roster: &[Character],
) -> Result<String, EngineError> {
    let request = CompletionRequest::new(prompts::background_messages(purpose, roster))
        .with_max_tokens(BACKGROUND_MAX_TOKENS);
    let reply = gateway.chat(&request).await?;
    Ok(reply.trim().to_owned())
}

/// Titles a chat from its first message. Never fails: an error or an empty
/// reply falls back to the default title.
pub async fn title(gateway: &Arc<dyn Gateway>, source: &str) -> String {
    let request =
        CompletionRequest::new(prompts::title_messages(source)).with_max_tokens(TITLE_MAX_TOKENS);
    match gateway.chat(&request).await {
        Ok(reply) => {
            let trimmed = reply.trim();
            if trimmed.is_empty() {
                DEFAULT_TITLE.to_owned()
            } else {
                trimmed.to_owned()
            }
        }
        Err(err) => {
            warn!(error = %err, "title call failed, using the default");
            DEFAULT_TITLE.to_owned()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
