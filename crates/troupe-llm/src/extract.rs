//! # Tolerant JSON Recovery
//!
//! Models asked for "JSON only" still wrap their answers in prose, code
//! fences, or trailing commentary. This module recovers the first JSON
//! object or array from such text:
//!
//! 1. parse the trimmed text directly
//! 2. strip markdown code fences and parse again
//! 3. scan for the first balanced region (string- and escape-aware) and
//!    parse that
//!
//! Callers decide what a failure means: the moderator degrades, roster
//! generation reports the error.

use serde::de::DeserializeOwned;

/// Errors from tolerant JSON recovery.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The text contained no candidate region at all.
    #[error("no JSON {expected} found in text")]
    NotFound {
        /// `"object"` or `"array"`.
        expected: &'static str,
    },

    /// A candidate region was found but did not parse as the target type.
    #[error("recovered JSON did not parse: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recover the first JSON object from free-form model text.
pub fn object_from_text<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    recover(text, '{', '}', "object")
}

/// Recover the first JSON array from free-form model text.
pub fn array_from_text<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    recover(text, '[', ']', "array")
}

/// Remove markdown code fences, keeping whatever they wrapped.
#[must_use]
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "")
}

fn recover<T: DeserializeOwned>(
    text: &str,
    open: char,
    close: char,
    expected: &'static str,
) -> Result<T, ExtractError> {
    // Direct attempts parse to a Value first: the target container kind must
    // match, so a bare scalar reply never satisfies an object request.
    let container_ok = |value: &serde_json::Value| match expected {
        "array" => value.is_array(),
        _ => value.is_object(),
    };

    let trimmed = text.trim();
    if let Some(value) = serde_json::from_str(trimmed).ok().filter(container_ok) {
        return Ok(serde_json::from_value(value)?);
    }

    let cleaned = strip_code_fences(trimmed);
    let cleaned = cleaned.trim();
    if let Some(value) = serde_json::from_str(cleaned).ok().filter(container_ok) {
        return Ok(serde_json::from_value(value)?);
    }

    let region =
        balanced_region(cleaned, open, close).ok_or(ExtractError::NotFound { expected })?;
    Ok(serde_json::from_str(region)?)
}

/// Slice out the first balanced `open`..`close` region.
///
/// Tracks JSON string state so delimiters inside string values (and their
/// escapes) do not affect nesting depth. Returns `None` when no opener
/// exists or the region never closes.
fn balanced_region(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
        } else if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..start + idx + close.len_utf8()]);
            }
        }
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
