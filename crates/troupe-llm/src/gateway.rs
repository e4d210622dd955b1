//! # Gateway Trait
//!
//! Core abstraction over the upstream model API. The engine talks to one
//! [`Gateway`] for everything: moderator decisions, character turns,
//! narration, image description, and the generation helpers.
//!
//! Two call shapes cover all of it: [`Gateway::chat`] for single-shot
//! completions and [`Gateway::stream_chat`] for incremental text fragments.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed stream of text fragments returned by [`Gateway::stream_chat`].
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// Errors that can occur during gateway operations.
///
/// None of these are fatal to a run: the orchestration loop degrades every
/// failure into an empty or skipped result.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream returned a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description, taken from the response body when present.
        message: String,
        /// Whether this error can be retried.
        retryable: bool,
    },

    /// Response arrived but did not contain usable content.
    #[error("malformed response: {message}")]
    Malformed {
        /// What was missing or unreadable.
        message: String,
    },
}

impl GatewayError {
    /// Whether this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::Api { retryable, .. } => *retryable,
            Self::Json(_) | Self::Malformed { .. } => false,
        }
    }

    /// Error category string for logging and failure events.
    #[must_use]
    pub fn category(&self) -> &str {
        match self {
            Self::Http(_) => "network",
            Self::Json(_) => "parse",
            Self::Api { .. } => "api",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Message role on the chat-completions wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions to the model.
    System,
    /// Content attributed to the caller.
    User,
    /// Content attributed to the model itself.
    Assistant,
}

/// One chat-completions message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: ChatRole,
    /// Plain text or multimodal parts.
    pub content: MessageContent,
}

impl ChatMessage {
    /// System message with plain text content.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: MessageContent::Text(text.into()),
        }
    }

    /// User message with plain text content.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant message with plain text content.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// User message with multimodal parts.
    #[must_use]
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessageContent::Parts(parts),
        }
    }
}

/// Chat message content: a bare string or an array of typed parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Multimodal parts (text and image references).
    Parts(Vec<ContentPart>),
}

/// One multimodal content part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text part.
    Text {
        /// The text.
        text: String,
    },
    /// Image reference part.
    ImageUrl {
        /// The image reference.
        image_url: ImageUrl,
    },
}

impl ContentPart {
    /// Text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Image part with an optional fidelity hint (`"low"` keeps vision
    /// token cost down for throwaway descriptions).
    #[must_use]
    pub fn image_url(url: impl Into<String>, detail: Option<&str>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: detail.map(str::to_owned),
            },
        }
    }
}

/// Image reference within a content part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// Data URL or fetchable URL.
    pub url: String,
    /// Fidelity hint (`"low"`, `"high"`, `"auto"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One completion request: the full message list plus per-call limits.
///
/// The model is not part of the request; each [`Gateway`] is bound to one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// Ordered messages, system first by convention.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Request over the given messages, no token cap.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
        }
    }

    /// Cap the generated tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Core gateway trait.
///
/// Implementors must be `Send + Sync` for use across concurrent speaker
/// tasks. Both methods borrow the request; the gateway owns model and
/// credentials.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Model ID requests are issued against.
    fn model(&self) -> &str;

    /// Single-shot completion: the full response text in one piece.
    async fn chat(&self, request: &CompletionRequest) -> GatewayResult<String>;

    /// Streaming completion: text fragments in generation order.
    async fn stream_chat(&self, request: &CompletionRequest) -> GatewayResult<FragmentStream>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_is_object_safe() {
        fn assert_object_safe(_: &dyn Gateway) {}
        let _ = assert_object_safe;
    }

    #[test]
    fn gateway_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn Gateway>();
    }

    #[test]
    fn plain_text_message_serializes_as_string_content() {
        let msg = ChatMessage::user("你好");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "你好");
    }

    #[test]
    fn parts_message_serializes_as_array_content() {
        let msg = ChatMessage::user_parts(vec![
            ContentPart::text("describe this"),
            ContentPart::image_url("data:image/png;base64,AAAA", Some("low")),
        ]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["detail"], "low");
    }

    #[test]
    fn image_part_without_detail_omits_it() {
        let part = ContentPart::image_url("https://example.com/cat.png", None);
        let json = serde_json::to_value(&part).unwrap();
        assert!(json["image_url"].get("detail").is_none());
    }

    #[test]
    fn untagged_content_deserializes_both_shapes() {
        let text: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert_eq!(text.content, MessageContent::Text("hi".into()));

        let parts: ChatMessage = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"look"}]}"#,
        )
        .unwrap();
        assert!(matches!(parts.content, MessageContent::Parts(ref p) if p.len() == 1));
    }

    #[test]
    fn request_builder_sets_cap() {
        let req = CompletionRequest::new(vec![ChatMessage::system("s")]).with_max_tokens(200);
        assert_eq!(req.max_tokens, Some(200));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["maxTokens"], 200);
    }

    #[test]
    fn request_without_cap_skips_field() {
        let req = CompletionRequest::new(vec![]);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("maxTokens").is_none());
    }

    #[test]
    fn api_error_display_and_retryable() {
        let err = GatewayError::Api {
            status: 429,
            message: "Rate limited".into(),
            retryable: true,
        };
        assert_eq!(err.to_string(), "API error (429): Rate limited");
        assert!(err.is_retryable());
        assert_eq!(err.category(), "api");
    }

    #[test]
    fn client_error_not_retryable() {
        let err = GatewayError::Api {
            status: 400,
            message: "Bad request".into(),
            retryable: false,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn malformed_not_retryable() {
        let err = GatewayError::Malformed {
            message: "no choices".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "malformed");
        assert_eq!(err.to_string(), "malformed response: no choices");
    }

    #[tokio::test]
    async fn http_timeout_is_retryable() {
        let err = reqwest::Client::new()
            .get("http://[::1]:1")
            .timeout(std::time::Duration::from_nanos(1))
            .send()
            .await
            .unwrap_err();
        let gateway_err = GatewayError::Http(err);
        assert!(gateway_err.is_retryable());
        assert_eq!(gateway_err.category(), "network");
    }
}
