//! Chat-completions client for `OpenAI`-compatible endpoints.
//!
//! [`OpenAiGateway`] implements [`Gateway`] over the `/chat/completions`
//! wire format, which local inference servers (Ollama, vLLM, LM Studio)
//! and most hosted providers all speak. Blocking calls decode the single
//! reply body; streaming calls reassemble SSE `data:` payloads via
//! [`data_lines`] and surface each non-empty delta as one fragment.
//!
//! Undecodable stream chunks are logged and skipped rather than failing
//! the stream; providers occasionally interleave housekeeping events
//! (role announcements, usage frames) that carry no text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::gateway::{
    ChatMessage, CompletionRequest, FragmentStream, Gateway, GatewayError, GatewayResult,
};
use crate::sse::data_lines;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Connection settings for an `OpenAI`-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API base URL, without the `/chat/completions` suffix.
    /// A trailing slash is tolerated.
    pub base_url: String,
    /// Bearer token. Local inference servers usually run without one,
    /// in which case no `Authorization` header is sent.
    pub api_key: Option<String>,
    /// Model identifier passed through on every request.
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for `POST /chat/completions`.
#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Blocking reply body. Only the first choice is consumed.
#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<ReplyChoice>,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// One decoded SSE chunk of a streaming reply.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// [`Gateway`] over an `OpenAI`-compatible chat-completions endpoint.
pub struct OpenAiGateway {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiGateway {
    /// Create a gateway with its own connection pool.
    #[must_use]
    pub fn new(config: OpenAiConfig) -> Self {
        debug!(model = %config.model, base_url = %config.base_url, "gateway initialized");
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Resolved `/chat/completions` URL.
    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Send the request and fail on any non-2xx status.
    async fn post(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> GatewayResult<reqwest::Response> {
        let body = CompletionBody {
            model: &self.config.model,
            messages: &request.messages,
            stream,
            max_tokens: request.max_tokens,
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let (message, retryable) = decode_api_error(&body_text, status.as_u16());
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
                retryable,
            });
        }

        Ok(response)
    }
}

/// Pull a human-readable message out of an error response body.
///
/// Providers that follow the `OpenAI` format wrap it as
/// `{"error": {"message": "..."}}`; anything else is passed through raw.
fn decode_api_error(body: &str, status: u16) -> (String, bool) {
    let retryable = status == 429 || status >= 500;
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = json["error"]["message"].as_str() {
            return (message.to_string(), retryable);
        }
    }
    (format!("HTTP {status}: {body}"), retryable)
}

/// Decode one SSE payload into its text delta, if it carries one.
///
/// Returns `None` for undecodable chunks (logged) and for chunks whose
/// delta has no content, such as the role-announcement frame.
fn decode_delta(payload: &str) -> Option<String> {
    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, "skipping undecodable stream chunk");
            return None;
        }
    };
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|delta| !delta.is_empty())
}

#[async_trait]
impl Gateway for OpenAiGateway {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: &CompletionRequest) -> GatewayResult<String> {
        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            "chat completion"
        );

        let response = self.post(request, false).await?;
        let reply: CompletionReply = response.json().await?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GatewayError::Malformed {
                message: "reply carried no message content".into(),
            })
    }

    async fn stream_chat(&self, request: &CompletionRequest) -> GatewayResult<FragmentStream> {
        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            "streaming chat completion"
        );

        let response = self.post(request, true).await?;
        let fragments = data_lines(response.bytes_stream()).filter_map(|item| match item {
            Ok(payload) => decode_delta(&payload).map(Ok),
            Err(e) => Some(Err(e)),
        });

        Ok(Box::pin(fragments))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
