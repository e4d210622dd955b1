//! Model access layer for the conversation engine.
//!
//! Everything the engine needs from a language model flows through the
//! [`Gateway`] trait: blocking completions for structured calls (moderator
//! decisions, roster generation) and fragment streams for character speech.
//! [`OpenAiGateway`] is the production implementation, speaking the
//! chat-completions wire format that hosted providers and local inference
//! servers share.
//!
//! Two support modules round out the crate: [`sse`] reassembles `data:`
//! payloads out of a raw byte stream, and [`extract`] digs JSON out of
//! model replies that wrap it in prose or code fences.

#![deny(unsafe_code)]

pub mod extract;
pub mod gateway;
pub mod openai;
pub mod sse;

pub use extract::{array_from_text, object_from_text, ExtractError};
pub use gateway::{
    ChatMessage, ChatRole, CompletionRequest, ContentPart, FragmentStream, Gateway, GatewayError,
    GatewayResult, ImageUrl, MessageContent,
};
pub use openai::{OpenAiConfig, OpenAiGateway, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use sse::data_lines;
