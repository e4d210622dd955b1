//! # SSE Decoder
//!
//! Server-Sent Events decoding for streaming completions.
//!
//! The upstream API frames streaming responses as SSE `data:` lines. This
//! module turns a raw byte stream into the data payloads:
//! - line buffering across arbitrary chunk boundaries
//! - `data: ` prefix extraction
//! - `[DONE]` marker, comment, and non-data field filtering
//! - trailing-buffer flush when the stream ends without a final newline
//!
//! Transport errors surface in-stream as [`GatewayError::Http`] and end the
//! stream, so a half-delivered turn fails instead of silently committing a
//! truncated text.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio_stream::StreamExt;

use crate::gateway::GatewayError;

/// Decode SSE data payloads from a byte stream.
///
/// Yields one `Ok(String)` per data line, in arrival order. A transport
/// error yields a single `Err` and terminates the stream.
pub fn data_lines<S>(byte_stream: S) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), false),
        |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }

            loop {
                // Drain complete lines out of the buffer first
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let line = match std::str::from_utf8(&line_bytes) {
                        Ok(s) => s,
                        Err(_) => continue, // skip invalid UTF-8 lines
                    };

                    if let Some(data) = data_payload(line) {
                        return Some((Ok(data), (stream, buffer, false)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((Err(GatewayError::Http(e)), (stream, buffer, true)));
                    }
                    None => {
                        // Stream ended without a trailing newline; the buffer
                        // may still hold one last data line
                        if !buffer.is_empty() {
                            let trailing = std::str::from_utf8(&buffer)
                                .ok()
                                .map(str::trim)
                                .and_then(data_payload);
                            if let Some(data) = trailing {
                                buffer.clear();
                                return Some((Ok(data), (stream, buffer, true)));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Extract the payload from one SSE line.
///
/// Returns `None` for empty lines, comments, non-data fields, empty data,
/// and the `[DONE]` marker.
fn data_payload(line: &str) -> Option<String> {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();

    if data == "[DONE]" || data.is_empty() {
        return None;
    }

    Some(data.to_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
