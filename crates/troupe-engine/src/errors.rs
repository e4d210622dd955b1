//! Engine error types.

use troupe_llm::{ExtractError, GatewayError};

use crate::store::StoreError;

/// Errors surfaced by engine entry points.
///
/// Loop-internal failures never reach this type: a failed moderator call
/// degrades the decision, a failed speaker stream fails only that turn, and
/// the round loop converts store failures into a terminal round event. What
/// remains here are the failures a caller can act on before a run exists
/// (unknown session, rejected generation call, undecodable model output).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Session state could not be read or written.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Model gateway call failed outright.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Model output could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(#[from] ExtractError),
}

#[cfg(test)]
mod tests {
    use super::*;

    use troupe_core::SessionId;

    use crate::store::StoreError;

    #[test]
    fn store_error_display() {
        let id = SessionId::from("missing");
        let err = EngineError::from(StoreError::NotFound(id));
        assert_eq!(err.to_string(), "Store error: session not found: missing");
    }

    #[test]
    fn decode_error_wraps_extract() {
        let parse_failure =
            troupe_llm::object_from_text::<serde_json::Value>("no json here").unwrap_err();
        let err = EngineError::from(parse_failure);
        assert!(err.to_string().starts_with("Decode error:"));
    }
}
