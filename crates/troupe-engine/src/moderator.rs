//! The moderator call: one structured decision per round.
//!
//! The moderator sees the roster and the recent transcript and replies with a
//! JSON object naming who speaks next and whether the conversation should
//! keep going. This module owns the call and its failure policy, not the
//! loop: a reply that cannot be fetched or parsed becomes
//! [`ModeratorDecision::degraded`], which the round logic reads as "nobody
//! speaks, stop here". The loop itself never sees an error from this path.

use std::sync::Arc;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use troupe_core::constants::MODERATOR_WINDOW;
use troupe_core::{ModeratorDecision, Session};
use troupe_llm::{object_from_text, CompletionRequest, Gateway};

use crate::prompts;

/// Cap on the decision reply. The contract is a short JSON object.
const DECISION_MAX_TOKENS: u32 = 200;

/// Asks the moderator who speaks in the next round.
///
/// Reads the last [`MODERATOR_WINDOW`] messages. Cancellation, transport
/// errors, and unparseable replies all return the degraded decision.
#[instrument(skip_all, fields(session_id = %session.id))]
pub async fn decide(
    gateway: &Arc<dyn Gateway>,
    session: &Session,
    cancel: &CancellationToken,
) -> ModeratorDecision {
    let window = session.recent(MODERATOR_WINDOW);
    let request = CompletionRequest::new(prompts::moderator_messages(session, window))
        .with_max_tokens(DECISION_MAX_TOKENS);

    let reply = select! {
        biased;
        () = cancel.cancelled() => {
            debug!("moderator call cancelled");
            return ModeratorDecision::degraded();
        }
        result = gateway.chat(&request) => result,
    };

    let text = match reply {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, category = err.category(), "moderator call failed");
            return ModeratorDecision::degraded();
        }
    };

    match object_from_text::<ModeratorDecision>(&text) {
        Ok(decision) => {
            debug!(
                respondents = decision.respondents.len(),
                should_continue = decision.should_continue,
                "moderator decided"
            );
            decision
        }
        Err(err) => {
            warn!(error = %err, "moderator reply did not parse");
            ModeratorDecision::degraded()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use troupe_core::{Character, Message};
    use troupe_llm::{FragmentStream, GatewayError, GatewayResult, MessageContent};

    use super::*;

    struct ScriptGateway {
        reply: GatewayResult<String>,
    }

    impl ScriptGateway {
        fn ok(text: &str) -> Arc<dyn Gateway> {
            Arc::new(Self { reply: Ok(text.to_owned()) })
        }

        fn failing() -> Arc<dyn Gateway> {
            Arc::new(Self {
                reply: Err(GatewayError::Api {
                    status: 500,
                    message: "upstream down".into(),
                    retryable: true,
                }),
            })
        }
    }

    #[async_trait]
    impl Gateway for ScriptGateway {
        fn model(&self) -> &str {
            "script"
        }

        async fn chat(&self, _request: &CompletionRequest) -> GatewayResult<String> {
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(GatewayError::Api {
                    status: 500,
                    message: "upstream down".into(),
                    retryable: true,
                }),
            }
        }

        async fn stream_chat(&self, _request: &CompletionRequest) -> GatewayResult<FragmentStream> {
            unreachable!("moderator never streams")
        }
    }

    fn sample_session() -> Session {
        let mut session = Session::new("青梅煮酒论英雄");
        session.characters = vec![
            Character::new("caocao", "曹操", "丞相，多疑"),
            Character::new("liubei", "刘备", "皇叔，仁厚"),
        ];
        session.messages.push(Message::user("今天谁是英雄？"));
        session
    }

    #[tokio::test]
    async fn parses_plain_json_decision() {
        let gateway =
            ScriptGateway::ok(r#"{"respondents": ["caocao", "liubei"], "continue": true, "reason": "两人都该表态"}"#);
        let decision = decide(&gateway, &sample_session(), &CancellationToken::new()).await;
        assert_eq!(decision.respondents, vec!["caocao", "liubei"]);
        assert!(decision.should_continue);
        assert_eq!(decision.reason, "两人都该表态");
    }

    #[tokio::test]
    async fn parses_fenced_json_with_missing_fields() {
        let gateway = ScriptGateway::ok("```json\n{\"respondents\": [\"caocao\"]}\n```");
        let decision = decide(&gateway, &sample_session(), &CancellationToken::new()).await;
        assert_eq!(decision.respondents, vec!["caocao"]);
        // Omitted fields take their defaults: keep going, no reason.
        assert!(decision.should_continue);
        assert_eq!(decision.reason, "");
    }

    #[tokio::test]
    async fn garbage_reply_degrades() {
        let gateway = ScriptGateway::ok("让我想想……大概是曹操吧。");
        let decision = decide(&gateway, &sample_session(), &CancellationToken::new()).await;
        assert!(decision.respondents.is_empty());
        assert!(!decision.should_continue);
    }

    #[tokio::test]
    async fn transport_error_degrades() {
        let gateway = ScriptGateway::failing();
        let decision = decide(&gateway, &sample_session(), &CancellationToken::new()).await;
        assert!(decision.respondents.is_empty());
        assert!(!decision.should_continue);
    }

    #[tokio::test]
    async fn cancellation_degrades_without_calling_the_model() {
        struct NeverGateway;

        #[async_trait]
        impl Gateway for NeverGateway {
            fn model(&self) -> &str {
                "never"
            }

            async fn chat(&self, _request: &CompletionRequest) -> GatewayResult<String> {
                panic!("cancelled call must not reach the model");
            }

            async fn stream_chat(
                &self,
                _request: &CompletionRequest,
            ) -> GatewayResult<FragmentStream> {
                unreachable!()
            }
        }

        let gateway: Arc<dyn Gateway> = Arc::new(NeverGateway);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let decision = decide(&gateway, &sample_session(), &cancel).await;
        assert!(decision.respondents.is_empty());
        assert!(!decision.should_continue);
    }

    #[tokio::test]
    async fn request_carries_the_recent_window_and_a_token_cap() {
        struct CapturingGateway;

        #[async_trait]
        impl Gateway for CapturingGateway {
            fn model(&self) -> &str {
                "capture"
            }

            async fn chat(&self, request: &CompletionRequest) -> GatewayResult<String> {
                assert_eq!(request.max_tokens, Some(DECISION_MAX_TOKENS));
                let transcript = request
                    .messages
                    .iter()
                    .filter_map(|m| match &m.content {
                        MessageContent::Text(text) => Some(text.as_str()),
                        MessageContent::Parts(_) => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                assert!(transcript.contains("今天谁是英雄？"));
                Ok(r#"{"respondents": []}"#.to_owned())
            }

            async fn stream_chat(
                &self,
                _request: &CompletionRequest,
            ) -> GatewayResult<FragmentStream> {
                unreachable!()
            }
        }

        let gateway: Arc<dyn Gateway> = Arc::new(CapturingGateway);
        let decision = decide(&gateway, &sample_session(), &CancellationToken::new()).await;
        assert!(decision.respondents.is_empty());
    }
}
