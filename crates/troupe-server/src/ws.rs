//! WebSocket event feed.
//!
//! Clients connect to `GET /ws` and receive every engine event as a JSON
//! text frame, in emit order. An optional `?session=` query parameter
//! narrows the feed to one session; without it the socket sees all of them.
//!
//! The feed rides the engine's broadcast channel, so a slow client drops
//! events rather than stalling the run. A lag is logged and the stream
//! continues from wherever the channel is now.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use troupe_core::{EngineEvent, SessionId};

use crate::server::AppState;

/// Query parameters of `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Restrict the feed to one session. Absent means every session.
    #[serde(default)]
    pub session: Option<String>,
}

/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let events = state.engine.subscribe();
    let filter = params.session.map(SessionId::from);
    ws.on_upgrade(move |socket| client_loop(socket, events, filter))
}

/// Pump events to one client until either side goes away.
async fn client_loop(
    mut socket: WebSocket,
    mut events: broadcast::Receiver<EngineEvent>,
    filter: Option<SessionId>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if !should_forward(&event, filter.as_ref()) {
                        continue;
                    }
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(error = %err, "failed to encode event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "websocket client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "websocket receive error");
                    break;
                }
            },
        }
    }
}

fn should_forward(event: &EngineEvent, filter: Option<&SessionId>) -> bool {
    filter.is_none_or(|id| event.session_id() == id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
