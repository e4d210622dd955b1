//! `TroupeServer` — the HTTP surface over the conversation engine.
//!
//! Sessions are created and read over plain JSON endpoints; posting a
//! message starts a run, whose events stream out over the WebSocket route
//! in [`crate::ws`]. The design endpoints (`/api/generate/*`) are direct
//! pass-throughs to the engine's one-shot calls.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use troupe_core::{Character, RunId, Session, SessionId, SessionPatch, SpeakersPerRound};
use troupe_engine::{generate, Engine, EngineError, StoreError};

use crate::settings::ServerSettings;
use crate::ws;

/// Data-URL images make request bodies big; match the original limit.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors a handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No session with the requested id.
    #[error("session not found")]
    SessionNotFound,
    /// The session already has a run going.
    #[error("a run is already active for this session")]
    Busy,
    /// The model endpoint failed or replied with something unusable.
    #[error("{0}")]
    Upstream(String),
    /// Session state could not be read or written.
    #[error("{0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(StoreError::NotFound(_)) => Self::SessionNotFound,
            EngineError::Store(err) => Self::Internal(err.to_string()),
            EngineError::Gateway(err) => Self::Upstream(err.to_string()),
            EngineError::Decode(err) => Self::Upstream(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::Busy => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / response bodies
// ─────────────────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// Body of `POST /api/sessions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// What the group chat is for.
    pub purpose: String,
    /// Optional display title.
    #[serde(default)]
    pub title: Option<String>,
    /// The cast. May be empty and filled in later via a patch.
    #[serde(default)]
    pub characters: Vec<Character>,
    /// Shared opening scene.
    #[serde(default)]
    pub background_story: String,
    /// Whether the moderator should pick one speaker or several per round.
    #[serde(default)]
    pub speakers_per_round: SpeakersPerRound,
    /// Whether the narrator voice participates.
    #[serde(default)]
    pub has_narrator: bool,
    /// Whether inner-thought markup is kept in display text.
    #[serde(default = "default_true")]
    pub show_thoughts: bool,
    /// Whether action markup is kept in display text.
    #[serde(default = "default_true")]
    pub show_actions: bool,
}

/// Body of `POST /api/sessions/{id}/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    /// The user's text. May be empty when only images are sent.
    #[serde(default)]
    pub content: String,
    /// Data-URL images attached to the turn.
    #[serde(default)]
    pub images: Vec<String>,
}

/// Answer to a message post: the run now in flight.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStarted {
    /// Identifier of the spawned run.
    pub run_id: RunId,
}

/// Answer to a cancel request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// Whether a live run was actually interrupted.
    pub cancelled: bool,
}

/// Body of `POST /api/generate/characters`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCharactersRequest {
    /// What the group chat is for.
    pub purpose: String,
}

/// Body of `POST /api/generate/background`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBackgroundRequest {
    /// What the group chat is for.
    pub purpose: String,
    /// The cast the story should feature.
    #[serde(default)]
    pub characters: Vec<Character>,
}

/// Answer of `POST /api/generate/background`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundResponse {
    /// The generated opening scene.
    pub background: String,
}

/// Body of `POST /api/generate/title`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTitleRequest {
    /// Text to derive the title from, usually the first user message.
    pub content: String,
}

/// Answer of `POST /api/generate/title`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleResponse {
    /// The generated (or fallback) title.
    pub title: String,
}

/// Answer of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Sessions with a run currently going.
    pub active_runs: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    /// The conversation engine.
    pub engine: Arc<Engine>,
    /// When the server started.
    pub start_time: Instant,
}

/// The troupe HTTP server.
pub struct TroupeServer {
    config: ServerSettings,
    engine: Arc<Engine>,
    start_time: Instant,
}

impl TroupeServer {
    /// A server over an already-built engine.
    #[must_use]
    pub fn new(config: ServerSettings, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            start_time: Instant::now(),
        }
    }

    /// Build the router with all routes and middleware.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            engine: Arc::clone(&self.engine),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health))
            .route("/api/sessions", post(create_session))
            .route("/api/sessions/{id}", get(get_session).patch(update_session))
            .route("/api/sessions/{id}/messages", post(post_message))
            .route("/api/sessions/{id}/cancel", post(cancel_run))
            .route("/api/generate/characters", post(generate_characters))
            .route("/api/generate/background", post(generate_background))
            .route("/api/generate/title", post(generate_title))
            .route("/ws", get(ws::ws_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// The engine behind this server.
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Bind configuration.
    #[must_use]
    pub fn config(&self) -> &ServerSettings {
        &self.config
    }

    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_runs: state.engine.active_runs(),
    })
}

/// POST /api/sessions
async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let mut session = Session::new(body.purpose);
    session.title = body.title;
    session.characters = body.characters;
    session.background_story = body.background_story;
    session.speakers_per_round = body.speakers_per_round;
    session.has_narrator = body.has_narrator;
    session.show_thoughts = body.show_thoughts;
    session.show_actions = body.show_actions;

    state
        .engine
        .store()
        .insert(session.clone())
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/sessions/{id}
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let id = SessionId::from(id);
    let session = state
        .engine
        .store()
        .get(&id)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .ok_or(ApiError::SessionNotFound)?;
    Ok(Json(session))
}

/// PATCH /api/sessions/{id}
async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SessionPatch>,
) -> Result<Json<Session>, ApiError> {
    let id = SessionId::from(id);
    let updated = state
        .engine
        .store()
        .update(&id, patch)
        .await
        .map_err(|err| match err {
            StoreError::NotFound(_) => ApiError::SessionNotFound,
            other => ApiError::Internal(other.to_string()),
        })?;
    Ok(Json(updated))
}

/// POST /api/sessions/{id}/messages
///
/// Starts a run for the turn. Posting while a run is going is rejected with
/// `409`; clients cancel explicitly rather than having a second turn yank
/// the conversation out from under the first.
async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<RunStarted>), ApiError> {
    let id = SessionId::from(id);
    if state.engine.is_busy(&id) {
        return Err(ApiError::Busy);
    }
    let handle = state
        .engine
        .post_user_message(&id, body.content, body.images)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunStarted {
            run_id: handle.run_id().clone(),
        }),
    ))
}

/// POST /api/sessions/{id}/cancel
async fn cancel_run(State(state): State<AppState>, Path(id): Path<String>) -> Json<CancelResponse> {
    let id = SessionId::from(id);
    let cancelled = state.engine.cancel_run(&id).await;
    Json(CancelResponse { cancelled })
}

/// POST /api/generate/characters
async fn generate_characters(
    State(state): State<AppState>,
    Json(body): Json<GenerateCharactersRequest>,
) -> Result<Json<Vec<Character>>, ApiError> {
    let characters = generate::roster(state.engine.gateway(), &body.purpose)
        .await
        .map_err(|err| match err {
            EngineError::Decode(_) => {
                ApiError::Upstream("Failed to parse character data. Please try again.".into())
            }
            other => other.into(),
        })?;
    Ok(Json(characters))
}

/// POST /api/generate/background
async fn generate_background(
    State(state): State<AppState>,
    Json(body): Json<GenerateBackgroundRequest>,
) -> Result<Json<BackgroundResponse>, ApiError> {
    let background =
        generate::background(state.engine.gateway(), &body.purpose, &body.characters).await?;
    Ok(Json(BackgroundResponse { background }))
}

/// POST /api/generate/title
async fn generate_title(
    State(state): State<AppState>,
    Json(body): Json<GenerateTitleRequest>,
) -> Json<TitleResponse> {
    let title = generate::title(state.engine.gateway(), &body.content).await;
    Json(TitleResponse { title })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
