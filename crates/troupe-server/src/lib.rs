//! HTTP and WebSocket surface for the conversation engine.
//!
//! [`TroupeServer`] wraps an [`troupe_engine::Engine`] in an axum router:
//! JSON endpoints for session CRUD, message posting, run cancellation, and
//! one-shot design calls (roster, background story, title), plus a `/ws`
//! route that streams engine events to clients as they happen.
//!
//! [`settings`] loads the server's configuration the same way the rest of
//! the stack does: defaults, then an optional JSON file, then environment
//! overrides.

#![deny(unsafe_code)]

pub mod server;
pub mod settings;
pub mod ws;

pub use server::{ApiError, AppState, TroupeServer};
pub use settings::{
    load_settings, load_settings_from_path, settings_path, EngineSettings, GatewaySettings,
    ServerSettings, SettingsError, TroupeSettings,
};
