//! Engine-wide constants.
//!
//! Context windows, the round cap, and the fixed prompt fragments the
//! orchestration components share. Window sizes count transcript messages,
//! newest last.

/// Current version of the troupe engine (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "troupe";

/// Transcript window handed to the moderator when deciding respondents.
pub const MODERATOR_WINDOW: usize = 10;

/// Transcript window handed to each speaking character.
pub const SPEAKER_WINDOW: usize = 20;

/// Transcript window handed to the narrator.
pub const NARRATOR_WINDOW: usize = 15;

/// Default maximum number of rounds per run.
pub const DEFAULT_MAX_ROUNDS: u32 = 20;

/// Pause between committed rounds, in milliseconds.
pub const ROUND_PAUSE_MS: u64 = 300;

/// Sentinel the moderator uses to request a narrator interjection.
pub const NARRATOR_SENTINEL: &str = "narrator";

/// Display name narrator messages are committed under.
pub const NARRATOR_NAME: &str = "旁白";

/// Substitute description for an image the vision call could not interpret.
pub const IMAGE_FALLBACK_TEXT: &str = "（图片内容无法识别）";

/// Fallback session title when title generation yields nothing.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Longest prefix of the first user message fed to title generation.
pub const TITLE_SOURCE_MAX_CHARS: usize = 200;

/// Color used for narrator messages so they render as system-toned text.
pub const NARRATOR_COLOR: &str = "#9ca3af";

/// Suggested roster palette, assigned in order when generation omits colors.
pub const CHARACTER_PALETTE: [&str; 8] = [
    "#6366f1", "#ec4899", "#14b8a6", "#f59e0b", "#8b5cf6", "#ef4444", "#22c55e", "#3b82f6",
];
