//! Settings loading with deep merge and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TroupeSettings::default()`]
//! 2. If `~/.troupe/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use troupe_core::constants::DEFAULT_MAX_ROUNDS;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Everything configurable about a troupe deployment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TroupeSettings {
    /// HTTP bind settings.
    pub server: ServerSettings,
    /// Model gateway settings.
    pub gateway: GatewaySettings,
    /// Conversation engine settings.
    pub engine: EngineSettings,
}

impl Default for TroupeSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            gateway: GatewaySettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

/// Where the HTTP server listens.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `3000`).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// How to reach the model endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySettings {
    /// Chat-completions base URL.
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Bearer token; usually supplied via `TROUPE_API_KEY` rather than the
    /// settings file.
    pub api_key: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: troupe_llm::DEFAULT_BASE_URL.into(),
            model: troupe_llm::DEFAULT_MODEL.into(),
            api_key: None,
        }
    }
}

/// Conversation loop knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    /// Hard cap on rounds per run.
    pub max_rounds: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur when loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON, or a value has the wrong shape.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the path to the settings file (`~/.troupe/settings.json`).
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".troupe").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TroupeSettings, SettingsError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; an unreadable or syntactically broken
/// file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TroupeSettings, SettingsError> {
    let defaults = serde_json::to_value(TroupeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TroupeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning, falling back to file/default.
pub fn apply_env_overrides(settings: &mut TroupeSettings) {
    if let Some(v) = read_env_string("TROUPE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("TROUPE_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("TROUPE_BASE_URL") {
        settings.gateway.base_url = v;
    }
    if let Some(v) = read_env_string("TROUPE_MODEL") {
        settings.gateway.model = v;
    }
    if let Some(v) = read_env_string("TROUPE_API_KEY") {
        settings.gateway.api_key = Some(v);
    } else if let Some(v) = read_env_string("OPENAI_API_KEY") {
        // The conventional name keeps working for hosted endpoints.
        settings.gateway.api_key = Some(v);
    }
    if let Some(v) = read_env_u32("TROUPE_MAX_ROUNDS", 1, 1000) {
        settings.engine.max_rounds = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
#[must_use]
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
#[must_use]
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = TroupeSettings::default();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.gateway.base_url, troupe_llm::DEFAULT_BASE_URL);
        assert!(settings.gateway.api_key.is_none());
        assert_eq!(settings.engine.max_rounds, DEFAULT_MAX_ROUNDS);
    }

    #[test]
    fn merge_simple_override() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": 10});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 10);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_nested_override_keeps_siblings() {
        let target = serde_json::json!({"server": {"port": 3000, "host": "127.0.0.1"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_skips_null_values() {
        let target = serde_json::json!({"gateway": {"model": "gpt-4o-mini"}});
        let source = serde_json::json!({"gateway": {"model": null}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["gateway"]["model"], "gpt-4o-mini");
    }

    #[test]
    fn merge_replaces_arrays_entirely() {
        let target = serde_json::json!({"list": [1, 2, 3]});
        let source = serde_json::json!({"list": [9]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["list"], serde_json::json!([9]));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.port, TroupeSettings::default().server.port);
    }

    #[test]
    fn file_values_override_defaults_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 8088}, "gateway": {"model": "qwen-plus"}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.server.host, "127.0.0.1", "untouched keys keep defaults");
        assert_eq!(settings.gateway.model, "qwen-plus");
    }

    #[test]
    fn broken_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let result = load_settings_from_path(&path);
        assert_matches!(result, Err(SettingsError::Json(_)));
    }

    #[test]
    fn parse_u16_rejects_out_of_range() {
        assert_eq!(parse_u16_range("3000", 1, 65535), Some(3000));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("http", 1, 65535), None);
    }

    #[test]
    fn parse_u32_rejects_out_of_range() {
        assert_eq!(parse_u32_range("20", 1, 1000), Some(20));
        assert_eq!(parse_u32_range("1001", 1, 1000), None);
        assert_eq!(parse_u32_range("-3", 1, 1000), None);
    }

    #[test]
    fn settings_path_lives_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".troupe/settings.json"));
    }
}
