//! # troupe
//!
//! Troupe server binary — wires the model gateway, session store, and
//! conversation engine together and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use troupe_engine::{Engine, InMemorySessionStore};
use troupe_llm::{OpenAiConfig, OpenAiGateway};
use troupe_server::{load_settings, load_settings_from_path, TroupeServer, TroupeSettings};

/// Troupe conversation server.
#[derive(Parser, Debug)]
#[command(name = "troupe", about = "Moderated multi-character group chat server")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings if specified).
    #[arg(long)]
    port: Option<u16>,

    /// Chat-completions base URL (overrides settings if specified).
    #[arg(long)]
    base_url: Option<String>,

    /// Model sent with every request (overrides settings if specified).
    #[arg(long)]
    model: Option<String>,

    /// Hard cap on rounds per run (overrides settings if specified).
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Settings file to load instead of `~/.troupe/settings.json`.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Settings with CLI flags folded in on top of file and environment.
    fn resolve_settings(&self) -> Result<TroupeSettings> {
        let mut settings = match &self.config {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(base_url) = &self.base_url {
            settings.gateway.base_url.clone_from(base_url);
        }
        if let Some(model) = &self.model {
            settings.gateway.model.clone_from(model);
        }
        if let Some(max_rounds) = self.max_rounds {
            settings.engine.max_rounds = max_rounds;
        }
        Ok(settings)
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    let settings = args.resolve_settings()?;

    let gateway = Arc::new(OpenAiGateway::new(OpenAiConfig {
        base_url: settings.gateway.base_url.clone(),
        api_key: settings.gateway.api_key.clone(),
        model: settings.gateway.model.clone(),
    }));
    let store = Arc::new(InMemorySessionStore::new());
    let engine = Arc::new(Engine::new(gateway, store).with_max_rounds(settings.engine.max_rounds));

    let server = TroupeServer::new(settings.server.clone(), engine);
    let addr = server.bind_addr();
    let router = server.router();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;

    tracing::info!(
        model = %settings.gateway.model,
        base_url = %settings.gateway.base_url,
        max_rounds = settings.engine.max_rounds,
        "Troupe listening on http://{local_addr}"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for ctrl-c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_untouched() {
        let cli = Cli::parse_from(["troupe"]);
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
        assert_eq!(cli.max_rounds, None);
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["troupe", "--port", "8080"]);
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn cli_custom_host() {
        let cli = Cli::parse_from(["troupe", "--host", "0.0.0.0"]);
        assert_eq!(cli.host, Some("0.0.0.0".to_string()));
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["troupe", "--config", "/tmp/custom.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/custom.json")));
    }

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 4000}, "gateway": {"model": "from-file"}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "troupe",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "5000",
            "--max-rounds",
            "7",
        ]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.server.port, 5000, "flag beats file");
        assert_eq!(settings.gateway.model, "from-file", "file beats default");
        assert_eq!(settings.engine.max_rounds, 7);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "troupe",
            "--config",
            dir.path().join("absent.json").to_str().unwrap(),
        ]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
    }
}
