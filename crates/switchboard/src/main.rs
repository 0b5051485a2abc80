//! # switchboard
//!
//! Server binary: loads settings, initializes logging and metrics, picks a
//! credential verifier and runs the listener until a shutdown signal.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use switchboard_auth::{HttpTokenVerifier, StaticTokenVerifier, TokenVerifier};
use switchboard_server::{ServerConfig, SwitchboardServer};
use switchboard_settings::{AuthSettings, SwitchboardSettings, VerifierKind};
use tokio::net::TcpListener;

/// Switchboard connection and event-routing server.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Real-time connection and event routing server")]
struct Cli {
    /// Settings file (default `~/.switchboard/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn apply(&self, settings: &mut SwitchboardSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

/// Build the verifier named by the auth settings.
fn build_verifier(auth: &AuthSettings) -> Result<Arc<dyn TokenVerifier>> {
    match auth.verifier {
        VerifierKind::Static => {
            let verifier = StaticTokenVerifier::new(
                auth.static_tokens
                    .iter()
                    .map(|(token, user)| (token.as_str(), user.as_str())),
            );
            if verifier.is_empty() {
                tracing::warn!("static verifier has no tokens; every handshake will be rejected");
            }
            Ok(Arc::new(verifier))
        }
        VerifierKind::Http => {
            let Some(url) = auth.verify_url.as_deref() else {
                bail!("auth.verifyUrl is required for the http verifier");
            };
            let verifier = HttpTokenVerifier::new(url, Duration::from_millis(auth.timeout_ms))
                .context("Failed to build HTTP token verifier")?;
            Ok(Arc::new(verifier))
        }
    }
}

/// Resolve when ctrl-c or SIGTERM arrives.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(switchboard_settings::settings_path);
    let mut settings = switchboard_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    switchboard_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let verifier = build_verifier(&settings.auth)?;
    let config = ServerConfig::from_settings(&settings);
    let mut server = SwitchboardServer::new(config, verifier);
    match switchboard_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(error) => tracing::warn!(%error, "metrics recorder unavailable"),
    }
    let server = Arc::new(server);

    let bind_addr = server.config().bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;

    tracing::info!(
        addr = %local_addr,
        ws_path = %server.config().ws_path,
        gateway = server.config().gateway_addr.as_deref().unwrap_or("disabled"),
        verifier = ?settings.auth.verifier,
        "switchboard listening"
    );

    let serving = Arc::clone(&server);
    let handle = tokio::spawn(async move { serving.serve(listener).await });

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(vec![handle], None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
