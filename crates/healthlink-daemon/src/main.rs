//! Standalone health agent.
//!
//! Connects to a collector and answers host diagnostics commands until
//! interrupted:
//!   healthlink --app-name billing --server-url ws://collector:3000
//!   healthlink --config /etc/healthlink.toml --log-json

mod config;
mod provider;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use healthlink_client::{Agent, CapabilityProvider, Lifecycle};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::config::Overrides;
use crate::provider::HostProvider;

#[derive(Parser, Debug)]
#[command(name = "healthlink", about = "Health diagnostics agent")]
struct Cli {
    /// TOML config file
    #[arg(short, long, env = "HEALTHLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Application name reported to the collector
    #[arg(long, env = "HEALTHLINK_APP_NAME")]
    app_name: Option<String>,

    /// Collector address (ws:// or wss://)
    #[arg(long, env = "HEALTHLINK_SERVER_URL")]
    server_url: Option<String>,

    /// Auth token sent on upgrade
    #[arg(long, env = "HEALTHLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "HEALTHLINK_HEARTBEAT_DELAY_MS")]
    heartbeat_delay_ms: Option<u64>,

    #[arg(long, env = "HEALTHLINK_RECONNECT_DELAY_MS")]
    reconnect_delay_ms: Option<u64>,

    /// Environment tag included in the handshake
    #[arg(long = "env", env = "HEALTHLINK_ENV")]
    environment: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Start without the host metrics provider; commands are then ignored
    #[arg(long)]
    no_host_metrics: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            app_name: self.app_name.clone(),
            server_url: self.server_url.clone(),
            token: self.token.clone(),
            heartbeat_delay_ms: self.heartbeat_delay_ms,
            reconnect_delay_ms: self.reconnect_delay_ms,
            environment: self.environment.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("healthlink=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = config::resolve(cli.config.as_deref(), &cli.overrides())?;
    let provider: Option<Arc<dyn CapabilityProvider>> = if cli.no_host_metrics {
        None
    } else {
        Some(Arc::new(HostProvider::new()))
    };

    let agent = Agent::start(config, provider).context("failed to start agent")?;
    tracing::info!(
        app = %agent.config().app_name,
        server = %agent.config().server_url,
        "Health agent started"
    );

    let mut lifecycle = agent.lifecycle();
    let watcher = tokio::spawn(async move {
        loop {
            let event = match lifecycle.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Lifecycle events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                Lifecycle::Closed { attempt, reason } => {
                    tracing::debug!(attempt, ?reason, "Connection closed");
                }
                Lifecycle::Reconnecting { attempt, delay } => {
                    tracing::debug!(attempt, ?delay, "Reconnect scheduled");
                }
                Lifecycle::Destroyed => break,
                _ => {}
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    agent.destroy().await;
    let _ = watcher.await;
    Ok(())
}
