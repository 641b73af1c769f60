//! Configuration loading: TOML file, then CLI / environment overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use healthlink_client::AgentConfig;

/// Values given on the command line or through `HEALTHLINK_*` variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub app_name: Option<String>,
    pub server_url: Option<String>,
    pub token: Option<String>,
    pub heartbeat_delay_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub environment: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(app_name) = &self.app_name {
            config.app_name.clone_from(app_name);
        }
        if let Some(server_url) = &self.server_url {
            config.server_url.clone_from(server_url);
        }
        if self.token.is_some() {
            config.token.clone_from(&self.token);
        }
        if let Some(ms) = self.heartbeat_delay_ms {
            config.heartbeat_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.auto_reconnect_delay = Duration::from_millis(ms);
        }
        if self.environment.is_some() {
            config.environment.clone_from(&self.environment);
        }
    }
}

/// Read the optional config file and layer `overrides` on top.
pub fn resolve(file: Option<&Path>, overrides: &Overrides) -> anyhow::Result<AgentConfig> {
    let mut config = match file {
        Some(path) => load(path)?,
        None => AgentConfig::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}

fn load(path: &Path) -> anyhow::Result<AgentConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: AgentConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}
