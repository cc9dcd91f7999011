//! podwatchd.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use podwatch_health::{TlsSettings, WatchConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of this node in the reality store; also the probe host.
    pub node_name: String,
    /// Directory holding the state database.
    pub data_dir: PathBuf,
    /// Port for the operator API.
    pub api_port: u16,
    pub watch: WatchConfig,
    pub tls: TlsSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: std::env::var("HOSTNAME").unwrap_or_default(),
            data_dir: PathBuf::from("/var/lib/podwatch"),
            api_port: 8787,
            watch: WatchConfig::default(),
            tls: TlsSettings::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_name.trim().is_empty() {
            anyhow::bail!("node_name is required (set it in the config, --node-name, or HOSTNAME)");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("podwatch.redb")
    }
}
