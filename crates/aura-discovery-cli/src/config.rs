//! CLI configuration: TOML file first, then command-line overrides

use anyhow::{Context, Result};
use aura_discovery::{EndpointConfig, UnicastTargets};
use clap::Args;
use std::path::Path;

/// Endpoint settings that can be given on the command line
#[derive(Args, Debug, Clone, Default)]
pub struct EndpointArgs {
    /// Local bind address
    #[arg(long)]
    pub address: Option<String>,

    /// Local bind port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Port to send to, if different from the bind port
    #[arg(long)]
    pub destination_port: Option<u16>,

    /// Broadcast address
    #[arg(long)]
    pub broadcast: Option<String>,

    /// Multicast group to join
    #[arg(long)]
    pub multicast: Option<String>,

    /// Multicast TTL
    #[arg(long)]
    pub ttl: Option<u32>,

    /// Comma-separated unicast peers
    #[arg(long)]
    pub unicast: Option<String>,

    /// Pre-shared encryption key
    #[arg(long, env = "DISCOVERY_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Advertised hostname
    #[arg(long)]
    pub hostname: Option<String>,

    /// Do not set SO_REUSEADDR
    #[arg(long)]
    pub no_reuse_addr: bool,

    /// Deliver messages from other endpoints in this process
    #[arg(long)]
    pub include_own_process: bool,

    /// Deliver this endpoint's own messages
    #[arg(long)]
    pub include_own_instance: bool,
}

impl EndpointArgs {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, mut config: EndpointConfig) -> EndpointConfig {
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port) = self.destination_port {
            config.destination_port = Some(port);
        }
        if let Some(broadcast) = &self.broadcast {
            config.broadcast = Some(broadcast.clone());
        }
        if let Some(group) = &self.multicast {
            config.multicast = Some(group.clone());
        }
        if let Some(ttl) = self.ttl {
            config.multicast_ttl = ttl;
        }
        if let Some(unicast) = &self.unicast {
            config.unicast = Some(UnicastTargets::from(unicast.as_str()));
        }
        if let Some(key) = &self.key {
            config.key = Some(key.clone());
        }
        if let Some(hostname) = &self.hostname {
            config.host_name = Some(hostname.clone());
        }
        if self.no_reuse_addr {
            config.reuse_addr = false;
        }
        if self.include_own_process {
            config.ignore_process = false;
        }
        if self.include_own_instance {
            config.ignore_instance = false;
        }
        config
    }
}

/// Load the config file if it exists, else start from defaults
pub fn load_config(path: &Path) -> Result<EndpointConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(EndpointConfig::default());
    }
    EndpointConfig::load(path).with_context(|| format!("loading {}", path.display()))
}
