//! Endpoint configuration
//!
//! Immutable once an endpoint is built. Every field is optional in TOML and
//! falls back to the defaults below.

use crate::error::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

/// Default bind address
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
/// Default bind and destination port
pub const DEFAULT_PORT: u16 = 12345;
/// Limited-broadcast address used when no broadcast address is configured
pub const LIMITED_BROADCAST: &str = "255.255.255.255";
/// Default multicast TTL
pub const DEFAULT_MULTICAST_TTL: u32 = 1;
/// Channel name used when a shared-channel backend is given without a name
pub const DEFAULT_CHANNEL: &str = "discovery";
/// Environment variable overriding the OS hostname
pub const HOSTNAME_ENV: &str = "DISCOVERY_HOSTNAME";

/// Unicast peers, written either as a list or as one comma-separated string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnicastTargets {
    /// Explicit list of hosts
    List(Vec<String>),
    /// Single string, possibly `"a,b,c"`
    Joined(String),
}

impl UnicastTargets {
    /// Flatten into a list of host strings.
    ///
    /// Comma-separated entries are split, whitespace is trimmed, and empty
    /// entries are dropped.
    pub fn normalize(&self) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Self::List(hosts) => hosts.iter().flat_map(|h| h.split(',')).collect(),
            Self::Joined(hosts) => hosts.split(',').collect(),
        };
        parts
            .into_iter()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl From<&str> for UnicastTargets {
    fn from(value: &str) -> Self {
        Self::Joined(value.to_string())
    }
}

impl From<Vec<String>> for UnicastTargets {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// How the AES-CTR initialization vector is chosen for outbound messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IvPolicy {
    /// Fresh random IV for every message
    #[default]
    PerMessage,
    /// One IV per process, reused for every message (legacy deployments)
    ProcessFixed,
}

/// Construction-time configuration of a discovery endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Local bind address
    pub address: String,
    /// Local bind port
    pub port: u16,
    /// Port datagrams are sent to (defaults to `port`)
    pub destination_port: Option<u16>,
    /// Broadcast address (defaults to the limited-broadcast address)
    pub broadcast: Option<String>,
    /// Multicast group to join
    pub multicast: Option<String>,
    /// Multicast time-to-live
    pub multicast_ttl: u32,
    /// Explicit unicast peers
    pub unicast: Option<UnicastTargets>,
    /// Shared-channel name
    pub channel: Option<String>,
    /// Pre-shared encryption key
    pub key: Option<String>,
    /// IV selection for encrypted messages
    pub iv_policy: IvPolicy,
    /// Set SO_REUSEADDR on the socket
    pub reuse_addr: bool,
    /// Drop messages from sibling endpoints in this process
    pub ignore_process: bool,
    /// Drop this endpoint's own loopback messages
    pub ignore_instance: bool,
    /// Display hostname advertised in every envelope
    pub host_name: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            destination_port: None,
            broadcast: None,
            multicast: None,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            unicast: None,
            channel: None,
            key: None,
            iv_policy: IvPolicy::default(),
            reuse_addr: true,
            ignore_process: true,
            ignore_instance: true,
            host_name: None,
        }
    }
}

impl EndpointConfig {
    /// Configuration bound to loopback on an ephemeral port, sending to
    /// `destination_port`
    pub fn loopback(destination_port: u16) -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 0,
            destination_port: Some(destination_port),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> TransportResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TransportError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> TransportResult<Self> {
        toml::from_str(text).map_err(|e| TransportError::invalid_config(e.to_string()))
    }

    /// Port outbound datagrams are addressed to
    pub fn destination_port(&self) -> u16 {
        self.destination_port.unwrap_or(self.port)
    }

    /// Resolve the advertised hostname: explicit value, then the
    /// `DISCOVERY_HOSTNAME` environment variable, then the OS hostname.
    pub fn resolved_host_name(&self) -> String {
        pick_host_name(
            self.host_name.as_deref(),
            std::env::var(HOSTNAME_ENV).ok(),
            hostname::get().ok().and_then(|h| h.into_string().ok()),
        )
    }

    /// Validate configuration settings
    pub fn validate(&self) -> TransportResult<()> {
        if self.destination_port() == 0 {
            return Err(TransportError::invalid_config(
                "destination port must be greater than 0",
            ));
        }

        if let Some(unicast) = &self.unicast {
            if unicast.normalize().is_empty() {
                return Err(TransportError::invalid_config(
                    "unicast target list is empty",
                ));
            }
        }

        if let Some(group) = &self.multicast {
            group.parse::<Ipv4Addr>().map_err(|_| {
                TransportError::invalid_config(format!("invalid multicast group: {group}"))
            })?;
            if self.multicast_ttl == 0 {
                return Err(TransportError::invalid_config(
                    "multicast_ttl must be greater than 0",
                ));
            }
        }

        Ok(())
    }
}

/// First non-empty candidate, falling back to `localhost`
fn pick_host_name(explicit: Option<&str>, env: Option<String>, os: Option<String>) -> String {
    explicit
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| env.filter(|name| !name.is_empty()))
        .or_else(|| os.filter(|name| !name.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}
