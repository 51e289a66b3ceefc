//! Delivery mode selection
//!
//! Resolved once when an endpoint starts and fixed until it stops.
//! Precedence: unicast list, shared channel, multicast group, broadcast.

use crate::channel::SharedChannel;
use crate::config::{EndpointConfig, DEFAULT_CHANNEL, LIMITED_BROADCAST};
use crate::error::{TransportError, TransportResult};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Active delivery mechanism of an endpoint
#[derive(Clone)]
pub enum TransportMode {
    /// Datagrams to an explicit list of hosts
    Unicast(Vec<String>),
    /// Publish on a named pub/sub channel
    SharedChannel {
        /// Channel name
        name: String,
        /// Pub/sub backend
        backend: Arc<dyn SharedChannel>,
    },
    /// Datagrams to a broadcast address
    Broadcast(String),
    /// Datagrams to a joined multicast group
    Multicast {
        /// Group address
        group: Ipv4Addr,
        /// Outbound TTL
        ttl: u32,
    },
}

impl TransportMode {
    /// Pick the mode for `config`.
    ///
    /// `channel` is the shared-channel backend, if the embedding program
    /// supplied one. Naming a channel in the config without a backend is an
    /// error unless a unicast list takes precedence.
    pub fn resolve(
        config: &EndpointConfig,
        channel: Option<&Arc<dyn SharedChannel>>,
    ) -> TransportResult<Self> {
        if let Some(unicast) = &config.unicast {
            let hosts = unicast.normalize();
            if hosts.is_empty() {
                return Err(TransportError::invalid_config("unicast target list is empty"));
            }
            return Ok(Self::Unicast(hosts));
        }

        match (channel, &config.channel) {
            (Some(backend), name) => {
                return Ok(Self::SharedChannel {
                    name: name.clone().unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
                    backend: backend.clone(),
                });
            }
            (None, Some(name)) => {
                return Err(TransportError::invalid_config(format!(
                    "shared channel '{name}' configured without a backend"
                )));
            }
            (None, None) => {}
        }

        match &config.multicast {
            Some(group) => {
                let group = group.parse::<Ipv4Addr>().map_err(|_| {
                    TransportError::invalid_config(format!("invalid multicast group: {group}"))
                })?;
                Ok(Self::Multicast {
                    group,
                    ttl: config.multicast_ttl,
                })
            }
            None => Ok(Self::Broadcast(
                config
                    .broadcast
                    .clone()
                    .unwrap_or_else(|| LIMITED_BROADCAST.to_string()),
            )),
        }
    }

    /// Hosts datagrams are sent to. Empty for the shared channel.
    pub fn destinations(&self) -> Vec<String> {
        match self {
            Self::Unicast(hosts) => hosts.clone(),
            Self::SharedChannel { .. } => Vec::new(),
            Self::Broadcast(address) => vec![address.clone()],
            Self::Multicast { group, .. } => vec![group.to_string()],
        }
    }

    /// Short mode name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unicast(_) => "unicast",
            Self::SharedChannel { .. } => "shared-channel",
            Self::Broadcast(_) => "broadcast",
            Self::Multicast { .. } => "multicast",
        }
    }
}

impl fmt::Debug for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unicast(hosts) => f.debug_tuple("Unicast").field(hosts).finish(),
            Self::SharedChannel { name, backend } => f
                .debug_struct("SharedChannel")
                .field("name", name)
                .field("backend", &backend.backend_name())
                .finish(),
            Self::Broadcast(address) => f.debug_tuple("Broadcast").field(address).finish(),
            Self::Multicast { group, ttl } => f
                .debug_struct("Multicast")
                .field("group", group)
                .field("ttl", ttl)
                .finish(),
        }
    }
}
