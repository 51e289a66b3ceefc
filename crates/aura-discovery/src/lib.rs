//! Peer-discovery transport
//!
//! Nodes in a process group announce themselves and exchange short event
//! messages over an unreliable datagram medium: local broadcast, multicast,
//! an explicit unicast peer list, or a shared pub/sub channel. Higher layers
//! (membership, leader election) consume the events; they are not part of
//! this crate.
//!
//! Delivery is best effort. There is no ordering, acknowledgment, retry or
//! fragmentation, and the only protection is optional shared-key
//! confidentiality.
//!
//! ```no_run
//! use aura_discovery::{Endpoint, EndpointConfig, EventKey, ProcessIdentity};
//!
//! # async fn run() -> Result<(), aura_discovery::TransportError> {
//! let identity = ProcessIdentity::generate();
//! let endpoint = Endpoint::new(EndpointConfig::default(), &identity);
//! endpoint.on(EventKey::named("hello"), |event| println!("{event:?}"));
//! endpoint.start().await?;
//! endpoint.send("hello", Some(serde_json::json!({"role": "worker"}))).await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod events;
pub mod filter;
pub mod identity;
pub mod socket;
pub mod transport;

pub use channel::{ChannelMessage, ChannelSubscription, MemoryChannel, SharedChannel};
pub use codec::{Codec, CodecStats};
pub use config::{EndpointConfig, IvPolicy, UnicastTargets};
pub use crypto::SharedKey;
pub use endpoint::{Delivery, Endpoint};
pub use envelope::{Envelope, SenderInfo, ANNOUNCEMENT_EVENT};
pub use error::{DecodeError, EncodeError, TransportError, TransportResult};
pub use events::{EndpointEvent, EventKey, EventRegistry, Subscription};
pub use filter::{FilterVerdict, SelfFilter};
pub use identity::{InstanceId, ProcessId, ProcessIdentity};
pub use transport::TransportMode;
