//! Shared pub/sub channel capability
//!
//! Endpoints in shared-channel mode publish encoded envelopes to a named
//! channel and receive the same bytes through a subscription. The backend
//! (a message broker, typically) is supplied by the embedding program.
//! [`MemoryChannel`] is an in-process backend for tests and local demos.

use crate::envelope::SenderInfo;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Message delivered by a shared-channel subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Encoded envelope bytes, exactly as published
    pub bytes: Vec<u8>,
    /// Publisher as reported by the backend
    pub origin: SenderInfo,
}

/// Stream of messages for one channel subscription
pub type ChannelSubscription = mpsc::UnboundedReceiver<ChannelMessage>;

/// Publish/subscribe capability consumed by shared-channel endpoints
#[async_trait]
pub trait SharedChannel: Send + Sync {
    /// Publish encoded bytes on `channel`
    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> TransportResult<()>;

    /// Subscribe to `channel`. Dropping the receiver ends the subscription.
    async fn subscribe(&self, channel: &str) -> TransportResult<ChannelSubscription>;

    /// Backend identifier for logs
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct ChannelRegistry {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<ChannelMessage>>>,
}

/// In-process shared channel.
///
/// Clones made with [`MemoryChannel::with_origin`] share the same channels
/// but report a different publisher, so several endpoints can look like
/// distinct senders.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    registry: Arc<Mutex<ChannelRegistry>>,
    origin: SenderInfo,
}

impl MemoryChannel {
    /// Create an empty in-memory channel hub
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(ChannelRegistry::default())),
            origin: SenderInfo {
                address: "memory".to_string(),
                port: 0,
                size: 0,
            },
        }
    }

    /// Handle on the same hub that publishes as `address`
    pub fn with_origin(&self, address: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            origin: SenderInfo {
                address: address.into(),
                port: 0,
                size: 0,
            },
        }
    }

    /// Live subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.registry
            .lock()
            .subscribers
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|s| !s.is_closed()).count())
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedChannel for MemoryChannel {
    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> TransportResult<()> {
        let origin = SenderInfo {
            size: bytes.len(),
            ..self.origin.clone()
        };
        let mut registry = self.registry.lock();
        if let Some(subscribers) = registry.subscribers.get_mut(channel) {
            subscribers.retain(|tx| {
                tx.send(ChannelMessage {
                    bytes: bytes.clone(),
                    origin: origin.clone(),
                })
                .is_ok()
            });
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> TransportResult<ChannelSubscription> {
        if channel.is_empty() {
            return Err(TransportError::channel("channel name must not be empty"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .lock()
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let hub = MemoryChannel::new();
        let mut a = hub.subscribe("discovery").await.unwrap();
        let mut b = hub.subscribe("discovery").await.unwrap();
        let mut other = hub.subscribe("elsewhere").await.unwrap();

        hub.with_origin("node-1")
            .publish("discovery", b"payload".to_vec())
            .await
            .unwrap();

        for rx in [&mut a, &mut b] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.bytes, b"payload");
            assert_eq!(msg.origin.address, "node-1");
            assert_eq!(msg.origin.size, 7);
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let hub = MemoryChannel::new();
        let rx = hub.subscribe("discovery").await.unwrap();
        assert_eq!(hub.subscriber_count("discovery"), 1);

        drop(rx);
        hub.publish("discovery", vec![1]).await.unwrap();
        assert_eq!(hub.subscriber_count("discovery"), 0);
    }

    #[tokio::test]
    async fn test_empty_channel_name_rejected() {
        let hub = MemoryChannel::new();
        assert!(hub.subscribe("").await.is_err());
    }
}
