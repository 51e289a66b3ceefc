//! Envelope codec
//!
//! Serializes envelopes to JSON and optionally seals them with the
//! pre-shared key. Announcements get special treatment on both sides:
//!
//! - Sender: the first encoded announcement is kept and returned verbatim
//!   for every later announcement, whatever its payload. Announcements are
//!   expected to be static for the life of the process.
//! - Receiver: per sender address, the latest raw announcement of each
//!   instance is remembered so byte-identical repeats skip decryption and
//!   parsing.
//!
//! Both caches live as long as the codec. There is no eviction.

use crate::config::IvPolicy;
use crate::crypto::{self, SharedKey};
use crate::envelope::{Envelope, SenderInfo};
use crate::error::{DecodeError, EncodeError};
use crate::identity::IV_LEN;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct CachedAnnouncement {
    raw: Vec<u8>,
    decoded: Envelope,
}

/// Counters describing codec work, mainly for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    /// Envelopes serialized (and encrypted) from scratch
    pub encodes: u64,
    /// Announcement encodes answered from the sender cache
    pub announcement_reuses: u64,
    /// Datagrams fully decrypted and parsed
    pub full_decodes: u64,
    /// Datagrams answered from the receiver cache
    pub cache_hits: u64,
}

#[derive(Debug, Default)]
struct Counters {
    encodes: AtomicU64,
    announcement_reuses: AtomicU64,
    full_decodes: AtomicU64,
    cache_hits: AtomicU64,
}

/// Wire codec with optional encryption and announcement caches
#[derive(Debug)]
pub struct Codec {
    key: Option<SharedKey>,
    iv_policy: IvPolicy,
    process_iv: [u8; IV_LEN],
    announcement: Mutex<Option<Vec<u8>>>,
    received: Mutex<HashMap<String, Vec<CachedAnnouncement>>>,
    counters: Counters,
}

impl Codec {
    /// Create a codec.
    ///
    /// `process_iv` is only used under [`IvPolicy::ProcessFixed`].
    pub fn new(key: Option<SharedKey>, iv_policy: IvPolicy, process_iv: [u8; IV_LEN]) -> Self {
        Self {
            key,
            iv_policy,
            process_iv,
            announcement: Mutex::new(None),
            received: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Codec without encryption
    pub fn plaintext() -> Self {
        Self::new(None, IvPolicy::default(), [0u8; IV_LEN])
    }

    /// Whether a pre-shared key is configured
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Encode an envelope into datagram bytes
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
        if !envelope.is_announcement() {
            return self.encode_fresh(envelope);
        }

        let mut cached = self.announcement.lock();
        if let Some(bytes) = cached.as_ref() {
            self.counters
                .announcement_reuses
                .fetch_add(1, Ordering::Relaxed);
            return Ok(bytes.clone());
        }
        let bytes = self.encode_fresh(envelope)?;
        *cached = Some(bytes.clone());
        Ok(bytes)
    }

    fn encode_fresh(&self, envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
        let text = serde_json::to_string(envelope)?;
        self.counters.encodes.fetch_add(1, Ordering::Relaxed);

        match &self.key {
            Some(key) => {
                let iv = match self.iv_policy {
                    IvPolicy::PerMessage => crypto::random_iv(),
                    IvPolicy::ProcessFixed => self.process_iv,
                };
                Ok(crypto::seal(key, &iv, text.as_bytes())?.into_bytes())
            }
            None => Ok(text.into_bytes()),
        }
    }

    /// Decode datagram bytes received from `sender`
    pub fn decode(&self, raw: &[u8], sender: &SenderInfo) -> Result<Envelope, DecodeError> {
        let cache_key = sender.cache_key();

        if let Some(hit) = self.cached(&cache_key, raw) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        self.counters.full_decodes.fetch_add(1, Ordering::Relaxed);
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotText)?;
        let envelope: Envelope = match &self.key {
            Some(key) => serde_json::from_slice(&crypto::open(key, text)?)?,
            None => serde_json::from_str(text)?,
        };

        if envelope.is_announcement() {
            let mut received = self.received.lock();
            let entries = received.entry(cache_key).or_default();
            entries.retain(|entry| entry.decoded.iid != envelope.iid);
            entries.push(CachedAnnouncement {
                raw: raw.to_vec(),
                decoded: envelope.clone(),
            });
        }

        Ok(envelope)
    }

    fn cached(&self, cache_key: &str, raw: &[u8]) -> Option<Envelope> {
        self.received.lock().get(cache_key).and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.raw == raw)
                .map(|entry| entry.decoded.clone())
        })
    }

    /// Number of announcement entries remembered for `sender`
    pub fn cached_announcements(&self, sender: &SenderInfo) -> usize {
        self.received
            .lock()
            .get(&sender.cache_key())
            .map_or(0, Vec::len)
    }

    /// Snapshot of the work counters
    pub fn stats(&self) -> CodecStats {
        CodecStats {
            encodes: self.counters.encodes.load(Ordering::Relaxed),
            announcement_reuses: self.counters.announcement_reuses.load(Ordering::Relaxed),
            full_decodes: self.counters.full_decodes.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ANNOUNCEMENT_EVENT;
    use crate::identity::{InstanceId, ProcessId};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn keyed(key: &str, policy: IvPolicy) -> Codec {
        Codec::new(Some(SharedKey::from_text(key)), policy, [3u8; IV_LEN])
    }

    fn sender(port: u16) -> SenderInfo {
        SenderInfo {
            address: "192.168.1.20".to_string(),
            port,
            size: 0,
        }
    }

    fn announcement(iid: InstanceId, data: serde_json::Value) -> Envelope {
        Envelope::new(ANNOUNCEMENT_EVENT, ProcessId::generate(), iid, "peer").with_data(data)
    }

    #[test]
    fn test_round_trip_plain_and_encrypted() {
        let envelope = Envelope::new("job", ProcessId::generate(), InstanceId::generate(), "h")
            .with_data(json!({"task": 42}));

        let plain = Codec::plaintext();
        let bytes = plain.encode(&envelope).unwrap();
        assert!(bytes.starts_with(b"{"));
        assert_eq!(plain.decode(&bytes, &sender(1)).unwrap(), envelope);

        let sealed = keyed("secret", IvPolicy::PerMessage);
        let bytes = sealed.encode(&envelope).unwrap();
        assert!(!bytes.starts_with(b"{"));
        assert_eq!(sealed.decode(&bytes, &sender(1)).unwrap(), envelope);
    }

    #[test]
    fn test_wrong_key_is_a_decode_error() {
        let envelope = Envelope::new("job", ProcessId::generate(), InstanceId::generate(), "h");
        let bytes = keyed("k1", IvPolicy::PerMessage).encode(&envelope).unwrap();
        assert!(keyed("k2", IvPolicy::PerMessage)
            .decode(&bytes, &sender(1))
            .is_err());
        assert!(Codec::plaintext().decode(&bytes, &sender(1)).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let codec = Codec::plaintext();
        assert_matches!(codec.decode(&[0xff, 0xfe], &sender(1)), Err(DecodeError::NotText));
        assert_matches!(codec.decode(b"{\"event\":", &sender(1)), Err(DecodeError::Parse(_)));
    }

    #[test]
    fn test_iv_policies() {
        let envelope = Envelope::new("job", ProcessId::generate(), InstanceId::generate(), "h");

        let fixed = keyed("secret", IvPolicy::ProcessFixed);
        let a = fixed.encode(&envelope).unwrap();
        let b = fixed.encode(&envelope).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(hex::encode([3u8; IV_LEN]).as_bytes()));

        let fresh = keyed("secret", IvPolicy::PerMessage);
        let a = fresh.encode(&envelope).unwrap();
        let b = fresh.encode(&envelope).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_announcement_is_frozen_on_first_encode() {
        let codec = keyed("secret", IvPolicy::PerMessage);
        let iid = InstanceId::generate();

        let first = codec.encode(&announcement(iid, json!({"v": 1}))).unwrap();
        let second = codec.encode(&announcement(iid, json!({"v": 2}))).unwrap();
        assert_eq!(first, second);

        let decoded = codec.decode(&second, &sender(1)).unwrap();
        assert_eq!(decoded.data, Some(json!({"v": 1})));

        let stats = codec.stats();
        assert_eq!(stats.encodes, 1);
        assert_eq!(stats.announcement_reuses, 1);
    }

    #[test]
    fn test_repeat_announcement_skips_decoding() {
        let remote = keyed("secret", IvPolicy::PerMessage);
        let local = keyed("secret", IvPolicy::PerMessage);
        let bytes = remote
            .encode(&announcement(InstanceId::generate(), json!("x")))
            .unwrap();

        let first = local.decode(&bytes, &sender(9)).unwrap();
        let second = local.decode(&bytes, &sender(9)).unwrap();
        assert_eq!(first, second);

        let stats = local.stats();
        assert_eq!(stats.full_decodes, 1);
        assert_eq!(stats.cache_hits, 1);

        // Same bytes from another port is another sender
        local.decode(&bytes, &sender(10)).unwrap();
        assert_eq!(local.stats().full_decodes, 2);
    }

    #[test]
    fn test_receiver_cache_replaces_per_instance() {
        let codec = Codec::plaintext();
        let from = sender(5);
        let a = InstanceId::generate();
        let b = InstanceId::generate();

        let a1 = serde_json::to_vec(&announcement(a, json!(1))).unwrap();
        let a2 = serde_json::to_vec(&announcement(a, json!(2))).unwrap();
        let b1 = serde_json::to_vec(&announcement(b, json!(1))).unwrap();

        codec.decode(&a1, &from).unwrap();
        codec.decode(&b1, &from).unwrap();
        assert_eq!(codec.cached_announcements(&from), 2);

        codec.decode(&a2, &from).unwrap();
        assert_eq!(codec.cached_announcements(&from), 2);

        // a1 was replaced by a2, so it must be parsed again
        let before = codec.stats().full_decodes;
        codec.decode(&a1, &from).unwrap();
        assert_eq!(codec.stats().full_decodes, before + 1);
    }

    #[test]
    fn test_ordinary_events_are_not_cached() {
        let codec = Codec::plaintext();
        let envelope = Envelope::new("job", ProcessId::generate(), InstanceId::generate(), "h");
        let bytes = codec.encode(&envelope).unwrap();

        codec.decode(&bytes, &sender(1)).unwrap();
        codec.decode(&bytes, &sender(1)).unwrap();
        assert_eq!(codec.cached_announcements(&sender(1)), 0);
        assert_eq!(codec.stats().full_decodes, 2);
        assert_eq!(codec.stats().cache_hits, 0);
    }
}
