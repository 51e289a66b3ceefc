//! Process and instance identity
//!
//! Every endpoint carries two identifiers: one shared by all endpoints in the
//! same OS process, and one unique to the endpoint itself. The process-wide
//! values live in [`ProcessIdentity`], which the embedding program generates
//! once at startup and hands to each endpoint it builds.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of the AES-CTR initialization vector in bytes
pub const IV_LEN: usize = 16;

/// Identifier shared by every endpoint in one OS process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(Uuid);

impl ProcessId {
    /// Generate a fresh random process identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier unique to one endpoint instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a fresh random instance identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Values computed once per OS process and shared by all its endpoints
#[derive(Debug, Clone)]
pub struct ProcessIdentity {
    process_id: ProcessId,
    cipher_iv: [u8; IV_LEN],
}

impl ProcessIdentity {
    /// Generate the identity for this process.
    ///
    /// Call once at startup and clone the result into each endpoint.
    pub fn generate() -> Self {
        let mut cipher_iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut cipher_iv);
        Self {
            process_id: ProcessId::generate(),
            cipher_iv,
        }
    }

    /// Build an identity from known parts (tests, replay)
    pub fn from_parts(process_id: ProcessId, cipher_iv: [u8; IV_LEN]) -> Self {
        Self {
            process_id,
            cipher_iv,
        }
    }

    /// Identifier shared by all endpoints in this process
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// IV reused for every message under [`crate::config::IvPolicy::ProcessFixed`]
    pub fn cipher_iv(&self) -> &[u8; IV_LEN] {
        &self.cipher_iv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_differ() {
        let a = ProcessIdentity::generate();
        let b = ProcessIdentity::generate();
        assert_ne!(a.process_id(), b.process_id());
        assert_ne!(InstanceId::generate(), InstanceId::generate());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let uuid = Uuid::new_v4();
        let pid = ProcessId::from_uuid(uuid);
        let json = serde_json::to_string(&pid).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));

        let iid: InstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(iid.as_uuid(), &uuid);
    }
}
