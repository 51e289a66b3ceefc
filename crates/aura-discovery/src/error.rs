//! Discovery transport errors
//!
//! Three families, matching where a failure can happen:
//! - [`EncodeError`]: building the outbound datagram. The send is dropped.
//! - [`DecodeError`]: interpreting an inbound datagram. The datagram is
//!   dropped; on a shared medium with mixed keys this is routine noise.
//! - [`TransportError`]: socket and channel lifecycle. Surfaced to the caller
//!   of `start` and through the `Error` event.

use std::io;
use thiserror::Error;

/// Failure while encoding an envelope for the wire
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Envelope could not be rendered as JSON
    #[error("envelope serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Cipher rejected the configured key or IV
    #[error("encryption failed: {0}")]
    Cipher(String),
}

/// Failure while decoding an inbound datagram
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Datagram is not valid UTF-8 text
    #[error("datagram is not UTF-8 text")]
    NotText,

    /// Encrypted frame is missing the `iv:ciphertext` separator
    #[error("encrypted frame has no IV separator")]
    MissingSeparator,

    /// IV or ciphertext is not valid hex
    #[error("invalid hex in encrypted frame: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Cipher setup or decryption failed
    #[error("decryption failed: {0}")]
    Cipher(String),

    /// Plaintext is not a well-formed envelope
    #[error("malformed envelope: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Socket, channel, and lifecycle failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// Binding the local socket failed
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address the endpoint tried to bind
        address: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Joining the multicast group failed (typically no usable interface)
    #[error("failed to join multicast group {group}: {source}")]
    MulticastJoin {
        /// Multicast group address
        group: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Other socket option or I/O failure
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// Shared-channel backend failure
    #[error("shared channel error: {0}")]
    Channel(String),

    /// Configuration cannot be used as given
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// Operation not valid in the endpoint's current state
    #[error("invalid endpoint state: {0}")]
    InvalidState(String),
}

impl TransportError {
    /// Create a configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Create a shared-channel error
    pub fn channel(reason: impl Into<String>) -> Self {
        Self::Channel(reason.into())
    }
}

/// Result alias for transport lifecycle operations
pub type TransportResult<T> = Result<T, TransportError>;
