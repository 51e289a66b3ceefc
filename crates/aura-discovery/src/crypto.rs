//! Pre-shared-key confidentiality for discovery datagrams
//!
//! AES-256 in CTR mode with a 128-bit big-endian counter. An encrypted frame
//! is ASCII text: `<32 hex chars of IV>:<hex ciphertext>`. There is no
//! authentication tag; a frame sealed under another key decrypts to noise and
//! is rejected when the plaintext fails to parse.

use crate::error::{DecodeError, EncodeError};
use crate::identity::IV_LEN;
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Key length in bytes
pub const KEY_LEN: usize = 32;

/// 256-bit pre-shared key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_LEN]);

impl SharedKey {
    /// Derive the key from configured text: UTF-8 bytes, zero-padded or
    /// truncated to 32 bytes.
    pub fn from_text(text: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        let bytes = text.as_bytes();
        let len = bytes.len().min(KEY_LEN);
        key[..len].copy_from_slice(&bytes[..len]);
        Self(key)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Draw a fresh random IV
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Encrypt `plaintext` and render the `iv:ciphertext` frame
pub fn seal(key: &SharedKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<String, EncodeError> {
    let mut cipher = Aes256Ctr::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| EncodeError::Cipher(format!("cipher setup failed: {e}")))?;
    let mut buffer = plaintext.to_vec();
    cipher.apply_keystream(&mut buffer);
    Ok(format!("{}:{}", hex::encode(iv), hex::encode(buffer)))
}

/// Parse an `iv:ciphertext` frame and decrypt it
pub fn open(key: &SharedKey, frame: &str) -> Result<Vec<u8>, DecodeError> {
    let (iv_hex, cipher_hex) = frame
        .split_once(':')
        .ok_or(DecodeError::MissingSeparator)?;
    let iv = hex::decode(iv_hex)?;
    if iv.len() != IV_LEN {
        return Err(DecodeError::Cipher(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    let mut buffer = hex::decode(cipher_hex)?;
    let mut cipher = Aes256Ctr::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| DecodeError::Cipher(format!("cipher setup failed: {e}")))?;
    cipher.apply_keystream(&mut buffer);
    Ok(buffer)
}
