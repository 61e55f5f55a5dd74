//! Sealing of short registry strings such as party contact info.
//!
//! A [`SealKey`] is derived from an owner name with Blake3 in derive-key mode.
//! Sealed text is ChaCha20-Poly1305 ciphertext under a random nonce, carried
//! as hex `nonce || ciphertext` so it can travel through string-typed ledger
//! fields.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

const NONCE_LEN: usize = 12;

/// A 256-bit symmetric key for sealing registry strings.
#[derive(Clone)]
pub struct SealKey([u8; 32]);

impl SealKey {
    /// Derive the sealing key for an owner.
    pub fn derive(owner: &str) -> Self {
        Self(blake3::derive_key("anchorline-seal-v0 contact", owner.as_bytes()))
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Seal `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<SealedText, CoreError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CoreError::SealError(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CoreError::SealError(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(SealedText(hex::encode(sealed)))
    }

    /// Open sealed text. Fails if the key is wrong or the text was altered.
    pub fn open(&self, sealed: &SealedText) -> Result<String, CoreError> {
        let raw = hex::decode(&sealed.0).map_err(|_| CoreError::OpenFailed)?;
        if raw.len() < NONCE_LEN {
            return Err(CoreError::OpenFailed);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CoreError::SealError(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::OpenFailed)?;

        String::from_utf8(plaintext).map_err(|_| CoreError::OpenFailed)
    }
}

impl fmt::Debug for SealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealKey(..)")
    }
}

/// Hex-encoded `nonce || ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedText(pub String);

impl SealedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SealedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
