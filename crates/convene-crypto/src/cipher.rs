//! Payload encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - nonces must be provided by the caller. The nonce
//! travels with the ciphertext:
//!
//! ```text
//! blob = nonce (24) || ciphertext || tag (16)
//! ```

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CryptoError, kdf::SymmetricKey};

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// An encrypted payload with the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherBlob {
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl CipherBlob {
    /// Serialize as `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse a serialized blob.
    ///
    /// # Errors
    ///
    /// - `MalformedCiphertext` if the blob cannot hold a nonce and a tag
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext { len: bytes.len() });
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self { nonce, ciphertext: ciphertext.to_vec() })
    }

    /// Hex encoding of the serialized blob, as published.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}

/// Encrypt a payload.
///
/// # Security
///
/// - Caller MUST provide a fresh nonce from a cryptographically secure RNG
///   for every call; 24-byte random nonces make collisions negligible
/// - Authenticated encryption prevents tampering
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8], nonce: [u8; NONCE_SIZE]) -> CipherBlob {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    CipherBlob { nonce, ciphertext }
}

/// Decrypt a payload.
///
/// Fails closed: no plaintext is returned unless the tag verifies.
///
/// # Errors
///
/// - `AuthenticationFailure`: wrong key or tampered ciphertext
pub fn decrypt(key: &SymmetricKey, blob: &CipherBlob) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XNonce::from_slice(&blob.nonce);

    cipher.decrypt(nonce, blob.ciphertext.as_slice()).map_err(|_| CryptoError::AuthenticationFailure)
}

/// Parse and decrypt a serialized blob.
///
/// # Errors
///
/// - `MalformedCiphertext`: blob too short
/// - `AuthenticationFailure`: wrong key or tampered ciphertext
pub fn decrypt_bytes(key: &SymmetricKey, bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    decrypt(key, &CipherBlob::from_bytes(bytes)?)
}
