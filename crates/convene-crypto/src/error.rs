//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from derivation, encryption and chain operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD tag verification failed (wrong key or tampered ciphertext)
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Ciphertext blob is too short to contain a nonce and tag
    #[error("malformed ciphertext: {len} bytes is shorter than nonce and tag")]
    MalformedCiphertext {
        /// Length of the rejected blob
        len: usize,
    },

    /// Argon2 rejected its parameters or inputs
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// A hash chain needs at least one round
    #[error("invalid chain length: {rounds} rounds")]
    InvalidRounds {
        /// Requested number of rounds
        rounds: usize,
    },
}

impl CryptoError {
    /// Returns true if this error indicates the input was produced under a
    /// different key or was tampered with.
    ///
    /// During discovery this is the expected outcome for most candidates and
    /// is never surfaced to the user.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failure_is_detected() {
        assert!(CryptoError::AuthenticationFailure.is_authentication_failure());
        assert!(!CryptoError::MalformedCiphertext { len: 3 }.is_authentication_failure());
    }

    #[test]
    fn error_display() {
        let err = CryptoError::MalformedCiphertext { len: 12 };
        assert_eq!(err.to_string(), "malformed ciphertext: 12 bytes is shorter than nonce and tag");

        let err = CryptoError::InvalidRounds { rounds: 0 };
        assert_eq!(err.to_string(), "invalid chain length: 0 rounds");
    }
}
