//! Device signer abstraction.
//!
//! On a phone the signing key lives in the platform keystore and signing is
//! asynchronous. The ledger only needs `sign(hash)` and the public key; every
//! signature is verified locally before anything is published. The software
//! [`Ed25519Signer`] backs tests and the command-line driver.

use std::fmt;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};

use crate::{env::Environment, error::ConveneError};

/// Produces signatures over block hashes.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Public key the signatures verify against.
    fn public_key_bytes(&self) -> Vec<u8>;

    /// Sign a 32-byte block hash.
    async fn sign(&self, hash: &[u8]) -> Result<Vec<u8>, ConveneError>;

    /// Check `signature` over `hash` against `public_key`.
    fn verify(&self, signature: &[u8], public_key: &[u8], hash: &[u8]) -> bool {
        verify_signature(signature, public_key, hash)
    }
}

/// Ed25519 verification of `signature` over `hash`.
///
/// Malformed keys or signatures verify as `false`.
pub fn verify_signature(signature: &[u8], public_key: &[u8], hash: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };

    key.verify(hash, &signature).is_ok()
}

/// Software Ed25519 signer.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Signer from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(&seed) }
    }

    /// Signer with a fresh key from the environment's RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        Self::from_seed(env.random_array())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &hex::encode(self.key.verifying_key().to_bytes()))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    fn public_key_bytes(&self) -> Vec<u8> {
        self.key.verifying_key().to_bytes().to_vec()
    }

    async fn sign(&self, hash: &[u8]) -> Result<Vec<u8>, ConveneError> {
        Ok(self.key.sign(hash).to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signature_verifies() {
        let signer = Ed25519Signer::from_seed([7; 32]);
        let hash = [1u8; 32];

        let signature = signer.sign(&hash).await.unwrap();

        assert_eq!(signature.len(), 64);
        assert!(signer.verify(&signature, &signer.public_key_bytes(), &hash));
    }

    #[tokio::test]
    async fn wrong_hash_or_key_fails() {
        let signer = Ed25519Signer::from_seed([7; 32]);
        let other = Ed25519Signer::from_seed([8; 32]);
        let signature = signer.sign(&[1u8; 32]).await.unwrap();

        assert!(!verify_signature(&signature, &signer.public_key_bytes(), &[2u8; 32]));
        assert!(!verify_signature(&signature, &other.public_key_bytes(), &[1u8; 32]));
    }

    #[test]
    fn malformed_inputs_do_not_verify() {
        let signer = Ed25519Signer::from_seed([7; 32]);

        assert!(!verify_signature(&[0u8; 10], &signer.public_key_bytes(), &[1u8; 32]));
        assert!(!verify_signature(&[0u8; 64], &[0u8; 5], &[1u8; 32]));
    }

    #[test]
    fn debug_shows_only_public_key() {
        let signer = Ed25519Signer::from_seed([7; 32]);
        let debug = format!("{signer:?}");

        assert!(debug.contains(&hex::encode(signer.public_key_bytes())));
        assert!(!debug.contains(&hex::encode([7u8; 32])));
    }
}
