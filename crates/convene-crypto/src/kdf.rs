//! Memory-hard derivation of discovery material using Argon2id
//!
//! A shared secret from a proximity event may be as short as a 4-digit shake
//! pattern. Everything published from it goes through Argon2id so that a
//! broker holding the public hash cannot enumerate the secret space cheaply.
//!
//! Each derived value uses its own domain label in the salt:
//!
//! ```text
//! salt(label, digest) = SHA-256(label || digest)
//!
//! encryption key      = Argon2id(secret,  salt(ENCRYPTION_KEY_LABEL, digest))
//! public pattern hash = Argon2id(secret,  salt(PATTERN_HASH_LABEL, digest))
//! public user hash    = Argon2id(user_id, salt(USER_HASH_LABEL, digest))
//! ```
//!
//! Meeting secrets are high-entropy, so their payload key only needs HKDF.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Label for the discovery payload encryption key
const ENCRYPTION_KEY_LABEL: &[u8] = b"conveneEncryptionKeyV1";

/// Label for the published pattern hash
const PATTERN_HASH_LABEL: &[u8] = b"convenePatternHashV1";

/// Label for the published user hash
const USER_HASH_LABEL: &[u8] = b"conveneUserHashV1";

/// HKDF info for the meeting payload key
const MEETING_KEY_LABEL: &[u8] = b"conveneMeetingPayloadV1";

/// Size of every derived key and hash
pub const DERIVED_LEN: usize = 32;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism (lanes)
    pub parallelism: u32,
}

impl KdfParams {
    /// Interactive profile: 19 MiB, two passes, one lane.
    ///
    /// Takes a few hundred milliseconds on a phone-class CPU.
    pub const fn interactive() -> Self {
        Self { memory_kib: 19_456, iterations: 2, parallelism: 1 }
    }

    /// Minimal-cost profile for tests. Not for production use.
    pub const fn testing() -> Self {
        Self { memory_kib: 64, iterations: 1, parallelism: 1 }
    }

    fn argon2(&self) -> Result<Argon2<'static>, CryptoError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(DERIVED_LEN))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// A 256-bit symmetric key for XChaCha20-Poly1305.
///
/// Zeroized on drop. `Debug` never prints key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; DERIVED_LEN]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; DERIVED_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; DERIVED_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Material derived from a `(secret, digest)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedMaterial {
    encryption_key: SymmetricKey,
    public_pattern_hash: String,
}

impl DerivedMaterial {
    /// Key for encrypting and decrypting discovery payloads.
    pub fn encryption_key(&self) -> &SymmetricKey {
        &self.encryption_key
    }

    /// Hex-encoded hash published to the broker as `argon_pattern`.
    pub fn public_pattern_hash(&self) -> &str {
        &self.public_pattern_hash
    }
}

/// Derive the encryption key and public pattern hash for a shared secret.
///
/// Deterministic: two devices holding the same secret and digest derive the
/// same material. Intentionally slow; run it off the async executor.
pub fn derive(secret: &[u8], digest: &str, params: &KdfParams) -> Result<DerivedMaterial, CryptoError> {
    let argon2 = params.argon2()?;

    let key = argon2id(&argon2, secret, &domain_salt(ENCRYPTION_KEY_LABEL, digest))?;
    let mut pattern = argon2id(&argon2, secret, &domain_salt(PATTERN_HASH_LABEL, digest))?;
    let public_pattern_hash = hex::encode(pattern);
    pattern.zeroize();

    Ok(DerivedMaterial { encryption_key: SymmetricKey(key), public_pattern_hash })
}

/// Derive the pseudonymous user hash published as `argon_userid`.
///
/// Used to filter out one's own handshake when matching.
pub fn derive_user_hash(user_id: &str, digest: &str, params: &KdfParams) -> Result<String, CryptoError> {
    let argon2 = params.argon2()?;
    let hash = argon2id(&argon2, user_id.as_bytes(), &domain_salt(USER_HASH_LABEL, digest))?;
    Ok(hex::encode(hash))
}

/// Derive the payload key for a meeting from its high-entropy secret.
pub fn derive_meeting_key(meeting_secret: &[u8]) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(None, meeting_secret);

    let mut key = [0u8; DERIVED_LEN];
    let Ok(()) = hkdf.expand(MEETING_KEY_LABEL, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    SymmetricKey(key)
}

/// Salt bound to both the domain label and the public digest.
///
/// Argon2 requires at least 8 bytes of salt; hashing also removes any length
/// constraint on the externally supplied digest.
fn domain_salt(label: &[u8], digest: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(digest.as_bytes());
    hasher.finalize().into()
}

fn argon2id(
    argon2: &Argon2<'_>,
    input: &[u8],
    salt: &[u8],
) -> Result<[u8; DERIVED_LEN], CryptoError> {
    let mut out = [0u8; DERIVED_LEN];
    argon2
        .hash_password_into(input, salt, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(out)
}
