//! Convene Cryptographic Primitives
//!
//! Cryptographic building blocks for Convene. Pure functions with
//! deterministic outputs. Callers provide nonces for deterministic testing.
//!
//! # Material Lifecycle
//!
//! A proximity event yields a shared secret on each device. Combined with the
//! current public digest it is stretched into everything the discovery
//! handshake publishes. A meeting then gets its own random secret, from which
//! the payload key, the published chain terminal and the participant
//! pseudonyms are derived.
//!
//! ```text
//! Shared Secret + Public Digest
//!        │
//!        ▼
//! Argon2id ─┬─> Encryption Key ──> XChaCha20-Poly1305 (discovery payload)
//!           └─> Public Pattern Hash (published)
//!
//! Meeting Secret
//!        │
//!        ├─> HKDF ──> Meeting Key ──> XChaCha20-Poly1305 (meeting payload)
//!        ├─> SHA-256 chain ──> Hashed Meeting Secret (published terminal)
//!        └─> HMAC-SHA256 chain ──> Participant pseudonyms
//! ```
//!
//! # Security
//!
//! Offline guessing:
//! - Shared secrets can be low-entropy (a shake pattern); Argon2id makes each
//!   guess against a published pattern hash cost hundreds of milliseconds
//! - The public digest rotates, so tables cannot be precomputed across
//!   windows
//!
//! Domain separation:
//! - Encryption key, pattern hash and user hash use distinct salts, so no
//!   published value reveals anything about the key
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD provides tamper-proof encryption
//! - Failed authentication tag -> reject payload, never partial plaintext
//!
//! Proof of knowledge:
//! - Only the chain terminal is published; interior links can be revealed
//!   later to prove possession of the meeting secret

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod chain;
pub mod cipher;
pub mod error;
pub mod kdf;

pub use chain::{
    DEFAULT_CHAIN_ROUNDS, Hash256, HashChain, generate_chain, keyed_chain, sha256, verify_reveal,
};
pub use cipher::{CipherBlob, NONCE_SIZE, TAG_SIZE, decrypt, decrypt_bytes, encrypt};
pub use error::CryptoError;
pub use kdf::{
    DERIVED_LEN, DerivedMaterial, KdfParams, SymmetricKey, derive, derive_meeting_key,
    derive_user_hash,
};
