//! Protocol configuration.
//!
//! Every component takes its parameters explicitly; there is no global
//! state. Defaults are the production values.

use std::time::Duration;

use convene_crypto::{DEFAULT_CHAIN_ROUNDS, KdfParams};

/// Protocol version stamped on every published record.
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest protocol version this implementation accepts.
pub const MIN_SUPPORTED_PROTOCOL_VERSION: u32 = 1;

/// Default number of concurrent derivation/decryption workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// How long a published handshake should live before the store may delete
/// it (best-effort `deletion_timestamp`).
pub const DEFAULT_HANDSHAKE_TTL: Duration = Duration::from_secs(10 * 60);

/// Signatures after which a key is considered for rotation.
pub const DEFAULT_OVERUSE_THRESHOLD: u64 = 1_000;

/// Protocol configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Argon2id cost for discovery derivations
    pub kdf: KdfParams,
    /// Rounds for the meeting secret chain and participant pseudonyms
    pub chain_rounds: usize,
    /// Maximum concurrently running CPU-heavy jobs
    pub max_workers: usize,
    /// Lifetime of a published handshake
    pub handshake_ttl: Duration,
    /// Oldest accepted protocol version
    pub min_protocol_version: u32,
    /// Newest accepted protocol version
    pub max_protocol_version: u32,
    /// Usage count beyond which a signing key is flagged
    pub overuse_threshold: u64,
}

impl ProtocolConfig {
    /// Cheap derivation parameters for tests and simulations.
    pub fn testing() -> Self {
        Self { kdf: KdfParams::testing(), ..Self::default() }
    }

    /// Whether records stamped with `version` are accepted.
    pub fn supports_version(&self, version: u32) -> bool {
        (self.min_protocol_version..=self.max_protocol_version).contains(&version)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            chain_rounds: DEFAULT_CHAIN_ROUNDS,
            max_workers: DEFAULT_MAX_WORKERS,
            handshake_ttl: DEFAULT_HANDSHAKE_TTL,
            min_protocol_version: MIN_SUPPORTED_PROTOCOL_VERSION,
            max_protocol_version: PROTOCOL_VERSION,
            overuse_threshold: DEFAULT_OVERUSE_THRESHOLD,
        }
    }
}
