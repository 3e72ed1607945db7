//! Pattern-based discovery handshake.
//!
//! Two devices holding the same shared secret and public digest derive the
//! same public pattern hash. Each publishes a handshake under that hash with
//! its identity sealed under the derived encryption key, then queries the
//! store for the hash. Any other handshake found there was produced by a
//! device that knows the secret, so its payload decrypts to a
//! [`DiscoveredIdentity`].
//!
//! The broker only ever sees the pattern hash, a per-user hash and the
//! ciphertext. Matching failures (foreign protocol version, own handshake,
//! undecryptable payload) are "no match", never errors.

use std::sync::Arc;

use convene_crypto::{CipherBlob, DerivedMaterial, decrypt, encrypt};
use serde::{Deserialize, Serialize};

use crate::{
    config::ProtocolConfig,
    derivation::DerivationCache,
    env::Environment,
    error::{ConveneError, FormatError},
    store::{
        DELETION_TIMESTAMP, Document, DocumentBuilder, DocumentReader, HANDSHAKES, SERVER_TIMESTAMP,
    },
    technology::{SharedSecret, Technology},
    worker::WorkerPool,
};

/// Identity recovered from a matching handshake.
///
/// In-memory only; never republished.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredIdentity {
    /// Counterpart's user id
    pub user_id: String,
    /// Counterpart's contact email
    pub email: String,
    /// Meeting the counterpart is collecting participants for
    pub meeting_id: String,
    /// Technology the shared secret came from
    pub technology: Technology,
}

/// Sealed content of a handshake.
#[derive(Debug, Serialize, Deserialize)]
struct DiscoveryPayload {
    user_id: String,
    email: String,
    meeting_id: String,
}

/// Published half of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicHandshake {
    /// Document id in `handshakes`
    pub id: String,
    /// Argon2id hash of the shared secret (`argon_pattern`)
    pub public_pattern_hash: String,
    /// Argon2id hash of the owner's user id (`argon_userid`)
    pub public_user_hash: String,
    /// Sealed identity
    pub encrypted_payload: CipherBlob,
    /// Technology the secret came from
    pub technology: Technology,
    /// Protocol version of the writer
    pub protocol_version: u32,
    /// Creation time, Unix seconds
    pub created_at: u64,
    /// Store write time, once resolved
    pub server_timestamp: Option<u64>,
    /// Time after which the store may delete the handshake
    pub deletion_timestamp: Option<u64>,
}

impl PublicHandshake {
    /// Document written to the `handshakes` collection.
    pub fn to_document(&self) -> Document {
        let mut builder = DocumentBuilder::new()
            .field("argon_pattern", self.public_pattern_hash.as_str())
            .field("argon_userid", self.public_user_hash.as_str())
            .field("encrypted_payload", self.encrypted_payload.to_hex())
            .field("technology_type", self.technology.as_str())
            .field("protocol_version", u64::from(self.protocol_version))
            .field("created_at", self.created_at)
            .server_timestamp(self.server_timestamp);

        if let Some(deadline) = self.deletion_timestamp {
            builder = builder.field(DELETION_TIMESTAMP, deadline);
        }
        builder.build()
    }

    /// Parse a `handshakes` document.
    pub fn from_document(id: &str, doc: &Document) -> Result<Self, FormatError> {
        let reader = DocumentReader::new(HANDSHAKES, doc);

        let blob = reader.hex("encrypted_payload")?;
        let encrypted_payload = CipherBlob::from_bytes(&blob)
            .map_err(|_| FormatError::Ciphertext { len: blob.len() })?;

        let deletion_timestamp = match doc.get(DELETION_TIMESTAMP) {
            Some(_) => Some(reader.int(DELETION_TIMESTAMP)?),
            None => None,
        };

        Ok(Self {
            id: id.to_string(),
            public_pattern_hash: reader.str("argon_pattern")?.to_string(),
            public_user_hash: reader.str("argon_userid")?.to_string(),
            encrypted_payload,
            technology: reader.str("technology_type")?.parse()?,
            protocol_version: reader.u32("protocol_version")?,
            created_at: reader.int("created_at")?,
            server_timestamp: reader.timestamp(SERVER_TIMESTAMP)?,
            deletion_timestamp,
        })
    }
}

/// A handshake created on this device.
///
/// The secret and digest never leave the device.
#[derive(Debug, Clone)]
pub struct Handshake {
    public: PublicHandshake,
    secret: SharedSecret,
    digest: String,
}

impl Handshake {
    /// Published half.
    pub fn public(&self) -> &PublicHandshake {
        &self.public
    }

    /// Shared secret the handshake was built from.
    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    /// Public digest the handshake was built under.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Builds and matches discovery handshakes.
pub struct HandshakeProtocol<E: Environment> {
    env: E,
    config: ProtocolConfig,
    pool: WorkerPool,
    cache: DerivationCache,
}

impl<E: Environment> HandshakeProtocol<E> {
    /// Protocol instance with its own worker pool and derivation cache.
    pub fn new(env: E, config: ProtocolConfig) -> Self {
        let pool = WorkerPool::new(config.max_workers);
        let cache = DerivationCache::new(config.kdf, pool.clone());
        Self { env, config, pool, cache }
    }

    /// Active configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Derivation cache (for inspection and digest rotation).
    pub fn cache(&self) -> &DerivationCache {
        &self.cache
    }

    /// Encryption key and public pattern hash for `(secret, digest)`.
    pub async fn derive_material(
        &self,
        secret: &SharedSecret,
        digest: &str,
    ) -> Result<Arc<DerivedMaterial>, ConveneError> {
        self.cache.material(secret, digest).await
    }

    /// Public user hash for `(user_id, digest)`.
    pub async fn derive_user_hash(&self, user_id: &str, digest: &str) -> Result<String, ConveneError> {
        self.cache.user_hash(user_id, digest).await
    }

    /// Build a handshake announcing `owner_id` for `meeting_id`.
    pub async fn create(
        &self,
        secret: &SharedSecret,
        digest: &str,
        owner_id: &str,
        meeting_id: &str,
        email: &str,
        technology: Technology,
    ) -> Result<Handshake, ConveneError> {
        let material = self.derive_material(secret, digest).await?;
        let public_user_hash = self.derive_user_hash(owner_id, digest).await?;

        let payload = DiscoveryPayload {
            user_id: owner_id.to_string(),
            email: email.to_string(),
            meeting_id: meeting_id.to_string(),
        };
        let mut plaintext = Vec::new();
        ciborium::into_writer(&payload, &mut plaintext)
            .map_err(|e| FormatError::Encoding(e.to_string()))?;

        let nonce = self.env.random_array();
        let key_material = Arc::clone(&material);
        let encrypted_payload =
            self.pool.run(move || encrypt(key_material.encryption_key(), &plaintext, nonce)).await?;

        let created_at = self.env.wall_clock_secs();
        let public = PublicHandshake {
            id: self.env.random_id(),
            public_pattern_hash: material.public_pattern_hash().to_string(),
            public_user_hash,
            encrypted_payload,
            technology,
            protocol_version: self.config.max_protocol_version,
            created_at,
            server_timestamp: None,
            deletion_timestamp: Some(created_at.saturating_add(self.config.handshake_ttl.as_secs())),
        };

        tracing::debug!(handshake_id = %public.id, technology = %technology, "handshake created");
        Ok(Handshake { public, secret: secret.clone(), digest: digest.to_string() })
    }

    /// The part of `handshake` that may be published.
    pub fn publishable_view(&self, handshake: &Handshake) -> PublicHandshake {
        handshake.public.clone()
    }

    /// Check whether `remote` was produced by a device sharing `own`'s
    /// secret, and recover its identity if so.
    ///
    /// Only derivation or worker failures are errors; every reason not to
    /// match yields `Ok(None)`.
    pub async fn try_match(
        &self,
        own: &Handshake,
        remote: &PublicHandshake,
    ) -> Result<Option<DiscoveredIdentity>, ConveneError> {
        if !self.config.supports_version(remote.protocol_version) {
            tracing::debug!(
                handshake_id = %remote.id,
                version = remote.protocol_version,
                "skipping handshake with unsupported protocol version"
            );
            return Ok(None);
        }

        if remote.id == own.public.id || remote.public_user_hash == own.public.public_user_hash {
            return Ok(None);
        }

        if remote.public_pattern_hash != own.public.public_pattern_hash {
            return Ok(None);
        }

        let material = self.derive_material(&own.secret, &own.digest).await?;
        let blob = remote.encrypted_payload.clone();
        let opened = self.pool.run(move || decrypt(material.encryption_key(), &blob)).await?;

        let plaintext = match opened {
            Ok(plaintext) => plaintext,
            Err(err) => {
                tracing::warn!(handshake_id = %remote.id, %err, "matching handshake failed to decrypt");
                return Ok(None);
            },
        };

        let payload: DiscoveryPayload = match ciborium::from_reader(plaintext.as_slice()) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(handshake_id = %remote.id, %err, "matching handshake payload undecodable");
                return Ok(None);
            },
        };

        Ok(Some(DiscoveredIdentity {
            user_id: payload.user_id,
            email: payload.email,
            meeting_id: payload.meeting_id,
            technology: remote.technology,
        }))
    }

    /// Match every candidate, returning each distinct identity once in
    /// candidate order.
    pub async fn find_matches(
        &self,
        own: &Handshake,
        candidates: &[PublicHandshake],
    ) -> Result<Vec<DiscoveredIdentity>, ConveneError> {
        let mut found: Vec<DiscoveredIdentity> = Vec::new();
        for candidate in candidates {
            if let Some(identity) = self.try_match(own, candidate).await?
                && !found.contains(&identity)
            {
                found.push(identity);
            }
        }

        tracing::debug!(candidates = candidates.len(), matches = found.len(), "matched handshakes");
        Ok(found)
    }
}
