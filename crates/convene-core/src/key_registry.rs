//! Signing public key records.
//!
//! Each device registers the public half of its signing key under
//! `public_key_id = hex(SHA-256(key))`. The owner is published only as
//! `hashed_owner_id = hex(SHA-256(owner_id || public_key_id))`.
//!
//! `usage_count` grows by exactly one per verified signature. A signature
//! record carries the count as its `generation`, so a replayed signature
//! shows up as a generation the key already used; a count far beyond normal
//! use flags a key for rotation.

use std::sync::Arc;

use convene_crypto::sha256;

use crate::{
    error::{ConveneError, FormatError, StateError},
    store::{
        Document, DocumentBuilder, DocumentReader, DocumentStore, PUBLIC_KEYS, SERVER_TIMESTAMP,
        StoreError,
    },
};

/// Published record of a signing public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyRecord {
    /// `hex(SHA-256(public_key_bytes))`; the document id
    pub public_key_id: String,
    /// `hex(SHA-256(owner_id || public_key_id))`
    pub hashed_owner_id: String,
    /// Raw public key
    pub public_key_bytes: Vec<u8>,
    /// Verified signatures made with this key
    pub usage_count: u64,
    /// Free-form device label
    pub client_label: String,
    /// Raw owner id; only known on the owner's device
    pub owner_id: Option<String>,
    /// Store write time, once resolved
    pub server_timestamp: Option<u64>,
}

impl SigningKeyRecord {
    /// Fresh record with `usage_count = 0`.
    pub fn new(owner_id: &str, public_key_bytes: Vec<u8>, client_label: &str) -> Self {
        let public_key_id = Self::compute_key_id(&public_key_bytes);
        Self {
            hashed_owner_id: Self::compute_hashed_owner_id(owner_id, &public_key_id),
            public_key_id,
            public_key_bytes,
            usage_count: 0,
            client_label: client_label.to_string(),
            owner_id: Some(owner_id.to_string()),
            server_timestamp: None,
        }
    }

    /// `hex(SHA-256(public_key_bytes))`
    pub fn compute_key_id(public_key_bytes: &[u8]) -> String {
        hex::encode(sha256(public_key_bytes))
    }

    /// `hex(SHA-256(owner_id || public_key_id))`
    pub fn compute_hashed_owner_id(owner_id: &str, public_key_id: &str) -> String {
        let mut input = Vec::with_capacity(owner_id.len() + public_key_id.len());
        input.extend_from_slice(owner_id.as_bytes());
        input.extend_from_slice(public_key_id.as_bytes());
        hex::encode(sha256(&input))
    }

    /// Copy of the record with one more use.
    pub fn record_usage(&self) -> Result<Self, StateError> {
        let usage_count = self.usage_count.checked_add(1).ok_or_else(|| StateError::UsageOverflow {
            public_key_id: self.public_key_id.clone(),
        })?;
        Ok(Self { usage_count, ..self.clone() })
    }

    /// Whether the key was used more than `threshold` times.
    pub fn is_overuse_suspicious(&self, threshold: u64) -> bool {
        self.usage_count > threshold
    }

    /// Document written to `public_keys` under `public_key_id`.
    ///
    /// Every write asks the store for a fresh `server_timestamp`.
    pub fn to_document(&self) -> Document {
        DocumentBuilder::new()
            .field("hashed_owner_id", self.hashed_owner_id.as_str())
            .field("key", hex::encode(&self.public_key_bytes))
            .field("usage_count", self.usage_count)
            .field("client_label", self.client_label.as_str())
            .server_timestamp(None)
            .build()
    }

    /// Parse a `public_keys` document, recomputing its id from the key.
    ///
    /// # Errors
    ///
    /// - `KeyIdMismatch` if `id` is not the hash of the stored key
    pub fn from_document(id: &str, doc: &Document) -> Result<Self, FormatError> {
        let reader = DocumentReader::new(PUBLIC_KEYS, doc);
        let public_key_bytes = reader.hex("key")?;

        let computed = Self::compute_key_id(&public_key_bytes);
        if computed != id {
            return Err(FormatError::KeyIdMismatch { stored: id.to_string(), computed });
        }

        Ok(Self {
            public_key_id: computed,
            hashed_owner_id: reader.str("hashed_owner_id")?.to_string(),
            public_key_bytes,
            usage_count: reader.int("usage_count")?,
            client_label: reader.str("client_label")?.to_string(),
            owner_id: None,
            server_timestamp: reader.timestamp(SERVER_TIMESTAMP)?,
        })
    }
}

/// Persists signing key records in the `public_keys` collection.
pub struct KeyRegistry<S: DocumentStore + ?Sized> {
    store: Arc<S>,
}

impl<S: DocumentStore + ?Sized> KeyRegistry<S> {
    /// Registry backed by `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create and publish a record for `public_key_bytes`.
    pub async fn register(
        &self,
        owner_id: &str,
        public_key_bytes: Vec<u8>,
        client_label: &str,
    ) -> Result<SigningKeyRecord, ConveneError> {
        let record = SigningKeyRecord::new(owner_id, public_key_bytes, client_label);
        self.store.put(PUBLIC_KEYS, &record.public_key_id, record.to_document()).await?;

        tracing::info!(public_key_id = %record.public_key_id, "signing key registered");
        Ok(record)
    }

    /// Fetch and validate a record.
    pub async fn load(&self, public_key_id: &str) -> Result<SigningKeyRecord, ConveneError> {
        let doc = self.store.get(PUBLIC_KEYS, public_key_id).await?.ok_or_else(|| {
            StoreError::NotFound { collection: PUBLIC_KEYS.to_string(), id: public_key_id.to_string() }
        })?;
        Ok(SigningKeyRecord::from_document(public_key_id, &doc)?)
    }

    /// Increment the usage count and write it back.
    ///
    /// For keys used outside [`MeetingLedger`](crate::MeetingLedger).
    /// `MeetingLedger::sign` already counts its signature and
    /// `MeetingLedger::publish` persists that count, so calling this for the
    /// same signature counts it twice.
    pub async fn record_usage(
        &self,
        record: &SigningKeyRecord,
    ) -> Result<SigningKeyRecord, ConveneError> {
        let next = record.record_usage()?;
        self.store.put(PUBLIC_KEYS, &next.public_key_id, next.to_document()).await?;

        tracing::debug!(public_key_id = %next.public_key_id, usage_count = next.usage_count, "key usage recorded");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{env::SeededEnv, store::MemoryStore};

    fn record() -> SigningKeyRecord {
        SigningKeyRecord::new("u1", vec![9; 32], "phone")
    }

    #[test]
    fn new_record_starts_unused() {
        let record = record();

        assert_eq!(record.usage_count, 0);
        assert_eq!(record.public_key_id, SigningKeyRecord::compute_key_id(&[9; 32]));
        assert_eq!(record.public_key_id.len(), 64);
        assert_ne!(record.hashed_owner_id, "u1");
    }

    #[test]
    fn usage_is_checked() {
        let used = record().record_usage().unwrap();
        assert_eq!(used.usage_count, 1);

        let exhausted = SigningKeyRecord { usage_count: u64::MAX, ..record() };
        assert!(matches!(exhausted.record_usage(), Err(StateError::UsageOverflow { .. })));
    }

    #[test]
    fn overuse_is_strictly_above_threshold() {
        let at = SigningKeyRecord { usage_count: 1_000, ..record() };
        let above = SigningKeyRecord { usage_count: 1_001, ..record() };

        assert!(!at.is_overuse_suspicious(1_000));
        assert!(above.is_overuse_suspicious(1_000));
    }

    #[test]
    fn document_roundtrip_drops_owner() {
        let original = record();
        let parsed =
            SigningKeyRecord::from_document(&original.public_key_id, &original.to_document()).unwrap();

        assert_eq!(parsed.owner_id, None);
        assert_eq!(parsed.hashed_owner_id, original.hashed_owner_id);
        assert_eq!(parsed.public_key_bytes, original.public_key_bytes);
    }

    #[test]
    fn mismatching_id_is_rejected() {
        let original = record();
        let err = SigningKeyRecord::from_document(&"0".repeat(64), &original.to_document()).unwrap_err();

        assert_eq!(
            err,
            FormatError::KeyIdMismatch { stored: "0".repeat(64), computed: original.public_key_id }
        );
    }

    #[tokio::test]
    async fn registry_persists_usage() {
        let store = Arc::new(MemoryStore::new(SeededEnv::new(0, 50)));
        let registry = KeyRegistry::new(Arc::clone(&store));

        let record = registry.register("u1", vec![3; 32], "laptop").await.unwrap();
        registry.record_usage(&record).await.unwrap();

        let loaded = registry.load(&record.public_key_id).await.unwrap();
        assert_eq!(loaded.usage_count, 1);
        assert_eq!(loaded.server_timestamp, Some(50));
    }

    #[tokio::test]
    async fn loading_missing_key_is_not_found() {
        let store = Arc::new(MemoryStore::new(SeededEnv::new(0, 0)));
        let registry = KeyRegistry::new(store);

        let err = registry.load("nope").await.unwrap_err();
        assert!(matches!(err, ConveneError::Store(StoreError::NotFound { .. })));
    }
}
