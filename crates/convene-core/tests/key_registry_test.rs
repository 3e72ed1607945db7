//! Key registry integration tests
//!
//! Usage counting across sign, publish and direct registry use, and rejection of tampered key
//! records read back from the broker.

use std::sync::Arc;

use async_trait::async_trait;
use convene_core::{
    ConveneError, Document, DocumentStore, Ed25519Signer, FieldValue, FormatError,
    GENESIS_BLOCK_HASH, KeyRegistry, MeetingLedger, MeetingStatus, MemoryStore, ProtocolConfig,
    SeededEnv, Signer, SigningKeyRecord, store,
};

/// Returns garbage instead of a signature.
struct BrokenSigner(Ed25519Signer);

#[async_trait]
impl Signer for BrokenSigner {
    fn public_key_bytes(&self) -> Vec<u8> {
        self.0.public_key_bytes()
    }

    async fn sign(&self, _hash: &[u8]) -> Result<Vec<u8>, ConveneError> {
        Ok(vec![0u8; 64])
    }
}

#[tokio::test]
async fn one_verified_signature_counts_once() {
    let env = SeededEnv::new(21, 1_000);
    let broker = Arc::new(MemoryStore::new(env.clone()));
    let registry = KeyRegistry::new(Arc::clone(&broker));
    let ledger = MeetingLedger::new(env.clone(), ProtocolConfig::testing());
    let signer = Ed25519Signer::generate(&env);

    let key = registry.register("u1", signer.public_key_bytes(), "phone").await.unwrap();
    assert_eq!(registry.load(&key.public_key_id).await.unwrap().usage_count, 0);

    let mut meeting = ledger.create_draft("u1", "review", "D1", &[]).unwrap();
    let signed = ledger.sign(&mut meeting, GENESIS_BLOCK_HASH, &signer, &key).await.unwrap();
    ledger.publish(&mut meeting, &signed, broker.as_ref()).await.unwrap();

    let stored = registry.load(&key.public_key_id).await.unwrap();
    assert_eq!(stored.usage_count, 1);
    assert_eq!(signed.signature.generation, 1);
}

#[tokio::test]
async fn direct_usage_adds_to_ledger_usage() {
    let env = SeededEnv::new(24, 1_000);
    let broker = Arc::new(MemoryStore::new(env.clone()));
    let registry = KeyRegistry::new(Arc::clone(&broker));
    let ledger = MeetingLedger::new(env.clone(), ProtocolConfig::testing());
    let signer = Ed25519Signer::generate(&env);

    let key = registry.register("u1", signer.public_key_bytes(), "phone").await.unwrap();
    let mut meeting = ledger.create_draft("u1", "review", "D1", &[]).unwrap();
    let signed = ledger.sign(&mut meeting, GENESIS_BLOCK_HASH, &signer, &key).await.unwrap();
    ledger.publish(&mut meeting, &signed, broker.as_ref()).await.unwrap();

    // A later signature made outside the ledger
    let stored = registry.load(&key.public_key_id).await.unwrap();
    let after = registry.record_usage(&stored).await.unwrap();

    assert_eq!(after.usage_count, 2);
    assert_eq!(registry.load(&key.public_key_id).await.unwrap().usage_count, 2);
}

#[tokio::test]
async fn failed_verification_does_not_count() {
    let env = SeededEnv::new(22, 1_000);
    let broker = Arc::new(MemoryStore::new(env.clone()));
    let registry = KeyRegistry::new(Arc::clone(&broker));
    let ledger = MeetingLedger::new(env.clone(), ProtocolConfig::testing());
    let signer = BrokenSigner(Ed25519Signer::generate(&env));

    let key = registry.register("u1", signer.public_key_bytes(), "phone").await.unwrap();
    let mut meeting = ledger.create_draft("u1", "review", "D1", &[]).unwrap();

    let err = ledger.sign(&mut meeting, GENESIS_BLOCK_HASH, &signer, &key).await.unwrap_err();

    assert!(matches!(err, ConveneError::SignatureMismatch { .. }));
    assert!(err.is_fatal());
    assert_eq!(meeting.status(), MeetingStatus::Error);
    assert_eq!(registry.load(&key.public_key_id).await.unwrap().usage_count, 0);
}

#[tokio::test]
async fn successive_meetings_advance_generation() {
    let env = SeededEnv::new(23, 1_000);
    let broker = Arc::new(MemoryStore::new(env.clone()));
    let registry = KeyRegistry::new(Arc::clone(&broker));
    let ledger = MeetingLedger::new(env.clone(), ProtocolConfig::testing());
    let signer = Ed25519Signer::generate(&env);

    let mut key = registry.register("u1", signer.public_key_bytes(), "phone").await.unwrap();
    let mut previous = GENESIS_BLOCK_HASH.to_string();

    for expected in 1..=3 {
        let mut meeting = ledger.create_draft("u1", "daily", "D1", &[]).unwrap();
        let signed = ledger.sign(&mut meeting, &previous, &signer, &key).await.unwrap();
        ledger.publish(&mut meeting, &signed, broker.as_ref()).await.unwrap();

        assert_eq!(signed.signature.generation, expected);
        assert_eq!(signed.block.previous_block_hash, previous);
        previous = signed.block.signable_hash_hex();
        key = signed.key_record;
    }

    assert_eq!(registry.load(&key.public_key_id).await.unwrap().usage_count, 3);
    assert_eq!(broker.count(store::SIGNING_BLOCKS).unwrap(), 3);
}

#[tokio::test]
async fn tampered_key_record_is_rejected() {
    let broker = Arc::new(MemoryStore::new(SeededEnv::new(0, 0)));
    let registry = KeyRegistry::new(Arc::clone(&broker));
    let key = registry.register("u1", vec![1; 32], "phone").await.unwrap();

    // Broker swaps in a different key under the same id
    let mut doc: Document = broker.get(store::PUBLIC_KEYS, &key.public_key_id).await.unwrap().unwrap();
    doc.insert("key".to_string(), FieldValue::Str(hex::encode([2u8; 32])));
    broker.put(store::PUBLIC_KEYS, &key.public_key_id, doc).await.unwrap();

    let err = registry.load(&key.public_key_id).await.unwrap_err();
    assert_eq!(
        err,
        ConveneError::Format(FormatError::KeyIdMismatch {
            stored: key.public_key_id.clone(),
            computed: SigningKeyRecord::compute_key_id(&[2; 32]),
        })
    );
}
