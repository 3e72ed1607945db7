//! End-to-end discovery and ledger scenarios
//!
//! Three devices share one in-memory broker:
//! - A and B observe secret S1 under digest D1 and must find each other
//! - C observes S2 under D1 and must find nobody
//!
//! A then turns the discovery result into a signed, stored meeting.
//! Cancellation and cross-secret decryption are covered alongside.

use std::{sync::Arc, time::Duration};

use convene_core::{
    ConveneError, DecryptOutcome, DiscoverySession, Ed25519Signer, GENESIS_BLOCK_HASH,
    HandshakeProtocol, KdfParams, KeyRegistry, MeetingLedger, MeetingStatus, MemoryStore,
    ProtocolConfig, ProximityEvent, SeededEnv, SessionIdentity, Signer, Technology, store,
};
use convene_crypto::CryptoError;

fn identity(user: &str) -> SessionIdentity {
    SessionIdentity {
        user_id: user.to_string(),
        email: format!("{user}@example.com"),
        meeting_id: format!("meeting-{user}"),
    }
}

fn device(
    seed: u64,
    store: &Arc<MemoryStore<SeededEnv>>,
    user: &str,
) -> DiscoverySession<SeededEnv, MemoryStore<SeededEnv>> {
    let protocol =
        Arc::new(HandshakeProtocol::new(SeededEnv::new(seed, 10_000), ProtocolConfig::testing()));
    DiscoverySession::new(protocol, Arc::clone(store), identity(user))
}

#[tokio::test]
async fn shared_secret_devices_find_each_other_only() {
    let broker = Arc::new(MemoryStore::new(SeededEnv::new(0, 10_000)));
    let mut a = device(1, &broker, "alice");
    let mut b = device(2, &broker, "bob");
    let mut c = device(3, &broker, "carol");

    let s1 = ProximityEvent::new(b"S1-shake-pattern".to_vec(), Technology::Shake);
    let s2 = ProximityEvent::new(b"S2-shake-pattern".to_vec(), Technology::Shake);

    let ha = a.publish(&s1, "D1").await.unwrap();
    let hb = b.publish(&s1, "D1").await.unwrap();
    let hc = c.publish(&s2, "D1").await.unwrap();

    assert_eq!(ha.public_pattern_hash, hb.public_pattern_hash);
    assert_ne!(ha.public_pattern_hash, hc.public_pattern_hash);

    let found_by_a = a.poll().await.unwrap();
    let found_by_b = b.poll().await.unwrap();
    let found_by_c = c.poll().await.unwrap();

    assert_eq!(found_by_a.len(), 1);
    assert_eq!(found_by_a[0].user_id, "bob");
    assert_eq!(found_by_a[0].meeting_id, "meeting-bob");
    assert_eq!(found_by_b.len(), 1);
    assert_eq!(found_by_b[0].user_id, "alice");
    assert!(found_by_c.is_empty());

    // The broker never sees raw identities or the secret
    for doc in broker.dump(store::HANDSHAKES).unwrap() {
        for value in doc.fields.values() {
            let text = format!("{value:?}");
            for secret in ["alice", "bob", "carol", "S1-shake", "S2-shake"] {
                assert!(!text.contains(secret), "{secret} leaked in {text}");
            }
        }
    }
}

#[tokio::test]
async fn other_secret_cannot_open_a_payload() {
    let broker = Arc::new(MemoryStore::new(SeededEnv::new(0, 10_000)));
    let mut a = device(1, &broker, "alice");
    let carol = HandshakeProtocol::new(SeededEnv::new(3, 10_000), ProtocolConfig::testing());

    let s1 = ProximityEvent::new(b"S1-shake-pattern".to_vec(), Technology::Shake);
    let s2 = ProximityEvent::new(b"S2-shake-pattern".to_vec(), Technology::Shake);
    let ha = a.publish(&s1, "D1").await.unwrap();

    // Same digest, different secret
    let material = carol.derive_material(&s2.secret, "D1").await.unwrap();

    assert_eq!(
        convene_crypto::decrypt(material.encryption_key(), &ha.encrypted_payload),
        Err(CryptoError::AuthenticationFailure)
    );
}

#[tokio::test]
async fn handshakes_expire_from_the_broker() {
    let clock = SeededEnv::new(0, 10_000);
    let broker = Arc::new(MemoryStore::new(clock.clone()));
    let mut a = device(1, &broker, "alice");
    let mut b = device(2, &broker, "bob");
    let s1 = ProximityEvent::new(b"S1".to_vec(), Technology::Uwb);

    a.publish(&s1, "D1").await.unwrap();
    b.publish(&s1, "D1").await.unwrap();

    clock.advance_secs(ProtocolConfig::testing().handshake_ttl.as_secs() + 1);

    assert!(a.poll().await.unwrap().is_empty());
    assert_eq!(broker.count(store::HANDSHAKES).unwrap(), 0);
}

#[tokio::test]
async fn repeated_polls_derive_once() {
    let broker = Arc::new(MemoryStore::new(SeededEnv::new(0, 10_000)));
    let protocol =
        Arc::new(HandshakeProtocol::new(SeededEnv::new(1, 10_000), ProtocolConfig::testing()));
    let mut a = DiscoverySession::new(Arc::clone(&protocol), Arc::clone(&broker), identity("alice"));
    let mut b = device(2, &broker, "bob");
    let s1 = ProximityEvent::new(b"S1".to_vec(), Technology::Bluetooth);

    a.publish(&s1, "D1").await.unwrap();
    b.publish(&s1, "D1").await.unwrap();
    let after_publish = protocol.cache().derivation_count();

    for _ in 0..5 {
        a.poll().await.unwrap();
    }

    // One pattern derivation and one user hash, nothing more
    assert_eq!(after_publish, 2);
    assert_eq!(protocol.cache().derivation_count(), after_publish);
    assert_eq!(a.discovered().len(), 1);
}

#[tokio::test]
async fn cancellation_stops_a_session() {
    let broker = Arc::new(MemoryStore::new(SeededEnv::new(0, 10_000)));
    let mut a = device(1, &broker, "alice");
    let s1 = ProximityEvent::new(b"S1".to_vec(), Technology::Nfc);
    a.publish(&s1, "D1").await.unwrap();

    let handle = a.cancel_handle();
    handle.cancel();

    assert_eq!(a.poll().await, Err(ConveneError::Cancelled));
    assert_eq!(a.publish(&s1, "D2").await, Err(ConveneError::Cancelled));
    assert_eq!(broker.count(store::HANDSHAKES).unwrap(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_a_running_derivation() {
    let broker = Arc::new(MemoryStore::new(SeededEnv::new(0, 10_000)));
    let config = ProtocolConfig {
        kdf: KdfParams { memory_kib: 65_536, iterations: 3, parallelism: 1 },
        ..ProtocolConfig::testing()
    };
    let protocol = Arc::new(HandshakeProtocol::new(SeededEnv::new(1, 10_000), config));
    let mut a = DiscoverySession::new(Arc::clone(&protocol), Arc::clone(&broker), identity("alice"));
    let s1 = ProximityEvent::new(b"S1".to_vec(), Technology::Shake);

    let handle = a.cancel_handle();
    let (published, ()) = tokio::join!(a.publish(&s1, "D1"), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();
    });

    assert_eq!(published, Err(ConveneError::Cancelled));
    assert_eq!(broker.count(store::HANDSHAKES).unwrap(), 0);

    // The protocol itself stays usable
    let material = protocol.derive_material(&s1.secret, "D1").await.unwrap();
    assert_eq!(material.public_pattern_hash().len(), 64);
}

#[tokio::test]
async fn discovery_to_stored_meeting() {
    let env = SeededEnv::new(7, 10_000);
    let broker = Arc::new(MemoryStore::new(env.clone()));
    let mut a = device(1, &broker, "alice");
    let mut b = device(2, &broker, "bob");
    let s1 = ProximityEvent::new(b"S1".to_vec(), Technology::Shake);

    a.publish(&s1, "D1").await.unwrap();
    b.publish(&s1, "D1").await.unwrap();
    a.poll().await.unwrap();

    let ledger = MeetingLedger::new(env.clone(), ProtocolConfig::testing());
    let registry = KeyRegistry::new(Arc::clone(&broker));
    let signer = Ed25519Signer::generate(&env);
    let key = registry.register("alice", signer.public_key_bytes(), "alice-phone").await.unwrap();

    let mut meeting = ledger.create_draft("alice", "coffee", "D1", &[]).unwrap();
    ledger.open(&mut meeting).unwrap();
    ledger.add_discovered(&mut meeting, a.discovered()).unwrap();
    ledger.close(&mut meeting).unwrap();
    let secret = meeting.meeting_secret.clone().unwrap();

    let signed = ledger.sign(&mut meeting, GENESIS_BLOCK_HASH, &signer, &key).await.unwrap();
    ledger.publish(&mut meeting, &signed, broker.as_ref()).await.unwrap();
    assert_eq!(meeting.status(), MeetingStatus::Stored);

    // Related meeting: bob's, via his handshake
    assert_eq!(signed.block.hashed_related_meeting_ids.len(), 1);
    assert_eq!(signed.block.hashed_participant_ids.len(), 2);

    let fetched = ledger.fetch(broker.as_ref(), &meeting.id).await.unwrap();
    assert_eq!(fetched.participant_count, 2);
    let DecryptOutcome::Decrypted(opened) = ledger.decrypt(fetched, &secret) else {
        panic!("creator must be able to reopen the meeting");
    };
    assert_eq!(opened.decrypted_payload.unwrap().participant_ids, vec!["alice", "bob"]);

    assert_eq!(registry.load(&key.public_key_id).await.unwrap().usage_count, 1);
}
