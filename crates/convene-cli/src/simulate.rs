//! In-memory end-to-end run.
//!
//! Every device observes the same shake secret and publishes through a
//! [`ChaoticStore`] broker; the first device then creates, signs and
//! stores the meeting against the reliable inner store.

use std::sync::Arc;

use convene_core::{
    ChaoticStore, ConveneError, DecryptOutcome, DiscoverySession, Ed25519Signer, Environment,
    GENESIS_BLOCK_HASH, HandshakeProtocol, KeyRegistry, MeetingLedger, MemoryStore,
    ProtocolConfig, ProximityEvent, SeededEnv, SessionIdentity, Signer, StateError, SystemEnv,
    Technology,
};

/// Attempts per broker operation before giving up.
const MAX_ATTEMPTS: usize = 8;

/// Fixed start of the seeded clock.
const SEEDED_START_SECS: u64 = 1_700_000_000;

/// Discovery broker: a shared in-memory store with injected failures.
type Broker<E> = ChaoticStore<MemoryStore<E>>;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of co-present devices
    pub devices: usize,
    /// Broker failure probability during discovery
    pub failure_rate: f64,
    /// Public digest
    pub digest: String,
    /// Protocol parameters
    pub protocol: ProtocolConfig,
}

/// Outcome of a run.
#[derive(Debug)]
pub struct SimulationReport {
    /// Stored meeting
    pub meeting_id: String,
    /// Participants in the stored meeting
    pub participant_count: u64,
    /// Hash of the signed block
    pub block_hash: String,
    /// Broker operations that failed and were retried
    pub retries: usize,
}

/// Ways a simulation can go wrong.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// Protocol or broker failure that survived retries
    #[error(transparent)]
    Protocol(#[from] ConveneError),

    /// Meeting lifecycle step rejected
    #[error(transparent)]
    State(#[from] StateError),

    /// A device did not find every other device
    #[error("{user_id} discovered {found} of {expected} co-present devices")]
    Undiscovered {
        /// Device that came up short
        user_id: String,
        /// Identities it found
        found: usize,
        /// Identities it should have found
        expected: usize,
    },

    /// The creator could not reopen the stored meeting
    #[error("stored meeting does not reopen: {0}")]
    Unreadable(String),
}

/// Reproducible run: every device is seeded from `seed`.
pub async fn run_seeded(
    config: SimulationConfig,
    seed: u64,
) -> Result<SimulationReport, SimulationError> {
    let broker = ChaoticStore::with_seed(
        MemoryStore::new(SeededEnv::new(seed, SEEDED_START_SECS)),
        config.failure_rate,
        seed,
    );
    let device_seed = |index: usize| seed.wrapping_add(index as u64 + 1);
    run(config, broker, |index| SeededEnv::new(device_seed(index), SEEDED_START_SECS)).await
}

/// Run with system randomness and clock.
pub async fn run_system(config: SimulationConfig) -> Result<SimulationReport, SimulationError> {
    let broker = ChaoticStore::new(MemoryStore::new(SystemEnv::new()), config.failure_rate);
    run(config, broker, |_| SystemEnv::new()).await
}

/// Discover, then create, sign, publish and reopen one meeting.
async fn run<E: Environment>(
    config: SimulationConfig,
    broker: Broker<E>,
    env_for: impl Fn(usize) -> E,
) -> Result<SimulationReport, SimulationError> {
    let broker = Arc::new(broker);
    let envs: Vec<E> = (0..config.devices).map(&env_for).collect();
    let room = env_for(config.devices);
    let event = ProximityEvent::new(room.random_array::<16>().to_vec(), Technology::Shake);
    let mut retries = 0;

    let mut sessions: Vec<DiscoverySession<E, Broker<E>>> = envs
        .iter()
        .enumerate()
        .map(|(index, env)| {
            let protocol = HandshakeProtocol::new(env.clone(), config.protocol.clone());
            let user_id = format!("user-{index}");
            let identity = SessionIdentity {
                email: format!("{user_id}@convene.test"),
                meeting_id: format!("meeting-{index}"),
                user_id,
            };
            DiscoverySession::new(Arc::new(protocol), Arc::clone(&broker), identity)
        })
        .collect();

    for session in &mut sessions {
        publish_with_retry(session, &event, &config.digest, &mut retries).await?;
    }
    for session in &mut sessions {
        poll_with_retry(session, &mut retries).await?;

        let expected = config.devices - 1;
        let found = session.discovered().len();
        if found != expected {
            return Err(SimulationError::Undiscovered {
                user_id: session.identity().user_id.clone(),
                found,
                expected,
            });
        }
    }
    tracing::info!(
        devices = config.devices,
        broker_operations = broker.operation_count(),
        "discovery complete"
    );

    let (Some(creator), Some(creator_env)) = (sessions.first(), envs.first()) else {
        return Err(SimulationError::Undiscovered { user_id: String::new(), found: 0, expected: 1 });
    };
    let creator_id = creator.identity().user_id.clone();
    let store = broker.inner();

    let ledger = MeetingLedger::new(creator_env.clone(), config.protocol.clone());
    let registry = KeyRegistry::new(Arc::new(store.clone()));
    let signer = Ed25519Signer::generate(creator_env);
    let key = registry
        .register(&creator_id, signer.public_key_bytes(), &format!("{creator_id}-device"))
        .await?;

    let mut meeting = ledger.create_draft(&creator_id, "simulated meeting", &config.digest, &[])?;
    ledger.open(&mut meeting)?;
    ledger.add_discovered(&mut meeting, creator.discovered())?;
    ledger.close(&mut meeting)?;
    let secret = meeting
        .meeting_secret
        .clone()
        .ok_or_else(|| SimulationError::Unreadable("draft has no meeting secret".to_string()))?;

    let signed = ledger.sign(&mut meeting, GENESIS_BLOCK_HASH, &signer, &key).await?;
    ledger.publish(&mut meeting, &signed, store).await?;

    let fetched = ledger.fetch(store, &meeting.id).await?;
    let reopened = match ledger.decrypt(fetched, &secret) {
        DecryptOutcome::Decrypted(reopened) => reopened,
        DecryptOutcome::WrongSecret(_) => {
            return Err(SimulationError::Unreadable("meeting secret rejected".to_string()));
        },
        DecryptOutcome::Corrupt { reason, .. } => return Err(SimulationError::Unreadable(reason)),
    };

    Ok(SimulationReport {
        meeting_id: reopened.id,
        participant_count: reopened.participant_count,
        block_hash: signed.block.signable_hash_hex(),
        retries,
    })
}

/// Publish, retrying retryable store failures up to [`MAX_ATTEMPTS`].
async fn publish_with_retry<E: Environment>(
    session: &mut DiscoverySession<E, Broker<E>>,
    event: &ProximityEvent,
    digest: &str,
    retries: &mut usize,
) -> Result<(), ConveneError> {
    let mut attempt = 1;
    loop {
        match session.publish(event, digest).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(user_id = %session.identity().user_id, attempt, %err, "publish failed, retrying");
                attempt += 1;
                *retries += 1;
            },
            Err(err) => return Err(err),
        }
    }
}

/// Poll, retrying retryable store failures up to [`MAX_ATTEMPTS`].
async fn poll_with_retry<E: Environment>(
    session: &mut DiscoverySession<E, Broker<E>>,
    retries: &mut usize,
) -> Result<(), ConveneError> {
    let mut attempt = 1;
    loop {
        match session.poll().await {
            Ok(found) => {
                tracing::info!(user_id = %session.identity().user_id, found = found.len(), "poll complete");
                return Ok(());
            },
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(user_id = %session.identity().user_id, attempt, %err, "poll failed, retrying");
                attempt += 1;
                *retries += 1;
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_rate: f64) -> SimulationConfig {
        SimulationConfig {
            devices: 3,
            failure_rate,
            digest: "digest-0".to_string(),
            protocol: ProtocolConfig::testing(),
        }
    }

    #[tokio::test]
    async fn seeded_run_stores_a_meeting_with_every_device() {
        let report = run_seeded(config(0.0), 7).await.unwrap();

        assert_eq!(report.participant_count, 3);
        assert_eq!(report.retries, 0);
        assert_eq!(report.block_hash.len(), 64);
    }

    #[tokio::test]
    async fn seeded_runs_are_reproducible() {
        let first = run_seeded(config(0.0), 11).await.unwrap();
        let second = run_seeded(config(0.0), 11).await.unwrap();

        assert_eq!(first.meeting_id, second.meeting_id);
        assert_eq!(first.block_hash, second.block_hash);
    }

    #[test]
    fn lifecycle_errors_surface_unchanged() {
        use convene_core::MeetingStatus;

        let err = SimulationError::from(StateError::InvalidTransition {
            from: MeetingStatus::Stored,
            to: MeetingStatus::ClientOpen,
        });

        assert!(matches!(err, SimulationError::State(_)));
        assert_eq!(err.to_string(), "invalid meeting transition: stored -> client_open");
    }

    #[tokio::test]
    async fn flaky_broker_is_retried() {
        let report = run_seeded(config(0.3), 3).await.unwrap();

        assert_eq!(report.participant_count, 3);
    }
}
