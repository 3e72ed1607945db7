//! Convene protocol core.
//!
//! Privacy-preserving co-presence discovery and a tamper-evident meeting
//! ledger on top of a semi-trusted document store.
//!
//! # Architecture
//!
//! Devices that observed the same out-of-band secret (a shake pattern, a
//! radio exchange, an NFC tap) publish handshakes under an Argon2id hash of
//! that secret and find each other by querying the store for it. The
//! creator of a meeting then seals the participant list, signs a block of
//! pseudonyms chained to the previous block, and publishes it. The store
//! never sees a secret or a raw identity.
//!
//! ```text
//! ProximityEvent ──> DiscoverySession ──> HandshakeProtocol ──> DocumentStore
//!                          │
//!                          ▼ DiscoveredIdentity
//!                    MeetingLedger ──> Signer ──> KeyRegistry
//! ```
//!
//! # Components
//!
//! - [`HandshakeProtocol`]: build and match discovery handshakes
//! - [`DiscoverySession`]: publish own handshakes and poll for counterparts
//! - [`MeetingLedger`]: meeting drafts, sealing, signing and publication
//! - [`KeyRegistry`]: signing key records with usage counting
//! - [`DocumentStore`]: the broker, with [`MemoryStore`] and
//!   [`ChaoticStore`] for tests
//! - [`Environment`]: randomness and wall clock ([`SystemEnv`],
//!   [`SeededEnv`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod derivation;
pub mod env;
mod error;
mod handshake;
mod key_registry;
mod ledger;
mod meeting;
mod session;
mod signer;
mod signing;
pub mod store;
mod technology;
mod worker;

pub use config::ProtocolConfig;
pub use convene_crypto::KdfParams;
pub use derivation::DerivationCache;
pub use env::{Environment, SeededEnv, SystemEnv};
pub use error::{ConveneError, FormatError, StateError};
pub use handshake::{DiscoveredIdentity, Handshake, HandshakeProtocol, PublicHandshake};
pub use key_registry::{KeyRegistry, SigningKeyRecord};
pub use ledger::{MeetingLedger, SignedBlock};
pub use meeting::{
    DecryptOutcome, MEETING_SECRET_LEN, Meeting, MeetingEncryptedPayload, MeetingSecret,
    MeetingStatus, PublicMeeting, creator_pseudonym,
};
pub use session::{CancelHandle, DiscoverySession, SessionIdentity};
pub use signer::{Ed25519Signer, Signer, verify_signature};
pub use signing::{
    GENESIS_BLOCK_HASH, MEETING_BLOCK_SIGNATURE, SignatureRecord, SigningBlock, pseudonymize,
};
pub use store::{
    ChaoticStore, Document, DocumentStore, FieldValue, MemoryStore, StoreError, StoredDocument,
};
pub use technology::{ProximityEvent, SharedSecret, Technology};
pub use worker::WorkerPool;
