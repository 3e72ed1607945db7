//! Error types for the Convene protocol core.
//!
//! Strongly-typed errors for the distinct failure classes: cryptographic
//! failures, malformed or tampered records, missing prerequisite state, and
//! store failures. Store failures are kept apart from cryptographic ones so
//! callers can decide on retries without inspecting messages.

use convene_crypto::CryptoError;
use thiserror::Error;

use crate::{meeting::MeetingStatus, store::StoreError};

/// A stored record is malformed or has been tampered with.
///
/// Always fatal for the record: it is rejected, never partially trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Required document field is absent
    #[error("missing field `{field}` in {collection} document")]
    MissingField {
        /// Collection the document came from
        collection: &'static str,
        /// Name of the absent field
        field: &'static str,
    },

    /// Document field has the wrong type or an unparseable value
    #[error("invalid field `{field}` in {collection} document: {reason}")]
    InvalidField {
        /// Collection the document came from
        collection: &'static str,
        /// Name of the offending field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Recomputed public key id does not match the stored id
    #[error("public key id mismatch: stored {stored}, computed {computed}")]
    KeyIdMismatch {
        /// Id the record claims
        stored: String,
        /// Id recomputed from the key bytes
        computed: String,
    },

    /// Record was produced by an unsupported protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// Ciphertext blob cannot hold a nonce and a tag
    #[error("malformed ciphertext of {len} bytes")]
    Ciphertext {
        /// Length of the rejected blob
        len: usize,
    },

    /// Payload (de)serialization failed
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// An operation was invoked without its required prior state.
///
/// Indicates a caller bug; correct callers never see these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Lifecycle transition not allowed from the current status
    #[error("invalid meeting transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: MeetingStatus,
        /// Requested status
        to: MeetingStatus,
    },

    /// Meeting has no decrypted payload
    #[error("meeting {meeting_id} has no decrypted payload")]
    MissingPayload {
        /// Meeting the operation was attempted on
        meeting_id: String,
    },

    /// Meeting secret is not held on this device
    #[error("meeting {meeting_id} secret is not available")]
    MissingSecret {
        /// Meeting the operation was attempted on
        meeting_id: String,
    },

    /// Key usage counter cannot be incremented further
    #[error("usage counter overflow for key {public_key_id}")]
    UsageOverflow {
        /// Key whose counter overflowed
        public_key_id: String,
    },
}

/// Errors that can occur in protocol operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConveneError {
    /// AEAD tag mismatch where a successful decrypt was required
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Other cryptographic failure (derivation parameters, chain length)
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Malformed or tampered record
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Missing prerequisite state
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Document store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// External signer failed to produce a signature
    #[error("signer error: {0}")]
    Signer(String),

    /// Signature did not verify against the owner's public key
    #[error("signature does not verify against key {public_key_id}")]
    SignatureMismatch {
        /// Key the signature was checked against
        public_key_id: String,
    },

    /// The owning session was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// A worker thread failed (panicked or the pool shut down)
    #[error("worker error: {0}")]
    Worker(String),
}

impl ConveneError {
    /// Returns true if the operation may succeed if retried unchanged.
    ///
    /// Only an unavailable store is transient. Cryptographic and format
    /// failures are deterministic, and retry policy belongs to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_retryable())
    }

    /// Returns true if the same inputs can never succeed.
    ///
    /// Tampered records, invalid state and bad signatures are fatal; a
    /// cancelled session or a crashed worker is not.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable() && !matches!(self, Self::Cancelled | Self::Worker(_))
    }
}

impl From<CryptoError> for ConveneError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailure => Self::AuthenticationFailure,
            CryptoError::MalformedCiphertext { len } => Self::Format(FormatError::Ciphertext { len }),
            other => Self::Crypto(other),
        }
    }
}
