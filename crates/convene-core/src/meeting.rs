//! Meeting data model and lifecycle.
//!
//! A meeting moves through a fixed lifecycle:
//!
//! ```text
//! ClientCreated ─> ClientOpen <─> ClientClosed
//!       │                              │
//!       └──────────────┬───────────────┘
//!                      ▼
//!                   Signed ─> Submitted ─> Confirmed ─> Stored
//!
//! any non-terminal state ─> Error
//! ```
//!
//! `Stored` and `Error` are terminal. The published half of a meeting
//! ([`PublicMeeting`]) carries only the chain terminal, the sealed payload
//! and the creator's pseudonym; the secret, the decrypted payload and the
//! handshakes stay on the device.

use std::{fmt, str::FromStr};

use convene_crypto::{CipherBlob, NONCE_SIZE, TAG_SIZE, sha256};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    env::Environment,
    error::{FormatError, StateError},
    handshake::{DiscoveredIdentity, PublicHandshake},
    store::{Document, DocumentBuilder, DocumentReader, MEETINGS, SERVER_TIMESTAMP},
};

/// Size of a meeting secret in bytes.
pub const MEETING_SECRET_LEN: usize = 32;

/// Lifecycle status of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeetingStatus {
    /// Draft built from discovered identities
    ClientCreated,
    /// Discovery window open
    ClientOpen,
    /// Discovery window closed
    ClientClosed,
    /// Signing block signed and verified locally
    Signed,
    /// Meeting document written to the store
    Submitted,
    /// Signing block and signature written
    Confirmed,
    /// Block read back and verified
    Stored,
    /// Halted; see `Meeting::error_reason`
    Error,
}

impl MeetingStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::ClientCreated,
        Self::ClientOpen,
        Self::ClientClosed,
        Self::Signed,
        Self::Submitted,
        Self::Confirmed,
        Self::Stored,
        Self::Error,
    ];

    /// Wire name written as `status`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientCreated => "client_created",
            Self::ClientOpen => "client_open",
            Self::ClientClosed => "client_closed",
            Self::Signed => "signed",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Stored => "stored",
            Self::Error => "error",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stored | Self::Error)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: Self) -> bool {
        use MeetingStatus::{
            ClientClosed, ClientCreated, ClientOpen, Confirmed, Error, Signed, Stored, Submitted,
        };

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (_, Error)
                | (ClientCreated | ClientClosed, ClientOpen | Signed)
                | (ClientOpen, ClientClosed)
                | (Signed, Submitted)
                | (Submitted, Confirmed)
                | (Confirmed, Stored)
        )
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeetingStatus {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|status| status.as_str() == s).ok_or_else(|| {
            FormatError::InvalidField {
                collection: MEETINGS,
                field: "status",
                reason: format!("unknown status `{s}`"),
            }
        })
    }
}

/// Random secret generated once per meeting by its creator.
///
/// Zeroized on drop; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct MeetingSecret([u8; MEETING_SECRET_LEN]);

impl MeetingSecret {
    /// Fresh secret from the environment's RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        Self(env.random_array())
    }

    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; MEETING_SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the hex form shown to the creator.
    pub fn from_hex(hex_secret: &str) -> Result<Self, FormatError> {
        let mut bytes = [0u8; MEETING_SECRET_LEN];
        hex::decode_to_slice(hex_secret, &mut bytes).map_err(|e| FormatError::InvalidField {
            collection: MEETINGS,
            field: "meeting_secret",
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; MEETING_SECRET_LEN] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for MeetingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MeetingSecret(<redacted>)")
    }
}

impl Drop for MeetingSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Plaintext sealed into a meeting's `encrypted_payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingEncryptedPayload {
    /// Human-readable meeting name
    pub meeting_name: String,
    /// Public digest in force when the meeting was created
    pub public_digest_used: String,
    /// Raw participant ids, creator first, without duplicates
    pub participant_ids: Vec<String>,
    /// Identities discovered through handshakes
    pub discovered_identities: Vec<DiscoveredIdentity>,
    /// Hex signatures collected for this meeting
    pub signatures: Vec<String>,
}

impl MeetingEncryptedPayload {
    /// CBOR encoding.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| FormatError::Encoding(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        ciborium::from_reader(bytes).map_err(|e| FormatError::Encoding(e.to_string()))
    }
}

/// Pseudonym published as `created_by`.
///
/// `hex(SHA-256(creator_id || 0x00 || meeting_id))`: stable per meeting,
/// unlinkable across meetings without the raw id.
pub fn creator_pseudonym(creator_id: &str, meeting_id: &str) -> String {
    let mut input = Vec::with_capacity(creator_id.len() + 1 + meeting_id.len());
    input.extend_from_slice(creator_id.as_bytes());
    input.push(0);
    input.extend_from_slice(meeting_id.as_bytes());
    hex::encode(sha256(&input))
}

/// A meeting: published fields plus client-only state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    /// Meeting id, also the store document id
    pub id: String,
    /// Raw creator id; only known on the creator's device or after decrypt
    pub creator_id: Option<String>,
    /// Creator pseudonym published as `created_by`
    pub created_by: String,
    /// Creation time, Unix seconds
    pub created_at: u64,
    status: MeetingStatus,
    /// Nonce of the current sealed payload
    pub encryption_nonce: Option<[u8; NONCE_SIZE]>,
    /// Terminal of the hash chain seeded by the meeting secret (hex)
    pub hashed_meeting_secret: String,
    /// Meeting name
    pub meeting_name: String,
    /// Number of participants, creator included
    pub participant_count: u64,
    /// Sealed payload, once encrypted
    pub encrypted_payload: Option<CipherBlob>,
    /// Meeting secret (client only)
    pub meeting_secret: Option<MeetingSecret>,
    /// Decrypted payload (client only)
    pub decrypted_payload: Option<MeetingEncryptedPayload>,
    /// Handshakes collected during discovery (client only)
    pub handshakes: Vec<PublicHandshake>,
    /// Why the meeting halted, when `status` is `Error`
    pub error_reason: Option<String>,
}

impl Meeting {
    /// Assemble a fresh draft in `ClientCreated`.
    pub(crate) fn draft(
        id: String,
        creator_id: String,
        created_at: u64,
        hashed_meeting_secret: String,
        secret: MeetingSecret,
        payload: MeetingEncryptedPayload,
    ) -> Self {
        Self {
            created_by: creator_pseudonym(&creator_id, &id),
            id,
            creator_id: Some(creator_id),
            created_at,
            status: MeetingStatus::ClientCreated,
            encryption_nonce: None,
            hashed_meeting_secret,
            meeting_name: payload.meeting_name.clone(),
            participant_count: payload.participant_ids.len() as u64,
            encrypted_payload: None,
            meeting_secret: Some(secret),
            decrypted_payload: Some(payload),
            handshakes: Vec::new(),
            error_reason: None,
        }
    }

    /// Rebuild the client view of a published meeting (no secret, no
    /// plaintext).
    pub fn from_public(public: PublicMeeting) -> Self {
        Self {
            id: public.id,
            creator_id: None,
            created_by: public.created_by,
            created_at: public.created_at,
            status: public.status,
            encryption_nonce: Some(public.encrypted_payload.nonce),
            hashed_meeting_secret: public.hashed_meeting_secret,
            meeting_name: public.meeting_name,
            participant_count: public.participant_count,
            encrypted_payload: Some(public.encrypted_payload),
            meeting_secret: None,
            decrypted_payload: None,
            handshakes: Vec::new(),
            error_reason: None,
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> MeetingStatus {
        self.status
    }

    /// Move to `next`, or fail with `InvalidTransition`.
    pub fn transition(&mut self, next: MeetingStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition { from: self.status, to: next });
        }

        tracing::debug!(meeting_id = %self.id, from = %self.status, to = %next, "meeting transition");
        self.status = next;
        Ok(())
    }

    /// Halt the meeting in `Error`.
    ///
    /// A meeting already in a terminal status keeps it.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.status.is_terminal() {
            tracing::warn!(meeting_id = %self.id, status = %self.status, %reason, "failure after terminal status");
            return;
        }

        tracing::warn!(meeting_id = %self.id, from = %self.status, %reason, "meeting halted");
        self.status = MeetingStatus::Error;
        self.error_reason = Some(reason);
    }

    /// Published view; requires a sealed payload.
    pub fn public_view(&self, protocol_version: u32) -> Result<PublicMeeting, StateError> {
        let encrypted_payload = self
            .encrypted_payload
            .clone()
            .ok_or_else(|| StateError::MissingPayload { meeting_id: self.id.clone() })?;

        Ok(PublicMeeting {
            id: self.id.clone(),
            protocol_version,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            server_timestamp: None,
            status: self.status,
            hashed_meeting_secret: self.hashed_meeting_secret.clone(),
            meeting_name: self.meeting_name.clone(),
            participant_count: self.participant_count,
            encrypted_payload,
        })
    }
}

/// Fields of a meeting visible to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicMeeting {
    /// Meeting id (document id)
    pub id: String,
    /// Protocol version of the writer
    pub protocol_version: u32,
    /// Creator pseudonym
    pub created_by: String,
    /// Creation time, Unix seconds
    pub created_at: u64,
    /// Store write time, once resolved
    pub server_timestamp: Option<u64>,
    /// Lifecycle status at write time
    pub status: MeetingStatus,
    /// Hash chain terminal (hex)
    pub hashed_meeting_secret: String,
    /// Meeting name
    pub meeting_name: String,
    /// Number of participants
    pub participant_count: u64,
    /// Sealed payload; its nonce is published as `encryption_nonce`
    pub encrypted_payload: CipherBlob,
}

impl PublicMeeting {
    /// Document written to the `meetings` collection.
    ///
    /// `encryption_nonce` holds the nonce; `encrypted_payload` holds
    /// ciphertext and tag only.
    pub fn to_document(&self) -> Document {
        DocumentBuilder::new()
            .field("protocol_version", u64::from(self.protocol_version))
            .field("created_by", self.created_by.as_str())
            .field("created_at", self.created_at)
            .server_timestamp(self.server_timestamp)
            .field("status", self.status.as_str())
            .field("encryption_nonce", hex::encode(self.encrypted_payload.nonce))
            .field("hashed_meeting_secret", self.hashed_meeting_secret.as_str())
            .field("meeting_name", self.meeting_name.as_str())
            .field("participant_count", self.participant_count)
            .field("encrypted_payload", hex::encode(&self.encrypted_payload.ciphertext))
            .build()
    }

    /// Parse a `meetings` document.
    pub fn from_document(id: &str, doc: &Document) -> Result<Self, FormatError> {
        let reader = DocumentReader::new(MEETINGS, doc);

        let nonce_bytes = reader.hex("encryption_nonce")?;
        let nonce: [u8; NONCE_SIZE] =
            nonce_bytes.as_slice().try_into().map_err(|_| FormatError::InvalidField {
                collection: MEETINGS,
                field: "encryption_nonce",
                reason: format!("expected {NONCE_SIZE} bytes, got {}", nonce_bytes.len()),
            })?;

        let ciphertext = reader.hex("encrypted_payload")?;
        if ciphertext.len() < TAG_SIZE {
            return Err(FormatError::Ciphertext { len: NONCE_SIZE + ciphertext.len() });
        }

        Ok(Self {
            id: id.to_string(),
            protocol_version: reader.u32("protocol_version")?,
            created_by: reader.str("created_by")?.to_string(),
            created_at: reader.int("created_at")?,
            server_timestamp: reader.timestamp(SERVER_TIMESTAMP)?,
            status: reader.str("status")?.parse()?,
            hashed_meeting_secret: reader.str("hashed_meeting_secret")?.to_string(),
            meeting_name: reader.str("meeting_name")?.to_string(),
            participant_count: reader.int("participant_count")?,
            encrypted_payload: CipherBlob { nonce, ciphertext },
        })
    }
}

/// Result of decrypting a meeting with a candidate secret.
///
/// The non-success cases hand back the meeting unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// Payload decrypted and decoded; the meeting now holds secret and
    /// plaintext
    Decrypted(Meeting),
    /// Candidate secret does not open the payload
    WrongSecret(Meeting),
    /// Payload is missing, malformed or undecodable
    Corrupt {
        /// The unchanged meeting
        meeting: Meeting,
        /// What was wrong
        reason: String,
    },
}

impl DecryptOutcome {
    /// The meeting, whatever the outcome.
    pub fn into_meeting(self) -> Meeting {
        match self {
            Self::Decrypted(meeting) | Self::WrongSecret(meeting) | Self::Corrupt { meeting, .. } => {
                meeting
            },
        }
    }

    /// Whether the payload was opened.
    pub fn is_decrypted(&self) -> bool {
        matches!(self, Self::Decrypted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> MeetingEncryptedPayload {
        MeetingEncryptedPayload {
            meeting_name: "standup".to_string(),
            public_digest_used: "D1".to_string(),
            participant_ids: vec!["u1".to_string(), "u2".to_string()],
            discovered_identities: Vec::new(),
            signatures: Vec::new(),
        }
    }

    fn sample_meeting() -> Meeting {
        Meeting::draft(
            "m1".to_string(),
            "u1".to_string(),
            100,
            "ab".repeat(32),
            MeetingSecret::from_bytes([7; 32]),
            sample_payload(),
        )
    }

    #[test]
    fn status_wire_names_parse_back() {
        for status in MeetingStatus::ALL {
            assert_eq!(status.as_str().parse::<MeetingStatus>().unwrap(), status);
        }
        assert!("archived".parse::<MeetingStatus>().is_err());
    }

    #[test]
    fn happy_path_transitions() {
        let mut meeting = sample_meeting();
        for next in [
            MeetingStatus::ClientOpen,
            MeetingStatus::ClientClosed,
            MeetingStatus::ClientOpen,
            MeetingStatus::ClientClosed,
            MeetingStatus::Signed,
            MeetingStatus::Submitted,
            MeetingStatus::Confirmed,
            MeetingStatus::Stored,
        ] {
            meeting.transition(next).unwrap();
        }
        assert_eq!(meeting.status(), MeetingStatus::Stored);
    }

    #[test]
    fn cannot_sign_while_open() {
        let mut meeting = sample_meeting();
        meeting.transition(MeetingStatus::ClientOpen).unwrap();

        let err = meeting.transition(MeetingStatus::Signed).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition { from: MeetingStatus::ClientOpen, to: MeetingStatus::Signed }
        );
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for terminal in [MeetingStatus::Stored, MeetingStatus::Error] {
            for next in MeetingStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn error_reachable_from_every_non_terminal_status() {
        for status in MeetingStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(MeetingStatus::Error));
        }
    }

    #[test]
    fn fail_records_reason_once() {
        let mut meeting = sample_meeting();
        meeting.fail("store rejected write");

        assert_eq!(meeting.status(), MeetingStatus::Error);
        assert_eq!(meeting.error_reason.as_deref(), Some("store rejected write"));

        meeting.fail("second failure");
        assert_eq!(meeting.error_reason.as_deref(), Some("store rejected write"));
    }

    #[test]
    fn draft_fills_published_fields() {
        let meeting = sample_meeting();

        assert_eq!(meeting.status(), MeetingStatus::ClientCreated);
        assert_eq!(meeting.participant_count, 2);
        assert_eq!(meeting.meeting_name, "standup");
        assert_eq!(meeting.created_by, creator_pseudonym("u1", "m1"));
        assert_ne!(meeting.created_by, "u1");
    }

    #[test]
    fn creator_pseudonym_differs_per_meeting() {
        assert_ne!(creator_pseudonym("u1", "m1"), creator_pseudonym("u1", "m2"));
        assert_ne!(creator_pseudonym("u1", "m1"), creator_pseudonym("u1m", "1"));
    }

    #[test]
    fn public_view_requires_sealed_payload() {
        let meeting = sample_meeting();
        assert_eq!(
            meeting.public_view(1),
            Err(StateError::MissingPayload { meeting_id: "m1".to_string() })
        );
    }

    #[test]
    fn public_document_never_contains_raw_ids() {
        let mut meeting = sample_meeting();
        meeting.encrypted_payload = Some(CipherBlob { nonce: [1; NONCE_SIZE], ciphertext: vec![2; 40] });

        let doc = meeting.public_view(1).unwrap().to_document();
        for value in doc.values() {
            if let crate::store::FieldValue::Str(s) = value {
                assert_ne!(s, "u1");
                assert_ne!(s, "u2");
            }
        }
        assert!(!doc.contains_key("meeting_secret"));
    }

    #[test]
    fn public_document_parses_back() {
        let mut meeting = sample_meeting();
        meeting.encrypted_payload = Some(CipherBlob { nonce: [1; NONCE_SIZE], ciphertext: vec![2; 40] });
        let public = meeting.public_view(1).unwrap();

        let parsed = PublicMeeting::from_document("m1", &public.to_document()).unwrap();
        assert_eq!(parsed, public);
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let mut meeting = sample_meeting();
        meeting.encrypted_payload = Some(CipherBlob { nonce: [1; NONCE_SIZE], ciphertext: vec![2; 4] });
        let doc = meeting.public_view(1).unwrap().to_document();

        assert_eq!(
            PublicMeeting::from_document("m1", &doc),
            Err(FormatError::Ciphertext { len: NONCE_SIZE + 4 })
        );
    }

    #[test]
    fn payload_cbor_roundtrip() {
        let payload = sample_payload();
        assert_eq!(MeetingEncryptedPayload::decode(&payload.encode().unwrap()).unwrap(), payload);
        assert!(MeetingEncryptedPayload::decode(b"\xff\x00").is_err());
    }

    #[test]
    fn meeting_secret_hex_and_debug() {
        let secret = MeetingSecret::from_bytes([0xab; 32]);
        assert_eq!(MeetingSecret::from_hex(&secret.to_hex()).unwrap(), secret);
        assert!(MeetingSecret::from_hex("abcd").is_err());
        assert!(!format!("{secret:?}").contains("ab"));
    }
}
