//! Signing blocks and signature records.
//!
//! A signing block seals a meeting's participant list into the ledger. It
//! names participants and related meetings only by pseudonym (HMAC chains
//! keyed by the meeting secret) and links to the previous block by hash.
//!
//! # Signable hash
//!
//! ```text
//! signable_hash = SHA-256(
//!     field(meeting_id)
//!     list(sort(hashed_participant_ids))
//!     list(sort(hashed_related_meeting_ids))
//!     field(hashed_meeting_secret)
//!     field(previous_block_hash)
//! )
//!
//! field(x) = u32_be(len(x)) || x
//! list(xs) = u32_be(count(xs)) || field(xs[0]) || field(xs[1]) || ...
//! ```
//!
//! Framing every element means distinct blocks never serialize to the same
//! bytes. Lists are sorted so the hash is independent of discovery order.
//! `created_at` is not hashed.

use convene_crypto::{CryptoError, Hash256, keyed_chain, sha256};

use crate::{
    error::FormatError,
    meeting::MeetingSecret,
    store::{Document, DocumentBuilder, DocumentReader, SIGNATURES, SIGNING_BLOCKS},
};

/// `previous_block_hash` of the first block in a ledger.
pub const GENESIS_BLOCK_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// `type` of a signature over a meeting signing block.
pub const MEETING_BLOCK_SIGNATURE: &str = "meeting_block";

/// Pseudonym of `raw_id` within one meeting.
///
/// Keyed chain of `rounds` HMAC-SHA256 applications keyed by the meeting
/// secret; hex encoded.
pub fn pseudonymize(raw_id: &str, secret: &MeetingSecret, rounds: usize) -> Result<String, CryptoError> {
    keyed_chain(raw_id.as_bytes(), secret.as_bytes(), rounds).map(hex::encode)
}

/// Ledger block sealing one meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningBlock {
    /// Meeting being sealed
    pub meeting_id: String,
    /// Participant pseudonyms, sorted
    pub hashed_participant_ids: Vec<String>,
    /// Related meeting pseudonyms, sorted
    pub hashed_related_meeting_ids: Vec<String>,
    /// Terminal of the meeting secret chain
    pub hashed_meeting_secret: String,
    /// Hash of the previous block, or [`GENESIS_BLOCK_HASH`]
    pub previous_block_hash: String,
    /// Creation time, Unix seconds (not hashed)
    pub created_at: u64,
}

impl SigningBlock {
    /// New block; id lists are sorted.
    pub fn new(
        meeting_id: impl Into<String>,
        mut hashed_participant_ids: Vec<String>,
        mut hashed_related_meeting_ids: Vec<String>,
        hashed_meeting_secret: impl Into<String>,
        previous_block_hash: impl Into<String>,
        created_at: u64,
    ) -> Self {
        hashed_participant_ids.sort();
        hashed_related_meeting_ids.sort();
        Self {
            meeting_id: meeting_id.into(),
            hashed_participant_ids,
            hashed_related_meeting_ids,
            hashed_meeting_secret: hashed_meeting_secret.into(),
            previous_block_hash: previous_block_hash.into(),
            created_at,
        }
    }

    /// Hash covered by the signature.
    pub fn signable_hash(&self) -> Hash256 {
        let mut buf = Vec::new();
        put_field(&mut buf, self.meeting_id.as_bytes());
        put_list(&mut buf, &self.hashed_participant_ids);
        put_list(&mut buf, &self.hashed_related_meeting_ids);
        put_field(&mut buf, self.hashed_meeting_secret.as_bytes());
        put_field(&mut buf, self.previous_block_hash.as_bytes());
        sha256(&buf)
    }

    /// Hex signable hash; also the block's document id.
    pub fn signable_hash_hex(&self) -> String {
        hex::encode(self.signable_hash())
    }

    /// Document written to `signing_blocks`.
    pub fn to_document(&self) -> Document {
        DocumentBuilder::new()
            .field("meeting_id", self.meeting_id.as_str())
            .field("hashed_participant_ids", self.hashed_participant_ids.clone())
            .field("hashed_other_meeting_ids", self.hashed_related_meeting_ids.clone())
            .field("hashed_meeting_secret", self.hashed_meeting_secret.as_str())
            .field("previous_block_hash", self.previous_block_hash.as_str())
            .field("created_at", self.created_at)
            .server_timestamp(None)
            .build()
    }

    /// Parse a `signing_blocks` document.
    pub fn from_document(doc: &Document) -> Result<Self, FormatError> {
        let reader = DocumentReader::new(SIGNING_BLOCKS, doc);
        Ok(Self::new(
            reader.str("meeting_id")?,
            reader.str_list("hashed_participant_ids")?.to_vec(),
            reader.str_list("hashed_other_meeting_ids")?.to_vec(),
            reader.str("hashed_meeting_secret")?,
            reader.str("previous_block_hash")?,
            reader.int("created_at")?,
        ))
    }
}

fn put_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn put_list(buf: &mut Vec<u8>, items: &[String]) {
    let mut sorted: Vec<&String> = items.iter().collect();
    sorted.sort();

    buf.extend_from_slice(&(sorted.len() as u32).to_be_bytes());
    for item in sorted {
        put_field(buf, item.as_bytes());
    }
}

/// A signature over a signing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    /// Hex signature bytes
    pub signature: String,
    /// Signer's `hashed_owner_id`
    pub signed_by: String,
    /// Signing key id
    pub public_key_id: String,
    /// Key usage count after this signature
    pub generation: u64,
    /// Kind of data signed (`type` on the wire)
    pub record_type: String,
    /// Signing time, Unix seconds
    pub created_at: u64,
    /// Hex hash that was signed
    pub signed_data_hash: String,
}

impl SignatureRecord {
    /// Document written to `signatures`.
    pub fn to_document(&self) -> Document {
        DocumentBuilder::new()
            .field("signature", self.signature.as_str())
            .field("signed_by", self.signed_by.as_str())
            .field("public_key_id", self.public_key_id.as_str())
            .field("generation", self.generation)
            .field("type", self.record_type.as_str())
            .field("created_at", self.created_at)
            .field("signed_data_hash", self.signed_data_hash.as_str())
            .build()
    }

    /// Parse a `signatures` document.
    pub fn from_document(doc: &Document) -> Result<Self, FormatError> {
        let reader = DocumentReader::new(SIGNATURES, doc);
        Ok(Self {
            signature: reader.str("signature")?.to_string(),
            signed_by: reader.str("signed_by")?.to_string(),
            public_key_id: reader.str("public_key_id")?.to_string(),
            generation: reader.int("generation")?,
            record_type: reader.str("type")?.to_string(),
            created_at: reader.int("created_at")?,
            signed_data_hash: reader.str("signed_data_hash")?.to_string(),
        })
    }
}
