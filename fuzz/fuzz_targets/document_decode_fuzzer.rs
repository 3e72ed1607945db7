//! Fuzz target for broker document decoding
//!
//! The broker is semi-trusted: every document read back from it may be
//! malformed, truncated or forged.
//!
//! # Strategy
//!
//! - Field names drawn mostly from the real schemas so decoders get past
//!   the first missing field
//! - Every value variant in every position (type confusion)
//! - Odd-length and non-hex strings where hex is expected
//!
//! # Invariants
//!
//! - Decoding returns an error instead of panicking
//! - A decoded record re-encodes to a document that decodes again
//! - A decoded key record's id is the hash of its key bytes

#![no_main]

use arbitrary::Arbitrary;
use convene_core::{
    Document, FieldValue, PublicHandshake, PublicMeeting, SignatureRecord, SigningBlock,
    SigningKeyRecord,
};
use libfuzzer_sys::fuzz_target;

const FIELD_NAMES: &[&str] = &[
    "argon_pattern",
    "argon_userid",
    "encrypted_payload",
    "encryption_nonce",
    "technology_type",
    "protocol_version",
    "created_at",
    "server_timestamp",
    "deletion_timestamp",
    "created_by",
    "status",
    "hashed_meeting_secret",
    "meeting_name",
    "participant_count",
    "meeting_id",
    "hashed_participant_ids",
    "hashed_other_meeting_ids",
    "previous_block_hash",
    "signature",
    "signed_by",
    "public_key_id",
    "generation",
    "type",
    "signed_data_hash",
    "hashed_owner_id",
    "key",
    "usage_count",
    "client_label",
];

#[derive(Debug, Arbitrary)]
enum FuzzValue {
    Str(String),
    Hex(Vec<u8>),
    Int(u64),
    List(Vec<String>),
    ServerTimestamp,
    Timestamp(u64),
}

impl From<FuzzValue> for FieldValue {
    fn from(value: FuzzValue) -> Self {
        match value {
            FuzzValue::Str(s) => FieldValue::Str(s),
            FuzzValue::Hex(bytes) => FieldValue::Str(hex::encode(bytes)),
            FuzzValue::Int(n) => FieldValue::Int(n),
            FuzzValue::List(items) => FieldValue::StrList(items),
            FuzzValue::ServerTimestamp => FieldValue::ServerTimestamp,
            FuzzValue::Timestamp(t) => FieldValue::Timestamp(t),
        }
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzDocument {
    id: String,
    fields: Vec<(u8, Option<String>, FuzzValue)>,
}

fuzz_target!(|input: FuzzDocument| {
    let mut doc = Document::new();
    for (index, custom, value) in input.fields {
        let name = custom.unwrap_or_else(|| {
            FIELD_NAMES[index as usize % FIELD_NAMES.len()].to_string()
        });
        doc.insert(name, value.into());
    }

    if let Ok(handshake) = PublicHandshake::from_document(&input.id, &doc) {
        assert!(PublicHandshake::from_document(&input.id, &handshake.to_document()).is_ok());
    }

    if let Ok(meeting) = PublicMeeting::from_document(&input.id, &doc) {
        assert!(PublicMeeting::from_document(&input.id, &meeting.to_document()).is_ok());
    }

    if let Ok(block) = SigningBlock::from_document(&doc) {
        let reparsed = SigningBlock::from_document(&block.to_document());
        assert_eq!(reparsed.map(|b| b.signable_hash()).ok(), Some(block.signable_hash()));
    }

    if let Ok(signature) = SignatureRecord::from_document(&doc) {
        assert!(SignatureRecord::from_document(&signature.to_document()).is_ok());
    }

    if let Ok(record) = SigningKeyRecord::from_document(&input.id, &doc) {
        assert_eq!(record.public_key_id, SigningKeyRecord::compute_key_id(&record.public_key_bytes));
    }
});
