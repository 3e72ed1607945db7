//! Document store abstraction for the Convene broker
//!
//! The broker is a semi-trusted document database: it sees every published
//! field, so only hashes, pseudonyms and ciphertexts are ever written. The
//! core consumes three operations (`put`, `get`, `query` by field equality)
//! plus a server timestamp sentinel resolved by the store on write.
//!
//! The trait is async: every store call is a cancellation point for the
//! owning session.

mod chaotic;
mod error;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
pub use chaotic::ChaoticStore;
pub use error::StoreError;
pub use memory::MemoryStore;
use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Collection holding published handshakes.
pub const HANDSHAKES: &str = "handshakes";

/// Collection holding sealed meetings.
pub const MEETINGS: &str = "meetings";

/// Collection holding signing blocks, keyed by signable hash.
pub const SIGNING_BLOCKS: &str = "signing_blocks";

/// Collection holding signatures over signing blocks.
pub const SIGNATURES: &str = "signatures";

/// Collection holding signing public keys, keyed by public key id.
pub const PUBLIC_KEYS: &str = "public_keys";

/// Field written as [`FieldValue::ServerTimestamp`] on every record.
pub const SERVER_TIMESTAMP: &str = "server_timestamp";

/// Best-effort TTL field: the store may delete the document after this Unix
/// time.
pub const DELETION_TIMESTAMP: &str = "deletion_timestamp";

/// A single document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// UTF-8 string (hex for binary values)
    Str(String),
    /// Unsigned integer (versions, counts, Unix seconds)
    Int(u64),
    /// List of strings
    StrList(Vec<String>),
    /// Sentinel asking the store to write its own clock on commit
    ServerTimestamp,
    /// Resolved server time in Unix seconds
    Timestamp(u64),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::StrList(value)
    }
}

/// Field name to value map.
pub type Document = BTreeMap<String, FieldValue>;

/// A document together with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Document id within its collection
    pub id: String,
    /// Document fields
    pub fields: Document,
}

/// Document store consumed by the protocol.
///
/// Implementations typically share internal state via Arc, so clones access
/// the same underlying store. The store is shared with every other device:
/// the core never assumes exclusive write access.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or overwrite a document.
    ///
    /// [`FieldValue::ServerTimestamp`] values are replaced by the store's
    /// clock.
    async fn put(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError>;

    /// Fetch a document by id. `None` if absent.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// All documents whose `field` equals `value`. Order is not guaranteed.
    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &FieldValue,
    ) -> Result<Vec<StoredDocument>, StoreError>;
}

/// Builder for outgoing documents.
#[derive(Debug, Default)]
pub(crate) struct DocumentBuilder {
    fields: Document,
}

impl DocumentBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Server timestamp: the resolved value when known, otherwise the
    /// sentinel.
    pub(crate) fn server_timestamp(mut self, resolved: Option<u64>) -> Self {
        let value = resolved.map_or(FieldValue::ServerTimestamp, FieldValue::Timestamp);
        self.fields.insert(SERVER_TIMESTAMP.to_string(), value);
        self
    }

    pub(crate) fn build(self) -> Document {
        self.fields
    }
}

/// Typed field access for incoming documents.
///
/// Every accessor maps absence or a type mismatch to a [`FormatError`]
/// naming the collection and field.
pub(crate) struct DocumentReader<'a> {
    collection: &'static str,
    fields: &'a Document,
}

impl<'a> DocumentReader<'a> {
    pub(crate) fn new(collection: &'static str, fields: &'a Document) -> Self {
        Self { collection, fields }
    }

    fn get(&self, field: &'static str) -> Result<&'a FieldValue, FormatError> {
        self.fields
            .get(field)
            .ok_or(FormatError::MissingField { collection: self.collection, field })
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> FormatError {
        FormatError::InvalidField { collection: self.collection, field, reason: reason.into() }
    }

    pub(crate) fn str(&self, field: &'static str) -> Result<&'a str, FormatError> {
        match self.get(field)? {
            FieldValue::Str(value) => Ok(value),
            other => Err(self.invalid(field, format!("expected string, got {other:?}"))),
        }
    }

    pub(crate) fn int(&self, field: &'static str) -> Result<u64, FormatError> {
        match self.get(field)? {
            FieldValue::Int(value) => Ok(*value),
            other => Err(self.invalid(field, format!("expected integer, got {other:?}"))),
        }
    }

    pub(crate) fn u32(&self, field: &'static str) -> Result<u32, FormatError> {
        let value = self.int(field)?;
        u32::try_from(value).map_err(|_| self.invalid(field, format!("{value} out of range")))
    }

    pub(crate) fn str_list(&self, field: &'static str) -> Result<&'a [String], FormatError> {
        match self.get(field)? {
            FieldValue::StrList(values) => Ok(values),
            other => Err(self.invalid(field, format!("expected string list, got {other:?}"))),
        }
    }

    pub(crate) fn hex(&self, field: &'static str) -> Result<Vec<u8>, FormatError> {
        hex::decode(self.str(field)?).map_err(|e| self.invalid(field, e.to_string()))
    }

    /// Optional timestamp: absent or still the sentinel reads as `None`.
    pub(crate) fn timestamp(&self, field: &'static str) -> Result<Option<u64>, FormatError> {
        match self.fields.get(field) {
            None | Some(FieldValue::ServerTimestamp) => Ok(None),
            Some(FieldValue::Timestamp(secs) | FieldValue::Int(secs)) => Ok(Some(*secs)),
            Some(other) => Err(self.invalid(field, format!("expected timestamp, got {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_writes_sentinel_until_resolved() {
        let doc = DocumentBuilder::new().field("a", "x").server_timestamp(None).build();
        assert_eq!(doc.get(SERVER_TIMESTAMP), Some(&FieldValue::ServerTimestamp));

        let doc = DocumentBuilder::new().server_timestamp(Some(42)).build();
        assert_eq!(doc.get(SERVER_TIMESTAMP), Some(&FieldValue::Timestamp(42)));
    }

    #[test]
    fn reader_reports_missing_field() {
        let doc = Document::new();
        let reader = DocumentReader::new(HANDSHAKES, &doc);

        assert_eq!(
            reader.str("argon_pattern"),
            Err(FormatError::MissingField { collection: HANDSHAKES, field: "argon_pattern" })
        );
    }

    #[test]
    fn reader_rejects_type_mismatch() {
        let doc = DocumentBuilder::new().field("count", "seven").build();
        let reader = DocumentReader::new(PUBLIC_KEYS, &doc);

        assert!(matches!(reader.int("count"), Err(FormatError::InvalidField { field: "count", .. })));
    }

    #[test]
    fn reader_rejects_out_of_range_u32() {
        let doc = DocumentBuilder::new().field("v", u64::MAX).build();
        let reader = DocumentReader::new(MEETINGS, &doc);

        assert!(reader.u32("v").is_err());
    }

    #[test]
    fn reader_rejects_bad_hex() {
        let doc = DocumentBuilder::new().field("key", "zz").build();
        let reader = DocumentReader::new(PUBLIC_KEYS, &doc);

        assert!(matches!(reader.hex("key"), Err(FormatError::InvalidField { field: "key", .. })));
    }

    #[test]
    fn reader_treats_sentinel_as_unresolved() {
        let doc = DocumentBuilder::new().server_timestamp(None).build();
        let reader = DocumentReader::new(MEETINGS, &doc);

        assert_eq!(reader.timestamp(SERVER_TIMESTAMP), Ok(None));
        assert_eq!(reader.timestamp(DELETION_TIMESTAMP), Ok(None));
    }
}
