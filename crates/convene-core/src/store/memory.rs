#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::{DELETION_TIMESTAMP, Document, DocumentStore, FieldValue, StoreError, StoredDocument};
use crate::env::Environment;

/// In-memory document store for tests and simulation
///
/// Documents are kept per collection in a `BTreeMap`, so query results come
/// back in id order. The store's clock comes from the environment: it resolves
/// [`FieldValue::ServerTimestamp`] sentinels on write and purges documents
/// whose `deletion_timestamp` has passed before every read. Clones share
/// state, so one store can stand in for the broker shared by several
/// simulated devices.
#[derive(Clone)]
pub struct MemoryStore<E: Environment> {
    env: E,
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    collections: HashMap<String, BTreeMap<String, Document>>,
}

impl<E: Environment> MemoryStore<E> {
    /// Create an empty store whose clock is `env`.
    pub fn new(env: E) -> Self {
        Self { env, inner: Arc::new(Mutex::new(MemoryStoreInner::default())) }
    }

    /// Number of live documents in a collection.
    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        inner.purge_expired(collection, self.env.wall_clock_secs());
        Ok(inner.collections.get(collection).map_or(0, BTreeMap::len))
    }

    /// Every live document in a collection, in id order.
    ///
    /// Useful for checking what the broker can see.
    pub fn dump(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let mut inner = self.lock()?;
        inner.purge_expired(collection, self.env.wall_clock_secs());
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| StoredDocument { id: id.clone(), fields: fields.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

impl MemoryStoreInner {
    fn purge_expired(&mut self, collection: &str, now: u64) {
        if let Some(docs) = self.collections.get_mut(collection) {
            docs.retain(|_, fields| match fields.get(DELETION_TIMESTAMP) {
                Some(FieldValue::Int(deadline) | FieldValue::Timestamp(deadline)) => *deadline > now,
                _ => true,
            });
        }
    }
}

#[async_trait]
impl<E: Environment> DocumentStore for MemoryStore<E> {
    async fn put(&self, collection: &str, id: &str, mut fields: Document) -> Result<(), StoreError> {
        let now = self.env.wall_clock_secs();
        for value in fields.values_mut() {
            if *value == FieldValue::ServerTimestamp {
                *value = FieldValue::Timestamp(now);
            }
        }

        let mut inner = self.lock()?;
        inner.collections.entry(collection.to_string()).or_default().insert(id.to_string(), fields);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let mut inner = self.lock()?;
        inner.purge_expired(collection, self.env.wall_clock_secs());
        Ok(inner.collections.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &FieldValue,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let mut inner = self.lock()?;
        inner.purge_expired(collection, self.env.wall_clock_secs());
        let Some(docs) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(docs
            .iter()
            .filter(|(_, fields)| fields.get(field) == Some(value))
            .map(|(id, fields)| StoredDocument { id: id.clone(), fields: fields.clone() })
            .collect())
    }
}
