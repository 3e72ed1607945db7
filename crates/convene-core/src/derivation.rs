//! Single-flight cache for Argon2id derivations.
//!
//! Matching a poll result needs the derived material for the caller's own
//! `(secret, digest)` pair, and many candidates may be checked at once. Each
//! pair maps to one [`OnceCell`]: the first caller runs the derivation on the
//! worker pool, every concurrent caller awaits the same cell. If the first
//! caller is cancelled the cell stays empty and the next caller derives.
//!
//! Map keys are SHA-256 digests of the length-prefixed inputs, so the cache
//! never holds a secret in a key.

#![allow(clippy::disallowed_types, reason = "Lock held only to clone a cell")]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use convene_crypto::{DerivedMaterial, Hash256, KdfParams, derive, derive_user_hash, sha256};
use tokio::sync::OnceCell;

use crate::{error::ConveneError, technology::SharedSecret, worker::WorkerPool};

type CellMap<T> = Mutex<HashMap<Hash256, Arc<OnceCell<T>>>>;

/// Cached discovery derivations for one protocol instance.
pub struct DerivationCache {
    params: KdfParams,
    pool: WorkerPool,
    materials: CellMap<Arc<DerivedMaterial>>,
    user_hashes: CellMap<String>,
    derivations: AtomicUsize,
}

impl DerivationCache {
    /// Empty cache deriving with `params` on `pool`.
    pub fn new(params: KdfParams, pool: WorkerPool) -> Self {
        Self {
            params,
            pool,
            materials: Mutex::new(HashMap::new()),
            user_hashes: Mutex::new(HashMap::new()),
            derivations: AtomicUsize::new(0),
        }
    }

    /// Derived material for `(secret, digest)`, computing it at most once.
    pub async fn material(
        &self,
        secret: &SharedSecret,
        digest: &str,
    ) -> Result<Arc<DerivedMaterial>, ConveneError> {
        let cell = cell_for(&self.materials, cache_key(b"material", secret.as_bytes(), digest));

        let material = cell
            .get_or_try_init(|| async {
                self.derivations.fetch_add(1, Ordering::Relaxed);
                let secret = secret.clone();
                let digest = digest.to_string();
                let params = self.params;

                let material =
                    self.pool.run(move || derive(secret.as_bytes(), &digest, &params)).await??;
                Ok::<_, ConveneError>(Arc::new(material))
            })
            .await?;

        Ok(Arc::clone(material))
    }

    /// Public user hash for `(user_id, digest)`, computing it at most once.
    pub async fn user_hash(&self, user_id: &str, digest: &str) -> Result<String, ConveneError> {
        let cell = cell_for(&self.user_hashes, cache_key(b"user", user_id.as_bytes(), digest));

        let hash = cell
            .get_or_try_init(|| async {
                self.derivations.fetch_add(1, Ordering::Relaxed);
                let user_id = user_id.to_string();
                let digest = digest.to_string();
                let params = self.params;

                let hash = self.pool.run(move || derive_user_hash(&user_id, &digest, &params)).await??;
                Ok::<_, ConveneError>(hash)
            })
            .await?;

        Ok(hash.clone())
    }

    /// Number of derivations started (cache misses).
    pub fn derivation_count(&self) -> usize {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Drop every cached entry, e.g. when the public digest rotates.
    pub fn clear(&self) {
        self.materials.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.user_hashes.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

fn cell_for<T>(map: &CellMap<T>, key: Hash256) -> Arc<OnceCell<T>> {
    let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(map.entry(key).or_default())
}

/// `SHA-256(domain || len(input) || input || digest)`
fn cache_key(domain: &[u8], input: &[u8], digest: &str) -> Hash256 {
    let mut bytes = Vec::with_capacity(domain.len() + 4 + input.len() + digest.len());
    bytes.extend_from_slice(domain);
    bytes.extend_from_slice(&(input.len() as u32).to_be_bytes());
    bytes.extend_from_slice(input);
    bytes.extend_from_slice(digest.as_bytes());
    sha256(&bytes)
}
