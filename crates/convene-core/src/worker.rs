//! Bounded pool for CPU-heavy work.
//!
//! Argon2id derivations take hundreds of milliseconds and must never run on
//! an async task. Jobs go to tokio's blocking threads, gated by a semaphore
//! so at most `max_workers` run at once regardless of how many candidates a
//! poll returns.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::ConveneError;

/// Bounded offload of blocking jobs.
///
/// Clones share the same permits.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    /// Pool running at most `max_workers` jobs concurrently (at least one).
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self { permits: Arc::new(Semaphore::new(max_workers)), max_workers }
    }

    /// Configured concurrency limit.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a permit is free.
    ///
    /// The permit is held until the job returns, even if the awaiting task
    /// is dropped first.
    ///
    /// # Errors
    ///
    /// - `Worker` if the job panicked
    pub async fn run<F, T>(&self, job: F) -> Result<T, ConveneError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ConveneError::Worker("worker pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| ConveneError::Worker(e.to_string()))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_WORKERS)
    }
}
