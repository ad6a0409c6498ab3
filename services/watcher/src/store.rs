//! Address record store interface and in-memory implementation.
//!
//! Records map a container name to the last address the watcher observed
//! and reconciled against. They carry a TTL; an expired record reads as
//! absent.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipwatch_reconcile::DEFAULT_RECORD_TTL;
use thiserror::Error;

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed store response: {0}")]
    Decode(String),

    #[error("store did not answer within {0:?}")]
    TimedOut(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable name → address mapping with expiry.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last recorded address, `None` if absent or expired.
    async fn read_address(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Replace the whole record for `name`.
    async fn write_address(&self, name: &str, address: &str, ttl: Duration)
        -> Result<(), StoreError>;
}

/// In-memory store for testing and development.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, (String, Instant)>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    hanging_reads: Mutex<HashSet<String>>,
    hanging_writes: Mutex<HashSet<String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a record with the default TTL.
    pub fn seed(&self, name: &str, address: &str) {
        self.seed_with_ttl(name, address, DEFAULT_RECORD_TTL);
    }

    /// Pre-populate a record. Does not count as a write.
    pub fn seed_with_ttl(&self, name: &str, address: &str, ttl: Duration) {
        lock(&self.records).insert(
            name.to_string(),
            (address.to_string(), Instant::now() + ttl),
        );
    }

    /// Current, unexpired address for `name`.
    pub fn address(&self, name: &str) -> Option<String> {
        lock(&self.records)
            .get(name)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(address, _)| address.clone())
    }

    /// Number of successful writes through the trait.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make reads of `name` fail.
    pub fn fail_reads(&self, name: &str) {
        lock(&self.failing_reads).insert(name.to_string());
    }

    /// Make writes of `name` fail.
    pub fn fail_writes(&self, name: &str) {
        lock(&self.failing_writes).insert(name.to_string());
    }

    /// Make reads of `name` never complete.
    pub fn hang_reads(&self, name: &str) {
        lock(&self.hanging_reads).insert(name.to_string());
    }

    /// Make writes of `name` never complete.
    pub fn hang_writes(&self, name: &str) {
        lock(&self.hanging_writes).insert(name.to_string());
    }

    /// Clear every injected failure.
    pub fn heal(&self) {
        lock(&self.failing_reads).clear();
        lock(&self.failing_writes).clear();
        lock(&self.hanging_reads).clear();
        lock(&self.hanging_writes).clear();
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read_address(&self, name: &str) -> Result<Option<String>, StoreError> {
        let hangs = lock(&self.hanging_reads).contains(name);
        if hangs {
            std::future::pending::<()>().await;
        }
        if lock(&self.failing_reads).contains(name) {
            return Err(StoreError::Unavailable(format!("read of {name} disabled")));
        }
        Ok(self.address(name))
    }

    async fn write_address(
        &self,
        name: &str,
        address: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let hangs = lock(&self.hanging_writes).contains(name);
        if hangs {
            std::future::pending::<()>().await;
        }
        if lock(&self.failing_writes).contains(name) {
            return Err(StoreError::Unavailable(format!("write of {name} disabled")));
        }
        self.seed_with_ttl(name, address, ttl);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
