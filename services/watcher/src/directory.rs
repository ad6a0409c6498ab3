//! Container directory interface and in-memory implementation.
//!
//! The directory abstracts the orchestrator metadata API:
//! - Listing managed containers
//! - Looking up running containers by name
//! - Restarting a container and waiting until it runs again
//!
//! An in-memory implementation is provided for testing and development.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ipwatch_reconcile::{ManagedContainer, ManagedFilter, RUNNING_STATE};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from directory calls. Always transient from the engine's view.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("directory returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("container {id} exposes no restart action")]
    ActionUnavailable { id: String },

    #[error("container {id} not running after {attempts} polls")]
    WaitExhausted { id: String, attempts: u32 },

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Orchestrator view consumed by the reconciliation engine.
#[async_trait]
pub trait ContainerDirectory: Send + Sync {
    /// List the containers selected by `filter`.
    async fn list_managed(
        &self,
        filter: &ManagedFilter,
    ) -> Result<Vec<ManagedContainer>, DirectoryError>;

    /// All running containers named `name`. More than one is a valid answer.
    async fn find_running_by_name(&self, name: &str)
        -> Result<Vec<ManagedContainer>, DirectoryError>;

    /// Restart a container and block until it reports `running` again.
    async fn restart_and_wait(&self, id: &str) -> Result<(), DirectoryError>;
}

struct Entry {
    container: ManagedContainer,
    state: String,
}

/// Fixed, in-memory directory for testing and development.
///
/// Every restart attempt is journaled by container name, including the
/// ones configured to fail or hang.
#[derive(Default)]
pub struct StaticDirectory {
    entries: Mutex<Vec<Entry>>,
    restart_attempts: Mutex<Vec<String>>,
    failing_restarts: Mutex<HashSet<String>>,
    hanging_restarts: Mutex<HashSet<String>>,
    failing_lookups: Mutex<HashSet<String>>,
    failing_listing: AtomicBool,
    hanging_listing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running container.
    pub fn insert(&self, container: ManagedContainer) {
        self.insert_with_state(container, RUNNING_STATE);
    }

    /// Add a container in an arbitrary orchestrator state.
    pub fn insert_with_state(&self, container: ManagedContainer, state: &str) {
        lock(&self.entries).push(Entry {
            container,
            state: state.to_string(),
        });
    }

    /// Change the reported address of every container named `name`.
    pub fn set_address(&self, name: &str, address: &str) {
        for entry in lock(&self.entries).iter_mut() {
            if entry.container.name == name {
                entry.container.address = Some(address.to_string());
            }
        }
    }

    /// Make restarts of `name` fail.
    pub fn fail_restart(&self, name: &str) {
        lock(&self.failing_restarts).insert(name.to_string());
    }

    /// Make restarts of `name` never complete.
    pub fn hang_restart(&self, name: &str) {
        lock(&self.hanging_restarts).insert(name.to_string());
    }

    /// Make lookups of `name` fail.
    pub fn fail_lookup(&self, name: &str) {
        lock(&self.failing_lookups).insert(name.to_string());
    }

    /// Make listing managed containers fail.
    pub fn fail_listing(&self, fail: bool) {
        self.failing_listing.store(fail, Ordering::SeqCst);
    }

    /// Make listing managed containers never complete.
    pub fn hang_listing(&self, hang: bool) {
        self.hanging_listing.store(hang, Ordering::SeqCst);
    }

    /// Clear every injected failure.
    pub fn heal(&self) {
        lock(&self.failing_restarts).clear();
        lock(&self.hanging_restarts).clear();
        lock(&self.failing_lookups).clear();
        self.fail_listing(false);
        self.hang_listing(false);
    }

    /// Names of restarted containers, in attempt order.
    pub fn restart_attempts(&self) -> Vec<String> {
        lock(&self.restart_attempts).clone()
    }

    /// Number of calls made through the trait.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerDirectory for StaticDirectory {
    async fn list_managed(
        &self,
        filter: &ManagedFilter,
    ) -> Result<Vec<ManagedContainer>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging_listing.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing_listing.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("listing disabled".to_string()));
        }

        let managed: Vec<_> = lock(&self.entries)
            .iter()
            .filter(|entry| filter.matches(&entry.container.labels, &entry.state))
            .map(|entry| entry.container.clone())
            .collect();
        debug!(count = managed.len(), "[STATIC] Listed managed containers");

        Ok(managed)
    }

    async fn find_running_by_name(
        &self,
        name: &str,
    ) -> Result<Vec<ManagedContainer>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing_lookups).contains(name) {
            return Err(DirectoryError::Unavailable(format!("lookup of {name} disabled")));
        }

        Ok(lock(&self.entries)
            .iter()
            .filter(|entry| entry.container.name == name && entry.state == RUNNING_STATE)
            .map(|entry| entry.container.clone())
            .collect())
    }

    async fn restart_and_wait(&self, id: &str) -> Result<(), DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = lock(&self.entries)
            .iter()
            .find(|entry| entry.container.id == id)
            .map(|entry| entry.container.name.clone())
            .ok_or_else(|| DirectoryError::Status {
                status: 404,
                body: format!("no container {id}"),
            })?;

        info!(container_id = %id, name = %name, "[STATIC] Restarting container");
        lock(&self.restart_attempts).push(name.clone());

        let hangs = lock(&self.hanging_restarts).contains(&name);
        if hangs {
            std::future::pending::<()>().await;
        }
        let fails = lock(&self.failing_restarts).contains(&name);
        if fails {
            return Err(DirectoryError::Unavailable(format!("restart of {name} rejected")));
        }

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web(id: &str, name: &str) -> ManagedContainer {
        ManagedContainer::new(id, name)
            .with_label("watch.enable", "true")
            .with_address("10.0.0.5")
    }

    #[tokio::test]
    async fn test_static_directory_filters_managed() {
        let directory = StaticDirectory::new();
        directory.insert(web("1i1", "web-1"));
        directory.insert_with_state(web("1i2", "web-2"), "stopped");
        directory.insert(ManagedContainer::new("1i3", "db-1"));

        let managed = directory
            .list_managed(&ManagedFilter::new("watch.enable"))
            .await
            .unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].name, "web-1");
    }

    #[tokio::test]
    async fn test_static_directory_lookup_only_running() {
        let directory = StaticDirectory::new();
        directory.insert(ManagedContainer::new("1i1", "cache-3"));
        directory.insert(ManagedContainer::new("1i2", "cache-3"));
        directory.insert_with_state(ManagedContainer::new("1i3", "cache-4"), "stopped");

        assert_eq!(directory.find_running_by_name("cache-3").await.unwrap().len(), 2);
        assert!(directory.find_running_by_name("cache-4").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_directory_restart_journal() {
        let directory = StaticDirectory::new();
        directory.insert(ManagedContainer::new("1i1", "cache-1"));
        directory.insert(ManagedContainer::new("1i2", "cache-2"));
        directory.fail_restart("cache-2");

        directory.restart_and_wait("1i1").await.unwrap();
        assert!(directory.restart_and_wait("1i2").await.is_err());
        assert!(directory.restart_and_wait("1i9").await.is_err());

        assert_eq!(directory.restart_attempts(), vec!["cache-1", "cache-2"]);
        assert_eq!(directory.call_count(), 3);
    }
}
