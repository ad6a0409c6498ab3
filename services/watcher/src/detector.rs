//! Drift detection for a single container.

use std::time::Duration;

use ipwatch_reconcile::{DriftResult, ManagedContainer, DEFAULT_STORE_TIMEOUT};
use tracing::debug;

use crate::store::{StateStore, StoreError};

/// Compares a container's current address with its stored record.
///
/// Read-only: recording first sightings and remediated addresses is left
/// to the engine.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    store_timeout: Duration,
}

impl DriftDetector {
    pub fn new(store_timeout: Duration) -> Self {
        Self { store_timeout }
    }

    /// Classify `container` against `store`.
    ///
    /// A container without an address is classified without touching the
    /// store. A failed or timed-out read is an error, never a first
    /// sighting, so that real drift is not papered over.
    pub async fn check<S>(
        &self,
        container: &ManagedContainer,
        store: &S,
    ) -> Result<DriftResult, StoreError>
    where
        S: StateStore + ?Sized,
    {
        let Some(current) = container.current_address() else {
            return Ok(DriftResult::NoAddress);
        };

        let stored = tokio::time::timeout(self.store_timeout, store.read_address(&container.name))
            .await
            .map_err(|_| StoreError::TimedOut(self.store_timeout))??;

        debug!(
            container = %container.name,
            current = %current,
            stored = stored.as_deref().unwrap_or("-"),
            "Compared addresses"
        );

        Ok(DriftResult::classify(Some(current), stored.as_deref()))
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_TIMEOUT)
    }
}
