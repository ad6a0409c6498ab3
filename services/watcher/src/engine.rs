//! Reconciliation engine.
//!
//! One pass walks every managed container sequentially:
//!
//! ```text
//! Evaluated ─┬─ no address ───────────────────────────► SkippedNoAddress
//!            ├─ unchanged ────────────────────────────► Unchanged
//!            ├─ first sighting ── write ──────────────► Initialized
//!            └─ drifted ── restart dependents ─┬─ ok ─► Updated
//!                                              └─ err ► RemediationFailed
//! ```
//!
//! The new address is only committed after every dependent was attempted
//! and none failed, so a crash or failure mid-remediation leaves the old
//! address in place and the next pass retries from scratch.

use std::sync::Arc;
use std::time::Duration;

use ipwatch_reconcile::{
    DependentFailureKind, DriftResult, ManagedContainer, ManagedFilter, PassOutcome, PassReport,
    Remediation, RemediationPlanner, DEFAULT_ENABLE_LABEL, DEFAULT_REBOOT_LABEL,
    DEFAULT_RECORD_TTL, DEFAULT_RESTART_TIMEOUT, DEFAULT_STORE_TIMEOUT,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::detector::DriftDetector;
use crate::directory::{ContainerDirectory, DirectoryError};
use crate::store::{StateStore, StoreError};

/// Errors that abort a whole pass. Per-container failures never do.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("a reconciliation pass is already running")]
    AlreadyRunning,

    #[error("failed to list managed containers: {0}")]
    Directory(#[source] DirectoryError),

    #[error("listing managed containers timed out after {0:?}")]
    ListTimedOut(Duration),
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which containers are managed.
    pub filter: ManagedFilter,

    /// Label listing the dependents to restart.
    pub reboot_label: String,

    /// TTL written with every record.
    pub record_ttl: Duration,

    /// Upper bound for one dependent's restart-and-wait.
    pub restart_timeout: Duration,

    /// Upper bound for one store read or write.
    pub store_timeout: Duration,

    /// Upper bound for listing and lookups.
    pub directory_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filter: ManagedFilter::new(DEFAULT_ENABLE_LABEL),
            reboot_label: DEFAULT_REBOOT_LABEL.to_string(),
            record_ttl: DEFAULT_RECORD_TTL,
            restart_timeout: DEFAULT_RESTART_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            directory_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs reconciliation passes against a directory and a store.
pub struct ReconciliationEngine<D: ?Sized, S: ?Sized> {
    directory: Arc<D>,
    store: Arc<S>,
    detector: DriftDetector,
    planner: RemediationPlanner,
    config: EngineConfig,

    /// Held for the duration of a pass; passes never overlap.
    in_flight: Mutex<()>,
}

impl<D, S> ReconciliationEngine<D, S>
where
    D: ContainerDirectory + ?Sized,
    S: StateStore + ?Sized,
{
    /// Create a new engine.
    pub fn new(directory: Arc<D>, store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            directory,
            store,
            detector: DriftDetector::new(config.store_timeout),
            planner: RemediationPlanner::new(&config.reboot_label),
            config,
            in_flight: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Perform a single reconciliation pass.
    ///
    /// Fails only if another pass is in flight or the managed containers
    /// cannot be listed. Everything else ends up in the report.
    pub async fn run_pass(&self) -> Result<PassReport, PassError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("Previous pass still running, skipping");
            return Err(PassError::AlreadyRunning);
        };

        debug!(
            enable_label = %self.config.filter.enable_label,
            "Retrieving managed containers"
        );
        let containers = match timeout(
            self.config.directory_timeout,
            self.directory.list_managed(&self.config.filter),
        )
        .await
        {
            Ok(Ok(containers)) => containers,
            Ok(Err(e)) => return Err(PassError::Directory(e)),
            Err(_) => return Err(PassError::ListTimedOut(self.config.directory_timeout)),
        };

        let mut report = PassReport::new();
        for container in &containers {
            let outcome = self.reconcile_container(container).await;
            report.push(&container.name, outcome);
        }

        let summary = report.summary();
        info!(
            containers = summary.total,
            unchanged = summary.unchanged,
            initialized = summary.initialized,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "Reconciliation pass complete"
        );

        Ok(report)
    }

    async fn reconcile_container(&self, container: &ManagedContainer) -> PassOutcome {
        debug!(container = %container.name, "Checking container");

        let drift = match self.detector.check(container, self.store.as_ref()).await {
            Ok(drift) => drift,
            Err(e) => {
                warn!(
                    container = %container.name,
                    error = %e,
                    "Failed to read last known address, skipping"
                );
                return PassOutcome::SkippedStoreError {
                    error: e.to_string(),
                };
            }
        };

        match drift {
            DriftResult::NoAddress => {
                warn!(container = %container.name, "Container reports no address, skipping");
                PassOutcome::SkippedNoAddress
            }
            DriftResult::Unchanged { address } => {
                debug!(container = %container.name, address = %address, "Address unchanged");
                PassOutcome::Unchanged
            }
            DriftResult::FirstSighting { current } => {
                match self.commit(&container.name, &current).await {
                    Ok(()) => {
                        info!(
                            container = %container.name,
                            address = %current,
                            "No address recorded, recorded current address"
                        );
                        PassOutcome::Initialized { address: current }
                    }
                    Err(e) => {
                        warn!(
                            container = %container.name,
                            error = %e,
                            "Failed to record first address"
                        );
                        PassOutcome::SkippedStoreError {
                            error: e.to_string(),
                        }
                    }
                }
            }
            DriftResult::Drifted { previous, current } => {
                self.remediate(container, previous, current).await
            }
        }
    }

    async fn remediate(
        &self,
        container: &ManagedContainer,
        previous: String,
        current: String,
    ) -> PassOutcome {
        let plan = self.planner.plan(container);
        info!(
            container = %container.name,
            previous = %previous,
            current = %current,
            dependents = plan.len(),
            "Address changed"
        );
        if plan.is_empty() {
            warn!(
                container = %container.name,
                label = %self.planner.reboot_label(),
                "No dependents listed for restart"
            );
        }

        let mut remediation = Remediation::default();
        for name in &plan {
            match self.restart_dependent(name).await {
                Ok(()) => remediation.record_restarted(name),
                Err(kind) => {
                    warn!(
                        container = %container.name,
                        dependent = %name,
                        reason = %kind,
                        "Dependent not restarted"
                    );
                    remediation.record_failure(name, kind);
                }
            }
        }

        if remediation.has_failures() {
            warn!(
                container = %container.name,
                failed = remediation.failed.len(),
                "Remediation incomplete, keeping previous address for retry"
            );
            return PassOutcome::RemediationFailed {
                previous,
                current,
                remediation,
                commit_error: None,
            };
        }

        match self.commit(&container.name, &current).await {
            Ok(()) => {
                info!(
                    container = %container.name,
                    address = %current,
                    restarted = remediation.restarted.len(),
                    "Remediation complete, recorded new address"
                );
                PassOutcome::Updated {
                    previous,
                    current,
                    remediation,
                }
            }
            Err(e) => {
                warn!(
                    container = %container.name,
                    error = %e,
                    "Failed to record new address, next pass will retry"
                );
                PassOutcome::RemediationFailed {
                    previous,
                    current,
                    remediation,
                    commit_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Resolve `name` to one running container and restart it.
    async fn restart_dependent(&self, name: &str) -> Result<(), DependentFailureKind> {
        let matches = match timeout(
            self.config.directory_timeout,
            self.directory.find_running_by_name(name),
        )
        .await
        {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => return Err(DependentFailureKind::Lookup(e.to_string())),
            Err(_) => {
                return Err(DependentFailureKind::Lookup(format!(
                    "timed out after {:?}",
                    self.config.directory_timeout
                )))
            }
        };

        let target = match matches.as_slice() {
            [target] => target,
            [] => return Err(DependentFailureKind::NotFound),
            many => {
                return Err(DependentFailureKind::Ambiguous {
                    matches: many.len(),
                })
            }
        };

        info!(dependent = %name, container_id = %target.id, "Restarting dependent");
        match timeout(
            self.config.restart_timeout,
            self.directory.restart_and_wait(&target.id),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DependentFailureKind::RestartFailed(e.to_string())),
            Err(_) => Err(DependentFailureKind::TimedOut(self.config.restart_timeout)),
        }
    }

    async fn commit(&self, name: &str, address: &str) -> Result<(), StoreError> {
        timeout(
            self.config.store_timeout,
            self.store
                .write_address(name, address, self.config.record_ttl),
        )
        .await
        .map_err(|_| StoreError::TimedOut(self.config.store_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::store::MemoryStore;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.record_ttl, Duration::from_secs(600));
        assert_eq!(config.filter.enable_value, "true");
        assert_eq!(config.filter.state, "running");
    }

    #[tokio::test]
    async fn test_listing_failure_fails_pass() {
        let directory = Arc::new(StaticDirectory::new());
        directory.fail_listing(true);
        let store = Arc::new(MemoryStore::new());
        let engine =
            ReconciliationEngine::new(directory, Arc::clone(&store), EngineConfig::default());

        let err = engine.run_pass().await.unwrap_err();
        assert!(matches!(err, PassError::Directory(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_dependent_reported_on_update() {
        let config = EngineConfig::default();
        let directory = Arc::new(StaticDirectory::new());
        directory.insert(
            ManagedContainer::new("1i1", "web-1")
                .with_label(&config.filter.enable_label, "true")
                .with_label(&config.reboot_label, "cache-9")
                .with_address("10.0.0.9"),
        );
        let store = Arc::new(MemoryStore::new());
        store.seed("web-1", "10.0.0.5");
        let engine = ReconciliationEngine::new(directory, Arc::clone(&store), config);

        let report = engine.run_pass().await.unwrap();
        match report.outcome_for("web-1") {
            Some(PassOutcome::Updated { remediation, .. }) => {
                assert!(remediation.restarted.is_empty());
                assert_eq!(remediation.unresolved.len(), 1);
                assert_eq!(remediation.unresolved[0].kind, DependentFailureKind::NotFound);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.address("web-1").as_deref(), Some("10.0.0.9"));
    }
}
