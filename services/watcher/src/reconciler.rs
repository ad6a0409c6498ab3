//! Interval loop driving reconciliation passes.
//!
//! The reconciler:
//! - Runs one pass every `pass_interval`
//! - Logs pass-level failures and keeps going
//! - Stops when the shutdown channel flips to `true`

use std::time::Duration;

use ipwatch_reconcile::{PassReport, DEFAULT_PASS_INTERVAL};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::directory::ContainerDirectory;
use crate::engine::{PassError, ReconciliationEngine};
use crate::store::StateStore;

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between passes.
    pub pass_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pass_interval: DEFAULT_PASS_INTERVAL,
        }
    }
}

/// Reconciler for keeping dependents in step with address changes.
pub struct Reconciler<D: ?Sized, S: ?Sized> {
    engine: ReconciliationEngine<D, S>,
    config: ReconcilerConfig,
}

impl<D, S> Reconciler<D, S>
where
    D: ContainerDirectory + ?Sized,
    S: StateStore + ?Sized,
{
    /// Create a new reconciler.
    pub fn new(engine: ReconciliationEngine<D, S>, config: ReconcilerConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &ReconciliationEngine<D, S> {
        &self.engine
    }

    /// Run the reconciliation loop until shutdown.
    ///
    /// The first pass runs immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            pass_interval_secs = self.config.pass_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.config.pass_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        match e {
                            PassError::AlreadyRunning => warn!(error = %e, "Pass skipped"),
                            _ => error!(error = %e, "Reconciliation pass failed, will retry"),
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, reconciler shutting down");
                        break;
                    }
                    if *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single pass.
    pub async fn run_once(&self) -> Result<PassReport, PassError> {
        self.engine.run_pass().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ipwatch_reconcile::ManagedContainer;

    use super::*;
    use crate::directory::StaticDirectory;
    use crate::engine::EngineConfig;
    use crate::store::MemoryStore;

    #[test]
    fn test_reconciler_config_default() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.pass_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let engine_config = EngineConfig::default();
        let directory = Arc::new(StaticDirectory::new());
        directory.insert(
            ManagedContainer::new("1i1", "web-1")
                .with_label(&engine_config.filter.enable_label, "true")
                .with_address("10.0.0.5"),
        );
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(
            ReconciliationEngine::new(directory, Arc::clone(&store), engine_config),
            ReconcilerConfig {
                pass_interval: Duration::from_millis(10),
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_tx.send(true).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(reconciler.run(shutdown_rx), stopper)
        })
        .await
        .expect("reconciler did not stop");

        assert_eq!(store.address("web-1").as_deref(), Some("10.0.0.5"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_is_dropped() {
        let reconciler = Reconciler::new(
            ReconciliationEngine::new(
                Arc::new(StaticDirectory::new()),
                Arc::new(MemoryStore::new()),
                EngineConfig::default(),
            ),
            ReconcilerConfig {
                pass_interval: Duration::from_secs(60),
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(5), reconciler.run(shutdown_rx))
            .await
            .expect("reconciler kept running without a shutdown sender");
    }
}
