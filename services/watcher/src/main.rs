//! ip watcher
//!
//! Watches the address of labelled containers and restarts their dependents
//! when the address changes.
//!
//! ## Architecture
//!
//! - **Directory**: Rancher API, lists containers and restarts dependents
//! - **Store**: etcd, holds the last reconciled address per container
//! - **Reconciler**: runs one pass per interval until shutdown

use std::sync::Arc;

use anyhow::{Context, Result};
use ipwatch_watcher::config::Config;
use ipwatch_watcher::etcd::EtcdStore;
use ipwatch_watcher::rancher::RancherDirectory;
use ipwatch_watcher::{ReconciliationEngine, Reconciler, ReconcilerConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Invalid watcher configuration")?;

    // Initialize tracing (prefer RUST_LOG, fallback to WATCHER_LOGLEVEL)
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting ip watcher");
    info!(
        rancher_api_url = %config.rancher_api_url,
        etcd_endpoint = %config.etcd_endpoint(),
        enable_label = %config.enable_label,
        reboot_label = %config.reboot_label,
        pass_interval_secs = config.pass_interval.as_secs(),
        record_ttl_secs = config.record_ttl.as_secs(),
        "Configuration loaded"
    );

    let directory = Arc::new(
        RancherDirectory::new(config.rancher_config()).context("Failed to build Rancher client")?,
    );
    if let Err(e) = directory.probe().await {
        warn!(error = %e, "Rancher API not reachable yet, passes will retry");
    }
    let store =
        Arc::new(EtcdStore::new(config.etcd_config()).context("Failed to build etcd client")?);

    let engine = ReconciliationEngine::new(directory, store, config.engine_config());
    let reconciler = Reconciler::new(
        engine,
        ReconcilerConfig {
            pass_interval: config.pass_interval,
        },
    );

    if config.once {
        let report = reconciler.run_once().await?;
        let summary = report.summary();
        info!(
            containers = summary.total,
            failed = summary.failed,
            "Single pass finished"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut reconciler_handle = tokio::spawn(async move {
        reconciler.run(shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            if let Err(e) = (&mut reconciler_handle).await {
                error!(error = %e, "Reconciler task panicked");
            }
        }
        result = &mut reconciler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Reconciler task panicked");
            }
        }
    }

    info!("ip watcher shutdown complete");
    Ok(())
}
