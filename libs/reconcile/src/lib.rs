//! Drift reconciliation primitives.
//!
//! This library holds the IO-free half of the ip watcher: everything needed
//! to decide what a reconciliation pass should do, without talking to the
//! orchestrator or the key/value store. Key concepts:
//!
//! - **Managed container**: a running container opted into monitoring via
//!   the enable label.
//! - **Drift**: the observed address differs from the last committed one.
//! - **Remediation**: restarting the dependents listed on the drifted
//!   container, strictly in the listed order.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - A committed address is always one the watcher observed and remediated
//! - Dependent order is preserved exactly, duplicates included

use std::time::Duration;

mod container;
mod directive;
mod drift;
mod labels;
mod outcome;

pub use container::{ManagedContainer, ManagedFilter};
pub use directive::{DependencyDirective, RemediationPlanner};
pub use drift::DriftResult;
pub use labels::Labels;
pub use outcome::{
    ContainerReport, DependentFailure, DependentFailureKind, PassOutcome, PassReport,
    PassSummary, Remediation,
};

/// Default label opting a container into monitoring.
pub const DEFAULT_ENABLE_LABEL: &str = "cloud.hutter.watcher.ip.enable";

/// Default label listing the dependents to restart on drift.
pub const DEFAULT_REBOOT_LABEL: &str = "cloud.hutter.watcher.ip.reboot";

/// Default label carrying the container address.
pub const DEFAULT_ADDRESS_LABEL: &str = "io.rancher.container.ip";

/// Label value that opts a container into monitoring.
pub const ENABLED_LABEL_VALUE: &str = "true";

/// Orchestrator state a container must be in to be considered.
pub const RUNNING_STATE: &str = "running";

/// Default interval between passes.
pub const DEFAULT_PASS_INTERVAL: Duration = Duration::from_secs(60);

/// Default time-to-live of a stored address record.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(10 * 60); // 10 minutes

/// Default upper bound for one restart-and-wait of a dependent.
pub const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(120);

/// Default upper bound for a single store read or write.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);
