//! Per-container outcomes of a reconciliation pass.
//!
//! Outcomes are reported and logged, never persisted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a dependent was not restarted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependentFailureKind {
    /// No running container carries the name.
    #[error("no running container with this name")]
    NotFound,

    /// Several running containers carry the name.
    #[error("{matches} running containers share this name")]
    Ambiguous { matches: usize },

    /// The directory lookup itself failed.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// The restart call failed, or the wait for `running` gave up.
    #[error("restart failed: {0}")]
    RestartFailed(String),

    /// The restart did not complete within the engine's timeout.
    #[error("restart did not complete within {0:?}")]
    TimedOut(Duration),
}

impl DependentFailureKind {
    /// Returns true if the name could not be resolved to one container.
    ///
    /// Unresolved dependents are skipped and do not hold back the commit.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::NotFound | Self::Ambiguous { .. })
    }
}

/// A dependent that was not restarted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentFailure {
    pub name: String,
    pub kind: DependentFailureKind,
}

/// What happened to each dependent of a drifted container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Remediation {
    /// Dependents restarted successfully, in restart order.
    pub restarted: Vec<String>,

    /// Dependents skipped because their name did not resolve.
    pub unresolved: Vec<DependentFailure>,

    /// Dependents whose lookup or restart failed.
    pub failed: Vec<DependentFailure>,
}

impl Remediation {
    pub fn record_restarted(&mut self, name: impl Into<String>) {
        self.restarted.push(name.into());
    }

    /// Record a dependent that was not restarted.
    pub fn record_failure(&mut self, name: impl Into<String>, kind: DependentFailureKind) {
        let failure = DependentFailure {
            name: name.into(),
            kind,
        };
        if failure.kind.is_unresolved() {
            self.unresolved.push(failure);
        } else {
            self.failed.push(failure);
        }
    }

    /// Returns true if any dependent failed (unresolved ones excluded).
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Outcome of one container in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Address matches the stored one; nothing written.
    Unchanged,

    /// First sighting; the address was recorded without remediation.
    Initialized { address: String },

    /// Drift remediated and the new address committed.
    Updated {
        previous: String,
        current: String,
        remediation: Remediation,
    },

    /// The container reported no address.
    SkippedNoAddress,

    /// The store could not be read (or the first write failed); no restarts.
    SkippedStoreError { error: String },

    /// A dependent failed or the commit failed; the old address is kept so
    /// the next pass retries.
    RemediationFailed {
        previous: String,
        current: String,
        remediation: Remediation,
        commit_error: Option<String>,
    },
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Initialized { .. } => "initialized",
            Self::Updated { .. } => "updated",
            Self::SkippedNoAddress => "skipped_no_address",
            Self::SkippedStoreError { .. } => "skipped_store_error",
            Self::RemediationFailed { .. } => "remediation_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RemediationFailed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::SkippedNoAddress | Self::SkippedStoreError { .. }
        )
    }
}

impl std::fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one container, tagged with its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerReport {
    pub container: String,
    pub outcome: PassOutcome,
}

/// Outcomes of every managed container in one pass, in evaluation order.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// When the pass started.
    pub started_at: DateTime<Utc>,

    entries: Vec<ContainerReport>,
}

impl PassReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, container: impl Into<String>, outcome: PassOutcome) {
        self.entries.push(ContainerReport {
            container: container.into(),
            outcome,
        });
    }

    pub fn entries(&self) -> &[ContainerReport] {
        &self.entries
    }

    /// Outcome of the first container evaluated under `name`.
    pub fn outcome_for(&self, name: &str) -> Option<&PassOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.container == name)
            .map(|entry| &entry.outcome)
    }

    pub fn summary(&self) -> PassSummary {
        let mut summary = PassSummary {
            total: self.entries.len(),
            ..PassSummary::default()
        };

        for entry in &self.entries {
            match entry.outcome {
                PassOutcome::Unchanged => summary.unchanged += 1,
                PassOutcome::Initialized { .. } => summary.initialized += 1,
                PassOutcome::Updated { .. } => summary.updated += 1,
                PassOutcome::SkippedNoAddress | PassOutcome::SkippedStoreError { .. } => {
                    summary.skipped += 1
                }
                PassOutcome::RemediationFailed { .. } => summary.failed += 1,
            }
        }

        summary
    }
}

impl Default for PassReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the end-of-pass log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub total: usize,
    pub unchanged: usize,
    pub initialized: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}
