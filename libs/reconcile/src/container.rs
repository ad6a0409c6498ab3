//! Containers as seen by a single pass.

use crate::labels::Labels;
use crate::{ENABLED_LABEL_VALUE, RUNNING_STATE};

/// A container fetched from the directory for the current pass.
///
/// Never mutated and never cached across passes; the directory is re-read
/// every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    /// Opaque orchestrator id, used for restarts.
    pub id: String,

    /// Human name, used as the store key and for dependent lookups.
    pub name: String,

    /// Operator-supplied labels.
    pub labels: Labels,

    /// Address reported by the orchestrator, if any.
    pub address: Option<String>,
}

impl ManagedContainer {
    /// Create a container with no labels and no address.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels: Labels::new(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key, value);
        self
    }

    /// The current address, treating an empty string as absent.
    pub fn current_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }
}

/// Selection rule for managed containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFilter {
    /// Label that must be present.
    pub enable_label: String,

    /// Value the enable label must carry.
    pub enable_value: String,

    /// Orchestrator state the container must be in.
    pub state: String,
}

impl ManagedFilter {
    /// Filter for running containers whose `enable_label` is `"true"`.
    pub fn new(enable_label: impl Into<String>) -> Self {
        Self {
            enable_label: enable_label.into(),
            enable_value: ENABLED_LABEL_VALUE.to_string(),
            state: RUNNING_STATE.to_string(),
        }
    }

    /// Returns true if a container with these labels and state is managed.
    pub fn matches(&self, labels: &Labels, state: &str) -> bool {
        state == self.state && labels.has_value(&self.enable_label, &self.enable_value)
    }
}
