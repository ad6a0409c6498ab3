//! ip watcher library
//!
//! The watcher periodically compares the address of monitored containers
//! with the last address it recorded. When a container moved, it restarts
//! the dependents listed in the container's reboot label, in order, and
//! records the new address once every dependent came back.
//!
//! ## Architecture
//!
//! ```text
//! Reconciler (interval loop)
//! └── ReconciliationEngine (one pass, single-flight)
//!     ├── DriftDetector ──────► StateStore        (etcd, memory)
//!     ├── RemediationPlanner
//!     └── restarts ───────────► ContainerDirectory (Rancher, static)
//! ```
//!
//! ## Modules
//!
//! - `directory`: orchestrator interface and in-memory implementation
//! - `store`: address record interface and in-memory implementation
//! - `rancher`: Rancher API client
//! - `etcd`: etcd v2 keys client
//! - `engine`: the per-pass state machine

pub mod config;
pub mod detector;
pub mod directory;
pub mod engine;
pub mod etcd;
pub mod rancher;
pub mod reconciler;
pub mod store;

// Re-export commonly used types
pub use detector::DriftDetector;
pub use directory::{ContainerDirectory, DirectoryError, StaticDirectory};
pub use engine::{EngineConfig, PassError, ReconciliationEngine};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use store::{MemoryStore, StateStore, StoreError};
