//! A3S Mirror Controller
//!
//! Watches Deployments and DaemonSets, mirrors every container image they
//! reference under a target repository prefix, and patches the workloads to
//! pull from the mirror.
//!
//! # Layers
//!
//! - [`object`]: per-kind image extraction and replacement
//! - [`store`]: reading and patching workload objects
//! - [`reconciler`]: one fetch, clone, rewrite, patch pass
//! - [`watch`]: watch events, requeue backoff, shutdown
//! - [`app`]: process wiring from [`MirrorConfig`](a3s_mirror_core::MirrorConfig)

pub mod app;
pub mod backoff;
pub mod cli;
pub mod object;
pub mod reconciler;
pub mod store;
pub mod watch;

pub use backoff::{BackoffTracker, RequeuePolicy};
pub use object::{DaemonSetManager, DeploymentManager, ObjectManager};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use store::{InMemoryStore, KubeStore, ObjectId, ResourceStore};

/// A3S Mirror Controller version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
