//! A3S Mirror Runtime - image cloning engine.
//!
//! Maps source image references to flattened locations under a target
//! prefix, copies them through a [`RegistryTransport`](oci::RegistryTransport),
//! and fans a set of images out to concurrent clones.

pub mod clone;
pub mod oci;

// Re-export common types
pub use clone::{CloneOrchestrator, CloneOutcome, Cloner, ImageMapping};
pub use oci::{CredentialResolver, DockerConfigKeychain, ImageReference, RegistryAuth};
pub use oci::{OciRegistryTransport, RegistryTransport, TargetPrefix};

/// A3S Mirror Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
