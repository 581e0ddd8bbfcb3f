//! OCI image support for A3S Mirror.
//!
//! - Reference parsing and canonicalization ([`ImageReference`])
//! - Target prefix normalization and flattened naming ([`TargetPrefix`])
//! - Registry credentials ([`CredentialResolver`], [`DockerConfigKeychain`])
//! - Registry transport ([`RegistryTransport`], [`OciRegistryTransport`])

pub mod credentials;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod prefix;
pub mod reference;
pub mod registry;

pub use credentials::{AnonymousCredentials, CredentialResolver, DockerConfigKeychain, RegistryAuth};
#[cfg(any(test, feature = "testing"))]
pub use memory::{CopyRecord, MemoryRegistry};
pub use prefix::TargetPrefix;
pub use reference::{Identifier, ImageReference};
pub use registry::{ArtifactKind, Credentials, Descriptor, OciRegistryTransport, RegistryTransport};
