//! Resource Store: where workload objects are read from and patched.
//!
//! - [`KubeStore`] talks to the Kubernetes API server
//! - [`InMemoryStore`] keeps objects in process, with the same conflict rules

mod kubernetes;
mod memory;
pub mod merge;

use std::fmt;

use a3s_mirror_core::error::Result;
use async_trait::async_trait;
use kube::ResourceExt;

pub use kubernetes::KubeStore;
pub use memory::InMemoryStore;

/// Identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub namespace: String,
    pub name: String,
}

impl ObjectId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of `object`, taken from its metadata.
    pub fn of<K: ResourceExt>(object: &K) -> Self {
        Self::new(object.namespace().unwrap_or_default(), object.name_any())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read and patch access to objects of type `K`.
#[async_trait]
pub trait ResourceStore<K>: Send + Sync {
    /// Fetch the object. Missing objects yield `MirrorError::NotFound`.
    async fn get(&self, id: &ObjectId) -> Result<K>;

    /// Apply the difference between `original` and `modified` as a merge
    /// patch. Fields not changed in `modified` are preserved.
    ///
    /// `original` must be the object as last read; a concurrent write since
    /// then yields `MirrorError::PatchConflict`.
    async fn patch(&self, original: &K, modified: &K) -> Result<()>;
}
