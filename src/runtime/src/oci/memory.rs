//! In-memory registry transport.
//!
//! Holds artifacts in a map keyed by canonical reference and records every
//! copy, so cloning can be exercised without a network. Individual
//! references can be made to fail or to stall until cancelled.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use a3s_mirror_core::error::{MirrorError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::reference::ImageReference;
use super::registry::{
    ArtifactKind, Credentials, Descriptor, RegistryTransport, OCI_INDEX_MEDIA_TYPE,
    OCI_MANIFEST_MEDIA_TYPE,
};

/// A completed copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    /// Canonical source reference.
    pub source: String,
    /// Canonical target reference.
    pub target: String,
    /// Whether an index or a single image was copied.
    pub kind: ArtifactKind,
}

/// In-memory [`RegistryTransport`].
#[derive(Default)]
pub struct MemoryRegistry {
    artifacts: Mutex<HashMap<String, ArtifactKind>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    copies: Mutex<Vec<CopyRecord>>,
    fetches: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a single-platform image under `reference`.
    pub fn with_image(self, reference: &str) -> Self {
        self.insert(reference, ArtifactKind::Image);
        self
    }

    /// Store a multi-platform index under `reference`.
    pub fn with_index(self, reference: &str) -> Self {
        self.insert(reference, ArtifactKind::Index);
        self
    }

    /// Make every fetch of `reference` fail.
    pub fn with_failure(self, reference: &str) -> Self {
        self.failing.lock().insert(canonical(reference));
        self
    }

    /// Make every fetch of `reference` hang until the caller gives up.
    pub fn with_stall(self, reference: &str) -> Self {
        self.stalled.lock().insert(canonical(reference));
        self
    }

    /// Delay every copy by `delay`.
    pub fn with_copy_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Whether an artifact exists under `reference`.
    pub fn contains(&self, reference: &str) -> bool {
        self.artifacts.lock().contains_key(&canonical(reference))
    }

    /// Copies performed so far, in completion order.
    pub fn copies(&self) -> Vec<CopyRecord> {
        self.copies.lock().clone()
    }

    /// Number of manifest fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn insert(&self, reference: &str, kind: ArtifactKind) {
        self.artifacts.lock().insert(canonical(reference), kind);
    }

    async fn copy(&self, descriptor: &Descriptor, target: &ImageReference, kind: ArtifactKind) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let target = target.full_reference();
        self.artifacts.lock().insert(target.clone(), kind);
        self.copies.lock().push(CopyRecord {
            source: descriptor.reference.full_reference(),
            target,
            kind,
        });
    }
}

#[async_trait]
impl RegistryTransport for MemoryRegistry {
    async fn fetch_descriptor(
        &self,
        reference: &ImageReference,
        _credentials: &Credentials,
    ) -> Result<Descriptor> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let key = reference.full_reference();

        let stalled = self.stalled.lock().contains(&key);
        if stalled {
            std::future::pending::<()>().await;
        }
        let failing = self.failing.lock().contains(&key);
        if failing {
            return Err(MirrorError::Registry {
                registry: reference.registry.clone(),
                message: format!("injected failure for {}", key),
            });
        }

        let kind = self.artifacts.lock().get(&key).copied();
        let kind = kind.ok_or_else(|| MirrorError::Registry {
            registry: reference.registry.clone(),
            message: format!("MANIFEST_UNKNOWN: {}", key),
        })?;

        let media_type = match kind {
            ArtifactKind::Index => OCI_INDEX_MEDIA_TYPE,
            ArtifactKind::Image => OCI_MANIFEST_MEDIA_TYPE,
        };
        Ok(Descriptor {
            reference: reference.clone(),
            kind,
            media_type: media_type.to_string(),
            digest: String::new(),
            manifest: Vec::new(),
        })
    }

    async fn copy_index(
        &self,
        descriptor: &Descriptor,
        target: &ImageReference,
        _credentials: &Credentials,
    ) -> Result<()> {
        self.copy(descriptor, target, ArtifactKind::Index).await;
        Ok(())
    }

    async fn copy_image(
        &self,
        descriptor: &Descriptor,
        target: &ImageReference,
        _credentials: &Credentials,
    ) -> Result<()> {
        self.copy(descriptor, target, ArtifactKind::Image).await;
        Ok(())
    }
}

/// Canonical form of `reference`, or the input itself if it does not parse.
fn canonical(reference: &str) -> String {
    ImageReference::parse(reference)
        .map(|r| r.full_reference())
        .unwrap_or_else(|_| reference.to_string())
}
