//! One reconciliation pass: fetch, clone, rewrite, patch.

use std::sync::Arc;

use a3s_mirror_core::config::{CLUSTER_SYSTEM_NAMESPACE, DEFAULT_NAMESPACE};
use a3s_mirror_core::error::Result;
use a3s_mirror_runtime::CloneOrchestrator;
use tokio_util::sync::CancellationToken;

use crate::object::ObjectManager;
use crate::store::{ObjectId, ResourceStore};

/// What a successful pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The object lives in an excluded namespace; it was not read.
    Skipped,
    /// Every image was already mirrored; nothing was written.
    UpToDate,
    /// `cloned` images were mirrored and the object was patched.
    Patched { cloned: usize },
}

/// Mirrors the images of one workload kind.
pub struct Reconciler<M: ObjectManager> {
    manager: M,
    store: Arc<dyn ResourceStore<M::Object>>,
    orchestrator: CloneOrchestrator,
    excluded: Vec<String>,
}

impl<M: ObjectManager> Reconciler<M> {
    /// Reconciler excluding `kube-system` and the default own namespace.
    pub fn new(
        manager: M,
        store: Arc<dyn ResourceStore<M::Object>>,
        orchestrator: CloneOrchestrator,
    ) -> Self {
        Self {
            manager,
            store,
            orchestrator,
            excluded: vec![
                CLUSTER_SYSTEM_NAMESPACE.to_string(),
                DEFAULT_NAMESPACE.to_string(),
            ],
        }
    }

    /// Replace the set of namespaces that are never processed.
    pub fn with_excluded_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.excluded = namespaces;
        self
    }

    /// Whether objects in `namespace` are left alone.
    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.excluded.iter().any(|ns| ns == namespace)
    }

    /// Run one pass for `id`.
    ///
    /// Any failure aborts the pass untouched: nothing is retried here.
    pub async fn reconcile(
        &self,
        id: &ObjectId,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        if self.is_excluded(&id.namespace) {
            tracing::debug!(
                kind = M::KIND,
                namespace = %id.namespace,
                name = %id.name,
                "Skipping excluded namespace"
            );
            return Ok(ReconcileOutcome::Skipped);
        }

        let object = self.store.get(id).await.map_err(|e| {
            tracing::error!(
                kind = M::KIND,
                namespace = %id.namespace,
                name = %id.name,
                error = %e,
                "Failed to get resource"
            );
            e
        })?;

        let images = self.manager.extract_images(&object);
        let mapping = self
            .orchestrator
            .clone_all(&images, cancel)
            .await
            .map_err(|e| {
                tracing::error!(
                    kind = M::KIND,
                    namespace = %id.namespace,
                    name = %id.name,
                    error = %e,
                    "Failed to clone images"
                );
                e
            })?;

        if mapping.is_empty() {
            return Ok(ReconcileOutcome::UpToDate);
        }
        tracing::info!(
            kind = M::KIND,
            namespace = %id.namespace,
            name = %id.name,
            "Cloned {} new image(s)",
            mapping.len()
        );

        let modified = self.manager.replace_images(&object, &mapping);
        self.store.patch(&object, &modified).await.map_err(|e| {
            tracing::error!(
                kind = M::KIND,
                namespace = %id.namespace,
                name = %id.name,
                error = %e,
                "Patch failed"
            );
            e
        })?;

        tracing::info!(
            kind = M::KIND,
            namespace = %id.namespace,
            name = %id.name,
            "Reconciliation done"
        );
        Ok(ReconcileOutcome::Patched {
            cloned: mapping.len(),
        })
    }
}

impl<M: ObjectManager> std::fmt::Debug for Reconciler<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("kind", &M::KIND)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}
