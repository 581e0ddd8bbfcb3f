//! In-process [`ResourceStore`].
//!
//! Objects are kept in a map keyed by identity. Every successful patch
//! bumps `metadata.resourceVersion`, and a patch whose original carries a
//! stale version is rejected, as the API server would.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use a3s_mirror_core::error::{MirrorError, Result};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{merge, ObjectId, ResourceStore};

/// In-memory objects of kind `K`.
pub struct InMemoryStore<K> {
    objects: Mutex<BTreeMap<ObjectId, K>>,
    patches: AtomicUsize,
}

impl<K> Default for InMemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            patches: AtomicUsize::new(0),
        }
    }
}

impl<K> InMemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_object(self, object: K) -> Self {
        self.insert(object);
        self
    }

    /// Store `object`, replacing any object with the same identity.
    ///
    /// Objects without a resource version get version `1`.
    pub fn insert(&self, mut object: K) {
        if object.meta().resource_version.is_none() {
            object.meta_mut().resource_version = Some("1".to_string());
        }
        self.objects.lock().insert(ObjectId::of(&object), object);
    }

    /// Current state of an object.
    pub fn object(&self, id: &ObjectId) -> Option<K> {
        self.objects.lock().get(id).cloned()
    }

    /// Simulate a write by someone else: bump the stored resource version.
    pub fn touch(&self, id: &ObjectId) -> bool {
        let mut objects = self.objects.lock();
        match objects.get_mut(id) {
            Some(object) => {
                let next = next_version(object.resource_version().as_deref());
                object.meta_mut().resource_version = Some(next);
                true
            }
            None => false,
        }
    }

    /// Number of patches applied so far.
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    fn not_found(id: &ObjectId) -> MirrorError {
        MirrorError::NotFound {
            kind: K::kind(&()).into_owned(),
            namespace: id.namespace.clone(),
            name: id.name.clone(),
        }
    }
}

#[async_trait]
impl<K> ResourceStore<K> for InMemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, id: &ObjectId) -> Result<K> {
        self.object(id).ok_or_else(|| Self::not_found(id))
    }

    async fn patch(&self, original: &K, modified: &K) -> Result<()> {
        let id = ObjectId::of(original);
        let patch = merge::diff(
            &serde_json::to_value(original)?,
            &serde_json::to_value(modified)?,
        );

        let mut objects = self.objects.lock();
        let current = objects.get_mut(&id).ok_or_else(|| Self::not_found(&id))?;

        if current.resource_version() != original.resource_version() {
            return Err(MirrorError::PatchConflict {
                kind: K::kind(&()).into_owned(),
                namespace: id.namespace.clone(),
                name: id.name.clone(),
                message: format!(
                    "resourceVersion {} is stale, current is {}",
                    original.resource_version().unwrap_or_default(),
                    current.resource_version().unwrap_or_default()
                ),
            });
        }
        if merge::is_empty(&patch) {
            return Ok(());
        }

        let mut document = serde_json::to_value(&*current)?;
        json_patch::merge(&mut document, &patch);
        let mut updated: K = serde_json::from_value(document)?;
        updated.meta_mut().resource_version =
            Some(next_version(current.resource_version().as_deref()));
        *current = updated;

        self.patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn next_version(current: Option<&str>) -> String {
    let current: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap as Labels;

    fn deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(Labels::from([("app".to_string(), name.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn with_annotation(object: &Deployment, key: &str, value: &str) -> Deployment {
        let mut copy = object.clone();
        copy.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
        copy
    }

    #[tokio::test]
    async fn test_get_assigns_initial_version() {
        let store = InMemoryStore::new().with_object(deployment("nginx"));
        let object = store.get(&ObjectId::new("default", "nginx")).await.unwrap();
        assert_eq!(object.resource_version().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryStore::<Deployment>::new();
        let err = store.get(&ObjectId::new("default", "nope")).await.unwrap_err();
        match err {
            MirrorError::NotFound { kind, namespace, name } => {
                assert_eq!(kind, "Deployment");
                assert_eq!(namespace, "default");
                assert_eq!(name, "nope");
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_patch_merges_and_bumps_version() {
        let store = InMemoryStore::new().with_object(deployment("nginx"));
        let id = ObjectId::new("default", "nginx");
        let original = store.get(&id).await.unwrap();

        store
            .patch(&original, &with_annotation(&original, "mirrored", "true"))
            .await
            .unwrap();

        let stored = store.object(&id).unwrap();
        assert_eq!(stored.resource_version().as_deref(), Some("2"));
        assert_eq!(stored.labels().get("app").map(String::as_str), Some("nginx"));
        assert_eq!(
            stored.annotations().get("mirrored").map(String::as_str),
            Some("true")
        );
        assert_eq!(store.patch_count(), 1);
    }

    #[tokio::test]
    async fn test_patch_preserves_concurrent_unrelated_fields() {
        let store = InMemoryStore::new().with_object(deployment("nginx"));
        let id = ObjectId::new("default", "nginx");
        let original = store.get(&id).await.unwrap();

        // A label added out of band without a version bump survives the patch.
        let mut current = store.object(&id).unwrap();
        current
            .labels_mut()
            .insert("owner".to_string(), "ops".to_string());
        store.insert(current);

        store
            .patch(&original, &with_annotation(&original, "k", "v"))
            .await
            .unwrap();
        let stored = store.object(&id).unwrap();
        assert_eq!(stored.labels().get("owner").map(String::as_str), Some("ops"));
    }

    #[tokio::test]
    async fn test_stale_patch_conflicts() {
        let store = InMemoryStore::new().with_object(deployment("nginx"));
        let id = ObjectId::new("default", "nginx");
        let original = store.get(&id).await.unwrap();
        assert!(store.touch(&id));

        let err = store
            .patch(&original, &with_annotation(&original, "k", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::PatchConflict { .. }));
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn test_noop_patch_is_not_counted() {
        let store = InMemoryStore::new().with_object(deployment("nginx"));
        let id = ObjectId::new("default", "nginx");
        let original = store.get(&id).await.unwrap();
        store.patch(&original, &original.clone()).await.unwrap();
        assert_eq!(store.patch_count(), 0);
        assert_eq!(
            store.object(&id).unwrap().resource_version().as_deref(),
            Some("1")
        );
    }
}
