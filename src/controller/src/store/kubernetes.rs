//! [`ResourceStore`] backed by the Kubernetes API server.

use std::fmt::Debug;
use std::marker::PhantomData;

use a3s_mirror_core::error::{MirrorError, Result};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{merge, ObjectId, ResourceStore};

/// Field manager recorded on every patch.
pub const FIELD_MANAGER: &str = "a3s-mirror";

/// Namespaced objects of kind `K` in a live cluster.
///
/// Patches are strategic merge patches holding only the fields that differ
/// between the original and modified object, with `metadata.resourceVersion`
/// pinned to the original so stale writes are rejected by the server.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn error(err: kube::Error, id: &ObjectId, action: &str) -> MirrorError {
        let kind = K::kind(&()).into_owned();
        match err {
            kube::Error::Api(resp) if resp.code == 404 => MirrorError::NotFound {
                kind,
                namespace: id.namespace.clone(),
                name: id.name.clone(),
            },
            kube::Error::Api(resp) if resp.code == 409 => MirrorError::PatchConflict {
                kind,
                namespace: id.namespace.clone(),
                name: id.name.clone(),
                message: resp.message,
            },
            other => MirrorError::Store(format!("failed to {} {} {}: {}", action, kind, id, other)),
        }
    }
}

#[async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, id: &ObjectId) -> Result<K> {
        self.api(&id.namespace)
            .get(&id.name)
            .await
            .map_err(|e| Self::error(e, id, "get"))
    }

    async fn patch(&self, original: &K, modified: &K) -> Result<()> {
        let id = ObjectId::of(original);
        let mut patch = merge::diff(
            &serde_json::to_value(original)?,
            &serde_json::to_value(modified)?,
        );
        if merge::is_empty(&patch) {
            tracing::debug!(object = %id, "Nothing to patch");
            return Ok(());
        }
        if let Some(version) = original.resource_version() {
            pin_resource_version(&mut patch, version);
        }

        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(&id.namespace)
            .patch(&id.name, &params, &Patch::Strategic(patch))
            .await
            .map_err(|e| Self::error(e, &id, "patch"))?;
        Ok(())
    }
}

/// Set `metadata.resourceVersion` in a merge patch.
fn pin_resource_version(patch: &mut Value, version: String) {
    if let Value::Object(fields) = patch {
        let metadata = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert("resourceVersion".to_string(), Value::String(version));
        }
    }
}
