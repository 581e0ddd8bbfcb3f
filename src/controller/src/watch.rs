//! Drives a [`Reconciler`] from cluster watch events.
//!
//! One `kube::runtime::Controller` per workload kind. Successful passes
//! wait for the next change; failed passes are requeued with per-object
//! exponential backoff. The controller stops when the shutdown token fires.

use std::fmt::Debug;
use std::sync::Arc;

use a3s_mirror_core::error::MirrorError;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffTracker, RequeuePolicy};
use crate::object::ObjectManager;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::ObjectId;

/// State shared by the reconcile and error-policy callbacks.
pub struct WatchContext<M: ObjectManager> {
    reconciler: Arc<Reconciler<M>>,
    backoff: BackoffTracker,
    shutdown: CancellationToken,
}

impl<M: ObjectManager> WatchContext<M> {
    pub fn new(
        reconciler: Arc<Reconciler<M>>,
        policy: RequeuePolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            backoff: BackoffTracker::new(policy),
            shutdown,
        }
    }

    /// Failure bookkeeping, exposed for inspection.
    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }
}

/// Reconcile callback. Each pass gets a child of the shutdown token so
/// in-flight clones stop when the process does.
pub async fn reconcile<M: ObjectManager>(
    object: Arc<M::Object>,
    ctx: Arc<WatchContext<M>>,
) -> Result<Action, MirrorError> {
    let id = ObjectId::of(object.as_ref());
    let cancel = ctx.shutdown.child_token();

    match ctx.reconciler.reconcile(&id, &cancel).await {
        Ok(outcome) => {
            ctx.backoff.reset(&id);
            if let ReconcileOutcome::Patched { cloned } = outcome {
                tracing::debug!(kind = M::KIND, object = %id, cloned, "Patched");
            }
            Ok(Action::await_change())
        }
        // Deleted between the event and the fetch; the next event brings it back.
        Err(MirrorError::NotFound { .. }) => {
            ctx.backoff.reset(&id);
            tracing::debug!(kind = M::KIND, object = %id, "Object is gone");
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

/// Error policy: exponential backoff per object for transient failures.
///
/// Permanent failures (a malformed image reference) wait for the object to
/// change instead of being retried.
pub fn error_policy<M: ObjectManager>(
    object: Arc<M::Object>,
    error: &MirrorError,
    ctx: Arc<WatchContext<M>>,
) -> Action {
    let id = ObjectId::of(object.as_ref());
    if !error.is_transient() {
        tracing::warn!(
            kind = M::KIND,
            object = %id,
            error = %error,
            "Not requeueing permanent failure"
        );
        ctx.backoff.reset(&id);
        return Action::await_change();
    }
    let delay = ctx.backoff.record_failure(&id);
    tracing::warn!(
        kind = M::KIND,
        object = %id,
        error = %error,
        failures = ctx.backoff.failures(&id),
        requeue_secs = delay.as_secs(),
        "Requeueing after failure"
    );
    Action::requeue(delay)
}

/// Drop the failure count of an object the controller no longer knows.
///
/// A requeue scheduled for an object deleted in the meantime never reaches
/// [`reconcile`], so its entry would otherwise stay behind.
pub fn forget_deleted<M: ObjectManager>(ctx: &WatchContext<M>, id: &ObjectId) {
    if ctx.backoff.failures(id) > 0 {
        tracing::debug!(kind = M::KIND, object = %id, "Forgetting failures of deleted object");
        ctx.backoff.reset(id);
    }
}

/// Watch every object of `M`'s kind cluster-wide until `shutdown` fires.
pub async fn run<M>(
    client: Client,
    reconciler: Arc<Reconciler<M>>,
    policy: RequeuePolicy,
    shutdown: CancellationToken,
) where
    M: ObjectManager,
    M::Object: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let api: Api<M::Object> = Api::all(client);
    let ctx = Arc::new(WatchContext::new(reconciler, policy, shutdown.clone()));
    let stop = shutdown.clone();
    let bookkeeping = ctx.clone();

    tracing::info!(kind = M::KIND, "Starting controller");
    Controller::new(api, watcher::Config::default())
        .graceful_shutdown_on(async move { stop.cancelled().await })
        .run(reconcile::<M>, error_policy::<M>, ctx)
        .for_each(|result| {
            if let Err(controller::Error::ObjectNotFound(object)) = &result {
                let id = ObjectId::new(
                    object.namespace.clone().unwrap_or_default(),
                    object.name.clone(),
                );
                forget_deleted(&bookkeeping, &id);
            }
            async move {
                match result {
                    Ok((object, _)) => {
                        tracing::trace!(kind = M::KIND, object = %object.name, "Reconciled");
                    }
                    Err(e) => {
                        tracing::debug!(kind = M::KIND, error = %e, "Reconcile loop error");
                    }
                }
            }
        })
        .await;
    tracing::info!(kind = M::KIND, "Controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::DeploymentManager;
    use crate::store::InMemoryStore;
    use a3s_mirror_runtime::oci::{AnonymousCredentials, MemoryRegistry, TargetPrefix};
    use a3s_mirror_runtime::{CloneOrchestrator, Cloner};
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::time::Duration;

    fn deployment(namespace: &str, name: &str, image: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "main".to_string(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn context(
        registry: MemoryRegistry,
        store: InMemoryStore<Deployment>,
    ) -> Arc<WatchContext<DeploymentManager>> {
        let cloner = Cloner::new(
            TargetPrefix::normalize("localhost:5000/icc").unwrap(),
            Arc::new(registry),
            Arc::new(AnonymousCredentials),
        );
        let reconciler = Reconciler::new(
            DeploymentManager,
            Arc::new(store),
            CloneOrchestrator::new(cloner),
        );
        Arc::new(WatchContext::new(
            Arc::new(reconciler),
            RequeuePolicy::new(Duration::from_secs(1), Duration::from_secs(8)),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_success_awaits_change() {
        let object = deployment("default", "nginx", "nginx");
        let ctx = context(
            MemoryRegistry::new().with_image("nginx"),
            InMemoryStore::new().with_object(object.clone()),
        );
        let action = reconcile(Arc::new(object), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_deleted_object_awaits_change() {
        let object = deployment("default", "gone", "nginx");
        let ctx = context(MemoryRegistry::new(), InMemoryStore::new());
        let id = ObjectId::of(&object);
        ctx.backoff().record_failure(&id);

        let action = reconcile(Arc::new(object), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(ctx.backoff().failures(&id), 0);
    }

    #[tokio::test]
    async fn test_forget_deleted_drops_failures() {
        let ctx = context(MemoryRegistry::new(), InMemoryStore::new());
        let gone = ObjectId::new("default", "gone");
        let kept = ObjectId::new("default", "kept");
        ctx.backoff().record_failure(&gone);
        ctx.backoff().record_failure(&kept);

        forget_deleted(&ctx, &gone);

        assert_eq!(ctx.backoff().failures(&gone), 0);
        assert_eq!(ctx.backoff().failures(&kept), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off_then_resets() {
        let object = Arc::new(deployment("default", "typo", "nnnnginx"));
        let ctx = context(
            MemoryRegistry::new(),
            InMemoryStore::new().with_object(object.as_ref().clone()),
        );
        let id = ObjectId::of(object.as_ref());

        let err = reconcile(object.clone(), ctx.clone()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(
            error_policy(object.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(1))
        );
        assert_eq!(
            error_policy(object.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(2))
        );
        assert_eq!(ctx.backoff().failures(&id), 2);

        ctx.backoff().reset(&id);
        assert_eq!(
            error_policy(object, &err, ctx),
            Action::requeue(Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_requeued() {
        let object = Arc::new(deployment("default", "bad", "Not A Reference"));
        let ctx = context(
            MemoryRegistry::new(),
            InMemoryStore::new().with_object(object.as_ref().clone()),
        );
        let err = reconcile(object.clone(), ctx.clone()).await.unwrap_err();
        assert!(matches!(err, MirrorError::InvalidReference { .. }));
        assert_eq!(error_policy(object, &err, ctx), Action::await_change());
    }
}
