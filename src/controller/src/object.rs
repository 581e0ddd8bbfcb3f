//! Per-kind access to the images of a workload's pod template.

use a3s_mirror_runtime::ImageMapping;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::PodSpec;
use kube::Resource;

/// Reads and rewrites container images of one workload kind.
///
/// Implementors only say where the pod spec lives; extraction and
/// replacement are shared across kinds.
pub trait ObjectManager: Send + Sync + 'static {
    /// The workload type handled by this manager.
    type Object: Resource<DynamicType = ()> + Clone + Send + Sync + 'static;

    /// Kind name used in logs and errors.
    const KIND: &'static str;

    /// The pod spec of `object`, if it has one.
    fn pod_spec(object: &Self::Object) -> Option<&PodSpec>;

    /// Mutable access to the pod spec of `object`.
    fn pod_spec_mut(object: &mut Self::Object) -> Option<&mut PodSpec>;

    /// Distinct container images in container order, first occurrence wins.
    ///
    /// Containers without an image are skipped.
    fn extract_images(&self, object: &Self::Object) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        let Some(spec) = Self::pod_spec(object) else {
            return images;
        };
        for image in spec.containers.iter().filter_map(|c| c.image.as_deref()) {
            if image.is_empty() || images.iter().any(|seen| seen == image) {
                continue;
            }
            images.push(image.to_string());
        }
        images
    }

    /// A copy of `object` with every container image found in `mapping`
    /// rewritten. The input is left untouched.
    fn replace_images(&self, object: &Self::Object, mapping: &ImageMapping) -> Self::Object {
        let mut copy = object.clone();
        if let Some(spec) = Self::pod_spec_mut(&mut copy) {
            for container in spec.containers.iter_mut() {
                let replacement = container
                    .image
                    .as_ref()
                    .and_then(|image| mapping.get(image))
                    .cloned();
                if let Some(replacement) = replacement {
                    container.image = Some(replacement);
                }
            }
        }
        copy
    }
}

/// [`ObjectManager`] for `apps/v1` Deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentManager;

impl ObjectManager for DeploymentManager {
    type Object = Deployment;
    const KIND: &'static str = "Deployment";

    fn pod_spec(object: &Deployment) -> Option<&PodSpec> {
        object.spec.as_ref()?.template.spec.as_ref()
    }

    fn pod_spec_mut(object: &mut Deployment) -> Option<&mut PodSpec> {
        object.spec.as_mut()?.template.spec.as_mut()
    }
}

/// [`ObjectManager`] for `apps/v1` DaemonSets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonSetManager;

impl ObjectManager for DaemonSetManager {
    type Object = DaemonSet;
    const KIND: &'static str = "DaemonSet";

    fn pod_spec(object: &DaemonSet) -> Option<&PodSpec> {
        object.spec.as_ref()?.template.spec.as_ref()
    }

    fn pod_spec_mut(object: &mut DaemonSet) -> Option<&mut PodSpec> {
        object.spec.as_mut()?.template.spec.as_mut()
    }
}
