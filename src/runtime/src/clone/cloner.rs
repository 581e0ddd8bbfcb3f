//! Clones a single image to its flattened location under the target prefix.

use std::sync::Arc;

use a3s_mirror_core::error::{MirrorError, Result};
use tokio_util::sync::CancellationToken;

use crate::oci::{
    ArtifactKind, CredentialResolver, Credentials, ImageReference, RegistryTransport, TargetPrefix,
};

/// Result of cloning one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneOutcome {
    /// The image was copied; `target` is its canonical mirror reference.
    Cloned { target: String },
    /// The image already lives under the target prefix. Nothing was copied.
    AlreadyCloned,
}

/// Copies images to a fixed target prefix.
///
/// Cheap to clone; the prefix, transport and credential resolver are shared.
#[derive(Clone)]
pub struct Cloner {
    prefix: Arc<TargetPrefix>,
    transport: Arc<dyn RegistryTransport>,
    credentials: Arc<dyn CredentialResolver>,
}

impl Cloner {
    /// Create a cloner writing under `prefix`.
    pub fn new(
        prefix: TargetPrefix,
        transport: Arc<dyn RegistryTransport>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            prefix: Arc::new(prefix),
            transport,
            credentials,
        }
    }

    /// The canonical target prefix.
    pub fn prefix(&self) -> &TargetPrefix {
        &self.prefix
    }

    /// Clone `image` to its mirror location.
    ///
    /// Returns [`CloneOutcome::AlreadyCloned`] without touching the registry
    /// when `image` is already under the prefix. A whole multi-platform index
    /// is copied when the source resolves to one; otherwise the single image.
    pub async fn clone_image(
        &self,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<CloneOutcome> {
        let source = ImageReference::parse(image)?;

        if self.prefix.contains(&source) {
            tracing::debug!(image, prefix = %self.prefix, "Image already mirrored");
            return Ok(CloneOutcome::AlreadyCloned);
        }

        let target = self.prefix.target_for(&source);
        let credentials = Credentials {
            source: self.credentials.resolve(&source.registry),
            target: self.credentials.resolve(&target.registry),
        };

        tracing::info!(image, source = %source, target = %target, "Cloning image");

        let copied = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(MirrorError::Cancelled(format!("clone of {}", image)));
            }
            result = self.copy(&source, &target, &credentials) => result,
        };

        copied.map_err(|e| MirrorError::CloneFailed {
            image: image.to_string(),
            target: target.full_reference(),
            reason: e.to_string(),
        })?;

        tracing::info!(image, target = %target, "Image cloned");
        Ok(CloneOutcome::Cloned {
            target: target.full_reference(),
        })
    }

    async fn copy(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        credentials: &Credentials,
    ) -> Result<()> {
        let descriptor = self
            .transport
            .fetch_descriptor(source, credentials)
            .await
            .map_err(|e| MirrorError::Other(format!("failed to fetch source resource: {}", e)))?;

        // Prefer copying the whole index if available.
        match descriptor.kind {
            ArtifactKind::Index => self
                .transport
                .copy_index(&descriptor, target, credentials)
                .await
                .map_err(|e| MirrorError::Other(format!("failed to clone index: {}", e))),
            ArtifactKind::Image => self
                .transport
                .copy_image(&descriptor, target, credentials)
                .await
                .map_err(|e| MirrorError::Other(format!("failed to clone image: {}", e))),
        }
    }
}

impl std::fmt::Debug for Cloner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloner")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
