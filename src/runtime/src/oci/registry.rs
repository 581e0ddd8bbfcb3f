//! Registry transport for copying images between registries.
//!
//! [`RegistryTransport`] is the seam the cloner talks to. The production
//! implementation, [`OciRegistryTransport`], uses the `oci-distribution`
//! crate to pull manifests and blobs from the source and push them to the
//! mirror. Manifests are pushed as the exact bytes that were pulled so
//! digests are preserved, which keeps digest-pinned references and the
//! children of multi-platform indexes valid at the mirror.

use a3s_mirror_core::error::{MirrorError, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{OciDescriptor, OciImageIndex, OciImageManifest};
use oci_distribution::{Client, Reference, RegistryOperation};
use serde::Deserialize;

use super::credentials::RegistryAuth;
use super::reference::{Identifier, ImageReference};

/// OCI image index media type.
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
/// Docker manifest list media type.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest media type.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// Docker image manifest media type.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Manifest media types accepted when fetching.
const ACCEPTED_MEDIA_TYPES: &[&str] = &[
    OCI_INDEX_MEDIA_TYPE,
    DOCKER_MANIFEST_LIST_MEDIA_TYPE,
    OCI_MANIFEST_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE,
];

/// What a fetched manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Multi-platform index (manifest list).
    Index,
    /// Single-platform image.
    Image,
}

/// A resolved manifest, ready to be copied.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Where the manifest was fetched from.
    pub reference: ImageReference,
    /// Index or single image.
    pub kind: ArtifactKind,
    /// Manifest media type.
    pub media_type: String,
    /// Content digest of `manifest`.
    pub digest: String,
    /// Raw manifest bytes.
    pub manifest: Vec<u8>,
}

/// Credentials for one copy: read access to the source, write access to the target.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Presented to the source registry.
    pub source: RegistryAuth,
    /// Presented to the target registry.
    pub target: RegistryAuth,
}

impl Credentials {
    /// Anonymous access on both sides.
    pub fn anonymous() -> Self {
        Self {
            source: RegistryAuth::anonymous(),
            target: RegistryAuth::anonymous(),
        }
    }
}

/// Moves image artifacts between registries.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Resolve `reference` to its manifest.
    async fn fetch_descriptor(
        &self,
        reference: &ImageReference,
        credentials: &Credentials,
    ) -> Result<Descriptor>;

    /// Copy a whole multi-platform index (and every image it lists) to `target`.
    async fn copy_index(
        &self,
        descriptor: &Descriptor,
        target: &ImageReference,
        credentials: &Credentials,
    ) -> Result<()>;

    /// Copy a single image to `target`.
    async fn copy_image(
        &self,
        descriptor: &Descriptor,
        target: &ImageReference,
        credentials: &Credentials,
    ) -> Result<()>;
}

/// Just enough of a manifest to tell an index from an image.
#[derive(Deserialize)]
struct ManifestProbe {
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<Vec<serde_json::Value>>,
}

/// Classify raw manifest bytes. Returns the kind and the effective media type.
pub fn classify_manifest(raw: &[u8]) -> Result<(ArtifactKind, String)> {
    let probe: ManifestProbe = serde_json::from_slice(raw)?;
    let is_index = match probe.media_type.as_deref() {
        Some(OCI_INDEX_MEDIA_TYPE) | Some(DOCKER_MANIFEST_LIST_MEDIA_TYPE) => true,
        Some(OCI_MANIFEST_MEDIA_TYPE) | Some(DOCKER_MANIFEST_MEDIA_TYPE) => false,
        Some(other) => {
            return Err(MirrorError::Other(format!(
                "unsupported manifest media type '{}'",
                other
            )))
        }
        None => probe.manifests.is_some(),
    };

    let (kind, default_media_type) = if is_index {
        (ArtifactKind::Index, OCI_INDEX_MEDIA_TYPE)
    } else {
        (ArtifactKind::Image, OCI_MANIFEST_MEDIA_TYPE)
    };
    let media_type = probe
        .media_type
        .unwrap_or_else(|| default_media_type.to_string());
    Ok((kind, media_type))
}

/// Registry transport backed by `oci-distribution`.
pub struct OciRegistryTransport {
    client: Client,
}

impl OciRegistryTransport {
    /// Create a transport that talks HTTPS to every registry.
    pub fn new() -> Self {
        Self::with_insecure_registries(Vec::new())
    }

    /// Create a transport that uses plain HTTP for the listed registries.
    pub fn with_insecure_registries(insecure: Vec<String>) -> Self {
        let protocol = if insecure.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure)
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    /// Pull a manifest as raw bytes.
    async fn pull_raw(
        &self,
        reference: &ImageReference,
        auth: &RegistryAuth,
    ) -> Result<(Vec<u8>, String)> {
        let oci_ref = to_oci_reference(reference)?;
        self.client
            .pull_manifest_raw(&oci_ref, &auth.to_oci_auth(), ACCEPTED_MEDIA_TYPES)
            .await
            .map_err(|e| registry_error(reference, format!("Failed to pull manifest: {}", e)))
    }

    /// Push raw manifest bytes under `target`.
    async fn push_raw(
        &self,
        target: &ImageReference,
        manifest: &[u8],
        media_type: &str,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(target)?;
        let content_type = header_value(media_type).ok_or_else(|| {
            registry_error(target, format!("Invalid manifest media type '{}'", media_type))
        })?;
        self.client
            .push_manifest_raw(&oci_ref, manifest.to_vec(), content_type)
            .await
            .map_err(|e| registry_error(target, format!("Failed to push manifest: {}", e)))?;
        Ok(())
    }

    /// Authenticate for pushing to `target`.
    async fn authorize_push(&self, target: &ImageReference, auth: &RegistryAuth) -> Result<()> {
        let oci_ref = to_oci_reference(target)?;
        self.client
            .auth(&oci_ref, &auth.to_oci_auth(), RegistryOperation::Push)
            .await
            .map_err(|e| registry_error(target, format!("Authentication failed: {}", e)))?;
        Ok(())
    }

    /// Copy the config and layer blobs referenced by an image manifest.
    async fn copy_blobs(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        manifest: &OciImageManifest,
    ) -> Result<()> {
        let source_ref = to_oci_reference(source)?;
        let target_ref = to_oci_reference(target)?;

        let blobs: Vec<&OciDescriptor> = std::iter::once(&manifest.config)
            .chain(manifest.layers.iter())
            .collect();

        for blob in blobs {
            tracing::debug!(
                digest = %blob.digest,
                size = blob.size,
                target = %target,
                "Copying blob"
            );

            let mut data: Vec<u8> = Vec::new();
            self.client
                .pull_blob(&source_ref, blob, &mut data)
                .await
                .map_err(|e| {
                    registry_error(source, format!("Failed to pull blob {}: {}", blob.digest, e))
                })?;

            self.client
                .push_blob(&target_ref, &data, &blob.digest)
                .await
                .map_err(|e| {
                    registry_error(target, format!("Failed to push blob {}: {}", blob.digest, e))
                })?;
        }
        Ok(())
    }

    /// Copy one image manifest's blobs and then the manifest itself.
    async fn copy_manifest(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        raw: &[u8],
        media_type: &str,
    ) -> Result<()> {
        let manifest: OciImageManifest = serde_json::from_slice(raw)?;
        self.copy_blobs(source, target, &manifest).await?;
        self.push_raw(target, raw, media_type).await
    }
}

impl Default for OciRegistryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryTransport for OciRegistryTransport {
    async fn fetch_descriptor(
        &self,
        reference: &ImageReference,
        credentials: &Credentials,
    ) -> Result<Descriptor> {
        let (manifest, digest) = self.pull_raw(reference, &credentials.source).await?;
        let (kind, media_type) = classify_manifest(&manifest)?;

        tracing::debug!(
            reference = %reference,
            digest = %digest,
            kind = ?kind,
            "Fetched source manifest"
        );

        Ok(Descriptor {
            reference: reference.clone(),
            kind,
            media_type,
            digest,
            manifest,
        })
    }

    async fn copy_index(
        &self,
        descriptor: &Descriptor,
        target: &ImageReference,
        credentials: &Credentials,
    ) -> Result<()> {
        let index: OciImageIndex = serde_json::from_slice(&descriptor.manifest)?;
        self.authorize_push(target, &credentials.target).await?;

        for entry in &index.manifests {
            let child_id = Identifier::Digest(entry.digest.clone());
            let child_source = descriptor.reference.with_identifier(child_id.clone());
            let child_target = target.with_identifier(child_id);

            let (raw, _) = self.pull_raw(&child_source, &credentials.source).await?;
            let (kind, media_type) = classify_manifest(&raw)?;
            if kind == ArtifactKind::Index {
                return Err(registry_error(
                    &child_source,
                    "Nested image indexes are not supported".to_string(),
                ));
            }
            self.copy_manifest(&child_source, &child_target, &raw, &media_type)
                .await?;
        }

        self.push_raw(target, &descriptor.manifest, &descriptor.media_type)
            .await
    }

    async fn copy_image(
        &self,
        descriptor: &Descriptor,
        target: &ImageReference,
        credentials: &Credentials,
    ) -> Result<()> {
        self.authorize_push(target, &credentials.target).await?;
        self.copy_manifest(
            &descriptor.reference,
            target,
            &descriptor.manifest,
            &descriptor.media_type,
        )
        .await
    }
}

/// Parse a header value without naming the HTTP crate's type.
fn header_value<T: std::str::FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

fn registry_error(reference: &ImageReference, message: String) -> MirrorError {
    MirrorError::Registry {
        registry: reference.registry.clone(),
        message,
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        MirrorError::invalid_reference(ref_str.clone(), format!("rejected by OCI client: {}", e))
    })
}
