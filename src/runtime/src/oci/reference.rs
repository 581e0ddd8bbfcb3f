//! OCI image reference parsing.
//!
//! Parses image references like `quay.io/prometheus/node-exporter:v1.1.2` into
//! structured components, canonicalizing the implicit parts the way container
//! runtimes do: a missing registry becomes `index.docker.io`, a single-segment
//! Docker Hub repository gains the `library/` namespace, and a missing tag
//! becomes `latest`.

use a3s_mirror_core::error::{MirrorError, Result};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Alias rewritten to [`DEFAULT_REGISTRY`].
const DEFAULT_REGISTRY_ALIAS: &str = "docker.io";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Namespace implied for single-segment Docker Hub repositories.
const IMPLICIT_NAMESPACE: &str = "library/";

const REPOSITORY_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789_-./";
const TAG_CHARS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-.";
const DIGEST_ALGORITHM: &str = "sha256:";
const DIGEST_HEX_LEN: usize = 64;
const MAX_TAG_LEN: usize = 128;

/// What a reference points at within its repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Mutable tag (e.g., "latest", "v1.1.2").
    Tag(String),
    /// Content digest (e.g., "sha256:c439...").
    Digest(String),
}

/// Parsed OCI image reference.
///
/// Exactly one of tag or digest is held. When a reference carries both
/// (`repo:tag@sha256:...`), the digest wins and the tag is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host with optional port (e.g., "index.docker.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "prometheus/node-exporter")
    pub repository: String,
    /// Tag or digest
    pub identifier: Identifier,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → index.docker.io/library/nginx:latest
    /// - `nginx:1.25` → index.docker.io/library/nginx:1.25
    /// - `myuser/myimage` → index.docker.io/myuser/myimage:latest
    /// - `docker.io/nginx` → index.docker.io/library/nginx:latest
    /// - `quay.io/org/image:tag` → quay.io/org/image:tag
    /// - `quay.io/org/image:tag@sha256:<64 hex>` → quay.io/org/image@sha256:<64 hex>
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MirrorError::invalid_reference(
                reference,
                "empty image reference",
            ));
        }

        let (name, identifier) = match reference.split_once('@') {
            Some((base, digest)) => {
                check_digest(reference, digest)?;
                // A tag alongside the digest is validated, then discarded.
                let (name, tag) = split_tag(base);
                if let Some(tag) = tag {
                    check_tag(reference, tag)?;
                }
                (name, Identifier::Digest(digest.to_string()))
            }
            None => {
                let (name, tag) = split_tag(reference);
                let tag = match tag {
                    Some(tag) => {
                        check_tag(reference, tag)?;
                        tag
                    }
                    None => DEFAULT_TAG,
                };
                (name, Identifier::Tag(tag.to_string()))
            }
        };

        let (registry, repository) = split_registry_repository(reference, name)?;

        Ok(ImageReference {
            registry,
            repository,
            identifier,
        })
    }

    /// The tag, if this reference is tag-addressed.
    pub fn tag(&self) -> Option<&str> {
        match &self.identifier {
            Identifier::Tag(tag) => Some(tag),
            Identifier::Digest(_) => None,
        }
    }

    /// The digest, if this reference is digest-addressed.
    pub fn digest(&self) -> Option<&str> {
        match &self.identifier {
            Identifier::Digest(digest) => Some(digest),
            Identifier::Tag(_) => None,
        }
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// A reference to another artifact in the same repository.
    pub fn with_identifier(&self, identifier: Identifier) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            identifier,
        }
    }

    /// Get the full canonical reference string.
    pub fn full_reference(&self) -> String {
        match &self.identifier {
            Identifier::Tag(tag) => format!("{}:{}", self.repository_name(), tag),
            Identifier::Digest(digest) => format!("{}@{}", self.repository_name(), digest),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `name[:tag]`. The tag is whatever follows the last colon, unless
/// that text contains a slash (then the colon belongs to a registry port).
/// An empty tag counts as absent.
fn split_tag(name: &str) -> (&str, Option<&str>) {
    match name.rfind(':') {
        Some(pos) if !name[pos + 1..].contains('/') => {
            let tag = &name[pos + 1..];
            if tag.is_empty() {
                (&name[..pos], None)
            } else {
                (&name[..pos], Some(tag))
            }
        }
        _ => (name, None),
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(reference: &str, name: &str) -> Result<(String, String)> {
    // The first component is a registry only if it looks like a hostname
    // (contains a dot or colon, or is "localhost").
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first, rest)
        }
        _ => ("", name),
    };

    check_repository(reference, repository)?;

    let registry = match registry {
        "" | DEFAULT_REGISTRY_ALIAS => DEFAULT_REGISTRY.to_string(),
        other => {
            check_registry(reference, other)?;
            other.to_string()
        }
    };

    let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("{}{}", IMPLICIT_NAMESPACE, repository)
    } else {
        repository.to_string()
    };

    Ok((registry, repository))
}

fn check_repository(reference: &str, repository: &str) -> Result<()> {
    if repository.len() < 2 {
        return Err(MirrorError::invalid_reference(
            reference,
            "repository must be at least 2 characters",
        ));
    }
    if let Some(c) = repository.chars().find(|c| !REPOSITORY_CHARS.contains(*c)) {
        return Err(MirrorError::invalid_reference(
            reference,
            format!("repository contains invalid character '{}'", c),
        ));
    }
    if repository.split('/').any(str::is_empty) {
        return Err(MirrorError::invalid_reference(
            reference,
            "repository contains an empty path component",
        ));
    }
    Ok(())
}

/// Registries are lowercase hostnames with an optional numeric port.
fn check_registry(reference: &str, registry: &str) -> Result<()> {
    let (host, port) = match registry.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    let port_ok = port.map_or(true, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if host_ok && port_ok {
        Ok(())
    } else {
        Err(MirrorError::invalid_reference(
            reference,
            format!("invalid registry '{}'", registry),
        ))
    }
}

fn check_tag(reference: &str, tag: &str) -> Result<()> {
    if tag.len() > MAX_TAG_LEN {
        return Err(MirrorError::invalid_reference(
            reference,
            format!("tag longer than {} characters", MAX_TAG_LEN),
        ));
    }
    if let Some(c) = tag.chars().find(|c| !TAG_CHARS.contains(*c)) {
        return Err(MirrorError::invalid_reference(
            reference,
            format!("tag contains invalid character '{}'", c),
        ));
    }
    Ok(())
}

fn check_digest(reference: &str, digest: &str) -> Result<()> {
    let valid = digest
        .strip_prefix(DIGEST_ALGORITHM)
        .is_some_and(|hex| {
            hex.len() == DIGEST_HEX_LEN
                && hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        });
    if valid {
        Ok(())
    } else {
        Err(MirrorError::invalid_reference(
            reference,
            "digest must be sha256:<64 lowercase hex characters>",
        ))
    }
}
