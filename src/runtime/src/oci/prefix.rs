//! Target prefix normalization and flattened mirror naming.
//!
//! Every mirrored image lands one level below the target prefix, with the
//! source registry and repository folded into a single path segment:
//!
//! ```text
//! quay.io/prometheus/node-exporter:v1.1.2
//!   → <prefix>/quay.io_prometheus_node-exporter:v1.1.2
//! localhost:5000/team/app@sha256:…
//!   → <prefix>/localhost_5000_team_app@sha256:…
//! ```

use a3s_mirror_core::error::{MirrorError, Result};

use super::reference::{Identifier, ImageReference};

/// Repository appended to the raw prefix so it can be canonicalized
/// through the regular reference parser.
const PROBE_REPOSITORY: &str = "foo";

/// Canonical `registry/repository-path` prefix that mirrored images live under.
///
/// Never has a trailing slash. Normalizing an already-normalized prefix
/// yields the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetPrefix(String);

impl TargetPrefix {
    /// Canonicalize a configured prefix.
    ///
    /// Implicit parts are expanded exactly as they would be for a real
    /// reference, so `team` becomes `index.docker.io/team` while
    /// `localhost:5000/icc` is kept as is.
    pub fn normalize(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(MirrorError::InvalidPrefix {
                prefix: raw.to_string(),
                reason: "prefix is empty".to_string(),
            });
        }

        let probe = ImageReference::parse(&format!("{}/{}", trimmed, PROBE_REPOSITORY)).map_err(
            |e| MirrorError::InvalidPrefix {
                prefix: raw.to_string(),
                reason: e.to_string(),
            },
        )?;

        let canonical = probe.full_reference();
        let suffix = format!("/{}:{}", PROBE_REPOSITORY, super::reference::DEFAULT_TAG);
        match canonical.strip_suffix(&suffix) {
            Some(prefix) if !prefix.is_empty() => Ok(Self(prefix.to_string())),
            _ => Err(MirrorError::InvalidPrefix {
                prefix: raw.to_string(),
                reason: format!("'{}' does not canonicalize to a repository path", trimmed),
            }),
        }
    }

    /// The canonical prefix string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `reference` already lives under this prefix.
    ///
    /// Matching is textual on the canonical name; the content of an
    /// already-mirrored artifact is trusted as is. This is stricter than a
    /// plain string prefix: the prefix must end at a `/` boundary, so
    /// `localhost:5000/icc` does not contain `localhost:5000/icc2/app`.
    pub fn contains(&self, reference: &ImageReference) -> bool {
        reference
            .full_reference()
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Compute the flattened mirror location of `source`.
    ///
    /// The target repository is `<prefix>/<registry>_<repository>`, where
    /// the first colon of the registry (the port separator) becomes `_` and
    /// every `/` of the repository becomes `_`. The tag or digest carries
    /// over unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the flattened name does not parse. Parsed references only
    /// contain characters that stay valid after flattening, so this
    /// indicates a bug rather than bad input.
    pub fn target_for(&self, source: &ImageReference) -> ImageReference {
        let mut name = format!(
            "{}/{}_{}",
            self.0,
            source.registry.replacen(':', "_", 1),
            source.repository.replace('/', "_")
        );
        match &source.identifier {
            Identifier::Tag(tag) => {
                name.push(':');
                name.push_str(tag);
            }
            Identifier::Digest(digest) => {
                name.push('@');
                name.push_str(digest);
            }
        }

        ImageReference::parse(&name).unwrap_or_else(|e| {
            panic!(
                "flattened reference '{}' for {} is not a valid reference: {}",
                name, source, e
            )
        })
    }
}

impl std::fmt::Display for TargetPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetPrefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str =
        "sha256:c4390c53f348c3bd4e60a5dd6a11c35799ae78c49388090140b9d72ccede1755";

    fn prefix(raw: &str) -> TargetPrefix {
        TargetPrefix::normalize(raw).unwrap()
    }

    fn target(prefix_raw: &str, source: &str) -> String {
        prefix(prefix_raw)
            .target_for(&ImageReference::parse(source).unwrap())
            .full_reference()
    }

    #[test]
    fn test_normalize_keeps_explicit_registry() {
        assert_eq!(prefix("localhost:5000/icc").as_str(), "localhost:5000/icc");
        assert_eq!(
            prefix("myregistry.example.com/backup").as_str(),
            "myregistry.example.com/backup"
        );
    }

    #[test]
    fn test_normalize_expands_implicit_registry() {
        assert_eq!(prefix("team").as_str(), "index.docker.io/team");
        assert_eq!(prefix("x/y").as_str(), "index.docker.io/x/y");
        assert_eq!(prefix("docker.io/team").as_str(), "index.docker.io/team");
    }

    #[test]
    fn test_normalize_trims_trailing_slashes() {
        assert_eq!(prefix("localhost:5000/icc///").as_str(), "localhost:5000/icc");
    }

    #[test]
    fn test_normalize_registry_only() {
        assert_eq!(prefix("localhost:5000").as_str(), "localhost:5000");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["team", "localhost:5000/icc/", "docker.io/a/b", "quay.io/org"] {
            let once = prefix(raw);
            let twice = prefix(once.as_str());
            assert_eq!(once, twice, "normalizing {}", raw);
        }
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        assert!(matches!(
            TargetPrefix::normalize(""),
            Err(MirrorError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            TargetPrefix::normalize("Registry/Team"),
            Err(MirrorError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            TargetPrefix::normalize("localhost:5000/icc:v1"),
            Err(MirrorError::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn test_target_for_docker_hub_image() {
        assert_eq!(
            target("localhost:5000/icc", "nginx"),
            "localhost:5000/icc/index.docker.io_library_nginx:latest"
        );
    }

    #[test]
    fn test_target_for_implicit_prefix() {
        let t = prefix("x/y").target_for(&ImageReference::parse("nginx").unwrap());
        assert_eq!(t.registry, "index.docker.io");
        assert_eq!(t.repository, "x/y/index.docker.io_library_nginx");
        assert_eq!(t.tag(), Some("latest"));
    }

    #[test]
    fn test_target_for_nested_repository() {
        assert_eq!(
            target("localhost:5000/icc", "quay.io/prometheus/node-exporter:v1.1.2"),
            "localhost:5000/icc/quay.io_prometheus_node-exporter:v1.1.2"
        );
    }

    #[test]
    fn test_target_for_digest() {
        assert_eq!(
            target(
                "localhost:5000/icc",
                &format!("k8s.gcr.io/ingress-nginx/controller:v0.45.0@{}", DIGEST)
            ),
            format!("localhost:5000/icc/k8s.gcr.io_ingress-nginx_controller@{}", DIGEST)
        );
    }

    #[test]
    fn test_target_for_replaces_only_port_colon() {
        assert_eq!(
            target("quay.io/backup", "registry.local:5000/team/app:1.0"),
            "quay.io/backup/registry.local_5000_team_app:1.0"
        );
    }

    #[test]
    fn test_target_for_is_deterministic() {
        let p = prefix("localhost:5000/icc");
        let source = ImageReference::parse("alpine:3.13").unwrap();
        assert_eq!(p.target_for(&source), p.target_for(&source));
    }

    #[test]
    fn test_contains_mirrored_image() {
        let p = prefix("localhost:5000/icc");
        let mirrored =
            ImageReference::parse("localhost:5000/icc/index.docker.io_library_nginx:latest")
                .unwrap();
        assert!(p.contains(&mirrored));
        assert!(!p.contains(&ImageReference::parse("nginx").unwrap()));
    }

    #[test]
    fn test_contains_requires_path_boundary() {
        let p = prefix("localhost:5000/icc");
        let sibling = ImageReference::parse("localhost:5000/icc2/app:v1").unwrap();
        assert!(!p.contains(&sibling));
    }

    #[test]
    fn test_contains_target_output() {
        let p = prefix("team");
        let t = p.target_for(&ImageReference::parse("quay.io/org/app:v2").unwrap());
        assert!(p.contains(&t));
    }
}
