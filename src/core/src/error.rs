use thiserror::Error;

/// A3S Mirror error types
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Target prefix could not be canonicalized
    #[error("Invalid target prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    /// Image reference could not be parsed
    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Copying an image to its mirror location failed
    #[error("Failed to clone {image} -> {target}: {reason}")]
    CloneFailed {
        image: String,
        target: String,
        reason: String,
    },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// Workload object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Patch rejected because the stored object changed since it was read
    #[error("Conflict patching {kind} {namespace}/{name}: {message}")]
    PatchConflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    /// Resource store error
    #[error("Store error: {0}")]
    Store(String),

    /// Operation was cancelled before completing
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Shorthand for an [`MirrorError::InvalidReference`].
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Whether re-running the reconciliation may succeed without outside intervention.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::InvalidPrefix { .. } | Self::InvalidReference { .. } | Self::Config(_)
        )
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::Serialization(err.to_string())
    }
}

/// Result type alias for A3S Mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_prefix_display() {
        let error = MirrorError::InvalidPrefix {
            prefix: "Bad/Prefix".to_string(),
            reason: "uppercase repository".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid target prefix 'Bad/Prefix': uppercase repository"
        );
    }

    #[test]
    fn test_invalid_reference_display() {
        let error = MirrorError::invalid_reference("nginx@bad", "malformed digest");
        assert_eq!(
            error.to_string(),
            "Invalid image reference 'nginx@bad': malformed digest"
        );
    }

    #[test]
    fn test_clone_failed_display() {
        let error = MirrorError::CloneFailed {
            image: "nginx".to_string(),
            target: "localhost:5000/icc/index.docker.io_library_nginx:latest".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to clone nginx -> localhost:5000/icc/index.docker.io_library_nginx:latest: connection refused"
        );
    }

    #[test]
    fn test_registry_error_display() {
        let error = MirrorError::Registry {
            registry: "quay.io".to_string(),
            message: "unauthorized".to_string(),
        };
        assert_eq!(error.to_string(), "Registry error: quay.io - unauthorized");
    }

    #[test]
    fn test_not_found_display() {
        let error = MirrorError::NotFound {
            kind: "Deployment".to_string(),
            namespace: "default".to_string(),
            name: "nginx".to_string(),
        };
        assert_eq!(error.to_string(), "Deployment default/nginx not found");
    }

    #[test]
    fn test_patch_conflict_display() {
        let error = MirrorError::PatchConflict {
            kind: "DaemonSet".to_string(),
            namespace: "ingress-nginx".to_string(),
            name: "controller".to_string(),
            message: "resourceVersion mismatch".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Conflict patching DaemonSet ingress-nginx/controller: resourceVersion mismatch"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: MirrorError = io_error.into();
        assert!(matches!(error, MirrorError::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: MirrorError = json_err.into();
        assert!(matches!(error, MirrorError::Serialization(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(!MirrorError::invalid_reference("x", "y").is_transient());
        assert!(!MirrorError::Config("missing prefix".to_string()).is_transient());
        assert!(MirrorError::Store("timeout".to_string()).is_transient());
        assert!(MirrorError::PatchConflict {
            kind: "Deployment".to_string(),
            namespace: "default".to_string(),
            name: "nginx".to_string(),
            message: "stale".to_string(),
        }
        .is_transient());
    }
}
