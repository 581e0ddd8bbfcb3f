//! Registry credentials resolved from a docker `config.json`.
//!
//! Credentials are looked up per registry and passed explicitly into every
//! transport call; nothing here is process-global.

use std::collections::HashMap;
use std::path::PathBuf;

use a3s_mirror_core::config::{decode_basic_auth, registry_host};
use a3s_mirror_core::error::{MirrorError, Result};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;

/// Authentication credentials for a container registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    /// Whether no credentials are held.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    /// The username, if any.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Convert to oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Resolves the credentials to present to a registry.
pub trait CredentialResolver: Send + Sync {
    /// Credentials for `registry` (a host with optional port).
    fn resolve(&self, registry: &str) -> RegistryAuth;
}

/// Always resolves to anonymous access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousCredentials;

impl CredentialResolver for AnonymousCredentials {
    fn resolve(&self, _registry: &str) -> RegistryAuth {
        RegistryAuth::anonymous()
    }
}

/// Per-registry auth entry of a docker config file.
#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Docker config file format (only the parts used here).
#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// Credential resolver backed by a docker `config.json`.
///
/// The file is re-read on every lookup so rotated secrets mounted into the
/// pod are picked up without a restart. Registries without an entry fall
/// back to `REGISTRY_USERNAME`/`REGISTRY_PASSWORD`, then anonymous.
pub struct DockerConfigKeychain {
    path: PathBuf,
}

impl DockerConfigKeychain {
    /// Keychain reading `<dir>/config.json`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    /// Look up credentials for a registry. Returns `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        let wanted = normalize_registry(registry);
        Ok(file
            .auths
            .iter()
            .find(|(server, _)| normalize_registry(server) == wanted)
            .and_then(|(_, entry)| entry_credentials(entry)))
    }

    /// List all registries with stored credentials.
    pub fn list_registries(&self) -> Result<Vec<String>> {
        let file = self.load()?;
        let mut registries: Vec<String> =
            file.auths.keys().map(|s| normalize_registry(s)).collect();
        registries.sort();
        registries.dedup();
        Ok(registries)
    }

    /// Load the config file from disk. Returns empty if not found.
    fn load(&self) -> Result<DockerConfigFile> {
        if !self.path.exists() {
            return Ok(DockerConfigFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            MirrorError::Config(format!(
                "Failed to read docker config {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            MirrorError::Config(format!(
                "Failed to parse docker config {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl CredentialResolver for DockerConfigKeychain {
    fn resolve(&self, registry: &str) -> RegistryAuth {
        match self.get(registry) {
            Ok(Some((username, password))) => RegistryAuth::basic(username, password),
            Ok(None) => RegistryAuth::from_env(),
            Err(e) => {
                tracing::warn!(registry, error = %e, "Falling back to environment credentials");
                RegistryAuth::from_env()
            }
        }
    }
}

fn entry_credentials(entry: &AuthEntry) -> Option<(String, String)> {
    if let (Some(u), Some(p)) = (&entry.username, &entry.password) {
        return Some((u.clone(), p.clone()));
    }
    entry.auth.as_deref().and_then(decode_basic_auth)
}

/// Normalize registry names (e.g., "docker.io", "https://index.docker.io/v1/" → "index.docker.io").
fn normalize_registry(registry: &str) -> String {
    registry_host(&registry.trim().to_lowercase())
}
