use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, Result};
use crate::log::LogFormat;

/// Namespace holding cluster infrastructure. Never reconciled.
pub const CLUSTER_SYSTEM_NAMESPACE: &str = "kube-system";

/// Namespace the controller runs in when `POD_NAMESPACE` is unset.
pub const DEFAULT_NAMESPACE: &str = "a3s-mirror";

/// Docker Hub credentials are stored under this legacy key.
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Canonical Docker Hub registry host.
pub const DOCKER_HUB_REGISTRY: &str = "index.docker.io";

/// Mirror controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorConfig {
    /// Repository prefix that mirrored images are written under
    /// (e.g. `registry.example.com/backup`). Discovered from the docker
    /// config file when unset.
    pub target_prefix: Option<String>,

    /// Namespace the controller itself runs in
    pub namespace: String,

    /// Additional namespaces that are never reconciled
    pub excluded_namespaces: Vec<String>,

    /// Upper bound on concurrent clones within one reconciliation (unbounded if unset)
    pub max_concurrent_clones: Option<usize>,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Directory holding the docker `config.json`
    pub docker_config: Option<PathBuf>,

    /// Initial requeue delay after a failed reconciliation
    pub requeue_base_secs: u64,

    /// Maximum requeue delay after repeated failures
    pub requeue_max_secs: u64,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            target_prefix: None,
            namespace: std::env::var("POD_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            excluded_namespaces: Vec::new(),
            max_concurrent_clones: None,
            insecure_registries: Vec::new(),
            docker_config: None,
            requeue_base_secs: 5,
            requeue_max_secs: 300,
            log_format: LogFormat::Text,
        }
    }
}

impl MirrorConfig {
    /// Load configuration from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_clones == Some(0) {
            return Err(MirrorError::Config(
                "maxConcurrentClones must be at least 1".to_string(),
            ));
        }
        if self.requeue_base_secs == 0 || self.requeue_base_secs > self.requeue_max_secs {
            return Err(MirrorError::Config(format!(
                "requeue delays must satisfy 0 < base ({}) <= max ({})",
                self.requeue_base_secs, self.requeue_max_secs
            )));
        }
        Ok(())
    }

    /// Namespaces that are never reconciled: the cluster-infrastructure
    /// namespace, the controller's own namespace, and any configured extras.
    pub fn excluded(&self) -> Vec<String> {
        let mut namespaces = vec![CLUSTER_SYSTEM_NAMESPACE.to_string(), self.namespace.clone()];
        for ns in &self.excluded_namespaces {
            if !namespaces.contains(ns) {
                namespaces.push(ns.clone());
            }
        }
        namespaces
    }

    /// Directory holding the docker `config.json`.
    ///
    /// Resolution order: configured value, `$DOCKER_CONFIG`, `~/.docker`.
    pub fn docker_config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.docker_config {
            return dir.clone();
        }
        if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docker")
    }

    /// The raw (not yet canonicalized) target prefix.
    ///
    /// Falls back to the first auth entry of the docker config file,
    /// as `server/username`.
    pub fn resolve_target_prefix(&self) -> Result<String> {
        if let Some(prefix) = self.target_prefix.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(prefix.trim().to_string());
        }
        let path = self.docker_config_dir().join("config.json");
        target_prefix_from_docker_config(&path)
    }
}

/// Subset of the docker `config.json` needed for prefix discovery.
#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

/// Derive the target prefix from the first auth entry of a docker config file.
fn target_prefix_from_docker_config(path: &Path) -> Result<String> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        MirrorError::Config(format!(
            "No target prefix configured and {} is unreadable: {}",
            path.display(),
            e
        ))
    })?;
    let file: DockerConfigFile = serde_json::from_str(&data)?;

    // Sorted for a stable choice when several registries are configured.
    let mut servers: Vec<&String> = file.auths.keys().collect();
    servers.sort();

    for server in servers {
        let entry = &file.auths[server];
        let username = entry
            .username
            .clone()
            .or_else(|| entry.auth.as_deref().and_then(username_from_auth));
        let username = match username {
            Some(u) if !u.is_empty() => u,
            _ => continue,
        };
        return Ok(format!("{}/{}", registry_host(server), username));
    }

    Err(MirrorError::Config(format!(
        "Unable to determine target repository from {}",
        path.display()
    )))
}

/// Extract the username from a base64 `user:password` auth blob.
fn username_from_auth(auth: &str) -> Option<String> {
    decode_basic_auth(auth).map(|(user, _)| user)
}

/// Decode a base64 `user:password` auth blob as stored in docker config files.
pub fn decode_basic_auth(auth: &str) -> Option<(String, String)> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(auth.trim())
        .ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    decoded
        .split_once(':')
        .map(|(user, pass)| (user.to_string(), pass.to_string()))
}

/// Reduce a docker config server key to a registry host.
pub fn registry_host(server: &str) -> String {
    if server == DOCKER_HUB_AUTH_KEY {
        return DOCKER_HUB_REGISTRY.to_string();
    }
    let host = server
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    match host {
        "docker.io" | "registry-1.docker.io" => DOCKER_HUB_REGISTRY.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_docker_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MirrorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.requeue_base_secs, 5);
        assert_eq!(config.requeue_max_secs, 300);
        assert!(config.max_concurrent_clones.is_none());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = MirrorConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert!(config.target_prefix.is_none());
    }

    #[test]
    fn test_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.yaml");
        std::fs::write(
            &path,
            "targetPrefix: registry.example.com/backup\n\
             namespace: mirror-system\n\
             excludedNamespaces: [monitoring]\n\
             maxConcurrentClones: 4\n\
             insecureRegistries: [\"localhost:5000\"]\n\
             logFormat: json\n",
        )
        .unwrap();

        let config = MirrorConfig::load(&path).unwrap();
        assert_eq!(
            config.target_prefix.as_deref(),
            Some("registry.example.com/backup")
        );
        assert_eq!(config.namespace, "mirror-system");
        assert_eq!(config.max_concurrent_clones, Some(4));
        assert_eq!(config.insecure_registries, vec!["localhost:5000"]);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.yaml");
        std::fs::write(&path, "maxConcurrentClones: 0\n").unwrap();
        assert!(matches!(
            MirrorConfig::load(&path),
            Err(MirrorError::Config(_))
        ));
    }

    #[test]
    fn test_excluded_always_contains_system_namespaces() {
        let config = MirrorConfig {
            namespace: "mirror-system".to_string(),
            excluded_namespaces: vec!["kube-system".to_string(), "monitoring".to_string()],
            ..Default::default()
        };
        assert_eq!(
            config.excluded(),
            vec!["kube-system", "mirror-system", "monitoring"]
        );
    }

    #[test]
    fn test_explicit_prefix_wins() {
        let config = MirrorConfig {
            target_prefix: Some(" localhost:5000/icc ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_target_prefix().unwrap(), "localhost:5000/icc");
    }

    #[test]
    fn test_prefix_from_docker_config_username() {
        let dir = TempDir::new().unwrap();
        write_docker_config(
            &dir,
            r#"{"auths":{"registry.example.com":{"username":"backup","password":"s3cret"}}}"#,
        );
        let config = MirrorConfig {
            docker_config: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_target_prefix().unwrap(),
            "registry.example.com/backup"
        );
    }

    #[test]
    fn test_prefix_from_docker_hub_auth_blob() {
        let dir = TempDir::new().unwrap();
        // "mirrorbot:token"
        write_docker_config(
            &dir,
            r#"{"auths":{"https://index.docker.io/v1/":{"auth":"bWlycm9yYm90OnRva2Vu"}}}"#,
        );
        let config = MirrorConfig {
            docker_config: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_target_prefix().unwrap(),
            "index.docker.io/mirrorbot"
        );
    }

    #[test]
    fn test_prefix_missing_auths_is_config_error() {
        let dir = TempDir::new().unwrap();
        write_docker_config(&dir, r#"{"auths":{}}"#);
        let config = MirrorConfig {
            docker_config: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            config.resolve_target_prefix(),
            Err(MirrorError::Config(_))
        ));
    }

    #[test]
    fn test_decode_basic_auth() {
        assert_eq!(
            decode_basic_auth("bWlycm9yYm90OnRva2Vu"),
            Some(("mirrorbot".to_string(), "token".to_string()))
        );
        assert_eq!(decode_basic_auth("not base64!"), None);
    }

    #[test]
    fn test_registry_host_normalization() {
        assert_eq!(registry_host("https://index.docker.io/v1/"), "index.docker.io");
        assert_eq!(registry_host("docker.io"), "index.docker.io");
        assert_eq!(registry_host("https://ghcr.io"), "ghcr.io");
        assert_eq!(registry_host("localhost:5000"), "localhost:5000");
    }
}
