//! Process wiring: configuration in, running controllers out.

use std::sync::Arc;
use std::time::Duration;

use a3s_mirror_core::MirrorConfig;
use a3s_mirror_runtime::{
    CloneOrchestrator, Cloner, DockerConfigKeychain, OciRegistryTransport, TargetPrefix,
};
use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::backoff::RequeuePolicy;
use crate::object::{DaemonSetManager, DeploymentManager};
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watch;

/// Build the clone orchestrator described by `config`.
pub fn orchestrator(config: &MirrorConfig) -> Result<CloneOrchestrator> {
    let raw = config
        .resolve_target_prefix()
        .context("unable to determine target repository")?;
    let prefix = TargetPrefix::normalize(&raw).context("invalid target repository")?;
    tracing::info!(prefix = %prefix, "Using target repository");

    let keychain = DockerConfigKeychain::new(config.docker_config_dir());
    let transport =
        OciRegistryTransport::with_insecure_registries(config.insecure_registries.clone());
    let cloner = Cloner::new(prefix, Arc::new(transport), Arc::new(keychain));

    let orchestrator = CloneOrchestrator::new(cloner);
    Ok(match config.max_concurrent_clones {
        Some(max) => orchestrator.with_max_concurrency(max),
        None => orchestrator,
    })
}

/// Run the Deployment and DaemonSet controllers until a shutdown signal.
pub async fn run(config: MirrorConfig) -> Result<()> {
    let orchestrator = orchestrator(&config)?;
    let client = Client::try_default()
        .await
        .context("unable to set up Kubernetes client")?;

    let excluded = config.excluded();
    tracing::info!(excluded = ?excluded, "Namespaces excluded from mirroring");
    let policy = RequeuePolicy::new(
        Duration::from_secs(config.requeue_base_secs),
        Duration::from_secs(config.requeue_max_secs),
    );

    let deployments = Arc::new(
        Reconciler::new(
            DeploymentManager,
            Arc::new(KubeStore::<Deployment>::new(client.clone())),
            orchestrator.clone(),
        )
        .with_excluded_namespaces(excluded.clone()),
    );
    let daemonsets = Arc::new(
        Reconciler::new(
            DaemonSetManager,
            Arc::new(KubeStore::<DaemonSet>::new(client.clone())),
            orchestrator,
        )
        .with_excluded_namespaces(excluded),
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown requested");
        trigger.cancel();
    });

    tokio::join!(
        watch::run(client.clone(), deployments, policy, shutdown.clone()),
        watch::run(client, daemonsets, policy, shutdown),
    );
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Unable to listen for SIGTERM"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Unable to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_orchestrator_from_explicit_prefix() {
        let config = MirrorConfig {
            target_prefix: Some("localhost:5000/icc/".to_string()),
            max_concurrent_clones: Some(2),
            ..Default::default()
        };
        let orchestrator = orchestrator(&config).unwrap();
        assert_eq!(orchestrator.cloner().prefix().as_str(), "localhost:5000/icc");
    }

    #[test]
    fn test_orchestrator_discovers_prefix_from_docker_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"auths":{"https://index.docker.io/v1/":{"username":"backup","password":"pw"}}}"#,
        )
        .unwrap();
        let config = MirrorConfig {
            docker_config: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let orchestrator = orchestrator(&config).unwrap();
        assert_eq!(
            orchestrator.cloner().prefix().as_str(),
            "index.docker.io/backup"
        );
    }

    #[test]
    fn test_orchestrator_without_prefix_fails() {
        let dir = TempDir::new().unwrap();
        let config = MirrorConfig {
            docker_config: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(orchestrator(&config).is_err());
    }
}
