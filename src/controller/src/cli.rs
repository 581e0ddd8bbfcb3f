//! Command-line arguments of the `a3s-mirror` binary.

use std::path::PathBuf;

use a3s_mirror_core::error::Result;
use a3s_mirror_core::{LogFormat, MirrorConfig};
use clap::Parser;

/// Mirror workload images under a target repository prefix.
#[derive(Parser, Debug, Default)]
#[command(name = "a3s-mirror", version, about)]
pub struct Cli {
    /// YAML configuration file
    #[arg(long, env = "A3S_MIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Repository prefix mirrored images are written under
    #[arg(long, env = "A3S_MIRROR_TARGET_PREFIX")]
    pub target_prefix: Option<String>,

    /// Namespace the controller runs in (never reconciled)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Upper bound on concurrent clones per reconciliation
    #[arg(long)]
    pub max_concurrent_clones: Option<usize>,

    /// Log output format (text, json)
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Load the configuration file (if any) and apply the flags on top.
    pub fn load_config(&self) -> Result<MirrorConfig> {
        let config = match &self.config {
            Some(path) => MirrorConfig::load(path)?,
            None => MirrorConfig::default(),
        };
        self.apply(config)
    }

    /// Override `config` with the flags that were given.
    pub fn apply(&self, mut config: MirrorConfig) -> Result<MirrorConfig> {
        if let Some(prefix) = &self.target_prefix {
            config.target_prefix = Some(prefix.clone());
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(max) = self.max_concurrent_clones {
            config.max_concurrent_clones = Some(max);
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config.validate()?;
        Ok(config)
    }
}
