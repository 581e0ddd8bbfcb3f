//! A3S Mirror controller entry point.

use anyhow::Result;
use clap::Parser;

use a3s_mirror_controller::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    a3s_mirror_core::init_tracing(config.log_format, "info");
    tracing::info!(version = a3s_mirror_controller::VERSION, "Starting A3S Mirror");

    a3s_mirror_controller::app::run(config).await
}
