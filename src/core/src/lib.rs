//! A3S Mirror Core - Foundational Types
//!
//! Error taxonomy, configuration, and logging setup shared by the
//! mirroring runtime and the controller.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::MirrorConfig;
pub use error::{MirrorError, Result};
pub use log::{init_tracing, LogFormat};

/// A3S Mirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
