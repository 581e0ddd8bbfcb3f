//! Image cloning: one image at a time, or a whole set concurrently.

mod cloner;
mod orchestrator;

pub use cloner::{CloneOutcome, Cloner};
pub use orchestrator::{CloneOrchestrator, ImageMapping};
