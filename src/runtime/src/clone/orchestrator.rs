//! Concurrent cloning of a set of images.
//!
//! One task per image, all sharing a cancellation token derived from the
//! caller's. The first hard failure cancels the remaining tasks and is
//! returned on its own; partial results are discarded.

use std::collections::HashMap;
use std::sync::Arc;

use a3s_mirror_core::error::{MirrorError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::cloner::{CloneOutcome, Cloner};

/// Original image string → mirrored image string, for images cloned in one pass.
pub type ImageMapping = HashMap<String, String>;

/// Fans images out to concurrent [`Cloner`] invocations.
#[derive(Debug, Clone)]
pub struct CloneOrchestrator {
    cloner: Cloner,
    /// Caps in-flight clones within one `clone_all` call when set.
    max_concurrency: Option<usize>,
}

impl CloneOrchestrator {
    /// Create an orchestrator with one concurrent task per image.
    pub fn new(cloner: Cloner) -> Self {
        Self {
            cloner,
            max_concurrency: None,
        }
    }

    /// Allow at most `max` clones in flight per [`clone_all`](Self::clone_all) call.
    ///
    /// Concurrent calls do not share permits.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    /// The underlying cloner.
    pub fn cloner(&self) -> &Cloner {
        &self.cloner
    }

    /// Clone every image in `images` concurrently.
    ///
    /// `images` is expected to be free of duplicates. On success the mapping
    /// has an entry for every image that was not already mirrored, and none
    /// for those that were. On failure no mapping is returned at all.
    pub async fn clone_all(
        &self,
        images: &[String],
        cancel: &CancellationToken,
    ) -> Result<ImageMapping> {
        let token = cancel.child_token();
        let limit = self.max_concurrency.map(|max| Arc::new(Semaphore::new(max)));
        let mut tasks = JoinSet::new();

        for image in images {
            let image = image.clone();
            let cloner = self.cloner.clone();
            let limit = limit.clone();
            let token = token.clone();

            tasks.spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => {
                        let acquired = tokio::select! {
                            biased;
                            _ = token.cancelled() => None,
                            permit = semaphore.acquire_owned() => permit.ok(),
                        };
                        match acquired {
                            Some(permit) => Some(permit),
                            None => {
                                let err = MirrorError::Cancelled(format!("clone of {}", image));
                                return (image, Err(err));
                            }
                        }
                    }
                    None => None,
                };
                let outcome = cloner.clone_image(&image, &token).await;
                (image, outcome)
            });
        }

        let mut mapping = ImageMapping::with_capacity(images.len());
        while let Some(joined) = tasks.join_next().await {
            let (image, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    token.cancel();
                    return Err(MirrorError::Other(format!("clone task failed: {}", e)));
                }
            };

            match outcome {
                Ok(CloneOutcome::Cloned { target }) => {
                    mapping.insert(image, target);
                }
                Ok(CloneOutcome::AlreadyCloned) => {}
                Err(e) => {
                    tracing::debug!(image = %image, error = %e, "Cancelling sibling clones");
                    token.cancel();
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(mapping)
    }
}
