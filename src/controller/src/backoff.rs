//! Per-object exponential requeue backoff.

use std::time::Duration;

use dashmap::DashMap;

use crate::store::ObjectId;

/// Backoff bounds for failed reconciliations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Cap on the delay.
    pub max: Duration,
}

impl RequeuePolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after `failures` consecutive failures (1 = first failure).
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

/// Consecutive failure counts per object.
///
/// Shared by all reconcile workers of a controller. Entries are dropped
/// as soon as an object reconciles cleanly or is found to be deleted.
#[derive(Debug, Default)]
pub struct BackoffTracker {
    policy: RequeuePolicy,
    failures: DashMap<ObjectId, u32>,
}

impl BackoffTracker {
    pub fn new(policy: RequeuePolicy) -> Self {
        Self {
            policy,
            failures: DashMap::new(),
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn record_failure(&self, id: &ObjectId) -> Duration {
        let mut failures = self.failures.entry(id.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        self.policy.delay(*failures)
    }

    /// Forget the failures of `id`.
    pub fn reset(&self, id: &ObjectId) {
        self.failures.remove(id);
    }

    /// Consecutive failures currently recorded for `id`.
    pub fn failures(&self, id: &ObjectId) -> u32 {
        self.failures.get(id).map_or(0, |f| *f)
    }
}
