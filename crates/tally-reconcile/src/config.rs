use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, ReconcileResult};
use crate::jitter::MAX_JITTER_PERCENT;

/// Reconciliation cadence and shutdown bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Spread of the requeue interval, in percent of the base (0-99).
    pub max_jitter_percent: u8,
    /// Base interval between re-checks of one report.
    pub requeue_interval_secs: u64,
    /// Concurrent workers per report kind.
    pub workers: usize,
    /// Upper bound on the shutdown handoff.
    pub handoff_grace_secs: u64,
    /// How long startup waits for a non-empty ring before going ahead.
    pub readiness_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_jitter_percent: 10,
            requeue_interval_secs: 300,
            workers: 1,
            handoff_grace_secs: 10,
            readiness_timeout_secs: 30,
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.max_jitter_percent > MAX_JITTER_PERCENT {
            return Err(ReconcileError::InvalidConfig(format!(
                "max_jitter_percent must be between 0 and {MAX_JITTER_PERCENT}, got {}",
                self.max_jitter_percent
            )));
        }
        if self.requeue_interval_secs == 0 {
            return Err(ReconcileError::InvalidConfig(
                "requeue_interval_secs must be positive".into(),
            ));
        }
        if self.workers == 0 {
            return Err(ReconcileError::InvalidConfig(
                "workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    pub fn handoff_grace(&self) -> Duration {
        Duration::from_secs(self.handoff_grace_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }
}
