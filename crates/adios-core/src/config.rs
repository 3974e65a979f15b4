//! Scheduler configuration and defaults.

use crate::error::{Error, Result};
use crate::optype::OP_TYPES;
use std::time::Duration;

/// Default predicted-latency budget for one batch refill, in nanoseconds.
pub const DEFAULT_LATENCY_WINDOW: u64 = 16_000_000;

/// Default percentage of the latency window below which the inactive
/// batch page is refilled.
pub const DEFAULT_REFILL_BELOW_RATIO: u32 = 15;

/// Default per-operation latency targets in nanoseconds
/// (read, write, discard, other).
pub const DEFAULT_LATENCY_TARGET: [u64; OP_TYPES] =
    [2_000_000, 750_000_000, 5_000_000_000, 0];

/// Default per-operation batch limits (read, write, discard, other).
pub const DEFAULT_BATCH_LIMIT: [u32; OP_TYPES] = [16, 8, 1, 1];

/// Default minimum interval between latency-model recomputations.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(1500);

/// Default delay before a completion-armed model recomputation fires.
pub const DEFAULT_UPDATE_DELAY: Duration = Duration::from_millis(100);

/// Tunable scheduler parameters.
///
/// The deadline of a request is `submit_time + latency_target[op] +
/// predicted_latency`; the batch dispatcher never stages more than
/// `batch_limit[op]` requests of one class per page, nor more summed
/// predicted latency than `latency_window` in total.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Per-operation deadline slack added on top of the predicted latency, ns.
    pub latency_target: [u64; OP_TYPES],
    /// Per-operation cap on requests staged into one batch page.
    pub batch_limit: [u32; OP_TYPES],
    /// Predicted-latency budget for one refill, ns.
    pub latency_window: u64,
    /// Refill the inactive page when outstanding predicted latency drops
    /// below `latency_window * refill_below_ratio / 100`.
    pub refill_below_ratio: u32,
    /// Minimum interval between periodic model recomputations.
    pub update_interval: Duration,
    /// Delay before a completion-armed model recomputation fires.
    pub update_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            latency_target: DEFAULT_LATENCY_TARGET,
            batch_limit: DEFAULT_BATCH_LIMIT,
            latency_window: DEFAULT_LATENCY_WINDOW,
            refill_below_ratio: DEFAULT_REFILL_BELOW_RATIO,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            update_delay: DEFAULT_UPDATE_DELAY,
        }
    }
}

impl SchedulerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any batch limit is zero or the
    /// refill ratio exceeds 100.
    pub fn validate(&self) -> Result<()> {
        if self.batch_limit.iter().any(|&limit| limit == 0) {
            return Err(Error::InvalidConfig("batch limits must be > 0".to_string()));
        }
        if self.refill_below_ratio > 100 {
            return Err(Error::InvalidConfig(
                "refill_below_ratio must be within 0..=100".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optype::OpType;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.latency_window, 16_000_000);
        assert_eq!(config.refill_below_ratio, 15);
        assert_eq!(config.latency_target[OpType::Read.index()], 2_000_000);
        assert_eq!(config.latency_target[OpType::Write.index()], 750_000_000);
        assert_eq!(config.latency_target[OpType::Discard.index()], 5_000_000_000);
        assert_eq!(config.latency_target[OpType::Other.index()], 0);
        assert_eq!(config.batch_limit, [16, 8, 1, 1]);
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_batch_limit() {
        let mut config = SchedulerConfig::default();
        config.batch_limit[OpType::Discard.index()] = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ratio_out_of_range() {
        let mut config = SchedulerConfig::default();
        config.refill_below_ratio = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ratio_boundary() {
        let mut config = SchedulerConfig::default();
        config.refill_below_ratio = 100;
        assert!(config.validate().is_ok());
        config.refill_below_ratio = 0;
        assert!(config.validate().is_ok());
    }
}
