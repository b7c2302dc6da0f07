//! State shared between the tick context and the task context.

use crate::phase::{EstimatorStats, PhaseCell};
use crate::timebase::TimeBase;
use sloc_common::ControllerConfig;

/// Everything the two execution contexts share.
///
/// Owned by the top-level loop and lent by reference to the tick handler and
/// the actuation controller. The tick context is the only writer of every
/// field; the task context only reads.
#[derive(Debug)]
pub struct ControlContext {
    /// Millisecond time base and heartbeat.
    pub time_base: TimeBase,
    /// Latest accepted phase difference.
    pub phase: PhaseCell,
    /// Estimator sample counters.
    pub stats: EstimatorStats,
}

impl ControlContext {
    /// Create a context with a zero phase and a zero millisecond counter.
    #[must_use]
    pub fn new(ticks_per_ms: u32) -> Self {
        Self {
            time_base: TimeBase::new(ticks_per_ms),
            phase: PhaseCell::new(0),
            stats: EstimatorStats::default(),
        }
    }

    /// Create a context from the timing section of a configuration.
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.timing.ticks_per_ms)
    }
}
