//! Tick handler timing metrics.
//!
//! The tick handler has a hard deadline of one tick period. These metrics
//! track how much of that budget each invocation used without allocating on
//! the hot path.

use std::time::Duration;

/// Execution-time statistics for the tick handler.
#[derive(Debug, Clone)]
pub struct TickMetrics {
    /// Total handler invocations recorded.
    total_ticks: u64,
    /// Minimum observed handler time in nanoseconds.
    min_ns: u64,
    /// Maximum observed handler time in nanoseconds.
    max_ns: u64,
    /// Sum of all handler times for mean calculation.
    sum_ns: u64,
    /// Invocations that took longer than one tick period.
    overrun_count: u64,
    /// Wake-ups that happened after the tick deadline had already passed.
    late_count: u64,
    /// Tick period in nanoseconds.
    deadline_ns: u64,
}

impl TickMetrics {
    /// Create a collector for a handler with the given tick period.
    #[must_use]
    pub fn new(tick_period: Duration) -> Self {
        Self {
            total_ticks: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overrun_count: 0,
            late_count: 0,
            deadline_ns: u64::try_from(tick_period.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Record one handler execution time in nanoseconds.
    pub fn record_ns(&mut self, ns: u64) {
        self.total_ticks += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        if ns > self.deadline_ns {
            self.overrun_count += 1;
        }
    }

    /// Record one handler execution time.
    pub fn record(&mut self, duration: Duration) {
        self.record_ns(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Record a wake-up that arrived after its deadline.
    pub fn record_late(&mut self) {
        self.late_count += 1;
    }

    /// Total handler invocations.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Minimum observed handler time.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_ticks > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Maximum observed handler time.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_ticks > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean handler time.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_ticks > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_ticks))
    }

    /// Handler invocations that exceeded the tick period.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Wake-ups that missed their deadline.
    #[must_use]
    pub fn late_count(&self) -> u64 {
        self.late_count
    }
}
