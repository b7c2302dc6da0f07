//! Phase difference estimation from two edge timestamps.
//!
//! Each tick the estimator compares the latest rising-edge counts of the two
//! microphone channels:
//!
//! ```text
//! raw = |t_a - t_b|
//! raw >  max_valid_separation  -> discard, keep previous estimate
//! t_a == t_b                   -> tie, keep previous estimate
//! t_a >  t_b                   -> phase = +raw   (channel A edge is newer)
//! t_b >  t_a                   -> phase = -raw
//! ```
//!
//! The separation limit is the counter span of the largest physically
//! possible time-of-arrival difference between the two microphones. Anything
//! wider is an echo, a collision between unrelated edges or a counter wrap,
//! and is dropped without being reported.

use crossbeam_utils::CachePadded;
use static_assertions::assert_eq_size;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

// The shared phase must be a single lock-free word.
assert_eq_size!(AtomicI32, i32);

/// Signed phase difference shared from the tick context to the task context.
///
/// Written only by the tick context, read only by the task context. A single
/// atomic word, so readers never observe a torn value.
#[derive(Debug, Default)]
pub struct PhaseCell {
    value: CachePadded<AtomicI32>,
}

impl PhaseCell {
    /// Create a cell holding `initial`.
    #[must_use]
    pub fn new(initial: i32) -> Self {
        Self {
            value: CachePadded::new(AtomicI32::new(initial)),
        }
    }

    /// Latest committed phase difference.
    #[inline]
    #[must_use]
    pub fn load(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    /// Publish a new phase difference. Tick context only.
    #[inline]
    pub fn store(&self, phase: i32) {
        self.value.store(phase, Ordering::Release);
    }
}

/// What the estimator did with one timestamp pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// A phase difference was committed.
    Committed(i32),
    /// Both edges carried the same count; the estimate is unchanged.
    Tie,
    /// Separation above the plausibility limit; the estimate is unchanged.
    Discarded {
        /// The rejected separation in capture counts.
        separation: u32,
    },
}

/// Relaxed counters describing estimator activity.
#[derive(Debug, Default)]
pub struct EstimatorStats {
    committed: AtomicU64,
    ties: AtomicU64,
    discarded: AtomicU64,
    capture_errors: AtomicU64,
}

/// Point-in-time copy of [`EstimatorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EstimatorSnapshot {
    /// Samples that produced a committed phase.
    pub committed: u64,
    /// Samples with equal timestamps.
    pub ties: u64,
    /// Samples rejected by the plausibility filter.
    pub discarded: u64,
    /// Ticks where the capture unit could not be read.
    pub capture_errors: u64,
}

impl EstimatorStats {
    /// Count one sample outcome.
    #[inline]
    pub fn record(&self, outcome: SampleOutcome) {
        let counter = match outcome {
            SampleOutcome::Committed(_) => &self.committed,
            SampleOutcome::Tie => &self.ties,
            SampleOutcome::Discarded { .. } => &self.discarded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed capture read.
    #[inline]
    pub fn record_capture_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> EstimatorSnapshot {
        EstimatorSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            ties: self.ties.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
        }
    }
}

/// Stateless phase estimator with a plausibility filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseEstimator {
    max_valid_separation: u32,
}

impl PhaseEstimator {
    /// Create an estimator accepting separations up to `max_valid_separation`.
    ///
    /// The limit is capped at `i32::MAX` so every accepted magnitude fits the
    /// signed phase.
    #[must_use]
    pub fn new(max_valid_separation: u32) -> Self {
        Self {
            max_valid_separation: max_valid_separation.min(i32::MAX.unsigned_abs()),
        }
    }

    /// Largest accepted separation.
    #[must_use]
    pub fn max_valid_separation(&self) -> u32 {
        self.max_valid_separation
    }

    /// Classify a timestamp pair without touching shared state.
    #[inline]
    #[must_use]
    pub fn classify(&self, t_a: u32, t_b: u32) -> SampleOutcome {
        let raw = t_a.abs_diff(t_b);
        if raw > self.max_valid_separation {
            return SampleOutcome::Discarded { separation: raw };
        }
        // raw <= i32::MAX here
        let magnitude = i32::try_from(raw).unwrap_or(i32::MAX);
        match t_a.cmp(&t_b) {
            std::cmp::Ordering::Greater => SampleOutcome::Committed(magnitude),
            std::cmp::Ordering::Less => SampleOutcome::Committed(-magnitude),
            std::cmp::Ordering::Equal => SampleOutcome::Tie,
        }
    }

    /// Classify a pair and commit the phase if it is valid.
    #[inline]
    pub fn update(
        &self,
        t_a: u32,
        t_b: u32,
        phase: &PhaseCell,
        stats: &EstimatorStats,
    ) -> SampleOutcome {
        let outcome = self.classify(t_a, t_b);
        if let SampleOutcome::Committed(value) = outcome {
            phase.store(value);
        }
        stats.record(outcome);
        outcome
    }
}
