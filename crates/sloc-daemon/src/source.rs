//! Synthetic sound source for the simulated capture unit.
//!
//! Emulates a source sweeping from one side to the other and back: every
//! millisecond a fresh edge pair is latched whose signed separation follows
//! a triangle wave between `+amplitude` and `-amplitude`. The base count is
//! a free-running counter that wraps like the real capture timer.

use sloc_hal::SimulatedCapture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Capture counts per millisecond at a 100 MHz capture clock.
const COUNTS_PER_MS: u32 = 100_000;

/// Triangle-sweep edge generator.
#[derive(Debug)]
pub struct SweepSource {
    amplitude: u32,
    period_ms: u64,
    halted: AtomicBool,
}

impl SweepSource {
    /// Create a source sweeping `±amplitude` counts over `period`.
    pub fn new(amplitude: u32, period: Duration) -> Self {
        Self {
            amplitude,
            period_ms: u64::try_from(period.as_millis()).unwrap_or(u64::MAX).max(2),
            halted: AtomicBool::new(false),
        }
    }

    /// Signed separation at `elapsed_ms` into the sweep.
    pub fn separation_at(&self, elapsed_ms: u64) -> i64 {
        let period = i64::try_from(self.period_ms).unwrap_or(i64::MAX);
        let pos = i64::try_from(elapsed_ms % self.period_ms).unwrap_or(0);
        let distance = (2 * pos - period).abs();
        i64::from(self.amplitude) * (2 * distance - period) / period
    }

    /// Edge pair for a given base count and separation.
    ///
    /// A positive separation makes channel A the newer edge. Near the top of
    /// the counter the newer edge wraps, exactly as the hardware would.
    pub fn edges(base: u32, separation: i64) -> (u32, u32) {
        let offset = u32::try_from(separation.unsigned_abs()).unwrap_or(u32::MAX);
        if separation >= 0 {
            (base.wrapping_add(offset), base)
        } else {
            (base, base.wrapping_add(offset))
        }
    }

    /// Ask [`SweepSource::run`] to return.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Latch a new pair every millisecond until halted.
    pub fn run(&self, capture: &SimulatedCapture) {
        info!(
            amplitude = self.amplitude,
            period_ms = self.period_ms,
            "Synthetic source started"
        );

        let start = Instant::now();
        let mut base = 0u32;
        let mut pairs = 0u64;
        while !self.halted.load(Ordering::Acquire) {
            let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            let (t_a, t_b) = Self::edges(base, self.separation_at(elapsed_ms));
            capture.latch_pair(t_a, t_b);

            base = base.wrapping_add(COUNTS_PER_MS);
            pairs += 1;
            std::thread::sleep(Duration::from_millis(1));
        }

        debug!(pairs, "Synthetic source halted");
    }
}
