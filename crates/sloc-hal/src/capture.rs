//! Simulated two-channel edge capture unit.
//!
//! Each channel is a single 32-bit register that an external producer (a
//! test, or the daemon's synthetic sound source) overwrites whenever it
//! "sees" a rising edge. Registers are independent atomics, so the tick
//! context may observe channel A from one edge pair and channel B from the
//! next, exactly like the free-running hardware registers.

use crate::{Channel, EdgeCapture};
use crossbeam_utils::CachePadded;
use sloc_common::{SlocError, SlocResult};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// In-memory capture unit with atomic per-channel edge registers.
#[derive(Debug, Default)]
pub struct SimulatedCapture {
    initialized: bool,
    edges: [CachePadded<AtomicU32>; 2],
}

impl SimulatedCapture {
    /// Create an uninitialized capture unit with both registers at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a rising edge on `channel` at counter value `count`.
    pub fn latch_edge(&self, channel: Channel, count: u32) {
        self.edges[channel.index()].store(count, Ordering::Release);
    }

    /// Latch both channels, A first.
    pub fn latch_pair(&self, count_a: u32, count_b: u32) {
        self.latch_edge(Channel::A, count_a);
        self.latch_edge(Channel::B, count_b);
    }
}

impl EdgeCapture for SimulatedCapture {
    fn init(&mut self) -> SlocResult<()> {
        self.initialized = true;
        debug!("Simulated capture unit initialized");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.initialized
    }

    #[inline]
    fn latest_edge(&self, channel: Channel) -> SlocResult<u32> {
        if !self.initialized {
            return Err(SlocError::DeviceNotReady { device: "capture" });
        }
        Ok(self.edges[channel.index()].load(Ordering::Acquire))
    }
}
