//! Millisecond time base driven by the reference tick.
//!
//! The tick context calls [`TimeBase::on_tick`] once per reference tick; every
//! `ticks_per_ms` ticks the millisecond counter advances by one. The task
//! context only reads the counter, through [`TimeBase::now_ms`] and the
//! busy-waiting [`TimeBase::delay_ms`].
//!
//! Single writer, single reader: no lock is taken. A reader may see a value
//! that is one tick stale.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Monotonic millisecond counter with a sub-millisecond tick accumulator.
#[derive(Debug)]
pub struct TimeBase {
    ticks_per_ms: u32,
    /// Ticks since the last millisecond boundary. Tick context only.
    sub_ms: AtomicU32,
    /// Milliseconds since startup, wrapping at 32 bits.
    millis: CachePadded<AtomicU32>,
    /// Toggled on every tick; a cheap "interrupt is alive" indicator.
    heartbeat: AtomicBool,
}

impl TimeBase {
    /// Create a time base that advances once every `ticks_per_ms` ticks.
    ///
    /// A threshold of zero is treated as one.
    #[must_use]
    pub fn new(ticks_per_ms: u32) -> Self {
        Self {
            ticks_per_ms: ticks_per_ms.max(1),
            sub_ms: AtomicU32::new(0),
            millis: CachePadded::new(AtomicU32::new(0)),
            heartbeat: AtomicBool::new(false),
        }
    }

    /// Configured ticks per millisecond.
    #[must_use]
    pub fn ticks_per_ms(&self) -> u32 {
        self.ticks_per_ms
    }

    /// Advance by one reference tick. Tick context only.
    #[inline]
    pub fn on_tick(&self) {
        let acc = self.sub_ms.load(Ordering::Relaxed) + 1;
        if acc >= self.ticks_per_ms {
            self.sub_ms.store(0, Ordering::Relaxed);
            self.millis.fetch_add(1, Ordering::Release);
        } else {
            self.sub_ms.store(acc, Ordering::Relaxed);
        }
    }

    /// Flip the heartbeat bit. Tick context only.
    #[inline]
    pub fn toggle_heartbeat(&self) {
        self.heartbeat.fetch_xor(true, Ordering::Relaxed);
    }

    /// Current heartbeat level.
    #[must_use]
    pub fn heartbeat(&self) -> bool {
        self.heartbeat.load(Ordering::Relaxed)
    }

    /// Milliseconds elapsed since startup (wrapping).
    #[inline]
    #[must_use]
    pub fn now_ms(&self) -> u32 {
        self.millis.load(Ordering::Acquire)
    }

    /// Busy-wait until the counter has advanced by `ms` milliseconds.
    ///
    /// Does not sleep or yield. Progress depends entirely on the tick
    /// context: if ticks stop, this never returns. Elapsed time is computed
    /// with wrapping subtraction, so a counter wrap during the wait is
    /// harmless.
    pub fn delay_ms(&self, ms: u32) {
        if ms == 0 {
            return;
        }
        let start = self.now_ms();
        while self.now_ms().wrapping_sub(start) < ms {
            std::hint::spin_loop();
        }
    }

    #[cfg(test)]
    pub(crate) fn set_now_ms(&self, ms: u32) {
        self.millis.store(ms, Ordering::Release);
    }
}
