//! The periodic tick context.
//!
//! On the reference board a fixed-interval timer raises an interrupt at the
//! reference rate (40 kHz by default). The handler does three bounded things
//! per invocation:
//! 1. Snapshot both channels' latest edge timestamps
//! 2. Toggle the heartbeat and advance the millisecond time base
//! 3. Feed the timestamp pair to the phase estimator
//!
//! [`TickHandler`] is that interrupt body. [`TickDriver`] emulates the timer
//! on a hosted OS: a dedicated thread that invokes the handler on an
//! absolute deadline chain, using `clock_nanosleep` on Linux. When a
//! real-time priority is configured the thread switches itself to
//! `SCHED_FIFO` first, so the task context cannot preempt it.

use crate::context::ControlContext;
use crate::phase::{PhaseEstimator, SampleOutcome};
use sloc_common::config::TimingConfig;
use sloc_common::error::{SlocError, SlocResult};
use sloc_common::metrics::TickMetrics;
use sloc_hal::EdgeCapture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interrupt body: time base plus phase estimator.
pub struct TickHandler<'a, C: EdgeCapture + ?Sized> {
    ctx: &'a ControlContext,
    capture: &'a C,
    estimator: PhaseEstimator,
}

impl<'a, C: EdgeCapture + ?Sized> TickHandler<'a, C> {
    /// Bind the handler to a context and an initialized capture unit.
    ///
    /// # Errors
    ///
    /// [`SlocError::DeviceNotReady`] if the capture unit has not been set up.
    pub fn new(
        ctx: &'a ControlContext,
        capture: &'a C,
        estimator: PhaseEstimator,
    ) -> SlocResult<Self> {
        if !capture.is_ready() {
            return Err(SlocError::DeviceNotReady { device: "capture" });
        }
        Ok(Self {
            ctx,
            capture,
            estimator,
        })
    }

    /// The estimator this handler feeds.
    #[must_use]
    pub fn estimator(&self) -> &PhaseEstimator {
        &self.estimator
    }

    /// Run one tick.
    ///
    /// Never blocks. Returns `None` if the capture unit could not be read,
    /// in which case the time base still advances.
    #[inline]
    pub fn on_interrupt(&self) -> Option<SampleOutcome> {
        let edges = self.capture.latest_edges();

        self.ctx.time_base.toggle_heartbeat();
        self.ctx.time_base.on_tick();

        match edges {
            Ok((t_a, t_b)) => Some(
                self.estimator
                    .update(t_a, t_b, &self.ctx.phase, &self.ctx.stats),
            ),
            Err(_) => {
                self.ctx.stats.record_capture_error();
                None
            }
        }
    }
}

/// Emulated fixed-interval timer driving a [`TickHandler`].
#[derive(Debug)]
pub struct TickDriver {
    period: Duration,
    rt_priority: Option<u8>,
    halted: AtomicBool,
}

impl TickDriver {
    /// Create a driver firing at the configured reference rate and priority.
    #[must_use]
    pub fn new(timing: &TimingConfig) -> Self {
        Self::with_period(timing.tick_period()).with_rt_priority(timing.rt_priority)
    }

    /// Create a driver with an explicit tick period and default scheduling.
    #[must_use]
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            rt_priority: None,
            halted: AtomicBool::new(false),
        }
    }

    /// Request a `SCHED_FIFO` priority for the thread that calls
    /// [`TickDriver::run`].
    #[must_use]
    pub fn with_rt_priority(mut self, priority: Option<u8>) -> Self {
        self.rt_priority = priority;
        self
    }

    /// Requested real-time priority.
    #[must_use]
    pub fn rt_priority(&self) -> Option<u8> {
        self.rt_priority
    }

    /// Tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ask [`TickDriver::run`] to return after the current tick.
    ///
    /// The controller itself never stops ticks; this exists for bounded runs.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Whether [`TickDriver::halt`] has been called.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Invoke `handler` once per period until halted.
    ///
    /// Blocks the calling thread; run it on a dedicated (scoped) thread. A
    /// late wake-up runs the handler immediately and keeps the absolute
    /// deadline chain, so the time base catches up instead of drifting.
    pub fn run<C: EdgeCapture + ?Sized>(&self, handler: &TickHandler<'_, C>) -> TickMetrics {
        let mut metrics = TickMetrics::new(self.period);

        if let Err(e) = set_rt_priority(self.rt_priority) {
            warn!(error = %e, "Tick thread left at default priority");
        }

        info!(
            period_ns = self.period.as_nanos(),
            "Tick driver started"
        );

        let mut deadline = Instant::now() + self.period;
        while !self.is_halted() {
            if wait_until(deadline) {
                metrics.record_late();
            }

            let start = Instant::now();
            handler.on_interrupt();
            metrics.record(start.elapsed());

            deadline += self.period;
        }

        debug!(
            ticks = metrics.total_ticks(),
            overruns = metrics.overrun_count(),
            late = metrics.late_count(),
            "Tick driver halted"
        );
        metrics
    }
}

/// Result of a real-time priority request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityOutcome {
    /// No priority configured; the thread keeps the default policy.
    NotRequested,
    /// The calling thread now runs under `SCHED_FIFO` at this priority.
    Applied(u8),
    /// The OS refused (no `CAP_SYS_NICE`); running at default priority.
    Denied,
}

/// Switch the calling thread to `SCHED_FIFO` at `priority` (clamped to 1-99).
///
/// A permission error is logged and reported as [`PriorityOutcome::Denied`]
/// rather than failing, so unprivileged runs still work.
///
/// # Errors
///
/// [`SlocError::Config`] if the scheduler call fails for any other reason.
#[cfg(target_os = "linux")]
pub fn set_rt_priority(priority: Option<u8>) -> SlocResult<PriorityOutcome> {
    let Some(priority) = priority else {
        return Ok(PriorityOutcome::NotRequested);
    };

    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(
            original = priority,
            clamped, "Tick thread priority clamped to valid range"
        );
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };

    // SAFETY: sched_setscheduler is safe with a valid sched_param; pid 0 is
    // the calling thread
    let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };

    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!(
                priority = clamped,
                "sched_setscheduler failed with EPERM - tick thread runs without RT \
                 privileges. Consider running with CAP_SYS_NICE or as root."
            );
            return Ok(PriorityOutcome::Denied);
        }
        return Err(SlocError::Config(format!("sched_setscheduler failed: {err}")));
    }

    info!(priority = clamped, "Tick thread running under SCHED_FIFO");
    Ok(PriorityOutcome::Applied(clamped))
}

/// Real-time priorities are only supported on Linux.
///
/// # Errors
///
/// Never fails; a requested priority is reported as denied.
#[cfg(not(target_os = "linux"))]
pub fn set_rt_priority(priority: Option<u8>) -> SlocResult<PriorityOutcome> {
    if priority.is_none() {
        return Ok(PriorityOutcome::NotRequested);
    }
    warn!("Real-time priority not supported on this platform");
    Ok(PriorityOutcome::Denied)
}

/// Sleep until `deadline`. Returns true if it had already passed.
#[cfg(target_os = "linux")]
fn wait_until(deadline: Instant) -> bool {
    let now = Instant::now();
    if deadline <= now {
        return true;
    }

    let duration = deadline - now;

    // Relative sleep: Instant does not map onto a timespec directly
    let ts = libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };

    // SAFETY: clock_nanosleep is safe with a valid timespec and a null remainder
    unsafe {
        libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &ts, std::ptr::null_mut());
    }
    false
}

#[cfg(not(target_os = "linux"))]
fn wait_until(deadline: Instant) -> bool {
    let now = Instant::now();
    if deadline <= now {
        return true;
    }
    std::thread::sleep(deadline - now);
    false
}
