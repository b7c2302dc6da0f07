//! Time base acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - The millisecond counter equals floor(ticks / ticks_per_ms)
//! - `delay_ms(n)` returns only after n milliseconds of ticks
//! - The tick driver paces the handler close to the configured rate

use super::common::{handler, ready_capture, TICKS_PER_MS};
use sloc_common::config::TimingConfig;
use sloc_runtime::{ControlContext, TickDriver};
use std::time::{Duration, Instant};

#[test]
fn test_counter_follows_tick_count() {
    let ctx = ControlContext::new(TICKS_PER_MS);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);

    for n in 1..=(TICKS_PER_MS * 5 + 7) {
        handler.on_interrupt();
        assert_eq!(ctx.time_base.now_ms(), n / TICKS_PER_MS);
    }
}

#[test]
fn test_delay_spans_requested_ticks() {
    let ctx = ControlContext::new(TICKS_PER_MS);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);
    let driver = TickDriver::new(&TimingConfig::default());
    assert_eq!(driver.period(), Duration::from_micros(25));

    let (before, after) = std::thread::scope(|s| {
        let ticker = s.spawn(|| driver.run(&handler));
        let before = ctx.time_base.now_ms();
        ctx.time_base.delay_ms(10);
        let after = ctx.time_base.now_ms();
        driver.halt();
        ticker.join().expect("tick thread");
        (before, after)
    });

    assert!(after.wrapping_sub(before) >= 10);
}

#[test]
fn test_driver_pacing() {
    let ctx = ControlContext::new(1);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);
    let driver = TickDriver::with_period(Duration::from_millis(1));

    let start = Instant::now();
    let metrics = std::thread::scope(|s| {
        let ticker = s.spawn(|| driver.run(&handler));
        ctx.time_base.delay_ms(30);
        driver.halt();
        ticker.join().expect("tick thread")
    });

    // 30 ticks at 1 ms cannot complete in less than ~30 ms
    assert!(start.elapsed() >= Duration::from_millis(29));
    assert!(metrics.total_ticks() >= 30);
    assert!(metrics.max().is_some());
}
