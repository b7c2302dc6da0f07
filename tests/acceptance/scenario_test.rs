//! Reference scenarios: edge pairs in, servo commands out.
//!
//! # Acceptance Criteria
//!
//! - A valid pair commits a signed phase and issues exactly one command
//! - Implausible separations leave both phase and servo untouched
//! - Re-latching the same pair never re-issues a command
//! - Both ends of the valid range drive the servo to the band edges

use super::common::{handler, instant_servo, ready_capture, ready_pwm, tick_n, TICKS_PER_MS};
use sloc_hal::{Actuator, ActuatorCommand, TimerPwm};
use sloc_runtime::{ActuationController, ControlContext, StepOutcome, TickDriver};
use std::time::Duration;

fn armed(ctx: &ControlContext) -> ActuationController<'_, TimerPwm> {
    ActuationController::arm(ctx, ready_pwm(), &instant_servo()).expect("arm")
}

#[test]
fn test_reference_pair_issues_one_command() {
    let ctx = ControlContext::new(TICKS_PER_MS);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);
    let mut controller = armed(&ctx);

    capture.latch_pair(12_000, 9_000);
    tick_n(&handler, 1);
    assert_eq!(ctx.phase.load(), 3_000);

    // 7 + 3000 * 4 / 25000 truncates to 7
    assert_eq!(
        controller.step(),
        StepOutcome::Applied(ActuatorCommand::new(50, 7))
    );
    assert_eq!(controller.step(), StepOutcome::Unchanged);
    assert_eq!(controller.stats().issued, 1);
    assert_eq!(
        controller.actuator().waveform().unwrap(),
        ActuatorCommand::new(50, 7)
    );
}

#[test]
fn test_implausible_pair_is_ignored() {
    let ctx = ControlContext::new(TICKS_PER_MS);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);
    let mut controller = armed(&ctx);

    capture.latch_pair(12_000, 9_000);
    tick_n(&handler, 1);
    controller.step();

    capture.latch_pair(9_000, 40_000);
    tick_n(&handler, TICKS_PER_MS);
    assert_eq!(ctx.phase.load(), 3_000);
    assert_eq!(controller.step(), StepOutcome::Unchanged);
    assert_eq!(controller.stats().issued, 1);
    assert_eq!(ctx.stats.snapshot().discarded, u64::from(TICKS_PER_MS));
}

#[test]
fn test_repeated_pair_issues_once() {
    let ctx = ControlContext::new(TICKS_PER_MS);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);
    let mut controller = armed(&ctx);

    capture.latch_pair(9_000, 15_250);
    let mut applied = 0;
    for _ in 0..100 {
        handler.on_interrupt();
        if matches!(controller.step(), StepOutcome::Applied(_)) {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(ctx.phase.load(), -6_250);
    assert_eq!(
        controller.state().last_applied,
        ActuatorCommand::new(50, 6)
    );
    // Arm plus one re-arm
    assert_eq!(controller.actuator().restarts(), 2);
}

#[test]
fn test_range_edges_hit_band_edges() {
    let ctx = ControlContext::new(TICKS_PER_MS);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);
    let mut controller = armed(&ctx);

    capture.latch_pair(25_000, 0);
    tick_n(&handler, 1);
    assert_eq!(
        controller.step(),
        StepOutcome::Applied(ActuatorCommand::new(50, 11))
    );

    capture.latch_pair(0, 25_000);
    tick_n(&handler, 1);
    assert_eq!(
        controller.step(),
        StepOutcome::Applied(ActuatorCommand::new(50, 3))
    );

    capture.latch_pair(0, 25_001);
    tick_n(&handler, 1);
    assert_eq!(ctx.phase.load(), -25_000);
    assert_eq!(controller.step(), StepOutcome::Unchanged);
}

#[test]
fn test_tie_keeps_servo_position() {
    let ctx = ControlContext::new(TICKS_PER_MS);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);
    let mut controller = armed(&ctx);

    capture.latch_pair(40_000, 21_250);
    tick_n(&handler, 1);
    controller.step();

    capture.latch_pair(50_000, 50_000);
    tick_n(&handler, 1);
    assert_eq!(ctx.phase.load(), 18_750);
    assert_eq!(controller.step(), StepOutcome::Unchanged);
    assert_eq!(
        controller.actuator().waveform().unwrap(),
        ActuatorCommand::new(50, 10)
    );
}

#[test]
fn test_end_to_end_with_tick_thread() {
    let ctx = ControlContext::new(TICKS_PER_MS);
    let capture = ready_capture();
    let handler = handler(&ctx, &capture);
    let driver = TickDriver::with_period(Duration::from_micros(25));
    let servo = sloc_common::config::ServoConfig {
        settle_delay: Duration::from_millis(5),
        startup_delay: Duration::from_millis(2),
        ..sloc_common::config::ServoConfig::default()
    };

    let (issued, elapsed_ms) = std::thread::scope(|s| {
        let ticker = s.spawn(|| driver.run(&handler));

        let mut controller =
            ActuationController::arm(&ctx, ready_pwm(), &servo).expect("arm");
        let armed_at = ctx.time_base.now_ms();
        assert!(armed_at >= 2);

        capture.latch_pair(12_000, 9_000);
        controller.run_until(|outcome| matches!(outcome, StepOutcome::Applied(_)));
        let elapsed = ctx.time_base.now_ms().wrapping_sub(armed_at);

        driver.halt();
        let metrics = ticker.join().expect("tick thread");
        assert!(metrics.total_ticks() > 0);
        (controller.stats().issued, elapsed)
    });

    assert_eq!(issued, 1);
    assert!(elapsed_ms >= 5, "settle delay elapsed only {elapsed_ms} ms");
    assert!(ctx.stats.snapshot().committed > 0);
}
