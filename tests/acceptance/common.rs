//! Common utilities for integration tests.

#![allow(dead_code)]

use sloc_common::config::ServoConfig;
use sloc_hal::{Actuator, EdgeCapture, SimulatedCapture, TimerPwm};
use sloc_runtime::{ControlContext, PhaseEstimator, TickHandler};
use std::time::Duration;

/// Reference tick rate (kHz).
pub const TICKS_PER_MS: u32 = 40;

/// Reference plausibility limit.
pub const MAX_SEPARATION: u32 = 25_000;

/// Reference PWM clock.
pub const PWM_CLOCK_HZ: u64 = 100_000_000;

/// Initialized simulated capture unit.
pub fn ready_capture() -> SimulatedCapture {
    let mut capture = SimulatedCapture::new();
    capture.init().expect("capture init");
    capture
}

/// Initialized PWM model at the reference clock.
pub fn ready_pwm() -> TimerPwm {
    let mut pwm = TimerPwm::new(PWM_CLOCK_HZ);
    pwm.init().expect("pwm init");
    pwm
}

/// Reference servo law with no settle or startup delay, so the controller
/// can be stepped without a tick thread.
pub fn instant_servo() -> ServoConfig {
    ServoConfig {
        settle_delay: Duration::ZERO,
        startup_delay: Duration::ZERO,
        ..ServoConfig::default()
    }
}

/// Tick handler bound to `ctx` and `capture` with the reference estimator.
pub fn handler<'a>(
    ctx: &'a ControlContext,
    capture: &'a SimulatedCapture,
) -> TickHandler<'a, SimulatedCapture> {
    TickHandler::new(ctx, capture, PhaseEstimator::new(MAX_SEPARATION)).expect("handler")
}

/// Run `n` tick invocations synchronously.
pub fn tick_n(handler: &TickHandler<'_, SimulatedCapture>, n: u32) {
    for _ in 0..n {
        handler.on_interrupt();
    }
}
