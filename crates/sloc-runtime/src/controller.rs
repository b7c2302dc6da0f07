//! Servo actuation controller.
//!
//! Runs in the task context. Each iteration reads the shared phase
//! difference; when it differs from the previous observation the controller
//! maps it through a clamped proportional law to a duty cycle, re-arms the
//! PWM with the new waveform, and then busy-waits a settle delay before
//! looking again.
//!
//! ```text
//!            phase == last_phase
//!          +-----------------+
//!          v                 |
//!       +------+  phase changed   +----------+
//!       | IDLE | ---------------> | APPLYING |
//!       +------+                  +----------+
//!          ^   stop, configure, start,  |
//!          +---- settle delay ----------+
//! ```
//!
//! The settle delay is applied after every issuance attempt, accepted or
//! rejected.

use crate::context::ControlContext;
use serde::{Deserialize, Serialize};
use sloc_common::config::ServoConfig;
use sloc_common::error::{SlocError, SlocResult};
use sloc_hal::{Actuator, ActuatorCommand};
use tracing::{debug, info, warn};

/// Proportional phase-to-duty mapping with a clamp around neutral.
///
/// `duty = clamp(phase * num / den + neutral, neutral - max_dev, neutral + max_dev)`
///
/// Evaluated in 64-bit integers. The division truncates toward zero, so a
/// fractional duty is always rounded toward neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLaw {
    frequency_hz: u32,
    neutral_duty: i64,
    max_deviation: i64,
    gain_numerator: i64,
    gain_denominator: i64,
}

impl ControlLaw {
    /// Build the law from the servo configuration.
    ///
    /// # Errors
    ///
    /// [`SlocError::Config`] if the gain denominator is zero.
    pub fn from_config(servo: &ServoConfig) -> SlocResult<Self> {
        if servo.gain_denominator == 0 {
            return Err(SlocError::Config(
                "control law gain denominator must be non-zero".into(),
            ));
        }
        Ok(Self {
            frequency_hz: servo.frequency_hz,
            neutral_duty: i64::from(servo.neutral_duty),
            max_deviation: i64::from(servo.max_deviation),
            gain_numerator: servo.gain_numerator,
            gain_denominator: servo.gain_denominator,
        })
    }

    /// Clamped duty cycle in percent for a phase difference.
    #[must_use]
    pub fn duty_for(&self, phase: i32) -> i64 {
        let offset = i64::from(phase).saturating_mul(self.gain_numerator) / self.gain_denominator;
        let low = self.neutral_duty - self.max_deviation;
        let high = self.neutral_duty + self.max_deviation;
        offset.saturating_add(self.neutral_duty).clamp(low, high)
    }

    /// Validated actuator command for a phase difference.
    ///
    /// # Errors
    ///
    /// [`SlocError::InvalidDuty`] if the clamped duty still lies outside
    /// 0..=100 (only possible with a neutral band that is itself invalid).
    pub fn command_for(&self, phase: i32) -> SlocResult<ActuatorCommand> {
        let duty = self.duty_for(phase);
        match u8::try_from(duty) {
            Ok(percent) if percent <= 100 => Ok(ActuatorCommand::new(self.frequency_hz, percent)),
            _ => Err(SlocError::InvalidDuty { duty }),
        }
    }

    /// Command that centres the servo.
    ///
    /// # Errors
    ///
    /// [`SlocError::InvalidDuty`] if the neutral duty is out of range.
    pub fn neutral_command(&self) -> SlocResult<ActuatorCommand> {
        self.command_for(0)
    }
}

/// Controller mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    /// No pending change.
    #[default]
    Idle,
    /// A new command is being pushed and settled.
    Applying,
}

/// The controller's only state between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    /// Last command the actuator accepted.
    pub last_applied: ActuatorCommand,
    /// Phase difference seen on the previous iteration.
    pub last_phase: i32,
    /// Set when a changed phase has not yet been pushed out.
    pub dirty: bool,
}

/// Result of one controller iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Phase unchanged; nothing issued.
    Unchanged,
    /// A new command was issued and has settled.
    Applied(ActuatorCommand),
    /// The command was rejected; the previous one is still driven.
    Rejected(SlocError),
}

/// Counters describing controller activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStats {
    /// Commands accepted by the actuator (excluding the arming command).
    pub issued: u64,
    /// Commands rejected before or by the actuator.
    pub rejected: u64,
}

/// Task-context state machine mapping phase differences to servo commands.
pub struct ActuationController<'a, A: Actuator> {
    ctx: &'a ControlContext,
    actuator: A,
    law: ControlLaw,
    state: ControlState,
    mode: ControlMode,
    settle_ms: u32,
    stats: ControlStats,
}

impl<'a, A: Actuator> ActuationController<'a, A> {
    /// Arm the servo and return a controller ready to run.
    ///
    /// Drives the neutral command, starts the waveform, then waits the
    /// startup delay on the shared time base (ticks must already be running
    /// unless the delay is zero).
    ///
    /// # Errors
    ///
    /// - [`SlocError::DeviceNotReady`] if the actuator was not initialized
    /// - [`SlocError::Config`] / [`SlocError::InvalidDuty`] for a bad law
    /// - any error the actuator returns while arming
    pub fn arm(ctx: &'a ControlContext, mut actuator: A, servo: &ServoConfig) -> SlocResult<Self> {
        if !actuator.is_ready() {
            return Err(SlocError::DeviceNotReady { device: "pwm" });
        }

        let law = ControlLaw::from_config(servo)?;
        let neutral = law.neutral_command()?;

        if actuator.is_running() {
            actuator.stop()?;
        }
        actuator.configure_waveform(neutral.frequency_hz, neutral.duty_percent)?;
        actuator.start()?;

        info!(command = %neutral, "Servo armed at neutral");
        ctx.time_base.delay_ms(servo.startup_delay_ms());

        Ok(Self {
            ctx,
            actuator,
            law,
            state: ControlState {
                last_applied: neutral,
                last_phase: 0,
                dirty: false,
            },
            mode: ControlMode::Idle,
            settle_ms: servo.settle_delay_ms(),
            stats: ControlStats::default(),
        })
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Current control state.
    #[must_use]
    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Issued/rejected counters.
    #[must_use]
    pub fn stats(&self) -> ControlStats {
        self.stats
    }

    /// The control law in use.
    #[must_use]
    pub fn law(&self) -> &ControlLaw {
        &self.law
    }

    /// The driven actuator.
    #[must_use]
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Give the actuator back.
    #[must_use]
    pub fn into_actuator(self) -> A {
        self.actuator
    }

    /// Run one iteration.
    ///
    /// Returns immediately when the phase is unchanged. Otherwise pushes the
    /// new command and blocks for the settle delay.
    pub fn step(&mut self) -> StepOutcome {
        let phase = self.ctx.phase.load();
        if phase == self.state.last_phase {
            return StepOutcome::Unchanged;
        }

        self.state.last_phase = phase;
        self.state.dirty = true;
        self.mode = ControlMode::Applying;

        let outcome = match self.law.command_for(phase).and_then(|cmd| self.apply(cmd)) {
            Ok(command) => {
                self.state.last_applied = command;
                self.stats.issued += 1;
                info!(phase, %command, "Servo command issued");
                StepOutcome::Applied(command)
            }
            Err(e) => {
                self.stats.rejected += 1;
                warn!(
                    phase,
                    error = %e,
                    retained = %self.state.last_applied,
                    "Servo command rejected"
                );
                StepOutcome::Rejected(e)
            }
        };
        self.state.dirty = false;

        self.ctx.time_base.delay_ms(self.settle_ms);
        self.mode = ControlMode::Idle;
        debug!(phase, "Settled");

        outcome
    }

    /// Iterate until `done` returns true for an outcome.
    pub fn run_until<F>(&mut self, mut done: F)
    where
        F: FnMut(&StepOutcome) -> bool,
    {
        loop {
            let outcome = self.step();
            if done(&outcome) {
                return;
            }
            if outcome == StepOutcome::Unchanged {
                std::hint::spin_loop();
            }
        }
    }

    /// Iterate forever.
    pub fn run(&mut self) -> ! {
        info!("Entering control loop");
        loop {
            if self.step() == StepOutcome::Unchanged {
                std::hint::spin_loop();
            }
        }
    }

    /// Re-arm the actuator with `command`.
    ///
    /// If configuration fails the generator is restarted with its old load
    /// values, so the previous command keeps being driven.
    fn apply(&mut self, command: ActuatorCommand) -> SlocResult<ActuatorCommand> {
        self.actuator.stop()?;
        if let Err(e) = self
            .actuator
            .configure_waveform(command.frequency_hz, command.duty_percent)
        {
            self.actuator.start()?;
            return Err(e);
        }
        self.actuator.start()?;
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sloc_hal::TimerPwm;

    /// Actuator that records every call and can be told to refuse.
    #[derive(Debug, Default)]
    struct MockActuator {
        ready: bool,
        running: bool,
        refuse: bool,
        current: Option<ActuatorCommand>,
        configured: Vec<ActuatorCommand>,
        starts: u32,
        stops: u32,
    }

    impl MockActuator {
        fn ready() -> Self {
            Self {
                ready: true,
                ..Self::default()
            }
        }
    }

    impl Actuator for MockActuator {
        fn init(&mut self) -> SlocResult<()> {
            self.ready = true;
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn configure_waveform(&mut self, frequency_hz: u32, duty_percent: u8) -> SlocResult<()> {
            assert!(!self.running, "configured while running");
            if self.refuse {
                return Err(SlocError::InvalidParam("refused".into()));
            }
            let cmd = ActuatorCommand::new(frequency_hz, duty_percent);
            self.current = Some(cmd);
            self.configured.push(cmd);
            Ok(())
        }

        fn start(&mut self) -> SlocResult<()> {
            self.running = true;
            self.starts += 1;
            Ok(())
        }

        fn stop(&mut self) -> SlocResult<()> {
            self.running = false;
            self.stops += 1;
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn waveform(&self) -> SlocResult<ActuatorCommand> {
            self.current
                .ok_or(SlocError::DeviceNotReady { device: "mock" })
        }
    }

    fn servo() -> ServoConfig {
        ServoConfig {
            settle_delay: std::time::Duration::ZERO,
            startup_delay: std::time::Duration::ZERO,
            ..ServoConfig::default()
        }
    }

    fn law() -> ControlLaw {
        ControlLaw::from_config(&ServoConfig::default()).unwrap()
    }

    #[test]
    fn test_law_truncates_toward_neutral() {
        let law = law();
        assert_eq!(law.duty_for(0), 7);
        // 7 + 3000 * 4 / 25000 = 7.48 -> 7
        assert_eq!(law.duty_for(3_000), 7);
        assert_eq!(law.duty_for(-3_000), 7);
        assert_eq!(law.duty_for(6_250), 8);
        assert_eq!(law.duty_for(-6_250), 6);
        assert_eq!(law.duty_for(12_499), 8);
        assert_eq!(law.duty_for(-18_750), 4);
    }

    #[test]
    fn test_law_boundaries_hit_band_edges() {
        let law = law();
        assert_eq!(law.duty_for(25_000), 11);
        assert_eq!(law.duty_for(-25_000), 3);
        assert_eq!(law.duty_for(i32::MAX), 11);
        assert_eq!(law.duty_for(i32::MIN), 3);
    }

    #[test]
    fn test_law_rejects_zero_denominator() {
        let config = ServoConfig {
            gain_denominator: 0,
            ..ServoConfig::default()
        };
        assert!(matches!(
            ControlLaw::from_config(&config),
            Err(SlocError::Config(_))
        ));
    }

    #[test]
    fn test_law_validates_band() {
        let config = ServoConfig {
            neutral_duty: 99,
            max_deviation: 4,
            ..ServoConfig::default()
        };
        let law = ControlLaw::from_config(&config).unwrap();
        assert_eq!(law.command_for(0).unwrap().duty_percent, 99);
        assert_eq!(
            law.command_for(25_000),
            Err(SlocError::InvalidDuty { duty: 103 })
        );
    }

    #[test]
    fn test_arm_requires_ready_actuator() {
        let ctx = ControlContext::new(40);
        let result = ActuationController::arm(&ctx, MockActuator::default(), &servo());
        assert!(matches!(
            result,
            Err(SlocError::DeviceNotReady { device: "pwm" })
        ));
    }

    #[test]
    fn test_arm_drives_neutral() {
        let ctx = ControlContext::new(40);
        let controller = ActuationController::arm(&ctx, MockActuator::ready(), &servo()).unwrap();

        let act = controller.actuator();
        assert_eq!(act.configured, vec![ActuatorCommand::new(50, 7)]);
        assert!(act.running);
        assert_eq!(controller.mode(), ControlMode::Idle);
        assert_eq!(controller.state().last_applied, ActuatorCommand::new(50, 7));
        assert!(!controller.state().dirty);
    }

    #[test]
    fn test_unchanged_phase_issues_nothing() {
        let ctx = ControlContext::new(40);
        let mut controller =
            ActuationController::arm(&ctx, MockActuator::ready(), &servo()).unwrap();

        for _ in 0..10 {
            assert_eq!(controller.step(), StepOutcome::Unchanged);
        }
        assert_eq!(controller.actuator().configured.len(), 1);
        assert_eq!(controller.stats().issued, 0);
    }

    #[test]
    fn test_changed_phase_rearms_once() {
        let ctx = ControlContext::new(40);
        let mut controller =
            ActuationController::arm(&ctx, MockActuator::ready(), &servo()).unwrap();

        ctx.phase.store(25_000);
        assert_eq!(
            controller.step(),
            StepOutcome::Applied(ActuatorCommand::new(50, 11))
        );
        assert_eq!(controller.step(), StepOutcome::Unchanged);

        let act = controller.actuator();
        assert_eq!(act.stops, 1);
        assert_eq!(act.starts, 2);
        assert!(act.running);
        assert_eq!(controller.state().last_phase, 25_000);
        assert_eq!(controller.stats().issued, 1);
    }

    #[test]
    fn test_same_duty_still_reissued_on_phase_change() {
        let ctx = ControlContext::new(40);
        let mut controller =
            ActuationController::arm(&ctx, MockActuator::ready(), &servo()).unwrap();

        ctx.phase.store(3_000);
        assert_eq!(
            controller.step(),
            StepOutcome::Applied(ActuatorCommand::new(50, 7))
        );
        ctx.phase.store(3_001);
        assert_eq!(
            controller.step(),
            StepOutcome::Applied(ActuatorCommand::new(50, 7))
        );
        assert_eq!(controller.stats().issued, 2);
    }

    #[test]
    fn test_rejected_command_keeps_previous() {
        let ctx = ControlContext::new(40);
        let mut controller =
            ActuationController::arm(&ctx, MockActuator::ready(), &servo()).unwrap();

        ctx.phase.store(-25_000);
        controller.step();
        assert_eq!(controller.state().last_applied, ActuatorCommand::new(50, 3));

        controller.actuator.refuse = true;
        ctx.phase.store(25_000);
        assert!(matches!(
            controller.step(),
            StepOutcome::Rejected(SlocError::InvalidParam(_))
        ));

        assert_eq!(controller.state().last_applied, ActuatorCommand::new(50, 3));
        assert_eq!(
            controller.actuator().waveform().unwrap(),
            ActuatorCommand::new(50, 3)
        );
        assert!(controller.actuator().running);
        assert!(!controller.state().dirty);
        assert_eq!(controller.stats().rejected, 1);

        // Same phase again: no retry until it changes
        assert_eq!(controller.step(), StepOutcome::Unchanged);
    }

    #[test]
    fn test_invalid_duty_never_reaches_actuator() {
        let ctx = ControlContext::new(40);
        let config = ServoConfig {
            neutral_duty: 99,
            max_deviation: 4,
            ..servo()
        };
        let mut controller =
            ActuationController::arm(&ctx, MockActuator::ready(), &config).unwrap();

        ctx.phase.store(25_000);
        assert_eq!(
            controller.step(),
            StepOutcome::Rejected(SlocError::InvalidDuty { duty: 103 })
        );
        assert_eq!(controller.actuator().configured.len(), 1);
        assert_eq!(controller.actuator().stops, 0);
    }

    #[test]
    fn test_settle_delay_blocks_on_time_base() {
        let ctx = ControlContext::new(1);
        let config = ServoConfig {
            settle_delay: std::time::Duration::from_millis(5),
            ..servo()
        };
        let mut controller =
            ActuationController::arm(&ctx, MockActuator::ready(), &config).unwrap();

        ctx.phase.store(1_000);
        std::thread::scope(|s| {
            let ticker = s.spawn(|| {
                for _ in 0..50 {
                    ctx.time_base.on_tick();
                    std::thread::sleep(std::time::Duration::from_micros(200));
                }
            });
            controller.step();
            assert!(ctx.time_base.now_ms() >= 5);
            ticker.join().unwrap();
        });
    }

    #[test]
    fn test_run_until_stops_on_predicate() {
        let ctx = ControlContext::new(40);
        let mut controller =
            ActuationController::arm(&ctx, MockActuator::ready(), &servo()).unwrap();

        ctx.phase.store(-6_250);
        let mut seen = Vec::new();
        controller.run_until(|outcome| {
            seen.push(outcome.clone());
            matches!(outcome, StepOutcome::Applied(_))
        });
        assert_eq!(seen, vec![StepOutcome::Applied(ActuatorCommand::new(50, 6))]);
    }

    #[test]
    fn test_with_timer_pwm() {
        let ctx = ControlContext::new(40);
        let mut pwm = TimerPwm::new(100_000_000);
        pwm.init().unwrap();
        let mut controller = ActuationController::arm(&ctx, pwm, &servo()).unwrap();

        ctx.phase.store(18_750);
        controller.step();

        let pwm = controller.into_actuator();
        assert_eq!(pwm.waveform().unwrap(), ActuatorCommand::new(50, 10));
        assert!(pwm.is_running());
        assert_eq!(pwm.restarts(), 2);
    }
}
