//! Model of a two-timer down-counting PWM peripheral.
//!
//! The peripheral pairs two 32-bit down counters clocked at `clock_hz`:
//! timer 0 sets the period, timer 1 the high time. Both load registers hold
//! the desired count minus two (one clock to reload, one to compare):
//!
//! ```text
//! period_count = clock_hz / frequency_hz - 2
//! high_count   = max(0, clock_hz * duty / (100 * frequency_hz) - 2)
//! ```
//!
//! Reading back inverts the formulas with round-half-up, so the programmed
//! frequency and duty come back unchanged for any value that divides the
//! clock evenly.

use crate::{Actuator, ActuatorCommand};
use serde::{Deserialize, Serialize};
use sloc_common::{SlocError, SlocResult};
use tracing::{debug, trace};

/// Index of the period timer.
const PERIOD_TIMER: usize = 0;
/// Index of the duty (high time) timer.
const DUTY_TIMER: usize = 1;

/// Raw load-register contents of the two timers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRegisters {
    /// Period timer load value.
    pub period: u32,
    /// Duty timer load value.
    pub high: u32,
}

/// PWM generator built on a pair of timer/counters.
#[derive(Debug)]
pub struct TimerPwm {
    clock_hz: u64,
    ready: bool,
    running: bool,
    load: [u32; 2],
    restarts: u64,
}

impl TimerPwm {
    /// Create an uninitialized PWM with the given timer input clock.
    #[must_use]
    pub fn new(clock_hz: u64) -> Self {
        Self {
            clock_hz,
            ready: false,
            running: false,
            load: [0; 2],
            restarts: 0,
        }
    }

    /// Timer input clock in Hz.
    #[must_use]
    pub fn clock_hz(&self) -> u64 {
        self.clock_hz
    }

    /// Current load register contents.
    #[must_use]
    pub fn load_registers(&self) -> LoadRegisters {
        LoadRegisters {
            period: self.load[PERIOD_TIMER],
            high: self.load[DUTY_TIMER],
        }
    }

    /// Number of times the generator has been started.
    ///
    /// Every start after the first follows a gap in the output.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Compute load values for a waveform without touching the timers.
    ///
    /// # Errors
    ///
    /// [`SlocError::InvalidParam`] if the duty exceeds 100%, the frequency is
    /// zero, either count does not fit a 32-bit counter, or a non-zero duty
    /// would leave a zero high count.
    pub fn compute_load(&self, frequency_hz: u32, duty_percent: u8) -> SlocResult<LoadRegisters> {
        if duty_percent > 100 {
            return Err(SlocError::InvalidParam(format!(
                "duty cycle {duty_percent}% exceeds 100%"
            )));
        }
        if frequency_hz == 0 {
            return Err(SlocError::InvalidParam("frequency must be non-zero".into()));
        }

        let freq = u128::from(frequency_hz);
        let clock = u128::from(self.clock_hz);

        let period_clocks = clock / freq;
        if period_clocks < 2 {
            return Err(SlocError::InvalidParam(format!(
                "{frequency_hz} Hz is too fast for a {} Hz timer clock",
                self.clock_hz
            )));
        }
        let period = u32::try_from(period_clocks - 2).map_err(|_| {
            SlocError::InvalidParam(format!(
                "period count for {frequency_hz} Hz exceeds the 32-bit counter"
            ))
        })?;

        let high_clocks = clock * u128::from(duty_percent) / (100 * freq);
        if duty_percent > 0 && high_clocks <= 2 {
            return Err(SlocError::InvalidParam(format!(
                "{duty_percent}% at {frequency_hz} Hz is shorter than the timer can resolve"
            )));
        }
        let high = u32::try_from(high_clocks.saturating_sub(2)).map_err(|_| {
            SlocError::InvalidParam(format!(
                "high time count for {duty_percent}% exceeds the 32-bit counter"
            ))
        })?;

        Ok(LoadRegisters { period, high })
    }

    fn ensure_ready(&self) -> SlocResult<()> {
        if self.ready {
            Ok(())
        } else {
            Err(SlocError::DeviceNotReady { device: "pwm" })
        }
    }
}

/// Integer division rounding halves up.
fn div_round(num: u64, den: u64) -> u64 {
    (num + den / 2) / den
}

impl Actuator for TimerPwm {
    fn init(&mut self) -> SlocResult<()> {
        if self.clock_hz == 0 {
            return Err(SlocError::Config("PWM timer clock must be non-zero".into()));
        }
        self.ready = true;
        self.running = false;
        self.load = [0; 2];
        debug!(clock_hz = self.clock_hz, "PWM timer initialized");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn configure_waveform(&mut self, frequency_hz: u32, duty_percent: u8) -> SlocResult<()> {
        self.ensure_ready()?;
        if self.running {
            return Err(SlocError::Busy(
                "waveform can only be configured while stopped".into(),
            ));
        }

        let load = self.compute_load(frequency_hz, duty_percent)?;
        self.load[PERIOD_TIMER] = load.period;
        self.load[DUTY_TIMER] = load.high;
        trace!(frequency_hz, duty_percent, ?load, "PWM load registers written");
        Ok(())
    }

    fn start(&mut self) -> SlocResult<()> {
        self.ensure_ready()?;
        self.running = true;
        self.restarts += 1;
        Ok(())
    }

    fn stop(&mut self) -> SlocResult<()> {
        self.ensure_ready()?;
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn waveform(&self) -> SlocResult<ActuatorCommand> {
        self.ensure_ready()?;

        let period_clocks = u64::from(self.load[PERIOD_TIMER]) + 2;
        let frequency = div_round(self.clock_hz, period_clocks);

        // Only a 0% duty loads a zero high count
        let duty = if self.load[DUTY_TIMER] == 0 {
            0
        } else {
            div_round(100 * (u64::from(self.load[DUTY_TIMER]) + 2), period_clocks)
        };

        Ok(ActuatorCommand {
            frequency_hz: u32::try_from(frequency).unwrap_or(u32::MAX),
            duty_percent: u8::try_from(duty).unwrap_or(u8::MAX),
        })
    }
}
