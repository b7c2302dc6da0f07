//! Configuration structures for the sound locator.
//!
//! Supports TOML deserialization with defaults matching the reference
//! board: a 40 kHz reference tick, a 50 Hz servo centred at 7% duty and a
//! 100 MHz PWM timer clock.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Reference tick and millisecond time base.
    pub timing: TimingConfig,

    /// Phase estimator plausibility filter.
    pub estimator: EstimatorConfig,

    /// Servo control law and rate limiting.
    pub servo: ServoConfig,

    /// PWM timer/counter parameters.
    pub pwm: PwmConfig,
}

/// Reference tick configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Reference ticks per millisecond (tick rate in kHz), at most
    /// [`MAX_TICKS_PER_MS`].
    pub ticks_per_ms: u32,

    /// `SCHED_FIFO` priority (1-99) for the tick thread. `None` leaves the
    /// thread at the default scheduling policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rt_priority: Option<u8>,
}

/// Highest tick rate with a non-zero nanosecond period (1 GHz).
pub const MAX_TICKS_PER_MS: u32 = 1_000_000;

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ticks_per_ms: 40,
            rt_priority: None,
        }
    }
}

impl TimingConfig {
    /// Period of one reference tick.
    ///
    /// Truncated to whole nanoseconds, so a rate that does not divide
    /// 1 000 000 runs slightly fast (3 ticks/ms gives 333.333 us ticks and a
    /// 999.999 us millisecond).
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_nanos(1_000_000 / u64::from(self.ticks_per_ms.max(1)))
    }
}

/// Phase estimator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Largest edge separation (capture counts) accepted as a real
    /// time-of-arrival difference. Calibration constant.
    pub max_valid_separation: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_valid_separation: 25_000,
        }
    }
}

/// Servo control law configuration.
///
/// The gain is `gain_numerator / gain_denominator` duty percent per capture
/// count, chosen so that `max_valid_separation` maps to `max_deviation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    /// Nominal drive frequency in Hz.
    pub frequency_hz: u32,

    /// Duty cycle (percent) for a centred, forward-facing servo.
    pub neutral_duty: u8,

    /// Largest allowed deviation from `neutral_duty` (percent).
    pub max_deviation: u8,

    /// Control law gain numerator.
    pub gain_numerator: i64,

    /// Control law gain denominator.
    pub gain_denominator: i64,

    /// Wait after each issued command before the next evaluation.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// Wait after arming the neutral command before the first evaluation.
    #[serde(with = "humantime_serde")]
    pub startup_delay: Duration,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 50,
            neutral_duty: 7,
            max_deviation: 4,
            gain_numerator: 4,
            gain_denominator: 25_000,
            settle_delay: Duration::from_secs(1),
            startup_delay: Duration::from_millis(50),
        }
    }
}

impl ServoConfig {
    /// Settle delay in whole milliseconds.
    #[must_use]
    pub fn settle_delay_ms(&self) -> u32 {
        duration_ms(self.settle_delay)
    }

    /// Startup delay in whole milliseconds.
    #[must_use]
    pub fn startup_delay_ms(&self) -> u32 {
        duration_ms(self.startup_delay)
    }
}

fn duration_ms(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

/// PWM timer/counter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    /// Input clock of the timer/counter in Hz.
    pub clock_hz: u64,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            clock_hz: 100_000_000,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.ticks_per_ms == 0 {
            return Err(invalid("timing.ticks_per_ms must be at least 1"));
        }
        if self.timing.ticks_per_ms > MAX_TICKS_PER_MS {
            return Err(invalid("timing.ticks_per_ms must not exceed 1000000"));
        }
        if let Some(priority) = self.timing.rt_priority {
            if !(1..=99).contains(&priority) {
                return Err(invalid("timing.rt_priority must be within 1..=99"));
            }
        }
        if i32::try_from(self.estimator.max_valid_separation).is_err() {
            return Err(invalid(
                "estimator.max_valid_separation must fit a signed 32-bit phase",
            ));
        }
        let servo = &self.servo;
        if servo.frequency_hz == 0 {
            return Err(invalid("servo.frequency_hz must be non-zero"));
        }
        if servo.gain_denominator == 0 {
            return Err(invalid("servo.gain_denominator must be non-zero"));
        }
        if servo.max_deviation > servo.neutral_duty
            || u16::from(servo.neutral_duty) + u16::from(servo.max_deviation) > 100
        {
            return Err(invalid(
                "servo.neutral_duty +/- servo.max_deviation must stay within 0..=100",
            ));
        }
        if servo.settle_delay.as_millis() > u128::from(u32::MAX)
            || servo.startup_delay.as_millis() > u128::from(u32::MAX)
        {
            return Err(invalid("servo delays must fit a 32-bit millisecond counter"));
        }
        if self.pwm.clock_hz == 0 {
            return Err(invalid("pwm.clock_hz must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parsed but violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
