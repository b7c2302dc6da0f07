//! Device abstractions for the sound locator.
//!
//! This crate provides:
//! - [`EdgeCapture`] trait for the two-channel rising-edge timestamp unit
//! - [`Actuator`] trait for the PWM waveform generator driving the servo
//! - [`capture`] module with a simulated, thread-safe capture unit
//! - [`pwm`] module with a model of a two-timer down-counting PWM peripheral
//!
//! Every device must be initialized once before use; operations on a device
//! that has not been set up fail with [`SlocError::DeviceNotReady`].
//!
//! [`SlocError::DeviceNotReady`]: sloc_common::SlocError::DeviceNotReady

pub mod capture;
pub mod pwm;

pub use capture::*;
pub use pwm::*;

use serde::{Deserialize, Serialize};
use sloc_common::SlocResult;
use std::fmt;

/// Microphone channel of the capture unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// First microphone. A more recent edge here gives a positive phase.
    A,
    /// Second microphone.
    B,
}

impl Channel {
    /// Register index of the channel.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Frequency/duty pair driven out by the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Waveform frequency in Hz.
    pub frequency_hz: u32,
    /// High time as a percentage of the period (0..=100).
    pub duty_percent: u8,
}

impl ActuatorCommand {
    /// Create a command.
    #[must_use]
    pub const fn new(frequency_hz: u32, duty_percent: u8) -> Self {
        Self {
            frequency_hz,
            duty_percent,
        }
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz @ {}%", self.frequency_hz, self.duty_percent)
    }
}

/// Two-channel rising-edge capture unit.
///
/// The hardware latches a free-running counter into a per-channel register on
/// every rising edge of that channel. Registers change asynchronously, so
/// reads must be cheap and callable from the tick context.
pub trait EdgeCapture: Send + Sync {
    /// One-time setup. Must be called before any read.
    fn init(&mut self) -> SlocResult<()>;

    /// Whether [`EdgeCapture::init`] has completed.
    fn is_ready(&self) -> bool;

    /// Counter value latched at the most recent rising edge of `channel`.
    fn latest_edge(&self, channel: Channel) -> SlocResult<u32>;

    /// Read channel A then channel B.
    fn latest_edges(&self) -> SlocResult<(u32, u32)> {
        Ok((self.latest_edge(Channel::A)?, self.latest_edge(Channel::B)?))
    }
}

/// PWM waveform generator.
///
/// `configure_waveform` may only be called while the generator is stopped.
/// Restarting is not glitch-free; the output drops briefly between `stop` and
/// `start`.
pub trait Actuator: Send {
    /// One-time setup. Must be called before any other operation.
    fn init(&mut self) -> SlocResult<()>;

    /// Whether [`Actuator::init`] has completed.
    fn is_ready(&self) -> bool;

    /// Program the period and high time.
    fn configure_waveform(&mut self, frequency_hz: u32, duty_percent: u8) -> SlocResult<()>;

    /// Start driving the programmed waveform.
    fn start(&mut self) -> SlocResult<()>;

    /// Stop the waveform generator.
    fn stop(&mut self) -> SlocResult<()>;

    /// Whether the generator is currently running.
    fn is_running(&self) -> bool;

    /// Read back the programmed waveform.
    fn waveform(&self) -> SlocResult<ActuatorCommand>;
}
