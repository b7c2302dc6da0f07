use thiserror::Error;

/// Error types covering device access, actuator parameters and lifecycle faults.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SlocError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A device was used before its one-time setup completed.
    #[error("device not ready: {device}")]
    DeviceNotReady {
        /// Name of the device that was not initialized.
        device: &'static str,
    },

    /// Actuator rejected a waveform (zero frequency, counts out of range).
    #[error("invalid actuator parameter: {0}")]
    InvalidParam(String),

    /// Computed duty cycle is outside 0..=100 percent.
    #[error("duty cycle {duty}% outside 0..=100")]
    InvalidDuty {
        /// The rejected duty cycle in percent.
        duty: i64,
    },

    /// Waveform reconfigured while the generator was running.
    #[error("actuator busy: {0}")]
    Busy(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for sound locator operations.
pub type SlocResult<T> = Result<T, SlocError>;
