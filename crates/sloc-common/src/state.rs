//! Controller lifecycle state machine.
//!
//! BOOT → INIT → RUN, with FAULT reachable only during startup. Once the
//! control loop is running nothing takes it back down: recoverable errors are
//! handled locally by the loop itself.

use crate::error::{SlocError, SlocResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeState {
    /// Power-on; devices not yet set up.
    #[default]
    Boot,
    /// Devices initialized, tick context running, servo not yet armed.
    Init,
    /// Control loop running.
    Run,
    /// Startup failed; the control loop must not begin.
    Fault,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Init => write!(f, "INIT"),
            Self::Run => write!(f, "RUN"),
            Self::Fault => write!(f, "FAULT"),
        }
    }
}

impl RuntimeState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: RuntimeState) -> bool {
        use RuntimeState::{Boot, Fault, Init, Run};

        matches!(
            (self, target),
            (Boot, Init) | (Init, Run) | (Boot, Fault) | (Init, Fault) | (Fault, Init)
        )
    }

    /// Returns true once the control loop has started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Run)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: RuntimeState,
    previous: Option<RuntimeState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<RuntimeState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`SlocError::InvalidStateTransition`] if the move is not allowed.
    pub fn transition(&mut self, target: RuntimeState) -> SlocResult<()> {
        if self.current.can_transition_to(target) {
            tracing::debug!(from = %self.current, to = %target, "State transition");
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(SlocError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Record a startup failure. No-op once running.
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(RuntimeState::Fault) {
            self.previous = Some(self.current);
            self.current = RuntimeState::Fault;
            self.transition_count += 1;
        }
    }
}
