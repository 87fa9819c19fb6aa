//! Round state machine
//!
//! The coordinator walks every operation through these states:
//!
//! ```text
//! Dispatching -> Evaluating -> Done
//!      |             |-------> Failed
//!      |             `-------> Waiting -> Dispatching
//!      |                          `-----> Cancelled
//!      |-> Failed     (unexpected store error)
//!      `-> Cancelled  (caller abort)
//! ```

use crate::error::PurgeError;
use serde::{Deserialize, Serialize};

/// Where an operation is in its round loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundState {
    /// Batches of the current working set are in flight
    Dispatching,
    /// Round resolved; inspecting the unprocessed set
    Evaluating,
    /// Sleeping out the backoff before the next round
    Waiting,
    /// Every request applied
    Done,
    /// Retry budget spent or store error
    Failed,
    /// Caller aborted
    Cancelled,
}

impl RoundState {
    /// All states, in declaration order
    pub const ALL: [RoundState; 6] = [
        Self::Dispatching,
        Self::Evaluating,
        Self::Waiting,
        Self::Done,
        Self::Failed,
        Self::Cancelled,
    ];

    /// No transitions leave a terminal state
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// Validates a state transition.
pub fn validate_transition(from: RoundState, to: RoundState) -> Result<(), PurgeError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PurgeError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step.
pub fn allowed_transitions(from: RoundState) -> &'static [RoundState] {
    use RoundState::*;
    match from {
        Dispatching => &[Evaluating, Failed, Cancelled],
        Evaluating => &[Done, Failed, Waiting],
        Waiting => &[Dispatching, Cancelled],
        Done | Failed | Cancelled => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_cycle_is_legal() {
        assert!(validate_transition(RoundState::Dispatching, RoundState::Evaluating).is_ok());
        assert!(validate_transition(RoundState::Evaluating, RoundState::Waiting).is_ok());
        assert!(validate_transition(RoundState::Waiting, RoundState::Dispatching).is_ok());
    }

    #[test]
    fn evaluating_cannot_be_cancelled() {
        assert!(matches!(
            validate_transition(RoundState::Evaluating, RoundState::Cancelled),
            Err(PurgeError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn terminals_are_final() {
        for from in RoundState::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in RoundState::ALL {
                assert!(validate_transition(from, to).is_err());
            }
        }
    }
}
