use std::fmt::Debug;

use nurture_core::{NurtureError, NurtureResult};

use crate::types::{EnrollmentStatus, ExecutionStatus};

/// Describes a single valid state transition.
#[derive(Debug, Clone)]
pub struct StateTransition<S> {
    pub from: S,
    pub to: S,
    pub trigger: &'static str,
}

/// Guards a record's lifecycle by enforcing a finite set of valid transitions.
#[derive(Debug, Clone)]
pub struct StateMachine<S> {
    pub transitions: Vec<StateTransition<S>>,
}

impl StateMachine<ExecutionStatus> {
    /// Execution-log lifecycle. Terminal states have no outgoing edge except
    /// the explicit `failed -> pending` retry. `processing -> processing` is
    /// taken only once the previous claim's lease has expired.
    pub fn execution_log() -> Self {
        use ExecutionStatus::*;
        Self {
            transitions: vec![
                StateTransition {
                    from: Pending,
                    to: Processing,
                    trigger: "claim",
                },
                StateTransition {
                    from: Processing,
                    to: Processing,
                    trigger: "reclaim_stale",
                },
                StateTransition {
                    from: Processing,
                    to: Sent,
                    trigger: "action_succeeded",
                },
                StateTransition {
                    from: Processing,
                    to: Skipped,
                    trigger: "step_skipped",
                },
                StateTransition {
                    from: Processing,
                    to: Failed,
                    trigger: "step_failed",
                },
                StateTransition {
                    from: Failed,
                    to: Pending,
                    trigger: "retry",
                },
            ],
        }
    }
}

impl StateMachine<EnrollmentStatus> {
    pub fn enrollment() -> Self {
        use EnrollmentStatus::*;
        Self {
            transitions: vec![
                StateTransition {
                    from: Active,
                    to: Completed,
                    trigger: "last_step_done",
                },
                StateTransition {
                    from: Active,
                    to: Cancelled,
                    trigger: "cancel",
                },
            ],
        }
    }
}

impl<S: Copy + PartialEq + Debug> StateMachine<S> {
    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: S, to: S) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// Returns the trigger name for an allowed transition, or a `Conflict`.
    pub fn check(&self, from: S, to: S) -> NurtureResult<&'static str> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
            .map(|t| t.trigger)
            .ok_or_else(|| {
                NurtureError::Conflict(format!(
                    "Invalid state transition from {:?} to {:?}",
                    from, to
                ))
            })
    }
}
