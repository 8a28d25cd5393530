use phase_core::PhaseState;

use crate::error::{OrchestratorError, Result};

/// Legal natural transitions of a phase node.
///
/// Jumps and `add()` bypass this table: they reset a node with a forced
/// state write instead of a transition.
pub struct PhaseStateMachine;

impl PhaseStateMachine {
    pub fn validate_transition(phase: &str, from: PhaseState, to: PhaseState) -> Result<()> {
        if Self::allowed_transitions(from).contains(&to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                phase: phase.to_string(),
                from,
                to,
            })
        }
    }

    fn allowed_transitions(from: PhaseState) -> &'static [PhaseState] {
        match from {
            PhaseState::Uninitialized => &[PhaseState::Dormant],
            PhaseState::Dormant => &[PhaseState::Scheduled],
            PhaseState::Scheduled => &[PhaseState::Syncing],
            PhaseState::Syncing => &[PhaseState::Started],
            PhaseState::Started => &[PhaseState::Executing],
            PhaseState::Executing => &[PhaseState::ReadyToEnd, PhaseState::Ended],
            PhaseState::ReadyToEnd => &[PhaseState::Executing, PhaseState::Ended],
            PhaseState::Ended => &[PhaseState::Cleanup, PhaseState::Jumping],
            PhaseState::Cleanup => &[PhaseState::Done],
            PhaseState::Done => &[],
            PhaseState::Jumping => &[],
        }
    }

    pub fn can_transition(from: PhaseState, to: PhaseState) -> bool {
        Self::allowed_transitions(from).contains(&to)
    }

    /// Next state on the natural path, ignoring the ready-to-end loop and jumps.
    pub fn next_state(current: PhaseState) -> Option<PhaseState> {
        match current {
            PhaseState::Uninitialized => Some(PhaseState::Dormant),
            PhaseState::Dormant => Some(PhaseState::Scheduled),
            PhaseState::Scheduled => Some(PhaseState::Syncing),
            PhaseState::Syncing => Some(PhaseState::Started),
            PhaseState::Started => Some(PhaseState::Executing),
            PhaseState::Executing => Some(PhaseState::ReadyToEnd),
            PhaseState::ReadyToEnd => Some(PhaseState::Ended),
            PhaseState::Ended => Some(PhaseState::Cleanup),
            PhaseState::Cleanup => Some(PhaseState::Done),
            PhaseState::Done => None,
            PhaseState::Jumping => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(PhaseStateMachine::can_transition(
            PhaseState::Dormant,
            PhaseState::Scheduled
        ));
        assert!(PhaseStateMachine::can_transition(
            PhaseState::Executing,
            PhaseState::Ended
        ));
        assert!(PhaseStateMachine::can_transition(
            PhaseState::Ended,
            PhaseState::Jumping
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!PhaseStateMachine::can_transition(
            PhaseState::Dormant,
            PhaseState::Started
        ));
        assert!(!PhaseStateMachine::can_transition(
            PhaseState::Done,
            PhaseState::Scheduled
        ));
        assert!(!PhaseStateMachine::can_transition(
            PhaseState::Jumping,
            PhaseState::Done
        ));
    }

    #[test]
    fn test_ready_to_end_loop() {
        assert!(PhaseStateMachine::can_transition(
            PhaseState::ReadyToEnd,
            PhaseState::Executing
        ));
        assert!(PhaseStateMachine::can_transition(
            PhaseState::Executing,
            PhaseState::ReadyToEnd
        ));
    }

    #[test]
    fn test_validate_reports_phase() {
        let err = PhaseStateMachine::validate_transition(
            "common.build",
            PhaseState::Started,
            PhaseState::Done,
        )
        .unwrap_err();
        assert!(err.to_string().contains("common.build"));
    }

    #[test]
    fn test_next_state_walks_to_done() {
        let mut state = PhaseState::Uninitialized;
        let mut steps = 0;
        while let Some(next) = PhaseStateMachine::next_state(state) {
            assert!(PhaseStateMachine::can_transition(state, next));
            state = next;
            steps += 1;
        }
        assert_eq!(state, PhaseState::Done);
        assert_eq!(steps, 9);
    }
}
