use phase_core::PhaseState;
use thiserror::Error;

use crate::graph::NodeId;
use crate::objection::ObjectionError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid state transition for {phase}: {from} -> {to}")]
    InvalidTransition {
        phase: String,
        from: PhaseState,
        to: PhaseState,
    },

    #[error("Unknown phase node: {0}")]
    UnknownNode(NodeId),

    #[error("Phase {phase} ({state}) is not a schedule or domain")]
    NotASchedule { phase: String, state: PhaseState },

    #[error("Phase {phase} ({state}) is not a domain")]
    NotADomain { phase: String, state: PhaseState },

    #[error("Phase {phase} has no component traversal for state {state}")]
    InvalidTraversalState { phase: String, state: PhaseState },

    // Graph construction
    #[error("add() on {schedule}: with_phase cannot be combined with after_phase or before_phase")]
    ConflictingPlacement { schedule: String },

    #[error("add() on {schedule}: cannot find {role} phase '{target}' within scope")]
    PhaseNotFound {
        schedule: String,
        role: &'static str,
        target: String,
    },

    #[error("add() on {schedule}: after phase {after} does not precede before phase {before}")]
    NotBefore {
        schedule: String,
        after: String,
        before: String,
    },

    #[error("add() on {schedule}: {reason}")]
    InvalidPlacement { schedule: String, reason: String },

    // Jumps
    #[error("Jump from {phase} ({state}): '{target}' is neither a predecessor nor a successor")]
    JumpTargetNotFound {
        phase: String,
        state: PhaseState,
        target: String,
    },

    #[error("Jump from {phase} refused: phase is not active (state {state})")]
    InactiveJump { phase: String, state: PhaseState },

    // Objections
    #[error("Phase {phase} ({state}) has no objection: only task phases accept raise/drop")]
    NoObjection { phase: String, state: PhaseState },

    #[error(transparent)]
    Objection(#[from] ObjectionError),

    // Components
    #[error("Hook failed in {phase} ({state}) on component '{component}': {source}")]
    HookFailed {
        phase: String,
        state: PhaseState,
        component: String,
        #[source]
        source: HookError,
    },

    #[error("Component '{name}' cannot be added under '{parent}': {reason}")]
    InvalidComponent {
        parent: String,
        name: String,
        reason: String,
    },

    #[error("Phase execution aborted: {0}")]
    ExecutionAborted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Create a hook failed error.
    pub fn hook_failed(
        phase: impl Into<String>,
        state: PhaseState,
        component: impl Into<String>,
        source: HookError,
    ) -> Self {
        Self::HookFailed {
            phase: phase.into(),
            state,
            component: component.into(),
            source,
        }
    }

    /// Create an invalid placement error.
    pub fn invalid_placement(schedule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPlacement {
            schedule: schedule.into(),
            reason: reason.into(),
        }
    }

    /// Construction and jump-resolution errors end the run; there is nothing to recover into.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Objection(_) | Self::InactiveJump { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Error returned by a component hook.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Lets hooks use `?` on objection and jump calls.
impl From<OrchestratorError> for HookError {
    fn from(error: OrchestratorError) -> Self {
        Self::new(error.to_string())
    }
}

/// Result of a component hook.
pub type HookResult = std::result::Result<(), HookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_failed_message_carries_coordinates() {
        let err = OrchestratorError::hook_failed(
            "common.connect",
            PhaseState::Executing,
            "env.agent",
            HookError::new("port unbound"),
        );
        let text = err.to_string();
        assert!(text.contains("common.connect"));
        assert!(text.contains("executing"));
        assert!(text.contains("env.agent"));
        assert!(text.contains("port unbound"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(OrchestratorError::ConflictingPlacement {
            schedule: "common".to_string()
        }
        .is_fatal());
        assert!(!OrchestratorError::InactiveJump {
            phase: "common.run".to_string(),
            state: PhaseState::Done,
        }
        .is_fatal());
        assert!(OrchestratorError::NoObjection {
            phase: "common.build".to_string(),
            state: PhaseState::Executing,
        }
        .is_fatal());
        assert!(OrchestratorError::JumpTargetNotFound {
            phase: "common.run".to_string(),
            state: PhaseState::Executing,
            target: "nowhere".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_hook_error_from_orchestrator_error() {
        let err: HookError = OrchestratorError::NoObjection {
            phase: "common.build".to_string(),
            state: PhaseState::Executing,
        }
        .into();
        assert!(err.message().contains("common.build"));
    }
}
