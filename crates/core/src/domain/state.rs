use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Execution state of a phase node.
///
/// The declaration order is the ordinal order: a node only moves forward
/// through it, except when a jump resets it (`Dormant` on a backward jump,
/// `Done` on a forward skip). `Jumping` sorts last so that waiters using
/// `>= Done` also release on a node that is leaving through a jump.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    #[default]
    Uninitialized,
    Dormant,
    Scheduled,
    Syncing,
    Started,
    Executing,
    ReadyToEnd,
    Ended,
    Cleanup,
    Done,
    Jumping,
}

impl PhaseState {
    pub const ALL: [PhaseState; 11] = [
        Self::Uninitialized,
        Self::Dormant,
        Self::Scheduled,
        Self::Syncing,
        Self::Started,
        Self::Executing,
        Self::ReadyToEnd,
        Self::Ended,
        Self::Cleanup,
        Self::Done,
        Self::Jumping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Dormant => "dormant",
            Self::Scheduled => "scheduled",
            Self::Syncing => "syncing",
            Self::Started => "started",
            Self::Executing => "executing",
            Self::ReadyToEnd => "ready_to_end",
            Self::Ended => "ended",
            Self::Cleanup => "cleanup",
            Self::Done => "done",
            Self::Jumping => "jumping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// A phase accepts jump requests only between STARTED and ENDED.
    pub fn is_active(&self) -> bool {
        (Self::Started..=Self::Ended).contains(self)
    }

    /// True once the node has left the execute loop, either naturally or through a jump.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Jumping)
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownState(s.to_string()))
    }
}

/// Comparison used by `wait_for_state`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StateOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl StateOp {
    /// Whether `current` satisfies `current <op> target`.
    pub fn holds(&self, current: PhaseState, target: PhaseState) -> bool {
        match self {
            Self::Eq => current == target,
            Self::Ne => current != target,
            Self::Lt => current < target,
            Self::Lte => current <= target,
            Self::Gt => current > target,
            Self::Gte => current >= target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_order() {
        assert!(PhaseState::Dormant < PhaseState::Scheduled);
        assert!(PhaseState::Syncing < PhaseState::Started);
        assert!(PhaseState::ReadyToEnd < PhaseState::Ended);
        assert!(PhaseState::Done < PhaseState::Jumping);
        let mut sorted = PhaseState::ALL;
        sorted.sort();
        assert_eq!(sorted, PhaseState::ALL);
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!(PhaseState::parse("ready_to_end"), Some(PhaseState::ReadyToEnd));
        assert_eq!("done".parse::<PhaseState>(), Ok(PhaseState::Done));
        assert_eq!(
            "asleep".parse::<PhaseState>(),
            Err(CoreError::UnknownState("asleep".to_string()))
        );
    }

    #[test]
    fn test_active_window() {
        assert!(!PhaseState::Syncing.is_active());
        assert!(PhaseState::Started.is_active());
        assert!(PhaseState::ReadyToEnd.is_active());
        assert!(PhaseState::Ended.is_active());
        assert!(!PhaseState::Cleanup.is_active());
    }

    #[test]
    fn test_state_ops() {
        assert!(StateOp::Gte.holds(PhaseState::Jumping, PhaseState::Done));
        assert!(StateOp::Lt.holds(PhaseState::Dormant, PhaseState::Scheduled));
        assert!(StateOp::Ne.holds(PhaseState::Done, PhaseState::Dormant));
        assert!(!StateOp::Eq.holds(PhaseState::Ended, PhaseState::Done));
        assert!(StateOp::Lte.holds(PhaseState::Ended, PhaseState::Ended));
        assert!(!StateOp::Gt.holds(PhaseState::Started, PhaseState::Executing));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&PhaseState::ReadyToEnd).unwrap();
        assert_eq!(json, "\"ready_to_end\"");
    }
}
