use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Role of a vertex in the phase graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A behavior template; never placed in a graph itself.
    Imp,
    /// A leaf vertex bound to a behavior. Only these do real work.
    Node,
    /// Begin vertex of a sub-schedule.
    Schedule,
    /// Begin vertex of a domain.
    Domain,
    /// Implicit end vertex of a schedule or domain.
    Terminal,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imp => "imp",
            Self::Node => "node",
            Self::Schedule => "schedule",
            Self::Domain => "domain",
            Self::Terminal => "terminal",
        }
    }

    /// Schedules and domains own a begin/end pair and can receive `add`.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Schedule | Self::Domain)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imp" => Ok(Self::Imp),
            "node" => Ok(Self::Node),
            "schedule" => Ok(Self::Schedule),
            "domain" => Ok(Self::Domain),
            "terminal" => Ok(Self::Terminal),
            _ => Err(CoreError::UnknownNodeType(s.to_string())),
        }
    }
}

/// How a behavior walks the component tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    BottomUp,
    TopDown,
    Task,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BottomUp => "bottom_up",
            Self::TopDown => "top_down",
            Self::Task => "task",
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self, Self::Task)
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bottom_up" => Ok(Self::BottomUp),
            "top_down" => Ok(Self::TopDown),
            "task" => Ok(Self::Task),
            _ => Err(CoreError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JumpDirection {
    /// Skip ahead: intervening nodes are marked done without executing.
    Forward,
    /// Replay: the target and everything after it go back to dormant.
    Backward,
}

impl JumpDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

impl fmt::Display for JumpDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_types() {
        assert!(NodeType::Schedule.is_container());
        assert!(NodeType::Domain.is_container());
        assert!(!NodeType::Node.is_container());
        assert!(!NodeType::Terminal.is_container());
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in [PhaseKind::BottomUp, PhaseKind::TopDown, PhaseKind::Task] {
            assert_eq!(kind.as_str().parse::<PhaseKind>(), Ok(kind));
        }
        assert!("sideways".parse::<PhaseKind>().is_err());
    }

    #[test]
    fn test_node_type_parsing() {
        assert_eq!("terminal".parse::<NodeType>(), Ok(NodeType::Terminal));
        assert_eq!(
            "edge".parse::<NodeType>(),
            Err(CoreError::UnknownNodeType("edge".to_string()))
        );
    }
}
