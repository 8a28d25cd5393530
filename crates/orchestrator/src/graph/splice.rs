//! Placement of behaviors and sub-schedules into a schedule.

use std::fmt;
use std::sync::Arc;

use phase_core::NodeType;

use super::{NodeId, PhaseGraph};
use crate::error::{OrchestratorError, Result};
use crate::phases::{PhaseImp, StandardPhase};

/// A reference to a phase, resolved by search within a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseRef {
    /// An exact node.
    Node(NodeId),
    /// A leaf node bound to the behavior with this name.
    Imp(String),
    /// Any node, leaf or container, with this name.
    Named(String),
}

impl fmt::Display for PhaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseRef::Node(id) => write!(f, "{}", id),
            PhaseRef::Imp(name) | PhaseRef::Named(name) => write!(f, "{}", name),
        }
    }
}

impl From<NodeId> for PhaseRef {
    fn from(id: NodeId) -> Self {
        PhaseRef::Node(id)
    }
}

impl From<&Arc<PhaseImp>> for PhaseRef {
    fn from(imp: &Arc<PhaseImp>) -> Self {
        PhaseRef::Imp(imp.name().to_string())
    }
}

impl From<StandardPhase> for PhaseRef {
    fn from(phase: StandardPhase) -> Self {
        PhaseRef::Imp(phase.name().to_string())
    }
}

impl From<&str> for PhaseRef {
    fn from(name: &str) -> Self {
        PhaseRef::Named(name.to_string())
    }
}

impl From<String> for PhaseRef {
    fn from(name: String) -> Self {
        PhaseRef::Named(name)
    }
}

/// What `add` places into a schedule.
#[derive(Debug, Clone)]
pub enum Addable {
    /// A behavior; a fresh leaf node is created for it.
    Imp(Arc<PhaseImp>),
    /// An existing, not yet placed, schedule or domain.
    Schedule(NodeId),
}

impl From<Arc<PhaseImp>> for Addable {
    fn from(imp: Arc<PhaseImp>) -> Self {
        Addable::Imp(imp)
    }
}

impl From<&Arc<PhaseImp>> for Addable {
    fn from(imp: &Arc<PhaseImp>) -> Self {
        Addable::Imp(Arc::clone(imp))
    }
}

impl From<StandardPhase> for Addable {
    fn from(phase: StandardPhase) -> Self {
        Addable::Imp(phase.imp())
    }
}

impl From<NodeId> for Addable {
    fn from(id: NodeId) -> Self {
        Addable::Schedule(id)
    }
}

/// Where to splice the added item. The default places it just before the
/// schedule's end node.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    with: Option<PhaseRef>,
    after: Option<PhaseRef>,
    before: Option<PhaseRef>,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run in parallel with `phase`, sharing its predecessors and successors.
    pub fn with_phase(mut self, phase: impl Into<PhaseRef>) -> Self {
        self.with = Some(phase.into());
        self
    }

    pub fn after(mut self, phase: impl Into<PhaseRef>) -> Self {
        self.after = Some(phase.into());
        self
    }

    pub fn before(mut self, phase: impl Into<PhaseRef>) -> Self {
        self.before = Some(phase.into());
        self
    }
}

struct Anchors {
    with: Option<NodeId>,
    after: Option<NodeId>,
    before: Option<NodeId>,
}

impl PhaseGraph {
    /// Splice `item` into `schedule`. Returns the begin and end node of the
    /// placed item (the same node for a behavior).
    ///
    /// Every anchor is resolved and every check made before the graph is
    /// touched, so a rejected placement leaves it unchanged.
    pub(crate) fn splice(
        &mut self,
        schedule: NodeId,
        item: Addable,
        placement: Placement,
    ) -> Result<(NodeId, NodeId)> {
        let node = self.node(schedule)?;
        let schedule_name = self.full_name(schedule);
        if !node.node_type().is_container() {
            return Err(OrchestratorError::NotASchedule {
                phase: schedule_name,
                state: node.state(),
            });
        }
        let schedule_end = node.end_node().ok_or_else(|| {
            OrchestratorError::invalid_placement(&schedule_name, "schedule has no end node")
        })?;

        if placement.with.is_some() && (placement.after.is_some() || placement.before.is_some()) {
            return Err(OrchestratorError::ConflictingPlacement {
                schedule: schedule_name,
            });
        }

        let mut anchors = Anchors {
            with: self.resolve_anchor(schedule, &schedule_name, placement.with, "with")?,
            after: self.resolve_anchor(schedule, &schedule_name, placement.after, "after")?,
            before: self.resolve_anchor(schedule, &schedule_name, placement.before, "before")?,
        };
        if anchors.with.is_none() && anchors.after.is_none() && anchors.before.is_none() {
            anchors.before = Some(schedule_end);
        }

        if anchors.with == Some(schedule) || anchors.before == Some(schedule) {
            return Err(OrchestratorError::invalid_placement(
                &schedule_name,
                "cannot place before or in parallel with the schedule's begin node",
            ));
        }
        if anchors.with == Some(schedule_end) || anchors.after == Some(schedule_end) {
            return Err(OrchestratorError::invalid_placement(
                &schedule_name,
                "cannot place after or in parallel with the schedule's end node",
            ));
        }
        if let (Some(after), Some(before)) = (anchors.after, anchors.before) {
            if !self.is_before(after, before) {
                return Err(OrchestratorError::NotBefore {
                    schedule: schedule_name,
                    after: self.full_name(after),
                    before: self.full_name(before),
                });
            }
        }

        let (begin, end) = match item {
            Addable::Imp(imp) => {
                let id = self.create_node(imp.name(), NodeType::Node, Some(schedule));
                self.bind_imp(id, imp)?;
                (id, id)
            }
            Addable::Schedule(sub) => {
                let end = self.check_placeable(schedule, &schedule_name, sub, &anchors)?;
                self.set_parent(sub, schedule)?;
                (sub, end)
            }
        };

        if let Some(with) = anchors.with {
            let preds: Vec<_> = self.node(with)?.predecessors().iter().copied().collect();
            let succs: Vec<_> = self.node(with)?.successors().iter().copied().collect();
            for pred in preds {
                self.link(pred, begin);
            }
            for succ in succs {
                self.link(end, succ);
            }
        } else {
            match (anchors.after, anchors.before) {
                (Some(after), Some(before)) => {
                    self.link(after, begin);
                    self.link(end, before);
                    if self.node(after)?.successors().contains(&before) {
                        self.unlink(after, before);
                    }
                }
                (None, Some(before)) => {
                    let preds: Vec<_> =
                        self.node(before)?.predecessors().iter().copied().collect();
                    for pred in preds {
                        self.unlink(pred, before);
                        self.link(pred, begin);
                    }
                    self.link(end, before);
                }
                (Some(after), None) => {
                    let succs: Vec<_> = self.node(after)?.successors().iter().copied().collect();
                    for succ in succs {
                        self.unlink(after, succ);
                        self.link(end, succ);
                    }
                    self.link(after, begin);
                }
                (None, None) => unreachable!("default placement always sets an anchor"),
            }
        }

        Ok((begin, end))
    }

    fn resolve_anchor(
        &self,
        schedule: NodeId,
        schedule_name: &str,
        target: Option<PhaseRef>,
        role: &'static str,
    ) -> Result<Option<NodeId>> {
        let Some(target) = target else {
            return Ok(None);
        };
        let found = match &target {
            PhaseRef::Node(id) => {
                self.node(*id)?;
                Some(*id)
            }
            _ => self.find(schedule, &target, true),
        };
        found.map(Some).ok_or_else(|| OrchestratorError::PhaseNotFound {
            schedule: schedule_name.to_string(),
            role,
            target: target.to_string(),
        })
    }

    /// A sub-schedule can be placed once, never into itself or its own contents.
    fn check_placeable(
        &self,
        schedule: NodeId,
        schedule_name: &str,
        sub: NodeId,
        anchors: &Anchors,
    ) -> Result<NodeId> {
        let node = self.node(sub)?;
        let sub_name = self.full_name(sub);
        if !node.node_type().is_container() {
            return Err(OrchestratorError::NotASchedule {
                phase: sub_name,
                state: node.state(),
            });
        }
        if sub == schedule || self.is_within(schedule, sub) {
            return Err(OrchestratorError::invalid_placement(
                schedule_name,
                format!("'{}' cannot be added inside itself", sub_name),
            ));
        }
        let end = node.end_node().ok_or_else(|| {
            OrchestratorError::invalid_placement(schedule_name, "sub-schedule has no end node")
        })?;
        if node.parent().is_some()
            || !node.predecessors().is_empty()
            || !self.node(end)?.successors().is_empty()
        {
            return Err(OrchestratorError::invalid_placement(
                schedule_name,
                format!("'{}' is already placed", sub_name),
            ));
        }
        let inside = |id: Option<NodeId>| id.is_some_and(|id| id == sub || self.is_within(id, sub));
        if inside(anchors.with) || inside(anchors.after) || inside(anchors.before) {
            return Err(OrchestratorError::invalid_placement(
                schedule_name,
                format!("'{}' cannot be anchored on its own contents", sub_name),
            ));
        }
        Ok(end)
    }
}
