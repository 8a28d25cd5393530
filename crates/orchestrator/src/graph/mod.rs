//! Arena-backed phase graph.
//!
//! The arena owns every node; predecessor/successor edges are plain index
//! sets. A schedule or domain is a begin node paired with an implicit
//! terminal end node. The `parent` links form a tree overlay, independent of
//! the edges, used for naming and scope-limited search.

mod find;
mod splice;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use phase_core::{JumpDirection, NodeType, PhaseState};
use tokio::sync::watch;

use crate::error::{OrchestratorError, Result};
use crate::objection::Objection;
use crate::phases::PhaseImp;

pub use splice::{Addable, PhaseRef, Placement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A jump requested while the node was active, serviced when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingJump {
    pub target: NodeId,
    pub direction: JumpDirection,
}

pub struct PhaseNode {
    id: NodeId,
    name: String,
    node_type: NodeType,
    parent: Option<NodeId>,
    end_node: Option<NodeId>,
    imp: Option<Arc<PhaseImp>>,
    objection: Option<Arc<Objection>>,
    predecessors: BTreeSet<NodeId>,
    successors: BTreeSet<NodeId>,
    sync: Vec<NodeId>,
    state: watch::Sender<PhaseState>,
    premature_end: watch::Sender<bool>,
    jump: Option<PendingJump>,
    run_count: u32,
    ready_to_end_count: u32,
    outstanding: Arc<AtomicUsize>,
}

impl PhaseNode {
    fn new(id: NodeId, name: String, node_type: NodeType, parent: Option<NodeId>) -> Self {
        let (state, _) = watch::channel(PhaseState::Uninitialized);
        let (premature_end, _) = watch::channel(false);
        Self {
            id,
            name,
            node_type,
            parent,
            end_node: None,
            imp: None,
            objection: None,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            sync: Vec::new(),
            state,
            premature_end,
            jump: None,
            run_count: 0,
            ready_to_end_count: 0,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Only leaf nodes bound to a behavior do real work.
    pub fn is_leaf(&self) -> bool {
        self.node_type == NodeType::Node
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn end_node(&self) -> Option<NodeId> {
        self.end_node
    }

    pub fn imp(&self) -> Option<&Arc<PhaseImp>> {
        self.imp.as_ref()
    }

    pub fn objection(&self) -> Option<&Arc<Objection>> {
        self.objection.as_ref()
    }

    pub fn predecessors(&self) -> &BTreeSet<NodeId> {
        &self.predecessors
    }

    pub fn successors(&self) -> &BTreeSet<NodeId> {
        &self.successors
    }

    pub fn sync_partners(&self) -> &[NodeId] {
        &self.sync
    }

    pub fn state(&self) -> PhaseState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PhaseState> {
        self.state.subscribe()
    }

    pub fn premature_end(&self) -> bool {
        *self.premature_end.borrow()
    }

    pub(crate) fn watch_premature_end(&self) -> watch::Receiver<bool> {
        self.premature_end.subscribe()
    }

    pub fn pending_jump(&self) -> Option<PendingJump> {
        self.jump
    }

    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    pub fn ready_to_end_count(&self) -> u32 {
        self.ready_to_end_count
    }

    /// Task-phase work items spawned for this node that have not returned.
    pub fn outstanding_work(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn outstanding_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.outstanding)
    }

    pub(crate) fn set_objection(&mut self, objection: Arc<Objection>) {
        self.objection = Some(objection);
    }

    pub(crate) fn request_jump(&mut self, jump: PendingJump) {
        self.jump = Some(jump);
        self.premature_end.send_replace(true);
    }

    pub(crate) fn take_jump(&mut self) -> Option<PendingJump> {
        self.jump.take()
    }

    pub(crate) fn reset_jump(&mut self) {
        self.jump = None;
        self.premature_end.send_replace(false);
    }

    pub(crate) fn clear_premature_end(&mut self) {
        self.premature_end.send_replace(false);
    }

    pub(crate) fn bump_run_count(&mut self) -> u32 {
        self.run_count += 1;
        self.run_count
    }

    pub(crate) fn reset_ready_to_end(&mut self) {
        self.ready_to_end_count = 0;
    }

    pub(crate) fn bump_ready_to_end(&mut self) -> u32 {
        self.ready_to_end_count += 1;
        self.ready_to_end_count
    }

    /// Write a new state and return the previous one.
    pub(crate) fn replace_state(&self, next: PhaseState) -> PhaseState {
        self.state.send_replace(next)
    }
}

impl fmt::Debug for PhaseNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("node_type", &self.node_type)
            .field("state", &self.state())
            .field("predecessors", &self.predecessors)
            .field("successors", &self.successors)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct PhaseGraph {
    nodes: Vec<PhaseNode>,
}

impl PhaseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|node| node.id)
    }

    pub fn node(&self, id: NodeId) -> Result<&PhaseNode> {
        self.nodes
            .get(id.0)
            .ok_or(OrchestratorError::UnknownNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut PhaseNode> {
        self.nodes
            .get_mut(id.0)
            .ok_or(OrchestratorError::UnknownNode(id))
    }

    /// Create a node. Schedules and domains also get their terminal end node.
    pub(crate) fn create_node(
        &mut self,
        name: &str,
        node_type: NodeType,
        parent: Option<NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(PhaseNode::new(id, name.to_string(), node_type, parent));

        if node_type.is_container() {
            let end = NodeId(self.nodes.len());
            self.nodes.push(PhaseNode::new(
                end,
                format!("{}_end", name),
                NodeType::Terminal,
                Some(id),
            ));
            self.nodes[id.0].end_node = Some(end);
            self.link(id, end);
        }
        id
    }

    pub(crate) fn bind_imp(&mut self, id: NodeId, imp: Arc<PhaseImp>) -> Result<()> {
        self.node_mut(id)?.imp = Some(imp);
        Ok(())
    }

    pub(crate) fn set_parent(&mut self, id: NodeId, parent: NodeId) -> Result<()> {
        self.node_mut(id)?.parent = Some(parent);
        Ok(())
    }

    pub(crate) fn link(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.0].successors.insert(to);
        self.nodes[to.0].predecessors.insert(from);
    }

    pub(crate) fn unlink(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.0].successors.remove(&to);
        self.nodes[to.0].predecessors.remove(&from);
    }

    /// Pair two nodes for SYNCING rendezvous. Returns false if already paired.
    pub(crate) fn link_sync(&mut self, a: NodeId, b: NodeId) -> bool {
        let mut changed = false;
        if !self.nodes[a.0].sync.contains(&b) {
            self.nodes[a.0].sync.push(b);
            changed = true;
        }
        if !self.nodes[b.0].sync.contains(&a) {
            self.nodes[b.0].sync.push(a);
            changed = true;
        }
        changed
    }

    pub(crate) fn unlink_sync(&mut self, a: NodeId, b: NodeId) -> bool {
        let before = self.nodes[a.0].sync.len() + self.nodes[b.0].sync.len();
        self.nodes[a.0].sync.retain(|n| *n != b);
        self.nodes[b.0].sync.retain(|n| *n != a);
        before != self.nodes[a.0].sync.len() + self.nodes[b.0].sync.len()
    }

    /// Hierarchical name: `domain.schedule.node`, stopping at the nearest domain.
    pub fn full_name(&self, id: NodeId) -> String {
        let Some(node) = self.nodes.get(id.0) else {
            return id.to_string();
        };
        if matches!(node.node_type, NodeType::Domain | NodeType::Imp) {
            return node.name.clone();
        }

        let mut parts = vec![node.name.as_str()];
        let mut current = node.parent;
        while let Some(parent) = current.and_then(|p| self.nodes.get(p.0)) {
            parts.push(parent.name.as_str());
            if parent.node_type == NodeType::Domain {
                break;
            }
            current = parent.parent;
        }
        parts.reverse();
        parts.join(".")
    }

    /// The schedule a node belongs to; `None` for domains, terminals and
    /// leaves placed directly in a domain.
    pub fn schedule_of(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(id.0)?;
        match node.node_type {
            NodeType::Schedule => Some(id),
            NodeType::Node => {
                let parent = self.nodes.get(node.parent?.0)?;
                (parent.node_type != NodeType::Domain).then_some(parent.id)
            }
            _ => None,
        }
    }

    /// Nearest enclosing domain, the node itself included.
    pub fn domain_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.nodes.get(c.0)) {
            if node.node_type == NodeType::Domain {
                return Some(node.id);
            }
            current = node.parent;
        }
        None
    }

    /// Whether `container` appears on the parent chain of `id`.
    pub fn is_within(&self, id: NodeId, container: NodeId) -> bool {
        let mut current = self.nodes.get(id.0).and_then(|n| n.parent);
        while let Some(parent) = current {
            if parent == container {
                return true;
            }
            current = self.nodes.get(parent.0).and_then(|n| n.parent);
        }
        false
    }

    /// Every node nested under `container` through parent links.
    pub fn transitive_children(&self, container: NodeId) -> Vec<NodeId> {
        self.ids()
            .filter(|id| self.is_within(*id, container))
            .collect()
    }

    /// Reset `id` and everything after it to `state`, stopping at `end_state`.
    ///
    /// Returns the `(node, previous)` pairs that were rewritten, in visiting order.
    pub(crate) fn clear_successors(
        &self,
        id: NodeId,
        state: PhaseState,
        end_state: Option<NodeId>,
    ) -> Vec<(NodeId, PhaseState)> {
        let mut changed = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if Some(current) == end_state || !seen.insert(current) {
                continue;
            }
            let node = &self.nodes[current.0];
            let prev = node.replace_state(state);
            if let Some(objection) = &node.objection {
                objection.clear();
            }
            changed.push((current, prev));
            stack.extend(node.successors.iter().rev());
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(graph: &mut PhaseGraph, domain: NodeId, names: &[&str]) -> Vec<NodeId> {
        let end = graph.node(domain).unwrap().end_node().unwrap();
        let mut prev = domain;
        let mut ids = Vec::new();
        graph.unlink(domain, end);
        for name in names {
            let id = graph.create_node(name, NodeType::Node, Some(domain));
            graph.link(prev, id);
            prev = id;
            ids.push(id);
        }
        graph.link(prev, end);
        ids
    }

    #[test]
    fn test_container_gets_end_node() {
        let mut graph = PhaseGraph::new();
        let domain = graph.create_node("dom", NodeType::Domain, None);
        let end = graph.node(domain).unwrap().end_node().unwrap();

        assert_eq!(graph.node(end).unwrap().node_type(), NodeType::Terminal);
        assert_eq!(graph.node(end).unwrap().name(), "dom_end");
        assert!(graph.node(domain).unwrap().successors().contains(&end));
        assert!(graph.node(end).unwrap().predecessors().contains(&domain));
        assert!(graph.node(end).unwrap().successors().is_empty());
    }

    #[test]
    fn test_full_name_stops_at_domain() {
        let mut graph = PhaseGraph::new();
        let outer = graph.create_node("common", NodeType::Domain, None);
        let domain = graph.create_node("uvm", NodeType::Domain, Some(outer));
        let sched = graph.create_node("uvm_sched", NodeType::Schedule, Some(domain));
        let main = graph.create_node("main", NodeType::Node, Some(sched));

        assert_eq!(graph.full_name(domain), "uvm");
        assert_eq!(graph.full_name(sched), "uvm.uvm_sched");
        assert_eq!(graph.full_name(main), "uvm.uvm_sched.main");
        assert_eq!(graph.schedule_of(main), Some(sched));
        assert_eq!(graph.domain_of(main), Some(domain));
        assert_eq!(graph.domain_of(outer), Some(outer));
        assert!(graph.is_within(main, outer));
        assert!(!graph.is_within(outer, main));
    }

    #[test]
    fn test_leaf_in_domain_has_no_schedule() {
        let mut graph = PhaseGraph::new();
        let domain = graph.create_node("common", NodeType::Domain, None);
        let build = graph.create_node("build", NodeType::Node, Some(domain));
        assert_eq!(graph.schedule_of(build), None);
        assert_eq!(graph.full_name(build), "common.build");
    }

    #[test]
    fn test_clear_successors_stops_at_end_state() {
        let mut graph = PhaseGraph::new();
        let domain = graph.create_node("dom", NodeType::Domain, None);
        let ids = linear(&mut graph, domain, &["a", "b", "c", "d"]);
        for id in graph.ids().collect::<Vec<_>>() {
            graph.node(id).unwrap().replace_state(PhaseState::Executing);
        }

        let changed = graph.clear_successors(ids[0], PhaseState::Done, Some(ids[2]));
        let touched: Vec<_> = changed.iter().map(|(id, _)| *id).collect();
        assert_eq!(touched, vec![ids[0], ids[1]]);
        assert_eq!(graph.node(ids[1]).unwrap().state(), PhaseState::Done);
        assert_eq!(graph.node(ids[2]).unwrap().state(), PhaseState::Executing);
    }

    #[test]
    fn test_sync_links_are_symmetric_and_unique() {
        let mut graph = PhaseGraph::new();
        let a = graph.create_node("a", NodeType::Node, None);
        let b = graph.create_node("b", NodeType::Node, None);

        assert!(graph.link_sync(a, b));
        assert!(!graph.link_sync(b, a));
        assert_eq!(graph.node(a).unwrap().sync_partners(), &[b]);
        assert_eq!(graph.node(b).unwrap().sync_partners(), &[a]);

        assert!(graph.unlink_sync(a, b));
        assert!(graph.node(a).unwrap().sync_partners().is_empty());
        assert!(!graph.unlink_sync(a, b));
    }

    #[test]
    fn test_unknown_node() {
        let graph = PhaseGraph::new();
        assert!(matches!(
            graph.node(NodeId(3)),
            Err(OrchestratorError::UnknownNode(_))
        ));
    }
}
