//! Searches over the phase graph.

use std::collections::{BTreeSet, VecDeque};

use phase_core::NodeType;

use super::{NodeId, PhaseGraph, PhaseRef};

#[derive(Clone, Copy)]
enum Direction {
    Backward,
    Forward,
}

impl PhaseGraph {
    pub fn matches(&self, id: NodeId, target: &PhaseRef) -> bool {
        let Ok(node) = self.node(id) else {
            return false;
        };
        match target {
            PhaseRef::Node(want) => *want == id,
            PhaseRef::Imp(name) => node.imp().is_some_and(|imp| imp.name() == name),
            PhaseRef::Named(name) => node.name() == name,
        }
    }

    /// Search predecessors first, then successors, starting at `scope`
    /// itself. With `stay_in_scope` the walk only enters nodes sharing the
    /// starting node's schedule or domain.
    pub fn find(&self, scope: NodeId, target: &PhaseRef, stay_in_scope: bool) -> Option<NodeId> {
        self.find_predecessor(scope, target, stay_in_scope)
            .or_else(|| self.find_successor(scope, target, stay_in_scope))
    }

    pub fn find_predecessor(
        &self,
        from: NodeId,
        target: &PhaseRef,
        stay_in_scope: bool,
    ) -> Option<NodeId> {
        self.walk(from, target, stay_in_scope, Direction::Backward)
    }

    pub fn find_successor(
        &self,
        from: NodeId,
        target: &PhaseRef,
        stay_in_scope: bool,
    ) -> Option<NodeId> {
        self.walk(from, target, stay_in_scope, Direction::Forward)
    }

    fn walk(
        &self,
        from: NodeId,
        target: &PhaseRef,
        stay_in_scope: bool,
        direction: Direction,
    ) -> Option<NodeId> {
        let schedule = self.schedule_of(from);
        let domain = self.domain_of(from);
        let in_scope = |id: NodeId| {
            !stay_in_scope
                || (schedule.is_some() && self.schedule_of(id) == schedule)
                || self.domain_of(id) == domain
        };

        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if self.matches(id, target) {
                return Some(id);
            }
            let Ok(node) = self.node(id) else {
                continue;
            };
            let next = match direction {
                Direction::Backward => node.predecessors(),
                Direction::Forward => node.successors(),
            };
            stack.extend(next.iter().rev().copied().filter(|n| in_scope(*n)));
        }
        None
    }

    /// Whether `to` is reachable from `from` along successor edges.
    pub fn is_before(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return false;
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            let Ok(node) = self.node(id) else {
                continue;
            };
            for succ in node.successors() {
                if *succ == to {
                    return true;
                }
                if seen.insert(*succ) {
                    queue.push_back(*succ);
                }
            }
        }
        false
    }

    pub fn is_after(&self, from: NodeId, to: NodeId) -> bool {
        self.is_before(to, from)
    }

    /// Breadth-first order from `start` along successor edges.
    pub fn bfs_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let Ok(node) = self.node(id) else {
                continue;
            };
            for succ in node.successors() {
                if seen.insert(*succ) {
                    queue.push_back(*succ);
                }
            }
        }
        order
    }

    /// Nearest leaf successors: container begin/end nodes are looked through.
    pub fn adjacent_successor_nodes(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut pending: Vec<NodeId> = self
            .node(id)
            .map(|n| n.successors().iter().copied().collect())
            .unwrap_or_default();
        while let Some(next) = pending.pop() {
            if !seen.insert(next) {
                continue;
            }
            match self.node(next) {
                Ok(node) if node.node_type() == NodeType::Node => {
                    found.insert(next);
                }
                Ok(node) => pending.extend(node.successors().iter().copied()),
                Err(_) => {}
            }
        }
        found
    }

    /// Leaf nodes that share a successor with `id` (its siblings), `id` excluded.
    pub fn predecessors_for_successors(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut siblings = BTreeSet::new();
        for succ in self.adjacent_successor_nodes(id) {
            let mut seen = BTreeSet::new();
            let mut pending: Vec<NodeId> = self
                .node(succ)
                .map(|n| n.predecessors().iter().copied().collect())
                .unwrap_or_default();
            while let Some(pred) = pending.pop() {
                if !seen.insert(pred) {
                    continue;
                }
                match self.node(pred) {
                    Ok(node) if node.node_type() == NodeType::Node => {
                        siblings.insert(pred);
                    }
                    Ok(node) => pending.extend(node.predecessors().iter().copied()),
                    Err(_) => {}
                }
            }
        }
        siblings.remove(&id);
        siblings
    }

    /// Kahn's algorithm over the whole arena.
    pub fn has_cycle(&self) -> bool {
        let mut in_degree: Vec<usize> = self
            .ids()
            .map(|id| self.node(id).map(|n| n.predecessors().len()).unwrap_or(0))
            .collect();
        let mut ready: Vec<NodeId> = self.ids().filter(|id| in_degree[id.index()] == 0).collect();
        let mut visited = 0;
        while let Some(id) = ready.pop() {
            visited += 1;
            let Ok(node) = self.node(id) else {
                continue;
            };
            for succ in node.successors() {
                in_degree[succ.index()] -= 1;
                if in_degree[succ.index()] == 0 {
                    ready.push(*succ);
                }
            }
        }
        visited != self.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{Addable, Placement};
    use crate::phases::PhaseImp;

    fn imp(name: &str) -> Arc<PhaseImp> {
        PhaseImp::bottom_up(name, |_, _| Ok(()))
    }

    fn add(graph: &mut PhaseGraph, schedule: NodeId, name: &str, placement: Placement) -> NodeId {
        graph.splice(schedule, imp(name).into(), placement).unwrap().0
    }

    #[test]
    fn test_find_prefers_predecessors() {
        let mut graph = PhaseGraph::new();
        let sched = graph.create_node("s", NodeType::Schedule, None);
        let a = add(&mut graph, sched, "a", Placement::new());
        let b = add(&mut graph, sched, "b", Placement::new());
        let c = add(&mut graph, sched, "c", Placement::new());

        assert_eq!(graph.find(b, &PhaseRef::from("a"), true), Some(a));
        assert_eq!(graph.find(b, &PhaseRef::from("c"), true), Some(c));
        assert_eq!(graph.find(b, &PhaseRef::from("b"), true), Some(b));
        assert_eq!(graph.find_predecessor(b, &PhaseRef::from("c"), false), None);
        assert_eq!(graph.find(b, &PhaseRef::from("zz"), false), None);
    }

    #[test]
    fn test_find_by_imp_skips_containers() {
        let mut graph = PhaseGraph::new();
        let sched = graph.create_node("main", NodeType::Schedule, None);
        let leaf = add(&mut graph, sched, "main", Placement::new());

        assert_eq!(graph.find(sched, &PhaseRef::Imp("main".to_string()), true), Some(leaf));
        assert_eq!(graph.find(sched, &PhaseRef::from("main"), true), Some(sched));
    }

    #[test]
    fn test_stay_in_scope_blocks_other_domains() {
        let mut graph = PhaseGraph::new();
        let outer = graph.create_node("outer", NodeType::Domain, None);
        let inner = graph.create_node("inner", NodeType::Domain, None);
        add(&mut graph, inner, "deep", Placement::new());
        let first = add(&mut graph, outer, "first", Placement::new());
        graph
            .splice(outer, Addable::Schedule(inner), Placement::new())
            .unwrap();

        assert_eq!(graph.find(first, &PhaseRef::from("deep"), true), None);
        assert!(graph.find(first, &PhaseRef::from("deep"), false).is_some());
    }

    #[test]
    fn test_is_before_and_after() {
        let mut graph = PhaseGraph::new();
        let sched = graph.create_node("s", NodeType::Schedule, None);
        let a = add(&mut graph, sched, "a", Placement::new());
        let b = add(&mut graph, sched, "b", Placement::new());

        assert!(graph.is_before(a, b));
        assert!(!graph.is_before(b, a));
        assert!(graph.is_after(b, a));
        assert!(!graph.is_before(a, a));
    }

    #[test]
    fn test_siblings_look_through_containers() {
        // dom: a -> [sub: x] -> end, with p parallel to sub
        let mut graph = PhaseGraph::new();
        let dom = graph.create_node("dom", NodeType::Domain, None);
        let sub = graph.create_node("sub", NodeType::Schedule, None);
        let x = add(&mut graph, sub, "x", Placement::new());
        let a = add(&mut graph, dom, "a", Placement::new());
        graph
            .splice(dom, Addable::Schedule(sub), Placement::new())
            .unwrap();
        let p = add(&mut graph, dom, "p", Placement::new().with_phase(a));

        assert_eq!(graph.adjacent_successor_nodes(a), BTreeSet::from([x]));
        assert_eq!(graph.predecessors_for_successors(a), BTreeSet::from([p]));
        assert!(graph.adjacent_successor_nodes(x).is_empty());
    }

    #[test]
    fn test_bfs_and_acyclic() {
        let mut graph = PhaseGraph::new();
        let sched = graph.create_node("s", NodeType::Schedule, None);
        let a = add(&mut graph, sched, "a", Placement::new());
        let b = add(&mut graph, sched, "b", Placement::new().with_phase(a));
        let order = graph.bfs_from(sched);
        assert_eq!(order[0], sched);
        assert!(order.contains(&a) && order.contains(&b));
        assert!(!graph.has_cycle());

        graph.link(b, sched);
        assert!(graph.has_cycle());
    }
}
