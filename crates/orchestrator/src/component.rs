//! Component tree visited by phase traversals.
//!
//! Components implement [`Component`], overriding only the hooks they need.
//! The tree owns them in an arena rooted at an implicit top component whose
//! full name is the empty string.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::UVM_DOMAIN;
use crate::core::PhaseCtx;
use crate::error::{HookResult, OrchestratorError, Result};

/// Per-phase hooks of a testbench component. Every hook defaults to a no-op.
#[async_trait]
pub trait Component: Send + Sync {
    fn build_phase(&self, _phase: &PhaseCtx) -> HookResult {
        Ok(())
    }

    fn connect_phase(&self, _phase: &PhaseCtx) -> HookResult {
        Ok(())
    }

    fn end_of_elaboration_phase(&self, _phase: &PhaseCtx) -> HookResult {
        Ok(())
    }

    fn start_of_simulation_phase(&self, _phase: &PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn run_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    fn extract_phase(&self, _phase: &PhaseCtx) -> HookResult {
        Ok(())
    }

    fn check_phase(&self, _phase: &PhaseCtx) -> HookResult {
        Ok(())
    }

    fn report_phase(&self, _phase: &PhaseCtx) -> HookResult {
        Ok(())
    }

    fn final_phase(&self, _phase: &PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn pre_reset_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn reset_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn post_reset_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn pre_configure_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn configure_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn post_configure_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn pre_main_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn main_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn post_main_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn pre_shutdown_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn shutdown_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    async fn post_shutdown_phase(&self, _phase: PhaseCtx) -> HookResult {
        Ok(())
    }

    /// Fired when a phase this component takes part in enters STARTED.
    fn phase_started(&self, _phase: &PhaseCtx) {}

    /// Fired on every READY_TO_END round; may raise the objection again.
    fn phase_ready_to_end(&self, _phase: &PhaseCtx) {}

    fn phase_ended(&self, _phase: &PhaseCtx) {}

    /// Components that run per-phase default sequences expose them here.
    fn as_sequencer(&self) -> Option<&dyn Sequencer> {
        None
    }
}

/// Notified around task phases to start and stop a phase's default sequence.
pub trait Sequencer: Send + Sync {
    fn start_phase_sequence(&self, phase: &PhaseCtx);
    fn stop_phase_sequence(&self, phase: &PhaseCtx);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(usize);

struct RootComponent;

impl Component for RootComponent {}

struct ComponentEntry {
    name: String,
    full_name: String,
    parent: Option<ComponentId>,
    children: Vec<ComponentId>,
    domain: String,
    component: Arc<dyn Component>,
}

/// Arena of components. Ids are only meaningful for the tree that issued them.
pub struct ComponentTree {
    entries: Vec<ComponentEntry>,
}

impl ComponentTree {
    pub fn new() -> Self {
        Self::with_root(Arc::new(RootComponent))
    }

    /// Use `component` as the top of the tree instead of the empty default.
    pub fn with_root(component: Arc<dyn Component>) -> Self {
        Self {
            entries: vec![ComponentEntry {
                name: String::new(),
                full_name: String::new(),
                parent: None,
                children: Vec::new(),
                domain: UVM_DOMAIN.to_string(),
                component,
            }],
        }
    }

    pub fn root(&self) -> ComponentId {
        ComponentId(0)
    }

    /// Add a child under `parent`. It inherits the parent's domain.
    pub fn add(
        &mut self,
        parent: ComponentId,
        name: &str,
        component: Arc<dyn Component>,
    ) -> Result<ComponentId> {
        let Some(parent_entry) = self.entries.get(parent.0) else {
            return Err(OrchestratorError::InvalidComponent {
                parent: format!("#{}", parent.0),
                name: name.to_string(),
                reason: "parent is not in this tree".to_string(),
            });
        };
        let invalid = |reason: &str| OrchestratorError::InvalidComponent {
            parent: parent_entry.full_name.clone(),
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.contains('.') {
            return Err(invalid("name contains '.'"));
        }
        if parent_entry
            .children
            .iter()
            .any(|child| self.entries[child.0].name == name)
        {
            return Err(invalid("a sibling already has this name"));
        }

        let full_name = if parent_entry.full_name.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", parent_entry.full_name, name)
        };
        let domain = parent_entry.domain.clone();
        let id = ComponentId(self.entries.len());
        self.entries.push(ComponentEntry {
            name: name.to_string(),
            full_name,
            parent: Some(parent),
            children: Vec::new(),
            domain,
            component,
        });
        self.entries[parent.0].children.push(id);
        Ok(id)
    }

    /// Assign a component, and with `hier` its whole subtree, to a domain.
    pub fn set_domain(&mut self, id: ComponentId, domain: &str, hier: bool) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let entry = &mut self.entries[current.0];
            entry.domain = domain.to_string();
            if hier {
                pending.extend(entry.children.iter().copied());
            }
        }
    }

    pub fn name(&self, id: ComponentId) -> &str {
        &self.entries[id.0].name
    }

    pub fn full_name(&self, id: ComponentId) -> &str {
        &self.entries[id.0].full_name
    }

    pub fn parent(&self, id: ComponentId) -> Option<ComponentId> {
        self.entries[id.0].parent
    }

    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        &self.entries[id.0].children
    }

    pub fn domain(&self, id: ComponentId) -> &str {
        &self.entries[id.0].domain
    }

    pub fn component(&self, id: ComponentId) -> Arc<dyn Component> {
        Arc::clone(&self.entries[id.0].component)
    }

    pub fn find(&self, full_name: &str) -> Option<ComponentId> {
        self.entries
            .iter()
            .position(|entry| entry.full_name == full_name)
            .map(ComponentId)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the root is present from construction.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parents before children, siblings in insertion order.
    pub fn top_down(&self) -> Vec<ComponentId> {
        let mut order = Vec::with_capacity(self.entries.len());
        let mut pending = vec![self.root()];
        while let Some(id) = pending.pop() {
            order.push(id);
            pending.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// Children before parents, siblings in insertion order.
    pub fn bottom_up(&self) -> Vec<ComponentId> {
        let mut order = Vec::with_capacity(self.entries.len());
        self.post_order(self.root(), &mut order);
        order
    }

    fn post_order(&self, id: ComponentId, order: &mut Vec<ComponentId>) {
        for child in self.children(id) {
            self.post_order(*child, order);
        }
        order.push(id);
    }
}

impl Default for ComponentTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf;
    impl Component for Leaf {}

    fn sample() -> (ComponentTree, ComponentId, ComponentId, ComponentId) {
        let mut tree = ComponentTree::new();
        let env = tree.add(tree.root(), "env", Arc::new(Leaf)).unwrap();
        let agent = tree.add(env, "agent", Arc::new(Leaf)).unwrap();
        let scoreboard = tree.add(env, "scoreboard", Arc::new(Leaf)).unwrap();
        (tree, env, agent, scoreboard)
    }

    #[test]
    fn test_full_names() {
        let (tree, env, agent, _) = sample();
        assert_eq!(tree.full_name(tree.root()), "");
        assert_eq!(tree.full_name(env), "env");
        assert_eq!(tree.full_name(agent), "env.agent");
        assert_eq!(tree.name(agent), "agent");
        assert_eq!(tree.parent(agent), Some(env));
        assert_eq!(tree.find("env.scoreboard"), Some(ComponentId(3)));
        assert_eq!(tree.find("env.missing"), None);
    }

    #[test]
    fn test_orders() {
        let (tree, env, agent, scoreboard) = sample();
        let root = tree.root();
        assert_eq!(tree.top_down(), vec![root, env, agent, scoreboard]);
        assert_eq!(tree.bottom_up(), vec![agent, scoreboard, env, root]);
    }

    #[test]
    fn test_rejects_bad_names() {
        let (mut tree, env, _, _) = sample();
        assert!(tree.add(env, "agent", Arc::new(Leaf)).is_err());
        assert!(tree.add(env, "a.b", Arc::new(Leaf)).is_err());
        let err = tree.add(env, "", Arc::new(Leaf)).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidComponent { .. }));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_rejects_parent_from_another_tree() {
        let (_, _, _, scoreboard) = sample();
        let mut small = ComponentTree::new();

        let err = small.add(scoreboard, "stray", Arc::new(Leaf)).unwrap_err();
        match err {
            OrchestratorError::InvalidComponent { parent, name, .. } => {
                assert_eq!(parent, "#3");
                assert_eq!(name, "stray");
            }
            other => panic!("expected InvalidComponent, got {:?}", other),
        }
        assert_eq!(small.len(), 1);
    }

    #[test]
    fn test_domains_are_inherited() {
        let (mut tree, env, agent, scoreboard) = sample();
        assert_eq!(tree.domain(agent), UVM_DOMAIN);

        tree.set_domain(env, "fast", true);
        assert_eq!(tree.domain(agent), "fast");
        assert_eq!(tree.domain(scoreboard), "fast");

        tree.set_domain(agent, "slow", false);
        assert_eq!(tree.domain(agent), "slow");
        assert_eq!(tree.domain(env), "fast");

        let late = tree.add(env, "monitor", Arc::new(Leaf)).unwrap();
        assert_eq!(tree.domain(late), "fast");
    }
}
