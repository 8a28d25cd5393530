//! Component traversal strategies.
//!
//! A traversal decides in which order the component tree is visited and what
//! the EXECUTING visit does. STARTED, READY_TO_END and ENDED visits are the
//! same for every strategy: they fire the component's state hooks.

use std::sync::Arc;

use futures::future::BoxFuture;
use phase_core::{PhaseKind, PhaseState};
use tracing::{info, trace};

use crate::component::{Component, ComponentId, ComponentTree};
use crate::context::{Phasing, COMMON_DOMAIN};
use crate::core::PhaseCtx;
use crate::error::{HookResult, OrchestratorError, Result};
use crate::graph::NodeId;
use crate::resources::TaskPhaseGuard;

pub type FuncHook = Arc<dyn Fn(&dyn Component, &PhaseCtx) -> HookResult + Send + Sync>;
pub type TaskHook =
    Arc<dyn Fn(Arc<dyn Component>, PhaseCtx) -> BoxFuture<'static, HookResult> + Send + Sync>;

pub trait Traversal: Send + Sync {
    fn kind(&self) -> PhaseKind;

    /// Component visiting order.
    fn order(&self, tree: &ComponentTree) -> Vec<ComponentId>;

    /// The EXECUTING visit of one component.
    fn execute(
        &self,
        component: Arc<dyn Component>,
        ctx: PhaseCtx,
        procs: &mut TaskPhaseGuard,
    ) -> HookResult;
}

pub struct BottomUpTraversal {
    hook: FuncHook,
}

impl BottomUpTraversal {
    pub fn new(hook: FuncHook) -> Self {
        Self { hook }
    }
}

impl Traversal for BottomUpTraversal {
    fn kind(&self) -> PhaseKind {
        PhaseKind::BottomUp
    }

    fn order(&self, tree: &ComponentTree) -> Vec<ComponentId> {
        tree.bottom_up()
    }

    fn execute(
        &self,
        component: Arc<dyn Component>,
        ctx: PhaseCtx,
        _: &mut TaskPhaseGuard,
    ) -> HookResult {
        (self.hook)(component.as_ref(), &ctx)
    }
}

pub struct TopDownTraversal {
    hook: FuncHook,
}

impl TopDownTraversal {
    pub fn new(hook: FuncHook) -> Self {
        Self { hook }
    }
}

impl Traversal for TopDownTraversal {
    fn kind(&self) -> PhaseKind {
        PhaseKind::TopDown
    }

    fn order(&self, tree: &ComponentTree) -> Vec<ComponentId> {
        tree.top_down()
    }

    fn execute(
        &self,
        component: Arc<dyn Component>,
        ctx: PhaseCtx,
        _: &mut TaskPhaseGuard,
    ) -> HookResult {
        (self.hook)(component.as_ref(), &ctx)
    }
}

/// Spawns one work item per component; never waits for them.
pub struct TaskTraversal {
    hook: TaskHook,
}

impl TaskTraversal {
    pub fn new(hook: TaskHook) -> Self {
        Self { hook }
    }
}

impl Traversal for TaskTraversal {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Task
    }

    fn order(&self, tree: &ComponentTree) -> Vec<ComponentId> {
        tree.top_down()
    }

    fn execute(
        &self,
        component: Arc<dyn Component>,
        ctx: PhaseCtx,
        procs: &mut TaskPhaseGuard,
    ) -> HookResult {
        let label = ctx.component().to_string();
        procs.spawn(label, (self.hook)(component, ctx));
        Ok(())
    }
}

/// Visit the component tree for one phase state.
///
/// Components whose domain differs from the phase's domain are skipped,
/// except in the common domain which visits everyone.
pub(crate) fn traverse(
    traversal: &dyn Traversal,
    tree: &ComponentTree,
    phasing: &Phasing,
    node: NodeId,
    imp_name: &str,
    state: PhaseState,
    procs: &mut TaskPhaseGuard,
) -> Result<()> {
    let phase = phasing.full_name(node)?;
    let domain = phasing.domain_name(node)?;
    let is_task = traversal.kind().is_task();

    for id in traversal.order(tree) {
        if domain != COMMON_DOMAIN && tree.domain(id) != domain {
            continue;
        }
        let component = tree.component(id);
        let ctx = PhaseCtx::new(phasing.clone(), node, imp_name, tree.full_name(id));
        if phasing.config().phase_trace {
            info!(phase = %phase, component = %tree.full_name(id), state = %state, "Traversing component");
        } else {
            trace!(phase = %phase, component = %tree.full_name(id), state = %state, "Traversing component");
        }

        match state {
            PhaseState::Started => {
                component.phase_started(&ctx);
                if is_task {
                    if let Some(sequencer) = component.as_sequencer() {
                        sequencer.start_phase_sequence(&ctx);
                    }
                }
            }
            PhaseState::Executing => {
                traversal
                    .execute(Arc::clone(&component), ctx, procs)
                    .map_err(|source| {
                        OrchestratorError::hook_failed(&phase, state, tree.full_name(id), source)
                    })?;
            }
            PhaseState::ReadyToEnd => component.phase_ready_to_end(&ctx),
            PhaseState::Ended => {
                component.phase_ended(&ctx);
                if is_task {
                    if let Some(sequencer) = component.as_sequencer() {
                        sequencer.stop_phase_sequence(&ctx);
                    }
                }
            }
            other => {
                return Err(OrchestratorError::InvalidTraversalState {
                    phase,
                    state: other,
                })
            }
        }
    }
    Ok(())
}
