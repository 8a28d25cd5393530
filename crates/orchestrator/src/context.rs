//! Shared phasing context.
//!
//! [`Phasing`] owns the phase graph, the domain registry and the event
//! emitter. It is cheap to clone; every clone refers to the same graph. All
//! graph mutation goes through it so state changes are validated, traced and
//! published in one place.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use events::{Event, EventBus, EventEnvelope};
use futures::future::try_join_all;
use phase_core::{JumpDirection, NodeType, PhaseState, StateOp};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use crate::config::RunConfig;
use crate::core::{next_quantum, OrderedEventEmitter};
use crate::error::{OrchestratorError, Result};
use crate::graph::{Addable, NodeId, PendingJump, PhaseGraph, PhaseRef, Placement};
use crate::objection::Objection;
use crate::phases::{ImpRegistry, PhaseImp, StandardPhase};
use crate::state_machine::PhaseStateMachine;

pub const COMMON_DOMAIN: &str = "common";
pub const UVM_DOMAIN: &str = "uvm";
pub const UVM_SCHEDULE: &str = "uvm_sched";

/// Point-in-time view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: usize,
    pub full_name: String,
    pub node_type: NodeType,
    pub state: PhaseState,
    pub run_count: u32,
}

#[derive(Default)]
struct StandardDomains {
    common: Option<NodeId>,
    uvm: Option<NodeId>,
    uvm_schedule: Option<NodeId>,
}

struct PhasingInner {
    config: RunConfig,
    emitter: OrderedEventEmitter,
    graph: RwLock<PhaseGraph>,
    domains: RwLock<BTreeMap<String, NodeId>>,
    standard: Mutex<StandardDomains>,
    executing: Mutex<BTreeSet<NodeId>>,
    fatal: Mutex<Option<OrchestratorError>>,
    aborted: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Phasing {
    inner: Arc<PhasingInner>,
}

impl Phasing {
    pub fn new(config: RunConfig) -> Self {
        Self::with_event_bus(config, EventBus::new())
    }

    pub fn with_event_bus(config: RunConfig, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(PhasingInner {
                config,
                emitter: OrderedEventEmitter::new(bus),
                graph: RwLock::new(PhaseGraph::new()),
                domains: RwLock::new(BTreeMap::new()),
                standard: Mutex::new(StandardDomains::default()),
                executing: Mutex::new(BTreeSet::new()),
                fatal: Mutex::new(None),
                aborted: watch::channel(false).0,
            }),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.inner.config
    }

    /// Park a fatal error raised inside a hook so the executor ends the run
    /// with it. The first error wins; the hook gets an `ExecutionAborted`
    /// carrying the same message.
    pub(crate) fn abort(&self, error: OrchestratorError) -> OrchestratorError {
        let message = error.to_string();
        error!(error = %message, "Fatal error raised from a hook, aborting run");
        {
            let mut slot = self.inner.fatal.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.inner.aborted.send_replace(true);
        OrchestratorError::ExecutionAborted(message)
    }

    pub(crate) fn is_aborted(&self) -> bool {
        *self.inner.aborted.borrow()
    }

    pub(crate) fn watch_aborted(&self) -> watch::Receiver<bool> {
        self.inner.aborted.subscribe()
    }

    pub(crate) fn take_fatal(&self) -> Option<OrchestratorError> {
        self.inner
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Forget any abort left by a previous run.
    pub(crate) fn rearm(&self) {
        if let Some(e) = self.take_fatal() {
            debug!(error = %e, "Discarding fatal error left by a previous run");
        }
        self.inner.aborted.send_replace(false);
    }

    pub fn registry(&self) -> &'static ImpRegistry {
        ImpRegistry::global()
    }

    pub fn events(&self) -> &EventBus {
        self.inner.emitter.bus()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.emitter.subscribe()
    }

    pub(crate) fn emitter(&self) -> &OrderedEventEmitter {
        &self.inner.emitter
    }

    fn graph(&self) -> RwLockReadGuard<'_, PhaseGraph> {
        self.inner.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn graph_mut(&self) -> RwLockWriteGuard<'_, PhaseGraph> {
        self.inner.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against a read-locked view of the graph. `f` must not call
    /// back into this context.
    pub fn with_graph<R>(&self, f: impl FnOnce(&PhaseGraph) -> R) -> R {
        f(&self.graph())
    }

    // Construction

    /// A fresh, unplaced schedule with its end node, both DORMANT.
    pub fn new_schedule(&self, name: &str) -> NodeId {
        self.new_container(name, NodeType::Schedule)
    }

    fn new_container(&self, name: &str, node_type: NodeType) -> NodeId {
        let (begin, end) = {
            let mut graph = self.graph_mut();
            let begin = graph.create_node(name, node_type, None);
            let end = graph.node(begin).ok().and_then(|n| n.end_node());
            (begin, end)
        };
        for id in std::iter::once(begin).chain(end) {
            self.publish_forced(id, PhaseState::Dormant);
        }
        debug!(name, node_type = %node_type, "Created container");
        begin
    }

    /// Get or create the domain named `name`. `common` and `uvm` come
    /// pre-populated with the standard phases.
    pub fn domain(&self, name: &str) -> Result<NodeId> {
        match name {
            COMMON_DOMAIN => self.common_domain(),
            UVM_DOMAIN => self.uvm_domain(),
            _ => Ok(self.get_or_create_domain(name)),
        }
    }

    fn get_or_create_domain(&self, name: &str) -> NodeId {
        if let Some(id) = self.find_domain(name) {
            return id;
        }
        let mut domains = self
            .inner
            .domains
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = domains.get(name) {
            return *id;
        }
        let id = self.new_container(name, NodeType::Domain);
        domains.insert(name.to_string(), id);
        id
    }

    pub fn find_domain(&self, name: &str) -> Option<NodeId> {
        self.inner
            .domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    /// Registered domains by name.
    pub fn domains(&self) -> Vec<(String, NodeId)> {
        self.inner
            .domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }

    /// The `common` domain: build through final, with the `uvm` domain
    /// running in parallel with `run`. Built once.
    pub fn common_domain(&self) -> Result<NodeId> {
        let mut standard = self.inner.standard.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = standard.common {
            return Ok(id);
        }

        let common = self.get_or_create_domain(COMMON_DOMAIN);
        for phase in StandardPhase::COMMON {
            self.add(common, phase, Placement::new())?;
        }
        let uvm = self.ensure_uvm(&mut standard)?;
        let run = self
            .find(common, StandardPhase::Run, true)?
            .ok_or_else(|| OrchestratorError::PhaseNotFound {
                schedule: COMMON_DOMAIN.to_string(),
                role: "with",
                target: StandardPhase::Run.name().to_string(),
            })?;
        self.add(common, uvm, Placement::new().with_phase(run))?;

        info!("Common domain constructed");
        standard.common = Some(common);
        Ok(common)
    }

    /// The `uvm` domain holding the runtime schedule. Built once.
    pub fn uvm_domain(&self) -> Result<NodeId> {
        let mut standard = self.inner.standard.lock().unwrap_or_else(PoisonError::into_inner);
        self.ensure_uvm(&mut standard)
    }

    /// The `uvm_sched` schedule inside the `uvm` domain.
    pub fn uvm_schedule(&self) -> Result<NodeId> {
        let mut standard = self.inner.standard.lock().unwrap_or_else(PoisonError::into_inner);
        self.ensure_uvm(&mut standard)?;
        standard
            .uvm_schedule
            .ok_or_else(|| OrchestratorError::ExecutionAborted("runtime schedule missing".into()))
    }

    fn ensure_uvm(&self, standard: &mut StandardDomains) -> Result<NodeId> {
        if let Some(id) = standard.uvm {
            return Ok(id);
        }
        let uvm = self.get_or_create_domain(UVM_DOMAIN);
        let schedule = self.new_schedule(UVM_SCHEDULE);
        for phase in StandardPhase::RUNTIME {
            self.add(schedule, phase, Placement::new())?;
        }
        self.add(uvm, schedule, Placement::new())?;
        standard.uvm = Some(uvm);
        standard.uvm_schedule = Some(schedule);
        Ok(uvm)
    }

    /// Place a behavior or sub-schedule into `schedule`. Returns the node
    /// created for a behavior, or the sub-schedule's begin node.
    pub fn add(
        &self,
        schedule: NodeId,
        item: impl Into<Addable>,
        placement: Placement,
    ) -> Result<NodeId> {
        let item = item.into();
        let (begin, end) = {
            let mut graph = self.graph_mut();
            let (begin, end) = graph.splice(schedule, item, placement)?;
            let is_task = graph
                .node(begin)?
                .imp()
                .is_some_and(|imp| imp.kind().is_task());
            if is_task {
                let objection = Objection::new(graph.full_name(begin))
                    .with_emitter(self.inner.emitter.clone())
                    .with_drain_time(self.config().drain_time())
                    .with_trace(self.config().trace_objections);
                graph.node_mut(begin)?.set_objection(Arc::new(objection));
            }
            debug!(
                schedule = %graph.full_name(schedule),
                phase = %graph.full_name(begin),
                "Added phase"
            );
            (begin, end)
        };

        self.publish_forced(begin, PhaseState::Dormant);
        if end != begin {
            self.publish_forced(end, PhaseState::Dormant);
        }
        Ok(begin)
    }

    // Queries

    pub fn name(&self, id: NodeId) -> Result<String> {
        Ok(self.graph().node(id)?.name().to_string())
    }

    pub fn full_name(&self, id: NodeId) -> Result<String> {
        let graph = self.graph();
        graph.node(id)?;
        Ok(graph.full_name(id))
    }

    pub fn node_type(&self, id: NodeId) -> Result<NodeType> {
        Ok(self.graph().node(id)?.node_type())
    }

    pub fn state(&self, id: NodeId) -> Result<PhaseState> {
        Ok(self.graph().node(id)?.state())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.graph().node(id)?.parent())
    }

    pub fn end_node(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.graph().node(id)?.end_node())
    }

    pub fn imp(&self, id: NodeId) -> Result<Option<Arc<PhaseImp>>> {
        Ok(self.graph().node(id)?.imp().cloned())
    }

    pub fn predecessors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.graph().node(id)?.predecessors().iter().copied().collect())
    }

    pub fn successors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.graph().node(id)?.successors().iter().copied().collect())
    }

    pub fn sync_partners(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.graph().node(id)?.sync_partners().to_vec())
    }

    /// Leaf nodes sharing a successor with `id`.
    pub fn siblings(&self, id: NodeId) -> Result<BTreeSet<NodeId>> {
        let graph = self.graph();
        graph.node(id)?;
        Ok(graph.predecessors_for_successors(id))
    }

    pub fn schedule_of(&self, id: NodeId) -> Result<Option<NodeId>> {
        let graph = self.graph();
        graph.node(id)?;
        Ok(graph.schedule_of(id))
    }

    pub fn domain_of(&self, id: NodeId) -> Result<Option<NodeId>> {
        let graph = self.graph();
        graph.node(id)?;
        Ok(graph.domain_of(id))
    }

    /// Name of the enclosing domain, empty when the node is not in one.
    pub fn domain_name(&self, id: NodeId) -> Result<String> {
        let graph = self.graph();
        graph.node(id)?;
        Ok(graph
            .domain_of(id)
            .and_then(|d| graph.node(d).ok())
            .map(|d| d.name().to_string())
            .unwrap_or_default())
    }

    /// The objection of a task-phase node.
    pub fn objection(&self, id: NodeId) -> Result<Arc<Objection>> {
        let graph = self.graph();
        let node = graph.node(id)?;
        node.objection()
            .cloned()
            .ok_or_else(|| OrchestratorError::NoObjection {
                phase: graph.full_name(id),
                state: node.state(),
            })
    }

    pub(crate) fn objection_of(&self, id: NodeId) -> Result<Option<Arc<Objection>>> {
        Ok(self.graph().node(id)?.objection().cloned())
    }

    pub fn run_count(&self, id: NodeId) -> Result<u32> {
        Ok(self.graph().node(id)?.run_count())
    }

    pub fn ready_to_end_count(&self, id: NodeId) -> Result<u32> {
        Ok(self.graph().node(id)?.ready_to_end_count())
    }

    pub fn pending_jump(&self, id: NodeId) -> Result<Option<PendingJump>> {
        Ok(self.graph().node(id)?.pending_jump())
    }

    /// Task-phase work items of `id` still running.
    pub fn outstanding_work(&self, id: NodeId) -> Result<usize> {
        Ok(self.graph().node(id)?.outstanding_work())
    }

    pub fn is_before(&self, a: NodeId, b: NodeId) -> Result<bool> {
        let graph = self.graph();
        graph.node(a)?;
        graph.node(b)?;
        Ok(graph.is_before(a, b))
    }

    pub fn is_after(&self, a: NodeId, b: NodeId) -> Result<bool> {
        self.is_before(b, a)
    }

    /// Search predecessors, then successors, of `scope` for `target`.
    pub fn find(
        &self,
        scope: NodeId,
        target: impl Into<PhaseRef>,
        stay_in_scope: bool,
    ) -> Result<Option<NodeId>> {
        let graph = self.graph();
        graph.node(scope)?;
        Ok(graph.find(scope, &target.into(), stay_in_scope))
    }

    /// Like [`Phasing::find`], matching node names rather than behaviors.
    pub fn find_by_name(
        &self,
        scope: NodeId,
        name: &str,
        stay_in_scope: bool,
    ) -> Result<Option<NodeId>> {
        self.find(scope, PhaseRef::Named(name.to_string()), stay_in_scope)
    }

    /// Task phases currently waiting on their end criterion.
    pub fn executing_phases(&self) -> Vec<NodeId> {
        self.inner
            .executing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        let graph = self.graph();
        graph
            .ids()
            .filter_map(|id| graph.node(id).ok())
            .map(|node| NodeSnapshot {
                id: node.id().index(),
                full_name: graph.full_name(node.id()),
                node_type: node.node_type(),
                state: node.state(),
                run_count: node.run_count(),
            })
            .collect()
    }

    pub fn watch_state(&self, id: NodeId) -> Result<watch::Receiver<PhaseState>> {
        Ok(self.graph().node(id)?.watch_state())
    }

    /// Suspend until the state of `id` satisfies `op` against `state`.
    pub async fn wait_for_state(&self, id: NodeId, state: PhaseState, op: StateOp) -> Result<()> {
        let mut rx = self.watch_state(id)?;
        rx.wait_for(|current| op.holds(*current, state))
            .await
            .map(|_| ())
            .map_err(|_| OrchestratorError::ExecutionAborted(format!("state of {} is gone", id)))
    }

    /// Wait until every node in `ids` satisfies `op` against `state`.
    pub async fn wait_for_all(&self, ids: &[NodeId], state: PhaseState, op: StateOp) -> Result<()> {
        try_join_all(ids.iter().map(|id| self.wait_for_state(*id, state, op))).await?;
        Ok(())
    }

    // State changes

    /// Validated natural transition, followed by a scheduling quantum.
    pub(crate) async fn transition(&self, id: NodeId, next: PhaseState) -> Result<()> {
        {
            let graph = self.graph();
            let node = graph.node(id)?;
            let phase = graph.full_name(id);
            PhaseStateMachine::validate_transition(&phase, node.state(), next)?;
            let prev = node.replace_state(next);
            self.announce(&graph, id, prev, next);
        }
        next_quantum().await;
        Ok(())
    }

    /// Write a state without validation. Used by `add`, jumps and the hopper.
    pub(crate) fn force_state(&self, id: NodeId, next: PhaseState) -> Result<PhaseState> {
        let graph = self.graph();
        let prev = graph.node(id)?.replace_state(next);
        self.announce(&graph, id, prev, next);
        Ok(prev)
    }

    fn publish_forced(&self, id: NodeId, next: PhaseState) {
        if let Err(e) = self.force_state(id, next) {
            warn!(node = %id, error = %e, "State write on missing node");
        }
    }

    fn announce(&self, graph: &PhaseGraph, id: NodeId, prev: PhaseState, next: PhaseState) {
        let phase = graph.full_name(id);
        let jump_target = graph
            .node(id)
            .ok()
            .and_then(|n| n.pending_jump())
            .map(|j| graph.full_name(j.target));

        if self.config().phase_trace {
            info!(phase = %phase, from = %prev, to = %next, "Phase state change");
        } else {
            trace!(phase = %phase, from = %prev, to = %next, "Phase state change");
        }
        self.inner.emitter.emit(Event::PhaseStateChanged {
            node: id.index(),
            phase,
            prev,
            next,
            jump_target,
        });
    }

    /// Reset `id` and everything after it, stopping at `end_state`.
    pub(crate) fn clear_successors(
        &self,
        id: NodeId,
        state: PhaseState,
        end_state: Option<NodeId>,
    ) -> Result<()> {
        let graph = self.graph();
        graph.node(id)?;
        for (node, prev) in graph.clear_successors(id, state, end_state) {
            self.announce(&graph, node, prev, state);
        }
        Ok(())
    }

    /// Add or remove a symmetric sync pair. Returns whether anything changed.
    pub(crate) fn update_sync_pair(&self, a: NodeId, b: NodeId, link: bool) -> Result<bool> {
        let mut graph = self.graph_mut();
        graph.node(a)?;
        graph.node(b)?;
        Ok(if link {
            graph.link_sync(a, b)
        } else {
            graph.unlink_sync(a, b)
        })
    }

    pub(crate) fn set_executing(&self, id: NodeId, executing: bool) {
        let mut set = self
            .inner
            .executing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if executing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    pub(crate) fn begin_activation(&self, id: NodeId) -> Result<u32> {
        let mut graph = self.graph_mut();
        let node = graph.node_mut(id)?;
        node.reset_jump();
        node.reset_ready_to_end();
        Ok(node.bump_run_count())
    }

    pub(crate) fn bump_ready_to_end(&self, id: NodeId) -> Result<u32> {
        Ok(self.graph_mut().node_mut(id)?.bump_ready_to_end())
    }

    pub(crate) fn premature_end(&self, id: NodeId) -> Result<bool> {
        Ok(self.graph().node(id)?.premature_end())
    }

    pub(crate) fn watch_premature_end(&self, id: NodeId) -> Result<watch::Receiver<bool>> {
        Ok(self.graph().node(id)?.watch_premature_end())
    }

    pub(crate) fn take_jump(&self, id: NodeId) -> Result<Option<PendingJump>> {
        let mut graph = self.graph_mut();
        let node = graph.node_mut(id)?;
        let jump = node.take_jump();
        node.clear_premature_end();
        Ok(jump)
    }

    pub(crate) fn outstanding_counter(
        &self,
        id: NodeId,
    ) -> Result<Arc<std::sync::atomic::AtomicUsize>> {
        Ok(self.graph().node(id)?.outstanding_counter())
    }

    // Jumps

    /// Request that the active phase `id` end early and continue at `target`.
    ///
    /// The target is searched among predecessors first (a backward jump),
    /// then successors (forward). The jump is serviced when `id` completes.
    pub fn jump(&self, id: NodeId, target: impl Into<PhaseRef>) -> Result<()> {
        let target = target.into();
        let (phase, jump) = {
            let mut graph = self.graph_mut();
            let state = graph.node(id)?.state();
            let phase = graph.full_name(id);
            if !state.is_active() {
                error!(phase = %phase, state = %state, "Jump refused: phase is not active");
                return Err(OrchestratorError::InactiveJump { phase, state });
            }

            let jump = if let Some(dest) = graph.find_predecessor(id, &target, false) {
                PendingJump {
                    target: dest,
                    direction: JumpDirection::Backward,
                }
            } else if let Some(dest) = graph.find_successor(id, &target, false) {
                PendingJump {
                    target: dest,
                    direction: JumpDirection::Forward,
                }
            } else {
                error!(phase = %phase, target = %target, "Jump target not found");
                return Err(OrchestratorError::JumpTargetNotFound {
                    phase,
                    state,
                    target: target.to_string(),
                });
            };
            graph.node_mut(id)?.request_jump(jump);
            (phase, jump)
        };

        let target_name = self.full_name(jump.target)?;
        info!(
            phase = %phase,
            target = %target_name,
            direction = %jump.direction,
            "Phase jump requested"
        );
        self.inner.emitter.emit(Event::PhaseJump {
            node: id.index(),
            phase,
            target: target_name,
            direction: jump.direction,
        });
        Ok(())
    }
}

impl std::fmt::Debug for Phasing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes = self.graph().len();
        f.debug_struct("Phasing")
            .field("config", &self.inner.config)
            .field("nodes", &nodes)
            .field("domains", &self.domains())
            .finish()
    }
}
