//! Execution engine driving one phase node through its lifecycle.
//!
//! Each scheduled node gets its own `execute` call on the run loop. The
//! engine waits for predecessors, rendezvous with sync partners, traverses
//! the component tree for every state, negotiates the end of task phases and
//! finally schedules successors or services a pending jump.

use std::sync::{Arc, Mutex, PoisonError};

use events::Event;
use phase_core::{JumpDirection, NodeType, PhaseState, StateOp};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::component::ComponentTree;
use crate::context::Phasing;
use crate::error::{OrchestratorError, Result};
use crate::graph::NodeId;
use crate::objection::Objection;
use crate::phases::{PhaseImp, StandardPhase};
use crate::resources::{FailureLog, HookFailure, TaskPhaseGuard};
use crate::traversal;

use super::next_quantum;

pub(crate) struct ExecutionEngine {
    phasing: Phasing,
    tree: Arc<ComponentTree>,
    hopper: mpsc::UnboundedSender<NodeId>,
    all_done: watch::Sender<bool>,
    failures: FailureLog,
    completed: Mutex<Vec<NodeId>>,
}

impl ExecutionEngine {
    pub(crate) fn new(
        phasing: Phasing,
        tree: Arc<ComponentTree>,
        hopper: mpsc::UnboundedSender<NodeId>,
        all_done: watch::Sender<bool>,
        failures: FailureLog,
    ) -> Self {
        Self {
            phasing,
            tree,
            hopper,
            all_done,
            failures,
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Nodes that reached DONE naturally, in completion order.
    pub(crate) fn completed(&self) -> Vec<NodeId> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn schedule(&self, id: NodeId) {
        if self.hopper.send(id).is_err() {
            warn!(node = %id, "Run loop is gone, dropping scheduled phase");
        }
    }

    pub(crate) async fn execute(&self, id: NodeId) -> Result<()> {
        let phasing = &self.phasing;
        let phase = phasing.full_name(id)?;

        let predecessors = phasing.predecessors(id)?;
        phasing
            .wait_for_all(&predecessors, PhaseState::Done, StateOp::Eq)
            .await?;

        if phasing.is_aborted() {
            debug!(phase = %phase, "Run aborted, not starting phase");
            return Ok(());
        }
        match phasing.state(id)? {
            PhaseState::Scheduled => {}
            PhaseState::Done => {
                debug!(phase = %phase, "Phase already done, skipping");
                return Ok(());
            }
            other => {
                // Reset by a jump while waiting; the jump reschedules it.
                debug!(phase = %phase, state = %other, "Stale phase activation, skipping");
                return Ok(());
            }
        }
        let activation = phasing.begin_activation(id)?;

        // SYNCING
        phasing.transition(id, PhaseState::Syncing).await?;
        let partners = phasing.sync_partners(id)?;
        if !partners.is_empty() {
            debug!(phase = %phase, partners = partners.len(), "Waiting for sync partners");
            phasing
                .wait_for_all(&partners, PhaseState::Syncing, StateOp::Gte)
                .await?;
        }

        let leaf = match (phasing.node_type(id)?, phasing.imp(id)?) {
            (NodeType::Node, Some(imp)) => Some(imp),
            _ => None,
        };
        let mut procs = TaskPhaseGuard::new(
            phase.clone(),
            phasing.outstanding_counter(id)?,
            self.failures.clone(),
            Some(phasing.emitter().clone()),
        );

        // STARTED / EXECUTING / READY_TO_END
        if let Some(imp) = &leaf {
            debug!(phase = %phase, activation, kind = %imp.kind(), "Phase started");
            phasing.transition(id, PhaseState::Started).await?;
            self.traverse(id, imp, PhaseState::Started, &mut procs)?;
            next_quantum().await;

            if imp.kind().is_task() {
                let objection = phasing.objection(id)?;
                phasing.transition(id, PhaseState::Executing).await?;
                self.traverse(id, imp, PhaseState::Executing, &mut procs)?;
                next_quantum().await;

                phasing.set_executing(id, true);
                let mut premature = phasing.watch_premature_end(id)?;
                let outcome = tokio::select! {
                    _ = premature.wait_for(|ended| *ended) => {
                        debug!(phase = %phase, "Phase ended early for a jump");
                        Ok(())
                    }
                    result = self.wait_for_end_criterion(id, imp, &objection, &mut procs) => result,
                };
                phasing.set_executing(id, false);
                outcome?;
            } else {
                phasing.transition(id, PhaseState::Executing).await?;
                self.traverse(id, imp, PhaseState::Executing, &mut procs)?;
                if !phasing.premature_end(id)? {
                    phasing.bump_ready_to_end(id)?;
                    phasing.transition(id, PhaseState::ReadyToEnd).await?;
                    self.traverse(id, imp, PhaseState::ReadyToEnd, &mut procs)?;
                }
            }
        } else {
            phasing.transition(id, PhaseState::Started).await?;
            phasing.transition(id, PhaseState::Executing).await?;
        }

        // ENDED
        phasing.transition(id, PhaseState::Ended).await?;
        if let Some(imp) = &leaf {
            self.traverse(id, imp, PhaseState::Ended, &mut procs)?;
            next_quantum().await;
            if phasing.pending_jump(id)?.is_none() {
                let siblings: Vec<NodeId> = phasing.siblings(id)?.into_iter().collect();
                phasing
                    .wait_for_all(&siblings, PhaseState::ReadyToEnd, StateOp::Gte)
                    .await?;
            }
        }

        // CLEANUP / JUMPING
        let jump = phasing.take_jump(id)?;
        let next = if jump.is_some() {
            PhaseState::Jumping
        } else {
            PhaseState::Cleanup
        };
        phasing.transition(id, next).await?;
        procs.kill();
        if let Some(objection) = phasing.objection_of(id)? {
            objection.clear();
        }

        // DONE, then schedule what comes next
        match jump {
            Some(jump) => {
                info!(
                    phase = %phase,
                    target = %phasing.full_name(jump.target)?,
                    direction = %jump.direction,
                    "Servicing phase jump"
                );
                if jump.direction == JumpDirection::Forward {
                    phasing.clear_successors(id, PhaseState::Done, Some(jump.target))?;
                }
                phasing.clear_successors(jump.target, PhaseState::Dormant, None)?;
                next_quantum().await;
                phasing.force_state(jump.target, PhaseState::Scheduled)?;
                self.schedule(jump.target);
            }
            None => {
                phasing.transition(id, PhaseState::Done).await?;
                self.completed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(id);

                let successors = phasing.successors(id)?;
                if successors.is_empty() {
                    info!(phase = %phase, "All phases done");
                    phasing
                        .emitter()
                        .emit(Event::AllPhasesDone { phase: phase.clone() });
                    self.all_done.send_replace(true);
                }
                for succ in successors {
                    if phasing.state(succ)? < PhaseState::Scheduled {
                        phasing.transition(succ, PhaseState::Scheduled).await?;
                        self.schedule(succ);
                    }
                }
            }
        }
        Ok(())
    }

    /// Block a task phase until nothing objects to its end, then run the
    /// bounded ready-to-end negotiation.
    async fn wait_for_end_criterion(
        &self,
        id: NodeId,
        imp: &PhaseImp,
        objection: &Objection,
        procs: &mut TaskPhaseGuard,
    ) -> Result<()> {
        let phasing = &self.phasing;
        let config = phasing.config();

        // a raise/drop cycle that already completed still owes the drain
        let drained_cycle = objection.top_all_dropped() && !objection.drain_time().is_zero();
        if objection.top_total() > 0 || drained_cycle {
            objection.wait_for_all_dropped().await;
            debug!(phase = %objection.name(), "All objections dropped");
        } else if config.legacy_run_semantics && imp.name() == StandardPhase::Run.name() {
            if !objection.top_all_dropped() {
                debug!(phase = %objection.name(), "Waiting for a raise/drop cycle on run");
                objection.wait_for_all_dropped().await;
            }
        } else if config.phase_trace {
            info!(phase = %objection.name(), "No objections raised, ending phase");
        }

        self.wait_for_self_and_siblings_to_drop(id).await?;

        let max = config.max_ready_to_end_iterations.max(1);
        loop {
            next_quantum().await;
            let round = phasing.bump_ready_to_end(id)?;
            phasing.transition(id, PhaseState::ReadyToEnd).await?;
            self.traverse(id, imp, PhaseState::ReadyToEnd, procs)?;
            next_quantum().await;
            self.wait_for_self_and_siblings_to_drop(id).await?;

            if phasing.state(id)? != PhaseState::Executing {
                break;
            }
            if round >= max {
                warn!(
                    phase = %objection.name(),
                    rounds = round,
                    outstanding = objection.top_total(),
                    "Ready-to-end limit reached, ending phase anyway"
                );
                break;
            }
        }
        Ok(())
    }

    /// Fixed point: neither this phase nor any sibling holds an objection.
    /// Any wait drops this phase back to EXECUTING and restarts the check.
    async fn wait_for_self_and_siblings_to_drop(&self, id: NodeId) -> Result<()> {
        let phasing = &self.phasing;
        let mut others: Vec<NodeId> = phasing.siblings(id)?.into_iter().collect();
        for partner in phasing.sync_partners(id)? {
            if !others.contains(&partner) {
                others.push(partner);
            }
        }

        loop {
            let mut waited = false;
            if let Some(own) = phasing.objection_of(id)? {
                if own.top_total() > 0 {
                    self.reenter_executing(id).await?;
                    own.wait_for_all_dropped().await;
                    waited = true;
                }
            }
            for other in &others {
                phasing
                    .wait_for_state(*other, PhaseState::Executing, StateOp::Gte)
                    .await?;
                if let Some(objection) = phasing.objection_of(*other)? {
                    if objection.top_total() > 0 {
                        self.reenter_executing(id).await?;
                        objection.wait_for_all_dropped().await;
                        waited = true;
                    }
                }
            }
            if !waited {
                return Ok(());
            }
        }
    }

    async fn reenter_executing(&self, id: NodeId) -> Result<()> {
        if self.phasing.state(id)? == PhaseState::ReadyToEnd {
            self.phasing.transition(id, PhaseState::Executing).await?;
        }
        Ok(())
    }

    fn traverse(
        &self,
        id: NodeId,
        imp: &PhaseImp,
        state: PhaseState,
        procs: &mut TaskPhaseGuard,
    ) -> Result<()> {
        traversal::traverse(
            imp.traversal(),
            &self.tree,
            &self.phasing,
            id,
            imp.name(),
            state,
            procs,
        )
        .map_err(|e| {
            self.report_hook_failure(&e);
            e
        })
    }

    fn report_hook_failure(&self, failure: &OrchestratorError) {
        let OrchestratorError::HookFailed {
            phase,
            component,
            source,
            ..
        } = failure
        else {
            return;
        };
        error!(phase = %phase, component = %component, error = %source, "Phase hook failed");
        self.phasing.emitter().emit(Event::HookFailed {
            phase: phase.clone(),
            component: component.clone(),
            message: source.to_string(),
        });
        self.failures.record(HookFailure {
            phase: phase.clone(),
            component: component.clone(),
            message: source.to_string(),
        });
    }
}
