//! Cross-domain operations: phase synchronization and domain-wide jumps.

use std::collections::BTreeSet;

use phase_core::{NodeType, PhaseState};
use tracing::{debug, info, warn};

use crate::context::Phasing;
use crate::error::{OrchestratorError, Result};
use crate::graph::{NodeId, PhaseRef};

impl Phasing {
    fn check_domain(&self, id: NodeId) -> Result<()> {
        if self.node_type(id)? == NodeType::Domain {
            Ok(())
        } else {
            Err(OrchestratorError::NotADomain {
                phase: self.full_name(id)?,
                state: self.state(id)?,
            })
        }
    }

    /// Pair `phase` in `domain` with `with_phase` (default: the same phase)
    /// in `target`, so neither leaves SYNCING before the other arrives.
    ///
    /// Without `phase`, every behavior reachable from `domain` is paired with
    /// its namesake in `target`. Phases missing on either side are skipped.
    /// Returns the number of new pairs.
    pub fn sync(
        &self,
        domain: NodeId,
        target: NodeId,
        phase: Option<PhaseRef>,
        with_phase: Option<PhaseRef>,
    ) -> Result<usize> {
        self.update_sync(domain, target, phase, with_phase, true)
    }

    /// Remove pairs made by [`Phasing::sync`]. Returns the number removed.
    pub fn unsync(
        &self,
        domain: NodeId,
        target: NodeId,
        phase: Option<PhaseRef>,
        with_phase: Option<PhaseRef>,
    ) -> Result<usize> {
        self.update_sync(domain, target, phase, with_phase, false)
    }

    fn update_sync(
        &self,
        domain: NodeId,
        target: NodeId,
        phase: Option<PhaseRef>,
        with_phase: Option<PhaseRef>,
        link: bool,
    ) -> Result<usize> {
        self.check_domain(domain)?;
        self.check_domain(target)?;

        let Some(phase) = phase else {
            let behaviors: Vec<String> = self.with_graph(|graph| {
                graph
                    .bfs_from(domain)
                    .into_iter()
                    .filter_map(|id| graph.node(id).ok()?.imp().map(|imp| imp.name().to_string()))
                    .collect()
            });
            let mut changed = 0;
            for name in behaviors {
                changed += self.update_sync(domain, target, Some(PhaseRef::Imp(name)), None, link)?;
            }
            return Ok(changed);
        };
        let with_phase = with_phase.unwrap_or_else(|| phase.clone());

        let from = self.find(domain, phase.clone(), true)?;
        let to = self.find(target, with_phase.clone(), true)?;
        let (Some(from), Some(to)) = (from, to) else {
            debug!(phase = %phase, with_phase = %with_phase, "Sync skipped: phase not found");
            return Ok(0);
        };
        if from == to {
            return Ok(0);
        }

        let changed = self.update_sync_pair(from, to, link)?;
        if changed {
            debug!(
                from = %self.full_name(from)?,
                to = %self.full_name(to)?,
                linked = link,
                "Updated phase sync"
            );
        }
        Ok(usize::from(changed))
    }

    /// Active phases of `domain`, including nested domains, that can reach `target`.
    fn jump_candidates(&self, domain: NodeId, target: &PhaseRef) -> BTreeSet<NodeId> {
        self.with_graph(|graph| {
            graph
                .transitive_children(domain)
                .into_iter()
                .filter(|id| {
                    let Ok(node) = graph.node(*id) else {
                        return false;
                    };
                    (PhaseState::Started..=PhaseState::Cleanup).contains(&node.state())
                        && (graph.find_successor(*id, target, false).is_some()
                            || graph.find_predecessor(*id, target, false).is_some())
                })
                .collect()
        })
    }

    fn issue_jumps(&self, candidates: BTreeSet<NodeId>, target: &PhaseRef) -> Result<usize> {
        let mut issued = 0;
        for id in candidates {
            match self.jump(id, target.clone()) {
                Ok(()) => issued += 1,
                Err(OrchestratorError::InactiveJump { phase, state }) => {
                    warn!(phase = %phase, state = %state, "Domain jump skipped phase past ENDED");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(issued)
    }

    /// Request `target` from every active phase of `domain`, including
    /// nested domains. Returns the number of jumps issued.
    pub fn domain_jump(&self, domain: NodeId, target: impl Into<PhaseRef>) -> Result<usize> {
        self.check_domain(domain)?;
        let target = target.into();
        let issued = self.issue_jumps(self.jump_candidates(domain, &target), &target)?;
        info!(domain = %self.full_name(domain)?, target = %target, issued, "Domain jump");
        Ok(issued)
    }

    /// [`Phasing::domain_jump`] on every registered domain. A phase reachable
    /// from several domains is jumped once.
    pub fn jump_all(&self, target: impl Into<PhaseRef>) -> Result<usize> {
        let target = target.into();
        let candidates: BTreeSet<NodeId> = self
            .domains()
            .into_iter()
            .flat_map(|(_, domain)| self.jump_candidates(domain, &target))
            .collect();
        let issued = self.issue_jumps(candidates, &target)?;
        info!(target = %target, issued, "Jump on all domains");
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use events::{Event, EventBus};

    use super::*;
    use crate::config::RunConfig;
    use crate::graph::Placement;
    use crate::phases::PhaseImp;

    fn noop(name: &str) -> Arc<PhaseImp> {
        PhaseImp::bottom_up(name, |_, _| Ok(()))
    }

    fn two_domains() -> (Phasing, NodeId, NodeId) {
        let phasing = Phasing::new(RunConfig::default());
        let a = phasing.domain("dom_a").unwrap();
        let b = phasing.domain("dom_b").unwrap();
        let p0 = noop("p0");
        let p1 = noop("p1");
        for domain in [a, b] {
            phasing.add(domain, &p0, Placement::new()).unwrap();
            phasing.add(domain, &p1, Placement::new()).unwrap();
        }
        (phasing, a, b)
    }

    #[test]
    fn test_sync_single_phase() {
        let (phasing, a, b) = two_domains();
        let added = phasing
            .sync(a, b, Some(PhaseRef::Imp("p1".into())), None)
            .unwrap();
        assert_eq!(added, 1);

        let a_p1 = phasing.find(a, PhaseRef::Imp("p1".into()), true).unwrap().unwrap();
        let b_p1 = phasing.find(b, PhaseRef::Imp("p1".into()), true).unwrap().unwrap();
        assert_eq!(phasing.sync_partners(a_p1).unwrap(), vec![b_p1]);
        assert_eq!(phasing.sync_partners(b_p1).unwrap(), vec![a_p1]);

        assert_eq!(
            phasing.sync(a, b, Some(PhaseRef::Imp("p1".into())), None).unwrap(),
            0
        );
    }

    #[test]
    fn test_sync_whole_domain_and_unsync() {
        let (phasing, a, b) = two_domains();
        assert_eq!(phasing.sync(a, b, None, None).unwrap(), 2);
        assert_eq!(phasing.unsync(a, b, None, None).unwrap(), 2);

        let a_p0 = phasing.find(a, PhaseRef::Imp("p0".into()), true).unwrap().unwrap();
        assert!(phasing.sync_partners(a_p0).unwrap().is_empty());
    }

    #[test]
    fn test_sync_missing_phase_is_silent() {
        let (phasing, a, b) = two_domains();
        let added = phasing
            .sync(a, b, Some(PhaseRef::Imp("p9".into())), None)
            .unwrap();
        assert_eq!(added, 0);
    }

    #[test]
    fn test_sync_requires_domains() {
        let (phasing, a, _) = two_domains();
        let schedule = phasing.new_schedule("s");
        let err = phasing.sync(a, schedule, None, None).unwrap_err();
        assert!(matches!(err, OrchestratorError::NotADomain { .. }));
    }

    #[test]
    fn test_domain_jump_targets_active_phases_only() {
        let (phasing, a, _) = two_domains();
        let p0 = phasing.find(a, PhaseRef::Imp("p0".into()), true).unwrap().unwrap();
        let p1 = phasing.find(a, PhaseRef::Imp("p1".into()), true).unwrap().unwrap();
        phasing.force_state(p1, PhaseState::Executing).unwrap();

        assert_eq!(phasing.domain_jump(a, PhaseRef::Imp("p0".into())).unwrap(), 1);
        assert_eq!(phasing.pending_jump(p1).unwrap().unwrap().target, p0);
        assert_eq!(phasing.pending_jump(p0).unwrap(), None);
    }

    #[test]
    fn test_jump_all_visits_every_domain() {
        let (phasing, a, b) = two_domains();
        for domain in [a, b] {
            let p1 = phasing.find(domain, PhaseRef::Imp("p1".into()), true).unwrap().unwrap();
            phasing.force_state(p1, PhaseState::Executing).unwrap();
        }
        assert_eq!(phasing.jump_all(PhaseRef::Imp("p0".into())).unwrap(), 2);
    }

    #[test]
    fn test_jump_all_jumps_nested_phase_once() {
        let phasing = Phasing::new(RunConfig::default());
        let outer = phasing.domain("outer").unwrap();
        let inner = phasing.domain("inner").unwrap();
        phasing.add(inner, &noop("p0"), Placement::new()).unwrap();
        phasing.add(inner, &noop("p1"), Placement::new()).unwrap();
        phasing.add(outer, inner, Placement::new()).unwrap();
        let p0 = phasing.find(inner, PhaseRef::Imp("p0".into()), true).unwrap().unwrap();
        let p1 = phasing.find(inner, PhaseRef::Imp("p1".into()), true).unwrap().unwrap();
        phasing.force_state(p1, PhaseState::Executing).unwrap();
        let mut rx = phasing.subscribe();

        assert_eq!(phasing.jump_all(PhaseRef::Imp("p0".into())).unwrap(), 1);

        let jumps = EventBus::drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e.event, Event::PhaseJump { .. }))
            .count();
        assert_eq!(jumps, 1);
        assert_eq!(phasing.pending_jump(p1).unwrap().unwrap().target, p0);
    }
}
