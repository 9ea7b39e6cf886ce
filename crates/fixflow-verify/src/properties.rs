//! Executable statements of the engine's observable properties
//!
//! These checkers restate what a finished run guarantees, so tests can
//! assert them over arbitrary graphs instead of hand-picked examples.

use fixflow_core::{
    DfaEngine, DfaInstance, Direction, FlowGraph, InstrId, PerInstructionEnv, Semilattice,
};
use serde::Serialize;

/// Outcome of a property check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PropertyStatus {
    Holds,
    /// The property failed at this instruction.
    Violated { instr: InstrId },
}

/// Fixpoint property: re-applying join-then-transfer to the finished `info`
/// must leave every instruction's fact unchanged.
///
/// Neighbor resolution starts from a fresh environment with no pending
/// calls, so this check is meaningful for call-free graphs; interprocedural
/// facts depend on the call context threaded during the run itself.
pub fn check_fixpoint<G, D, S>(
    flow: &G,
    dfa: &D,
    semilattice: &S,
    info: &[D::Fact],
) -> PropertyStatus
where
    G: FlowGraph,
    D: DfaInstance,
    S: Semilattice<Fact = D::Fact>,
{
    let forward = dfa.direction() == Direction::Forward;
    let mut env = PerInstructionEnv::new(flow.len());
    for num in 0..flow.len() {
        let id = InstrId(num);
        let prev = if forward {
            flow.predecessors(id, &mut env)
        } else {
            flow.successors(id, &mut env)
        };
        let facts: Vec<D::Fact> = prev.iter().map(|p| info[p.index()].clone()).collect();
        let new = dfa.transfer(semilattice.join(&facts), id);
        if !semilattice.eq(&new, &info[num]) {
            return PropertyStatus::Violated { instr: id };
        }
    }
    PropertyStatus::Holds
}

/// Determinism: two runs over the same configuration produce facts that are
/// elementwise equal under the semilattice's own equality.
pub fn check_determinism<G, D, S>(flow: &G, dfa: &D, semilattice: &S) -> bool
where
    G: FlowGraph,
    D: DfaInstance,
    S: Semilattice<Fact = D::Fact>,
{
    let first = DfaEngine::new(flow, dfa, semilattice).run();
    let second = DfaEngine::new(flow, dfa, semilattice).run();
    first.len() == second.len()
        && first
            .iter()
            .zip(&second)
            .all(|(a, b)| semilattice.eq(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{TagLattice, TagPropagation, Tags};
    use fixflow_core::GraphBuilder;

    #[test]
    fn test_fixpoint_holds_after_run() {
        let mut b = GraphBuilder::new();
        let a = b.add_instruction();
        let c = b.add_instruction();
        let d = b.add_instruction();
        b.add_edge(a, c).unwrap();
        b.add_edge(a, d).unwrap();
        b.add_edge(c, d).unwrap();
        let g = b.build();

        let dfa = TagPropagation::new(Direction::Forward).seed(0, 3);
        let lattice = TagLattice::new();
        let info = DfaEngine::new(&g, &dfa, &lattice).run();
        assert_eq!(
            check_fixpoint(&g, &dfa, &lattice, &info),
            PropertyStatus::Holds
        );
    }

    #[test]
    fn test_fixpoint_detects_stale_facts() {
        let mut b = GraphBuilder::new();
        let a = b.add_instruction();
        let c = b.add_instruction();
        b.add_edge(a, c).unwrap();
        let g = b.build();

        let dfa = TagPropagation::new(Direction::Forward).seed(0, 3);
        let lattice = TagLattice::new();

        // A hand-made non-fixpoint: the seed never propagated to c.
        let stale = vec![Tags::from([3]), Tags::new()];
        assert_eq!(
            check_fixpoint(&g, &dfa, &lattice, &stale),
            PropertyStatus::Violated { instr: fixflow_core::InstrId(1) }
        );
    }

    #[test]
    fn test_determinism_on_a_cycle() {
        let mut b = GraphBuilder::new();
        let a = b.add_instruction();
        let c = b.add_instruction();
        b.add_edge(a, c).unwrap();
        b.add_edge(c, a).unwrap();
        let g = b.build();

        let dfa = TagPropagation::new(Direction::Forward).seed(1, 2);
        assert!(check_determinism(&g, &dfa, &TagLattice::new()));
    }
}
