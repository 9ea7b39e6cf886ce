//! Worklist fixpoint engine
//!
//! Two passes over the graph: a preorder reachability pass that picks
//! deterministic worklist seeds, then the main pass that iterates each seed's
//! FIFO worklist until no instruction's value changes. The main pass threads
//! one mutable call environment through every edge query, so call/return
//! pairs resolve correctly even mid-worklist.

use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::{debug, trace};

use crate::analysis::{DfaInstance, Direction};
use crate::env::{PerInstructionEnv, SharedEnv};
use crate::graph::{FlowGraph, InstrId};
use crate::lattice::Semilattice;

/// Iterative dataflow solver over a [`FlowGraph`].
///
/// The engine borrows the graph and the two contracts for the duration of a
/// run and owns all working state (`info`, visited markers, traversal order,
/// the per-run call environment) exclusively. It is single-threaded and
/// synchronous; independent engines over independent graphs may run
/// concurrently without coordination.
///
/// Termination is guaranteed only if the semilattice has finite
/// ascending-chain height from the initial value. The engine applies no
/// iteration bound and no cycle detection beyond the `eq` stabilization
/// check; a violating analysis blocks the calling thread indefinitely.
pub struct DfaEngine<'a, G, D, S> {
    flow: &'a G,
    dfa: &'a D,
    semilattice: &'a S,
}

impl<'a, G, D, S> DfaEngine<'a, G, D, S>
where
    G: FlowGraph,
    D: DfaInstance,
    S: Semilattice<Fact = D::Fact>,
{
    pub fn new(flow: &'a G, dfa: &'a D, semilattice: &'a S) -> Self {
        Self {
            flow,
            dfa,
            semilattice,
        }
    }

    /// Run to fixpoint. Index `i` of the result holds the final fact for
    /// instruction `i`.
    pub fn run(&self) -> Vec<D::Fact> {
        let n = self.flow.len();
        let mut info: Vec<D::Fact> = (0..n).map(|_| self.dfa.initial()).collect();
        let mut env = PerInstructionEnv::new(n);
        let mut visited = vec![false; n];

        let forward = self.dfa.direction() == Direction::Forward;
        let order = self.preorder();
        debug!(
            "dataflow fixpoint over {} instructions, {:?}",
            n,
            self.dfa.direction()
        );

        for step in 0..n {
            let position = if forward { step } else { n - 1 - step };
            let seed = order[position];
            if visited[seed] {
                continue;
            }

            trace!("worklist seeded at instruction {seed}");
            let mut worklist = VecDeque::new();
            worklist.push_back(seed);
            visited[seed] = true;

            while let Some(num) = worklist.pop_front() {
                let id = InstrId(num);
                let old = info[num].clone();
                let joined = self.join_neighbors(id, &info, &mut env, forward);
                let new = self.dfa.transfer(joined, id);
                // Neighbors are resolved before the equality check so the
                // call environment stays threaded even when the value is
                // already stable.
                let next = self.next_neighbors(id, &mut env, forward);
                if !self.semilattice.eq(&new, &old) {
                    trace!("instruction {num} changed, enqueueing {} neighbors", next.len());
                    info[num] = new;
                    for succ in next {
                        // A later-discovered neighbor may still change this
                        // value again; re-enqueue regardless of prior visits.
                        worklist.push_back(succ.index());
                        visited[succ.index()] = true;
                    }
                }
            }
        }

        info
    }

    /// Multi-source BFS over the whole graph with the degenerate shared-stack
    /// environment: pure reachability, call/return matching ignored.
    ///
    /// Produces a permutation of 0..N covering every instruction exactly
    /// once, partitioned by connected component in ascending seed order. It
    /// only picks the seeds and seed order for the main pass; fixpoint
    /// correctness does not depend on it.
    fn preorder(&self) -> Vec<usize> {
        let n = self.flow.len();
        let mut order = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        let mut env = SharedEnv::default();

        for seed in 0..n {
            if visited[seed] {
                continue;
            }
            let mut worklist = VecDeque::new();
            worklist.push_back(seed);
            while let Some(num) = worklist.pop_front() {
                if visited[num] {
                    continue;
                }
                order.push(num);
                visited[num] = true;
                for succ in self.flow.successors(InstrId(num), &mut env) {
                    worklist.push_back(succ.index());
                }
            }
        }

        order
    }

    /// Join the stored facts of the node's relevant neighbors: predecessors
    /// for a forward analysis, successors for a backward one.
    fn join_neighbors(
        &self,
        id: InstrId,
        info: &[D::Fact],
        env: &mut PerInstructionEnv,
        forward: bool,
    ) -> D::Fact {
        let prev = if forward {
            self.flow.predecessors(id, env)
        } else {
            self.flow.successors(id, env)
        };
        let facts: Vec<D::Fact> = prev.iter().map(|p| info[p.index()].clone()).collect();
        self.semilattice.join(&facts)
    }

    /// Neighbors in the direction of propagation: successors for a forward
    /// analysis, predecessors for a backward one.
    fn next_neighbors(
        &self,
        id: InstrId,
        env: &mut PerInstructionEnv,
        forward: bool,
    ) -> SmallVec<[InstrId; 2]> {
        if forward {
            self.flow.successors(id, env)
        } else {
            self.flow.predecessors(id, env)
        }
    }
}
