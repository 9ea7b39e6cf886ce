//! Analysis instance contract

use crate::graph::InstrId;

/// Direction of dataflow analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Facts flow from predecessors to successors.
    Forward,
    /// Facts flow from successors to predecessors.
    Backward,
}

/// A single dataflow analysis: starting value, direction, and per-instruction
/// transfer function.
pub trait DfaInstance {
    /// The type of facts being propagated.
    type Fact: Clone;

    /// Starting value for every instruction before any iteration.
    fn initial(&self) -> Self::Fact;

    fn direction(&self) -> Direction;

    /// Transfer function: the node's new candidate value, computed from the
    /// joined facts of its relevant neighbors.
    ///
    /// Takes `joined` by value; mutating it in place and returning it is as
    /// acceptable as building a fresh value, provided
    /// [`Semilattice::eq`](crate::lattice::Semilattice::eq) semantics hold
    /// on the result.
    fn transfer(&self, joined: Self::Fact, instr: InstrId) -> Self::Fact;
}
