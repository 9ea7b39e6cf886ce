//! Semilattice contract
//!
//! The engine merges facts flowing in from multiple graph paths with `join`
//! and detects convergence with `eq`. It never inspects the fact type beyond
//! these two operations.

/// Join and equality over the analysis-value type.
///
/// Algebraic obligations rest with the implementer and are not checked by
/// the engine: `join` must be commutative, associative, and idempotent over
/// the facts ever joined for one node, and `eq` must be a true equivalence
/// relation returning `true` exactly when further joining would not move the
/// value. Termination of a run additionally requires finite ascending-chain
/// height from the initial value.
///
/// `join` receives the facts of a node's relevant neighbors in traversal
/// order. A node with no relevant neighbors (an entry node) yields an empty
/// slice; what that joins to is implementer-defined — conventionally the
/// lattice's bottom element — and the engine imposes no default.
pub trait Semilattice {
    type Fact;

    /// Combine an ordered sequence of facts into one.
    fn join(&self, facts: &[Self::Fact]) -> Self::Fact;

    /// Convergence test: `true` when `a` and `b` carry the same information.
    ///
    /// Used purely to stop propagation; it never otherwise alters engine
    /// control flow.
    fn eq(&self, a: &Self::Fact, b: &Self::Fact) -> bool;
}
