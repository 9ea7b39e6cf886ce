//! Reference tag-propagation analysis
//!
//! The smallest useful analysis for exercising an engine: facts are sets of
//! opaque tags, join is set union, and the transfer function is the identity
//! except at seeded instructions, which add their tags. Union over a finite
//! tag universe is monotone with finite height, so every run terminates.

use fixflow_core::{DfaInstance, Direction, InstrId, Semilattice};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// Fact type of the reference analysis.
pub type Tags = BTreeSet<u32>;

/// Set-union semilattice over [`Tags`].
///
/// The zero-fact join (an entry node with no relevant neighbors) is
/// implementer-defined by contract; this lattice makes the choice explicit
/// through a configurable bottom element, which defaults to the empty set.
#[derive(Debug, Clone, Default)]
pub struct TagLattice {
    bottom: Tags,
}

impl TagLattice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A lattice whose zero-fact join yields `bottom` instead of the empty
    /// set.
    pub fn with_bottom(bottom: Tags) -> Self {
        Self { bottom }
    }
}

impl Semilattice for TagLattice {
    type Fact = Tags;

    fn join(&self, facts: &[Tags]) -> Tags {
        if facts.is_empty() {
            return self.bottom.clone();
        }
        let mut result = Tags::new();
        for fact in facts {
            result.extend(fact.iter().copied());
        }
        result
    }

    fn eq(&self, a: &Tags, b: &Tags) -> bool {
        a == b
    }
}

/// Tag propagation instance: identity transfer plus per-instruction seeds.
#[derive(Debug, Clone)]
pub struct TagPropagation {
    direction: Direction,
    seeds: IndexMap<usize, Tags>,
}

impl TagPropagation {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            seeds: IndexMap::new(),
        }
    }

    /// Inject `tag` at instruction `num` on every transfer.
    pub fn seed(mut self, num: usize, tag: u32) -> Self {
        self.seeds.entry(num).or_default().insert(tag);
        self
    }
}

impl DfaInstance for TagPropagation {
    type Fact = Tags;

    fn initial(&self) -> Tags {
        Tags::new()
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn transfer(&self, mut joined: Tags, instr: InstrId) -> Tags {
        if let Some(tags) = self.seeds.get(&instr.index()) {
            joined.extend(tags.iter().copied());
        }
        joined
    }
}
