//! Direction-agnostic fixed-point dataflow analysis
//!
//! This crate implements a generic worklist solver over densely numbered
//! instruction graphs:
//! - Instruction graph model with plain, call, and return instructions
//! - Call environments threading call/return matching through traversal
//! - Semilattice and analysis-instance contracts over an arbitrary fact type
//! - Preorder seed selection plus per-seed FIFO worklist fixpoint iteration
//!
//! The engine never inspects the fact type beyond the supplied `join`, `eq`,
//! and `transfer` operations; analyses for concrete domains live with their
//! callers.

pub mod analysis;
pub mod engine;
pub mod env;
pub mod graph;
pub mod lattice;

pub use analysis::{DfaInstance, Direction};
pub use engine::DfaEngine;
pub use env::{CallEnvironment, CallStack, PerInstructionEnv, SharedEnv};
pub use graph::{
    FlowGraph, GraphBuilder, GraphError, InstrId, InstrKind, Instruction, InstructionGraph,
};
pub use lattice::Semilattice;
