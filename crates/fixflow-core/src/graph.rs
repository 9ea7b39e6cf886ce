//! Instruction graph model
//!
//! Instructions are densely numbered 0..N-1 with no gaps. Each instruction
//! carries static successor/predecessor edge lists plus a kind tag; call and
//! return instructions resolve their edges through the call environment so
//! that a return edge is only followed to the call site whose call
//! instruction is on top of the relevant stack.

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::fmt;
use thiserror::Error;

use crate::env::CallEnvironment;

/// Dense instruction index, unique within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrId(pub usize);

impl InstrId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instruction variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrKind {
    /// Ordinary instruction: edges propagate the current call stack.
    Plain,
    /// Procedure invocation. Crossing its outgoing edge pushes the call;
    /// control resumes at `return_site` once the callee returns.
    Call { return_site: InstrId },
    /// Callee exit point. Its outgoing edge resolves to the return site of
    /// the innermost pending call.
    Ret,
}

/// One node of the instruction graph.
#[derive(Debug, Clone, Serialize)]
pub struct Instruction {
    id: InstrId,
    kind: InstrKind,
    successors: SmallVec<[InstrId; 2]>,
    predecessors: SmallVec<[InstrId; 2]>,
}

impl Instruction {
    pub fn id(&self) -> InstrId {
        self.id
    }

    pub fn kind(&self) -> InstrKind {
        self.kind
    }

    /// Static successor edges, before call-environment filtering.
    pub fn static_successors(&self) -> &[InstrId] {
        &self.successors
    }

    /// Static predecessor edges, before call-environment filtering.
    pub fn static_predecessors(&self) -> &[InstrId] {
        &self.predecessors
    }
}

/// Capability set the engine requires of a graph: a dense length and
/// call-environment-aware neighbor queries.
///
/// Edge queries are read-only with respect to the graph itself but thread
/// call stacks through the environment as a side effect: the stack recorded
/// for the queried instruction is propagated (pushed, popped, or copied) to
/// every neighbor the query returns.
pub trait FlowGraph {
    /// Number of instructions. Ids 0..len are valid, with no gaps.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successors of `id` consistent with the call-stack context recorded
    /// in `env`.
    fn successors(&self, id: InstrId, env: &mut dyn CallEnvironment) -> SmallVec<[InstrId; 2]>;

    /// Predecessors of `id` consistent with the call-stack context recorded
    /// in `env`.
    fn predecessors(&self, id: InstrId, env: &mut dyn CallEnvironment) -> SmallVec<[InstrId; 2]>;
}

/// Errors rejected at graph construction time.
///
/// The engine itself has no error channel; a graph that builds successfully
/// has dense numbering and resolvable call/return wiring by construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("instruction {0} is out of bounds for a graph of {1} instructions")]
    OutOfBounds(InstrId, usize),
    #[error("instruction {0} is already a call instruction")]
    AlreadyCall(InstrId),
    #[error("return instruction {0} cannot act as a call site")]
    RetAsCall(InstrId),
    #[error("return site {0} is already claimed by call {1}")]
    SiteClaimed(InstrId, InstrId),
}

/// Builds an [`InstructionGraph`] with dense numbering in creation order.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    instructions: Vec<Instruction>,
    call_for_site: Vec<Option<InstrId>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, kind: InstrKind) -> InstrId {
        let id = InstrId(self.instructions.len());
        self.instructions.push(Instruction {
            id,
            kind,
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
        });
        self.call_for_site.push(None);
        id
    }

    /// Append a plain instruction, returning its id.
    pub fn add_instruction(&mut self) -> InstrId {
        self.add(InstrKind::Plain)
    }

    /// Append a return instruction (a callee exit point).
    pub fn add_ret(&mut self) -> InstrId {
        self.add(InstrKind::Ret)
    }

    fn check(&self, id: InstrId) -> Result<(), GraphError> {
        if id.index() >= self.instructions.len() {
            return Err(GraphError::OutOfBounds(id, self.instructions.len()));
        }
        Ok(())
    }

    /// Wire a static edge from `from` to `to`.
    pub fn add_edge(&mut self, from: InstrId, to: InstrId) -> Result<(), GraphError> {
        self.check(from)?;
        self.check(to)?;
        self.instructions[from.index()].successors.push(to);
        self.instructions[to.index()].predecessors.push(from);
        Ok(())
    }

    /// Turn `call` into a call instruction invoking the procedure body that
    /// starts at `callee_entry` and exits at `callee_ret`, resuming at
    /// `return_site` in the caller.
    ///
    /// Wires the call edge (`call -> callee_entry`) and the return edge
    /// (`callee_ret -> return_site`), and records the site so backward
    /// traversal can re-enter the callee. A ret instruction may serve many
    /// call sites; a return site belongs to exactly one call.
    pub fn link_call(
        &mut self,
        call: InstrId,
        callee_entry: InstrId,
        callee_ret: InstrId,
        return_site: InstrId,
    ) -> Result<(), GraphError> {
        self.check(call)?;
        self.check(callee_entry)?;
        self.check(callee_ret)?;
        self.check(return_site)?;

        match self.instructions[call.index()].kind {
            InstrKind::Plain => {}
            InstrKind::Call { .. } => return Err(GraphError::AlreadyCall(call)),
            InstrKind::Ret => return Err(GraphError::RetAsCall(call)),
        }
        if let Some(claimed) = self.call_for_site[return_site.index()] {
            return Err(GraphError::SiteClaimed(return_site, claimed));
        }
        if let InstrKind::Call { .. } = self.instructions[callee_ret.index()].kind {
            return Err(GraphError::AlreadyCall(callee_ret));
        }

        self.instructions[call.index()].kind = InstrKind::Call { return_site };
        self.instructions[callee_ret.index()].kind = InstrKind::Ret;
        self.add_edge(call, callee_entry)?;
        self.add_edge(callee_ret, return_site)?;
        self.call_for_site[return_site.index()] = Some(call);
        Ok(())
    }

    pub fn build(self) -> InstructionGraph {
        InstructionGraph {
            instructions: self.instructions,
            call_for_site: self.call_for_site,
        }
    }
}

/// Immutable instruction graph with call-environment-aware edge resolution.
#[derive(Debug, Clone, Serialize)]
pub struct InstructionGraph {
    instructions: Vec<Instruction>,
    /// Dense `return site -> call` table for backward return-edge crossing.
    call_for_site: Vec<Option<InstrId>>,
}

impl InstructionGraph {
    pub fn instruction(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.index()]
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    /// The call instruction that resumes at `site`, if any.
    pub fn call_for_site(&self, site: InstrId) -> Option<InstrId> {
        self.call_for_site[site.index()]
    }
}

impl FlowGraph for InstructionGraph {
    fn len(&self) -> usize {
        self.instructions.len()
    }

    fn successors(&self, id: InstrId, env: &mut dyn CallEnvironment) -> SmallVec<[InstrId; 2]> {
        let instr = &self.instructions[id.index()];
        let stack = env.call_stack(id).clone();
        match instr.kind {
            InstrKind::Plain => {
                for &succ in &instr.successors {
                    env.update(stack.clone(), succ);
                }
                instr.successors.clone()
            }
            InstrKind::Call { .. } => {
                // Crossing the call edge enters the callee.
                let pushed = stack.pushed(id);
                for &succ in &instr.successors {
                    env.update(pushed.clone(), succ);
                }
                instr.successors.clone()
            }
            InstrKind::Ret => {
                // Only the return edge matching the innermost pending call
                // is followed. No pending call, no edge.
                let Some(call) = stack.top() else {
                    return SmallVec::new();
                };
                let InstrKind::Call { return_site } = self.instructions[call.index()].kind else {
                    return SmallVec::new();
                };
                if !instr.successors.contains(&return_site) {
                    return SmallVec::new();
                }
                env.update(stack.popped(), return_site);
                smallvec![return_site]
            }
        }
    }

    fn predecessors(&self, id: InstrId, env: &mut dyn CallEnvironment) -> SmallVec<[InstrId; 2]> {
        let instr = &self.instructions[id.index()];
        let stack = env.call_stack(id).clone();
        let mut result = SmallVec::new();
        for &pred in &instr.predecessors {
            match self.instructions[pred.index()].kind {
                InstrKind::Ret => {
                    // Crossing a return edge backward re-enters the callee on
                    // behalf of the call recorded for this return site.
                    if let Some(call) = self.call_for_site[id.index()] {
                        env.update(stack.pushed(call), pred);
                        result.push(pred);
                    }
                }
                InstrKind::Call { .. } => {
                    // `id` is a callee entry; the call edge is only crossed
                    // backward for the innermost pending call.
                    if stack.top() == Some(pred) {
                        env.update(stack.popped(), pred);
                        result.push(pred);
                    }
                }
                InstrKind::Plain => {
                    env.update(stack.clone(), pred);
                    result.push(pred);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{CallStack, PerInstructionEnv, SharedEnv};

    fn ids(v: &SmallVec<[InstrId; 2]>) -> Vec<usize> {
        v.iter().map(|i| i.index()).collect()
    }

    #[test]
    fn test_builder_numbers_densely() {
        let mut b = GraphBuilder::new();
        let a = b.add_instruction();
        let r = b.add_ret();
        let c = b.add_instruction();
        assert_eq!((a, r, c), (InstrId(0), InstrId(1), InstrId(2)));
        assert_eq!(b.build().len(), 3);
    }

    #[test]
    fn test_edge_wiring_is_symmetric() {
        let mut b = GraphBuilder::new();
        let a = b.add_instruction();
        let c = b.add_instruction();
        b.add_edge(a, c).unwrap();
        let g = b.build();
        assert_eq!(g.instruction(a).static_successors(), &[c]);
        assert_eq!(g.instruction(c).static_predecessors(), &[a]);
    }

    #[test]
    fn test_edge_rejects_out_of_bounds() {
        let mut b = GraphBuilder::new();
        let a = b.add_instruction();
        assert_eq!(
            b.add_edge(a, InstrId(5)),
            Err(GraphError::OutOfBounds(InstrId(5), 1))
        );
    }

    #[test]
    fn test_link_call_rejects_double_link() {
        let mut b = GraphBuilder::new();
        let call = b.add_instruction();
        let entry = b.add_instruction();
        let ret = b.add_ret();
        let site = b.add_instruction();
        b.link_call(call, entry, ret, site).unwrap();
        assert_eq!(
            b.link_call(call, entry, ret, site),
            Err(GraphError::AlreadyCall(call))
        );
    }

    #[test]
    fn test_link_call_rejects_claimed_site() {
        let mut b = GraphBuilder::new();
        let c1 = b.add_instruction();
        let c2 = b.add_instruction();
        let entry = b.add_instruction();
        let ret = b.add_ret();
        let site = b.add_instruction();
        b.link_call(c1, entry, ret, site).unwrap();
        assert_eq!(
            b.link_call(c2, entry, ret, site),
            Err(GraphError::SiteClaimed(site, c1))
        );
    }

    #[test]
    fn test_link_call_rejects_ret_as_call() {
        let mut b = GraphBuilder::new();
        let r = b.add_ret();
        let entry = b.add_instruction();
        let ret = b.add_ret();
        let site = b.add_instruction();
        assert_eq!(
            b.link_call(r, entry, ret, site),
            Err(GraphError::RetAsCall(r))
        );
    }

    /// call -> entry -> ret -> site, fully linked.
    fn single_call_graph() -> (InstructionGraph, InstrId, InstrId, InstrId, InstrId) {
        let mut b = GraphBuilder::new();
        let call = b.add_instruction();
        let entry = b.add_instruction();
        let ret = b.add_ret();
        let site = b.add_instruction();
        b.add_edge(entry, ret).unwrap();
        b.link_call(call, entry, ret, site).unwrap();
        (b.build(), call, entry, ret, site)
    }

    #[test]
    fn test_call_edge_pushes_the_call() {
        let (g, call, entry, _, _) = single_call_graph();
        let mut env = PerInstructionEnv::new(g.len());
        let succ = g.successors(call, &mut env);
        assert_eq!(ids(&succ), vec![entry.index()]);
        assert_eq!(env.call_stack(entry).top(), Some(call));
    }

    #[test]
    fn test_return_edge_pops_to_matching_site() {
        let (g, call, _, ret, site) = single_call_graph();
        let mut env = PerInstructionEnv::new(g.len());
        env.update(CallStack::new().pushed(call), ret);

        let succ = g.successors(ret, &mut env);
        assert_eq!(ids(&succ), vec![site.index()]);
        assert!(env.call_stack(site).is_empty());
    }

    #[test]
    fn test_return_edge_without_pending_call_is_closed() {
        let (g, _, _, ret, _) = single_call_graph();
        let mut env = PerInstructionEnv::new(g.len());
        assert!(g.successors(ret, &mut env).is_empty());
    }

    #[test]
    fn test_return_edge_ignores_foreign_call() {
        // A second, unrelated call on top of the stack must not open the
        // return edge of this callee.
        let mut b = GraphBuilder::new();
        let c1 = b.add_instruction();
        let e1 = b.add_instruction();
        let r1 = b.add_ret();
        let s1 = b.add_instruction();
        let c2 = b.add_instruction();
        let e2 = b.add_instruction();
        let r2 = b.add_ret();
        let s2 = b.add_instruction();
        b.add_edge(e1, r1).unwrap();
        b.add_edge(e2, r2).unwrap();
        b.link_call(c1, e1, r1, s1).unwrap();
        b.link_call(c2, e2, r2, s2).unwrap();
        let g = b.build();

        let mut env = PerInstructionEnv::new(g.len());
        env.update(CallStack::new().pushed(c2), r1);
        assert!(g.successors(r1, &mut env).is_empty());
    }

    #[test]
    fn test_backward_return_crossing_pushes_the_call() {
        let (g, call, _, ret, site) = single_call_graph();
        let mut env = PerInstructionEnv::new(g.len());

        let pred = g.predecessors(site, &mut env);
        assert_eq!(ids(&pred), vec![ret.index()]);
        assert_eq!(env.call_stack(ret).top(), Some(call));
    }

    #[test]
    fn test_backward_call_crossing_filters_to_pending_call() {
        let mut b = GraphBuilder::new();
        let c1 = b.add_instruction();
        let c2 = b.add_instruction();
        let entry = b.add_instruction();
        let ret = b.add_ret();
        let s1 = b.add_instruction();
        let s2 = b.add_instruction();
        b.add_edge(entry, ret).unwrap();
        b.link_call(c1, entry, ret, s1).unwrap();
        b.link_call(c2, entry, ret, s2).unwrap();
        let g = b.build();

        let mut env = PerInstructionEnv::new(g.len());
        env.update(CallStack::new().pushed(c2), entry);

        let pred = g.predecessors(entry, &mut env);
        assert_eq!(ids(&pred), vec![c2.index()]);
        assert!(env.call_stack(c2).is_empty());
    }

    #[test]
    fn test_backward_call_crossing_with_no_context_is_closed() {
        let (g, _, entry, _, _) = single_call_graph();
        let mut env = PerInstructionEnv::new(g.len());
        assert!(g.predecessors(entry, &mut env).is_empty());
    }

    #[test]
    fn test_plain_edges_propagate_the_stack() {
        let mut b = GraphBuilder::new();
        let a = b.add_instruction();
        let c = b.add_instruction();
        b.add_edge(a, c).unwrap();
        let g = b.build();

        let mut env = PerInstructionEnv::new(g.len());
        env.update(CallStack::new().pushed(InstrId(0)), a);
        g.successors(a, &mut env);
        assert_eq!(env.call_stack(c).top(), Some(InstrId(0)));
    }

    #[test]
    fn test_shared_env_resolution_reaches_return_site() {
        // Reachability through a call chain with the degenerate environment.
        let (g, call, entry, ret, site) = single_call_graph();
        let mut env = SharedEnv::default();
        g.successors(call, &mut env);
        g.successors(entry, &mut env);
        let succ = g.successors(ret, &mut env);
        assert_eq!(ids(&succ), vec![site.index()]);
    }

    #[test]
    fn test_graph_serializes() {
        let (g, _, _, _, _) = single_call_graph();
        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["instructions"][0]["kind"]["Call"]["return_site"], 3);
        assert_eq!(json["call_for_site"][3], 0);
    }
}
