//! Random instruction graphs for property-based testing

use anyhow::{Context, Result};
use fixflow_core::{GraphBuilder, InstrId, InstructionGraph};
use quickcheck::{Arbitrary, Gen};

/// Shape of a call-free instruction graph: a node count plus directed edges
/// between node indices.
#[derive(Debug, Clone)]
pub struct GraphSpec {
    pub nodes: usize,
    pub edges: Vec<(usize, usize)>,
}

impl GraphSpec {
    /// Build the described graph. Edge endpoints must be below `nodes`.
    pub fn build(&self) -> Result<InstructionGraph> {
        let mut builder = GraphBuilder::new();
        let ids: Vec<InstrId> = (0..self.nodes).map(|_| builder.add_instruction()).collect();
        for &(from, to) in &self.edges {
            builder
                .add_edge(ids[from], ids[to])
                .with_context(|| format!("wiring edge {from} -> {to}"))?;
        }
        Ok(builder.build())
    }
}

impl Arbitrary for GraphSpec {
    fn arbitrary(g: &mut Gen) -> Self {
        let nodes = usize::arbitrary(g) % 12 + 1;
        let edge_count = usize::arbitrary(g) % (nodes * 2);
        let edges = (0..edge_count)
            .map(|_| (usize::arbitrary(g) % nodes, usize::arbitrary(g) % nodes))
            .collect();
        Self { nodes, edges }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let mut shrunk = Vec::new();
        // One edge at a time, then one node with its dangling edges.
        for i in 0..self.edges.len() {
            let mut edges = self.edges.clone();
            edges.remove(i);
            shrunk.push(Self {
                nodes: self.nodes,
                edges,
            });
        }
        if self.nodes > 1 {
            let nodes = self.nodes - 1;
            let edges = self
                .edges
                .iter()
                .copied()
                .filter(|&(from, to)| from < nodes && to < nodes)
                .collect();
            shrunk.push(Self { nodes, edges });
        }
        Box::new(shrunk.into_iter())
    }
}
