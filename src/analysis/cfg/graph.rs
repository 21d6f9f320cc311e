//! The instruction-level control flow graph.

use rustc_hash::FxHashMap;
use std::fmt::{self, Write};

use crate::{
    analysis::cfg::CfgEdgeKind,
    assembly::InstrId,
    utils::graph::{DirectedGraph, GraphBase, NodeId, Predecessors, Successors},
};

/// A CFG vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfgNode {
    /// The single method entry
    Entry,
    /// The single method exit
    Exit,
    /// One instruction
    Instr(InstrId),
}

/// A control flow graph with one vertex per reachable instruction.
///
/// Built by [`ControlFlowGraph::build`]. The graph borrows instruction identity from
/// the [`crate::assembly::Bytecode`] it was built from, not the instructions themselves;
/// it must be rebuilt after the code changes.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub(crate) graph: DirectedGraph<CfgNode, CfgEdgeKind>,
    pub(crate) entry: NodeId,
    pub(crate) exit: NodeId,
    pub(crate) by_instr: FxHashMap<InstrId, NodeId>,
    /// Instruction vertices in code order
    pub(crate) order: Vec<NodeId>,
    /// Handler nesting depth per vertex, `1` when unprotected
    pub(crate) depth: FxHashMap<NodeId, u32>,
    /// Indices of the handlers covering each vertex, innermost first
    pub(crate) covering: FxHashMap<NodeId, Vec<usize>>,
    /// Entry vertex of each handler, if its target was reached
    pub(crate) handler_targets: Vec<Option<NodeId>>,
}

impl ControlFlowGraph {
    /// The Entry sentinel.
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// The Exit sentinel.
    #[must_use]
    pub fn exit(&self) -> NodeId {
        self.exit
    }

    /// The underlying graph.
    #[must_use]
    pub fn graph(&self) -> &DirectedGraph<CfgNode, CfgEdgeKind> {
        &self.graph
    }

    /// Returns what `node` stands for.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<CfgNode> {
        self.graph.node(node).copied()
    }

    /// The instruction of `node`, if it is an instruction vertex.
    #[must_use]
    pub fn instr(&self, node: NodeId) -> Option<InstrId> {
        match self.node(node)? {
            CfgNode::Instr(id) => Some(id),
            _ => None,
        }
    }

    /// The vertex of instruction `id`, if it was reached.
    #[must_use]
    pub fn node_of(&self, id: InstrId) -> Option<NodeId> {
        self.by_instr.get(&id).copied()
    }

    /// Returns `true` if instruction `id` was reached by the walk.
    #[must_use]
    pub fn contains(&self, id: InstrId) -> bool {
        self.by_instr.contains_key(&id)
    }

    /// Instruction vertices in code order.
    #[must_use]
    pub fn instruction_nodes(&self) -> &[NodeId] {
        &self.order
    }

    /// Number of instruction vertices.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.order.len()
    }

    /// Outgoing edges of `node` as `(target, kind)`.
    pub fn edges_from(&self, node: NodeId) -> impl Iterator<Item = (NodeId, CfgEdgeKind)> + '_ {
        self.graph
            .outgoing_edges(node)
            .map(|(target, kind)| (target, *kind))
    }

    /// Incoming edges of `node` as `(source, kind)`.
    pub fn edges_to(&self, node: NodeId) -> impl Iterator<Item = (NodeId, CfgEdgeKind)> + '_ {
        self.graph
            .incoming_edges(node)
            .map(|(source, kind)| (source, *kind))
    }

    /// Number of outgoing edges.
    #[must_use]
    pub fn out_degree(&self, node: NodeId) -> usize {
        self.graph.out_degree(node)
    }

    /// Number of incoming edges.
    #[must_use]
    pub fn in_degree(&self, node: NodeId) -> usize {
        self.graph.in_degree(node)
    }

    /// Handler nesting depth of `node`: `1` outside any protected range.
    #[must_use]
    pub fn handler_depth(&self, node: NodeId) -> u32 {
        self.depth.get(&node).copied().unwrap_or(1)
    }

    /// Indices of the handlers protecting `node`, innermost first.
    #[must_use]
    pub fn covering_handlers(&self, node: NodeId) -> &[usize] {
        self.covering.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Entry vertex of handler `index`, if the handler target was reached.
    #[must_use]
    pub fn handler_target(&self, index: usize) -> Option<NodeId> {
        self.handler_targets.get(index).copied().flatten()
    }

    /// Returns `true` if `node` is the entry of some exception handler.
    #[must_use]
    pub fn is_handler_target(&self, node: NodeId) -> bool {
        self.handler_targets.contains(&Some(node))
    }

    /// A textual rendering of all edges, one per line.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (source, target, kind) in self.graph.edges() {
            let _ = writeln!(
                out,
                "{} -> {} [{}]",
                self.label(source),
                self.label(target),
                kind
            );
        }
        out
    }

    fn label(&self, node: NodeId) -> String {
        match self.node(node) {
            Some(CfgNode::Entry) => "entry".to_string(),
            Some(CfgNode::Exit) => "exit".to_string(),
            Some(CfgNode::Instr(id)) => id.to_string(),
            None => node.to_string(),
        }
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl GraphBase for ControlFlowGraph {
    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.graph.node_ids()
    }
}

impl Successors for ControlFlowGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.graph.successors(node)
    }
}

impl Predecessors for ControlFlowGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.graph.predecessors(node)
    }
}
