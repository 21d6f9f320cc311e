//! The IR of one method.
//!
//! An [`IrFunction`] owns its blocks and nodes in slot vectors; removed entries leave a
//! hole, so [`BlockId`]s and [`ValueId`]s stay valid for the lifetime of the function.
//! Block edges are derived from the terminator and the covering exception handlers and
//! are kept in both directions. Every change that can alter the edges goes through
//! [`IrFunction::set_terminator`] or [`IrFunction::set_handlers`], which also keep the
//! phi inputs of the affected successors in step with the new edges.

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

use crate::{
    analysis::ir::{
        BlockId, EdgeKind, IrValue, NodeKind, PhiInput, ScopeOp, Terminator, ValueId,
    },
    metadata::{MethodFlags, MethodId},
    utils::graph::{GraphBase, NodeId, Predecessors, Successors},
    Result,
};

/// A node and the block it lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct IrNode {
    /// What the node computes
    pub kind: NodeKind,
    /// The owning block
    pub block: BlockId,
}

/// An exception handler of the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrHandler {
    /// First block of the handler
    pub target: BlockId,
    /// Multiname index of the caught type, `0` for any
    pub exc_type: u32,
    /// Multiname index of the catch variable, `0` for none
    pub var_name: u32,
}

/// A block: phis, straight-line nodes and a terminator.
#[derive(Debug, Clone, Default)]
pub struct IrBlock {
    phis: Vec<ValueId>,
    body: Vec<ValueId>,
    terminator: Terminator,
    handlers: Vec<usize>,
    succs: Vec<(BlockId, EdgeKind)>,
    preds: Vec<(BlockId, EdgeKind)>,
    /// Scope stack depth when the terminator runs
    pub scope_depth: u32,
}

impl IrBlock {
    /// The phis, evaluated on entry.
    #[must_use]
    pub fn phis(&self) -> &[ValueId] {
        &self.phis
    }

    /// The nodes, in evaluation order.
    #[must_use]
    pub fn body(&self) -> &[ValueId] {
        &self.body
    }

    /// The terminator.
    #[must_use]
    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    /// Indices of the handlers covering this block, innermost first.
    #[must_use]
    pub fn handlers(&self) -> &[usize] {
        &self.handlers
    }

    /// Outgoing edges.
    #[must_use]
    pub fn successors(&self) -> &[(BlockId, EdgeKind)] {
        &self.succs
    }

    /// Incoming edges.
    #[must_use]
    pub fn predecessors(&self) -> &[(BlockId, EdgeKind)] {
        &self.preds
    }

    /// Returns `true` if control leaves this block only through its terminator's
    /// targets, never into a handler.
    #[must_use]
    pub fn is_unprotected(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The IR of one method body.
#[derive(Debug, Clone)]
pub struct IrFunction {
    method: MethodId,
    param_count: u32,
    flags: MethodFlags,
    local_count: u32,
    blocks: Vec<Option<IrBlock>>,
    nodes: Vec<Option<IrNode>>,
    entry: BlockId,
    exit: BlockId,
    handlers: Vec<IrHandler>,
    next_version: u32,
}

impl IrFunction {
    /// Creates a function with empty Entry and Exit blocks.
    ///
    /// # Arguments
    ///
    /// * `method` - The method this IR belongs to
    /// * `param_count` - Declared parameters, excluding `this`
    /// * `flags` - Method flags
    /// * `local_count` - Registers the body uses
    #[must_use]
    pub fn new(method: MethodId, param_count: u32, flags: MethodFlags, local_count: u32) -> Self {
        IrFunction {
            method,
            param_count,
            flags,
            local_count,
            blocks: vec![Some(IrBlock::default()), Some(IrBlock::default())],
            nodes: Vec::new(),
            entry: BlockId(0),
            exit: BlockId(1),
            handlers: Vec::new(),
            next_version: 1,
        }
    }

    /// The method this IR belongs to.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Declared parameters, excluding `this`.
    #[must_use]
    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    /// Method flags.
    #[must_use]
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    /// Registers the IR uses.
    #[must_use]
    pub fn local_count(&self) -> u32 {
        self.local_count
    }

    /// Reserves `count` fresh registers and returns the first.
    pub fn reserve_registers(&mut self, count: u32) -> u32 {
        let base = self.local_count;
        self.local_count += count;
        base
    }

    /// A version number no register read uses yet.
    pub fn fresh_version(&mut self) -> u32 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    /// The Entry block. It has no nodes and a single `Goto`.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The Exit block, the target of every return and unhandled throw.
    #[must_use]
    pub fn exit(&self) -> BlockId {
        self.exit
    }

    /// Exception handlers, innermost first.
    #[must_use]
    pub fn handlers(&self) -> &[IrHandler] {
        &self.handlers
    }

    /// Adds an exception handler and returns its index.
    pub fn add_handler(&mut self, handler: IrHandler) -> usize {
        self.handlers.push(handler);
        self.handlers.len() - 1
    }

    /// Adds an empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(IrBlock::default()));
        id
    }

    /// Returns a block, if it exists.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&IrBlock> {
        self.blocks.get(id.index())?.as_ref()
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Result<&mut IrBlock> {
        self.blocks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| malformed_error!("block {} does not exist", id))
    }

    /// Identifiers of every live block, in creation order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.is_some())
            .map(|(index, _)| BlockId(index as u32))
            .collect()
    }

    /// Number of live blocks, Entry and Exit included.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.iter().flatten().count()
    }

    /// Returns a node, if it exists.
    #[must_use]
    pub fn node(&self, id: ValueId) -> Option<&IrNode> {
        self.nodes.get(id.index())?.as_ref()
    }

    /// Returns what a node computes, if it exists.
    #[must_use]
    pub fn kind(&self, id: ValueId) -> Option<&NodeKind> {
        self.node(id).map(|node| &node.kind)
    }

    /// Mutable access to what a node computes.
    ///
    /// Phi inputs may be edited through this; the edges they name must stay edges of
    /// the phi's block.
    pub fn kind_mut(&mut self, id: ValueId) -> Option<&mut NodeKind> {
        self.nodes
            .get_mut(id.index())?
            .as_mut()
            .map(|node| &mut node.kind)
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Every live node: phis first, then the body, block by block.
    #[must_use]
    pub fn node_ids(&self) -> Vec<ValueId> {
        self.blocks
            .iter()
            .flatten()
            .flat_map(|block| block.phis.iter().chain(block.body.iter()).copied())
            .collect()
    }

    /// Appends a node to `block`. Phis go to the block's phi list.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the block does not exist.
    pub fn append_node(&mut self, block: BlockId, kind: NodeKind) -> Result<ValueId> {
        let index = if kind.is_phi() {
            self.block_mut(block)?.phis.len()
        } else {
            self.block_mut(block)?.body.len()
        };
        self.insert_node(block, index, kind)
    }

    /// Inserts a node at `index` of the body of `block` (or of its phi list for phis).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the block does not exist or `index` is
    /// past the end.
    pub fn insert_node(&mut self, block: BlockId, index: usize, kind: NodeKind) -> Result<ValueId> {
        let id = ValueId(self.nodes.len() as u32);
        let is_phi = kind.is_phi();
        let target = self.block_mut(block)?;
        let list = if is_phi {
            &mut target.phis
        } else {
            &mut target.body
        };
        if index > list.len() {
            return Err(malformed_error!(
                "node position {} is past the end of block {}",
                index,
                block
            ));
        }
        list.insert(index, id);
        self.nodes.push(Some(IrNode { kind, block }));
        Ok(id)
    }

    /// Removes a node from its block. Uses of its value are left alone.
    pub fn remove_node(&mut self, id: ValueId) -> Option<NodeKind> {
        let node = self.nodes.get_mut(id.index())?.take()?;
        if let Some(Some(block)) = self.blocks.get_mut(node.block.index()) {
            block.phis.retain(|&phi| phi != id);
            block.body.retain(|&n| n != id);
        }
        Some(node.kind)
    }

    /// Moves a non-phi node to position `index` of the body of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the node or block does not exist, or the
    /// node is a phi.
    pub fn move_node(&mut self, id: ValueId, block: BlockId, index: usize) -> Result<()> {
        let Some(node) = self.node(id) else {
            return Err(malformed_error!("node {} does not exist", id));
        };
        if node.kind.is_phi() {
            return Err(malformed_error!("phi {} cannot be moved", id));
        }
        let from = node.block;

        self.block_mut(from)?.body.retain(|&n| n != id);
        let target = self.block_mut(block)?;
        let index = index.min(target.body.len());
        target.body.insert(index, id);
        if let Some(Some(node)) = self.nodes.get_mut(id.index()) {
            node.block = block;
        }
        Ok(())
    }

    /// Outgoing edges of `block`.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> &[(BlockId, EdgeKind)] {
        self.block(block).map_or(&[], |b| b.succs.as_slice())
    }

    /// Incoming edges of `block`.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> &[(BlockId, EdgeKind)] {
        self.block(block).map_or(&[], |b| b.preds.as_slice())
    }

    /// Replaces the terminator of `block` and rewires its edges.
    ///
    /// Phi inputs in successors follow the edges: inputs of an edge that disappears
    /// are dropped, inputs of a target reached through a different kind of edge are
    /// relabeled.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `block` or one of the targets does not exist.
    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) -> Result<()> {
        for (target, _) in terminator.targets() {
            if self.block(target).is_none() {
                return Err(malformed_error!(
                    "block {} jumps to missing block {}",
                    block,
                    target
                ));
            }
        }
        self.block_mut(block)?.terminator = terminator;
        self.rewire(block)
    }

    /// Sets the handlers covering `block` and rewires its exceptional edges.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `block` or a handler does not exist.
    pub fn set_handlers(&mut self, block: BlockId, handlers: Vec<usize>) -> Result<()> {
        if let Some(&missing) = handlers.iter().find(|&&h| h >= self.handlers.len()) {
            return Err(malformed_error!("handler {} does not exist", missing));
        }
        self.block_mut(block)?.handlers = handlers;
        self.rewire(block)
    }

    fn edges_of(&self, block: BlockId) -> Vec<(BlockId, EdgeKind)> {
        let Some(data) = self.block(block) else {
            return Vec::new();
        };

        let mut edges = data.terminator.targets();
        match data.terminator {
            Terminator::Return(_) => edges.push((self.exit, EdgeKind::Return)),
            Terminator::Throw(_) if data.handlers.is_empty() => {
                edges.push((self.exit, EdgeKind::Throw));
            }
            _ => {}
        }
        for &index in &data.handlers {
            if let Some(handler) = self.handlers.get(index) {
                let edge = (handler.target, EdgeKind::Throw);
                if !edges.contains(&edge) {
                    edges.push(edge);
                }
            }
        }
        edges
    }

    fn rewire(&mut self, block: BlockId) -> Result<()> {
        let old = std::mem::take(&mut self.block_mut(block)?.succs);
        let new = self.edges_of(block);

        for &(target, kind) in &old {
            if let Some(Some(data)) = self.blocks.get_mut(target.index()) {
                if let Some(pos) = data.preds.iter().position(|&e| e == (block, kind)) {
                    data.preds.remove(pos);
                }
            }
        }
        for &(target, kind) in &new {
            if let Some(Some(data)) = self.blocks.get_mut(target.index()) {
                data.preds.push((block, kind));
            }
        }

        let mut targets: Vec<BlockId> = old.iter().chain(new.iter()).map(|(t, _)| *t).collect();
        targets.sort_unstable();
        targets.dedup();
        for target in targets {
            let kinds: Vec<EdgeKind> = new
                .iter()
                .filter(|(t, _)| *t == target)
                .map(|(_, k)| *k)
                .collect();
            self.reconcile_phis(target, block, &kinds);
        }

        self.block_mut(block)?.succs = new;
        Ok(())
    }

    /// Makes the phi inputs of `target` coming from `from` match the edges `kinds`.
    fn reconcile_phis(&mut self, target: BlockId, from: BlockId, kinds: &[EdgeKind]) {
        let phis = self.block(target).map(|b| b.phis.clone()).unwrap_or_default();
        for phi in phis {
            let Some(NodeKind::Phi(inputs)) = self.kind_mut(phi) else {
                continue;
            };
            let mut mine: Vec<PhiInput> = Vec::new();
            inputs.retain(|input| {
                if input.from == from {
                    mine.push(input.clone());
                    false
                } else {
                    true
                }
            });
            let Some(first) = mine.first().cloned() else {
                continue;
            };
            for kind in kinds {
                let value = mine
                    .iter()
                    .find(|input| input.kind == *kind)
                    .map_or_else(|| first.value.clone(), |input| input.value.clone());
                inputs.push(PhiInput {
                    value,
                    from,
                    kind: *kind,
                });
            }
        }
    }

    /// Removes a block and its nodes, detaching it from every neighbor.
    ///
    /// Predecessors keep their terminators; this is meant for blocks that are no
    /// longer reachable, or whose predecessors are removed as well.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for Entry, Exit or a missing block.
    pub fn remove_block(&mut self, block: BlockId) -> Result<()> {
        if block == self.entry || block == self.exit {
            return Err(malformed_error!("block {} cannot be removed", block));
        }
        let Some(data) = self.blocks.get_mut(block.index()).and_then(Option::take) else {
            return Err(malformed_error!("block {} does not exist", block));
        };

        for &(target, kind) in &data.succs {
            if let Some(Some(succ)) = self.blocks.get_mut(target.index()) {
                succ.preds.retain(|&e| e != (block, kind));
            }
            self.reconcile_phis(target, block, &[]);
        }
        for &(source, kind) in &data.preds {
            if let Some(Some(pred)) = self.blocks.get_mut(source.index()) {
                pred.succs.retain(|&e| e != (block, kind));
            }
        }
        for id in data.phis.iter().chain(data.body.iter()) {
            if let Some(slot) = self.nodes.get_mut(id.index()) {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Inserts an empty block on the edge `from -> to` of `kind`.
    ///
    /// The new block ends in a `Goto(to)`, takes over the phi inputs of the edge and
    /// inherits the handlers and scope depth of `from`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if there is no such edge.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) -> Result<BlockId> {
        if !self.successors(from).contains(&(to, kind)) || kind == EdgeKind::Throw {
            return Err(malformed_error!(
                "no splittable {} edge from {} to {}",
                kind,
                from,
                to
            ));
        }

        let middle = self.add_block();
        let (handlers, scope_depth) = {
            let source = self.block_mut(from)?;
            (source.handlers.clone(), source.scope_depth)
        };
        self.block_mut(middle)?.scope_depth = scope_depth;
        self.set_handlers(middle, handlers)?;

        // The middle block becomes the phi predecessor before the old edge is dropped
        let phis = self.block(to).map(|b| b.phis.clone()).unwrap_or_default();
        for phi in phis {
            if let Some(NodeKind::Phi(inputs)) = self.kind_mut(phi) {
                for input in inputs.iter_mut() {
                    if input.from == from && input.kind == kind {
                        input.from = middle;
                        input.kind = EdgeKind::Default;
                    }
                }
            }
        }
        self.set_terminator(middle, Terminator::Goto(to))?;

        let mut terminator = self.block_mut(from)?.terminator.clone();
        terminator.retarget(kind, middle);
        self.set_terminator(from, terminator)?;
        Ok(middle)
    }

    /// Splits `block` in front of body position `index`.
    ///
    /// The nodes from `index` on and the terminator move to a new block that inherits
    /// the handlers and the scope depth; `block` falls through to it with a `Goto` and
    /// keeps the depth in effect at the split point. Phi
    /// inputs of the old successors are relabeled to come from the new block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the block does not exist or `index` is
    /// past the end of its body.
    pub fn split_block(&mut self, block: BlockId, index: usize) -> Result<BlockId> {
        let (handlers, scope_depth, old_edges) = {
            let source = self.block_mut(block)?;
            if index > source.body.len() {
                return Err(malformed_error!(
                    "split position {} is past the end of block {}",
                    index,
                    block
                ));
            }
            (source.handlers.clone(), source.scope_depth, source.succs.clone())
        };

        let tail = self.add_block();
        self.block_mut(tail)?.scope_depth = scope_depth;
        self.set_handlers(tail, handlers)?;

        let moved = self.block_mut(block)?.body.split_off(index);
        let mut moved_depth: i64 = 0;
        for &id in &moved {
            if let Some(Some(node)) = self.nodes.get_mut(id.index()) {
                node.block = tail;
                match node.kind {
                    NodeKind::Scope {
                        op: ScopeOp::Pop, ..
                    } => moved_depth -= 1,
                    NodeKind::Scope { .. } => moved_depth += 1,
                    _ => {}
                }
            }
        }
        self.block_mut(tail)?.body = moved;
        // The head now ends where the tail starts
        self.block_mut(block)?.scope_depth = (i64::from(scope_depth) - moved_depth).max(0) as u32;

        for (target, kind) in old_edges {
            let phis = self.block(target).map(|b| b.phis.clone()).unwrap_or_default();
            for phi in phis {
                let Some(NodeKind::Phi(inputs)) = self.kind_mut(phi) else {
                    continue;
                };
                if kind == EdgeKind::Throw {
                    // Both halves stay covered, so the handler gains an input
                    let copies: Vec<PhiInput> = inputs
                        .iter()
                        .filter(|i| i.from == block && i.kind == kind)
                        .map(|i| PhiInput {
                            value: i.value.clone(),
                            from: tail,
                            kind,
                        })
                        .collect();
                    inputs.extend(copies);
                } else {
                    for input in inputs.iter_mut() {
                        if input.from == block && input.kind == kind {
                            input.from = tail;
                        }
                    }
                }
            }
        }

        let terminator = std::mem::take(&mut self.block_mut(block)?.terminator);
        self.set_terminator(tail, terminator)?;
        self.set_terminator(block, Terminator::Goto(tail))?;
        Ok(tail)
    }

    /// Blocks reachable from Entry along any edge.
    #[must_use]
    pub fn reachable(&self) -> FxHashSet<BlockId> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![self.entry];
        while let Some(block) = stack.pop() {
            if !seen.insert(block) {
                continue;
            }
            for &(succ, _) in self.successors(block) {
                if !seen.contains(&succ) {
                    stack.push(succ);
                }
            }
        }
        seen
    }

    /// Number of uses of every node value, counting nodes and terminators.
    #[must_use]
    pub fn use_counts(&self) -> FxHashMap<ValueId, usize> {
        let mut counts: FxHashMap<ValueId, usize> = FxHashMap::default();
        let mut count = |value: &IrValue| {
            if let IrValue::Node(id) = value {
                *counts.entry(*id).or_default() += 1;
            }
        };
        for node in self.nodes.iter().flatten() {
            node.kind.operands().into_iter().for_each(&mut count);
        }
        for block in self.blocks.iter().flatten() {
            block.terminator.operands().into_iter().for_each(&mut count);
        }
        counts
    }

    /// Replaces every use of `old` with `new`. Returns the number of uses replaced.
    pub fn replace_uses(&mut self, old: ValueId, new: &IrValue) -> usize {
        let mut replaced = 0;
        let mut visit = |value: &mut IrValue| {
            if *value == IrValue::Node(old) {
                *value = new.clone();
                replaced += 1;
            }
        };
        for node in self.nodes.iter_mut().flatten() {
            node.kind.operands_mut().into_iter().for_each(&mut visit);
        }
        for block in self.blocks.iter_mut().flatten() {
            block.terminator.operands_mut().into_iter().for_each(&mut visit);
        }
        replaced
    }

    /// Applies `f` to every operand of every node and terminator.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(BlockId, &mut IrValue)) {
        for node in self.nodes.iter_mut().flatten() {
            let block = node.block;
            for operand in node.kind.operands_mut() {
                f(block, operand);
            }
        }
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if let Some(block) = block {
                for operand in block.terminator.operands_mut() {
                    f(BlockId(index as u32), operand);
                }
            }
        }
    }

    /// Registers written anywhere in the function.
    #[must_use]
    pub fn written_registers(&self) -> FxHashSet<u32> {
        self.nodes
            .iter()
            .flatten()
            .flat_map(|node| node.kind.written_registers())
            .collect()
    }

    /// Checks the structural invariants: edges agree in both directions, every node
    /// sits in the block it names, and each phi has one input per incoming edge.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] describing the first violation.
    pub fn verify(&self) -> Result<()> {
        for id in self.block_ids() {
            let Some(block) = self.block(id) else {
                continue;
            };
            if block.succs != self.edges_of(id) {
                return Err(malformed_error!("edges of {} are stale", id));
            }
            for &(target, kind) in &block.succs {
                if !self.predecessors(target).contains(&(id, kind)) {
                    return Err(malformed_error!(
                        "edge {} -> {} is missing its back link",
                        id,
                        target
                    ));
                }
            }
            for &node in block.phis.iter().chain(block.body.iter()) {
                match self.node(node) {
                    Some(data) if data.block == id => {}
                    _ => return Err(malformed_error!("node {} is not owned by {}", node, id)),
                }
            }
            for &phi in &block.phis {
                let Some(NodeKind::Phi(inputs)) = self.kind(phi) else {
                    return Err(malformed_error!("{} in the phi list is not a phi", phi));
                };
                let mut edges: Vec<_> = inputs.iter().map(|i| (i.from, i.kind)).collect();
                let mut preds = block.preds.clone();
                edges.sort();
                preds.sort();
                if edges != preds {
                    return Err(malformed_error!(
                        "phi {} has inputs for {:?} but {} has edges {:?}",
                        phi,
                        edges,
                        id,
                        preds
                    ));
                }
            }
        }
        Ok(())
    }
}

impl GraphBase for IrFunction {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.blocks.len()).map(NodeId::new)
    }
}

impl Successors for IrFunction {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        IrFunction::successors(self, BlockId(node.index() as u32))
            .iter()
            .map(|(target, _)| NodeId::new(target.index()))
    }
}

impl Predecessors for IrFunction {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        IrFunction::predecessors(self, BlockId(node.index() as u32))
            .iter()
            .map(|(source, _)| NodeId::new(source.index()))
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "function {} (params {}, locals {})",
            self.method, self.param_count, self.local_count
        )?;
        for id in self.block_ids() {
            let Some(block) = self.block(id) else {
                continue;
            };
            write!(f, "{id}:")?;
            if !block.handlers.is_empty() {
                write!(f, " handlers {:?}", block.handlers)?;
            }
            writeln!(f)?;
            for &node in block.phis.iter().chain(block.body.iter()) {
                if let Some(data) = self.node(node) {
                    writeln!(f, "    {node} = {}", data.kind)?;
                }
            }
            writeln!(f, "    {}", block.terminator)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ir::{BinaryOp, BranchKind, Condition, Constant};

    fn diamond() -> (IrFunction, [BlockId; 4], ValueId) {
        let mut function = IrFunction::new(MethodId(0), 1, MethodFlags::empty(), 2);
        let head = function.add_block();
        let left = function.add_block();
        let right = function.add_block();
        let join = function.add_block();

        let entry = function.entry();
        function.set_terminator(entry, Terminator::Goto(head)).unwrap();
        function
            .set_terminator(
                head,
                Terminator::If {
                    condition: Condition {
                        kind: BranchKind::True,
                        operands: vec![IrValue::local(1, 0)],
                    },
                    on_true: left,
                    on_false: right,
                },
            )
            .unwrap();
        function.set_terminator(left, Terminator::Jump(join)).unwrap();
        function.set_terminator(right, Terminator::Goto(join)).unwrap();
        let phi = function
            .append_node(
                join,
                NodeKind::Phi(vec![
                    PhiInput {
                        value: IrValue::Const(Constant::Int(1)),
                        from: left,
                        kind: EdgeKind::Jump,
                    },
                    PhiInput {
                        value: IrValue::Const(Constant::Int(2)),
                        from: right,
                        kind: EdgeKind::Default,
                    },
                ]),
            )
            .unwrap();
        function
            .set_terminator(join, Terminator::Return(Some(IrValue::Node(phi))))
            .unwrap();

        (function, [head, left, right, join], phi)
    }

    #[test]
    fn test_edges_follow_terminators() {
        let (function, [head, left, right, join], _) = diamond();
        function.verify().unwrap();

        assert_eq!(
            function.successors(head),
            &[(left, EdgeKind::True), (right, EdgeKind::False)]
        );
        assert_eq!(function.predecessors(join).len(), 2);
        assert_eq!(
            function.predecessors(function.exit()),
            &[(join, EdgeKind::Return)]
        );
    }

    #[test]
    fn test_split_edge_moves_phi_inputs() {
        let (mut function, [_, left, _, join], phi) = diamond();
        let middle = function.split_edge(left, join, EdgeKind::Jump).unwrap();
        function.verify().unwrap();

        let Some(NodeKind::Phi(inputs)) = function.kind(phi) else {
            panic!("phi expected");
        };
        assert!(inputs
            .iter()
            .any(|i| i.from == middle && i.kind == EdgeKind::Default));
        assert_eq!(function.successors(left), &[(middle, EdgeKind::Jump)]);
    }

    #[test]
    fn test_retargeting_drops_phi_inputs() {
        let (mut function, [head, _, right, join], phi) = diamond();
        function.set_terminator(head, Terminator::Goto(right)).unwrap();
        assert_eq!(function.successors(head), &[(right, EdgeKind::Default)]);

        let reachable = function.reachable();
        for block in function.block_ids() {
            if !reachable.contains(&block) && block != function.exit() {
                function.remove_block(block).unwrap();
            }
        }
        function.verify().unwrap();

        let Some(NodeKind::Phi(inputs)) = function.kind(phi) else {
            panic!("phi expected");
        };
        assert_eq!(inputs.len(), 1);
        assert_eq!(function.predecessors(join).len(), 1);
    }

    #[test]
    fn test_use_counts_and_replace() {
        let (mut function, [head, ..], phi) = diamond();
        let add = function
            .append_node(
                head,
                NodeKind::Binary {
                    op: BinaryOp::Add,
                    lhs: IrValue::Node(phi),
                    rhs: IrValue::Node(phi),
                },
            )
            .unwrap();
        assert_eq!(function.use_counts().get(&phi), Some(&3));
        assert_eq!(function.use_counts().get(&add), None);

        let replaced = function.replace_uses(phi, &IrValue::Const(Constant::Int(0)));
        assert_eq!(replaced, 3);
    }

    #[test]
    fn test_move_node() {
        let (mut function, [head, left, ..], _) = diamond();
        let node = function
            .append_node(left, NodeKind::Copy(IrValue::local(1, 0)))
            .unwrap();
        function.move_node(node, head, 0).unwrap();
        assert_eq!(function.block(head).unwrap().body(), &[node]);
        assert!(function.block(left).unwrap().body().is_empty());
        function.verify().unwrap();
    }

    #[test]
    fn test_split_block_moves_tail_and_phi_inputs() {
        let (mut function, [_, left, _, join], phi) = diamond();
        let first = function
            .append_node(left, NodeKind::Copy(IrValue::local(1, 0)))
            .unwrap();
        let second = function
            .append_node(left, NodeKind::Copy(IrValue::local(0, 0)))
            .unwrap();

        let tail = function.split_block(left, 1).unwrap();
        function.verify().unwrap();

        assert_eq!(function.block(left).unwrap().body(), &[first]);
        assert_eq!(function.block(tail).unwrap().body(), &[second]);
        assert_eq!(function.node(second).unwrap().block, tail);
        assert_eq!(function.successors(left), &[(tail, EdgeKind::Default)]);
        assert!(function.predecessors(join).contains(&(tail, EdgeKind::Jump)));

        let Some(NodeKind::Phi(inputs)) = function.kind(phi) else {
            panic!("phi expected");
        };
        assert!(inputs.iter().any(|i| i.from == tail && i.kind == EdgeKind::Jump));
        assert!(function.split_block(left, 5).is_err());
    }
}
