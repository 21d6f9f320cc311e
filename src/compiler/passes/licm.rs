//! Loop-invariant code motion (LICM) pass.
//!
//! Loops are the cyclic strongly connected components of the block graph. For a loop
//! with a single entry edge, pure operators whose operands do not change inside the
//! loop are moved to a preheader on that edge, so they run once instead of once per
//! iteration.
//!
//! # Invariant operands
//!
//! An operand is loop-invariant if it is
//!
//! - a constant,
//! - a read of a register no node in the loop writes,
//! - a node defined outside the loop that does not read such a register through a phi,
//! - or a node already hoisted.
//!
//! # Preheaders
//!
//! The block on the entry edge is reused when it falls through to the header only.
//! Otherwise the edge is split. Nothing is hoisted across exception handler
//! boundaries: the preheader must be covered by the same handlers as the header.
//!
//! # Nested loops
//!
//! After an outer loop is processed, its header is cut and the components of the
//! remaining blocks are processed the same way, so each operator ends up in the
//! outermost loop it is invariant in.

use rustc_hash::FxHashSet;

use crate::{
    analysis::ir::{BlockId, EdgeKind, IrFunction, IrValue, NodeKind, ValueId},
    compiler::{pass::IrPass, CompilerContext, EventKind, EventLog},
    metadata::MethodId,
    utils::graph::{
        algorithms::{is_cyclic, strongly_connected_components},
        GraphBase, NodeId, Successors,
    },
    Result,
};

/// A set of blocks viewed as a graph of its own, optionally without the edges into
/// one block.
struct Region<'a> {
    function: &'a IrFunction,
    members: &'a FxHashSet<BlockId>,
    cut: Option<BlockId>,
}

impl GraphBase for Region<'_> {
    fn node_count(&self) -> usize {
        GraphBase::node_count(self.function)
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        let mut ids: Vec<BlockId> = self.members.iter().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(|block| NodeId::new(block.index()))
    }
}

impl Successors for Region<'_> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.function
            .successors(BlockId(node.index() as u32))
            .iter()
            .map(|(target, _)| *target)
            .filter(|target| self.members.contains(target) && Some(*target) != self.cut)
            .map(|target| NodeId::new(target.index()))
    }
}

/// Loop-invariant code motion pass.
pub struct LicmPass;

impl Default for LicmPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LicmPass {
    /// Creates a new LICM pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The loops among `members`, ignoring edges into `cut`.
    fn loops(
        function: &IrFunction,
        members: &FxHashSet<BlockId>,
        cut: Option<BlockId>,
    ) -> Vec<FxHashSet<BlockId>> {
        let region = Region {
            function,
            members,
            cut,
        };
        strongly_connected_components(&region)
            .into_iter()
            .filter(|scc| is_cyclic(&region, scc))
            .map(|scc| scc.into_iter().map(|n| BlockId(n.index() as u32)).collect())
            .collect()
    }

    /// The only edge entering `body` from outside, if there is exactly one and it is
    /// a normal control flow edge.
    fn entry_edge(
        function: &IrFunction,
        body: &FxHashSet<BlockId>,
    ) -> Option<(BlockId, BlockId, EdgeKind)> {
        let mut entry = None;
        for &block in body {
            for &(pred, kind) in function.predecessors(block) {
                if body.contains(&pred) {
                    continue;
                }
                if entry.is_some() || kind == EdgeKind::Throw {
                    return None;
                }
                entry = Some((pred, block, kind));
            }
        }
        entry
    }

    fn is_invariant(
        function: &IrFunction,
        value: &IrValue,
        body: &FxHashSet<BlockId>,
        written: &FxHashSet<u32>,
        hoisted: &FxHashSet<ValueId>,
    ) -> bool {
        match value {
            IrValue::Const(_) => true,
            IrValue::Local(local) => !written.contains(&local.register),
            IrValue::Node(id) => {
                if hoisted.contains(id) {
                    return true;
                }
                function.node(*id).is_some_and(|node| !body.contains(&node.block))
                    && !written.iter().any(|&r| function.reads_register(value, r))
            }
        }
    }

    /// Invariant operators of the loop, in an order that respects their dependencies.
    fn invariant_nodes(function: &IrFunction, body: &FxHashSet<BlockId>) -> Vec<ValueId> {
        let mut blocks: Vec<BlockId> = body.iter().copied().collect();
        blocks.sort_unstable();

        let candidates: Vec<ValueId> = blocks
            .iter()
            .filter_map(|&block| function.block(block))
            .flat_map(|block| block.body().iter().copied())
            .filter(|&id| {
                matches!(
                    function.kind(id),
                    Some(NodeKind::Unary { .. } | NodeKind::Binary { .. })
                )
            })
            .collect();
        let written: FxHashSet<u32> = blocks
            .iter()
            .filter_map(|&block| function.block(block))
            .flat_map(|block| block.body().iter())
            .filter_map(|&id| function.kind(id))
            .flat_map(NodeKind::written_registers)
            .collect();

        let mut order = Vec::new();
        let mut hoisted = FxHashSet::default();
        loop {
            let before = order.len();
            for &id in &candidates {
                if hoisted.contains(&id) {
                    continue;
                }
                let invariant = function.kind(id).is_some_and(|kind| {
                    kind.operands()
                        .into_iter()
                        .all(|operand| Self::is_invariant(function, operand, body, &written, &hoisted))
                });
                if invariant {
                    hoisted.insert(id);
                    order.push(id);
                }
            }
            if order.len() == before {
                return order;
            }
        }
    }

    /// Hoists the invariant operators of one loop. Returns the number moved.
    fn hoist(
        function: &mut IrFunction,
        body: &FxHashSet<BlockId>,
        method: MethodId,
        changes: &EventLog,
    ) -> Result<usize> {
        let Some((pred, header, kind)) = Self::entry_edge(function, body) else {
            return Ok(0);
        };
        let header_handlers = function
            .block(header)
            .map(|b| b.handlers().to_vec())
            .unwrap_or_default();
        let pred_handlers = function
            .block(pred)
            .map(|b| b.handlers().to_vec())
            .unwrap_or_default();
        if header_handlers != pred_handlers {
            return Ok(0);
        }

        let nodes = Self::invariant_nodes(function, body);
        if nodes.is_empty() {
            return Ok(0);
        }

        let preheader = if pred != function.entry() && function.successors(pred).len() == 1 {
            pred
        } else {
            function.split_edge(pred, header, kind)?
        };

        for &id in &nodes {
            if let Some(kind) = function.kind(id) {
                changes
                    .record(EventKind::CodeHoisted)
                    .at(method, id.index())
                    .message(format!("{id} = {kind} hoisted out of the loop at {header}"));
            }
            function.move_node(id, preheader, usize::MAX)?;
        }
        Ok(nodes.len())
    }

    /// Processes the loops among `members`, outer loops first.
    fn process(
        function: &mut IrFunction,
        members: &FxHashSet<BlockId>,
        cut: Option<BlockId>,
        method: MethodId,
        changes: &EventLog,
    ) -> Result<usize> {
        let mut hoisted = 0;
        for body in Self::loops(function, members, cut) {
            hoisted += Self::hoist(function, &body, method, changes)?;

            if let Some((_, header, _)) = Self::entry_edge(function, &body) {
                hoisted += Self::process(function, &body, Some(header), method, changes)?;
            }
        }
        Ok(hoisted)
    }
}

impl IrPass for LicmPass {
    fn name(&self) -> &'static str {
        "licm"
    }

    fn description(&self) -> &'static str {
        "Moves loop-invariant operators into loop preheaders"
    }

    fn run_on_method(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();

        let all: FxHashSet<BlockId> = function.block_ids().into_iter().collect();
        Self::process(function, &all, None, ctx.method(), &changes)?;

        let changed = !changes.is_empty();
        if changed {
            ctx.events.merge(&changes);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ir::BinaryOp,
        assembly::InstructionAssembler,
        test::{lift_asm, run_pass},
    };

    fn find_binary(function: &IrFunction, op: BinaryOp) -> ValueId {
        function
            .node_ids()
            .into_iter()
            .find(|&id| matches!(function.kind(id), Some(NodeKind::Binary { op: o, .. }) if *o == op))
            .unwrap()
    }

    fn counted_loop(asm: &mut InstructionAssembler) {
        asm.label("top")
            .getlocal(2)
            .getlocal(1)
            .pushbyte(3)
            .multiply()
            .lessthan()
            .iffalse("done")
            .inclocal(2)
            .jump("top")
            .label("done")
            .returnvoid();
    }

    #[test]
    fn test_hoists_into_fallthrough_block() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(0).setlocal(2);
        counted_loop(&mut asm);
        let mut function = lift_asm(1, asm);
        let blocks = function.block_count();

        assert!(run_pass(&LicmPass::new(), &mut function));
        let multiply = find_binary(&function, BinaryOp::Multiply);
        let first = function.successors(function.entry())[0].0;
        assert_eq!(function.node(multiply).unwrap().block, first);
        assert_eq!(function.block_count(), blocks);

        // The less-than depends on the counter and stays
        let less = find_binary(&function, BinaryOp::LessThan);
        assert_ne!(function.node(less).unwrap().block, first);
        assert!(!run_pass(&LicmPass::new(), &mut function));
    }

    #[test]
    fn test_splits_branching_entry() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(0)
            .setlocal(2)
            .getlocal(1)
            .iffalse("done");
        counted_loop(&mut asm);
        let mut function = lift_asm(1, asm);
        let blocks = function.block_count();

        assert!(run_pass(&LicmPass::new(), &mut function));
        assert_eq!(function.block_count(), blocks + 1);
        let multiply = find_binary(&function, BinaryOp::Multiply);
        let preheader = function.node(multiply).unwrap().block;
        assert_eq!(function.successors(preheader).len(), 1);
    }

    #[test]
    fn test_register_written_in_loop_is_variant() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(0)
            .setlocal(2)
            .label("top")
            .getlocal(1)
            .pushbyte(3)
            .multiply()
            .setlocal(1)
            .getlocal(2)
            .getlocal(1)
            .lessthan()
            .iffalse("done")
            .inclocal(2)
            .jump("top")
            .label("done")
            .returnvoid();
        let mut function = lift_asm(1, asm);
        assert!(!run_pass(&LicmPass::new(), &mut function));
    }
}
