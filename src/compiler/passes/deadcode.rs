//! Dead code elimination pass.
//!
//! This pass removes:
//!
//! 1. **Unreachable blocks**: blocks Entry cannot reach along normal or exceptional
//!    edges. Removing a block drops its phi inputs in the successors, which can make
//!    further blocks and phis dead.
//! 2. **Trivial phis**: phis that merge a single value after their inputs changed.
//! 3. **Dead nodes**: side-effect free nodes whose value never reaches a node with an
//!    effect or a terminator. Dead cycles, such as a loop counter nobody reads, are
//!    removed as a whole.
//!
//! The Exit block is never removed, even when nothing returns. Every other block
//! left behind has at least one predecessor.

use rustc_hash::FxHashSet;

use crate::{
    analysis::ir::{IrFunction, IrValue, ValueId},
    compiler::{pass::IrPass, CompilerContext, EventKind, EventLog},
    Result,
};

/// Maximum iterations for the fixed-point loop to prevent infinite loops.
const MAX_ITERATIONS: usize = 100;

/// Removes every block Entry cannot reach, except Exit.
///
/// # Returns
///
/// The number of blocks removed.
///
/// # Errors
///
/// Returns an error if the block graph is inconsistent.
pub(crate) fn remove_unreachable_blocks(function: &mut IrFunction) -> Result<usize> {
    let reachable = function.reachable();
    let dead: Vec<_> = function
        .block_ids()
        .into_iter()
        .filter(|block| !reachable.contains(block) && *block != function.exit())
        .collect();

    for &block in &dead {
        function.remove_block(block)?;
    }
    Ok(dead.len())
}

/// Dead code elimination pass.
///
/// Removes unreachable blocks and unused nodes until the function stops shrinking.
pub struct DeadCodeEliminationPass;

impl Default for DeadCodeEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadCodeEliminationPass {
    /// Creates a new dead code elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Marks every node whose value an effect or a terminator depends on, then
    /// removes the pure nodes left unmarked.
    ///
    /// # Returns
    ///
    /// The number of nodes removed.
    fn sweep_dead_nodes(function: &mut IrFunction) -> usize {
        let mut live: FxHashSet<ValueId> = FxHashSet::default();
        let mut worklist: Vec<ValueId> = Vec::new();
        let mut mark = |value: &IrValue, worklist: &mut Vec<ValueId>| {
            if let IrValue::Node(id) = value {
                if live.insert(*id) {
                    worklist.push(*id);
                }
            }
        };

        for block in function.block_ids() {
            let Some(data) = function.block(block) else {
                continue;
            };
            for operand in data.terminator().operands() {
                mark(operand, &mut worklist);
            }
        }
        let ids = function.node_ids();
        for &id in &ids {
            if let Some(kind) = function.kind(id) {
                if kind.has_side_effects() {
                    mark(&IrValue::Node(id), &mut worklist);
                }
            }
        }
        while let Some(id) = worklist.pop() {
            if let Some(kind) = function.kind(id) {
                for operand in kind.operands() {
                    mark(operand, &mut worklist);
                }
            }
        }

        let dead: Vec<ValueId> = ids.into_iter().filter(|id| !live.contains(id)).collect();
        for &id in &dead {
            function.remove_node(id);
        }
        dead.len()
    }

    /// Runs one round of the pass.
    fn run_iteration(function: &mut IrFunction, ctx: &CompilerContext, changes: &EventLog) -> Result<usize> {
        let method = ctx.method();

        let blocks = remove_unreachable_blocks(function)?;
        if blocks > 0 {
            changes
                .record(EventKind::BlockRemoved)
                .method(method)
                .message(format!("removed {blocks} unreachable blocks"));
        }

        let phis = function.remove_trivial_phis();
        if phis > 0 {
            changes
                .record(EventKind::PhiSimplified)
                .method(method)
                .message(format!("removed {phis} trivial phis"));
        }

        let nodes = Self::sweep_dead_nodes(function);
        if nodes > 0 {
            changes
                .record(EventKind::NodeRemoved)
                .method(method)
                .message(format!("removed {nodes} unused nodes"));
        }

        Ok(blocks + phis + nodes)
    }
}

impl IrPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn description(&self) -> &'static str {
        "Eliminates unreachable blocks and unused nodes"
    }

    fn run_on_method(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();

        for _ in 0..MAX_ITERATIONS {
            if Self::run_iteration(function, ctx, &changes)? == 0 {
                break;
            }
        }

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
        analysis::ir::{BinaryOp, Constant, EdgeKind, NodeKind, PhiInput, Terminator},
        assembly::InstructionAssembler,
        metadata::{MethodFlags, MethodId},
        test::{lift_asm, run_pass},
    };

    #[test]
    fn test_removes_orphaned_blocks() {
        let mut function = IrFunction::new(MethodId(2), 0, MethodFlags::empty(), 1);
        let live = function.add_block();
        let orphan = function.add_block();
        let orphan_tail = function.add_block();
        let entry = function.entry();
        function.set_terminator(entry, Terminator::Goto(live)).unwrap();
        function.set_terminator(live, Terminator::Return(None)).unwrap();
        function.set_terminator(orphan, Terminator::Goto(orphan_tail)).unwrap();
        function.set_terminator(orphan_tail, Terminator::Goto(live)).unwrap();

        assert!(run_pass(&DeadCodeEliminationPass::new(), &mut function));
        assert!(function.block(orphan).is_none());
        assert!(function.block(orphan_tail).is_none());
        assert!(function.block(function.exit()).is_some());

        for block in function.block_ids() {
            if block != function.entry() && block != function.exit() {
                assert!(!function.predecessors(block).is_empty(), "{block} is orphaned");
            }
        }
    }

    #[test]
    fn test_removes_dead_loop_counter() {
        let mut function = IrFunction::new(MethodId(2), 0, MethodFlags::empty(), 1);
        let header = function.add_block();
        let entry = function.entry();
        function.set_terminator(entry, Terminator::Goto(header)).unwrap();
        function
            .set_terminator(header, Terminator::Jump(header))
            .unwrap();
        let phi = function
            .append_node(
                header,
                NodeKind::Phi(vec![
                    PhiInput {
                        value: IrValue::Const(Constant::Int(0)),
                        from: entry,
                        kind: EdgeKind::Default,
                    },
                    PhiInput {
                        value: IrValue::Const(Constant::Int(0)),
                        from: header,
                        kind: EdgeKind::Jump,
                    },
                ]),
            )
            .unwrap();
        let next = function
            .append_node(
                header,
                NodeKind::Binary {
                    op: BinaryOp::Add,
                    lhs: IrValue::Node(phi),
                    rhs: IrValue::Const(Constant::Int(1)),
                },
            )
            .unwrap();
        if let Some(NodeKind::Phi(inputs)) = function.kind_mut(phi) {
            inputs[1].value = IrValue::Node(next);
        }
        function.verify().unwrap();

        assert!(run_pass(&DeadCodeEliminationPass::new(), &mut function));
        assert_eq!(function.node_count(), 0);
    }

    #[test]
    fn test_keeps_effects() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(0)
            .callpropvoid(1, 0)
            .getlocal(1)
            .pushbyte(2)
            .multiply()
            .pop()
            .returnvoid();
        let mut function = lift_asm(1, asm);
        run_pass(&DeadCodeEliminationPass::new(), &mut function);
        assert_eq!(function.node_count(), 1);
        assert!(!run_pass(&DeadCodeEliminationPass::new(), &mut function));
    }
}
