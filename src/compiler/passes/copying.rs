//! Copy propagation pass.
//!
//! Register reads ([`IrValue::Local`]) that follow a store to the same register on a
//! straight path are replaced by the stored value, and stores nobody reads are
//! removed afterwards. The builder already forwards registers within the code it
//! lifts; the reads this pass finds mostly come from inlining and tail-call
//! elimination, which pass arguments through registers.
//!
//! # Example
//!
//! Before:
//! ```text
//! store r1, 5
//! v0 = add r1.0, 1
//! store r2, v0
//! return v0
//! ```
//!
//! After:
//! ```text
//! v0 = add 5, 1
//! return v0
//! ```
//!
//! # Algorithm
//!
//! 1. **Forwarding**: blocks are visited in reverse postorder with a map from register
//!    to the value stored last. A block inherits the map of its only predecessor, if
//!    that predecessor reaches it by normal control flow. A write to a register drops
//!    every entry whose value reads that register, since a read is evaluated where it
//!    is used. Phi inputs are forwarded with the map at the end of their predecessor.
//! 2. **Dead stores**: a backward liveness analysis over the block graph finds stores
//!    whose register is not read before the next write on any path. Registers live on
//!    entry to an exception handler stay live throughout the blocks it covers, since
//!    control can leave a protected block between any two instructions.
//! 3. **Clean-up**: copies that pin constants or plain nodes and unused pure nodes
//!    are removed.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    analysis::ir::{BlockId, EdgeKind, IrFunction, IrValue, NodeKind, ValueId},
    compiler::{pass::IrPass, CompilerContext, EventKind, EventLog},
    utils::graph::{algorithms::reverse_postorder, NodeId},
    Result,
};

/// Maximum iterations for the fixed-point algorithm to prevent infinite loops.
const MAX_ITERATIONS: usize = 100;

type StoreMap = FxHashMap<u32, IrValue>;

/// Registers `value` reads where it is used, including reads behind phis.
fn registers_read(function: &IrFunction, value: &IrValue, out: &mut FxHashSet<u32>) {
    let mut pending = vec![value];
    let mut seen: FxHashSet<ValueId> = FxHashSet::default();
    while let Some(value) = pending.pop() {
        match value {
            IrValue::Local(local) => {
                out.insert(local.register);
            }
            IrValue::Node(id) if seen.insert(*id) => {
                if let Some(NodeKind::Phi(inputs)) = function.kind(*id) {
                    pending.extend(inputs.iter().map(|input| &input.value));
                }
            }
            _ => {}
        }
    }
}

/// Register liveness over the block graph.
struct Liveness {
    live_out: FxHashMap<BlockId, FxHashSet<u32>>,
    /// Registers live at every point of a protected block
    protected: FxHashMap<BlockId, FxHashSet<u32>>,
}

impl Liveness {
    fn compute(function: &IrFunction) -> Self {
        let blocks = function.block_ids();
        let mut live_in: FxHashMap<BlockId, FxHashSet<u32>> = FxHashMap::default();
        let mut liveness = Liveness {
            live_out: FxHashMap::default(),
            protected: FxHashMap::default(),
        };

        loop {
            let mut changed = false;
            for &block in blocks.iter().rev() {
                let mut out = FxHashSet::default();
                let mut protected = FxHashSet::default();
                for &(succ, kind) in function.successors(block) {
                    let target = if kind == EdgeKind::Throw {
                        &mut protected
                    } else {
                        &mut out
                    };
                    if let Some(live) = live_in.get(&succ) {
                        target.extend(live.iter().copied());
                    }
                    for &phi in function.block(succ).map_or(&[][..], |b| b.phis()) {
                        if let Some(NodeKind::Phi(inputs)) = function.kind(phi) {
                            for input in inputs.iter().filter(|i| i.from == block && i.kind == kind) {
                                registers_read(function, &input.value, target);
                            }
                        }
                    }
                }
                out.extend(protected.iter().copied());

                liveness.live_out.insert(block, out);
                liveness.protected.insert(block, protected);
                let entry = liveness.scan(function, block, |_, _| {});
                if live_in.get(&block) != Some(&entry) {
                    live_in.insert(block, entry);
                    changed = true;
                }
            }
            if !changed {
                return liveness;
            }
        }
    }

    /// Walks `block` backwards from its live-out set. `visit` sees every body node
    /// with the registers live right after it. Returns the live-in set.
    fn scan(
        &self,
        function: &IrFunction,
        block: BlockId,
        mut visit: impl FnMut(ValueId, &FxHashSet<u32>),
    ) -> FxHashSet<u32> {
        let mut live = self.live_out.get(&block).cloned().unwrap_or_default();
        let empty = FxHashSet::default();
        let protected = self.protected.get(&block).unwrap_or(&empty);
        let Some(data) = function.block(block) else {
            return live;
        };

        for operand in data.terminator().operands() {
            registers_read(function, operand, &mut live);
        }
        for &id in data.body().iter().rev() {
            visit(id, &live);
            let Some(kind) = function.kind(id) else {
                continue;
            };
            for register in kind.written_registers() {
                if !protected.contains(&register) {
                    live.remove(&register);
                }
            }
            if let NodeKind::HasNext2 { object, index } = kind {
                live.insert(*object);
                live.insert(*index);
            }
            for operand in kind.operands() {
                registers_read(function, operand, &mut live);
            }
        }
        live
    }
}

/// Copy propagation pass.
///
/// Forwards stored values to register reads and removes stores that are never read.
pub struct CopyPropagationPass;

impl Default for CopyPropagationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyPropagationPass {
    /// Creates a new copy propagation pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn forward_operand(value: &mut IrValue, stores: &StoreMap) -> bool {
        let IrValue::Local(local) = value else {
            return false;
        };
        match stores.get(&local.register) {
            Some(stored) => {
                *value = stored.clone();
                true
            }
            None => false,
        }
    }

    /// Replaces register reads by stored values. Returns the number of reads replaced.
    fn forward(function: &mut IrFunction) -> usize {
        let entry = NodeId::new(function.entry().index());
        let order: Vec<BlockId> = reverse_postorder(&*function, entry)
            .into_iter()
            .map(|node| BlockId(node.index() as u32))
            .collect();

        let mut forwarded = 0;
        let mut out_maps: FxHashMap<BlockId, StoreMap> = FxHashMap::default();
        for &block in &order {
            let mut stores = match function.predecessors(block) {
                [(pred, kind)] if *kind != EdgeKind::Throw => {
                    out_maps.get(pred).cloned().unwrap_or_default()
                }
                _ => StoreMap::default(),
            };

            let body = function.block(block).map(|b| b.body().to_vec()).unwrap_or_default();
            for id in body {
                if let Some(kind) = function.kind_mut(id) {
                    for operand in kind.operands_mut() {
                        if Self::forward_operand(operand, &stores) {
                            forwarded += 1;
                        }
                    }
                }
                let Some(kind) = function.kind(id) else {
                    continue;
                };
                for register in kind.written_registers() {
                    stores.retain(|_, value| !function.reads_register(value, register));
                    stores.remove(&register);
                }
                if let NodeKind::StoreLocal { register, value } = kind {
                    if !function.reads_register(value, *register) {
                        stores.insert(*register, value.clone());
                    }
                }
            }

            if let Some(data) = function.block(block).filter(|_| !stores.is_empty()) {
                let mut terminator = data.terminator().clone();
                let mut replaced = 0;
                for operand in terminator.operands_mut() {
                    if Self::forward_operand(operand, &stores) {
                        replaced += 1;
                    }
                }
                // Same targets, so the edges and phi inputs stay as they are
                if replaced > 0 && function.set_terminator(block, terminator).is_ok() {
                    forwarded += replaced;
                }
            }
            out_maps.insert(block, stores);
        }

        for &block in &order {
            let phis = function.block(block).map(|b| b.phis().to_vec()).unwrap_or_default();
            for phi in phis {
                let Some(NodeKind::Phi(inputs)) = function.kind_mut(phi) else {
                    continue;
                };
                for input in inputs.iter_mut().filter(|i| i.kind != EdgeKind::Throw) {
                    if let Some(stores) = out_maps.get(&input.from) {
                        if Self::forward_operand(&mut input.value, stores) {
                            forwarded += 1;
                        }
                    }
                }
            }
        }
        forwarded
    }

    /// Removes stores whose register is dead afterwards. Returns the number removed.
    fn remove_dead_stores(function: &mut IrFunction) -> usize {
        let liveness = Liveness::compute(function);
        let mut dead = Vec::new();
        for block in function.block_ids() {
            liveness.scan(function, block, |id, live| {
                if let Some(NodeKind::StoreLocal { register, .. }) = function.kind(id) {
                    if !live.contains(register) {
                        dead.push(id);
                    }
                }
            });
        }
        for &id in &dead {
            function.remove_node(id);
        }
        dead.len()
    }
}

impl IrPass for CopyPropagationPass {
    fn name(&self) -> &'static str {
        "copy-propagation"
    }

    fn description(&self) -> &'static str {
        "Forwards stored register values to their reads and removes dead stores"
    }

    fn run_on_method(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool> {
        let method = ctx.method();
        let changes = EventLog::new();

        for _ in 0..MAX_ITERATIONS {
            let forwarded = Self::forward(function);
            if forwarded > 0 {
                changes
                    .record(EventKind::CopyPropagated)
                    .method(method)
                    .message(format!("forwarded {forwarded} register reads"));
            }

            let stores = Self::remove_dead_stores(function);
            let copies = function.remove_redundant_copies();
            let nodes = function.remove_dead_nodes();
            if stores + copies + nodes > 0 {
                changes
                    .record(EventKind::NodeRemoved)
                    .method(method)
                    .message(format!(
                        "removed {stores} dead stores, {copies} copies and {nodes} unused nodes"
                    ));
            }

            if forwarded + stores + copies + nodes == 0 {
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
        analysis::ir::{BinaryOp, Constant, Terminator},
        assembly::InstructionAssembler,
        compiler::passes::ConstantFoldingPass,
        metadata::{MethodFlags, MethodId},
        test::{count_nodes, lift_asm, run_pass},
    };

    fn is_store(kind: &NodeKind) -> bool {
        matches!(kind, NodeKind::StoreLocal { .. })
    }

    fn straight_line(nodes: Vec<NodeKind>) -> (IrFunction, BlockId, Vec<ValueId>) {
        let mut function = IrFunction::new(MethodId(3), 0, MethodFlags::empty(), 3);
        let block = function.add_block();
        let entry = function.entry();
        function.set_terminator(entry, Terminator::Goto(block)).unwrap();
        let ids = nodes
            .into_iter()
            .map(|kind| function.append_node(block, kind).unwrap())
            .collect::<Vec<_>>();
        let last = *ids.last().unwrap();
        function
            .set_terminator(block, Terminator::Return(Some(IrValue::Node(last))))
            .unwrap();
        (function, block, ids)
    }

    #[test]
    fn test_forwards_stored_value() {
        let (mut function, _, ids) = straight_line(vec![
            NodeKind::StoreLocal {
                register: 1,
                value: IrValue::Const(Constant::Int(7)),
            },
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: IrValue::local(1, 0),
                rhs: IrValue::Const(Constant::Int(1)),
            },
        ]);

        assert!(run_pass(&CopyPropagationPass::new(), &mut function));
        assert_eq!(
            function.kind(ids[1]),
            Some(&NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: IrValue::Const(Constant::Int(7)),
                rhs: IrValue::Const(Constant::Int(1)),
            })
        );
        assert_eq!(count_nodes(&function, is_store), 0);
    }

    #[test]
    fn test_unread_write_lets_copy_through() {
        // r1 = r2; r2 = 0; r1 + 1, where the new r2 is never read
        let (mut function, _, ids) = straight_line(vec![
            NodeKind::StoreLocal {
                register: 1,
                value: IrValue::local(2, 0),
            },
            NodeKind::StoreLocal {
                register: 2,
                value: IrValue::Const(Constant::Int(0)),
            },
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: IrValue::local(1, 0),
                rhs: IrValue::Const(Constant::Int(1)),
            },
        ]);

        assert!(run_pass(&CopyPropagationPass::new(), &mut function));
        assert!(matches!(
            function.kind(ids[2]),
            Some(NodeKind::Binary { lhs, .. }) if *lhs == IrValue::local(2, 0)
        ));
        assert!(function.kind(ids[0]).is_none());
        assert!(function.kind(ids[1]).is_none());
        assert_eq!(count_nodes(&function, is_store), 0);
    }

    #[test]
    fn test_write_invalidates_forwarded_reads() {
        // r1 = r2; r2 = 0; r1 + r2
        let (mut function, _, ids) = straight_line(vec![
            NodeKind::StoreLocal {
                register: 1,
                value: IrValue::local(2, 0),
            },
            NodeKind::StoreLocal {
                register: 2,
                value: IrValue::Const(Constant::Int(0)),
            },
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: IrValue::local(1, 0),
                rhs: IrValue::local(2, 0),
            },
        ]);

        // Only the read of the new r2 is forwarded; r1 still holds the old r2
        assert_eq!(CopyPropagationPass::forward(&mut function), 1);
        assert_eq!(
            function.kind(ids[2]),
            Some(&NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: IrValue::local(1, 0),
                rhs: IrValue::Const(Constant::Int(0)),
            })
        );
        assert!(function.kind(ids[0]).is_some());
        assert!(function.kind(ids[1]).is_some());
    }

    #[test]
    fn test_store_then_return_folds_to_constant() {
        // x = 5; y = x + 1; return y
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(5)
            .setlocal(1)
            .getlocal(1)
            .pushbyte(1)
            .add()
            .setlocal(2)
            .getlocal(2)
            .returnvalue();
        let mut function = lift_asm(0, asm);

        assert!(run_pass(&CopyPropagationPass::new(), &mut function));
        run_pass(&ConstantFoldingPass::new(), &mut function);
        assert_eq!(count_nodes(&function, is_store), 0);

        let returns: Vec<_> = function
            .block_ids()
            .into_iter()
            .filter_map(|b| match function.block(b)?.terminator() {
                Terminator::Return(value) => value.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(returns, vec![IrValue::Const(Constant::Int(6))]);
    }

    #[test]
    fn test_store_visible_to_handler_survives() {
        let mut asm = InstructionAssembler::new();
        asm.label("start")
            .pushbyte(1)
            .setlocal(1)
            .getlocal(0)
            .callpropvoid(1, 0)
            .pushbyte(2)
            .setlocal(1)
            .label("end")
            .returnvoid()
            .label("catch")
            .getlocal(1)
            .returnvalue()
            .handler("start", "end", "catch", 0, 0);
        let mut function = lift_asm(0, asm);
        assert_eq!(count_nodes(&function, is_store), 2);

        run_pass(&CopyPropagationPass::new(), &mut function);
        assert_eq!(count_nodes(&function, is_store), 2);
    }

    #[test]
    fn test_loop_store_stays_live() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(0)
            .setlocal(1)
            .label("top")
            .getlocal(1)
            .pushbyte(10)
            .lessthan()
            .iffalse("done")
            .inclocal(1)
            .jump("top")
            .label("done")
            .getlocal(1)
            .returnvalue();
        let mut function = lift_asm(0, asm);
        assert_eq!(count_nodes(&function, is_store), 2);

        // The counter flows through a phi, so the register itself is never read
        assert!(run_pass(&CopyPropagationPass::new(), &mut function));
        assert_eq!(count_nodes(&function, is_store), 0);
        assert_eq!(count_nodes(&function, NodeKind::is_phi), 1);
    }
}
