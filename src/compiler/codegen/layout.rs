//! Block placement for code generation.
//!
//! Blocks are laid out as traces: after a block comes its fallthrough successor when
//! that one is still unplaced, so most `Goto`s and the false arm of most branches need
//! no jump. Exception handler entries start traces of their own after the code they
//! protect.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    analysis::ir::{BlockId, EdgeKind, IrFunction, Terminator},
    Result,
};

/// Splits every edge from a multi-way branch into a block with phis.
///
/// Afterwards each block whose successor has phis ends in a plain `Goto` or `Jump`,
/// so the phi moves can be emitted right before the block's jump. Returns the number
/// of edges split.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the function's edges are inconsistent.
pub(crate) fn split_critical_edges(function: &mut IrFunction) -> Result<usize> {
    let mut critical = Vec::new();
    for block in function.block_ids() {
        let Some(data) = function.block(block) else {
            continue;
        };
        if !matches!(
            data.terminator(),
            Terminator::If { .. } | Terminator::Switch { .. }
        ) {
            continue;
        }
        for &(target, kind) in data.successors() {
            if kind == EdgeKind::Throw {
                continue;
            }
            if function.block(target).is_some_and(|t| !t.phis().is_empty()) {
                critical.push((block, target, kind));
            }
        }
    }

    for &(from, to, kind) in &critical {
        function.split_edge(from, to, kind)?;
    }
    Ok(critical.len())
}

/// The order blocks are emitted in.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    order: Vec<BlockId>,
    position: FxHashMap<BlockId, usize>,
}

impl Layout {
    /// Computes the layout of every block reachable from Entry.
    pub(crate) fn compute(function: &IrFunction) -> Self {
        let exit = function.exit();
        let mut order = Vec::with_capacity(function.block_count());
        let mut placed: FxHashSet<BlockId> = FxHashSet::default();
        let mut pending = vec![function.entry()];

        while let Some(start) = pending.pop() {
            let mut current = Some(start);
            while let Some(block) = current.take() {
                if block == exit || !placed.insert(block) {
                    continue;
                }
                order.push(block);

                let Some(data) = function.block(block) else {
                    continue;
                };
                let preferred = fallthrough(data.terminator());

                // Handlers go to the bottom of the stack, branch targets on top
                for &(target, kind) in data.successors().iter().rev() {
                    if kind == EdgeKind::Throw && !placed.contains(&target) {
                        pending.insert(0, target);
                    }
                }
                for &(target, kind) in data.successors().iter().rev() {
                    if kind != EdgeKind::Throw
                        && Some(target) != preferred
                        && !placed.contains(&target)
                    {
                        pending.push(target);
                    }
                }
                current = preferred.filter(|target| !placed.contains(target));
            }
        }

        let position = order.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        Layout { order, position }
    }

    /// The blocks in emission order.
    pub(crate) fn blocks(&self) -> &[BlockId] {
        &self.order
    }

    /// The block placed right after `block`.
    pub(crate) fn next(&self, block: BlockId) -> Option<BlockId> {
        let position = *self.position.get(&block)?;
        self.order.get(position + 1).copied()
    }

    /// Returns `true` if some normal edge into `block` comes from the same block or a
    /// block placed after it. Such targets start with a `label`.
    pub(crate) fn is_backward_target(&self, function: &IrFunction, block: BlockId) -> bool {
        let Some(&position) = self.position.get(&block) else {
            return false;
        };
        function.predecessors(block).iter().any(|&(pred, kind)| {
            kind != EdgeKind::Throw
                && self
                    .position
                    .get(&pred)
                    .is_some_and(|&from| from >= position)
        })
    }
}

/// The successor that does not need a jump when placed next.
fn fallthrough(terminator: &Terminator) -> Option<BlockId> {
    match terminator {
        Terminator::Goto(target) | Terminator::Jump(target) => Some(*target),
        Terminator::If { on_false, .. } => Some(*on_false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::InstructionAssembler, test::lift_asm};

    #[test]
    fn test_fallthrough_chains_are_kept() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .iffalse("else")
            .pushbyte(1)
            .returnvalue()
            .label("else")
            .pushbyte(2)
            .returnvalue();
        let function = lift_asm(1, asm);
        let layout = Layout::compute(&function);

        // Entry, the branch and both arms; Exit is never placed
        assert_eq!(layout.blocks().len(), 4);
        assert_eq!(layout.blocks()[0], function.entry());
        assert!(!layout.blocks().contains(&function.exit()));

        let branch = layout.blocks()[1];
        let Terminator::If { on_false, .. } = function.block(branch).unwrap().terminator() else {
            panic!("expected a branch");
        };
        assert_eq!(layout.next(branch), Some(*on_false));
    }

    #[test]
    fn test_loop_header_is_backward_target() {
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
            .returnvoid();
        let function = lift_asm(0, asm);
        let layout = Layout::compute(&function);

        let targets: Vec<BlockId> = layout
            .blocks()
            .iter()
            .copied()
            .filter(|&b| layout.is_backward_target(&function, b))
            .collect();
        assert_eq!(targets.len(), 1);
        assert!(!function.block(targets[0]).unwrap().phis().is_empty());
    }

    #[test]
    fn test_split_critical_edges() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(0)
            .setlocal(2)
            .getlocal(1)
            .iffalse("join")
            .pushbyte(5)
            .setlocal(2)
            .label("join")
            .getlocal(2)
            .returnvalue();
        let mut function = lift_asm(1, asm);
        let before = function.block_count();

        // The false edge of the branch goes straight to the join
        let split = split_critical_edges(&mut function).unwrap();
        function.verify().unwrap();
        assert_eq!(split, 1);
        assert_eq!(function.block_count(), before + 1);
        for block in function.block_ids() {
            let data = function.block(block).unwrap();
            if matches!(data.terminator(), Terminator::If { .. }) {
                for &(target, _) in data.successors() {
                    assert!(function.block(target).unwrap().phis().is_empty());
                }
            }
        }
    }
}
