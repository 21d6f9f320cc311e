//! Constant folding pass.
//!
//! Evaluates operators whose operands are all constants, collapses phis that merge a
//! single value and resolves branches and switches on constants. Branch pruning makes
//! blocks unreachable; they are removed right away so that their phi inputs do not
//! keep values alive.
//!
//! The pass repeats these steps until nothing changes, so running it a second time
//! directly afterwards finds nothing to do.
//!
//! # Numeric rules
//!
//! Arithmetic follows the virtual machine: operands are converted with `ToNumber`,
//! the `_i` operators and the bitwise operators work on `int` and wrap, `urshift`
//! yields a `uint`. A numeric result that is integral and fits an `int` is stored as
//! an `int`, anything else as a double. Values whose conversion would need string
//! parsing are left alone.

mod eval;

use crate::{
    analysis::ir::{Constant, IrFunction, IrValue, NodeKind, Terminator},
    compiler::{
        pass::IrPass, passes::deadcode::remove_unreachable_blocks, CompilerContext, EventKind,
        EventLog,
    },
    metadata::MethodId,
    Result,
};

/// Constant folding pass.
///
/// Folds operators, trivial phis and constant branches.
pub struct ConstantFoldingPass;

impl Default for ConstantFoldingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantFoldingPass {
    /// Creates a new constant folding pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Folds every operator node with constant operands. Returns the number folded.
    fn fold_nodes(function: &mut IrFunction, method: MethodId, changes: &EventLog) -> usize {
        let mut folded = 0;
        for id in function.node_ids() {
            let result = match function.kind(id) {
                Some(NodeKind::Unary {
                    op,
                    operand: IrValue::Const(value),
                }) => eval::unary(*op, value),
                Some(NodeKind::Binary {
                    op,
                    lhs: IrValue::Const(lhs),
                    rhs: IrValue::Const(rhs),
                }) => eval::binary(*op, lhs, rhs),
                _ => None,
            };
            let Some(constant) = result else {
                continue;
            };

            if let Some(kind) = function.kind(id) {
                changes
                    .record(EventKind::ConstantFolded)
                    .at(method, id.index())
                    .message(format!("{kind} => {constant}"));
            }
            function.replace_uses(id, &IrValue::Const(constant));
            function.remove_node(id);
            folded += 1;
        }
        folded
    }

    /// Replaces branches and switches on constants by a `Goto` to the taken target.
    fn fold_branches(
        function: &mut IrFunction,
        method: MethodId,
        changes: &EventLog,
    ) -> Result<usize> {
        let mut decided = Vec::new();
        for block in function.block_ids() {
            let Some(data) = function.block(block) else {
                continue;
            };
            let target = match data.terminator() {
                Terminator::If {
                    condition,
                    on_true,
                    on_false,
                } => {
                    let constants: Option<Vec<&Constant>> =
                        condition.operands.iter().map(IrValue::as_const).collect();
                    constants
                        .and_then(|operands| eval::branch(condition.kind, &operands))
                        .map(|taken| if taken { *on_true } else { *on_false })
                }
                Terminator::Switch {
                    index: IrValue::Const(index),
                    default,
                    cases,
                } => eval::switch_case(index, cases.len())
                    .map(|case| case.and_then(|i| cases.get(i).copied()).unwrap_or(*default)),
                _ => None,
            };
            if let Some(target) = target {
                decided.push((block, target));
            }
        }

        for &(block, target) in &decided {
            changes
                .record(EventKind::BranchSimplified)
                .at(method, block.index())
                .message(format!("{block} always continues at {target}"));
            function.set_terminator(block, Terminator::Goto(target))?;
        }
        Ok(decided.len())
    }
}

impl IrPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn description(&self) -> &'static str {
        "Folds constant expressions, trivial phis and constant branches"
    }

    fn run_on_method(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool> {
        let method = ctx.method();
        let changes = EventLog::new();

        loop {
            let mut progress = Self::fold_nodes(function, method, &changes);

            let phis = function.remove_trivial_phis();
            if phis > 0 {
                changes
                    .record(EventKind::PhiSimplified)
                    .method(method)
                    .message(format!("{phis} phis merge a single value"));
            }
            progress += phis;

            progress += Self::fold_branches(function, method, &changes)?;

            let blocks = remove_unreachable_blocks(function)?;
            if blocks > 0 {
                changes
                    .record(EventKind::BlockRemoved)
                    .method(method)
                    .message(format!("{blocks} blocks became unreachable"));
            }
            progress += blocks;

            if progress == 0 {
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
mod tests;
