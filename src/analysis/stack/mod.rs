//! Operand and scope stack depth analysis.
//!
//! The analyzer bounds the maximum operand stack depth and the maximum scope depth of a
//! method body. The result sizes the IR builder's simulated stacks and becomes the
//! `max_stack` / `max_scope_depth` metadata of re-encoded bodies.
//!
//! The computation runs in three phases:
//!
//! 1. **Summaries** ([`BlockGraph::build`]): the CFG is split into basic blocks and each
//!    block's peak and net depth changes are computed from the per-instruction
//!    [`stack_effect`]
//! 2. **Reduction**: chains are merged, orphans deleted and reconverging fan-outs collapsed
//! 3. **Paths**: the simple paths of the residual graph are enumerated
//!
//! The result never under-reports the true maximum of a verifiable method. It may
//! over-report when sibling branches have different depths.
//!
//! # Examples
//!
//! ```rust
//! use abcscope::{
//!     analysis::{stack::analyze, ControlFlowGraph},
//!     assembly::InstructionAssembler,
//!     metadata::ConstantPool,
//! };
//!
//! let mut asm = InstructionAssembler::new();
//! asm.prologue().pushbyte(1).pushbyte(2).add().returnvalue();
//! let code = asm.finish()?;
//! let cfg = ControlFlowGraph::build(&code)?;
//!
//! let bounds = analyze(&code, &cfg, &ConstantPool::new(), 1024)?;
//! assert_eq!(bounds.max_stack, 2);
//! assert_eq!(bounds.max_scope, 1);
//! # Ok::<(), abcscope::Error>(())
//! ```

mod analyzer;
mod blocks;
mod effects;

pub use blocks::{BlockGraph, BlockSummary, Delta};
pub use effects::{stack_effect, StackEffect};

use crate::{
    analysis::cfg::ControlFlowGraph,
    assembly::Bytecode,
    metadata::{argument_registers, ConstantPool, MethodFlags},
    Result,
};

/// Upper bounds of the operand and scope stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackBounds {
    /// Maximum operand stack depth
    pub max_stack: u32,
    /// Maximum scope depth above the method's initial scope depth
    pub max_scope: u32,
}

/// Computes the stack bounds of `bytecode`.
///
/// # Arguments
///
/// * `bytecode` - The instructions
/// * `cfg` - The CFG built from `bytecode`
/// * `pool` - Resolves runtime multiname parts
/// * `max_paths` - Step budget of the final path enumeration
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for invalid multiname operands.
pub fn analyze(
    bytecode: &Bytecode,
    cfg: &ControlFlowGraph,
    pool: &ConstantPool,
    max_paths: usize,
) -> Result<StackBounds> {
    let blocks = BlockGraph::build(cfg, bytecode, pool)?;
    Ok(analyzer::reduce_and_walk(&blocks, max_paths))
}

/// Number of registers a body needs: the argument registers plus every register the
/// code touches.
#[must_use]
pub fn compute_local_count(bytecode: &Bytecode, param_count: u32, flags: MethodFlags) -> u32 {
    bytecode
        .iter()
        .flat_map(|(_, instruction)| instruction.registers())
        .map(|register| register.saturating_add(1))
        .fold(argument_registers(param_count, flags), u32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::InstructionAssembler;

    fn bounds(asm: InstructionAssembler) -> StackBounds {
        let code = asm.finish().unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();
        analyze(&code, &cfg, &ConstantPool::new(), 4096).unwrap()
    }

    #[test]
    fn test_if_else_join() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .iffalse("else")
            .pushbyte(1)
            .pushbyte(2)
            .pushbyte(3)
            .add()
            .add()
            .jump("join")
            .label("else")
            .pushbyte(4)
            .label("join")
            .returnvalue();

        assert_eq!(bounds(asm).max_stack, 3);
    }

    #[test]
    fn test_scope_depth() {
        let mut asm = InstructionAssembler::new();
        asm.prologue()
            .getlocal(1)
            .op(crate::assembly::Opcode::PushWith)
            .popscope()
            .popscope()
            .returnvoid();
        assert_eq!(bounds(asm).max_scope, 2);
    }

    #[test]
    fn test_handler_entry_depth() {
        let mut asm = InstructionAssembler::new();
        asm.label("try")
            .findpropstrict(0)
            .callpropvoid(0, 0)
            .label("end")
            .returnvoid()
            .label("catch")
            .pushbyte(1)
            .add()
            .pop()
            .returnvoid()
            .handler("try", "end", "catch", 0, 0);

        // Caught value plus one push
        assert_eq!(bounds(asm).max_stack, 2);
    }

    #[test]
    fn test_local_count() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(1).setlocal(6).inclocal(7).returnvoid();
        let code = asm.finish().unwrap();

        assert_eq!(compute_local_count(&code, 1, MethodFlags::empty()), 8);
        assert_eq!(
            compute_local_count(&Bytecode::new(), 3, MethodFlags::NEED_REST),
            5
        );
    }
}
