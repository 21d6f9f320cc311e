//! Program analysis infrastructure for AVM2 method bodies.
//!
//! This module turns decoded instruction streams into structures the optimizer can
//! reason about. It builds upon the generic graph infrastructure in
//! [`crate::utils::graph`].
//!
//! # Architecture
//!
//! The analysis module is organized into focused sub-modules:
//!
//! - [`cfg`] - Control Flow Graph over single instructions, with exception edges
//! - [`stack`] - Operand and scope stack depth bounds
//! - [`ir`] - The SSA intermediate representation and its builder
//!
//! # Usage
//!
//! ```rust
//! use abcscope::{
//!     analysis::{build_ir, stack, ControlFlowGraph},
//!     assembly::InstructionAssembler,
//!     metadata::{ConstantPool, MethodBody, MethodId},
//! };
//!
//! let mut asm = InstructionAssembler::new();
//! asm.prologue().getlocal(1).iffalse("zero").pushbyte(1).returnvalue();
//! asm.label("zero").pushbyte(0).returnvalue();
//! let code = asm.finish()?;
//!
//! let cfg = ControlFlowGraph::build(&code)?;
//! let pool = ConstantPool::new();
//! let bounds = stack::analyze(&code, &cfg, &pool, 1024)?;
//!
//! let body = MethodBody::new(MethodId(7), 1, Vec::new());
//! let function = build_ir(&body, &code, &cfg, &pool, bounds)?;
//! function.verify()?;
//! # Ok::<(), abcscope::Error>(())
//! ```

pub mod cfg;
pub mod ir;
pub mod stack;

// Re-export primary types at module level
pub use cfg::{CfgEdgeKind, CfgNode, ControlFlowGraph};
pub use ir::{build_ir, IrFunction};
pub use stack::StackBounds;

#[cfg(test)]
mod tests {
    use crate::{
        analysis::{build_ir, ir::NodeKind, stack, ControlFlowGraph, IrFunction, StackBounds},
        assembly::InstructionAssembler,
        metadata::{ConstantPool, MethodBody, MethodId},
    };

    fn analyze(assembler: InstructionAssembler, params: u32) -> (StackBounds, IrFunction) {
        let code = assembler.finish().unwrap();
        let cfg = ControlFlowGraph::build(&code).unwrap();
        let pool = ConstantPool::new();
        let bounds = stack::analyze(&code, &cfg, &pool, 1024).unwrap();
        let body = MethodBody::new(MethodId(0), params, Vec::new());
        let function = build_ir(&body, &code, &cfg, &pool, bounds).unwrap();
        (bounds, function)
    }

    #[test]
    fn test_sequential_method() {
        // return arg1 + arg2
        let mut asm = InstructionAssembler::new();
        asm.prologue().getlocal(1).getlocal(2).add().returnvalue();

        let (bounds, function) = analyze(asm, 2);
        assert_eq!(bounds.max_stack, 2);
        assert_eq!(bounds.max_scope, 1);

        // Entry, Exit and the body
        assert_eq!(function.block_count(), 3);
        let kinds: Vec<_> = function
            .node_ids()
            .into_iter()
            .filter_map(|id| function.kind(id))
            .collect();
        assert!(matches!(kinds.as_slice(), [NodeKind::Scope { .. }, NodeKind::Binary { .. }]));
    }

    #[test]
    fn test_counting_loop() {
        // for (i = 0; i < 10; i++) {}
        let mut asm = InstructionAssembler::new();
        asm.prologue()
            .pushbyte(0)
            .setlocal(1)
            .jump("test")
            .label("body")
            .inclocal(1)
            .label("test")
            .getlocal(1)
            .pushbyte(10)
            .iflt("body")
            .returnvoid();

        let (bounds, function) = analyze(asm, 0);
        assert_eq!(bounds.max_stack, 2);

        let phis: usize = function
            .block_ids()
            .into_iter()
            .filter_map(|block| function.block(block))
            .map(|block| block.phis().len())
            .sum();
        assert_eq!(phis, 1);
        function.verify().unwrap();
    }
}
