//! The intermediate representation optimization passes work on.
//!
//! An [`IrFunction`] is a graph of [`IrBlock`]s in SSA form. Operand stack traffic is
//! gone: every instruction that computes something becomes a [`NodeKind`] whose result
//! is referenced by [`ValueId`], and values flowing into a block from several
//! predecessors are merged by phi nodes. Each block ends in exactly one [`Terminator`].
//!
//! Registers stay visible in the IR. A register whose content the builder could not
//! forward is an [`IrValue::Local`] operand, and writes are explicit
//! [`NodeKind::StoreLocal`] nodes, so the linearizer can keep the register layout of
//! the input method.
//!
//! # Key Components
//!
//! - [`build_ir`] - lifts a decoded method body into an [`IrFunction`]
//! - [`IrFunction`] - blocks, nodes, handlers and the edge bookkeeping passes rely on
//! - [`NodeKind`] / [`Terminator`] - the operations and block exits
//! - [`FrameState`] - the simulated stack, scope and register contents during lifting
//!
//! # Invariants
//!
//! After construction and after every pass:
//!
//! - every live block has exactly one terminator, and its successor list matches it
//! - predecessor lists mirror successor lists
//! - a phi has one input per incoming `(block, edge kind)` pair

mod builder;
mod cleanup;
mod function;
mod node;
mod state;
mod value;

pub use builder::build_ir;
pub use function::{IrBlock, IrFunction, IrHandler, IrNode};
pub use node::{
    BinaryOp, BranchKind, Condition, EdgeKind, NodeKind, PhiInput, ScopeOp, Terminator, TypeOp,
    UnaryOp,
};
pub use state::FrameState;
pub use value::{BlockId, Constant, IrValue, LocalRef, ValueId};
