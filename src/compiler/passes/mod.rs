//! The built-in optimization passes.
//!
//! Every pass implements [`IrPass`](crate::compiler::IrPass) and leaves the IR valid,
//! so the scheduler can stop after any of them.
//!
//! | Pass | Name | Group |
//! |------|------|-------|
//! | [`ConstantFoldingPass`] | `constant-folding` | normalize |
//! | [`CopyPropagationPass`] | `copy-propagation` | normalize |
//! | [`DeadCodeEliminationPass`] | `dead-code-elimination` | normalize |
//! | [`LicmPass`] | `licm` | optimize |
//! | [`TailRecursionPass`] | `tail-recursion` | optimize |
//! | [`InliningPass`] | `inlining` | optimize |
//!
//! [`remove_unreachable_code`] works on the instruction stream instead and runs once,
//! before the stack analyzer.

mod callsite;
mod constants;
mod copying;
pub(crate) mod deadcode;
mod inlining;
mod licm;
mod tailcall;
mod unreachable;

pub use constants::ConstantFoldingPass;
pub use copying::CopyPropagationPass;
pub use deadcode::DeadCodeEliminationPass;
pub use inlining::InliningPass;
pub use licm::LicmPass;
pub use tailcall::TailRecursionPass;
pub use unreachable::remove_unreachable_code;
