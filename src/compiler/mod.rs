//! Optimization passes over the IR and code generation back to bytecode.
//!
//! This module sits between lifting and encoding:
//!
//! - [`crate::analysis`] - bytecode to CFG, stack bounds and IR
//! - [`compiler`](self) - IR passes run to a fixed point, then IR back to bytecode
//! - [`crate::pipeline`] - drives both for single methods and batches
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilerContext              Per-method state shared by passes  │
//! │    ├─ Pool and environment    (multinames, call resolution)      │
//! │    ├─ Callee cache            (lifted IR of inlining candidates) │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  PassScheduler               Grouped fixpoint execution          │
//! │    ├─ Normalize               (folding, copies, dead code)       │
//! │    └─ Optimize                (LICM, tail calls, inlining)       │
//! │    Each round: optimize → normalize → repeat until stable        │
//! │                                                                  │
//! │  IrPass trait                Interface for all passes            │
//! │    ├─ should_run()            Cheap applicability check          │
//! │    └─ run_on_method()         Per-method transformation          │
//! │                                                                  │
//! │  CodeGenerator               IR → bytecode                       │
//! │    ├─ Block layout            (fallthrough traces)               │
//! │    ├─ Phi elimination         (phis → register moves)            │
//! │    └─ Instruction selection   (nodes → AVM2 instructions)        │
//! │                                                                  │
//! │  EventLog                    Change tracking and diagnostics     │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod codegen;
mod context;
mod events;
mod pass;
mod passes;
mod scheduler;

pub use codegen::CodeGenerator;
pub use context::CompilerContext;
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use pass::IrPass;
pub use passes::{
    remove_unreachable_code, ConstantFoldingPass, CopyPropagationPass, DeadCodeEliminationPass,
    InliningPass, LicmPass, TailRecursionPass,
};
pub use scheduler::PassScheduler;
