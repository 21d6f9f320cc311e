//! Control flow graph construction over instruction streams.
//!
//! The CFG has one vertex per reachable instruction plus distinguished Entry and Exit
//! sentinels. It is the input of the stack/scope analyzer, the bytecode-level dead code
//! removal and the IR builder.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - the graph with handler coverage information
//! - [`CfgNode`] - Entry, Exit or an instruction
//! - [`CfgEdgeKind`] - Default, True, False, Jump, Case, DefaultCase, Throw, Return
//!
//! # Invariants
//!
//! - Entry has exactly one successor, the first instruction
//! - no two edges share `(from, to, kind)`
//! - every branch instruction's edges match its opcode category

mod builder;
mod edge;
mod graph;

pub use edge::CfgEdgeKind;
pub use graph::{CfgNode, ControlFlowGraph};
