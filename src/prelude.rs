//! # abcscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the abcscope library. Import this module to get quick access to the essential
//! types for decoding, optimizing and re-encoding method bodies.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all abcscope operations
pub use crate::Error;

/// The result type used throughout abcscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Per-method and batch drivers
pub use crate::pipeline::{lift, BatchReport, MethodFailure, Pipeline};

/// Pipeline configuration
pub use crate::config::{Pass, PipelineConfig};

// ================================================================================================
// Method Metadata
// ================================================================================================

/// Method bodies and the upstream constant pool
pub use crate::metadata::{
    ConstantPool, ExceptionInfo, MethodBody, MethodFlags, MethodId, Multiname, Namespace,
    NamespaceKind, PoolValue,
};

/// Call resolution
pub use crate::metadata::{Binding, MethodEnvironment, MethodTable, NullEnvironment};

// ================================================================================================
// Instructions
// ================================================================================================

/// Instruction streams and the codec
pub use crate::assembly::{
    decode, decode_with_handlers, encode, encode_body, Bytecode, Instruction,
    InstructionAssembler, Marker, Opcode, Operands,
};

// ================================================================================================
// Analysis
// ================================================================================================

/// Control flow, stack bounds and the IR
pub use crate::analysis::{
    ir::{BlockId, IrValue, NodeKind, Terminator, ValueId},
    ControlFlowGraph, IrFunction, StackBounds,
};

// ================================================================================================
// Compiler
// ================================================================================================

/// Passes, scheduling and code generation
pub use crate::compiler::{
    CodeGenerator, CompilerContext, EventKind, EventLog, IrPass, PassScheduler,
};
