// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # abcscope
//!
//! A framework for decoding, analyzing, optimizing and re-encoding AVM2 (ActionScript
//! Byte Code) method bodies. Built in pure Rust, `abcscope` lifts the stack-based
//! instruction stream of a method into an SSA intermediate representation, runs
//! classic optimizations over it and writes a valid, loadable method body back out.
//!
//! ## Features
//!
//! - **Lossless codec** - `decode(encode(x)) == x` for every instruction form, with
//!   branch targets kept as relocatable markers
//! - **Control flow and stack analysis** - instruction-level CFG with exception edges,
//!   and sound `max_stack` / `max_scope_depth` bounds
//! - **SSA IR** - operand stack traffic turned into values, joins merged by phis
//! - **Optimizations** - constant folding, copy propagation, dead code elimination,
//!   loop-invariant code motion, tail-recursion elimination and inlining, run to a
//!   fixed point
//! - **Code generation** - block layout, phi elimination and exception table rebuild
//! - **Batches** - methods are optimized in parallel with per-method failure isolation
//!
//! ## Quick Start
//!
//! ```rust
//! use abcscope::prelude::*;
//!
//! // function (a) { if (a) return 1; return 1; }
//! let mut asm = InstructionAssembler::new();
//! asm.getlocal(1)
//!     .iffalse("else")
//!     .pushbyte(1)
//!     .returnvalue()
//!     .label("else")
//!     .pushbyte(1)
//!     .returnvalue();
//! let encoded = encode_body(&asm.finish()?)?;
//! let body = MethodBody::new(MethodId(0), 1, encoded.code);
//!
//! let mut pool = ConstantPool::new();
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! let rewritten = pipeline.process_method(&body, &mut pool, &NullEnvironment)?;
//! assert_eq!(rewritten.max_stack, 1);
//! # Ok::<(), abcscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `abcscope` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`metadata`] - Constant pool, method bodies and call resolution
//! - [`assembly`] - Opcodes, instructions, markers and the binary codec
//! - [`analysis`] - CFG, stack bounds and the IR
//! - [`compiler`] - Optimization passes, scheduling and code generation
//! - [`pipeline`] - Single-method and batch drivers
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Every error is confined to the
//! method being processed; the batch driver records it and continues.
//!
//! ## Logging
//!
//! The library logs through the [`log`] facade and never installs a logger itself.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use abcscope::prelude::*;
///
/// let code = decode(&[0xD0, 0x30, 0x47])?;
/// assert_eq!(code.len(), 3);
/// # Ok::<(), abcscope::Error>(())
/// ```
pub mod prelude;

/// Low-level helpers: the byte reader and the generic directed graph.
pub mod utils;

/// The collaborators the core reads from: the constant pool, method bodies and the
/// environment that resolves call sites.
pub mod metadata;

/// AVM2 instructions and their binary encoding.
///
/// Branch targets are [`assembly::Marker`]s rather than byte offsets, so code can be
/// inserted and removed freely; offsets are only computed by the encoder.
pub mod assembly;

/// Control flow graphs, the stack and scope depth analyzer and the IR.
pub mod analysis;

/// Optimization passes over the IR and code generation back to bytecode.
pub mod compiler;

/// Pipeline configuration.
pub mod config;

/// Drivers that run the whole pipeline on one method or a batch.
pub mod pipeline;

/// `abcscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `abcscope` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// `abcscope` byte stream reader
///
/// The [`Parser`] reads the variable-length integers and branch offsets of the
/// instruction stream.
///
/// # Example
///
/// ```rust
/// use abcscope::Parser;
///
/// let mut parser = Parser::new(&[0x2A, 0xFF, 0x01]);
/// assert_eq!(parser.read_u8()?, 0x2A);
/// assert_eq!(parser.read_u30()?, 0xFF);
/// # Ok::<(), abcscope::Error>(())
/// ```
pub use utils::Parser;
