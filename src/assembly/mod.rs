//! AVM2 instruction streams: the opcode table, instructions, relocatable markers, the
//! [`Bytecode`] container and the binary codec.
//!
//! # Key Components
//!
//! - [`Opcode`] / [`OpcodeInfo`] - the closed opcode table
//! - [`Instruction`] / [`Operands`] - one decoded instruction
//! - [`Marker`] / [`MarkerTable`] / [`Relocator`] - symbolic branch targets
//! - [`Bytecode`] - ordered instruction list with markers and exception handlers
//! - [`decode`] / [`encode`] - the codec, with `decode(encode(b)) == b` up to marker identity
//! - [`InstructionAssembler`] - fluent construction with named labels
//!
//! # Examples
//!
//! ```rust
//! use abcscope::assembly::{decode, encode};
//!
//! // getlocal0; pushscope; pushbyte 5; returnvalue
//! let bytes = [0xD0, 0x30, 0x24, 0x05, 0x48];
//! let code = decode(&bytes)?;
//! assert_eq!(encode(&code)?, bytes);
//! # Ok::<(), abcscope::Error>(())
//! ```

mod builder;
mod bytecode;
mod decoder;
mod encoder;
mod instruction;
mod marker;
mod opcodes;

pub use builder::InstructionAssembler;
pub use bytecode::{Bytecode, ExceptionHandler, InstrId, ResolvedHandler, ResolvedInstruction};
pub use decoder::{decode, decode_with_handlers};
pub use encoder::{encode, encode_body, EncodedBody};
pub use instruction::{Instruction, Operands};
pub use marker::{Anchor, Marker, MarkerTable, Relocator};
pub use opcodes::{FlowType, InstructionFlags, Opcode, OpcodeInfo, OperandLayout};
