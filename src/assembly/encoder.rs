//! [`Bytecode`] to bytes.
//!
//! Encoding mirrors decoding: one forward pass writes every opcode and operand and
//! records each instruction's byte position, writing zero placeholders for branch
//! fields and registering them with a [`Relocator`]. A second step rewrites the
//! placeholders once all positions are known.

use rustc_hash::FxHashMap;

use crate::{
    assembly::{Anchor, Bytecode, InstrId, Instruction, Marker, Operands, Relocator},
    metadata::ExceptionInfo,
    utils::parser::{write_s24, write_u30, U30_MAX},
    Error, Result,
};

/// Encoded code together with its exception table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    /// Raw instruction bytes
    pub code: Vec<u8>,
    /// Exception table with byte offsets, in handler order
    pub exceptions: Vec<ExceptionInfo>,
}

/// Encodes an instruction stream.
///
/// # Errors
///
/// Returns [`Error::Codec`] for operands that do not fit their encoding and
/// [`Error::Relocation`] for branch markers that cannot be resolved.
pub fn encode(bytecode: &Bytecode) -> Result<Vec<u8>> {
    Ok(encode_body(bytecode)?.code)
}

/// Encodes an instruction stream and its exception handlers.
///
/// # Errors
///
/// Same as [`encode`]. Handler markers that cannot be resolved are reported as
/// [`Error::Relocation`] as well.
///
/// # Examples
///
/// ```rust
/// use abcscope::assembly::{decode, encode_body};
///
/// let bytes = [0x10, 0x00, 0x00, 0x00, 0x47];
/// let body = encode_body(&decode(&bytes)?)?;
/// assert_eq!(body.code, bytes);
/// # Ok::<(), abcscope::Error>(())
/// ```
pub fn encode_body(bytecode: &Bytecode) -> Result<EncodedBody> {
    let mut code = Vec::with_capacity(bytecode.len() * 2);
    let mut offsets: FxHashMap<InstrId, usize> = FxHashMap::default();
    let mut relocator = Relocator::new();

    for (position, (id, instruction)) in bytecode.iter().enumerate() {
        offsets.insert(id, code.len());
        encode_instruction(&mut code, &mut relocator, position, instruction)?;
    }

    relocator.solve(&mut code, bytecode, &offsets)?;

    let end = code.len();
    let offset_of = |marker: Marker| -> Result<u32> {
        let offset = match bytecode.markers().target_of(marker) {
            Some(Anchor::Instr(id)) => offsets.get(&id).copied(),
            Some(Anchor::End) => Some(end),
            None => None,
        };
        offset.map(|offset| offset as u32).ok_or_else(|| Error::Relocation {
            message: format!("exception handler marker {marker} does not resolve"),
            dump: bytecode.dump(),
        })
    };

    let exceptions = bytecode
        .handlers()
        .iter()
        .map(|handler| {
            Ok(ExceptionInfo {
                from: offset_of(handler.from)?,
                to: offset_of(handler.to)?,
                target: offset_of(handler.target)?,
                exc_type: handler.exc_type,
                var_name: handler.var_name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EncodedBody { code, exceptions })
}

fn check_u30(position: usize, instruction: &Instruction, value: u32) -> Result<u32> {
    if value > U30_MAX {
        return Err(codec_error!(
            position,
            "operand {} of {} does not fit into a u30",
            value,
            instruction.opcode
        ));
    }
    Ok(value)
}

fn encode_instruction(
    code: &mut Vec<u8>,
    relocator: &mut Relocator,
    position: usize,
    instruction: &Instruction,
) -> Result<()> {
    if instruction.operands.layout() != instruction.opcode.layout() {
        return Err(codec_error!(
            position,
            "{} carries {:?} operands",
            instruction.opcode,
            instruction.operands.layout()
        ));
    }

    let start = code.len();
    code.push(instruction.opcode.byte());

    match &instruction.operands {
        Operands::None => {}
        Operands::Byte(value) => code.push(*value),
        Operands::Index(value) => write_u30(code, check_u30(position, instruction, *value)?),
        Operands::Pair(first, second) => {
            write_u30(code, check_u30(position, instruction, *first)?);
            write_u30(code, check_u30(position, instruction, *second)?);
        }
        Operands::Branch(target) => {
            let field = code.len();
            write_s24(code, 0);
            relocator.patch(field, code.len(), *target);
        }
        Operands::Switch { default, cases } => {
            if cases.is_empty() {
                return Err(codec_error!(position, "lookupswitch without cases"));
            }

            relocator.patch(code.len(), start, *default);
            write_s24(code, 0);
            write_u30(code, check_u30(position, instruction, (cases.len() - 1) as u32)?);
            for case in cases {
                relocator.patch(code.len(), start, *case);
                write_s24(code, 0);
            }
        }
        Operands::Debug {
            kind,
            name,
            register,
            extra,
        } => {
            code.push(*kind);
            write_u30(code, check_u30(position, instruction, *name)?);
            code.push(*register);
            write_u30(code, check_u30(position, instruction, *extra)?);
        }
    }

    Ok(())
}
