//! Bytes to [`Bytecode`].
//!
//! Decoding is a single forward pass. Each opcode byte selects its operand layout from
//! the opcode table; branch fields become markers through
//! [`crate::assembly::MarkerTable::put_marker_at`] and are bound in one step once every
//! instruction start is known.

use rustc_hash::FxHashMap;

use crate::{
    assembly::{Bytecode, ExceptionHandler, InstrId, Instruction, Opcode, OperandLayout, Operands},
    metadata::ExceptionInfo,
    utils::parser::Parser,
    Error, Result,
};

/// Decodes a method's code.
///
/// # Errors
///
/// Returns [`Error::Codec`] for unknown opcode bytes, streams that end inside an
/// instruction and branch targets outside the code or inside another instruction.
///
/// # Examples
///
/// ```rust
/// use abcscope::assembly::{decode, Opcode};
///
/// // pushbyte 7; returnvalue
/// let code = decode(&[0x24, 0x07, 0x48])?;
/// assert_eq!(code.len(), 2);
/// assert_eq!(code.at(1).map(|(_, i)| i.opcode), Some(Opcode::ReturnValue));
/// # Ok::<(), abcscope::Error>(())
/// ```
pub fn decode(bytes: &[u8]) -> Result<Bytecode> {
    decode_with_handlers(bytes, &[])
}

/// Decodes a method's code together with its exception table.
///
/// # Errors
///
/// Same as [`decode`]; handler offsets must also start instructions or equal the code length.
pub fn decode_with_handlers(bytes: &[u8], exceptions: &[ExceptionInfo]) -> Result<Bytecode> {
    let code_len = u32::try_from(bytes.len())
        .map_err(|_| codec_error!(0, "code of {} bytes is too large", bytes.len()))?;

    let mut parser = Parser::new(bytes);
    let mut bytecode = Bytecode::new();
    let mut offsets: FxHashMap<u32, InstrId> = FxHashMap::default();

    while parser.has_more_data() {
        let start = parser.pos();
        let instruction = decode_instruction(&mut parser, &mut bytecode, code_len)
            .map_err(|error| match error {
                Error::OutOfBounds { .. } => {
                    codec_error!(start, "stream ends inside the instruction at {}", start)
                }
                other => other,
            })?;

        let id = bytecode.push(instruction);
        offsets.insert(start as u32, id);
    }

    for info in exceptions {
        for offset in [info.from, info.to, info.target] {
            if offset > code_len {
                return Err(codec_error!(
                    offset as usize,
                    "exception handler offset {} is outside the code",
                    offset
                ));
            }
        }

        let markers = bytecode.markers_mut();
        let handler = ExceptionHandler {
            from: markers.put_marker_at(info.from),
            to: markers.put_marker_at(info.to),
            target: markers.put_marker_at(info.target),
            exc_type: info.exc_type,
            var_name: info.var_name,
        };
        bytecode.add_handler(handler);
    }

    bytecode.markers_mut().prepare_markers(&offsets, code_len)?;
    Ok(bytecode)
}

fn branch_target(start: usize, base: usize, relative: i32, code_len: u32) -> Result<u32> {
    let target = base as i64 + i64::from(relative);
    if target < 0 || target > i64::from(code_len) {
        return Err(codec_error!(
            start,
            "branch target {} is outside the code (length {})",
            target,
            code_len
        ));
    }

    Ok(target as u32)
}

fn decode_instruction(
    parser: &mut Parser<'_>,
    bytecode: &mut Bytecode,
    code_len: u32,
) -> Result<Instruction> {
    let start = parser.pos();
    let byte = parser.read_u8()?;
    let Some(opcode) = Opcode::from_byte(byte) else {
        return Err(codec_error!(start, "unknown opcode {:#04x}", byte));
    };

    let operands = match opcode.layout() {
        OperandLayout::None => Operands::None,
        OperandLayout::U8 => Operands::Byte(parser.read_u8()?),
        OperandLayout::U30 => Operands::Index(parser.read_u30()?),
        OperandLayout::U30U30 => {
            let first = parser.read_u30()?;
            Operands::Pair(first, parser.read_u30()?)
        }
        OperandLayout::S24 => {
            let relative = parser.read_s24()?;
            let target = branch_target(start, parser.pos(), relative, code_len)?;
            Operands::Branch(bytecode.markers_mut().put_marker_at(target))
        }
        OperandLayout::Switch => {
            // Switch offsets are relative to the lookupswitch opcode itself
            let default = parser.read_s24()?;
            let default = branch_target(start, start, default, code_len)?;
            let case_count = parser.read_u30()?;
            if case_count as usize >= parser.len() {
                return Err(codec_error!(
                    start,
                    "lookupswitch declares {} cases in {} bytes of code",
                    case_count,
                    parser.len()
                ));
            }

            let markers = bytecode.markers_mut();
            let default = markers.put_marker_at(default);
            let mut cases = Vec::with_capacity(case_count as usize + 1);
            for _ in 0..=case_count {
                let relative = parser.read_s24()?;
                cases.push(markers.put_marker_at(branch_target(start, start, relative, code_len)?));
            }
            Operands::Switch { default, cases }
        }
        OperandLayout::Debug => {
            let kind = parser.read_u8()?;
            let name = parser.read_u30()?;
            let register = parser.read_u8()?;
            let extra = parser.read_u30()?;
            Operands::Debug {
                kind,
                name,
                register,
                extra,
            }
        }
    };

    Ok(Instruction { opcode, operands })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Anchor;

    #[test]
    fn test_decode_simple() {
        // getlocal0; pushscope; pushbyte -1; pushshort 300; add; returnvalue
        let bytes = [0xD0, 0x30, 0x24, 0xFF, 0x25, 0xAC, 0x02, 0xA0, 0x48];
        let code = decode(&bytes).unwrap();

        assert_eq!(code.len(), 6);
        assert_eq!(code.at(2).unwrap().1.operands, Operands::Byte(0xFF));
        assert_eq!(code.at(3).unwrap().1.operands, Operands::Index(300));
    }

    #[test]
    fn test_decode_branch_markers() {
        // 0: jump +1 (to 5)
        // 4: nop
        // 5: iftrue -9 (to 0)
        // 9: returnvoid
        let bytes = [0x10, 0x01, 0x00, 0x00, 0x02, 0x11, 0xF7, 0xFF, 0xFF, 0x47];
        let code = decode(&bytes).unwrap();
        let positions = code.positions();

        let (_, jump) = code.at(0).unwrap();
        let Operands::Branch(target) = jump.operands else {
            panic!("expected a branch");
        };
        assert_eq!(code.resolve(target, &positions), Some(2));

        let (_, iftrue) = code.at(2).unwrap();
        let Operands::Branch(target) = iftrue.operands else {
            panic!("expected a branch");
        };
        assert_eq!(code.resolve(target, &positions), Some(0));
    }

    #[test]
    fn test_decode_lookupswitch() {
        // 0: lookupswitch default=12, cases [12, 11]
        // 11: returnvoid
        // 12: returnvoid
        let bytes = [
            0x1B, 0x0C, 0x00, 0x00, 0x01, 0x0C, 0x00, 0x00, 0x0B, 0x00, 0x00, 0x47, 0x47,
        ];
        let code = decode(&bytes).unwrap();
        let positions = code.positions();

        let (_, switch) = code.at(0).unwrap();
        let Operands::Switch { default, cases } = &switch.operands else {
            panic!("expected a switch");
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(code.resolve(*default, &positions), Some(2));
        assert_eq!(code.resolve(cases[1], &positions), Some(1));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(&[0x02, 0xFF]), Err(Error::Codec { offset: 1, .. })));
        // Truncated u30
        assert!(matches!(decode(&[0x2C, 0x80]), Err(Error::Codec { offset: 0, .. })));
        // Branch outside the code
        assert!(matches!(
            decode(&[0x10, 0x10, 0x00, 0x00]),
            Err(Error::Codec { .. })
        ));
        // Branch into the middle of an instruction
        assert!(matches!(
            decode(&[0x10, 0xFE, 0xFF, 0xFF]),
            Err(Error::Codec { offset: 2, .. })
        ));
    }

    #[test]
    fn test_decode_handlers() {
        // 0: nop  1: throw  2: returnvoid
        let exceptions = [ExceptionInfo {
            from: 0,
            to: 2,
            target: 2,
            exc_type: 0,
            var_name: 0,
        }];
        let code = decode_with_handlers(&[0x02, 0x03, 0x47], &exceptions).unwrap();

        let handler = code.handlers()[0];
        let (ret, _) = code.at(2).unwrap();
        assert_eq!(handler.to, handler.target);
        assert_eq!(code.markers().target_of(handler.target), Some(Anchor::Instr(ret)));
    }
}
