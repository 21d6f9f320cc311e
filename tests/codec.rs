//! Round-trip tests of the instruction codec.
//!
//! Every opcode of the table is encoded and decoded again; the result must match the
//! input instruction for instruction once markers are resolved to positions.

use abcscope::{
    assembly::{
        decode, decode_with_handlers, encode, encode_body, Bytecode, Instruction,
        InstructionAssembler, Opcode, OperandLayout, Operands,
    },
    Error, Result,
};
use strum::IntoEnumIterator;

fn assert_round_trip(bytecode: &Bytecode) -> Result<()> {
    let bytes = encode(bytecode)?;
    let decoded = decode(&bytes)?;

    assert_eq!(decoded.resolved_listing()?, bytecode.resolved_listing()?);
    assert_eq!(encode(&decoded)?, bytes);
    Ok(())
}

#[test]
fn test_every_opcode_round_trips() -> Result<()> {
    let mut asm = InstructionAssembler::new();
    for opcode in Opcode::iter() {
        match opcode.layout() {
            OperandLayout::None => asm.op(opcode),
            OperandLayout::U8 => asm.emit(Instruction::with_byte(opcode, 0x80)),
            // Two bytes as a u30
            OperandLayout::U30 => asm.op_index(opcode, 300),
            OperandLayout::U30U30 => asm.op_pair(opcode, 70_000, 2),
            OperandLayout::S24 => asm.branch(opcode, "end"),
            OperandLayout::Switch => asm.lookupswitch("end", &["end"]),
            OperandLayout::Debug => asm.emit(Instruction::new(
                opcode,
                Operands::Debug {
                    kind: 1,
                    name: 12,
                    register: 3,
                    extra: 0,
                },
            )?),
        };
    }
    asm.label("end").returnvoid();

    assert_round_trip(&asm.finish()?)
}

#[test]
fn test_branches_in_both_directions() -> Result<()> {
    let conditionals: Vec<Opcode> = Opcode::iter()
        .filter(|op| op.is_branch() && op.layout() == OperandLayout::S24)
        .collect();

    let mut asm = InstructionAssembler::new();
    asm.label("top");
    for (i, &opcode) in conditionals.iter().enumerate() {
        let target = if i % 2 == 0 { "top" } else { "end" };
        asm.branch(opcode, target);
    }
    asm.label("end").returnvoid();

    assert_round_trip(&asm.finish()?)
}

#[test]
fn test_switches_of_every_size() -> Result<()> {
    for cases in 1..=6 {
        let labels: Vec<String> = (0..cases).map(|i| format!("case{i}")).collect();
        let names: Vec<&str> = labels.iter().map(String::as_str).collect();

        let mut asm = InstructionAssembler::new();
        asm.label("top").getlocal(1).lookupswitch("default", &names);
        for name in &names {
            asm.label(name).jump("top");
        }
        asm.label("default").returnvoid();

        assert_round_trip(&asm.finish()?)?;
    }
    Ok(())
}

#[test]
fn test_switch_offsets_are_relative_to_the_instruction() -> Result<()> {
    // lookupswitch default:+0 cases:[+8], the size of the lookupswitch itself
    let mut asm = InstructionAssembler::new();
    asm.label("self").lookupswitch("self", &["tail"]).label("tail").returnvoid();
    let bytes = encode(&asm.finish()?)?;

    // opcode, s24 default, u30 count, s24 case, returnvoid
    assert_eq!(bytes, [0x1B, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x47]);
    Ok(())
}

#[test]
fn test_handlers_survive_the_round_trip() -> Result<()> {
    let mut asm = InstructionAssembler::new();
    asm.label("try")
        .getlocal(1)
        .throw()
        .label("try_end")
        .label("catch")
        .returnvalue()
        .handler("try", "try_end", "catch", 4, 5);
    let bytecode = asm.finish()?;

    let encoded = encode_body(&bytecode)?;
    assert_eq!(encoded.exceptions.len(), 1);
    let info = encoded.exceptions[0];
    assert_eq!((info.from, info.to, info.target), (0, 2, 2));
    assert_eq!((info.exc_type, info.var_name), (4, 5));

    let decoded = decode_with_handlers(&encoded.code, &encoded.exceptions)?;
    let positions = decoded.positions();
    assert_eq!(
        decoded.resolved_handlers(&positions)?,
        bytecode.resolved_handlers(&bytecode.positions())?
    );
    Ok(())
}

#[test]
fn test_truncated_stream_is_a_codec_error() {
    // pushshort without its operand
    let error = decode(&[0x25]).unwrap_err();
    assert!(matches!(error, Error::Codec { .. }));

    let error = decode(&[0xFF]).unwrap_err();
    assert_eq!(error.category(), "codec");
}

#[test]
fn test_unbound_label_is_reported() {
    let mut asm = InstructionAssembler::new();
    asm.jump("nowhere").returnvoid();
    assert!(asm.finish().is_err());
}
