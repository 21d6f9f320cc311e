use super::*;
use crate::{
    analysis::ir::{BinaryOp, BranchKind, UnaryOp},
    assembly::InstructionAssembler,
    test::{lift_asm, run_pass},
};

fn returned_values(function: &IrFunction) -> Vec<Option<IrValue>> {
    function
        .block_ids()
        .into_iter()
        .filter_map(|id| match function.block(id)?.terminator() {
            Terminator::Return(value) => Some(value.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_pass_creation() {
    let pass = ConstantFoldingPass::new();
    assert_eq!(pass.name(), "constant-folding");
    assert!(!pass.description().is_empty());
}

#[test]
fn test_int32_conversion() {
    assert_eq!(eval::to_int32(4_294_967_301.0), 5);
    assert_eq!(eval::to_int32(-1.5), -1);
    assert_eq!(eval::to_int32(2_147_483_648.0), i32::MIN);
    assert_eq!(eval::to_int32(f64::NAN), 0);
    assert_eq!(eval::to_uint32(-1.0), u32::MAX);
    assert_eq!(eval::to_uint32(f64::INFINITY), 0);
}

#[test]
fn test_numeric_widening() {
    let max = Constant::Int(i32::MAX);
    let one = Constant::Int(1);
    assert_eq!(
        eval::binary(BinaryOp::Add, &max, &one),
        Some(Constant::Double(2_147_483_648.0))
    );
    assert_eq!(
        eval::binary(BinaryOp::AddI, &max, &one),
        Some(Constant::Int(i32::MIN))
    );
    assert_eq!(
        eval::binary(BinaryOp::Divide, &Constant::Int(7), &Constant::Int(2)),
        Some(Constant::Double(3.5))
    );
    assert_eq!(
        eval::binary(BinaryOp::Multiply, &Constant::UInt(3), &Constant::Double(2.0)),
        Some(Constant::Int(6))
    );
    assert_eq!(
        eval::binary(BinaryOp::URShift, &Constant::Int(-1), &Constant::Int(28)),
        Some(Constant::UInt(15))
    );
    assert_eq!(
        eval::binary(BinaryOp::LShift, &Constant::Int(1), &Constant::Int(33)),
        Some(Constant::Int(2))
    );
    assert_eq!(eval::unary(UnaryOp::Negate, &Constant::Int(0)), Some(Constant::Double(-0.0)));
    assert_eq!(eval::unary(UnaryOp::Sxi8, &Constant::Int(0xFF)), Some(Constant::Int(-1)));
    assert_eq!(eval::unary(UnaryOp::Increment, &Constant::Null), Some(Constant::Int(1)));
    assert!(matches!(
        eval::unary(UnaryOp::Increment, &Constant::Undefined),
        Some(Constant::Double(v)) if v.is_nan()
    ));
}

#[test]
fn test_strings() {
    let hello = Constant::String("n=".into());
    assert_eq!(
        eval::binary(BinaryOp::Add, &hello, &Constant::Int(4)),
        Some(Constant::String("n=4".into()))
    );
    assert_eq!(
        eval::binary(BinaryOp::Add, &hello, &Constant::Double(0.5)),
        None
    );
    assert_eq!(
        eval::binary(BinaryOp::Subtract, &hello, &Constant::Int(1)),
        None
    );
    assert_eq!(
        eval::unary(UnaryOp::TypeOf, &Constant::Null),
        Some(Constant::String("object".into()))
    );
    assert_eq!(eval::unary(UnaryOp::CoerceS, &Constant::Undefined), Some(Constant::Null));
    assert_eq!(
        eval::unary(UnaryOp::ConvertS, &Constant::Undefined),
        Some(Constant::String("undefined".into()))
    );
}

#[test]
fn test_comparisons() {
    let nan = Constant::Double(f64::NAN);
    let one = Constant::Int(1);
    assert_eq!(eval::binary(BinaryOp::LessThan, &nan, &one), Some(Constant::Bool(false)));
    assert_eq!(eval::binary(BinaryOp::GreaterEquals, &nan, &one), Some(Constant::Bool(false)));
    assert_eq!(eval::branch(BranchKind::Nlt, &[&nan, &one]), Some(true));
    assert_eq!(eval::branch(BranchKind::Lt, &[&nan, &one]), Some(false));

    assert_eq!(eval::loose_equals(&Constant::Null, &Constant::Undefined), Some(true));
    assert_eq!(eval::strict_equals(&Constant::Null, &Constant::Undefined), Some(false));
    assert_eq!(eval::strict_equals(&one, &Constant::Double(1.0)), Some(true));
    assert_eq!(eval::loose_equals(&Constant::Bool(true), &one), Some(true));
    assert_eq!(eval::loose_equals(&Constant::String("1".into()), &one), None);
    assert_eq!(
        eval::binary(
            BinaryOp::LessThan,
            &Constant::String("a".into()),
            &Constant::String("b".into())
        ),
        Some(Constant::Bool(true))
    );
}

#[test]
fn test_switch_case() {
    assert_eq!(eval::switch_case(&Constant::Int(1), 3), Some(Some(1)));
    assert_eq!(eval::switch_case(&Constant::Int(3), 3), Some(None));
    assert_eq!(eval::switch_case(&Constant::Int(-1), 3), Some(None));
    assert_eq!(eval::switch_case(&Constant::String("x".into()), 3), None);
}

#[test]
fn test_folds_arithmetic() {
    let mut asm = InstructionAssembler::new();
    asm.pushbyte(2).pushbyte(3).add().pushbyte(4).multiply().returnvalue();
    let mut function = lift_asm(0, asm);

    assert!(run_pass(&ConstantFoldingPass::new(), &mut function));
    assert_eq!(function.node_count(), 0);
    assert_eq!(
        returned_values(&function),
        vec![Some(IrValue::Const(Constant::Int(20)))]
    );
}

#[test]
fn test_prunes_constant_branch() {
    let mut asm = InstructionAssembler::new();
    asm.pushtrue()
        .iffalse("other")
        .pushbyte(1)
        .returnvalue()
        .label("other")
        .pushbyte(2)
        .returnvalue();
    let mut function = lift_asm(0, asm);
    let before = function.block_count();

    assert!(run_pass(&ConstantFoldingPass::new(), &mut function));
    assert_eq!(function.block_count(), before - 1);
    assert_eq!(
        returned_values(&function),
        vec![Some(IrValue::Const(Constant::Int(1)))]
    );
}

#[test]
fn test_phi_of_pruned_branch_collapses() {
    let mut asm = InstructionAssembler::new();
    asm.pushfalse()
        .iftrue("then")
        .pushbyte(10)
        .jump("join")
        .label("then")
        .pushbyte(20)
        .label("join")
        .pushbyte(1)
        .add()
        .returnvalue();
    let mut function = lift_asm(0, asm);
    assert_eq!(crate::test::count_nodes(&function, NodeKind::is_phi), 1);

    assert!(run_pass(&ConstantFoldingPass::new(), &mut function));
    assert_eq!(crate::test::count_nodes(&function, NodeKind::is_phi), 0);
    assert_eq!(
        returned_values(&function),
        vec![Some(IrValue::Const(Constant::Int(11)))]
    );
}

#[test]
fn test_second_application_is_idempotent() {
    let mut asm = InstructionAssembler::new();
    asm.getlocal(1)
        .pushbyte(1)
        .pushbyte(2)
        .add()
        .add()
        .pushtrue()
        .iftrue("done")
        .pop()
        .pushbyte(0)
        .label("done")
        .returnvalue();
    let mut function = lift_asm(1, asm);

    let pass = ConstantFoldingPass::new();
    assert!(run_pass(&pass, &mut function));
    let snapshot = function.to_string();
    assert!(!run_pass(&pass, &mut function));
    assert_eq!(function.to_string(), snapshot);
}

#[test]
fn test_unknown_operands_stay() {
    let mut asm = InstructionAssembler::new();
    asm.getlocal(1).pushbyte(1).add().returnvalue();
    let mut function = lift_asm(1, asm);
    assert!(!run_pass(&ConstantFoldingPass::new(), &mut function));
    assert_eq!(function.node_count(), 1);
}
