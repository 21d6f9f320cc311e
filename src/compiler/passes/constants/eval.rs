//! Evaluation of operators on constants.
//!
//! The rules follow the virtual machine's conversions: `ToNumber`, `ToInt32`,
//! `ToUint32`, `ToBoolean` and `ToString` on primitive values. Whenever a result
//! depends on something that is not modeled here, such as parsing a string as a
//! number or formatting a fractional double, evaluation returns `None` and the node
//! stays as it is.

use std::cmp::Ordering;

use crate::analysis::ir::{BinaryOp, BranchKind, Constant, UnaryOp};

/// Largest magnitude for which an integral double is formatted as digits.
const MAX_FORMATTED_INTEGER: f64 = 1e15;

/// `ToNumber` for the primitives whose conversion needs no parsing.
pub(crate) fn to_number(value: &Constant) -> Option<f64> {
    match value {
        Constant::Undefined => Some(f64::NAN),
        Constant::Null => Some(0.0),
        Constant::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Constant::Int(_) | Constant::UInt(_) | Constant::Double(_) => value.as_number(),
        Constant::String(_) | Constant::Namespace(_) => None,
    }
}

/// `ToInt32`: modulo 2^32, NaN and the infinities become `0`.
pub(crate) fn to_int32(value: f64) -> i32 {
    to_uint32(value) as i32
}

/// `ToUint32`: modulo 2^32, NaN and the infinities become `0`.
pub(crate) fn to_uint32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// `ToBoolean`.
pub(crate) fn to_boolean(value: &Constant) -> bool {
    match value {
        Constant::Undefined | Constant::Null => false,
        Constant::Bool(b) => *b,
        Constant::Int(v) => *v != 0,
        Constant::UInt(v) => *v != 0,
        Constant::Double(v) => !(v.is_nan() || *v == 0.0),
        Constant::String(s) => !s.is_empty(),
        Constant::Namespace(_) => true,
    }
}

/// `ToString`, where the result does not need shortest round-trip formatting.
pub(crate) fn to_string(value: &Constant) -> Option<String> {
    match value {
        Constant::Undefined => Some("undefined".to_owned()),
        Constant::Null => Some("null".to_owned()),
        Constant::Bool(b) => Some(b.to_string()),
        Constant::Int(v) => Some(v.to_string()),
        Constant::UInt(v) => Some(v.to_string()),
        Constant::Double(v) => number_to_string(*v),
        Constant::String(s) => Some(s.clone()),
        Constant::Namespace(_) => None,
    }
}

fn number_to_string(value: f64) -> Option<String> {
    if value.is_nan() {
        return Some("NaN".to_owned());
    }
    if value.is_infinite() {
        return Some(if value > 0.0 { "Infinity" } else { "-Infinity" }.to_owned());
    }
    if value == 0.0 {
        return Some("0".to_owned());
    }
    if value.fract() == 0.0 && value.abs() < MAX_FORMATTED_INTEGER {
        return Some(format!("{}", value as i64));
    }
    None
}

/// The constant for a numeric result: an `int` if the value is one, a double otherwise.
pub(crate) fn from_number(value: f64) -> Constant {
    let is_negative_zero = value == 0.0 && value.is_sign_negative();
    if value.fract() == 0.0
        && !is_negative_zero
        && value >= f64::from(i32::MIN)
        && value <= f64::from(i32::MAX)
    {
        Constant::Int(value as i32)
    } else {
        Constant::Double(value)
    }
}

fn is_numeric(value: &Constant) -> bool {
    matches!(
        value,
        Constant::Int(_) | Constant::UInt(_) | Constant::Double(_)
    )
}

fn type_of(value: &Constant) -> &'static str {
    match value {
        Constant::Undefined => "undefined",
        Constant::Null | Constant::Namespace(_) => "object",
        Constant::Bool(_) => "boolean",
        Constant::Int(_) | Constant::UInt(_) | Constant::Double(_) => "number",
        Constant::String(_) => "string",
    }
}

/// Folds a unary operator.
pub(crate) fn unary(op: UnaryOp, value: &Constant) -> Option<Constant> {
    let number = || to_number(value);
    let int = || number().map(to_int32);

    Some(match op {
        UnaryOp::Negate => from_number(-number()?),
        UnaryOp::Increment => from_number(number()? + 1.0),
        UnaryOp::Decrement => from_number(number()? - 1.0),
        UnaryOp::NegateI => Constant::Int(int()?.wrapping_neg()),
        UnaryOp::IncrementI => Constant::Int(int()?.wrapping_add(1)),
        UnaryOp::DecrementI => Constant::Int(int()?.wrapping_sub(1)),
        UnaryOp::BitNot => Constant::Int(!int()?),
        UnaryOp::Not => Constant::Bool(!to_boolean(value)),
        UnaryOp::TypeOf => Constant::String(type_of(value).to_owned()),
        UnaryOp::ConvertI | UnaryOp::CoerceI => Constant::Int(int()?),
        UnaryOp::ConvertU | UnaryOp::CoerceU => Constant::UInt(to_uint32(number()?)),
        UnaryOp::ConvertD | UnaryOp::CoerceD => from_number(number()?),
        UnaryOp::ConvertB | UnaryOp::CoerceB => Constant::Bool(to_boolean(value)),
        UnaryOp::ConvertS => Constant::String(to_string(value)?),
        UnaryOp::CoerceS => match value {
            Constant::Undefined | Constant::Null => Constant::Null,
            _ => Constant::String(to_string(value)?),
        },
        UnaryOp::CoerceA => value.clone(),
        UnaryOp::ConvertO if !value.is_nullish() => value.clone(),
        UnaryOp::CoerceO if value.is_nullish() => Constant::Null,
        UnaryOp::Sxi1 => Constant::Int(-(int()? & 1)),
        UnaryOp::Sxi8 => Constant::Int(i32::from(int()? as i8)),
        UnaryOp::Sxi16 => Constant::Int(i32::from(int()? as i16)),
        UnaryOp::ConvertO
        | UnaryOp::CoerceO
        | UnaryOp::EscXElem
        | UnaryOp::EscXAttr
        | UnaryOp::CheckFilter => return None,
    })
}

/// Loose equality (`==`).
pub(crate) fn loose_equals(lhs: &Constant, rhs: &Constant) -> Option<bool> {
    match (lhs, rhs) {
        (a, b) if a.is_nullish() && b.is_nullish() => Some(true),
        (a, b) if a.is_nullish() || b.is_nullish() => Some(false),
        (Constant::String(a), Constant::String(b)) => Some(a == b),
        (Constant::Namespace(_), _) | (_, Constant::Namespace(_)) => None,
        (Constant::String(_), _) | (_, Constant::String(_)) => None,
        _ => {
            let (a, b) = (to_number(lhs)?, to_number(rhs)?);
            Some(a == b)
        }
    }
}

/// Strict equality (`===`).
pub(crate) fn strict_equals(lhs: &Constant, rhs: &Constant) -> Option<bool> {
    match (lhs, rhs) {
        (Constant::Undefined, Constant::Undefined) | (Constant::Null, Constant::Null) => Some(true),
        (Constant::Bool(a), Constant::Bool(b)) => Some(a == b),
        (Constant::String(a), Constant::String(b)) => Some(a == b),
        (Constant::Namespace(_), _) | (_, Constant::Namespace(_)) => None,
        (a, b) if is_numeric(a) && is_numeric(b) => Some(a.as_number()? == b.as_number()?),
        _ => Some(false),
    }
}

/// Relational comparison. `None` stands both for "not foldable" and for the
/// undefined result of comparing with NaN, which the caller treats as `false`.
fn compare(lhs: &Constant, rhs: &Constant) -> Option<Option<Ordering>> {
    match (lhs, rhs) {
        (Constant::String(a), Constant::String(b)) => {
            Some(Some(a.encode_utf16().cmp(b.encode_utf16())))
        }
        (Constant::String(_) | Constant::Namespace(_), _)
        | (_, Constant::String(_) | Constant::Namespace(_)) => None,
        _ => Some(to_number(lhs)?.partial_cmp(&to_number(rhs)?)),
    }
}

fn shift_count(value: &Constant) -> Option<u32> {
    Some(to_uint32(to_number(value)?) & 0x1F)
}

/// Folds a binary operator.
pub(crate) fn binary(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> Option<Constant> {
    let numbers = || Some((to_number(lhs)?, to_number(rhs)?));
    let ints = || numbers().map(|(a, b)| (to_int32(a), to_int32(b)));

    Some(match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Constant::String(_), _) | (_, Constant::String(_)) => {
                let mut text = to_string(lhs)?;
                text.push_str(&to_string(rhs)?);
                Constant::String(text)
            }
            _ => {
                let (a, b) = numbers()?;
                from_number(a + b)
            }
        },
        BinaryOp::Subtract => numbers().map(|(a, b)| from_number(a - b))?,
        BinaryOp::Multiply => numbers().map(|(a, b)| from_number(a * b))?,
        BinaryOp::Divide => numbers().map(|(a, b)| from_number(a / b))?,
        BinaryOp::Modulo => numbers().map(|(a, b)| from_number(a % b))?,
        BinaryOp::AddI => ints().map(|(a, b)| Constant::Int(a.wrapping_add(b)))?,
        BinaryOp::SubtractI => ints().map(|(a, b)| Constant::Int(a.wrapping_sub(b)))?,
        BinaryOp::MultiplyI => ints().map(|(a, b)| Constant::Int(a.wrapping_mul(b)))?,
        BinaryOp::BitAnd => ints().map(|(a, b)| Constant::Int(a & b))?,
        BinaryOp::BitOr => ints().map(|(a, b)| Constant::Int(a | b))?,
        BinaryOp::BitXor => ints().map(|(a, b)| Constant::Int(a ^ b))?,
        BinaryOp::LShift => {
            Constant::Int(to_int32(to_number(lhs)?).wrapping_shl(shift_count(rhs)?))
        }
        BinaryOp::RShift => {
            Constant::Int(to_int32(to_number(lhs)?).wrapping_shr(shift_count(rhs)?))
        }
        BinaryOp::URShift => {
            Constant::UInt(to_uint32(to_number(lhs)?).wrapping_shr(shift_count(rhs)?))
        }
        BinaryOp::Equals => Constant::Bool(loose_equals(lhs, rhs)?),
        BinaryOp::StrictEquals => Constant::Bool(strict_equals(lhs, rhs)?),
        BinaryOp::LessThan => Constant::Bool(compare(lhs, rhs)? == Some(Ordering::Less)),
        BinaryOp::GreaterThan => Constant::Bool(compare(lhs, rhs)? == Some(Ordering::Greater)),
        BinaryOp::LessEquals => Constant::Bool(matches!(
            compare(lhs, rhs)?,
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::GreaterEquals => Constant::Bool(matches!(
            compare(lhs, rhs)?,
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::InstanceOf | BinaryOp::IsTypeLate | BinaryOp::AsTypeLate | BinaryOp::In => {
            return None
        }
    })
}

/// Decides a two-way branch on constant operands.
pub(crate) fn branch(kind: BranchKind, operands: &[&Constant]) -> Option<bool> {
    match (kind, operands) {
        (BranchKind::True, [value]) => Some(to_boolean(value)),
        (BranchKind::False, [value]) => Some(!to_boolean(value)),
        (BranchKind::Eq, [a, b]) => loose_equals(a, b),
        (BranchKind::Ne, [a, b]) => loose_equals(a, b).map(|eq| !eq),
        (BranchKind::StrictEq, [a, b]) => strict_equals(a, b),
        (BranchKind::StrictNe, [a, b]) => strict_equals(a, b).map(|eq| !eq),
        (BranchKind::Lt, [a, b]) => Some(compare(a, b)? == Some(Ordering::Less)),
        (BranchKind::Gt, [a, b]) => Some(compare(a, b)? == Some(Ordering::Greater)),
        (BranchKind::Le, [a, b]) => Some(matches!(
            compare(a, b)?,
            Some(Ordering::Less | Ordering::Equal)
        )),
        (BranchKind::Ge, [a, b]) => Some(matches!(
            compare(a, b)?,
            Some(Ordering::Greater | Ordering::Equal)
        )),
        // The negated forms jump on NaN
        (BranchKind::Nlt, [a, b]) => Some(compare(a, b)? != Some(Ordering::Less)),
        (BranchKind::Ngt, [a, b]) => Some(compare(a, b)? != Some(Ordering::Greater)),
        (BranchKind::Nle, [a, b]) => Some(!matches!(
            compare(a, b)?,
            Some(Ordering::Less | Ordering::Equal)
        )),
        (BranchKind::Nge, [a, b]) => Some(!matches!(
            compare(a, b)?,
            Some(Ordering::Greater | Ordering::Equal)
        )),
        _ => None,
    }
}

/// The case a `lookupswitch` on a constant index takes; `None` for the default.
pub(crate) fn switch_case(index: &Constant, case_count: usize) -> Option<Option<usize>> {
    let value = to_number(index)?;
    if value.fract() != 0.0 || value < 0.0 || value >= case_count as f64 {
        return Some(None);
    }
    Some(Some(value as usize))
}
