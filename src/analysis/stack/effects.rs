//! Per-instruction operand and scope stack effects.

use crate::{
    assembly::{Instruction, Opcode},
    metadata::ConstantPool,
    Result,
};

/// Stack effect of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackEffect {
    /// Operand stack values consumed
    pub pops: u32,
    /// Operand stack values produced
    pub pushes: u32,
    /// Change of the scope stack depth
    pub scope: i32,
}

impl StackEffect {
    /// Net change of the operand stack depth.
    #[must_use]
    pub fn net(&self) -> i64 {
        i64::from(self.pushes) - i64::from(self.pops)
    }
}

/// Computes the stack effect of `instruction`.
///
/// The opcode table provides the fixed part. Argument counts and the runtime parts of
/// multinames (resolved through `pool`) are added on top.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a multiname operand is not a valid pool index.
pub fn stack_effect(instruction: &Instruction, pool: &ConstantPool) -> Result<StackEffect> {
    let info = instruction.opcode.info();
    let mut pops = u32::from(info.pops);

    if let Some(argc) = instruction.arg_count() {
        pops += match instruction.opcode {
            Opcode::NewObject => argc.saturating_mul(2),
            _ => argc,
        };
    }

    if instruction.opcode.takes_multiname() {
        let index = instruction.index().unwrap_or(0);
        let arity = pool.runtime_arity(index).ok_or_else(|| {
            malformed_error!(
                "{} refers to multiname {} outside the constant pool",
                instruction.opcode,
                index
            )
        })?;
        pops += arity;
    }

    Ok(StackEffect {
        pops,
        pushes: u32::from(info.pushes),
        scope: i32::from(info.scope),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Multiname, PoolValue};

    #[test]
    fn test_fixed_effects() {
        let pool = ConstantPool::new();
        let dup = stack_effect(&Instruction::simple(Opcode::Dup), &pool).unwrap();
        assert_eq!((dup.pops, dup.pushes, dup.net()), (1, 2, 1));

        let scope = stack_effect(&Instruction::simple(Opcode::PushScope), &pool).unwrap();
        assert_eq!((scope.pops, scope.scope), (1, 1));
    }

    #[test]
    fn test_argument_counts() {
        let pool = ConstantPool::new();
        let call = stack_effect(&Instruction::with_index(Opcode::Call, 3), &pool).unwrap();
        assert_eq!(call.pops, 5);

        let object = stack_effect(&Instruction::with_index(Opcode::NewObject, 2), &pool).unwrap();
        assert_eq!(object.pops, 4);

        let array = stack_effect(&Instruction::with_index(Opcode::NewArray, 2), &pool).unwrap();
        assert_eq!(array.pops, 2);
    }

    #[test]
    fn test_runtime_multiname_parts() {
        let mut pool = ConstantPool::new();
        let late = pool.get_index(PoolValue::Multiname(Multiname::RtqNameLate {
            attribute: false,
        }));

        let get = Instruction::with_index(Opcode::GetProperty, late);
        assert_eq!(stack_effect(&get, &pool).unwrap().pops, 3);

        let call = Instruction::with_pair(Opcode::CallPropVoid, late, 1);
        let effect = stack_effect(&call, &pool).unwrap();
        assert_eq!((effect.pops, effect.pushes), (4, 0));

        let bad = Instruction::with_index(Opcode::GetProperty, 99);
        assert!(stack_effect(&bad, &pool).is_err());
    }
}
