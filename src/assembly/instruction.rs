//! Decoded instructions and their operands.
//!
//! An [`Instruction`] is an [`Opcode`] plus [`Operands`] shaped by the opcode's
//! [`OperandLayout`]. Instructions are immutable values; passes change code by
//! replacing entries of a [`crate::assembly::Bytecode`].
//!
//! Branch operands are generic over the label type so the same shape can describe
//! live code (labels are [`Marker`]s) and resolved listings (labels are positions).

use std::fmt;

use crate::{
    assembly::{Marker, Opcode, OperandLayout},
    Result,
};

/// Operands of one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operands<L = Marker> {
    /// No operands
    None,
    /// A raw byte (`pushbyte`, `getscopeobject`)
    Byte(u8),
    /// A single `u30`: pool index, register, argument count or slot id
    Index(u32),
    /// Two `u30` values
    Pair(u32, u32),
    /// A branch target
    Branch(L),
    /// `lookupswitch` targets
    Switch {
        /// Target when the index is out of range
        default: L,
        /// One target per case, at least one
        cases: Vec<L>,
    },
    /// Operands of the `debug` instruction
    Debug {
        /// Debug record kind (`1` for a register name)
        kind: u8,
        /// String index of the name
        name: u32,
        /// Register the record refers to
        register: u8,
        /// Reserved, always written back unchanged
        extra: u32,
    },
}

impl<L> Operands<L> {
    /// Returns the layout these operands encode with.
    #[must_use]
    pub fn layout(&self) -> OperandLayout {
        match self {
            Operands::None => OperandLayout::None,
            Operands::Byte(_) => OperandLayout::U8,
            Operands::Index(_) => OperandLayout::U30,
            Operands::Pair(..) => OperandLayout::U30U30,
            Operands::Branch(_) => OperandLayout::S24,
            Operands::Switch { .. } => OperandLayout::Switch,
            Operands::Debug { .. } => OperandLayout::Debug,
        }
    }

    /// Maps every label through `f`.
    pub fn map_labels<M>(&self, mut f: impl FnMut(&L) -> M) -> Operands<M> {
        match self {
            Operands::None => Operands::None,
            Operands::Byte(value) => Operands::Byte(*value),
            Operands::Index(value) => Operands::Index(*value),
            Operands::Pair(a, b) => Operands::Pair(*a, *b),
            Operands::Branch(label) => Operands::Branch(f(label)),
            Operands::Switch { default, cases } => Operands::Switch {
                default: f(default),
                cases: cases.iter().map(&mut f).collect(),
            },
            Operands::Debug {
                kind,
                name,
                register,
                extra,
            } => Operands::Debug {
                kind: *kind,
                name: *name,
                register: *register,
                extra: *extra,
            },
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// The opcode
    pub opcode: Opcode,
    /// The operands, shaped by `opcode.layout()`
    pub operands: Operands,
}

impl Instruction {
    /// Creates an instruction, checking that the operands fit the opcode.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the operand shape does not match the
    /// opcode's layout or a `lookupswitch` has no cases.
    pub fn new(opcode: Opcode, operands: Operands) -> Result<Self> {
        if operands.layout() != opcode.layout() {
            return Err(malformed_error!(
                "{} expects {:?} operands, got {:?}",
                opcode,
                opcode.layout(),
                operands.layout()
            ));
        }
        if let Operands::Switch { cases, .. } = &operands {
            if cases.is_empty() {
                return Err(malformed_error!("lookupswitch needs at least one case"));
            }
        }

        Ok(Instruction { opcode, operands })
    }

    /// An instruction without operands.
    #[must_use]
    pub fn simple(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            operands: Operands::None,
        }
    }

    /// An instruction with one `u30` operand.
    #[must_use]
    pub fn with_index(opcode: Opcode, index: u32) -> Self {
        Instruction {
            opcode,
            operands: Operands::Index(index),
        }
    }

    /// An instruction with two `u30` operands.
    #[must_use]
    pub fn with_pair(opcode: Opcode, first: u32, second: u32) -> Self {
        Instruction {
            opcode,
            operands: Operands::Pair(first, second),
        }
    }

    /// An instruction with one byte operand.
    #[must_use]
    pub fn with_byte(opcode: Opcode, value: u8) -> Self {
        Instruction {
            opcode,
            operands: Operands::Byte(value),
        }
    }

    /// A branch to `target`.
    #[must_use]
    pub fn branch(opcode: Opcode, target: Marker) -> Self {
        Instruction {
            opcode,
            operands: Operands::Branch(target),
        }
    }

    /// A `lookupswitch`.
    #[must_use]
    pub fn switch(default: Marker, cases: Vec<Marker>) -> Self {
        Instruction {
            opcode: Opcode::LookupSwitch,
            operands: Operands::Switch { default, cases },
        }
    }

    /// `getlocal` in its shortest form.
    #[must_use]
    pub fn get_local(register: u32) -> Self {
        match register {
            0 => Self::simple(Opcode::GetLocal0),
            1 => Self::simple(Opcode::GetLocal1),
            2 => Self::simple(Opcode::GetLocal2),
            3 => Self::simple(Opcode::GetLocal3),
            _ => Self::with_index(Opcode::GetLocal, register),
        }
    }

    /// `setlocal` in its shortest form.
    #[must_use]
    pub fn set_local(register: u32) -> Self {
        match register {
            0 => Self::simple(Opcode::SetLocal0),
            1 => Self::simple(Opcode::SetLocal1),
            2 => Self::simple(Opcode::SetLocal2),
            3 => Self::simple(Opcode::SetLocal3),
            _ => Self::with_index(Opcode::SetLocal, register),
        }
    }

    /// The single `u30` operand, or the first of a pair.
    #[must_use]
    pub fn index(&self) -> Option<u32> {
        match self.operands {
            Operands::Index(index) | Operands::Pair(index, _) => Some(index),
            _ => None,
        }
    }

    /// The argument count of call and construct instructions.
    #[must_use]
    pub fn arg_count(&self) -> Option<u32> {
        match (self.opcode, &self.operands) {
            (
                Opcode::Call
                | Opcode::Construct
                | Opcode::ConstructSuper
                | Opcode::ApplyType
                | Opcode::NewObject
                | Opcode::NewArray,
                Operands::Index(argc),
            ) => Some(*argc),
            (
                Opcode::CallMethod
                | Opcode::CallStatic
                | Opcode::CallSuper
                | Opcode::CallProperty
                | Opcode::ConstructProp
                | Opcode::CallPropLex
                | Opcode::CallSuperVoid
                | Opcode::CallPropVoid,
                Operands::Pair(_, argc),
            ) => Some(*argc),
            _ => None,
        }
    }

    /// The register read by a local load (`getlocal*`).
    #[must_use]
    pub fn local_read(&self) -> Option<u32> {
        match self.opcode {
            Opcode::GetLocal0 => Some(0),
            Opcode::GetLocal1 => Some(1),
            Opcode::GetLocal2 => Some(2),
            Opcode::GetLocal3 => Some(3),
            Opcode::GetLocal => self.index(),
            _ => None,
        }
    }

    /// The register written by a local store (`setlocal*`).
    #[must_use]
    pub fn local_write(&self) -> Option<u32> {
        match self.opcode {
            Opcode::SetLocal0 => Some(0),
            Opcode::SetLocal1 => Some(1),
            Opcode::SetLocal2 => Some(2),
            Opcode::SetLocal3 => Some(3),
            Opcode::SetLocal => self.index(),
            _ => None,
        }
    }

    /// Every register this instruction touches, including the in-place
    /// updates (`inclocal`, `kill`, `hasnext2`) and `debug` records.
    #[must_use]
    pub fn registers(&self) -> Vec<u32> {
        match (self.opcode, &self.operands) {
            (Opcode::HasNext2, Operands::Pair(object, index)) => vec![*object, *index],
            (
                Opcode::Kill
                | Opcode::IncLocal
                | Opcode::DecLocal
                | Opcode::IncLocalI
                | Opcode::DecLocalI,
                Operands::Index(register),
            ) => vec![*register],
            (Opcode::Debug, Operands::Debug { register, .. }) => vec![u32::from(*register)],
            _ => self
                .local_read()
                .or_else(|| self.local_write())
                .into_iter()
                .collect(),
        }
    }

    /// Every branch target, default first for `lookupswitch`.
    #[must_use]
    pub fn targets(&self) -> Vec<Marker> {
        match &self.operands {
            Operands::Branch(target) => vec![*target],
            Operands::Switch { default, cases } => {
                std::iter::once(*default).chain(cases.iter().copied()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match &self.operands {
            Operands::None => Ok(()),
            Operands::Byte(value) => write!(f, " {value}"),
            Operands::Index(value) => write!(f, " {value}"),
            Operands::Pair(a, b) => write!(f, " {a}, {b}"),
            Operands::Branch(target) => write!(f, " {target}"),
            Operands::Switch { default, cases } => {
                write!(f, " {default}, [")?;
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{case}")?;
                }
                write!(f, "]")
            }
            Operands::Debug {
                kind,
                name,
                register,
                extra,
            } => write!(f, " {kind}, {name}, {register}, {extra}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_new_checks_layout() {
        assert!(Instruction::new(Opcode::PushByte, Operands::Byte(3)).is_ok());
        assert!(matches!(
            Instruction::new(Opcode::PushByte, Operands::Index(3)),
            Err(Error::Malformed { .. })
        ));
        assert!(Instruction::new(
            Opcode::LookupSwitch,
            Operands::Switch {
                default: Marker(0),
                cases: Vec::new()
            }
        )
        .is_err());
    }

    #[test]
    fn test_local_forms() {
        assert_eq!(Instruction::get_local(2).opcode, Opcode::GetLocal2);
        assert_eq!(Instruction::get_local(9).local_read(), Some(9));
        assert_eq!(Instruction::set_local(0).local_write(), Some(0));
        assert_eq!(
            Instruction::with_pair(Opcode::HasNext2, 4, 5).registers(),
            vec![4, 5]
        );
    }

    #[test]
    fn test_arg_count() {
        assert_eq!(
            Instruction::with_pair(Opcode::CallProperty, 7, 2).arg_count(),
            Some(2)
        );
        assert_eq!(Instruction::with_index(Opcode::NewObject, 3).arg_count(), Some(3));
        assert_eq!(Instruction::with_index(Opcode::GetProperty, 3).arg_count(), None);
    }

    #[test]
    fn test_display() {
        let instr = Instruction::switch(Marker(1), vec![Marker(2), Marker(3)]);
        assert_eq!(instr.to_string(), "lookupswitch L1, [L2, L3]");
        assert_eq!(
            Instruction::with_pair(Opcode::CallPropVoid, 4, 1).to_string(),
            "callpropvoid 4, 1"
        );
    }
}
