//! IR values and constants.

use std::fmt;

/// Identity of an IR node within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    /// The raw index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Identity of an IR block within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// The raw index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A compile-time constant.
#[derive(Debug, Clone)]
pub enum Constant {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean
    Bool(bool),
    /// A signed 32-bit integer
    Int(i32),
    /// An unsigned 32-bit integer
    UInt(u32),
    /// A double
    Double(f64),
    /// A string, by value; interned when emitted
    String(String),
    /// A namespace, by pool index
    Namespace(u32),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Undefined, Constant::Undefined) | (Constant::Null, Constant::Null) => true,
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::UInt(a), Constant::UInt(b)) => a == b,
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            (Constant::Namespace(a), Constant::Namespace(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Constant {
    /// Returns `true` for `null` and `undefined`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Constant::Undefined | Constant::Null)
    }

    /// The numeric value, if this constant is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Constant::Int(v) => Some(f64::from(*v)),
            Constant::UInt(v) => Some(f64::from(*v)),
            Constant::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Undefined => f.write_str("undefined"),
            Constant::Null => f.write_str("null"),
            Constant::Bool(v) => write!(f, "{v}"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::UInt(v) => write!(f, "{v}u"),
            Constant::Double(v) => write!(f, "{v:?}"),
            Constant::String(v) => write!(f, "{v:?}"),
            Constant::Namespace(v) => write!(f, "ns#{v}"),
        }
    }
}

/// A read of a register.
///
/// A local value stands for the content of `register` at the point where it is used,
/// not at the point where it was produced. The `version` tells apart register
/// contents the builder knows nothing about: the arguments on entry (version `0`),
/// the registers on entry to an exception handler and after `hasnext2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalRef {
    /// The register
    pub register: u32,
    /// Distinguishes unknown contents of the same register
    pub version: u32,
}

/// An IR value: an operand of nodes and terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrValue {
    /// A constant
    Const(Constant),
    /// A register read
    Local(LocalRef),
    /// The result of a node
    Node(ValueId),
}

impl IrValue {
    /// A register read.
    #[must_use]
    pub fn local(register: u32, version: u32) -> Self {
        IrValue::Local(LocalRef { register, version })
    }

    /// The node this value refers to.
    #[must_use]
    pub fn as_node(&self) -> Option<ValueId> {
        match self {
            IrValue::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// The constant this value is.
    #[must_use]
    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            IrValue::Const(constant) => Some(constant),
            _ => None,
        }
    }

    /// The register this value reads.
    #[must_use]
    pub fn as_register(&self) -> Option<u32> {
        match self {
            IrValue::Local(local) => Some(local.register),
            _ => None,
        }
    }
}

impl From<Constant> for IrValue {
    fn from(constant: Constant) -> Self {
        IrValue::Const(constant)
    }
}

impl From<ValueId> for IrValue {
    fn from(id: ValueId) -> Self {
        IrValue::Node(id)
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrValue::Const(constant) => write!(f, "{constant}"),
            IrValue::Local(local) => write!(f, "r{}.{}", local.register, local.version),
            IrValue::Node(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_equality_is_bitwise() {
        assert_eq!(Constant::Double(f64::NAN), Constant::Double(f64::NAN));
        assert_ne!(Constant::Double(0.0), Constant::Double(-0.0));
        assert_ne!(Constant::Int(1), Constant::UInt(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(IrValue::local(2, 0).to_string(), "r2.0");
        assert_eq!(IrValue::Node(ValueId(4)).to_string(), "v4");
        assert_eq!(IrValue::Const(Constant::String("a".into())).to_string(), "\"a\"");
    }
}
