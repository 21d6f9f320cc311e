//! IR nodes, operators and block terminators.
//!
//! Nodes are flat tagged variants carrying only what their operation needs. Operand
//! values are always listed in operand stack order, bottom first, which is also the
//! order the code generator pushes them in.

use std::fmt;

use crate::{
    analysis::{
        cfg::CfgEdgeKind,
        ir::{BlockId, IrValue},
    },
    assembly::{Instruction, Opcode, Operands},
};

/// Edge kinds of the IR block graph; the same kinds the instruction CFG uses.
pub type EdgeKind = CfgEdgeKind;

macro_rules! operators {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $opcode:ident),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                #[doc = concat!("`", stringify!($opcode), "`")]
                $variant,
            )*
        }

        impl $name {
            /// The operator implemented by `opcode`.
            #[must_use]
            pub fn from_opcode(opcode: Opcode) -> Option<Self> {
                match opcode {
                    $( Opcode::$opcode => Some($name::$variant), )*
                    _ => None,
                }
            }

            /// The opcode implementing this operator.
            #[must_use]
            pub fn opcode(self) -> Opcode {
                match self {
                    $( $name::$variant => Opcode::$opcode, )*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.opcode().mnemonic())
            }
        }
    };
}

operators! {
    /// Operators without immediates that take one value.
    UnaryOp {
        Negate => Negate,
        Increment => Increment,
        Decrement => Decrement,
        TypeOf => TypeOf,
        Not => Not,
        BitNot => BitNot,
        NegateI => NegateI,
        IncrementI => IncrementI,
        DecrementI => DecrementI,
        ConvertS => ConvertS,
        ConvertI => ConvertI,
        ConvertU => ConvertU,
        ConvertD => ConvertD,
        ConvertB => ConvertB,
        ConvertO => ConvertO,
        CoerceB => CoerceB,
        CoerceA => CoerceA,
        CoerceI => CoerceI,
        CoerceD => CoerceD,
        CoerceS => CoerceS,
        CoerceU => CoerceU,
        CoerceO => CoerceO,
        EscXElem => EscXElem,
        EscXAttr => EscXAttr,
        CheckFilter => CheckFilter,
        Sxi1 => Sxi1,
        Sxi8 => Sxi8,
        Sxi16 => Sxi16,
    }
}

operators! {
    /// Operators that take two values.
    BinaryOp {
        Add => Add,
        Subtract => Subtract,
        Multiply => Multiply,
        Divide => Divide,
        Modulo => Modulo,
        LShift => LShift,
        RShift => RShift,
        URShift => URShift,
        BitAnd => BitAnd,
        BitOr => BitOr,
        BitXor => BitXor,
        Equals => Equals,
        StrictEquals => StrictEquals,
        LessThan => LessThan,
        LessEquals => LessEquals,
        GreaterThan => GreaterThan,
        GreaterEquals => GreaterEquals,
        InstanceOf => InstanceOf,
        IsTypeLate => IsTypeLate,
        AsTypeLate => AsTypeLate,
        In => In,
        AddI => AddI,
        SubtractI => SubtractI,
        MultiplyI => MultiplyI,
    }
}

operators! {
    /// Conditions of a two-way branch.
    BranchKind {
        True => IfTrue,
        False => IfFalse,
        Eq => IfEq,
        Ne => IfNe,
        Lt => IfLt,
        Le => IfLe,
        Gt => IfGt,
        Ge => IfGe,
        Nlt => IfNlt,
        Nle => IfNle,
        Ngt => IfNgt,
        Nge => IfNge,
        StrictEq => IfStrictEq,
        StrictNe => IfStrictNe,
    }
}

impl BranchKind {
    /// Number of values the condition consumes.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            BranchKind::True | BranchKind::False => 1,
            _ => 2,
        }
    }
}

/// Type operators that carry a multiname index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeOp {
    /// `coerce`
    Coerce,
    /// `astype`
    AsType,
    /// `istype`
    IsType,
}

impl TypeOp {
    /// The opcode implementing this operator.
    #[must_use]
    pub fn opcode(self) -> Opcode {
        match self {
            TypeOp::Coerce => Opcode::Coerce,
            TypeOp::AsType => Opcode::AsType,
            TypeOp::IsType => Opcode::IsType,
        }
    }
}

/// Scope stack operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeOp {
    /// `pushscope`
    Push,
    /// `pushwith`
    PushWith,
    /// `popscope`
    Pop,
}

/// One incoming value of a phi.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiInput {
    /// The value flowing in
    pub value: IrValue,
    /// The predecessor block
    pub from: BlockId,
    /// The kind of the predecessor's edge
    pub kind: EdgeKind,
}

/// What a node computes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A unary operator
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: IrValue,
    },
    /// `coerce`, `astype` or `istype` with a type name
    Type {
        /// Operator
        op: TypeOp,
        /// Multiname index of the type
        name: u32,
        /// Operand
        operand: IrValue,
    },
    /// A binary operator
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: IrValue,
        /// Right operand
        rhs: IrValue,
    },
    /// Pins the value a register holds before it is overwritten
    Copy(IrValue),
    /// A merge of values at a join
    Phi(Vec<PhiInput>),
    /// The exception object an exception handler starts with
    CaughtException,
    /// A write of a register
    StoreLocal {
        /// Register written
        register: u32,
        /// Value stored
        value: IrValue,
    },
    /// `hasnext2`, which updates both registers in place
    HasNext2 {
        /// Register holding the object
        object: u32,
        /// Register holding the index
        index: u32,
    },
    /// A property access through a multiname: get, set, init, delete, find, super and
    /// descendants
    Property {
        /// The access
        opcode: Opcode,
        /// Multiname index
        name: u32,
        /// Object, runtime name parts and value, in stack order
        operands: Vec<IrValue>,
    },
    /// A call or construct
    Call {
        /// The call form
        opcode: Opcode,
        /// Multiname, method or dispatch index; `0` for forms without one
        index: u32,
        /// Number of arguments
        arg_count: u32,
        /// Function or receiver, runtime name parts and arguments, in stack order
        operands: Vec<IrValue>,
    },
    /// Any other instruction that is kept as is: slots, object creation, iteration,
    /// domain memory, `dxns` and `getglobalscope`
    Operation {
        /// The instruction, never a branch
        instruction: Instruction,
        /// Values consumed, in stack order
        operands: Vec<IrValue>,
    },
    /// A scope stack push or pop
    Scope {
        /// Operation
        op: ScopeOp,
        /// Value pushed, `None` for a pop
        operand: Option<IrValue>,
    },
    /// A debugger instruction, kept verbatim
    Debug(Instruction),
}

impl NodeKind {
    /// Returns `true` if the node yields a value.
    #[must_use]
    pub fn produces_value(&self) -> bool {
        match self {
            NodeKind::Unary { .. }
            | NodeKind::Type { .. }
            | NodeKind::Binary { .. }
            | NodeKind::Copy(_)
            | NodeKind::Phi(_)
            | NodeKind::CaughtException
            | NodeKind::HasNext2 { .. } => true,
            NodeKind::StoreLocal { .. } | NodeKind::Scope { .. } | NodeKind::Debug(_) => false,
            NodeKind::Property { opcode, .. } | NodeKind::Call { opcode, .. } => {
                opcode.info().pushes > 0
            }
            NodeKind::Operation { instruction, .. } => instruction.opcode.info().pushes > 0,
        }
    }

    /// Returns `true` if the node must be kept even when its value is unused.
    ///
    /// Operators are treated as pure; calls, writes, property accesses, scope changes
    /// and everything with an observable effect are not.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match self {
            NodeKind::Unary { .. }
            | NodeKind::Type { .. }
            | NodeKind::Binary { .. }
            | NodeKind::Copy(_)
            | NodeKind::Phi(_) => false,
            NodeKind::Operation { instruction, .. } => !matches!(
                instruction.opcode,
                Opcode::GetGlobalScope | Opcode::NewFunction
            ),
            _ => true,
        }
    }

    /// Returns `true` for phis.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, NodeKind::Phi(_))
    }

    /// The register this node writes, for stores and `hasnext2`.
    #[must_use]
    pub fn written_registers(&self) -> Vec<u32> {
        match self {
            NodeKind::StoreLocal { register, .. } => vec![*register],
            NodeKind::HasNext2 { object, index } => vec![*object, *index],
            _ => Vec::new(),
        }
    }

    /// The values this node reads, in stack order.
    #[must_use]
    pub fn operands(&self) -> Vec<&IrValue> {
        match self {
            NodeKind::Unary { operand, .. }
            | NodeKind::Type { operand, .. }
            | NodeKind::Copy(operand)
            | NodeKind::StoreLocal { value: operand, .. } => vec![operand],
            NodeKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            NodeKind::Phi(inputs) => inputs.iter().map(|input| &input.value).collect(),
            NodeKind::Property { operands, .. }
            | NodeKind::Call { operands, .. }
            | NodeKind::Operation { operands, .. } => operands.iter().collect(),
            NodeKind::Scope { operand, .. } => operand.iter().collect(),
            NodeKind::CaughtException | NodeKind::HasNext2 { .. } | NodeKind::Debug(_) => {
                Vec::new()
            }
        }
    }

    /// Mutable access to the values this node reads.
    pub fn operands_mut(&mut self) -> Vec<&mut IrValue> {
        match self {
            NodeKind::Unary { operand, .. }
            | NodeKind::Type { operand, .. }
            | NodeKind::Copy(operand)
            | NodeKind::StoreLocal { value: operand, .. } => vec![operand],
            NodeKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            NodeKind::Phi(inputs) => inputs.iter_mut().map(|input| &mut input.value).collect(),
            NodeKind::Property { operands, .. }
            | NodeKind::Call { operands, .. }
            | NodeKind::Operation { operands, .. } => operands.iter_mut().collect(),
            NodeKind::Scope { operand, .. } => operand.iter_mut().collect(),
            NodeKind::CaughtException | NodeKind::HasNext2 { .. } | NodeKind::Debug(_) => {
                Vec::new()
            }
        }
    }

    /// Remaps every register this node names, including register reads in its operands.
    pub fn remap_registers(&mut self, mut map: impl FnMut(u32) -> u32) {
        match self {
            NodeKind::StoreLocal { register, .. } => *register = map(*register),
            NodeKind::HasNext2 { object, index } => {
                *object = map(*object);
                *index = map(*index);
            }
            NodeKind::Debug(Instruction {
                operands: Operands::Debug { register, .. },
                ..
            }) => *register = u8::try_from(map(u32::from(*register))).unwrap_or(*register),
            _ => {}
        }
        for operand in self.operands_mut() {
            if let IrValue::Local(local) = operand {
                local.register = map(local.register);
            }
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, values: &[IrValue]) -> fmt::Result {
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{value}")?;
            }
            Ok(())
        }

        match self {
            NodeKind::Unary { op, operand } => write!(f, "{op} {operand}"),
            NodeKind::Type { op, name, operand } => {
                write!(f, "{} #{name} {operand}", op.opcode().mnemonic())
            }
            NodeKind::Binary { op, lhs, rhs } => write!(f, "{op} {lhs}, {rhs}"),
            NodeKind::Copy(value) => write!(f, "copy {value}"),
            NodeKind::Phi(inputs) => {
                f.write_str("phi ")?;
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "[{} {} {}]", input.value, input.from, input.kind)?;
                }
                Ok(())
            }
            NodeKind::CaughtException => f.write_str("caught"),
            NodeKind::StoreLocal { register, value } => write!(f, "store r{register}, {value}"),
            NodeKind::HasNext2 { object, index } => write!(f, "hasnext2 r{object}, r{index}"),
            NodeKind::Property {
                opcode,
                name,
                operands,
            } => {
                write!(f, "{opcode} #{name} (")?;
                list(f, operands)?;
                f.write_str(")")
            }
            NodeKind::Call {
                opcode,
                index,
                arg_count,
                operands,
            } => {
                write!(f, "{opcode} #{index}/{arg_count} (")?;
                list(f, operands)?;
                f.write_str(")")
            }
            NodeKind::Operation {
                instruction,
                operands,
            } => {
                write!(f, "{instruction} (")?;
                list(f, operands)?;
                f.write_str(")")
            }
            NodeKind::Scope { op, operand } => match operand {
                Some(value) => write!(f, "{op:?} {value}"),
                None => write!(f, "{op:?}"),
            },
            NodeKind::Debug(instruction) => write!(f, "{instruction}"),
        }
    }
}

/// The condition of an [`Terminator::If`].
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// The comparison
    pub kind: BranchKind,
    /// One value for `True`/`False`, two otherwise
    pub operands: Vec<IrValue>,
}

/// How control leaves a block.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Terminator {
    /// Falls through to the next block
    Goto(BlockId),
    /// Unconditional `jump`
    Jump(BlockId),
    /// Two-way branch
    If {
        /// The condition
        condition: Condition,
        /// Taken when the condition holds
        on_true: BlockId,
        /// Taken otherwise
        on_false: BlockId,
    },
    /// `lookupswitch`
    Switch {
        /// The case index
        index: IrValue,
        /// Target for out of range indices
        default: BlockId,
        /// One target per case
        cases: Vec<BlockId>,
    },
    /// `returnvoid` or `returnvalue`
    Return(Option<IrValue>),
    /// `throw`
    Throw(IrValue),
    /// No terminator yet, or the Exit block
    #[default]
    None,
}

impl Terminator {
    /// Normal control flow successors with their edge kinds.
    #[must_use]
    pub fn targets(&self) -> Vec<(BlockId, EdgeKind)> {
        match self {
            Terminator::Goto(target) => vec![(*target, EdgeKind::Default)],
            Terminator::Jump(target) => vec![(*target, EdgeKind::Jump)],
            Terminator::If {
                on_true, on_false, ..
            } => vec![(*on_true, EdgeKind::True), (*on_false, EdgeKind::False)],
            Terminator::Switch { default, cases, .. } => {
                std::iter::once((*default, EdgeKind::DefaultCase))
                    .chain(
                        cases
                            .iter()
                            .enumerate()
                            .map(|(i, case)| (*case, EdgeKind::Case(i as u32))),
                    )
                    .collect()
            }
            Terminator::Return(_) | Terminator::Throw(_) | Terminator::None => Vec::new(),
        }
    }

    /// Redirects the edge of `kind` to `target`. Returns `false` if there is no such edge.
    pub fn retarget(&mut self, kind: EdgeKind, target: BlockId) -> bool {
        match (self, kind) {
            (Terminator::Goto(slot), EdgeKind::Default)
            | (Terminator::Jump(slot), EdgeKind::Jump)
            | (Terminator::If { on_true: slot, .. }, EdgeKind::True)
            | (Terminator::If { on_false: slot, .. }, EdgeKind::False)
            | (Terminator::Switch { default: slot, .. }, EdgeKind::DefaultCase) => {
                *slot = target;
                true
            }
            (Terminator::Switch { cases, .. }, EdgeKind::Case(index)) => {
                match cases.get_mut(index as usize) {
                    Some(slot) => {
                        *slot = target;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Replaces every target block with `map(target)`.
    pub fn map_targets(&mut self, mut map: impl FnMut(BlockId) -> BlockId) {
        match self {
            Terminator::Goto(target) | Terminator::Jump(target) => *target = map(*target),
            Terminator::If {
                on_true, on_false, ..
            } => {
                *on_true = map(*on_true);
                *on_false = map(*on_false);
            }
            Terminator::Switch { default, cases, .. } => {
                *default = map(*default);
                for case in cases.iter_mut() {
                    *case = map(*case);
                }
            }
            Terminator::Return(_) | Terminator::Throw(_) | Terminator::None => {}
        }
    }

    /// The values this terminator reads, in stack order.
    #[must_use]
    pub fn operands(&self) -> Vec<&IrValue> {
        match self {
            Terminator::If { condition, .. } => condition.operands.iter().collect(),
            Terminator::Switch { index, .. } => vec![index],
            Terminator::Return(value) => value.iter().collect(),
            Terminator::Throw(value) => vec![value],
            _ => Vec::new(),
        }
    }

    /// Mutable access to the values this terminator reads.
    pub fn operands_mut(&mut self) -> Vec<&mut IrValue> {
        match self {
            Terminator::If { condition, .. } => condition.operands.iter_mut().collect(),
            Terminator::Switch { index, .. } => vec![index],
            Terminator::Return(value) => value.iter_mut().collect(),
            Terminator::Throw(value) => vec![value],
            _ => Vec::new(),
        }
    }

    /// Returns `true` if control leaves the method.
    #[must_use]
    pub fn exits(&self) -> bool {
        matches!(self, Terminator::Return(_) | Terminator::Throw(_))
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Goto(target) => write!(f, "goto {target}"),
            Terminator::Jump(target) => write!(f, "jump {target}"),
            Terminator::If {
                condition,
                on_true,
                on_false,
            } => {
                write!(f, "{}", condition.kind)?;
                for operand in &condition.operands {
                    write!(f, " {operand}")?;
                }
                write!(f, " ? {on_true} : {on_false}")
            }
            Terminator::Switch {
                index,
                default,
                cases,
            } => {
                write!(f, "switch {index} default {default} [")?;
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{case}")?;
                }
                f.write_str("]")
            }
            Terminator::Return(Some(value)) => write!(f, "return {value}"),
            Terminator::Return(None) => f.write_str("return"),
            Terminator::Throw(value) => write!(f, "throw {value}"),
            Terminator::None => f.write_str("<none>"),
        }
    }
}
