//! The closed AVM2 opcode table.
//!
//! Every opcode the virtual machine accepts is listed exactly once in the table at the
//! bottom of this file, together with the facts the rest of the crate needs about it:
//! the mnemonic, the operand layout, the static operand stack effect, the scope stack
//! effect, the control-flow category and a set of [`InstructionFlags`].
//!
//! Opcodes whose stack effect depends on their operands (argument counts, runtime
//! multiname parts) carry only the fixed part of the effect here. The dynamic part is
//! added by [`crate::analysis::stack::stack_effect`].

use bitflags::bitflags;
use std::fmt;
use strum::{EnumCount, EnumIter};

/// Encoding of the operands that follow an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandLayout {
    /// No operands
    None,
    /// One raw byte (`pushbyte`, `getscopeobject`)
    U8,
    /// One variable-length `u30`
    U30,
    /// Two `u30` values (`callproperty name, argc`, `hasnext2 obj, idx`, ...)
    U30U30,
    /// A signed 24-bit branch offset
    S24,
    /// `lookupswitch` default offset, case count and case offsets
    Switch,
    /// `debug` operands: `u8`, `u30`, `u8`, `u30`
    Debug,
}

/// Control flow behaviour of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Next,
    /// Unconditional branch
    Jump,
    /// Two-way branch: taken or fall through
    Conditional,
    /// Multi-way branch through a jump table
    Switch,
    /// Leaves the method normally
    Return,
    /// Raises an exception
    Throw,
}

impl FlowType {
    /// Returns `true` if the next instruction is not a successor.
    #[must_use]
    pub const fn ends_block(self) -> bool {
        !matches!(self, FlowType::Next | FlowType::Conditional)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Static properties of an opcode
    pub struct InstructionFlags: u8 {
        /// The instruction may raise an exception at runtime
        const CAN_THROW = 0x01;
        /// The first operand is a multiname index that may require runtime parts
        const MULTINAME = 0x02;
    }
}

/// Everything the opcode table records about one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Assembly mnemonic
    pub mnemonic: &'static str,
    /// Operand encoding
    pub layout: OperandLayout,
    /// Fixed number of operand stack values consumed
    pub pops: u8,
    /// Number of operand stack values produced
    pub pushes: u8,
    /// Change of the scope stack depth
    pub scope: i8,
    /// Control flow category
    pub flow: FlowType,
    /// Static properties
    pub flags: InstructionFlags,
}

macro_rules! opcodes {
    ($(
        $variant:ident = $byte:literal, $mnemonic:literal, $layout:ident,
        $pops:literal, $pushes:literal, $scope:literal, $flow:ident, [$($flag:ident)|*];
    )*) => {
        /// An AVM2 opcode.
        ///
        /// The discriminant is the opcode byte.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                #[doc = concat!("`", $mnemonic, "`")]
                $variant = $byte,
            )*
        }

        impl Opcode {
            /// Looks up the opcode encoded by `byte`.
            #[must_use]
            pub const fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $( $byte => Some(Opcode::$variant), )*
                    _ => None,
                }
            }

            /// Returns the table entry of this opcode.
            #[must_use]
            pub const fn info(self) -> OpcodeInfo {
                match self {
                    $(
                        Opcode::$variant => OpcodeInfo {
                            mnemonic: $mnemonic,
                            layout: OperandLayout::$layout,
                            pops: $pops,
                            pushes: $pushes,
                            scope: $scope,
                            flow: FlowType::$flow,
                            flags: InstructionFlags::empty()$(.union(InstructionFlags::$flag))*,
                        },
                    )*
                }
            }
        }
    };
}

opcodes! {
    Bkpt = 0x01, "bkpt", None, 0, 0, 0, Next, [];
    Nop = 0x02, "nop", None, 0, 0, 0, Next, [];
    Throw = 0x03, "throw", None, 1, 0, 0, Throw, [CAN_THROW];
    GetSuper = 0x04, "getsuper", U30, 1, 1, 0, Next, [CAN_THROW | MULTINAME];
    SetSuper = 0x05, "setsuper", U30, 2, 0, 0, Next, [CAN_THROW | MULTINAME];
    Dxns = 0x06, "dxns", U30, 0, 0, 0, Next, [CAN_THROW];
    DxnsLate = 0x07, "dxnslate", None, 1, 0, 0, Next, [CAN_THROW];
    Kill = 0x08, "kill", U30, 0, 0, 0, Next, [];
    Label = 0x09, "label", None, 0, 0, 0, Next, [];
    IfNlt = 0x0C, "ifnlt", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfNle = 0x0D, "ifnle", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfNgt = 0x0E, "ifngt", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfNge = 0x0F, "ifnge", S24, 2, 0, 0, Conditional, [CAN_THROW];
    Jump = 0x10, "jump", S24, 0, 0, 0, Jump, [];
    IfTrue = 0x11, "iftrue", S24, 1, 0, 0, Conditional, [];
    IfFalse = 0x12, "iffalse", S24, 1, 0, 0, Conditional, [];
    IfEq = 0x13, "ifeq", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfNe = 0x14, "ifne", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfLt = 0x15, "iflt", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfLe = 0x16, "ifle", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfGt = 0x17, "ifgt", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfGe = 0x18, "ifge", S24, 2, 0, 0, Conditional, [CAN_THROW];
    IfStrictEq = 0x19, "ifstricteq", S24, 2, 0, 0, Conditional, [];
    IfStrictNe = 0x1A, "ifstrictne", S24, 2, 0, 0, Conditional, [];
    LookupSwitch = 0x1B, "lookupswitch", Switch, 1, 0, 0, Switch, [];
    PushWith = 0x1C, "pushwith", None, 1, 0, 1, Next, [CAN_THROW];
    PopScope = 0x1D, "popscope", None, 0, 0, -1, Next, [];
    NextName = 0x1E, "nextname", None, 2, 1, 0, Next, [CAN_THROW];
    HasNext = 0x1F, "hasnext", None, 2, 1, 0, Next, [CAN_THROW];
    PushNull = 0x20, "pushnull", None, 0, 1, 0, Next, [];
    PushUndefined = 0x21, "pushundefined", None, 0, 1, 0, Next, [];
    NextValue = 0x23, "nextvalue", None, 2, 1, 0, Next, [CAN_THROW];
    PushByte = 0x24, "pushbyte", U8, 0, 1, 0, Next, [];
    PushShort = 0x25, "pushshort", U30, 0, 1, 0, Next, [];
    PushTrue = 0x26, "pushtrue", None, 0, 1, 0, Next, [];
    PushFalse = 0x27, "pushfalse", None, 0, 1, 0, Next, [];
    PushNaN = 0x28, "pushnan", None, 0, 1, 0, Next, [];
    Pop = 0x29, "pop", None, 1, 0, 0, Next, [];
    Dup = 0x2A, "dup", None, 1, 2, 0, Next, [];
    Swap = 0x2B, "swap", None, 2, 2, 0, Next, [];
    PushString = 0x2C, "pushstring", U30, 0, 1, 0, Next, [];
    PushInt = 0x2D, "pushint", U30, 0, 1, 0, Next, [];
    PushUInt = 0x2E, "pushuint", U30, 0, 1, 0, Next, [];
    PushDouble = 0x2F, "pushdouble", U30, 0, 1, 0, Next, [];
    PushScope = 0x30, "pushscope", None, 1, 0, 1, Next, [CAN_THROW];
    PushNamespace = 0x31, "pushnamespace", U30, 0, 1, 0, Next, [];
    HasNext2 = 0x32, "hasnext2", U30U30, 0, 1, 0, Next, [CAN_THROW];
    Li8 = 0x35, "li8", None, 1, 1, 0, Next, [CAN_THROW];
    Li16 = 0x36, "li16", None, 1, 1, 0, Next, [CAN_THROW];
    Li32 = 0x37, "li32", None, 1, 1, 0, Next, [CAN_THROW];
    Lf32 = 0x38, "lf32", None, 1, 1, 0, Next, [CAN_THROW];
    Lf64 = 0x39, "lf64", None, 1, 1, 0, Next, [CAN_THROW];
    Si8 = 0x3A, "si8", None, 2, 0, 0, Next, [CAN_THROW];
    Si16 = 0x3B, "si16", None, 2, 0, 0, Next, [CAN_THROW];
    Si32 = 0x3C, "si32", None, 2, 0, 0, Next, [CAN_THROW];
    Sf32 = 0x3D, "sf32", None, 2, 0, 0, Next, [CAN_THROW];
    Sf64 = 0x3E, "sf64", None, 2, 0, 0, Next, [CAN_THROW];
    NewFunction = 0x40, "newfunction", U30, 0, 1, 0, Next, [];
    Call = 0x41, "call", U30, 2, 1, 0, Next, [CAN_THROW];
    Construct = 0x42, "construct", U30, 1, 1, 0, Next, [CAN_THROW];
    CallMethod = 0x43, "callmethod", U30U30, 1, 1, 0, Next, [CAN_THROW];
    CallStatic = 0x44, "callstatic", U30U30, 1, 1, 0, Next, [CAN_THROW];
    CallSuper = 0x45, "callsuper", U30U30, 1, 1, 0, Next, [CAN_THROW | MULTINAME];
    CallProperty = 0x46, "callproperty", U30U30, 1, 1, 0, Next, [CAN_THROW | MULTINAME];
    ReturnVoid = 0x47, "returnvoid", None, 0, 0, 0, Return, [];
    ReturnValue = 0x48, "returnvalue", None, 1, 0, 0, Return, [CAN_THROW];
    ConstructSuper = 0x49, "constructsuper", U30, 1, 0, 0, Next, [CAN_THROW];
    ConstructProp = 0x4A, "constructprop", U30U30, 1, 1, 0, Next, [CAN_THROW | MULTINAME];
    CallPropLex = 0x4C, "callproplex", U30U30, 1, 1, 0, Next, [CAN_THROW | MULTINAME];
    CallSuperVoid = 0x4E, "callsupervoid", U30U30, 1, 0, 0, Next, [CAN_THROW | MULTINAME];
    CallPropVoid = 0x4F, "callpropvoid", U30U30, 1, 0, 0, Next, [CAN_THROW | MULTINAME];
    Sxi1 = 0x50, "sxi1", None, 1, 1, 0, Next, [];
    Sxi8 = 0x51, "sxi8", None, 1, 1, 0, Next, [];
    Sxi16 = 0x52, "sxi16", None, 1, 1, 0, Next, [];
    ApplyType = 0x53, "applytype", U30, 1, 1, 0, Next, [CAN_THROW];
    NewObject = 0x55, "newobject", U30, 0, 1, 0, Next, [CAN_THROW];
    NewArray = 0x56, "newarray", U30, 0, 1, 0, Next, [];
    NewActivation = 0x57, "newactivation", None, 0, 1, 0, Next, [];
    NewClass = 0x58, "newclass", U30, 1, 1, 0, Next, [CAN_THROW];
    GetDescendants = 0x59, "getdescendants", U30, 1, 1, 0, Next, [CAN_THROW | MULTINAME];
    NewCatch = 0x5A, "newcatch", U30, 0, 1, 0, Next, [];
    FindPropStrict = 0x5D, "findpropstrict", U30, 0, 1, 0, Next, [CAN_THROW | MULTINAME];
    FindProperty = 0x5E, "findproperty", U30, 0, 1, 0, Next, [CAN_THROW | MULTINAME];
    FindDef = 0x5F, "finddef", U30, 0, 1, 0, Next, [CAN_THROW];
    GetLex = 0x60, "getlex", U30, 0, 1, 0, Next, [CAN_THROW];
    SetProperty = 0x61, "setproperty", U30, 2, 0, 0, Next, [CAN_THROW | MULTINAME];
    GetLocal = 0x62, "getlocal", U30, 0, 1, 0, Next, [];
    SetLocal = 0x63, "setlocal", U30, 1, 0, 0, Next, [];
    GetGlobalScope = 0x64, "getglobalscope", None, 0, 1, 0, Next, [];
    GetScopeObject = 0x65, "getscopeobject", U8, 0, 1, 0, Next, [];
    GetProperty = 0x66, "getproperty", U30, 1, 1, 0, Next, [CAN_THROW | MULTINAME];
    InitProperty = 0x68, "initproperty", U30, 2, 0, 0, Next, [CAN_THROW | MULTINAME];
    DeleteProperty = 0x6A, "deleteproperty", U30, 1, 1, 0, Next, [CAN_THROW | MULTINAME];
    GetSlot = 0x6C, "getslot", U30, 1, 1, 0, Next, [CAN_THROW];
    SetSlot = 0x6D, "setslot", U30, 2, 0, 0, Next, [CAN_THROW];
    GetGlobalSlot = 0x6E, "getglobalslot", U30, 0, 1, 0, Next, [];
    SetGlobalSlot = 0x6F, "setglobalslot", U30, 1, 0, 0, Next, [];
    ConvertS = 0x70, "convert_s", None, 1, 1, 0, Next, [CAN_THROW];
    EscXElem = 0x71, "esc_xelem", None, 1, 1, 0, Next, [CAN_THROW];
    EscXAttr = 0x72, "esc_xattr", None, 1, 1, 0, Next, [CAN_THROW];
    ConvertI = 0x73, "convert_i", None, 1, 1, 0, Next, [CAN_THROW];
    ConvertU = 0x74, "convert_u", None, 1, 1, 0, Next, [CAN_THROW];
    ConvertD = 0x75, "convert_d", None, 1, 1, 0, Next, [CAN_THROW];
    ConvertB = 0x76, "convert_b", None, 1, 1, 0, Next, [];
    ConvertO = 0x77, "convert_o", None, 1, 1, 0, Next, [CAN_THROW];
    CheckFilter = 0x78, "checkfilter", None, 1, 1, 0, Next, [CAN_THROW];
    Coerce = 0x80, "coerce", U30, 1, 1, 0, Next, [CAN_THROW];
    CoerceB = 0x81, "coerce_b", None, 1, 1, 0, Next, [];
    CoerceA = 0x82, "coerce_a", None, 1, 1, 0, Next, [];
    CoerceI = 0x83, "coerce_i", None, 1, 1, 0, Next, [CAN_THROW];
    CoerceD = 0x84, "coerce_d", None, 1, 1, 0, Next, [CAN_THROW];
    CoerceS = 0x85, "coerce_s", None, 1, 1, 0, Next, [CAN_THROW];
    AsType = 0x86, "astype", U30, 1, 1, 0, Next, [CAN_THROW];
    AsTypeLate = 0x87, "astypelate", None, 2, 1, 0, Next, [CAN_THROW];
    CoerceU = 0x88, "coerce_u", None, 1, 1, 0, Next, [CAN_THROW];
    CoerceO = 0x89, "coerce_o", None, 1, 1, 0, Next, [];
    Negate = 0x90, "negate", None, 1, 1, 0, Next, [CAN_THROW];
    Increment = 0x91, "increment", None, 1, 1, 0, Next, [CAN_THROW];
    IncLocal = 0x92, "inclocal", U30, 0, 0, 0, Next, [CAN_THROW];
    Decrement = 0x93, "decrement", None, 1, 1, 0, Next, [CAN_THROW];
    DecLocal = 0x94, "declocal", U30, 0, 0, 0, Next, [CAN_THROW];
    TypeOf = 0x95, "typeof", None, 1, 1, 0, Next, [];
    Not = 0x96, "not", None, 1, 1, 0, Next, [];
    BitNot = 0x97, "bitnot", None, 1, 1, 0, Next, [CAN_THROW];
    Add = 0xA0, "add", None, 2, 1, 0, Next, [CAN_THROW];
    Subtract = 0xA1, "subtract", None, 2, 1, 0, Next, [CAN_THROW];
    Multiply = 0xA2, "multiply", None, 2, 1, 0, Next, [CAN_THROW];
    Divide = 0xA3, "divide", None, 2, 1, 0, Next, [CAN_THROW];
    Modulo = 0xA4, "modulo", None, 2, 1, 0, Next, [CAN_THROW];
    LShift = 0xA5, "lshift", None, 2, 1, 0, Next, [CAN_THROW];
    RShift = 0xA6, "rshift", None, 2, 1, 0, Next, [CAN_THROW];
    URShift = 0xA7, "urshift", None, 2, 1, 0, Next, [CAN_THROW];
    BitAnd = 0xA8, "bitand", None, 2, 1, 0, Next, [CAN_THROW];
    BitOr = 0xA9, "bitor", None, 2, 1, 0, Next, [CAN_THROW];
    BitXor = 0xAA, "bitxor", None, 2, 1, 0, Next, [CAN_THROW];
    Equals = 0xAB, "equals", None, 2, 1, 0, Next, [CAN_THROW];
    StrictEquals = 0xAC, "strictequals", None, 2, 1, 0, Next, [];
    LessThan = 0xAD, "lessthan", None, 2, 1, 0, Next, [CAN_THROW];
    LessEquals = 0xAE, "lessequals", None, 2, 1, 0, Next, [CAN_THROW];
    GreaterThan = 0xAF, "greaterthan", None, 2, 1, 0, Next, [CAN_THROW];
    GreaterEquals = 0xB0, "greaterequals", None, 2, 1, 0, Next, [CAN_THROW];
    InstanceOf = 0xB1, "instanceof", None, 2, 1, 0, Next, [CAN_THROW];
    IsType = 0xB2, "istype", U30, 1, 1, 0, Next, [CAN_THROW];
    IsTypeLate = 0xB3, "istypelate", None, 2, 1, 0, Next, [CAN_THROW];
    In = 0xB4, "in", None, 2, 1, 0, Next, [CAN_THROW];
    IncrementI = 0xC0, "increment_i", None, 1, 1, 0, Next, [CAN_THROW];
    DecrementI = 0xC1, "decrement_i", None, 1, 1, 0, Next, [CAN_THROW];
    IncLocalI = 0xC2, "inclocal_i", U30, 0, 0, 0, Next, [CAN_THROW];
    DecLocalI = 0xC3, "declocal_i", U30, 0, 0, 0, Next, [CAN_THROW];
    NegateI = 0xC4, "negate_i", None, 1, 1, 0, Next, [CAN_THROW];
    AddI = 0xC5, "add_i", None, 2, 1, 0, Next, [CAN_THROW];
    SubtractI = 0xC6, "subtract_i", None, 2, 1, 0, Next, [CAN_THROW];
    MultiplyI = 0xC7, "multiply_i", None, 2, 1, 0, Next, [CAN_THROW];
    GetLocal0 = 0xD0, "getlocal0", None, 0, 1, 0, Next, [];
    GetLocal1 = 0xD1, "getlocal1", None, 0, 1, 0, Next, [];
    GetLocal2 = 0xD2, "getlocal2", None, 0, 1, 0, Next, [];
    GetLocal3 = 0xD3, "getlocal3", None, 0, 1, 0, Next, [];
    SetLocal0 = 0xD4, "setlocal0", None, 1, 0, 0, Next, [];
    SetLocal1 = 0xD5, "setlocal1", None, 1, 0, 0, Next, [];
    SetLocal2 = 0xD6, "setlocal2", None, 1, 0, 0, Next, [];
    SetLocal3 = 0xD7, "setlocal3", None, 1, 0, 0, Next, [];
    Debug = 0xEF, "debug", Debug, 0, 0, 0, Next, [];
    DebugLine = 0xF0, "debugline", U30, 0, 0, 0, Next, [];
    DebugFile = 0xF1, "debugfile", U30, 0, 0, 0, Next, [];
    BkptLine = 0xF2, "bkptline", U30, 0, 0, 0, Next, [];
    Timestamp = 0xF3, "timestamp", None, 0, 0, 0, Next, [];
}

impl Opcode {
    /// The opcode byte.
    #[must_use]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Assembly mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    /// Operand encoding.
    #[must_use]
    pub const fn layout(self) -> OperandLayout {
        self.info().layout
    }

    /// Control flow category.
    #[must_use]
    pub const fn flow(self) -> FlowType {
        self.info().flow
    }

    /// Returns `true` if the instruction may raise an exception.
    #[must_use]
    pub const fn can_throw(self) -> bool {
        self.info().flags.contains(InstructionFlags::CAN_THROW)
    }

    /// Returns `true` if the first operand is a multiname that may take runtime parts.
    #[must_use]
    pub const fn takes_multiname(self) -> bool {
        self.info().flags.contains(InstructionFlags::MULTINAME)
    }

    /// Returns `true` for instructions that carry one or more branch targets.
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(
            self.flow(),
            FlowType::Jump | FlowType::Conditional | FlowType::Switch
        )
    }

    /// For conditional branches, the opcode testing the inverse condition.
    ///
    /// The negated comparisons (`ifnlt`, ...) differ from their positive counterparts
    /// for `NaN` operands, so the pairs below are the only exact inversions.
    #[must_use]
    pub const fn inverse_branch(self) -> Option<Opcode> {
        Some(match self {
            Opcode::IfTrue => Opcode::IfFalse,
            Opcode::IfFalse => Opcode::IfTrue,
            Opcode::IfEq => Opcode::IfNe,
            Opcode::IfNe => Opcode::IfEq,
            Opcode::IfStrictEq => Opcode::IfStrictNe,
            Opcode::IfStrictNe => Opcode::IfStrictEq,
            Opcode::IfLt => Opcode::IfNlt,
            Opcode::IfNlt => Opcode::IfLt,
            Opcode::IfLe => Opcode::IfNle,
            Opcode::IfNle => Opcode::IfLe,
            Opcode::IfGt => Opcode::IfNgt,
            Opcode::IfNgt => Opcode::IfGt,
            Opcode::IfGe => Opcode::IfNge,
            Opcode::IfNge => Opcode::IfGe,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
