//! Method bodies as stored in the container.
//!
//! A [`MethodBody`] carries the raw code bytes of one method together with the
//! metadata the virtual machine needs to run it: the stack and scope bounds, the
//! register count and the exception table. The pipeline consumes bodies in this form
//! and produces new bodies in the same form.

use bitflags::bitflags;
use std::fmt;

/// Index of a method in the container's method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Flags of a method signature
    pub struct MethodFlags: u8 {
        /// The method uses the `arguments` object
        const NEED_ARGUMENTS = 0x01;
        /// The method creates an activation object
        const NEED_ACTIVATION = 0x02;
        /// The method takes a `...rest` parameter
        const NEED_REST = 0x04;
        /// The method has optional parameters
        const HAS_OPTIONAL = 0x08;
        /// The method sets the default XML namespace
        const SET_DXNS = 0x40;
        /// The method carries parameter names
        const HAS_PARAM_NAMES = 0x80;
    }
}

/// One raw exception table entry, with byte offsets into the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionInfo {
    /// Start of the protected range (inclusive)
    pub from: u32,
    /// End of the protected range (exclusive)
    pub to: u32,
    /// Start of the handler code
    pub target: u32,
    /// Multiname index of the caught type, `0` for "any"
    pub exc_type: u32,
    /// Multiname index of the catch variable, `0` for none
    pub var_name: u32,
}

/// A method body record.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// The method this body belongs to
    pub method: MethodId,
    /// Number of declared parameters, not counting `this`
    pub param_count: u32,
    /// Signature flags
    pub flags: MethodFlags,
    /// Maximum operand stack depth
    pub max_stack: u32,
    /// Number of registers, including `this` and the parameters
    pub local_count: u32,
    /// Scope depth on entry
    pub init_scope_depth: u32,
    /// Maximum scope depth
    pub max_scope_depth: u32,
    /// Raw instruction bytes
    pub code: Vec<u8>,
    /// Exception table, innermost handlers first
    pub exceptions: Vec<ExceptionInfo>,
}

impl MethodBody {
    /// Creates a body with the given code and default bounds.
    ///
    /// The bounds are placeholders until the pipeline recomputes them.
    #[must_use]
    pub fn new(method: MethodId, param_count: u32, code: Vec<u8>) -> Self {
        MethodBody {
            method,
            param_count,
            flags: MethodFlags::empty(),
            max_stack: 0,
            local_count: param_count + 1,
            init_scope_depth: 0,
            max_scope_depth: 0,
            code,
            exceptions: Vec::new(),
        }
    }

    /// Sets the signature flags.
    #[must_use]
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the exception table.
    #[must_use]
    pub fn with_exceptions(mut self, exceptions: Vec<ExceptionInfo>) -> Self {
        self.exceptions = exceptions;
        self
    }

    /// Sets the declared register count.
    #[must_use]
    pub fn with_local_count(mut self, local_count: u32) -> Self {
        self.local_count = local_count;
        self
    }

    /// Sets the scope depth on entry.
    #[must_use]
    pub fn with_init_scope_depth(mut self, depth: u32) -> Self {
        self.init_scope_depth = depth;
        self
    }

    /// Number of registers initialized on entry: `this`, the parameters and the
    /// optional `rest`/`arguments` register.
    #[must_use]
    pub fn argument_registers(&self) -> u32 {
        argument_registers(self.param_count, self.flags)
    }
}

/// Number of registers initialized on entry for a signature.
#[must_use]
pub fn argument_registers(param_count: u32, flags: MethodFlags) -> u32 {
    let extra = u32::from(flags.intersects(MethodFlags::NEED_REST | MethodFlags::NEED_ARGUMENTS));
    param_count + 1 + extra
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_registers() {
        let body = MethodBody::new(MethodId(1), 2, Vec::new());
        assert_eq!(body.argument_registers(), 3);

        let body = body.with_flags(MethodFlags::NEED_REST);
        assert_eq!(body.argument_registers(), 4);
        assert_eq!(body.local_count, 3);
    }

    #[test]
    fn test_method_id_display() {
        assert_eq!(MethodId(7).to_string(), "method#7");
    }
}
