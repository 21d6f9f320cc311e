//! Fluent construction of instruction streams with named labels.
//!
//! [`InstructionAssembler`] appends instructions one at a time and resolves branch
//! targets by label name. Labels may be referenced before they are defined; the
//! referenced marker is bound when the label is placed. Emission never fails on its
//! own; the first problem (a label defined twice, a label never defined) is reported
//! by [`InstructionAssembler::finish`].
//!
//! # Examples
//!
//! ```rust
//! use abcscope::assembly::{encode, InstructionAssembler};
//!
//! let mut asm = InstructionAssembler::new();
//! asm.getlocal(1)
//!     .iffalse("zero")
//!     .pushbyte(1)
//!     .returnvalue()
//!     .label("zero")
//!     .pushbyte(0)
//!     .returnvalue();
//!
//! let code = asm.finish()?;
//! assert_eq!(code.len(), 6);
//! assert_eq!(encode(&code)?[..5], [0xD1, 0x12, 0x03, 0x00, 0x00]);
//! # Ok::<(), abcscope::Error>(())
//! ```

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    assembly::{Anchor, Bytecode, ExceptionHandler, Instruction, Marker, Opcode},
    Error, Result,
};

/// Builds a [`Bytecode`] instruction by instruction.
#[derive(Debug, Default)]
pub struct InstructionAssembler {
    bytecode: Bytecode,
    labels: FxHashMap<String, Marker>,
    defined: FxHashSet<String>,
    /// Labels placed since the last instruction, bound by the next one
    pending: Vec<Marker>,
    error: Option<Error>,
}

impl InstructionAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    /// Returns `true` if nothing was emitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    fn marker(&mut self, name: &str) -> Marker {
        if let Some(&marker) = self.labels.get(name) {
            return marker;
        }

        let marker = self.bytecode.markers_mut().fresh();
        self.labels.insert(name.to_string(), marker);
        marker
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Appends an arbitrary instruction.
    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        let id = self.bytecode.push(instruction);
        for marker in self.pending.drain(..) {
            self.bytecode.markers_mut().bind(marker, Anchor::Instr(id));
        }
        self
    }

    /// Places label `name` at the next emitted instruction.
    pub fn label(&mut self, name: &str) -> &mut Self {
        if !self.defined.insert(name.to_string()) {
            self.fail(malformed_error!("label '{}' is defined twice", name));
            return self;
        }

        let marker = self.marker(name);
        self.pending.push(marker);
        self
    }

    /// Appends an instruction without operands.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.emit(Instruction::simple(opcode))
    }

    /// Appends an instruction with one `u30` operand.
    pub fn op_index(&mut self, opcode: Opcode, index: u32) -> &mut Self {
        self.emit(Instruction::with_index(opcode, index))
    }

    /// Appends an instruction with two `u30` operands.
    pub fn op_pair(&mut self, opcode: Opcode, first: u32, second: u32) -> &mut Self {
        self.emit(Instruction::with_pair(opcode, first, second))
    }

    /// Appends a branch to label `target`.
    pub fn branch(&mut self, opcode: Opcode, target: &str) -> &mut Self {
        let marker = self.marker(target);
        self.emit(Instruction::branch(opcode, marker))
    }

    /// Appends a `lookupswitch` over the given labels.
    pub fn lookupswitch(&mut self, default: &str, cases: &[&str]) -> &mut Self {
        if cases.is_empty() {
            self.fail(malformed_error!("lookupswitch needs at least one case"));
            return self;
        }

        let default = self.marker(default);
        let cases = cases.iter().map(|case| self.marker(case)).collect();
        self.emit(Instruction::switch(default, cases))
    }

    /// Adds an exception handler covering `[from, to)` and entering at `target`.
    pub fn handler(
        &mut self,
        from: &str,
        to: &str,
        target: &str,
        exc_type: u32,
        var_name: u32,
    ) -> &mut Self {
        let handler = ExceptionHandler {
            from: self.marker(from),
            to: self.marker(to),
            target: self.marker(target),
            exc_type,
            var_name,
        };
        self.bytecode.add_handler(handler);
        self
    }

    /// `getlocal` in its shortest form.
    pub fn getlocal(&mut self, register: u32) -> &mut Self {
        self.emit(Instruction::get_local(register))
    }

    /// `setlocal` in its shortest form.
    pub fn setlocal(&mut self, register: u32) -> &mut Self {
        self.emit(Instruction::set_local(register))
    }

    /// `getlocal0; pushscope`, the usual method prologue.
    pub fn prologue(&mut self) -> &mut Self {
        self.getlocal(0).op(Opcode::PushScope)
    }

    /// `pushbyte`
    pub fn pushbyte(&mut self, value: i8) -> &mut Self {
        self.emit(Instruction::with_byte(Opcode::PushByte, value as u8))
    }

    /// `pushshort`
    pub fn pushshort(&mut self, value: i16) -> &mut Self {
        self.op_index(Opcode::PushShort, u32::from(value as u16))
    }

    /// `pushtrue`
    pub fn pushtrue(&mut self) -> &mut Self {
        self.op(Opcode::PushTrue)
    }

    /// `pushfalse`
    pub fn pushfalse(&mut self) -> &mut Self {
        self.op(Opcode::PushFalse)
    }

    /// `pushnull`
    pub fn pushnull(&mut self) -> &mut Self {
        self.op(Opcode::PushNull)
    }

    /// `pushundefined`
    pub fn pushundefined(&mut self) -> &mut Self {
        self.op(Opcode::PushUndefined)
    }

    /// `pushstring`
    pub fn pushstring(&mut self, index: u32) -> &mut Self {
        self.op_index(Opcode::PushString, index)
    }

    /// `add`
    pub fn add(&mut self) -> &mut Self {
        self.op(Opcode::Add)
    }

    /// `subtract`
    pub fn subtract(&mut self) -> &mut Self {
        self.op(Opcode::Subtract)
    }

    /// `multiply`
    pub fn multiply(&mut self) -> &mut Self {
        self.op(Opcode::Multiply)
    }

    /// `increment`
    pub fn increment(&mut self) -> &mut Self {
        self.op(Opcode::Increment)
    }

    /// `lessthan`
    pub fn lessthan(&mut self) -> &mut Self {
        self.op(Opcode::LessThan)
    }

    /// `pop`
    pub fn pop(&mut self) -> &mut Self {
        self.op(Opcode::Pop)
    }

    /// `dup`
    pub fn dup(&mut self) -> &mut Self {
        self.op(Opcode::Dup)
    }

    /// `swap`
    pub fn swap(&mut self) -> &mut Self {
        self.op(Opcode::Swap)
    }

    /// `pushscope`
    pub fn pushscope(&mut self) -> &mut Self {
        self.op(Opcode::PushScope)
    }

    /// `popscope`
    pub fn popscope(&mut self) -> &mut Self {
        self.op(Opcode::PopScope)
    }

    /// `getproperty`
    pub fn getproperty(&mut self, name: u32) -> &mut Self {
        self.op_index(Opcode::GetProperty, name)
    }

    /// `setproperty`
    pub fn setproperty(&mut self, name: u32) -> &mut Self {
        self.op_index(Opcode::SetProperty, name)
    }

    /// `findpropstrict`
    pub fn findpropstrict(&mut self, name: u32) -> &mut Self {
        self.op_index(Opcode::FindPropStrict, name)
    }

    /// `callproperty`
    pub fn callproperty(&mut self, name: u32, arg_count: u32) -> &mut Self {
        self.op_pair(Opcode::CallProperty, name, arg_count)
    }

    /// `callpropvoid`
    pub fn callpropvoid(&mut self, name: u32, arg_count: u32) -> &mut Self {
        self.op_pair(Opcode::CallPropVoid, name, arg_count)
    }

    /// `callstatic`
    pub fn callstatic(&mut self, method: u32, arg_count: u32) -> &mut Self {
        self.op_pair(Opcode::CallStatic, method, arg_count)
    }

    /// `inclocal`
    pub fn inclocal(&mut self, register: u32) -> &mut Self {
        self.op_index(Opcode::IncLocal, register)
    }

    /// `kill`
    pub fn kill(&mut self, register: u32) -> &mut Self {
        self.op_index(Opcode::Kill, register)
    }

    /// `jump`
    pub fn jump(&mut self, target: &str) -> &mut Self {
        self.branch(Opcode::Jump, target)
    }

    /// `iftrue`
    pub fn iftrue(&mut self, target: &str) -> &mut Self {
        self.branch(Opcode::IfTrue, target)
    }

    /// `iffalse`
    pub fn iffalse(&mut self, target: &str) -> &mut Self {
        self.branch(Opcode::IfFalse, target)
    }

    /// `iflt`
    pub fn iflt(&mut self, target: &str) -> &mut Self {
        self.branch(Opcode::IfLt, target)
    }

    /// `returnvalue`
    pub fn returnvalue(&mut self) -> &mut Self {
        self.op(Opcode::ReturnValue)
    }

    /// `returnvoid`
    pub fn returnvoid(&mut self) -> &mut Self {
        self.op(Opcode::ReturnVoid)
    }

    /// `throw`
    pub fn throw(&mut self) -> &mut Self {
        self.op(Opcode::Throw)
    }

    /// Finishes assembly.
    ///
    /// Labels placed after the last instruction resolve to the end of the code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if a label was defined twice or referenced
    /// without being defined.
    pub fn finish(mut self) -> Result<Bytecode> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }

        for marker in self.pending.drain(..) {
            self.bytecode.markers_mut().bind(marker, Anchor::End);
        }

        let mut undefined: Vec<&String> = self
            .labels
            .keys()
            .filter(|name| !self.defined.contains(*name))
            .collect();
        if !undefined.is_empty() {
            undefined.sort();
            return Err(malformed_error!("undefined labels: {:?}", undefined));
        }

        Ok(self.bytecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Operands;

    #[test]
    fn test_forward_and_backward_labels() {
        let mut asm = InstructionAssembler::new();
        asm.label("top")
            .getlocal(1)
            .iftrue("out")
            .jump("top")
            .label("out")
            .returnvoid();
        let code = asm.finish().unwrap();
        let listing = code.resolved_listing().unwrap();

        assert_eq!(listing[1].operands, Operands::Branch(3));
        assert_eq!(listing[2].operands, Operands::Branch(0));
    }

    #[test]
    fn test_label_at_end() {
        let mut asm = InstructionAssembler::new();
        asm.jump("end").label("end");
        let code = asm.finish().unwrap();
        assert_eq!(code.resolved_listing().unwrap()[0].operands, Operands::Branch(1));
    }

    #[test]
    fn test_label_errors() {
        let mut asm = InstructionAssembler::new();
        asm.label("a").op(Opcode::Nop).label("a");
        assert!(matches!(asm.finish(), Err(Error::Malformed { .. })));

        let mut asm = InstructionAssembler::new();
        asm.jump("nowhere");
        assert!(asm.finish().is_err());
    }
}
