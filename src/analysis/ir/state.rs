//! The abstract machine state carried along control flow edges.

use crate::{analysis::ir::IrValue, Result};

/// Operand stack, scope stack and register file of the abstract interpreter.
///
/// States are plain values: a branch hands a clone to every successor, so successors
/// never observe each other's effects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameState {
    /// Operand stack, bottom first
    pub stack: Vec<IrValue>,
    /// Scope stack, outermost first
    pub scope: Vec<IrValue>,
    /// One value per register
    pub locals: Vec<IrValue>,
}

impl FrameState {
    /// Creates a state with empty stacks and room for the given depths.
    #[must_use]
    pub fn new(locals: Vec<IrValue>, max_stack: usize, max_scope: usize) -> Self {
        FrameState {
            stack: Vec::with_capacity(max_stack),
            scope: Vec::with_capacity(max_scope),
            locals,
        }
    }

    /// Pushes a value on the operand stack.
    pub fn push(&mut self, value: IrValue) {
        self.stack.push(value);
    }

    /// Pops the top of the operand stack.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on underflow.
    pub fn pop(&mut self) -> Result<IrValue> {
        self.stack
            .pop()
            .ok_or_else(|| malformed_error!("operand stack underflow"))
    }

    /// Pops `count` values and returns them bottom first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on underflow.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<IrValue>> {
        if count > self.stack.len() {
            return Err(malformed_error!(
                "operand stack underflow: need {}, have {}",
                count,
                self.stack.len()
            ));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// The top of the operand stack.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the stack is empty.
    pub fn peek(&self) -> Result<&IrValue> {
        self.stack
            .last()
            .ok_or_else(|| malformed_error!("operand stack underflow"))
    }

    /// The value of register `register`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the register does not exist.
    pub fn local(&self, register: u32) -> Result<&IrValue> {
        self.locals
            .get(register as usize)
            .ok_or_else(|| malformed_error!("register {} is out of range", register))
    }

    /// Sets the value of register `register`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the register does not exist.
    pub fn set_local(&mut self, register: u32, value: IrValue) -> Result<()> {
        let slot = self
            .locals
            .get_mut(register as usize)
            .ok_or_else(|| malformed_error!("register {} is out of range", register))?;
        *slot = value;
        Ok(())
    }

    /// Every slot of the state: stack, scope, then registers.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut IrValue> {
        self.stack
            .iter_mut()
            .chain(self.scope.iter_mut())
            .chain(self.locals.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ir::Constant;

    #[test]
    fn test_pop_n_keeps_stack_order() {
        let mut state = FrameState::default();
        for value in 1..=3 {
            state.push(IrValue::Const(Constant::Int(value)));
        }
        let popped = state.pop_n(2).unwrap();
        assert_eq!(
            popped,
            vec![
                IrValue::Const(Constant::Int(2)),
                IrValue::Const(Constant::Int(3))
            ]
        );
        assert_eq!(state.stack.len(), 1);
        assert!(state.pop_n(2).is_err());
    }

    #[test]
    fn test_register_bounds() {
        let mut state = FrameState::new(vec![IrValue::local(0, 0)], 4, 1);
        assert!(state.local(0).is_ok());
        assert!(state.local(1).is_err());
        assert!(state.set_local(1, IrValue::local(0, 0)).is_err());
    }
}
