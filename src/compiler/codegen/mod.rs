//! IR to bytecode: the linearizer.
//!
//! [`CodeGenerator`] turns an optimized [`IrFunction`] back into a [`Bytecode`] the
//! encoder can write out:
//!
//! 1. edges from a conditional branch or switch into a block with phis are split, so
//!    every phi move has a block of its own to live in
//! 2. blocks are placed as fallthrough traces
//! 3. every block is lowered in order. A value consumed by the very next operation is
//!    left on the operand stack; every other value goes to a fresh register above the
//!    method's own registers
//! 4. phis become register moves at the end of their predecessors
//! 5. the exception table is rebuilt from the handler lists of the placed blocks
//!
//! Branch targets and handler ranges are markers, so the encoder resolves all
//! offsets once the final instruction sizes are known.

mod emitter;
mod layout;

use crate::{analysis::ir::IrFunction, assembly::Bytecode, metadata::ConstantPool, Result};

use layout::split_critical_edges;

/// Generates bytecode from IR.
///
/// Constants that are not encoded inline are interned into the pool handed to
/// [`CodeGenerator::generate`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeGenerator;

impl CodeGenerator {
    /// Creates a new code generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Lowers `function` to an instruction stream.
    ///
    /// The function itself is left untouched; edge splitting happens on a copy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the IR is inconsistent, for example a value
    /// used before it is computed or a block without terminator, and
    /// [`crate::Error::Unsupported`] if the exception handlers do not nest.
    pub fn generate(&self, function: &IrFunction, pool: &mut ConstantPool) -> Result<Bytecode> {
        let mut function = function.clone();
        let split = split_critical_edges(&mut function)?;
        if split > 0 {
            log::trace!("{}: split {split} critical edges", function.method());
        }

        let bytecode = emitter::Emitter::new(&function, pool).run()?;
        log::debug!(
            "{}: emitted {} instructions from {} blocks",
            function.method(),
            bytecode.len(),
            function.block_count()
        );
        Ok(bytecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{cfg::ControlFlowGraph, stack},
        assembly::{encode, encode_body, InstructionAssembler, Opcode},
        config::PipelineConfig,
        metadata::{MethodBody, MethodId},
        pipeline::lift,
        test::{lift_asm, pool},
    };

    fn regenerate(function: &IrFunction) -> Bytecode {
        let mut pool = pool();
        CodeGenerator::new().generate(function, &mut pool).unwrap()
    }

    fn opcodes(bytecode: &Bytecode) -> Vec<Opcode> {
        bytecode.iter().map(|(_, i)| i.opcode).collect()
    }

    /// Encodes `bytecode` and lifts it again.
    fn relift(bytecode: &Bytecode, param_count: u32) -> IrFunction {
        let encoded = encode_body(bytecode).unwrap();
        let body = MethodBody::new(MethodId(0), param_count, encoded.code)
            .with_exceptions(encoded.exceptions);
        lift(&body, &pool(), &PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_straight_line_is_reproduced() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(0).pushscope().pushbyte(5).returnvalue();
        let function = lift_asm(0, asm);

        let bytecode = regenerate(&function);
        assert_eq!(encode(&bytecode).unwrap(), [0xD0, 0x30, 0x24, 0x05, 0x48]);
    }

    #[test]
    fn test_single_use_stays_on_stack() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1).pushbyte(1).add().returnvalue();
        let function = lift_asm(1, asm);

        let bytecode = regenerate(&function);
        assert_eq!(
            opcodes(&bytecode),
            vec![Opcode::GetLocal1, Opcode::PushByte, Opcode::Add, Opcode::ReturnValue]
        );
    }

    #[test]
    fn test_loop_gets_label_and_phi_moves() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(0)
            .setlocal(1)
            .label("top")
            .getlocal(1)
            .pushbyte(10)
            .lessthan()
            .iffalse("done")
            .inclocal(1)
            .jump("top")
            .label("done")
            .returnvoid();
        let function = lift_asm(0, asm);

        let bytecode = regenerate(&function);
        let ops = opcodes(&bytecode);
        assert_eq!(ops.iter().filter(|&&op| op == Opcode::Label).count(), 1);
        assert!(ops.contains(&Opcode::Jump));

        let cfg = ControlFlowGraph::build(&bytecode).unwrap();
        let bounds = stack::analyze(&bytecode, &cfg, &pool(), 4096).unwrap();
        assert!(bounds.max_stack >= 2);
        relift(&bytecode, 0).verify().unwrap();
    }

    #[test]
    fn test_branch_arms_need_one_jump_at_most() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .iffalse("else")
            .pushbyte(1)
            .returnvalue()
            .label("else")
            .pushbyte(2)
            .returnvalue();
        let function = lift_asm(1, asm);

        let bytecode = regenerate(&function);
        let ops = opcodes(&bytecode);
        assert!(!ops.contains(&Opcode::Jump));
        assert_eq!(ops.iter().filter(|&&op| op == Opcode::ReturnValue).count(), 2);
    }

    #[test]
    fn test_phi_inputs_skip_temporaries() {
        // return a ? a + 1 : a + 2
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .iffalse("else")
            .getlocal(1)
            .pushbyte(1)
            .add()
            .jump("join")
            .label("else")
            .getlocal(1)
            .pushbyte(2)
            .add()
            .label("join")
            .returnvalue();
        let function = lift_asm(1, asm);

        let bytecode = regenerate(&function);
        // Each arm stores its sum straight into the phi register, read once at the join
        let writes: Vec<u32> = bytecode.iter().filter_map(|(_, i)| i.local_write()).collect();
        assert_eq!(writes, vec![2, 2], "{}", bytecode.dump());
        let reads = bytecode
            .iter()
            .filter(|(_, i)| i.local_read() == Some(2))
            .count();
        assert_eq!(reads, 1);

        relift(&bytecode, 1).verify().unwrap();
    }

    #[test]
    fn test_handler_range_is_rebuilt() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(0)
            .setlocal(2)
            .label("try")
            .getlocal(1)
            .pushbyte(1)
            .add()
            .setlocal(2)
            .label("try_end")
            .jump("end")
            .label("catch")
            .pop()
            .label("end")
            .getlocal(2)
            .returnvalue()
            .handler("try", "try_end", "catch", 0, 0);
        let function = lift_asm(1, asm);

        let bytecode = regenerate(&function);
        assert_eq!(bytecode.handlers().len(), 1);

        let positions = bytecode.positions();
        let handler = bytecode.resolved_handlers(&positions).unwrap()[0];
        assert!(handler.from < handler.to);
        assert!(handler.to <= handler.target);

        let again = relift(&bytecode, 1);
        assert_eq!(again.handlers().len(), 1);
    }
}
