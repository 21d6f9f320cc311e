//! Instruction selection and operand stack scheduling.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    analysis::ir::{
        BlockId, Constant, EdgeKind, IrFunction, IrValue, NodeKind, ScopeOp, Terminator, ValueId,
    },
    assembly::{Anchor, Bytecode, ExceptionHandler, Instruction, Marker, OperandLayout, Operands, Opcode},
    compiler::codegen::layout::Layout,
    metadata::{ConstantPool, PoolValue},
    Error, Result,
};

/// The edge kind of an unconditional terminator towards its only target.
fn goto_edge(terminator: &Terminator) -> Option<(EdgeKind, BlockId)> {
    match terminator {
        Terminator::Goto(target) => Some((EdgeKind::Default, *target)),
        Terminator::Jump(target) => Some((EdgeKind::Jump, *target)),
        _ => None,
    }
}

/// The used phis of `target` with their inputs along the edge from `block`, in the
/// order the inputs are pushed.
fn phi_moves<'f>(
    function: &'f IrFunction,
    uses: &FxHashMap<ValueId, usize>,
    block: BlockId,
    kind: EdgeKind,
    target: BlockId,
) -> Result<Vec<(ValueId, &'f IrValue)>> {
    let Some(data) = function.block(target) else {
        return Ok(Vec::new());
    };

    let mut moves = Vec::new();
    for &phi in data.phis() {
        if !uses.contains_key(&phi) {
            continue;
        }
        let Some(NodeKind::Phi(inputs)) = function.kind(phi) else {
            continue;
        };
        let input = inputs
            .iter()
            .find(|input| input.from == block && input.kind == kind)
            .ok_or_else(|| malformed_error!("phi {} has no input from {}", phi, block))?;
        moves.push((phi, &input.value));
    }
    Ok(moves)
}

/// Emits one function. Lives for a single [`super::CodeGenerator::generate`] call.
pub(crate) struct Emitter<'a> {
    function: &'a IrFunction,
    pool: &'a mut ConstantPool,
    layout: Layout,
    bytecode: Bytecode,
    /// Block start markers
    labels: FxHashMap<BlockId, Marker>,
    /// Markers waiting for the next instruction
    pending: Vec<Marker>,
    /// Registers holding node values
    temps: FxHashMap<ValueId, u32>,
    next_temp: u32,
    /// Nodes whose value stays on the stack for the next consumer
    deferred: FxHashSet<ValueId>,
    uses: FxHashMap<ValueId, usize>,
    /// Instruction count at the start of each placed block
    starts: Vec<usize>,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(function: &'a IrFunction, pool: &'a mut ConstantPool) -> Self {
        let layout = Layout::compute(function);
        let uses = function.use_counts();
        let mut emitter = Emitter {
            function,
            pool,
            layout,
            bytecode: Bytecode::new(),
            labels: FxHashMap::default(),
            pending: Vec::new(),
            temps: FxHashMap::default(),
            next_temp: function.local_count(),
            deferred: FxHashSet::default(),
            uses,
            starts: Vec::new(),
        };
        emitter.schedule();
        emitter
    }

    /// Decides which values are consumed straight off the stack.
    ///
    /// A value is deferred when its only use is the first operand of the node right
    /// after it, or of the terminator when it is the last node of its block. For a
    /// jump the operands are the phi inputs moved along it, so a value computed only
    /// to feed the first of those phis never passes through a temporary.
    fn schedule(&mut self) {
        let function = self.function;
        for &block in self.layout.blocks() {
            let Some(data) = function.block(block) else {
                continue;
            };
            let body = data.body();
            for (i, &id) in body.iter().enumerate() {
                let Some(kind) = function.kind(id) else {
                    continue;
                };
                if !kind.produces_value()
                    || matches!(kind, NodeKind::HasNext2 { .. } | NodeKind::CaughtException)
                    || self.uses.get(&id) != Some(&1)
                {
                    continue;
                }
                let consumer: Vec<&IrValue> = match body.get(i + 1) {
                    Some(&next) => function.kind(next).map(NodeKind::operands).unwrap_or_default(),
                    None => match goto_edge(data.terminator()) {
                        Some((kind, target)) => phi_moves(function, &self.uses, block, kind, target)
                            .map(|moves| moves.into_iter().map(|(_, value)| value).collect())
                            .unwrap_or_default(),
                        None => data.terminator().operands(),
                    },
                };
                if consumer.first() == Some(&&IrValue::Node(id)) {
                    self.deferred.insert(id);
                }
            }
        }
    }

    /// Emits the function and returns the instruction stream.
    pub(crate) fn run(mut self) -> Result<Bytecode> {
        let blocks = self.layout.blocks().to_vec();
        for &block in &blocks {
            let marker = self.bytecode.markers_mut().fresh();
            self.labels.insert(block, marker);
        }

        for &block in &blocks {
            self.starts.push(self.bytecode.len());
            let marker = self.label(block)?;
            self.pending.push(marker);
            self.emit_block(block)?;
        }
        for marker in std::mem::take(&mut self.pending) {
            self.bytecode.markers_mut().bind(marker, Anchor::End);
        }

        self.emit_handlers(&blocks)?;
        Ok(self.bytecode)
    }

    fn label(&self, block: BlockId) -> Result<Marker> {
        self.labels
            .get(&block)
            .copied()
            .ok_or_else(|| malformed_error!("block {} is branched to but never placed", block))
    }

    fn push(&mut self, instruction: Instruction) {
        let id = self.bytecode.push(instruction);
        for marker in self.pending.drain(..) {
            self.bytecode.markers_mut().bind(marker, Anchor::Instr(id));
        }
    }

    fn temp(&mut self, id: ValueId) -> u32 {
        if let Some(&register) = self.temps.get(&id) {
            return register;
        }
        let register = self.next_temp;
        self.next_temp += 1;
        self.temps.insert(id, register);
        register
    }

    fn is_handler_entry(&self, block: BlockId) -> bool {
        self.function.handlers().iter().any(|h| h.target == block)
    }

    fn emit_block(&mut self, block: BlockId) -> Result<()> {
        let function = self.function;
        let Some(data) = function.block(block) else {
            return Err(malformed_error!("block {} does not exist", block));
        };

        if self.layout.is_backward_target(function, block) {
            self.push(Instruction::simple(Opcode::Label));
        }

        let body = data.body();
        let catches = body
            .first()
            .is_some_and(|&id| matches!(function.kind(id), Some(NodeKind::CaughtException)));
        if self.is_handler_entry(block) && !catches {
            // The exception is on the stack but nothing reads it
            self.push(Instruction::simple(Opcode::Pop));
        }

        for (i, &id) in body.iter().enumerate() {
            if i > 0 && matches!(function.kind(id), Some(NodeKind::CaughtException)) {
                return Err(malformed_error!("{} catches an exception in the middle of {}", id, block));
            }
            self.emit_node(id)?;
        }
        self.emit_terminator(block, data.terminator())
    }

    fn push_value(&mut self, value: &IrValue) -> Result<()> {
        match value {
            IrValue::Const(constant) => {
                let instruction = self.constant(constant);
                self.push(instruction);
            }
            IrValue::Local(local) => self.push(Instruction::get_local(local.register)),
            IrValue::Node(id) => {
                if self.deferred.contains(id) {
                    return Ok(());
                }
                let Some(&register) = self.temps.get(id) else {
                    return Err(malformed_error!("{} is used before it is computed", id));
                };
                self.push(Instruction::get_local(register));
            }
        }
        Ok(())
    }

    fn constant(&mut self, constant: &Constant) -> Instruction {
        match constant {
            Constant::Undefined => Instruction::simple(Opcode::PushUndefined),
            Constant::Null => Instruction::simple(Opcode::PushNull),
            Constant::Bool(true) => Instruction::simple(Opcode::PushTrue),
            Constant::Bool(false) => Instruction::simple(Opcode::PushFalse),
            Constant::Int(value) => {
                if let Ok(byte) = i8::try_from(*value) {
                    Instruction::with_byte(Opcode::PushByte, byte as u8)
                } else if let Ok(short) = i16::try_from(*value) {
                    Instruction::with_index(Opcode::PushShort, u32::from(short as u16))
                } else {
                    let index = self.pool.get_index(PoolValue::Int(*value));
                    Instruction::with_index(Opcode::PushInt, index)
                }
            }
            Constant::UInt(value) => {
                let index = self.pool.get_index(PoolValue::UInt(*value));
                Instruction::with_index(Opcode::PushUInt, index)
            }
            Constant::Double(value) if value.is_nan() => Instruction::simple(Opcode::PushNaN),
            Constant::Double(value) => {
                let index = self.pool.get_index(PoolValue::Double(*value));
                Instruction::with_index(Opcode::PushDouble, index)
            }
            Constant::String(value) => {
                let index = self.pool.get_index(PoolValue::String(value.clone()));
                Instruction::with_index(Opcode::PushString, index)
            }
            Constant::Namespace(index) => Instruction::with_index(Opcode::PushNamespace, *index),
        }
    }

    /// Pushes `operands` in order.
    fn push_operands(&mut self, operands: &[&IrValue]) -> Result<()> {
        for operand in operands {
            self.push_value(operand)?;
        }
        Ok(())
    }

    fn emit_node(&mut self, id: ValueId) -> Result<()> {
        let function = self.function;
        let Some(kind) = function.kind(id) else {
            return Err(malformed_error!("node {} does not exist", id));
        };

        match kind {
            NodeKind::Phi(_) => return Err(malformed_error!("phi {} in a block body", id)),
            NodeKind::CaughtException => {}
            NodeKind::StoreLocal {
                register,
                value: IrValue::Const(Constant::Undefined),
            } => self.push(Instruction::with_index(Opcode::Kill, *register)),
            NodeKind::StoreLocal { register, value } => {
                self.push_value(value)?;
                self.push(Instruction::set_local(*register));
            }
            NodeKind::HasNext2 { object, index } => {
                self.push(Instruction::with_pair(Opcode::HasNext2, *object, *index));
            }
            NodeKind::Unary { op, operand } => {
                self.push_value(operand)?;
                self.push(Instruction::simple(op.opcode()));
            }
            NodeKind::Type { op, name, operand } => {
                self.push_value(operand)?;
                self.push(Instruction::with_index(op.opcode(), *name));
            }
            NodeKind::Binary { op, lhs, rhs } => {
                self.push_value(lhs)?;
                self.push_value(rhs)?;
                self.push(Instruction::simple(op.opcode()));
            }
            NodeKind::Copy(value) => self.push_value(value)?,
            NodeKind::Property {
                opcode,
                name,
                operands,
            } => {
                self.push_operands(&operands.iter().collect::<Vec<_>>())?;
                self.push(Instruction::new(*opcode, Operands::Index(*name))?);
            }
            NodeKind::Call {
                opcode,
                index,
                arg_count,
                operands,
            } => {
                self.push_operands(&operands.iter().collect::<Vec<_>>())?;
                let operands = match opcode.layout() {
                    OperandLayout::U30U30 => Operands::Pair(*index, *arg_count),
                    _ => Operands::Index(*arg_count),
                };
                self.push(Instruction::new(*opcode, operands)?);
            }
            NodeKind::Operation {
                instruction,
                operands,
            } => {
                self.push_operands(&operands.iter().collect::<Vec<_>>())?;
                self.push(instruction.clone());
            }
            NodeKind::Scope { op, operand } => {
                if let Some(operand) = operand {
                    self.push_value(operand)?;
                }
                let opcode = match op {
                    ScopeOp::Push => Opcode::PushScope,
                    ScopeOp::PushWith => Opcode::PushWith,
                    ScopeOp::Pop => Opcode::PopScope,
                };
                self.push(Instruction::simple(opcode));
            }
            NodeKind::Debug(instruction) => self.push(instruction.clone()),
        }

        if kind.produces_value() && !self.deferred.contains(&id) {
            if self.uses.contains_key(&id) {
                let register = self.temp(id);
                self.push(Instruction::set_local(register));
            } else {
                self.push(Instruction::simple(Opcode::Pop));
            }
        }
        Ok(())
    }

    /// Moves the values flowing into the phis of `target` along the edge from `block`.
    fn emit_phi_moves(&mut self, block: BlockId, kind: EdgeKind, target: BlockId) -> Result<()> {
        let moves = phi_moves(self.function, &self.uses, block, kind, target)?;

        // All inputs are read before any phi register is written
        for (_, value) in &moves {
            self.push_value(value)?;
        }
        for (phi, _) in moves.iter().rev() {
            let register = self.temp(*phi);
            self.push(Instruction::set_local(register));
        }
        Ok(())
    }

    fn emit_terminator(&mut self, block: BlockId, terminator: &Terminator) -> Result<()> {
        let next = self.layout.next(block);
        match terminator {
            Terminator::Goto(target) | Terminator::Jump(target) => {
                if let Some((kind, _)) = goto_edge(terminator) {
                    self.emit_phi_moves(block, kind, *target)?;
                }
                if next != Some(*target) {
                    let label = self.label(*target)?;
                    self.push(Instruction::branch(Opcode::Jump, label));
                }
            }
            Terminator::If {
                condition,
                on_true,
                on_false,
            } => {
                self.push_operands(&condition.operands.iter().collect::<Vec<_>>())?;
                let opcode = condition.kind.opcode();
                match opcode.inverse_branch() {
                    Some(inverse) if next == Some(*on_true) => {
                        let label = self.label(*on_false)?;
                        self.push(Instruction::branch(inverse, label));
                    }
                    _ => {
                        let label = self.label(*on_true)?;
                        self.push(Instruction::branch(opcode, label));
                        if next != Some(*on_false) {
                            let label = self.label(*on_false)?;
                            self.push(Instruction::branch(Opcode::Jump, label));
                        }
                    }
                }
            }
            Terminator::Switch {
                index,
                default,
                cases,
            } => {
                self.push_value(index)?;
                let default = self.label(*default)?;
                let cases = cases
                    .iter()
                    .map(|case| self.label(*case))
                    .collect::<Result<Vec<_>>>()?;
                self.push(Instruction::new(
                    Opcode::LookupSwitch,
                    Operands::Switch { default, cases },
                )?);
            }
            Terminator::Return(None) => self.push(Instruction::simple(Opcode::ReturnVoid)),
            Terminator::Return(Some(value)) => {
                self.push_value(value)?;
                self.push(Instruction::simple(Opcode::ReturnValue));
            }
            Terminator::Throw(value) => {
                self.push_value(value)?;
                self.push(Instruction::simple(Opcode::Throw));
            }
            Terminator::None => {
                return Err(malformed_error!("block {} has no terminator", block));
            }
        }
        Ok(())
    }

    /// Handler indices ordered so that inner handlers come before the handlers that
    /// enclose them in every block.
    fn handler_order(&self, blocks: &[BlockId]) -> Result<Vec<usize>> {
        let count = self.function.handlers().len();
        let mut before: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); count];
        for &block in blocks {
            let Some(data) = self.function.block(block) else {
                continue;
            };
            for pair in data.handlers().windows(2) {
                if pair[0] != pair[1] {
                    before[pair[1]].insert(pair[0]);
                }
            }
        }

        let mut order = Vec::with_capacity(count);
        let mut waiting: Vec<usize> = before.iter().map(FxHashSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..count).filter(|&h| waiting[h] == 0).collect();
        while let Some(handler) = ready.pop_first() {
            order.push(handler);
            for (outer, inner) in before.iter().enumerate() {
                if inner.contains(&handler) {
                    waiting[outer] -= 1;
                    if waiting[outer] == 0 {
                        ready.insert(outer);
                    }
                }
            }
        }
        if order.len() != count {
            return Err(Error::Unsupported(format!(
                "exception handlers of {} do not nest",
                self.function.method()
            )));
        }
        Ok(order)
    }

    /// Rebuilds the exception table: one entry per run of consecutive placed blocks
    /// covered by the same handler.
    fn emit_handlers(&mut self, blocks: &[BlockId]) -> Result<()> {
        let end = self.bytecode.len();
        let mut boundaries = self.starts.clone();
        boundaries.push(end);

        for handler_index in self.handler_order(blocks)? {
            let Some(handler) = self.function.handlers().get(handler_index).copied() else {
                continue;
            };
            let target = self.label(handler.target)?;

            let mut run_start: Option<usize> = None;
            for i in 0..=blocks.len() {
                let covered = blocks.get(i).is_some_and(|&b| {
                    self.function
                        .block(b)
                        .is_some_and(|data| data.handlers().contains(&handler_index))
                });
                match (covered, run_start) {
                    (true, None) => run_start = Some(i),
                    (false, Some(first)) => {
                        run_start = None;
                        if boundaries[first] == boundaries[i] {
                            continue;
                        }
                        let from = self.label(blocks[first])?;
                        let to = match blocks.get(i) {
                            Some(&b) => self.label(b)?,
                            None => self.bytecode.mark(Anchor::End),
                        };
                        self.bytecode.add_handler(ExceptionHandler {
                            from,
                            to,
                            target,
                            exc_type: handler.exc_type,
                            var_name: handler.var_name,
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
