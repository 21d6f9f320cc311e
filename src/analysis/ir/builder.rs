//! Lifting bytecode into the IR by abstract interpretation.
//!
//! The builder walks the CFG block by block with an explicit worklist. Each work item
//! carries the [`FrameState`] on the edge it arrived by, so the successors of a branch
//! each start from their own copy of the state. Every instruction is interpreted
//! exactly once: reaching a block that was already built only contributes phi inputs.
//!
//! # Joins
//!
//! A block with more than one incoming normal edge gets one phi per stack, scope and
//! register slot when it is entered first; later arrivals append their values. Two
//! arrivals with different stack or scope depths mean the input was never accepted
//! by a verifier and yield [`crate::Error::Malformed`]. Phis that turn out to merge
//! a single value are removed once the walk is done.
//!
//! # Registers
//!
//! Register contents are forwarded: `setlocal` records the stored value in the
//! register slot, and a later `getlocal` pushes that value directly. Values the
//! builder knows nothing about are register reads ([`IrValue::Local`]), which read the
//! register where they are used. Before a register is overwritten, every slot still
//! holding a read of it is pinned with a [`NodeKind::Copy`].
//!
//! # Exception handlers
//!
//! A handler block starts with an empty scope stack, the caught exception as the only
//! operand and unknown register contents.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    analysis::{
        cfg::{CfgEdgeKind, ControlFlowGraph},
        ir::{
            BinaryOp, BlockId, BranchKind, Condition, Constant, EdgeKind, FrameState,
            IrFunction, IrHandler, IrValue, NodeKind, PhiInput, ScopeOp, Terminator, TypeOp,
            UnaryOp, ValueId,
        },
        stack::{compute_local_count, stack_effect, StackBounds},
    },
    assembly::{Bytecode, FlowType, Instruction, Opcode, Operands},
    metadata::{argument_registers, ConstantPool, MethodBody},
    utils::graph::NodeId,
    Error, Result,
};

struct Pending {
    leader: NodeId,
    /// `None` for the entry of an exception handler
    state: Option<FrameState>,
    from: Option<(BlockId, EdgeKind)>,
}

/// The phis a join block was opened with, slot by slot.
struct JoinPhis {
    stack: usize,
    scope: usize,
    slots: Vec<ValueId>,
}

struct IrBuilder<'a> {
    bytecode: &'a Bytecode,
    cfg: &'a ControlFlowGraph,
    pool: &'a ConstantPool,
    bounds: StackBounds,
    function: IrFunction,
    blocks: FxHashMap<NodeId, BlockId>,
    joins: FxHashSet<BlockId>,
    started: FxHashSet<BlockId>,
    phis: FxHashMap<BlockId, JoinPhis>,
    worklist: Vec<Pending>,
}

/// Builds the IR of a method body.
///
/// # Arguments
///
/// * `body` - The method body record; supplies the method id, parameters and flags
/// * `bytecode` - The decoded instructions of `body`
/// * `cfg` - The CFG of `bytecode`
/// * `pool` - Constant pool the instructions index into
/// * `bounds` - Stack bounds from [`crate::analysis::stack::analyze`]
///
/// # Errors
///
/// - [`crate::Error::Malformed`] for stack depth mismatches at joins, stack underflow,
///   `null`/`undefined` pushed as scope and invalid pool references
/// - [`crate::Error::Unsupported`] for an exception handler that is also entered by
///   normal control flow
///
/// # Examples
///
/// ```rust
/// use abcscope::{
///     analysis::{build_ir, stack, ControlFlowGraph},
///     assembly::InstructionAssembler,
///     metadata::{ConstantPool, MethodBody, MethodId},
/// };
///
/// let mut asm = InstructionAssembler::new();
/// asm.getlocal(1).pushbyte(1).add().returnvalue();
/// let code = asm.finish()?;
/// let cfg = ControlFlowGraph::build(&code)?;
/// let pool = ConstantPool::new();
/// let bounds = stack::analyze(&code, &cfg, &pool, 1024)?;
///
/// let body = MethodBody::new(MethodId(0), 1, Vec::new());
/// let function = build_ir(&body, &code, &cfg, &pool, bounds)?;
/// assert_eq!(function.node_count(), 1);
/// # Ok::<(), abcscope::Error>(())
/// ```
pub fn build_ir(
    body: &MethodBody,
    bytecode: &Bytecode,
    cfg: &ControlFlowGraph,
    pool: &ConstantPool,
    bounds: StackBounds,
) -> Result<IrFunction> {
    let local_count = body
        .local_count
        .max(compute_local_count(bytecode, body.param_count, body.flags));
    let function = IrFunction::new(body.method, body.param_count, body.flags, local_count);

    let mut builder = IrBuilder {
        bytecode,
        cfg,
        pool,
        bounds,
        function,
        blocks: FxHashMap::default(),
        joins: FxHashSet::default(),
        started: FxHashSet::default(),
        phis: FxHashMap::default(),
        worklist: Vec::new(),
    };

    builder.partition()?;
    builder.seed(body)?;
    builder.run()?;
    builder.finish()
}

fn is_call(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Call
            | Opcode::Construct
            | Opcode::CallMethod
            | Opcode::CallStatic
            | Opcode::CallSuper
            | Opcode::CallProperty
            | Opcode::ConstructSuper
            | Opcode::ConstructProp
            | Opcode::CallPropLex
            | Opcode::CallSuperVoid
            | Opcode::CallPropVoid
    )
}

fn index_operand(instruction: &Instruction) -> Result<u32> {
    instruction
        .index()
        .ok_or_else(|| malformed_error!("{} is missing its index operand", instruction))
}

impl IrBuilder<'_> {
    /// Creates one IR block per leader vertex.
    fn partition(&mut self) -> Result<()> {
        let cfg = self.cfg;
        for &node in cfg.instruction_nodes() {
            let normal: Vec<(NodeId, CfgEdgeKind)> = cfg
                .edges_to(node)
                .filter(|(_, kind)| *kind != CfgEdgeKind::Throw)
                .collect();

            if cfg.is_handler_target(node) && !normal.is_empty() {
                return Err(Error::Unsupported(format!(
                    "exception handler at {} is also entered by normal control flow",
                    cfg.instr(node).map_or_else(String::new, |id| id.to_string())
                )));
            }

            let leader = cfg.is_handler_target(node)
                || match normal.as_slice() {
                    [(source, CfgEdgeKind::Default)] => {
                        *source == cfg.entry()
                            || cfg.covering_handlers(*source) != cfg.covering_handlers(node)
                    }
                    _ => true,
                };
            if leader {
                let block = self.function.add_block();
                self.blocks.insert(node, block);
                if normal.len() > 1 {
                    self.joins.insert(block);
                }
            }
        }
        Ok(())
    }

    fn block_of(&self, node: NodeId) -> Result<BlockId> {
        self.blocks
            .get(&node)
            .copied()
            .ok_or_else(|| malformed_error!("vertex {} does not start a block", node))
    }

    /// Registers the handlers and queues the entry and every handler.
    fn seed(&mut self, body: &MethodBody) -> Result<()> {
        let cfg = self.cfg;

        let mut handler_map = vec![None; self.bytecode.handlers().len()];
        for (index, handler) in self.bytecode.handlers().iter().enumerate() {
            let Some(node) = cfg.handler_target(index) else {
                continue;
            };
            let target = self.block_of(node)?;
            handler_map[index] = Some(self.function.add_handler(IrHandler {
                target,
                exc_type: handler.exc_type,
                var_name: handler.var_name,
            }));
            self.worklist.push(Pending {
                leader: node,
                state: None,
                from: None,
            });
        }

        for &node in cfg.instruction_nodes() {
            let Some(&block) = self.blocks.get(&node) else {
                continue;
            };
            let covering: Vec<usize> = cfg
                .covering_handlers(node)
                .iter()
                .filter_map(|&index| handler_map.get(index).copied().flatten())
                .collect();
            if !covering.is_empty() {
                self.function.set_handlers(block, covering)?;
            }
        }

        let first = cfg
            .edges_from(cfg.entry())
            .next()
            .map(|(node, _)| node)
            .ok_or_else(|| malformed_error!("the CFG has no entry edge"))?;
        let first_block = self.block_of(first)?;
        let entry = self.function.entry();
        self.function
            .set_terminator(entry, Terminator::Goto(first_block))?;

        let arguments = argument_registers(body.param_count, body.flags);
        let locals = (0..self.function.local_count())
            .map(|register| {
                if register < arguments {
                    IrValue::local(register, 0)
                } else {
                    IrValue::Const(Constant::Undefined)
                }
            })
            .collect();
        self.worklist.push(Pending {
            leader: first,
            state: Some(self.new_state(locals)),
            from: Some((entry, EdgeKind::Default)),
        });
        Ok(())
    }

    fn new_state(&self, locals: Vec<IrValue>) -> FrameState {
        FrameState::new(
            locals,
            self.bounds.max_stack as usize,
            self.bounds.max_scope as usize,
        )
    }

    fn run(&mut self) -> Result<()> {
        while let Some(pending) = self.worklist.pop() {
            let block = self.block_of(pending.leader)?;
            if self.started.contains(&block) {
                // Handlers sharing a target are queued once per handler
                if pending.state.is_some() {
                    self.merge(block, pending)?;
                }
                continue;
            }
            self.started.insert(block);

            let state = match pending.state {
                Some(state) if self.joins.contains(&block) => {
                    self.open_join(block, state, pending.from)?
                }
                Some(state) => state,
                None => self.handler_state(block)?,
            };
            self.interpret(block, pending.leader, state)?;
        }
        Ok(())
    }

    /// Replaces every slot of `state` with a phi seeded with the incoming value.
    fn open_join(
        &mut self,
        block: BlockId,
        mut state: FrameState,
        from: Option<(BlockId, EdgeKind)>,
    ) -> Result<FrameState> {
        let Some((from, kind)) = from else {
            return Err(malformed_error!("join {} entered without an edge", block));
        };

        let mut slots = Vec::with_capacity(state.stack.len() + state.scope.len() + state.locals.len());
        for slot in state.slots_mut() {
            let phi = self.function.append_node(
                block,
                NodeKind::Phi(vec![PhiInput {
                    value: slot.clone(),
                    from,
                    kind,
                }]),
            )?;
            *slot = IrValue::Node(phi);
            slots.push(phi);
        }

        self.phis.insert(
            block,
            JoinPhis {
                stack: state.stack.len(),
                scope: state.scope.len(),
                slots,
            },
        );
        Ok(state)
    }

    /// Adds the values of a later arrival to the phis of `block`.
    fn merge(&mut self, block: BlockId, pending: Pending) -> Result<()> {
        let (Some(mut state), Some((from, kind))) = (pending.state, pending.from) else {
            return Err(malformed_error!("{} is merged without an incoming edge", block));
        };
        let Some(join) = self.phis.get(&block) else {
            return Err(malformed_error!(
                "block {} is entered twice but has a single predecessor",
                block
            ));
        };

        if state.stack.len() != join.stack || state.scope.len() != join.scope {
            return Err(malformed_error!(
                "stack depth mismatch at {}: operand stack {} vs {}, scope stack {} vs {}",
                block,
                join.stack,
                state.stack.len(),
                join.scope,
                state.scope.len()
            ));
        }

        let slots = join.slots.clone();
        for (phi, value) in slots.into_iter().zip(state.slots_mut()) {
            if let Some(NodeKind::Phi(inputs)) = self.function.kind_mut(phi) {
                inputs.push(PhiInput {
                    value: value.clone(),
                    from,
                    kind,
                });
            }
        }
        Ok(())
    }

    fn handler_state(&mut self, block: BlockId) -> Result<FrameState> {
        let version = self.function.fresh_version();
        let caught = self.function.append_node(block, NodeKind::CaughtException)?;
        let locals = (0..self.function.local_count())
            .map(|register| IrValue::local(register, version))
            .collect();

        let mut state = self.new_state(locals);
        state.push(IrValue::Node(caught));
        Ok(state)
    }

    fn successor(&self, node: NodeId, kind: CfgEdgeKind) -> Result<NodeId> {
        self.cfg
            .edges_from(node)
            .find(|(_, k)| *k == kind)
            .map(|(target, _)| target)
            .ok_or_else(|| malformed_error!("vertex {} has no {} edge", node, kind))
    }

    /// Interprets the straight-line run of `block` starting at `leader`.
    fn interpret(&mut self, block: BlockId, leader: NodeId, mut state: FrameState) -> Result<()> {
        let bytecode = self.bytecode;
        let mut node = leader;
        loop {
            let instruction = self
                .cfg
                .instr(node)
                .and_then(|id| bytecode.get(id))
                .ok_or_else(|| malformed_error!("vertex {} has no instruction", node))?;

            if instruction.opcode.flow() != FlowType::Next {
                return self.terminate(block, node, instruction, state);
            }

            self.step(block, instruction, &mut state)?;
            let next = self.successor(node, CfgEdgeKind::Default)?;
            if let Some(&target) = self.blocks.get(&next) {
                self.close(block, Terminator::Goto(target), &state)?;
                self.worklist.push(Pending {
                    leader: next,
                    state: Some(state),
                    from: Some((block, EdgeKind::Default)),
                });
                return Ok(());
            }
            node = next;
        }
    }

    fn close(&mut self, block: BlockId, terminator: Terminator, state: &FrameState) -> Result<()> {
        self.function.block_mut(block)?.scope_depth = state.scope.len() as u32;
        self.function.set_terminator(block, terminator)
    }

    fn follow(&mut self, block: BlockId, node: NodeId, kind: EdgeKind, state: FrameState) -> Result<BlockId> {
        let target = self.successor(node, kind)?;
        let target_block = self.block_of(target)?;
        self.worklist.push(Pending {
            leader: target,
            state: Some(state),
            from: Some((block, kind)),
        });
        Ok(target_block)
    }

    fn terminate(
        &mut self,
        block: BlockId,
        node: NodeId,
        instruction: &Instruction,
        mut state: FrameState,
    ) -> Result<()> {
        let opcode = instruction.opcode;
        match opcode.flow() {
            FlowType::Jump => {
                let target = self.follow(block, node, EdgeKind::Jump, state.clone())?;
                self.close(block, Terminator::Jump(target), &state)
            }
            FlowType::Conditional => {
                let kind = BranchKind::from_opcode(opcode)
                    .ok_or_else(|| malformed_error!("{} is not a two-way branch", opcode))?;
                let operands = state.pop_n(kind.arity())?;
                let on_false = self.follow(block, node, EdgeKind::False, state.clone())?;
                let on_true = self.follow(block, node, EdgeKind::True, state.clone())?;
                self.close(
                    block,
                    Terminator::If {
                        condition: Condition { kind, operands },
                        on_true,
                        on_false,
                    },
                    &state,
                )
            }
            FlowType::Switch => {
                let Operands::Switch { cases, .. } = &instruction.operands else {
                    return Err(malformed_error!("lookupswitch without a case table"));
                };
                let index = state.pop()?;
                let default = self.follow(block, node, EdgeKind::DefaultCase, state.clone())?;
                let mut targets = Vec::with_capacity(cases.len());
                for case in 0..cases.len() {
                    targets.push(self.follow(
                        block,
                        node,
                        EdgeKind::Case(case as u32),
                        state.clone(),
                    )?);
                }
                self.close(
                    block,
                    Terminator::Switch {
                        index,
                        default,
                        cases: targets,
                    },
                    &state,
                )
            }
            FlowType::Return => {
                let value = match opcode {
                    Opcode::ReturnValue => Some(state.pop()?),
                    _ => None,
                };
                self.close(block, Terminator::Return(value), &state)
            }
            FlowType::Throw => {
                let value = state.pop()?;
                self.close(block, Terminator::Throw(value), &state)
            }
            FlowType::Next => Err(malformed_error!("{} does not end a block", opcode)),
        }
    }

    fn emit(&mut self, block: BlockId, kind: NodeKind) -> Result<ValueId> {
        self.function.append_node(block, kind)
    }

    /// Pins every slot that reads `register` before the register changes.
    fn spill(&mut self, block: BlockId, state: &mut FrameState, register: u32) -> Result<()> {
        let own_slot = state.stack.len() + state.scope.len() + register as usize;
        let mut pinned: Vec<(IrValue, ValueId)> = Vec::new();

        for (index, slot) in state.slots_mut().enumerate() {
            if index == own_slot || !self.function.reads_register(slot, register) {
                continue;
            }
            let copy = match pinned.iter().find(|(value, _)| value == slot) {
                Some((_, copy)) => *copy,
                None => {
                    let copy = self.function.append_node(block, NodeKind::Copy(slot.clone()))?;
                    pinned.push((slot.clone(), copy));
                    copy
                }
            };
            *slot = IrValue::Node(copy);
        }
        Ok(())
    }

    fn store(
        &mut self,
        block: BlockId,
        state: &mut FrameState,
        register: u32,
        value: IrValue,
    ) -> Result<()> {
        state.local(register)?;
        self.spill(block, state, register)?;
        self.emit(
            block,
            NodeKind::StoreLocal {
                register,
                value: value.clone(),
            },
        )?;
        state.set_local(register, value)
    }

    fn constant(&self, instruction: &Instruction) -> Result<Constant> {
        let opcode = instruction.opcode;
        let missing = |index: u32| malformed_error!("{} refers to missing constant {}", opcode, index);

        Ok(match (opcode, &instruction.operands) {
            (Opcode::PushNull, _) => Constant::Null,
            (Opcode::PushUndefined, _) => Constant::Undefined,
            (Opcode::PushTrue, _) => Constant::Bool(true),
            (Opcode::PushFalse, _) => Constant::Bool(false),
            (Opcode::PushNaN, _) => Constant::Double(f64::NAN),
            (Opcode::PushByte, Operands::Byte(value)) => Constant::Int(i32::from(*value as i8)),
            (Opcode::PushShort, Operands::Index(value)) => {
                Constant::Int(i32::from(*value as u16 as i16))
            }
            (Opcode::PushInt, Operands::Index(index)) => {
                Constant::Int(self.pool.int(*index).ok_or_else(|| missing(*index))?)
            }
            (Opcode::PushUInt, Operands::Index(index)) => {
                Constant::UInt(self.pool.uint(*index).ok_or_else(|| missing(*index))?)
            }
            (Opcode::PushDouble, Operands::Index(index)) => {
                Constant::Double(self.pool.double(*index).ok_or_else(|| missing(*index))?)
            }
            (Opcode::PushString, Operands::Index(index)) => Constant::String(
                self.pool
                    .string(*index)
                    .ok_or_else(|| missing(*index))?
                    .to_owned(),
            ),
            (Opcode::PushNamespace, Operands::Index(index)) => {
                self.pool.namespace(*index).ok_or_else(|| missing(*index))?;
                Constant::Namespace(*index)
            }
            _ => return Err(malformed_error!("{} is not a constant push", instruction)),
        })
    }

    /// Interprets one non-terminating instruction.
    fn step(&mut self, block: BlockId, instruction: &Instruction, state: &mut FrameState) -> Result<()> {
        let opcode = instruction.opcode;
        match opcode {
            Opcode::Nop | Opcode::Label => {}
            Opcode::Bkpt
            | Opcode::BkptLine
            | Opcode::Debug
            | Opcode::DebugLine
            | Opcode::DebugFile
            | Opcode::Timestamp => {
                self.emit(block, NodeKind::Debug(instruction.clone()))?;
            }
            Opcode::PushNull
            | Opcode::PushUndefined
            | Opcode::PushTrue
            | Opcode::PushFalse
            | Opcode::PushNaN
            | Opcode::PushByte
            | Opcode::PushShort
            | Opcode::PushInt
            | Opcode::PushUInt
            | Opcode::PushDouble
            | Opcode::PushString
            | Opcode::PushNamespace => {
                let constant = self.constant(instruction)?;
                state.push(IrValue::Const(constant));
            }
            Opcode::Pop => {
                state.pop()?;
            }
            Opcode::Dup => {
                let top = state.peek()?.clone();
                state.push(top);
            }
            Opcode::Swap => {
                let top = state.pop()?;
                let below = state.pop()?;
                state.push(top);
                state.push(below);
            }
            Opcode::GetLocal
            | Opcode::GetLocal0
            | Opcode::GetLocal1
            | Opcode::GetLocal2
            | Opcode::GetLocal3 => {
                let register = instruction
                    .local_read()
                    .ok_or_else(|| malformed_error!("{} names no register", instruction))?;
                let value = state.local(register)?.clone();
                state.push(value);
            }
            Opcode::SetLocal
            | Opcode::SetLocal0
            | Opcode::SetLocal1
            | Opcode::SetLocal2
            | Opcode::SetLocal3 => {
                let register = instruction
                    .local_write()
                    .ok_or_else(|| malformed_error!("{} names no register", instruction))?;
                let value = state.pop()?;
                self.store(block, state, register, value)?;
            }
            Opcode::Kill => {
                let register = index_operand(instruction)?;
                self.store(block, state, register, IrValue::Const(Constant::Undefined))?;
            }
            Opcode::IncLocal | Opcode::DecLocal | Opcode::IncLocalI | Opcode::DecLocalI => {
                let register = index_operand(instruction)?;
                let op = match opcode {
                    Opcode::IncLocal => UnaryOp::Increment,
                    Opcode::DecLocal => UnaryOp::Decrement,
                    Opcode::IncLocalI => UnaryOp::IncrementI,
                    _ => UnaryOp::DecrementI,
                };
                let operand = state.local(register)?.clone();
                let result = self.emit(block, NodeKind::Unary { op, operand })?;
                self.store(block, state, register, IrValue::Node(result))?;
            }
            Opcode::HasNext2 => {
                let Operands::Pair(object, index) = instruction.operands else {
                    return Err(malformed_error!("{} needs two registers", instruction));
                };
                state.local(object)?;
                state.local(index)?;
                self.spill(block, state, object)?;
                self.spill(block, state, index)?;
                let result = self.emit(block, NodeKind::HasNext2 { object, index })?;
                let version = self.function.fresh_version();
                state.set_local(object, IrValue::local(object, version))?;
                state.set_local(index, IrValue::local(index, version))?;
                state.push(IrValue::Node(result));
            }
            Opcode::GetScopeObject => {
                let Operands::Byte(index) = instruction.operands else {
                    return Err(malformed_error!("{} needs a scope index", instruction));
                };
                let value = state.scope.get(usize::from(index)).cloned().ok_or_else(|| {
                    malformed_error!(
                        "getscopeobject {} with a scope stack of depth {}",
                        index,
                        state.scope.len()
                    )
                })?;
                state.push(value);
            }
            Opcode::PushScope | Opcode::PushWith => {
                let value = state.pop()?;
                if value.as_const().is_some_and(Constant::is_nullish) {
                    return Err(malformed_error!("{} of {}", opcode, value));
                }
                let op = if opcode == Opcode::PushScope {
                    ScopeOp::Push
                } else {
                    ScopeOp::PushWith
                };
                self.emit(
                    block,
                    NodeKind::Scope {
                        op,
                        operand: Some(value.clone()),
                    },
                )?;
                state.scope.push(value);
            }
            Opcode::PopScope => {
                if state.scope.pop().is_none() {
                    return Err(malformed_error!("popscope on an empty scope stack"));
                }
                self.emit(
                    block,
                    NodeKind::Scope {
                        op: ScopeOp::Pop,
                        operand: None,
                    },
                )?;
            }
            Opcode::Coerce | Opcode::AsType | Opcode::IsType => {
                let op = match opcode {
                    Opcode::Coerce => TypeOp::Coerce,
                    Opcode::AsType => TypeOp::AsType,
                    _ => TypeOp::IsType,
                };
                let name = index_operand(instruction)?;
                let operand = state.pop()?;
                let result = self.emit(block, NodeKind::Type { op, name, operand })?;
                state.push(IrValue::Node(result));
            }
            _ => {
                if let Some(op) = UnaryOp::from_opcode(opcode) {
                    let operand = state.pop()?;
                    let result = self.emit(block, NodeKind::Unary { op, operand })?;
                    state.push(IrValue::Node(result));
                } else if let Some(op) = BinaryOp::from_opcode(opcode) {
                    let rhs = state.pop()?;
                    let lhs = state.pop()?;
                    let result = self.emit(block, NodeKind::Binary { op, lhs, rhs })?;
                    state.push(IrValue::Node(result));
                } else {
                    self.generic(block, instruction, state)?;
                }
            }
        }
        Ok(())
    }

    /// Property accesses, calls and the instructions kept as opaque operations.
    fn generic(&mut self, block: BlockId, instruction: &Instruction, state: &mut FrameState) -> Result<()> {
        let opcode = instruction.opcode;
        if opcode.flow() != FlowType::Next {
            return Err(malformed_error!("{} cannot be lifted as a plain operation", opcode));
        }

        let effect = stack_effect(instruction, self.pool)?;
        let operands = state.pop_n(effect.pops as usize)?;

        let kind = if is_call(opcode) {
            let (index, arg_count) = match instruction.operands {
                Operands::Pair(index, arg_count) => (index, arg_count),
                Operands::Index(arg_count) => (0, arg_count),
                _ => return Err(malformed_error!("{} has no argument count", instruction)),
            };
            NodeKind::Call {
                opcode,
                index,
                arg_count,
                operands,
            }
        } else if opcode.takes_multiname() || matches!(opcode, Opcode::GetLex | Opcode::FindDef)
        {
            NodeKind::Property {
                opcode,
                name: index_operand(instruction)?,
                operands,
            }
        } else {
            NodeKind::Operation {
                instruction: instruction.clone(),
                operands,
            }
        };

        let produces = kind.produces_value();
        let result = self.emit(block, kind)?;
        if produces {
            state.push(IrValue::Node(result));
        }
        Ok(())
    }

    fn finish(mut self) -> Result<IrFunction> {
        let unreached: Vec<BlockId> = self
            .blocks
            .values()
            .copied()
            .filter(|block| !self.started.contains(block))
            .collect();
        for block in unreached {
            self.function.remove_block(block)?;
        }

        let mut function = self.function;
        function.remove_trivial_phis();
        function.remove_redundant_copies();
        function.remove_dead_nodes();
        function.verify()?;

        log::debug!(
            "{}: lifted {} blocks, {} nodes",
            function.method(),
            function.block_count(),
            function.node_count()
        );
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        metadata::{MethodBody, MethodId},
    };

    fn lift(asm: InstructionAssembler, params: u32) -> Result<IrFunction> {
        let code = asm.finish()?;
        let cfg = ControlFlowGraph::build(&code)?;
        let body = MethodBody::new(MethodId(0), params, Vec::new());
        let bounds = StackBounds {
            max_stack: 8,
            max_scope: 2,
        };
        build_ir(&body, &code, &cfg, &ConstantPool::new(), bounds)
    }

    fn returned(function: &IrFunction) -> Vec<IrValue> {
        function
            .block_ids()
            .into_iter()
            .filter_map(|block| match function.block(block)?.terminator() {
                Terminator::Return(Some(value)) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_if_else_merges_into_phi() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .iffalse("else")
            .pushbyte(1)
            .jump("join")
            .label("else")
            .pushbyte(2)
            .label("join")
            .returnvalue();
        let function = lift(asm, 1).unwrap();

        let values = returned(&function);
        assert_eq!(values.len(), 1);
        let phi = values[0].as_node().unwrap();
        let Some(NodeKind::Phi(inputs)) = function.kind(phi) else {
            panic!("expected a phi, got {:?}", function.kind(phi));
        };
        assert_eq!(inputs.len(), 2);
        assert_ne!(inputs[0].from, inputs[1].from);

        let mut constants: Vec<_> = inputs.iter().map(|i| i.value.clone()).collect();
        constants.sort_by_key(|v| v.to_string());
        assert_eq!(
            constants,
            vec![
                IrValue::Const(Constant::Int(1)),
                IrValue::Const(Constant::Int(2))
            ]
        );

        // Only the stack slot needed a phi
        let phis: usize = function
            .block_ids()
            .into_iter()
            .map(|b| function.block(b).unwrap().phis().len())
            .sum();
        assert_eq!(phis, 1);
    }

    #[test]
    fn test_depth_mismatch_is_malformed() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .iffalse("else")
            .pushbyte(1)
            .pushbyte(2)
            .jump("join")
            .label("else")
            .pushbyte(3)
            .label("join")
            .returnvalue();

        assert!(matches!(lift(asm, 1), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_register_values_are_forwarded() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(5)
            .setlocal(1)
            .getlocal(1)
            .pushbyte(1)
            .add()
            .setlocal(2)
            .getlocal(2)
            .returnvalue();
        let function = lift(asm, 0).unwrap();

        let values = returned(&function);
        let add = values[0].as_node().unwrap();
        assert_eq!(
            function.kind(add),
            Some(&NodeKind::Binary {
                op: BinaryOp::Add,
                lhs: IrValue::Const(Constant::Int(5)),
                rhs: IrValue::Const(Constant::Int(1)),
            })
        );
        assert_eq!(function.written_registers().len(), 2);
    }

    #[test]
    fn test_overwritten_register_is_pinned() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1).pushbyte(7).setlocal(1).returnvalue();
        let function = lift(asm, 1).unwrap();

        let values = returned(&function);
        let copy = values[0].as_node().unwrap();
        assert_eq!(
            function.kind(copy),
            Some(&NodeKind::Copy(IrValue::local(1, 0)))
        );
    }

    #[test]
    fn test_loop_counter_phi() {
        let mut asm = InstructionAssembler::new();
        asm.pushbyte(0)
            .setlocal(1)
            .jump("test")
            .label("body")
            .inclocal(1)
            .label("test")
            .getlocal(1)
            .pushbyte(10)
            .iflt("body")
            .returnvoid();
        let function = lift(asm, 0).unwrap();
        function.verify().unwrap();

        let phis: Vec<ValueId> = function
            .block_ids()
            .into_iter()
            .flat_map(|b| function.block(b).unwrap().phis().to_vec())
            .collect();
        assert_eq!(phis.len(), 1);

        let Some(NodeKind::Phi(inputs)) = function.kind(phis[0]) else {
            panic!("phi expected");
        };
        assert!(inputs
            .iter()
            .any(|i| i.value == IrValue::Const(Constant::Int(0)) && i.kind == EdgeKind::Jump));
        assert!(inputs.iter().any(|i| {
            i.value.as_node().and_then(|n| function.kind(n))
                == Some(&NodeKind::Unary {
                    op: UnaryOp::Increment,
                    operand: IrValue::Node(phis[0]),
                })
        }));
    }

    #[test]
    fn test_null_scope_is_malformed() {
        let mut asm = InstructionAssembler::new();
        asm.pushnull().pushscope().returnvoid();
        assert!(matches!(lift(asm, 0), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_handler_starts_with_caught_exception() {
        let mut asm = InstructionAssembler::new();
        asm.label("start")
            .getlocal(0)
            .callpropvoid(0, 0)
            .label("end")
            .returnvoid()
            .label("catch")
            .pop()
            .returnvoid()
            .handler("start", "end", "catch", 0, 0);
        let function = lift(asm, 0).unwrap();

        assert_eq!(function.handlers().len(), 1);
        let handler = function.handlers()[0].target;
        let first = function.block(handler).unwrap().body()[0];
        assert_eq!(function.kind(first), Some(&NodeKind::CaughtException));
        assert!(function
            .predecessors(handler)
            .iter()
            .all(|(_, kind)| *kind == EdgeKind::Throw));
        assert!(!function.predecessors(handler).is_empty());
    }

    #[test]
    fn test_handler_entered_by_fallthrough_is_unsupported() {
        let mut asm = InstructionAssembler::new();
        asm.label("start")
            .getlocal(0)
            .callpropvoid(0, 0)
            .label("catch")
            .returnvoid()
            .handler("start", "catch", "catch", 0, 0);
        assert!(matches!(lift(asm, 0), Err(Error::Unsupported(_))));
    }
}
