//! Inline expansion of small, statically bound callees.
//!
//! A receiver call whose target the method environment binds statically is replaced
//! by a copy of the callee's IR. The callee's registers move to fresh registers above
//! the caller's, its blocks are spliced between the two halves of the calling block,
//! and every return becomes a jump to the second half, where a phi merges the
//! returned values.
//!
//! # Candidates
//!
//! A call is expanded when the callee
//!
//! - differs from the caller and has at most `inline_threshold` IR nodes,
//! - receives exactly its declared parameters,
//! - needs neither `arguments`, a rest array, an activation nor a default namespace,
//! - returns on at least one path,
//! - and does not call back into itself or the caller.
//!
//! A callee with exception handlers is only expanded at scope depth zero: entering a
//! handler resets the scope stack, which would drop the caller's scopes.
//!
//! A recursive callee is not an error here, although recursion found while looking
//! for candidates could be read as malformed input. The call is left in place, an
//! [`EventKind::Info`] event records why, and the method still optimizes and
//! re-encodes.

use rustc_hash::FxHashMap;

use crate::{
    analysis::ir::{
        BlockId, Constant, EdgeKind, IrFunction, IrHandler, IrValue, NodeKind, PhiInput,
        ScopeOp, Terminator, ValueId,
    },
    compiler::{
        pass::IrPass, passes::callsite::ReceiverCall, CompilerContext, EventKind, EventLog,
    },
    metadata::{argument_registers, MethodFlags, MethodId},
    Result,
};

/// Flags whose callees cannot be expanded.
const UNINLINABLE: MethodFlags = MethodFlags::NEED_ARGUMENTS
    .union(MethodFlags::NEED_REST)
    .union(MethodFlags::NEED_ACTIVATION)
    .union(MethodFlags::SET_DXNS);

/// Scope depth in effect in front of body position `index` of `block`.
fn depth_at(function: &IrFunction, block: BlockId, index: usize) -> u32 {
    let Some(data) = function.block(block) else {
        return 0;
    };
    let mut depth = i64::from(data.scope_depth);
    for &id in &data.body()[index.min(data.body().len())..] {
        match function.kind(id) {
            Some(NodeKind::Scope {
                op: ScopeOp::Pop, ..
            }) => depth += 1,
            Some(NodeKind::Scope { .. }) => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as u32
}

/// Copies the handlers of `callee` into `function`, retargeted through `blocks`.
/// Returns the index of the first copy.
fn copy_handlers(
    function: &mut IrFunction,
    callee: &IrFunction,
    blocks: &FxHashMap<BlockId, BlockId>,
) -> usize {
    let first = function.handlers().len();
    for handler in callee.handlers() {
        function.add_handler(IrHandler {
            target: blocks.get(&handler.target).copied().unwrap_or(handler.target),
            ..*handler
        });
    }
    first
}

/// Inline expansion pass.
pub struct InliningPass;

impl Default for InliningPass {
    fn default() -> Self {
        Self::new()
    }
}

impl InliningPass {
    /// Creates a new inlining pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns `true` if some call in `callee` resolves to `callee` or `caller`.
    fn is_recursive(callee: &IrFunction, caller: MethodId, ctx: &CompilerContext) -> bool {
        callee.node_ids().into_iter().any(|id| {
            ReceiverCall::decode(callee, ctx, id)
                .and_then(|call| call.static_target(callee.method(), ctx))
                .is_some_and(|target| target == caller || target == callee.method())
        })
    }

    /// The callee of `call` if it can be expanded at its position.
    fn candidate(
        function: &IrFunction,
        ctx: &CompilerContext,
        call: &ReceiverCall,
    ) -> Option<std::sync::Arc<IrFunction>> {
        let caller = function.method();
        let target = call.static_target(caller, ctx)?;
        if target == caller {
            return None;
        }

        let callee = ctx.callee(target)?;
        if callee.node_count() > ctx.config().inline_threshold
            || callee.flags().intersects(UNINLINABLE)
            || call.args.len() != callee.param_count() as usize
        {
            return None;
        }
        let returns = callee.block_ids().into_iter().any(|b| {
            callee
                .block(b)
                .is_some_and(|block| matches!(block.terminator(), Terminator::Return(_)))
        });
        if !returns {
            return None;
        }
        if !callee.handlers().is_empty() && depth_at(function, call.block, call.position) > 0 {
            log::debug!(
                "{caller}: {target} has handlers and is called inside a scope, not inlined"
            );
            return None;
        }
        if Self::is_recursive(&callee, caller, ctx) {
            log::debug!("{caller}: {target} is recursive, not inlined");
            ctx.events
                .record(EventKind::Info)
                .method(caller)
                .message(format!("{target} is recursive, not inlined"));
            return None;
        }
        Some(callee)
    }

    /// Replaces `call` by a copy of `callee`. Returns the block the copy continues in.
    fn expand(function: &mut IrFunction, call: ReceiverCall, callee: &IrFunction) -> Result<BlockId> {
        let head = call.block;
        let tail = function.split_block(head, call.position)?;
        let call_depth = function.block(head).map_or(0, |b| b.scope_depth);
        let outer_handlers = function
            .block(head)
            .map(|b| b.handlers().to_vec())
            .unwrap_or_default();

        // Callee registers live above the caller's
        let base = function.reserve_registers(callee.local_count());
        function.append_node(
            head,
            NodeKind::StoreLocal {
                register: base,
                value: call.receiver,
            },
        )?;
        for (i, value) in call.args.into_iter().enumerate() {
            function.append_node(
                head,
                NodeKind::StoreLocal {
                    register: base + i as u32 + 1,
                    value,
                },
            )?;
        }

        // A handler or an iteration can observe registers from an earlier expansion
        let reads_stale = !callee.handlers().is_empty()
            || callee
                .node_ids()
                .into_iter()
                .any(|id| matches!(callee.kind(id), Some(NodeKind::HasNext2 { .. })));
        if reads_stale {
            let arguments = argument_registers(callee.param_count(), callee.flags());
            let mut written: Vec<u32> = callee
                .written_registers()
                .into_iter()
                .filter(|&r| r >= arguments)
                .collect();
            written.sort_unstable();
            for register in written {
                function.append_node(
                    head,
                    NodeKind::StoreLocal {
                        register: base + register,
                        value: IrValue::Const(Constant::Undefined),
                    },
                )?;
            }
        }

        let mut blocks: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        blocks.insert(callee.entry(), head);
        for block in callee.block_ids() {
            if block != callee.entry() && block != callee.exit() {
                blocks.insert(block, function.add_block());
            }
        }

        // Nodes first, with callee ids in their operands; remapped below
        let mut values: FxHashMap<ValueId, ValueId> = FxHashMap::default();
        for block in callee.block_ids() {
            let (Some(&target), Some(data)) = (blocks.get(&block), callee.block(block)) else {
                continue;
            };
            for &id in data.phis().iter().chain(data.body()) {
                let Some(kind) = callee.kind(id) else {
                    continue;
                };
                if matches!(kind, NodeKind::Debug(_)) {
                    continue;
                }
                values.insert(id, function.append_node(target, kind.clone())?);
            }
        }
        let remap_value = |value: &mut IrValue| {
            if let IrValue::Node(id) = value {
                if let Some(&mapped) = values.get(id) {
                    *id = mapped;
                }
            }
        };
        for &id in values.values() {
            let Some(kind) = function.kind_mut(id) else {
                continue;
            };
            kind.remap_registers(|r| r + base);
            for operand in kind.operands_mut() {
                remap_value(operand);
            }
            if let NodeKind::Phi(inputs) = kind {
                for input in inputs.iter_mut() {
                    input.from = blocks.get(&input.from).copied().unwrap_or(head);
                }
            }
        }
        let remap_terminator = |terminator: &Terminator| {
            let mut terminator = terminator.clone();
            for operand in terminator.operands_mut() {
                if let IrValue::Local(local) = operand {
                    local.register += base;
                }
                remap_value(operand);
            }
            terminator.map_targets(|b| blocks.get(&b).copied().unwrap_or(b));
            terminator
        };

        let first = copy_handlers(function, callee, &blocks);
        for block in callee.block_ids() {
            let (Some(&target), Some(data)) = (blocks.get(&block), callee.block(block)) else {
                continue;
            };
            if target == head {
                continue;
            }
            let handlers: Vec<usize> = data
                .handlers()
                .iter()
                .map(|h| first + h)
                .chain(outer_handlers.iter().copied())
                .collect();
            function.block_mut(target)?.scope_depth = data.scope_depth + call_depth;
            function.set_handlers(target, handlers)?;
        }

        let mut returns: Vec<(BlockId, IrValue)> = Vec::new();
        for block in callee.block_ids() {
            let (Some(&target), Some(data)) = (blocks.get(&block), callee.block(block)) else {
                continue;
            };
            match remap_terminator(data.terminator()) {
                Terminator::Return(value) => {
                    for _ in 0..data.scope_depth {
                        function.append_node(
                            target,
                            NodeKind::Scope {
                                op: ScopeOp::Pop,
                                operand: None,
                            },
                        )?;
                    }
                    function.block_mut(target)?.scope_depth = call_depth;
                    returns.push((target, value.unwrap_or(IrValue::Const(Constant::Undefined))));
                }
                terminator => function.set_terminator(target, terminator)?,
            }
        }

        let used = function.use_counts().contains_key(&call.id);
        if used {
            let inputs = returns
                .iter()
                .map(|(from, value)| PhiInput {
                    value: value.clone(),
                    from: *from,
                    kind: EdgeKind::Jump,
                })
                .collect();
            let phi = function.append_node(tail, NodeKind::Phi(inputs))?;
            function.replace_uses(call.id, &IrValue::Node(phi));
        }
        for (from, _) in returns {
            function.set_terminator(from, Terminator::Jump(tail))?;
        }
        function.remove_node(call.id);
        function.remove_trivial_phis();
        Ok(tail)
    }
}

impl IrPass for InliningPass {
    fn name(&self) -> &'static str {
        "inlining"
    }

    fn description(&self) -> &'static str {
        "Expands small statically bound callees in place"
    }

    fn run_on_method(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool> {
        let method = ctx.method();
        let changes = EventLog::new();

        let calls: Vec<ValueId> = function
            .node_ids()
            .into_iter()
            .filter(|&id| matches!(function.kind(id), Some(NodeKind::Call { .. })))
            .collect();
        for id in calls {
            let Some(call) = ReceiverCall::decode(function, ctx, id) else {
                continue;
            };
            let Some(callee) = Self::candidate(function, ctx, &call) else {
                continue;
            };
            let tail = Self::expand(function, call, &callee)?;
            changes
                .record(EventKind::MethodInlined)
                .at(method, id.index())
                .message(format!(
                    "inlined {} ({} nodes) at {id}, continuing in {tail}",
                    callee.method(),
                    callee.node_count()
                ));
        }

        let changed = !changes.is_empty();
        if changed {
            ctx.events.merge(&changes);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        compiler::passes::{ConstantFoldingPass, CopyPropagationPass},
        metadata::{Binding, MethodTable},
        test::{body, count_nodes, lift_asm, pool, run_pass_with},
    };

    fn is_call(kind: &NodeKind) -> bool {
        matches!(kind, NodeKind::Call { .. })
    }

    /// Method 1: `add(a, b) { return a + b; }`
    fn add_body() -> crate::metadata::MethodBody {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1).getlocal(2).add().returnvalue();
        body(1, 2, asm)
    }

    /// Method 0: `return this.add(2, 3);`
    fn caller() -> IrFunction {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(0)
            .pushbyte(2)
            .pushbyte(3)
            .callproperty(1, 2)
            .returnvalue();
        lift_asm(0, asm)
    }

    #[test]
    fn test_inlines_and_folds() {
        let env = MethodTable::new()
            .with_property(MethodId(0), 1, MethodId(1), Binding::Final)
            .with_body(add_body());
        let pool = pool();
        let mut function = caller();

        assert!(run_pass_with(&InliningPass::new(), &mut function, &pool, &env));
        assert_eq!(count_nodes(&function, is_call), 0);
        assert!(function.local_count() >= 4);

        assert!(run_pass_with(
            &CopyPropagationPass::new(),
            &mut function,
            &pool,
            &env
        ));
        run_pass_with(&ConstantFoldingPass::new(), &mut function, &pool, &env);
        let returns: Vec<_> = function
            .block_ids()
            .into_iter()
            .filter_map(|b| match function.block(b)?.terminator() {
                Terminator::Return(value) => Some(value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(returns, vec![Some(IrValue::Const(Constant::Int(5)))]);
    }

    #[test]
    fn test_virtual_call_is_kept() {
        let env = MethodTable::new()
            .with_property(MethodId(0), 1, MethodId(1), Binding::Virtual)
            .with_body(add_body());
        let mut function = caller();
        assert!(!run_pass_with(&InliningPass::new(), &mut function, &pool(), &env));
        assert_eq!(count_nodes(&function, is_call), 1);
    }

    #[test]
    fn test_threshold_is_respected() {
        let env = MethodTable::new()
            .with_property(MethodId(0), 1, MethodId(1), Binding::Final)
            .with_body(add_body());
        let pool = pool();
        let config = crate::config::PipelineConfig::default().with_inline_threshold(0);
        let mut function = caller();
        let ctx = CompilerContext::new(MethodId(0), &pool, &env, &config);
        assert!(!InliningPass::new().run_on_method(&mut function, &ctx).unwrap());
    }

    #[test]
    fn test_recursive_callee_is_kept() {
        // Method 1 calls itself through the same name
        let mut asm = InstructionAssembler::new();
        asm.getlocal(0)
            .getlocal(1)
            .getlocal(2)
            .callproperty(1, 2)
            .returnvalue();
        let env = MethodTable::new()
            .with_property(MethodId(0), 1, MethodId(1), Binding::Final)
            .with_property(MethodId(1), 1, MethodId(1), Binding::Final)
            .with_body(body(1, 2, asm));
        let pool = pool();
        let config = crate::config::PipelineConfig::default();
        let mut function = caller();
        let ctx = CompilerContext::new(MethodId(0), &pool, &env, &config);
        assert!(!InliningPass::new().run_on_method(&mut function, &ctx).unwrap());
        assert!(ctx
            .events
            .iter()
            .any(|e| e.kind == EventKind::Info && e.message.contains("recursive")));
    }

    #[test]
    fn test_branching_callee_merges_results() {
        // Method 1: `max(a, b) { if (a < b) return b; return a; }`
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .getlocal(2)
            .iflt("second")
            .getlocal(1)
            .returnvalue()
            .label("second")
            .getlocal(2)
            .returnvalue();
        let env = MethodTable::new()
            .with_property(MethodId(0), 1, MethodId(1), Binding::Final)
            .with_body(body(1, 2, asm));

        let mut asm = InstructionAssembler::new();
        asm.getlocal(0)
            .getlocal(1)
            .pushbyte(7)
            .callproperty(1, 2)
            .pushbyte(1)
            .add()
            .returnvalue();
        let mut function = lift_asm(1, asm);

        assert!(run_pass_with(&InliningPass::new(), &mut function, &pool(), &env));
        assert_eq!(count_nodes(&function, is_call), 0);
        assert_eq!(count_nodes(&function, NodeKind::is_phi), 1);
        let add = function
            .node_ids()
            .into_iter()
            .find(|&id| matches!(function.kind(id), Some(NodeKind::Binary { .. })))
            .unwrap();
        let Some(NodeKind::Binary { lhs, .. }) = function.kind(add) else {
            unreachable!()
        };
        let phi = lhs.as_node().unwrap();
        assert!(function.kind(phi).is_some_and(NodeKind::is_phi));
    }
}
