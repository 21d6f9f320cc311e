//! Tail-recursion elimination pass.
//!
//! A method that returns the result of a call to itself, through its own `this`,
//! does not need a new activation for that call: the arguments are written to the
//! parameter registers and control jumps back to the start of the body. Deep
//! recursion then runs in constant stack space.
//!
//! # Conditions
//!
//! - the block returns the call's result and the call is its last node
//! - the block is not covered by an exception handler
//! - the receiver is register 0 and the method never writes that register
//! - the environment binds the call statically to this very method
//! - the call passes exactly the declared parameters, and the method uses neither
//!   `arguments` nor a rest parameter
//!
//! # Rewrite
//!
//! ```text
//! b3:                                b3:
//!     v7 = callproperty #2/1 (r0.0, v6)   store r1, v6
//!     return v7                 =>       jump b1
//! ```
//!
//! Arguments that read a parameter register are pinned first, registers the body
//! writes beyond the parameters are reset to `undefined`, and the scope stack is
//! unwound to its depth on entry.

use crate::{
    analysis::ir::{
        BlockId, Constant, EdgeKind, IrFunction, IrValue, NodeKind, ScopeOp, Terminator,
    },
    compiler::{
        pass::IrPass, passes::callsite::ReceiverCall, CompilerContext, EventKind, EventLog,
    },
    metadata::{argument_registers, MethodFlags},
    Result,
};

/// Tail-recursion elimination pass.
pub struct TailRecursionPass;

impl Default for TailRecursionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl TailRecursionPass {
    /// Creates a new tail-recursion elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The self tail call ending `block`, if there is one.
    fn tail_call(function: &IrFunction, ctx: &CompilerContext, block: BlockId) -> Option<ReceiverCall> {
        let data = function.block(block)?;
        if !data.is_unprotected() {
            return None;
        }
        let Terminator::Return(Some(IrValue::Node(result))) = data.terminator() else {
            return None;
        };
        if data.body().last() != Some(result) {
            return None;
        }
        if function.use_counts().get(result) != Some(&1) {
            return None;
        }

        let call = ReceiverCall::decode(function, ctx, *result)?;
        if !call.on_receiver || call.args.len() != function.param_count() as usize {
            return None;
        }
        if call.static_target(function.method(), ctx)? != function.method() {
            return None;
        }
        Some(call)
    }

    /// Turns `call` into parameter stores and a jump to the start of the body.
    fn eliminate(function: &mut IrFunction, call: ReceiverCall) -> Result<BlockId> {
        let block = call.block;
        let arguments = argument_registers(function.param_count(), function.flags());
        let mut resets: Vec<u32> = function
            .written_registers()
            .into_iter()
            .filter(|&r| r >= arguments)
            .collect();
        resets.sort_unstable();

        let targets: Vec<u32> = (1..=function.param_count()).chain(resets.iter().copied()).collect();
        let mut position = call.position;
        let mut args = Vec::with_capacity(call.args.len());
        for arg in call.args {
            if targets.iter().any(|&r| function.reads_register(&arg, r)) {
                let copy = function.insert_node(block, position, NodeKind::Copy(arg))?;
                position += 1;
                args.push(IrValue::Node(copy));
            } else {
                args.push(arg);
            }
        }

        function.remove_node(call.id);
        for (i, value) in args.into_iter().enumerate() {
            function.append_node(
                block,
                NodeKind::StoreLocal {
                    register: i as u32 + 1,
                    value,
                },
            )?;
        }
        for register in resets {
            function.append_node(
                block,
                NodeKind::StoreLocal {
                    register,
                    value: IrValue::Const(Constant::Undefined),
                },
            )?;
        }

        let depth = function.block(block).map_or(0, |b| b.scope_depth);
        for _ in 0..depth {
            function.append_node(
                block,
                NodeKind::Scope {
                    op: ScopeOp::Pop,
                    operand: None,
                },
            )?;
        }
        function.block_mut(block)?.scope_depth = 0;

        let entry = function.entry();
        let Some(&(start, _)) = function.successors(entry).first() else {
            return Err(malformed_error!("the entry block of {} has no successor", function.method()));
        };
        let has_phis = function.block(start).is_some_and(|b| !b.phis().is_empty());
        let target = if has_phis {
            function.split_edge(entry, start, EdgeKind::Default)?
        } else {
            start
        };
        function.set_terminator(block, Terminator::Jump(target))?;
        Ok(target)
    }
}

impl IrPass for TailRecursionPass {
    fn name(&self) -> &'static str {
        "tail-recursion"
    }

    fn description(&self) -> &'static str {
        "Turns self tail calls into jumps to the start of the method"
    }

    fn should_run(&self, function: &IrFunction, _ctx: &CompilerContext) -> bool {
        !function
            .flags()
            .intersects(MethodFlags::NEED_ARGUMENTS | MethodFlags::NEED_REST)
    }

    fn run_on_method(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool> {
        let method = ctx.method();
        let changes = EventLog::new();

        for block in function.block_ids() {
            let Some(call) = Self::tail_call(function, ctx, block) else {
                continue;
            };
            let id = call.id;
            let target = Self::eliminate(function, call)?;
            changes
                .record(EventKind::TailCallEliminated)
                .at(method, id.index())
                .message(format!("self call {id} in {block} now jumps to {target}"));
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
        metadata::{Binding, MethodFlags, MethodId, MethodTable},
        test::{count_nodes, lift_asm, pool, run_pass_with},
    };

    fn is_call(kind: &NodeKind) -> bool {
        matches!(kind, NodeKind::Call { .. })
    }

    /// `f(n) { if (n < 1) return 0; return this.f(n - 1); }` as method 0.
    fn countdown() -> InstructionAssembler {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(1)
            .pushbyte(1)
            .iflt("base")
            .getlocal(0)
            .getlocal(1)
            .pushbyte(1)
            .subtract()
            .callproperty(1, 1)
            .returnvalue()
            .label("base")
            .pushbyte(0)
            .returnvalue();
        asm
    }

    fn back_edges(function: &IrFunction) -> Vec<(BlockId, BlockId)> {
        function
            .block_ids()
            .into_iter()
            .filter_map(|b| match function.block(b)?.terminator() {
                Terminator::Jump(target) => Some((b, *target)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_self_tail_call_becomes_jump() {
        let env = MethodTable::new().with_property(MethodId(0), 1, MethodId(0), Binding::Final);
        let mut function = lift_asm(1, countdown());
        assert_eq!(count_nodes(&function, is_call), 1);

        assert!(run_pass_with(&TailRecursionPass::new(), &mut function, &pool(), &env));
        assert_eq!(count_nodes(&function, is_call), 0);

        let start = function.successors(function.entry())[0].0;
        let edges = back_edges(&function);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].1, start);
        assert_eq!(
            count_nodes(&function, |k| matches!(k, NodeKind::StoreLocal { register: 1, .. })),
            1
        );
    }

    #[test]
    fn test_virtual_binding_is_kept() {
        let env = MethodTable::new().with_property(MethodId(0), 1, MethodId(0), Binding::Virtual);
        let mut function = lift_asm(1, countdown());
        assert!(!run_pass_with(&TailRecursionPass::new(), &mut function, &pool(), &env));
        assert_eq!(count_nodes(&function, is_call), 1);
    }

    #[test]
    fn test_call_to_other_method_is_kept() {
        let env = MethodTable::new().with_property(MethodId(0), 1, MethodId(5), Binding::Final);
        let mut function = lift_asm(1, countdown());
        assert!(!run_pass_with(&TailRecursionPass::new(), &mut function, &pool(), &env));
    }

    #[test]
    fn test_rest_parameter_disables_pass() {
        let pool = pool();
        let config = crate::config::PipelineConfig::default();
        let body = crate::test::body_with_flags(0, 1, MethodFlags::NEED_REST, countdown());
        let function = crate::pipeline::lift(&body, &pool, &config).unwrap();
        let env = MethodTable::new().with_property(MethodId(0), 1, MethodId(0), Binding::Final);
        let ctx = CompilerContext::new(MethodId(0), &pool, &env, &config);
        assert!(!TailRecursionPass::new().should_run(&function, &ctx));
    }

    #[test]
    fn test_scope_is_unwound() {
        let mut asm = InstructionAssembler::new();
        asm.getlocal(0)
            .pushscope()
            .getlocal(1)
            .pushbyte(1)
            .iflt("base")
            .getlocal(0)
            .getlocal(1)
            .pushbyte(1)
            .subtract()
            .callproperty(1, 1)
            .returnvalue()
            .label("base")
            .pushbyte(0)
            .returnvalue();
        let env = MethodTable::new().with_property(MethodId(0), 1, MethodId(0), Binding::Final);
        let mut function = lift_asm(1, asm);

        assert!(run_pass_with(&TailRecursionPass::new(), &mut function, &pool(), &env));
        let pops = count_nodes(&function, |k| {
            matches!(k, NodeKind::Scope { op: ScopeOp::Pop, .. })
        });
        assert_eq!(pops, 1);
        let (from, _) = back_edges(&function)[0];
        assert_eq!(function.block(from).unwrap().scope_depth, 0);
    }
}
