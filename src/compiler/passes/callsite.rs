//! Recognition of receiver calls with a statically known target.
//!
//! Tail-call elimination and inlining both start from a [`NodeKind::Call`] whose
//! target the method environment can pin down. This module decodes the call forms
//! they understand and asks the environment about them.

use crate::{
    analysis::ir::{BlockId, IrFunction, IrValue, NodeKind, ValueId},
    assembly::Opcode,
    compiler::CompilerContext,
    metadata::{resolve_call, CallSite, Dispatch, MethodId},
};

/// A call through a receiver, with its operands split up.
#[derive(Debug, Clone)]
pub(crate) struct ReceiverCall {
    /// The call node
    pub id: ValueId,
    /// The block holding the call
    pub block: BlockId,
    /// Position of the call in the block body
    pub position: usize,
    /// How the call selects its target
    pub dispatch: Dispatch,
    /// The receiver, passed as `this`
    pub receiver: IrValue,
    /// The arguments, first to last
    pub args: Vec<IrValue>,
    /// Whether the receiver is the caller's own, never reassigned `this`
    pub on_receiver: bool,
}

impl ReceiverCall {
    /// Decodes the call node `id`.
    ///
    /// Recognizes `callproperty`, `callproplex` and `callpropvoid` on names without
    /// runtime parts, `callmethod` and `callstatic`.
    pub(crate) fn decode(function: &IrFunction, ctx: &CompilerContext, id: ValueId) -> Option<Self> {
        let node = function.node(id)?;
        let NodeKind::Call {
            opcode,
            index,
            arg_count,
            operands,
        } = &node.kind
        else {
            return None;
        };

        let dispatch = match opcode {
            Opcode::CallProperty | Opcode::CallPropLex | Opcode::CallPropVoid => {
                if ctx.pool().runtime_arity(*index) != Some(0) {
                    return None;
                }
                Dispatch::Property(*index)
            }
            Opcode::CallMethod => Dispatch::Method(*index),
            Opcode::CallStatic => Dispatch::Static(*index),
            _ => return None,
        };
        if operands.len() != *arg_count as usize + 1 {
            return None;
        }

        let receiver = operands[0].clone();
        let on_receiver = matches!(receiver, IrValue::Local(local) if local.register == 0)
            && !function.written_registers().contains(&0);
        let position = function
            .block(node.block)?
            .body()
            .iter()
            .position(|&n| n == id)?;

        Some(ReceiverCall {
            id,
            block: node.block,
            position,
            dispatch,
            receiver,
            args: operands[1..].to_vec(),
            on_receiver,
        })
    }

    /// The target method, if the environment binds this call statically.
    pub(crate) fn static_target(&self, caller: MethodId, ctx: &CompilerContext) -> Option<MethodId> {
        let site = CallSite {
            caller,
            dispatch: self.dispatch,
            on_receiver: self.on_receiver,
            arg_count: self.args.len() as u32,
        };
        resolve_call(ctx.env(), &site)
            .filter(|resolved| resolved.binding.is_static())
            .map(|resolved| resolved.method)
    }
}
