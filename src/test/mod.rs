//! Helpers shared by the unit tests: lifting assembled code and running passes.

use crate::{
    analysis::ir::{IrFunction, NodeKind},
    assembly::{encode_body, InstructionAssembler},
    compiler::{CompilerContext, IrPass},
    config::PipelineConfig,
    metadata::{
        ConstantPool, MethodBody, MethodEnvironment, MethodFlags, MethodId, Multiname, Namespace,
        NamespaceKind, NullEnvironment, PoolValue,
    },
    pipeline::lift,
};

/// A pool whose multinames `1` to `4` are the package names `a` to `d`.
pub(crate) fn pool() -> ConstantPool {
    let mut pool = ConstantPool::new();
    let namespace = pool.get_index(PoolValue::Namespace(Namespace {
        kind: NamespaceKind::Package,
        name: 0,
    }));
    for name in ["a", "b", "c", "d"] {
        let name = pool.get_index(PoolValue::String(name.to_string()));
        pool.get_index(PoolValue::Multiname(Multiname::QName {
            namespace,
            name,
            attribute: false,
        }));
    }
    pool
}

/// Encodes `asm` into a method body.
pub(crate) fn body(method: u32, param_count: u32, asm: InstructionAssembler) -> MethodBody {
    let bytecode = asm.finish().unwrap();
    let encoded = encode_body(&bytecode).unwrap();
    MethodBody::new(MethodId(method), param_count, encoded.code).with_exceptions(encoded.exceptions)
}

/// Like [`body`], with method flags.
pub(crate) fn body_with_flags(
    method: u32,
    param_count: u32,
    flags: MethodFlags,
    asm: InstructionAssembler,
) -> MethodBody {
    body(method, param_count, asm).with_flags(flags)
}

/// Lifts `asm` as method 0 against [`pool`].
pub(crate) fn lift_asm(param_count: u32, asm: InstructionAssembler) -> IrFunction {
    lift(&body(0, param_count, asm), &pool(), &PipelineConfig::default()).unwrap()
}

/// Runs `pass` once on `function` without a method environment.
pub(crate) fn run_pass(pass: &dyn IrPass, function: &mut IrFunction) -> bool {
    run_pass_with(pass, function, &pool(), &NullEnvironment)
}

/// Runs `pass` once on `function` and checks the result.
pub(crate) fn run_pass_with(
    pass: &dyn IrPass,
    function: &mut IrFunction,
    pool: &ConstantPool,
    env: &dyn MethodEnvironment,
) -> bool {
    let config = PipelineConfig::default();
    let ctx = CompilerContext::new(function.method(), pool, env, &config);
    let changed = pass.run_on_method(function, &ctx).unwrap();
    function.verify().unwrap();
    changed
}

/// Number of nodes for which `predicate` holds.
pub(crate) fn count_nodes(function: &IrFunction, predicate: impl Fn(&NodeKind) -> bool) -> usize {
    function
        .node_ids()
        .into_iter()
        .filter_map(|id| function.kind(id))
        .filter(|kind| predicate(kind))
        .count()
}
