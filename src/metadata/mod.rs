//! The container-side collaborators of the pipeline.
//!
//! The pipeline treats the ABC container as a black box reached through three
//! interfaces:
//!
//! - [`ConstantPool`] - interned integers, doubles, strings, namespaces and multinames
//! - [`MethodBody`] - raw code plus its stack/scope/register metadata and exception table
//! - [`MethodEnvironment`] - static call resolution and access to callee bodies

mod environment;
mod method;
mod pool;

pub use environment::{
    resolve_call, Binding, CallSite, Dispatch, MethodEnvironment, MethodTable, NullEnvironment,
    ResolvedCall,
};
pub use method::{argument_registers, ExceptionInfo, MethodBody, MethodFlags, MethodId};
pub use pool::{ConstantPool, Multiname, Namespace, NamespaceKind, PoolKind, PoolValue};
