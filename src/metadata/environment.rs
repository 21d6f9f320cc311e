//! Static call resolution.
//!
//! Tail-call elimination and inlining need to know whether a call site always reaches
//! one concrete method. That knowledge lives in the container's class and trait
//! tables, which are outside this crate. The [`MethodEnvironment`] trait is the seam:
//! the pipeline asks it about call sites and for callee bodies, and never mutates it.
//!
//! `callstatic` names its target method directly and is resolved without consulting
//! the environment, see [`resolve_call`].

use rustc_hash::FxHashMap;

use crate::metadata::{MethodBody, MethodId};

/// How a call site selects its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatch {
    /// Property call by multiname (`callproperty`, `callproplex`, `callpropvoid`)
    Property(u32),
    /// Call by dispatch id (`callmethod`)
    Method(u32),
    /// Call by method index (`callstatic`)
    Static(u32),
    /// Call into the base class (`callsuper`, `callsupervoid`)
    Super(u32),
}

/// A call site as seen by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// The method containing the call
    pub caller: MethodId,
    /// How the target is selected
    pub dispatch: Dispatch,
    /// Whether the receiver is the caller's own, unmodified `this`
    pub on_receiver: bool,
    /// Number of arguments passed
    pub arg_count: u32,
}

/// How firmly a call is bound to its resolved target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// A `final` method, cannot be overridden
    Final,
    /// A private method, invisible to subclasses
    Private,
    /// A static target named by method index
    Static,
    /// An overridable method; the resolution is only a guess
    Virtual,
}

impl Binding {
    /// Returns `true` if the binding rules out overriding and dynamic dispatch.
    #[must_use]
    pub const fn is_static(self) -> bool {
        !matches!(self, Binding::Virtual)
    }
}

/// The outcome of resolving a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedCall {
    /// The target method
    pub method: MethodId,
    /// How firmly the site is bound to it
    pub binding: Binding,
}

/// Read-only view of the class and method tables of a container.
///
/// Implementations must be shareable across the worker threads of a batch run.
pub trait MethodEnvironment: Sync {
    /// Resolves `site` to its target, if that target is statically known.
    fn resolve(&self, site: &CallSite) -> Option<ResolvedCall>;

    /// Returns the body of `method`, if the container has one.
    fn body(&self, method: MethodId) -> Option<&MethodBody>;
}

/// Resolves a call site, handling `callstatic` without consulting the environment.
pub fn resolve_call(env: &dyn MethodEnvironment, site: &CallSite) -> Option<ResolvedCall> {
    match site.dispatch {
        Dispatch::Static(index) => Some(ResolvedCall {
            method: MethodId(index),
            binding: Binding::Static,
        }),
        _ => env.resolve(site),
    }
}

/// An environment that knows nothing; every call stays dynamic.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEnvironment;

impl MethodEnvironment for NullEnvironment {
    fn resolve(&self, _site: &CallSite) -> Option<ResolvedCall> {
        None
    }

    fn body(&self, _method: MethodId) -> Option<&MethodBody> {
        None
    }
}

/// An in-memory environment built from explicit bindings.
///
/// Receiver calls are resolved per caller, since the same multiname can bind to
/// different methods in different classes.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    properties: FxHashMap<(MethodId, u32), ResolvedCall>,
    slots: FxHashMap<(MethodId, u32), ResolvedCall>,
    bodies: FxHashMap<MethodId, MethodBody>,
}

impl MethodTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds receiver property calls to `name` inside `caller` to `target`.
    #[must_use]
    pub fn with_property(
        mut self,
        caller: MethodId,
        name: u32,
        target: MethodId,
        binding: Binding,
    ) -> Self {
        self.properties.insert(
            (caller, name),
            ResolvedCall {
                method: target,
                binding,
            },
        );
        self
    }

    /// Binds receiver `callmethod` calls with dispatch id `disp_id` inside `caller` to `target`.
    #[must_use]
    pub fn with_dispatch(
        mut self,
        caller: MethodId,
        disp_id: u32,
        target: MethodId,
        binding: Binding,
    ) -> Self {
        self.slots.insert(
            (caller, disp_id),
            ResolvedCall {
                method: target,
                binding,
            },
        );
        self
    }

    /// Registers a method body.
    #[must_use]
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.bodies.insert(body.method, body);
        self
    }
}

impl MethodEnvironment for MethodTable {
    fn resolve(&self, site: &CallSite) -> Option<ResolvedCall> {
        if !site.on_receiver {
            return None;
        }

        match site.dispatch {
            Dispatch::Property(name) => self.properties.get(&(site.caller, name)).copied(),
            Dispatch::Method(disp_id) => self.slots.get(&(site.caller, disp_id)).copied(),
            Dispatch::Static(index) => Some(ResolvedCall {
                method: MethodId(index),
                binding: Binding::Static,
            }),
            Dispatch::Super(_) => None,
        }
    }

    fn body(&self, method: MethodId) -> Option<&MethodBody> {
        self.bodies.get(&method)
    }
}
