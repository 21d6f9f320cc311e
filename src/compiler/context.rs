//! Per-method state shared by the passes.
//!
//! A [`CompilerContext`] is created for every method the pipeline optimizes. It
//! gives the passes read-only access to the constant pool, the method environment
//! and the configuration, collects their events, and caches the IR of callees the
//! inliner looks at so each callee is lifted at most once per method.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    analysis::ir::IrFunction,
    compiler::events::EventLog,
    config::PipelineConfig,
    metadata::{ConstantPool, MethodEnvironment, MethodId},
    pipeline::lift,
};

/// Compiler context for optimizing one method.
///
/// All fields are either read-only borrows or thread-safe collections, so a context
/// can be shared by reference with passes that run on worker threads.
pub struct CompilerContext<'a> {
    /// The method being optimized.
    method: MethodId,

    /// Constant pool the method's instructions index into.
    pool: &'a ConstantPool,

    /// Resolves call sites and supplies callee bodies.
    env: &'a dyn MethodEnvironment,

    /// Pipeline configuration.
    config: &'a PipelineConfig,

    /// Accumulated events from all passes.
    pub events: EventLog,

    /// Lifted callees, `None` for bodies that could not be lifted.
    callees: DashMap<MethodId, Option<Arc<IrFunction>>>,
}

impl<'a> CompilerContext<'a> {
    /// Creates a new compiler context.
    ///
    /// # Arguments
    ///
    /// * `method` - The method being optimized
    /// * `pool` - The constant pool
    /// * `env` - The method environment
    /// * `config` - The pipeline configuration
    #[must_use]
    pub fn new(
        method: MethodId,
        pool: &'a ConstantPool,
        env: &'a dyn MethodEnvironment,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            method,
            pool,
            env,
            config,
            events: EventLog::new(),
            callees: DashMap::new(),
        }
    }

    /// The method being optimized.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// The constant pool.
    #[must_use]
    pub fn pool(&self) -> &'a ConstantPool {
        self.pool
    }

    /// The method environment.
    #[must_use]
    pub fn env(&self) -> &'a dyn MethodEnvironment {
        self.env
    }

    /// The pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &'a PipelineConfig {
        self.config
    }

    /// Returns the unoptimized IR of `method`, lifting its body on first use.
    ///
    /// Returns `None` if the environment has no body for `method` or the body cannot
    /// be lifted; the failure is logged and remembered.
    pub fn callee(&self, method: MethodId) -> Option<Arc<IrFunction>> {
        if let Some(cached) = self.callees.get(&method) {
            return cached.clone();
        }

        let lifted = self.env.body(method).and_then(|body| {
            match lift(body, self.pool, self.config) {
                Ok(function) => Some(Arc::new(function)),
                Err(error) => {
                    log::debug!("{}: callee {} cannot be lifted: {}", self.method, method, error);
                    None
                }
            }
        });
        self.callees.insert(method, lifted.clone());
        lifted
    }

    /// Number of callees looked at so far.
    #[must_use]
    pub fn callee_count(&self) -> usize {
        self.callees.len()
    }
}
