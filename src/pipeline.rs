//! Drivers for single methods and batches.
//!
//! [`lift`] takes a method body from bytes to IR. A [`Pipeline`] adds the pass
//! scheduler and the code generator on top and produces rewritten method bodies with
//! fresh `max_stack`, `max_scope_depth` and `local_count` values.
//!
//! # Batches
//!
//! [`Pipeline::process_batch`] optimizes the methods of a batch on the rayon thread
//! pool, sharing the constant pool and the environment read-only. Code generation
//! may intern new constants and therefore runs afterwards on the calling thread. A
//! method that fails, or panics, is recorded in the [`BatchReport`] and the batch
//! carries on with the next one.
//!
//! # Examples
//!
//! ```rust
//! use abcscope::prelude::*;
//!
//! // var x = 5; var y = x + 1; return y;
//! let mut asm = InstructionAssembler::new();
//! asm.pushbyte(5).setlocal(1)
//!     .getlocal(1).pushbyte(1).add().setlocal(2)
//!     .getlocal(2).returnvalue();
//! let encoded = encode_body(&asm.finish()?)?;
//! let body = MethodBody::new(MethodId(0), 0, encoded.code);
//!
//! let mut pool = ConstantPool::new();
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! let rewritten = pipeline.process_method(&body, &mut pool, &NullEnvironment)?;
//!
//! // pushbyte 6; returnvalue
//! assert_eq!(rewritten.code, [0x24, 0x06, 0x48]);
//! # Ok::<(), abcscope::Error>(())
//! ```

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use rayon::prelude::*;

use crate::{
    analysis::{
        cfg::ControlFlowGraph,
        ir::{build_ir, IrFunction},
        stack::{self, compute_local_count},
    },
    assembly::{decode_with_handlers, encode_body},
    compiler::{remove_unreachable_code, CodeGenerator, CompilerContext, EventLog, PassScheduler},
    config::PipelineConfig,
    metadata::{ConstantPool, MethodBody, MethodEnvironment, MethodId},
    Error, Result,
};

/// Lifts a method body into IR without optimizing it.
///
/// Decodes the code, builds the CFG, optionally strips unreachable instructions,
/// runs the stack analyzer and builds the IR.
///
/// # Errors
///
/// Returns [`Error::Codec`] for undecodable code, [`Error::Malformed`] for code no
/// verifier accepts and [`Error::Unsupported`] for constructs the IR does not model.
pub fn lift(body: &MethodBody, pool: &ConstantPool, config: &PipelineConfig) -> Result<IrFunction> {
    let mut bytecode = decode_with_handlers(&body.code, &body.exceptions)?;
    let mut cfg = ControlFlowGraph::build(&bytecode)?;

    if config.remove_unreachable_bytecode && remove_unreachable_code(&mut bytecode, &cfg)? > 0 {
        cfg = ControlFlowGraph::build(&bytecode)?;
    }

    let bounds = stack::analyze(&bytecode, &cfg, pool, config.max_stack_paths)?;
    build_ir(body, &bytecode, &cfg, pool, bounds)
}

/// A method the batch driver could not rewrite.
#[derive(Debug)]
pub struct MethodFailure {
    /// The method
    pub method: MethodId,
    /// Why it failed
    pub error: Error,
}

impl fmt::Display for MethodFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.method, self.error.category(), self.error)
    }
}

/// The outcome of [`Pipeline::process_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Rewritten bodies, in input order
    pub bodies: Vec<MethodBody>,
    /// Methods that were left alone, in input order
    pub failures: Vec<MethodFailure>,
    /// Events of every method in the batch
    pub events: EventLog,
}

impl BatchReport {
    /// Returns `true` if every method was rewritten.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of methods processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.bodies.len() + self.failures.len()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} methods rewritten ({})",
            self.bodies.len(),
            self.total(),
            self.events.summary()
        )?;
        for failure in &self.failures {
            write!(f, "\n  failed {failure}")?;
        }
        Ok(())
    }
}

/// Lift, optimize and re-encode method bodies.
pub struct Pipeline {
    config: PipelineConfig,
    scheduler: PassScheduler,
    codegen: CodeGenerator,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl Pipeline {
    /// Creates a pipeline running the passes `config` enables.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let scheduler = PassScheduler::from_config(&config);
        Self {
            config,
            scheduler,
            codegen: CodeGenerator::new(),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The scheduler and its passes.
    #[must_use]
    pub fn scheduler(&self) -> &PassScheduler {
        &self.scheduler
    }

    /// Lifts `body` and runs the passes on it. Events are merged into `events`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`lift`] and of the passes.
    pub fn optimize(
        &self,
        body: &MethodBody,
        pool: &ConstantPool,
        env: &dyn MethodEnvironment,
        events: &EventLog,
    ) -> Result<IrFunction> {
        let mut function = lift(body, pool, &self.config)?;
        let ctx = CompilerContext::new(body.method, pool, env, &self.config);
        let rounds = self.scheduler.run(&mut function, &ctx)?;
        log::debug!(
            "{}: optimized in {} rounds ({})",
            body.method,
            rounds,
            ctx.events.summary()
        );
        events.merge(&ctx.events);
        Ok(function)
    }

    /// Generates code for `function` and packs it into a body that replaces `body`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`CodeGenerator::generate`], of the stack analyzer on the
    /// generated code and [`Error::Relocation`] if a branch cannot be encoded.
    pub fn emit(
        &self,
        body: &MethodBody,
        function: &IrFunction,
        pool: &mut ConstantPool,
    ) -> Result<MethodBody> {
        let bytecode = self.codegen.generate(function, pool)?;
        let cfg = ControlFlowGraph::build(&bytecode)?;
        let bounds = stack::analyze(&bytecode, &cfg, pool, self.config.max_stack_paths)?;
        let local_count = compute_local_count(&bytecode, body.param_count, body.flags);
        let encoded = encode_body(&bytecode)?;

        Ok(MethodBody {
            method: body.method,
            param_count: body.param_count,
            flags: body.flags,
            max_stack: bounds.max_stack,
            local_count,
            init_scope_depth: body.init_scope_depth,
            max_scope_depth: body.init_scope_depth + bounds.max_scope,
            code: encoded.code,
            exceptions: encoded.exceptions,
        })
    }

    /// Rewrites one method body.
    ///
    /// # Errors
    ///
    /// Returns the first error of any stage; `pool` may have grown by then.
    pub fn process_method(
        &self,
        body: &MethodBody,
        pool: &mut ConstantPool,
        env: &dyn MethodEnvironment,
    ) -> Result<MethodBody> {
        let events = EventLog::new();
        let function = self.optimize(body, pool, env, &events)?;
        self.emit(body, &function, pool)
    }

    /// Rewrites every body of `bodies`, isolating failures per method.
    pub fn process_batch(
        &self,
        bodies: &[MethodBody],
        pool: &mut ConstantPool,
        env: &dyn MethodEnvironment,
    ) -> BatchReport {
        let events = EventLog::new();

        let optimized: Vec<Result<IrFunction>> = {
            let shared: &ConstantPool = pool;
            let run = |body: &MethodBody| {
                isolated("optimization", || self.optimize(body, shared, env, &events))
            };
            if self.config.parallel {
                bodies.par_iter().map(run).collect()
            } else {
                bodies.iter().map(run).collect()
            }
        };

        let mut report = BatchReport::default();
        for (body, outcome) in bodies.iter().zip(optimized) {
            let emitted = outcome
                .and_then(|function| isolated("emission", || self.emit(body, &function, pool)));
            match emitted {
                Ok(rewritten) => report.bodies.push(rewritten),
                Err(error) => {
                    log::warn!("{}: left unchanged: {}", body.method, error);
                    report.failures.push(MethodFailure {
                        method: body.method,
                        error,
                    });
                }
            }
        }

        report.events = events;
        log::info!("{report}");
        report
    }
}

/// Runs one stage of a batch method, turning a panic into an error for that method.
fn isolated<T>(stage: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(work))
        .unwrap_or_else(|payload| Err(Error::Error(panic_message(stage, payload.as_ref()))))
}

fn panic_message(stage: &str, payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("{stage} panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("{stage} panicked: {message}")
    } else {
        format!("{stage} panicked")
    }
}
