//! Pass scheduler for orchestrating IR pass execution.
//!
//! The `PassScheduler` runs the optimization passes of one method in two groups,
//! each to its own fixed point, with normalization after every structural change.

use crate::{
    analysis::ir::IrFunction,
    compiler::{
        context::CompilerContext,
        pass::IrPass,
        passes::{
            ConstantFoldingPass, CopyPropagationPass, DeadCodeEliminationPass, InliningPass,
            LicmPass, TailRecursionPass,
        },
    },
    config::{Pass, PipelineConfig},
    Result,
};

/// Orchestrates IR pass execution for one method.
///
/// The scheduler runs passes in rounds:
///
/// 1. **Normalize**: constant folding, copy propagation and dead code elimination,
///    repeated until none of them changes anything
/// 2. **Optimize**: loop-invariant code motion, tail-recursion elimination and
///    inlining, each change followed by a full normalization
///
/// Rounds repeat until one completes without a change or `max_iterations` is reached.
/// Hitting the cap is logged and recorded as a warning; the IR is valid after every
/// pass, so the method is still emitted.
pub struct PassScheduler {
    /// Maximum rounds before stopping.
    max_iterations: usize,
    /// Maximum iterations for a single group before moving on.
    max_phase_iterations: usize,
    /// Structural passes (LICM, tail calls, inlining).
    pub optimize: Vec<Box<dyn IrPass>>,
    /// Normalization passes (folding, copy propagation, DCE).
    /// Run after each structural change to clean up before the next.
    pub normalize: Vec<Box<dyn IrPass>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl PassScheduler {
    /// Creates a scheduler without passes.
    ///
    /// # Arguments
    ///
    /// * `max_iterations` - Maximum rounds before stopping.
    /// * `max_phase_iterations` - Maximum iterations for a single group.
    #[must_use]
    pub fn new(max_iterations: usize, max_phase_iterations: usize) -> Self {
        Self {
            max_iterations,
            max_phase_iterations,
            optimize: Vec::new(),
            normalize: Vec::new(),
        }
    }

    /// Creates a scheduler with the built-in passes `config` enables.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut scheduler = Self::new(config.max_iterations, config.max_phase_iterations);

        if config.is_enabled(Pass::ConstantFolding) {
            scheduler.normalize.push(Box::new(ConstantFoldingPass::new()));
        }
        if config.is_enabled(Pass::CopyPropagation) {
            scheduler.normalize.push(Box::new(CopyPropagationPass::new()));
        }
        if config.is_enabled(Pass::DeadCode) {
            scheduler.normalize.push(Box::new(DeadCodeEliminationPass::new()));
        }

        if config.is_enabled(Pass::Licm) {
            scheduler.optimize.push(Box::new(LicmPass::new()));
        }
        if config.is_enabled(Pass::TailCalls) {
            scheduler.optimize.push(Box::new(TailRecursionPass::new()));
        }
        if config.is_enabled(Pass::Inlining) {
            scheduler.optimize.push(Box::new(InliningPass::new()));
        }

        scheduler
    }

    /// Names of the scheduled passes, normalization first.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.normalize
            .iter()
            .chain(self.optimize.iter())
            .map(|pass| pass.name())
            .collect()
    }

    /// Returns `true` if no pass is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.normalize.is_empty() && self.optimize.is_empty()
    }

    /// Runs every pass once.
    ///
    /// Returns `true` if any pass made changes, `false` otherwise.
    fn run_passes_once(
        function: &mut IrFunction,
        ctx: &CompilerContext,
        passes: &[Box<dyn IrPass>],
    ) -> Result<bool> {
        let mut any_changed = false;

        for pass in passes {
            if !pass.should_run(function, ctx) {
                continue;
            }

            if pass.run_on_method(function, ctx)? {
                function.verify()?;
                log::debug!("{}: {} changed the IR", ctx.method(), pass.name());
                any_changed = true;
            }
        }

        Ok(any_changed)
    }

    /// Runs normalization passes until no more changes occur.
    ///
    /// # Returns
    ///
    /// `true` if any changes were made, `false` otherwise.
    fn normalize_to_fixpoint(
        &self,
        function: &mut IrFunction,
        ctx: &CompilerContext,
    ) -> Result<bool> {
        let mut any_changed = false;

        for _ in 0..self.max_phase_iterations {
            if !Self::run_passes_once(function, ctx, &self.normalize)? {
                break;
            }
            any_changed = true;
        }

        Ok(any_changed)
    }

    /// Runs the optimize group to fixpoint, normalizing after each change.
    ///
    /// # Returns
    ///
    /// `true` if any changes were made, `false` otherwise.
    fn phase_to_fixpoint(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool> {
        if self.optimize.is_empty() {
            return Ok(false);
        }

        let mut phase_changed = false;

        for _ in 0..self.max_phase_iterations {
            if !Self::run_passes_once(function, ctx, &self.optimize)? {
                break;
            }
            phase_changed = true;

            // Normalization exposes new opportunities for the next iteration
            self.normalize_to_fixpoint(function, ctx)?;
        }

        Ok(phase_changed)
    }

    /// Optimizes `function` until no pass changes it.
    ///
    /// # Arguments
    ///
    /// * `function` - The IR to optimize.
    /// * `ctx` - The per-method compiler context; events are accumulated in `ctx.events`.
    ///
    /// # Returns
    ///
    /// The number of rounds completed.
    ///
    /// # Errors
    ///
    /// Returns an error if any pass fails, or leaves the IR in an invalid state.
    pub fn run(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<usize> {
        for round in 0..self.max_iterations {
            let mut changed = self.normalize_to_fixpoint(function, ctx)?;
            changed |= self.phase_to_fixpoint(function, ctx)?;

            if !changed {
                return Ok(round + 1);
            }
        }

        log::warn!(
            "{}: no fixed point after {} rounds, keeping the current IR",
            ctx.method(),
            self.max_iterations
        );
        ctx.events.warn(format!(
            "{}: optimization stopped after {} rounds",
            ctx.method(),
            self.max_iterations
        ));
        Ok(self.max_iterations)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        analysis::ir::Terminator,
        compiler::EventKind,
        metadata::{ConstantPool, MethodFlags, MethodId, NullEnvironment},
    };

    struct TestPass {
        name: &'static str,
        changes_left: AtomicUsize,
    }

    impl TestPass {
        fn new(name: &'static str, changes: usize) -> Self {
            Self {
                name,
                changes_left: AtomicUsize::new(changes),
            }
        }
    }

    impl IrPass for TestPass {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run_on_method(&self, _function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool> {
            let left = self.changes_left.load(Ordering::Relaxed);
            if left == 0 {
                return Ok(false);
            }
            self.changes_left.store(left - 1, Ordering::Relaxed);
            ctx.events
                .record(EventKind::ConstantFolded)
                .method(ctx.method())
                .message("test");
            Ok(true)
        }
    }

    fn trivial_function() -> IrFunction {
        let mut function = IrFunction::new(MethodId(4), 0, MethodFlags::empty(), 1);
        let body = function.add_block();
        let entry = function.entry();
        function.set_terminator(entry, Terminator::Goto(body)).unwrap();
        function.set_terminator(body, Terminator::Return(None)).unwrap();
        function
    }

    #[test]
    fn test_scheduler_from_config() {
        let scheduler = PassScheduler::from_config(&PipelineConfig::default());
        assert_eq!(
            scheduler.pass_names(),
            vec![
                "constant-folding",
                "copy-propagation",
                "dead-code-elimination",
                "licm",
                "tail-recursion",
                "inlining"
            ]
        );

        let fast = PassScheduler::from_config(&PipelineConfig::fast());
        assert!(fast.optimize.is_empty());
        assert_eq!(fast.normalize.len(), 3);
    }

    #[test]
    fn test_scheduler_reaches_fixpoint() {
        let mut scheduler = PassScheduler::new(10, 5);
        scheduler.normalize.push(Box::new(TestPass::new("normalize", 3)));
        scheduler.optimize.push(Box::new(TestPass::new("optimize", 2)));

        let pool = ConstantPool::new();
        let config = PipelineConfig::default();
        let ctx = CompilerContext::new(MethodId(4), &pool, &NullEnvironment, &config);
        let mut function = trivial_function();

        let rounds = scheduler.run(&mut function, &ctx).unwrap();
        assert_eq!(rounds, 2);
        assert_eq!(ctx.events.count_kind(EventKind::ConstantFolded), 5);
        assert!(!ctx.events.has(EventKind::Warning));
    }

    #[test]
    fn test_scheduler_cap_warns() {
        let mut scheduler = PassScheduler::new(2, 1);
        scheduler.normalize.push(Box::new(TestPass::new("endless", usize::MAX)));

        let pool = ConstantPool::new();
        let config = PipelineConfig::default();
        let ctx = CompilerContext::new(MethodId(4), &pool, &NullEnvironment, &config);
        let mut function = trivial_function();

        assert_eq!(scheduler.run(&mut function, &ctx).unwrap(), 2);
        assert_eq!(ctx.events.count_kind(EventKind::Warning), 1);
    }

    #[test]
    fn test_empty_scheduler() {
        let scheduler = PassScheduler::new(3, 3);
        assert!(scheduler.is_empty());

        let pool = ConstantPool::new();
        let config = PipelineConfig::default();
        let ctx = CompilerContext::new(MethodId(4), &pool, &NullEnvironment, &config);
        let mut function = trivial_function();
        assert_eq!(scheduler.run(&mut function, &ctx).unwrap(), 1);
    }
}
