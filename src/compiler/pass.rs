//! The interface every optimization pass implements.

use crate::{
    analysis::ir::IrFunction,
    compiler::CompilerContext,
    Result,
};

/// A rewrite of the IR of one method.
///
/// Passes are stateless and shared between the worker threads of a batch run, so
/// everything a pass learns about a method lives in the function itself or in the
/// [`CompilerContext`].
///
/// # Contract
///
/// - `run_on_method` returns `true` exactly when it changed the function.
/// - A pass leaves the function in a state that passes [`IrFunction::verify`].
/// - Changes are recorded in `ctx.events`.
pub trait IrPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Should this pass run on this function?
    ///
    /// Called before `run_on_method`. Override to skip functions the pass cannot
    /// improve.
    fn should_run(&self, _function: &IrFunction, _ctx: &CompilerContext) -> bool {
        true
    }

    /// Run the pass on a single method.
    ///
    /// # Arguments
    ///
    /// * `function` - The IR to transform.
    /// * `ctx` - The per-method compiler context.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass fails to process the method; the method is then
    /// reported as failed and left out of the batch output.
    fn run_on_method(&self, function: &mut IrFunction, ctx: &CompilerContext) -> Result<bool>;
}
