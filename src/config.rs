//! Configuration for the optimization pipeline.
//!
//! This module provides [`PipelineConfig`], which selects the passes that run, bounds
//! the fixed-point iteration and tunes the stack analyzer and the batch driver.

use strum::{Display, EnumIter};

/// The optimization passes that can be switched individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Pass {
    /// Constant folding and branch pruning
    ConstantFolding,
    /// Register forwarding through stores
    CopyPropagation,
    /// Removal of unreachable blocks and unused nodes
    DeadCode,
    /// Loop-invariant code motion
    Licm,
    /// Self tail calls turned into back-edges
    TailCalls,
    /// Expansion of statically bound receiver calls
    Inlining,
}

/// Configuration for the optimization pipeline.
///
/// Controls the iteration limits of the pass scheduler, which passes run, the
/// inlining budget and how a batch is processed.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum rounds of the whole pass list (default: 10).
    pub max_iterations: usize,

    /// Maximum rounds of one pass group before moving on (default: 15).
    pub max_phase_iterations: usize,

    /// Enable constant folding.
    pub enable_constant_folding: bool,

    /// Enable copy propagation.
    pub enable_copy_propagation: bool,

    /// Enable dead code elimination.
    pub enable_dead_code: bool,

    /// Enable loop-invariant code motion.
    pub enable_licm: bool,

    /// Enable tail-recursion elimination.
    pub enable_tail_calls: bool,

    /// Enable inline expansion.
    pub enable_inlining: bool,

    /// Maximum number of callee IR nodes for an inlining candidate (default: 32).
    pub inline_threshold: usize,

    /// Path budget of the stack analyzer's final enumeration (default: 4096).
    pub max_stack_paths: usize,

    /// Delete instructions the CFG never reaches before lifting (default: true).
    pub remove_unreachable_bytecode: bool,

    /// Optimize the methods of a batch on the rayon thread pool (default: true).
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_phase_iterations: 15,
            enable_constant_folding: true,
            enable_copy_propagation: true,
            enable_dead_code: true,
            enable_licm: true,
            enable_tail_calls: true,
            enable_inlining: true,
            inline_threshold: 32,
            max_stack_paths: 4096,
            remove_unreachable_bytecode: true,
            parallel: true,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a "fast" configuration for quick processing.
    ///
    /// This configuration uses:
    /// - Fewer iterations (3 max)
    /// - Only the local cleanup passes: folding, copy propagation and dead code
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_iterations: 3,
            max_phase_iterations: 5,
            enable_licm: false,
            enable_tail_calls: false,
            enable_inlining: false,
            ..Self::default()
        }
    }

    /// Creates an "aggressive" configuration for thorough optimization.
    ///
    /// Raises the iteration caps, the inlining budget and the analyzer's path budget.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_iterations: 25,
            max_phase_iterations: 30,
            inline_threshold: 128,
            max_stack_paths: 65_536,
            ..Self::default()
        }
    }

    /// Sets the maximum number of scheduler rounds.
    #[must_use]
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Sets the maximum number of rounds per pass group.
    #[must_use]
    pub fn with_max_phase_iterations(mut self, max: usize) -> Self {
        self.max_phase_iterations = max;
        self
    }

    /// Sets the inlining budget in callee IR nodes.
    #[must_use]
    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    /// Sets the path budget of the stack analyzer.
    #[must_use]
    pub fn with_max_stack_paths(mut self, paths: usize) -> Self {
        self.max_stack_paths = paths;
        self
    }

    /// Enables or disables the bytecode-level unreachable code removal.
    #[must_use]
    pub fn with_unreachable_removal(mut self, enabled: bool) -> Self {
        self.remove_unreachable_bytecode = enabled;
        self
    }

    /// Enables or disables parallel batch processing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Enables or disables a single pass.
    #[must_use]
    pub fn with_pass(mut self, pass: Pass, enabled: bool) -> Self {
        *self.pass_flag(pass) = enabled;
        self
    }

    /// Returns `true` if `pass` is enabled.
    #[must_use]
    pub fn is_enabled(&self, pass: Pass) -> bool {
        match pass {
            Pass::ConstantFolding => self.enable_constant_folding,
            Pass::CopyPropagation => self.enable_copy_propagation,
            Pass::DeadCode => self.enable_dead_code,
            Pass::Licm => self.enable_licm,
            Pass::TailCalls => self.enable_tail_calls,
            Pass::Inlining => self.enable_inlining,
        }
    }

    fn pass_flag(&mut self, pass: Pass) -> &mut bool {
        match pass {
            Pass::ConstantFolding => &mut self.enable_constant_folding,
            Pass::CopyPropagation => &mut self.enable_copy_propagation,
            Pass::DeadCode => &mut self.enable_dead_code,
            Pass::Licm => &mut self.enable_licm,
            Pass::TailCalls => &mut self.enable_tail_calls,
            Pass::Inlining => &mut self.enable_inlining,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_default_enables_everything() {
        let config = PipelineConfig::default();
        assert!(Pass::iter().all(|pass| config.is_enabled(pass)));
        assert!(config.parallel);
    }

    #[test]
    fn test_fast_preset() {
        let config = PipelineConfig::fast();
        assert!(config.is_enabled(Pass::ConstantFolding));
        assert!(config.is_enabled(Pass::DeadCode));
        assert!(!config.is_enabled(Pass::Inlining));
        assert!(!config.is_enabled(Pass::Licm));
        assert_eq!(config.max_iterations, 3);
    }

    #[test]
    fn test_builder_methods() {
        let config = PipelineConfig::new()
            .with_pass(Pass::TailCalls, false)
            .with_inline_threshold(8)
            .with_parallel(false);
        assert!(!config.is_enabled(Pass::TailCalls));
        assert_eq!(config.inline_threshold, 8);
        assert!(!config.parallel);
        assert!(PipelineConfig::aggressive().inline_threshold > config.inline_threshold);
    }

    #[test]
    fn test_pass_names() {
        assert_eq!(Pass::ConstantFolding.to_string(), "constant-folding");
        assert_eq!(Pass::Licm.to_string(), "licm");
    }
}
