//! The pass pipeline: the ordering the compiler driver runs the CHIR
//! analyses and transformations in.
//!
//! Analyses run twice. The first (stable) phase runs both analyses over the
//! source-faithful IR to emit diagnostics exactly once; the second
//! (optimisation) phase re-runs them with diagnostics suppressed and folds
//! constants, propagates ranges and prunes branches. The structural passes
//! follow: SanitizerCoverage, unused-import pruning and extend-def
//! synthesis.

use crate::analysis::const_analysis::run_const_analysis;
use crate::analysis::range_analysis::run_range_analysis;
use crate::builder::CHIRContext;
use crate::diag::DiagAdapter;
use crate::transform::sancov::{SanitizerCoverage, SanitizerCoverageOptions};
use crate::transform::{
  const_propagation, dead_code::DeadCodeElimination, no_side_effect, range_propagation,
  unused_imports, OptEffectMap,
};
use crate::types::ir::Package;

/// Pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
  /// Worker threads for the parallel analyses.
  pub threads: usize,
  /// Run the optimisation phase (constant/range propagation, DCE).
  pub enable_opt: bool,
  /// Record effect maps for incremental recompilation.
  pub enable_incre: bool,
  /// Emit the unused-code warnings.
  pub report_unused: bool,
  /// SanitizerCoverage configuration; disabled by default.
  pub sancov: SanitizerCoverageOptions,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self {
      threads: crate::task_queue::default_threads(),
      enable_opt: true,
      enable_incre: false,
      report_unused: true,
      sancov: SanitizerCoverageOptions::default(),
    }
  }
}

/// What the pipeline hands back to the driver besides the transformed
/// package.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
  /// Globals-to-functions effect map from constant propagation.
  pub const_effect_map: OptEffectMap,
  /// Globals-to-functions effect map from range propagation.
  pub range_effect_map: OptEffectMap,
  /// Number of pruned imported declarations.
  pub pruned_imports: usize,
  /// Whether the SanitizerCoverage configuration was valid.
  pub sancov_ok: bool,
}

/// Run the full pass pipeline over `package`.
pub fn run_passes(
  package: &mut Package, ctx: &CHIRContext, diag: &DiagAdapter, opts: &PipelineOptions,
) -> PipelineOutcome {
  let mut outcome = PipelineOutcome { sancov_ok: true, ..PipelineOutcome::default() };
  let types = &ctx.types;
  let dce = DeadCodeElimination::new(types, diag);

  no_side_effect::run_on_package(package);

  // Stable (checking) phase first, over the source-faithful IR: both
  // analyses emit their diagnostics exactly once, and the branch warnings
  // come from constant facts before any pruning rewrites the terminators.
  {
    let mut wrapper = run_const_analysis(package, types, diag, opts.threads, true);
    dce.unreachable_branch_warning(package, &mut wrapper);
  }
  {
    let _wrapper = run_range_analysis(package, types, diag, opts.threads, true);
  }
  if opts.report_unused {
    dce.report_unused_code(package);
  }

  if opts.enable_opt {
    // Optimisation phase: the analyses run again with diagnostics
    // suppressed and their results drive the rewrites.
    let const_plan = {
      let mut wrapper = run_const_analysis(package, types, diag, opts.threads, false);
      const_propagation::collect(package, types, &mut wrapper, opts.enable_incre)
    };
    outcome.const_effect_map = const_plan.effect_map.clone();
    let sweep = const_plan.apply(package);
    dce.unreachable_block_elimination_for(package, &sweep);
    dce.useless_expr_elimination(package);
    dce.nothing_type_expr_elimination(package);

    let range_plan = {
      let mut wrapper = run_range_analysis(package, types, diag, opts.threads, false);
      range_propagation::collect(package, types, &mut wrapper, opts.enable_incre)
    };
    outcome.range_effect_map = range_plan.effect_map.clone();
    let sweep = range_plan.apply(package);
    dce.unreachable_block_elimination_for(package, &sweep);
    dce.useless_expr_elimination(package);
    dce.useless_func_elimination(package);
  }

  if opts.sancov.is_enabled() {
    let mut sancov = SanitizerCoverage::new(opts.sancov.clone(), types);
    outcome.sancov_ok = sancov.run_on_package(package, diag);
  }

  outcome.pruned_imports = unused_imports::remove_unused_imports(package, types, opts.enable_incre);
  unused_imports::synthesize_missing_extends(package, types);

  outcome
}
