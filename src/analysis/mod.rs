//! The CHIR dataflow analyses: the domain algebra, the fixed-point engine,
//! the value-analysis framework, and the two concrete analyses built on it.

pub mod bool_domain;
pub mod const_analysis;
pub mod constant_range;
pub mod engine;
pub mod range_analysis;
pub mod sint;
pub mod sint_domain;
pub mod value;

use engine::{Analysis, Engine, Results};
use hashbrown::HashMap;

use crate::task_queue::TaskQueue;
use crate::types::ir::{Func, FuncId, Package};

/// The per-package result store of one analysis: fixed-point results keyed
/// by function.
pub struct AnalysisWrapper<A: Analysis> {
  results: HashMap<FuncId, Results<A>>,
}

impl<A: Analysis> Default for AnalysisWrapper<A> {
  fn default() -> Self { Self { results: HashMap::new() } }
}

impl<A: Analysis> AnalysisWrapper<A> {
  /// An empty wrapper.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// The analysis result for `func`, if it was analysed.
  #[must_use] pub fn check_func_result(&self, func: FuncId) -> Option<&Results<A>> {
    self.results.get(&func)
  }

  /// Mutable access, needed to replay transfers through
  /// [`Results::visit_with`].
  #[must_use] pub fn check_func_result_mut(&mut self, func: FuncId) -> Option<&mut Results<A>> {
    self.results.get_mut(&func)
  }

  /// Whether `func` has a recorded result.
  #[must_use] pub fn contains(&self, func: FuncId) -> bool { self.results.contains_key(&func) }

  /// Record a result computed outside the parallel phase (init functions).
  pub fn insert(&mut self, func: FuncId, results: Results<A>) {
    self.results.insert(func, results);
  }

  /// Drop every recorded result.
  pub fn invalidate_all_analysis_results(&mut self) { self.results.clear() }

  /// Drop the result of `func`, returning whether one was recorded.
  pub fn invalidate_analysis_result(&mut self, func: FuncId) -> bool {
    self.results.remove(&func).is_some()
  }

  /// Analyse every eligible function of `package` that has no recorded
  /// result yet, in parallel on `threads` workers; each function is one
  /// task, weighted by its block count. The factory builds the analysis
  /// object for one function; it runs on the worker threads.
  pub fn run_on_package<'env>(
    &mut self, package: &'env Package, threads: usize,
    factory: impl Fn(FuncId, &'env Func) -> A + Send + Sync,
  ) where A: Send, A::Domain: Send, Self: 'env {
    let mut queue = TaskQueue::new(threads);
    let mut pending = vec![];
    for (fid, func) in package.funcs.enum_iter() {
      if self.contains(fid) || !value::should_be_analysed(func) { continue }
      let factory = &factory;
      let task = queue.add_task(func.block_count() as u64, move || {
        Engine::new(func, factory(fid, func)).iterate_to_fixpoint()
      });
      pending.push((fid, task));
    }
    queue.run_and_wait();
    for (fid, task) in pending {
      self.results.insert(fid, task.take());
    }
  }
}
