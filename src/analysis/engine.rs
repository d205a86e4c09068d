//! The work-list fixed-point engine.
//!
//! The engine runs one [`Analysis`] over one function: it merges predecessor
//! exit states into block entry states, re-evaluates a block whenever a
//! predecessor's exit state grows, and terminates when the FIFO work-list
//! (deduplicated through a bit set) drains. Domains whose lattice has no
//! ascending chain condition bound the number of per-block re-enqueues; on
//! hitting the bound the block's entry state is collapsed to `⊤`.
//!
//! After the fixed point, [`Results`] keeps the per-block entry states; a
//! visitor replays the transfer functions in source order so passes can
//! observe the state between any two expressions without the engine having
//! to store every intermediate state.

use std::collections::VecDeque;

use bit_set::BitSet;

use crate::types::ir::{BlockId, ExprId, Func};
use crate::{Idx, IdxVec};

/// An abstract-interpretation lattice value.
pub trait AbstractDomain: Clone {
  /// Join `other` into `self`; returns whether `self` changed.
  fn join(&mut self, other: &Self) -> bool;
}

/// One dataflow analysis over one function. The analysis object owns the
/// references it needs (function, package, types, diagnostics) and the
/// engine drives it through this interface.
pub trait Analysis {
  /// The lattice the analysis computes over.
  type Domain: AbstractDomain;

  /// The analysis name, for logging.
  const NAME: &'static str;

  /// The per-block re-enqueue cap, for domains whose lattice has no
  /// ascending chain condition. `None` means the lattice height alone
  /// bounds the iteration.
  fn block_limit(&self) -> Option<u32> { None }

  /// The state on entry to the function: parameters are `⊤` unless the
  /// domain specialises them.
  fn initial_state(&mut self, func: &Func) -> Self::Domain;

  /// Collapse a state to `⊤`, used when the re-enqueue cap is hit.
  fn collapse_to_top(&self, state: &mut Self::Domain);

  /// Apply the effect of a non-terminator expression.
  fn transfer_expr(&mut self, state: &mut Self::Domain, func: &Func, expr: ExprId);

  /// Apply the effect of a terminator. Returning `Some(block)` asserts that
  /// only that successor is reachable in the current state.
  fn transfer_terminator(
    &mut self, state: &mut Self::Domain, func: &Func, expr: ExprId,
  ) -> Option<BlockId>;

  /// Refine the state propagated along the edge `term -> succ`, e.g. branch
  /// condition narrowing. The default does nothing.
  fn refine_on_edge(&mut self, _state: &mut Self::Domain, _func: &Func, _term: ExprId, _succ: BlockId) {}
}

/// The fixed-point results of one analysis over one function: the entry
/// state of every reached block, plus the analysis object used to replay
/// transfers.
pub struct Results<A: Analysis> {
  analysis: A,
  entry_states: IdxVec<BlockId, Option<A::Domain>>,
}

impl<A: Analysis> Results<A> {
  /// The entry state of `block`, if the block was reached.
  #[must_use] pub fn entry_state(&self, block: BlockId) -> Option<&A::Domain> {
    self.entry_states[block].as_ref()
  }

  /// Whether `block` was reached by the analysis.
  #[must_use] pub fn is_reachable(&self, block: BlockId) -> bool {
    self.entry_states[block].is_some()
  }

  /// Walk every reached block of the function body in source order,
  /// replaying the transfer functions. `before_expr`/`after_expr` observe
  /// the state around each non-terminator expression (with its index in the
  /// block), and `on_terminator` observes the final state together with the
  /// known successor, if the terminator has one.
  pub fn visit_with(
    &mut self, func: &Func,
    mut before_expr: impl FnMut(&A::Domain, ExprId, usize),
    mut after_expr: impl FnMut(&A::Domain, ExprId, usize),
    mut on_terminator: impl FnMut(&A::Domain, ExprId, Option<BlockId>),
  ) {
    for &bb in &func.groups[func.body].blocks {
      let Some(entry) = &self.entry_states[bb] else { continue };
      let mut state = entry.clone();
      let term = func.terminator_of(bb);
      for (index, &expr) in func.blocks[bb].exprs.iter().enumerate() {
        if Some(expr) == term {
          let known = self.analysis.transfer_terminator(&mut state, func, expr);
          on_terminator(&state, expr, known);
        } else {
          before_expr(&state, expr, index);
          self.analysis.transfer_expr(&mut state, func, expr);
          after_expr(&state, expr, index);
        }
      }
    }
  }

  /// The analysis object, for result queries that need it.
  #[must_use] pub fn analysis(&self) -> &A { &self.analysis }

  /// The state at the function's `EXIT` terminator, replayed from the entry
  /// states. `None` when no reachable block exits.
  #[must_use] pub fn state_at_exit(&mut self, func: &Func) -> Option<A::Domain> {
    let mut out = None;
    self.visit_with(
      func,
      |_, _, _| {},
      |_, _, _| {},
      |state, term, _| {
        use crate::types::ir::Terminator;
        if matches!(func.exprs[term].as_terminator(), Some(Terminator::Exit)) {
          out = Some(state.clone());
        }
      },
    );
    out
  }
}

/// The engine itself; create one per (function, analysis) pair and run
/// [`Engine::iterate_to_fixpoint`].
pub struct Engine<'f, A: Analysis> {
  func: &'f Func,
  analysis: A,
}

impl<'f, A: Analysis> Engine<'f, A> {
  /// Create an engine for `func`.
  #[must_use] pub fn new(func: &'f Func, analysis: A) -> Self { Self { func, analysis } }

  /// Run the work-list iteration to a fixed point and return the results.
  #[must_use] pub fn iterate_to_fixpoint(mut self) -> Results<A> {
    let func = self.func;
    let n_blocks = func.blocks.len();
    let mut entry_states: IdxVec<BlockId, Option<A::Domain>> =
      IdxVec::from_fn(n_blocks, || None);
    let mut enqueue_counts: IdxVec<BlockId, u32> = IdxVec::from_fn(n_blocks, || 0);
    let mut worklist = VecDeque::new();
    let mut in_queue = BitSet::with_capacity(n_blocks);

    let entry = func.entry_block();
    entry_states[entry] = Some(self.analysis.initial_state(func));
    worklist.push_back(entry);
    in_queue.insert(entry.into_usize());

    while let Some(bb) = worklist.pop_front() {
      in_queue.remove(bb.into_usize());
      let mut state = entry_states[bb].clone().expect("queued block has a state");

      let term = func.terminator_of(bb);
      let mut known_succ = None;
      for &expr in &func.blocks[bb].exprs {
        if Some(expr) == term {
          known_succ = self.analysis.transfer_terminator(&mut state, func, expr);
        } else {
          self.analysis.transfer_expr(&mut state, func, expr);
        }
      }

      let successors = match term {
        Some(term_id) => {
          let all = func.exprs[term_id].as_terminator().expect("terminator").successors();
          match known_succ {
            Some(succ) => vec![succ],
            None => all.into_vec(),
          }
        }
        None => vec![],
      };

      for succ in successors {
        let mut edge_state = state.clone();
        if let Some(term_id) = term {
          self.analysis.refine_on_edge(&mut edge_state, func, term_id, succ);
        }
        let changed = match &mut entry_states[succ] {
          Some(existing) => existing.join(&edge_state),
          slot @ None => {
            *slot = Some(edge_state);
            true
          }
        };
        if changed && in_queue.insert(succ.into_usize()) {
          enqueue_counts[succ] += 1;
          if let Some(limit) = self.analysis.block_limit() {
            if enqueue_counts[succ] >= limit {
              // Give up on precision for this block so iteration terminates.
              log::trace!(
                "[{}] block {succ} hit the re-enqueue cap, collapsing to top", A::NAME
              );
              let state = entry_states[succ].as_mut().expect("joined above");
              self.analysis.collapse_to_top(state);
            }
          }
          worklist.push_back(succ);
        }
      }
    }

    Results { analysis: self.analysis, entry_states }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builder::{CHIRContext, FuncBuilder};
  use crate::intern;
  use crate::types::TypeStore;
  use crate::types::ir::Literal;

  /// A toy domain counting how many times each block was entered, capped to
  /// show the collapse behaviour: the "value" is the number of loop
  /// traversals observed, `u32::MAX` is top.
  #[derive(Clone, PartialEq)]
  struct Count(u32);

  impl AbstractDomain for Count {
    fn join(&mut self, other: &Self) -> bool {
      let new = self.0.max(other.0);
      let changed = new != self.0;
      self.0 = new;
      changed
    }
  }

  struct CountAnalysis;

  impl Analysis for CountAnalysis {
    type Domain = Count;
    const NAME: &'static str = "count-analysis";
    fn block_limit(&self) -> Option<u32> { Some(4) }
    fn initial_state(&mut self, _: &Func) -> Count { Count(0) }
    fn collapse_to_top(&self, state: &mut Count) { state.0 = u32::MAX }
    fn transfer_expr(&mut self, _: &mut Count, _: &Func, _: ExprId) {}
    fn transfer_terminator(&mut self, state: &mut Count, _: &Func, _: ExprId) -> Option<BlockId> {
      if state.0 != u32::MAX { state.0 += 1 }
      None
    }
  }

  #[test]
  fn loop_terminates_via_block_limit() {
    let ctx = CHIRContext::default();
    let mut fb = FuncBuilder::new(&ctx, intern("looping"), vec![], TypeStore::UNIT);
    let header = fb.new_block();
    let exit = fb.new_block();
    fb.goto(header);
    fb.switch_to(header);
    let cond = fb.constant(Literal::Bool(true));
    fb.branch(cond, header, exit);
    fb.switch_to(exit);
    fb.exit(None);
    let func = fb.finish();

    let results = Engine::new(&func, CountAnalysis).iterate_to_fixpoint();
    // the header was collapsed to top rather than iterated forever
    assert_eq!(results.entry_state(header).unwrap().0, u32::MAX);
  }

  #[test]
  fn straight_line_visits_all_blocks() {
    let ctx = CHIRContext::default();
    let mut fb = FuncBuilder::new(&ctx, intern("straight"), vec![], TypeStore::UNIT);
    let b1 = fb.new_block();
    let b2 = fb.new_block();
    fb.goto(b1);
    fb.switch_to(b1);
    fb.goto(b2);
    fb.switch_to(b2);
    fb.exit(None);
    let func = fb.finish();

    let results = Engine::new(&func, CountAnalysis).iterate_to_fixpoint();
    assert!(results.is_reachable(b1));
    assert!(results.is_reachable(b2));
    assert_eq!(results.entry_state(b2).unwrap().0, 2);
  }
}
