//! The CHIR transformation passes: propagation of analysis results, dead
//! code elimination, no-side-effect marking, SanitizerCoverage
//! instrumentation and unused-import pruning.
//!
//! Analysis results borrow the package immutably, so every propagation pass
//! works in two steps: while the results are alive it *collects* a
//! [`RewritePlan`]; once they are dropped the plan is *applied* against the
//! mutable package. The collected plan is pure data, so collection per
//! function could run in parallel; the effect map it carries is
//! mutex-guarded for exactly that reason.

pub mod const_propagation;
pub mod dead_code;
pub mod no_side_effect;
pub mod range_propagation;
pub mod sancov;
pub mod unused_imports;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::types::ir::{
  BlockId, ExprFlags, ExprId, ExprKind, Expression, FuncId, GlobalVarId, Literal, Package,
  Terminator, Value,
};

/// Which global vars feed which functions; incremental recompilation reads
/// this to find the functions invalidated by a changed global.
pub type OptEffectMap = HashMap<GlobalVarId, HashSet<FuncId>>;

/// A thread-safe effect-map accumulator. Writes are rare, so one mutex over
/// the whole map is enough.
#[derive(Debug, Default)]
pub struct EffectMap(Mutex<OptEffectMap>);

impl EffectMap {
  /// Record that `func` consumed the value of `gv`.
  pub fn record(&self, gv: GlobalVarId, func: FuncId) {
    self.0.lock().entry(gv).or_default().insert(func);
  }

  /// Take the accumulated map.
  #[must_use] pub fn into_inner(self) -> OptEffectMap { self.0.into_inner() }
}

/// One planned rewrite of an expression to a `Constant`.
#[derive(Clone, Debug)]
pub struct ConstRewrite {
  /// The function the expression is in.
  pub func: FuncId,
  /// The expression to rewrite.
  pub expr: ExprId,
  /// The literal the expression is known to produce.
  pub literal: Literal,
}

/// One planned use-replacement: every use of `expr`'s result is replaced by
/// the semantically equal `with`.
#[derive(Clone, Debug)]
pub struct UseReplacement {
  /// The function the expression is in.
  pub func: FuncId,
  /// The expression whose result is replaced.
  pub expr: ExprId,
  /// The replacement value.
  pub with: Value,
}

/// One planned terminator rewrite to `GOTO`; `*WithException` terminators
/// with a known result additionally become a `Constant`.
#[derive(Clone, Debug)]
pub struct GotoRewrite {
  /// The function the terminator is in.
  pub func: FuncId,
  /// The terminator expression.
  pub term: ExprId,
  /// The known result, for `*WithException` terminators.
  pub literal: Option<Literal>,
  /// The surviving successor.
  pub target: BlockId,
}

/// The outcome of a propagation pass's collection step.
#[derive(Debug, Default)]
pub struct RewritePlan {
  /// Expressions to rewrite to constants.
  pub const_rewrites: Vec<ConstRewrite>,
  /// Results to replace by an operand.
  pub use_replacements: Vec<UseReplacement>,
  /// Terminators to rewrite to `GOTO`.
  pub goto_rewrites: Vec<GotoRewrite>,
  /// Arithmetic proved overflow-free, to be flagged `NEVER_OVERFLOW`.
  pub never_overflow: Vec<(FuncId, ExprId)>,
  /// VArray accesses proved in-bounds, losing `NEED_CHECK_ARRAY_BOUND`.
  pub clear_bounds_check: Vec<(FuncId, ExprId)>,
  /// Functions whose CFG now has unreachable blocks to remove.
  pub funcs_need_remove_blocks: Vec<FuncId>,
  /// The globals-to-functions effect map.
  pub effect_map: OptEffectMap,
}

impl RewritePlan {
  /// Whether the plan does nothing.
  #[must_use] pub fn is_empty(&self) -> bool {
    self.const_rewrites.is_empty()
      && self.use_replacements.is_empty()
      && self.goto_rewrites.is_empty()
      && self.never_overflow.is_empty()
      && self.clear_bounds_check.is_empty()
  }

  /// Apply the plan to the package. Returns the functions that need an
  /// unreachable-block sweep afterwards.
  pub fn apply(self, package: &mut Package) -> Vec<FuncId> {
    for rw in self.const_rewrites {
      let func = &mut package.funcs[rw.func];
      let expr = &mut func.exprs[rw.expr];
      log::debug!(
        "[propagation] {} at {} rewritten to a constant", expr.kind.name(), expr.loc
      );
      expr.kind = ExprKind::Constant;
      expr.operands = SmallVec::from_slice(&[Value::Literal(rw.literal)]);
    }

    for rw in self.use_replacements {
      let func = &mut package.funcs[rw.func];
      log::debug!(
        "[propagation] uses of {} at {} replaced by an operand",
        func.exprs[rw.expr].kind.name(), func.exprs[rw.expr].loc
      );
      func.replace_value(Value::Local(rw.expr), rw.with);
    }

    for rw in self.goto_rewrites {
      let func = &mut package.funcs[rw.func];
      let expr = &mut func.exprs[rw.term];
      log::debug!("[propagation] terminator at {} optimised to GOTO", expr.loc);
      if let Some(lit) = rw.literal {
        // keep the result id alive as a constant, then jump directly
        let block = expr.block;
        let loc = expr.loc;
        expr.kind = ExprKind::Constant;
        expr.operands = SmallVec::from_slice(&[Value::Literal(lit)]);
        let term = Expression {
          kind: ExprKind::Terminator(Terminator::Goto(rw.target)),
          operands: SmallVec::new(),
          ty: crate::types::TypeStore::UNIT,
          block,
          loc,
          flags: ExprFlags::default(),
        };
        func.append_expr(block, term);
      } else {
        expr.kind = ExprKind::Terminator(Terminator::Goto(rw.target));
        expr.operands.clear();
      }
    }

    for (fid, expr) in self.never_overflow {
      package.funcs[fid].exprs[expr].flags.insert(ExprFlags::NEVER_OVERFLOW);
    }
    for (fid, expr) in self.clear_bounds_check {
      package.funcs[fid].exprs[expr].flags.remove(ExprFlags::NEED_CHECK_ARRAY_BOUND);
    }

    self.funcs_need_remove_blocks
  }
}
