//! Integer range analysis: per-expression value ranges with symbolic bounds,
//! branch narrowing, and the VArray bounds proving that lets the compiler
//! drop runtime checks.
//!
//! The domain has no ascending chain condition once symbolic bounds widen,
//! so each block is re-enqueued at most [`MAX_INQUEUE_TIMES`] times before
//! its state collapses to `⊤`.

use crate::analysis::bool_domain::BoolDomain;
use crate::analysis::constant_range::{ConstantRange, RelationalOperation};
use crate::analysis::engine::{Analysis, Engine};
use crate::analysis::sint::SInt;
use crate::analysis::sint_domain::{
  compute_arithmetic_binop, compute_equality_bool_binop, compute_rel_int_binop,
  compute_type_cast_numeric_bound, numeric_conversion, rel_of_binop, ArithmeticBinopArgs,
  RelIntBinopArgs, SIntDomain, SymbolicBoundsMap,
};
use crate::analysis::value::{
  should_be_analysed, AbstractValue, GlobalStateStore, State, ValueFrame,
};
use crate::analysis::AnalysisWrapper;
use crate::diag::{DiagAdapter, DiagKind};
use crate::overflow;
use crate::types::ir::{
  Attribute, BinOp, BlockId, ExprId, ExprKind, Func, IntrinsicKind, Literal, Package, Terminator,
  Value,
};
use crate::types::{IntWidth, OverflowStrategy, Ty, TypeKind, Types};

use if_chain::if_chain;

/// A block is re-enqueued at most this many times before its state is
/// cleared; this bounds the monotone widening of symbolic bounds.
pub const MAX_INQUEUE_TIMES: u32 = 4;

/// The abstract value of the range analysis.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueRange {
  /// A boolean range.
  Bool(BoolDomain),
  /// An integer range.
  SInt(SIntDomain),
}

impl AbstractValue for ValueRange {
  fn join(&self, other: &Self) -> Option<Self> {
    match (self, other) {
      (Self::Bool(a), Self::Bool(b)) => {
        let joined = BoolDomain::union(*a, *b);
        joined.is_non_trivial().then_some(Self::Bool(joined))
      }
      (Self::SInt(a), Self::SInt(b)) => {
        let joined = SIntDomain::unions(a, b);
        joined.is_non_trivial().then_some(Self::SInt(joined))
      }
      _ => None,
    }
  }
}

/// Resolve a literal operand to a [`ValueRange`].
#[must_use] pub fn range_of_literal(lit: Literal, _types: &Types) -> Option<ValueRange> {
  match lit {
    Literal::Bool(b) => Some(ValueRange::Bool(BoolDomain::from_bool(b))),
    Literal::Int(ity, bits) => Some(ValueRange::SInt(SIntDomain::from_literal(ity, bits))),
    _ => None,
  }
}

/// Whether the range analysis can say anything about values of `ty`.
fn can_analyse(types: &Types, ty: Ty) -> bool {
  types.is_integer(ty) || types.is_boolean(ty)
}

/// The range analysis over one function.
pub struct RangeAnalysis<'a> {
  frame: ValueFrame<'a, ValueRange>,
  diag: &'a DiagAdapter,
  is_stable: bool,
  /// VArray accesses proved in-bounds; the propagation pass clears their
  /// `NEED_CHECK_ARRAY_BOUND` attribute.
  proved_in_bounds: Vec<ExprId>,
}

impl<'a> RangeAnalysis<'a> {
  /// Create the analysis for one function run.
  #[must_use] pub fn new(
    package: &'a Package, types: &'a Types, diag: &'a DiagAdapter, is_stable: bool,
    global_state: State<ValueRange>,
  ) -> Self {
    let mut frame = ValueFrame::new(package, types, range_of_literal);
    frame.global_state = global_state;
    Self { frame, diag, is_stable, proved_in_bounds: vec![] }
  }

  /// The VArray accesses proved in-bounds.
  #[must_use] pub fn proved_in_bounds(&self) -> &[ExprId] { &self.proved_in_bounds }

  fn types(&self) -> &'a Types { self.frame.types }

  fn value_ty(&self, func: &Func, v: Value) -> Ty {
    self.frame.package.value_ty(func, v, self.types())
  }

  /// The boolean range of `v`, `⊤` when nothing is known.
  #[must_use] pub fn bool_domain_of(&self, state: &State<ValueRange>, func: &Func, v: Value) -> BoolDomain {
    if !self.types().is_boolean(self.value_ty(func, v)) {
      return BoolDomain::TOP
    }
    match self.frame.abs_value(state, v) {
      Some(ValueRange::Bool(d)) => d,
      _ => BoolDomain::TOP,
    }
  }

  /// The integer range of `v`, the full range of its type when nothing is
  /// known.
  #[must_use] pub fn sint_domain_of(&self, state: &State<ValueRange>, func: &Func, v: Value) -> SIntDomain {
    let ty = self.value_ty(func, v);
    let ity = self.types().as_int(ty).expect("integer-typed value");
    match self.frame.abs_value(state, v) {
      Some(ValueRange::SInt(d)) => d,
      _ => SIntDomain::top(ity.width, !ity.signed),
    }
  }

  fn is_unsigned_arithmetic(&self, func: &Func, id: ExprId) -> bool {
    let expr = &func.exprs[id];
    self.types().is_unsigned_integer(self.value_ty(func, expr.operands[0]))
  }

  // =============== Binary expressions ===============

  /// Both operands are single values: compute the scalar operation with the
  /// expression's overflow strategy, diagnosing exactly like the constant
  /// analysis does.
  fn check_single_value_overflow(
    &mut self, func: &Func, id: ExprId, op: BinOp, ov: OverflowStrategy,
    ld: &SIntDomain, rd: &SIntDomain,
  ) -> (SIntDomain, ExceptionKind) {
    let expr = &func.exprs[id];
    let width = ld.width();
    let uns = ld.is_unsigned();
    let ity = self.types().as_int(expr.ty).expect("integer type");

    let l = ld.numeric_bound().single_element();
    let r = rd.numeric_bound().single_element();

    if matches!(op, BinOp::Div | BinOp::Mod) && r.uval() == 0 {
      if self.is_stable {
        let prompt = if op == BinOp::Div { "divide" } else { "modulo" };
        self.diag.diagnose(DiagKind::DivisorIsZero, expr.loc).main_hint(prompt);
      }
      return (SIntDomain::top(width, uns), ExceptionKind::Fail)
    }

    let (res, ovf) = if uns {
      overflow::uint_binop(ity, op, l.uval(), r.uval(), ov)
    } else {
      overflow::int_binop(ity, op, l.sval(), r.sval(), ov)
    };
    if ovf && ov == OverflowStrategy::Throwing {
      if self.is_stable {
        let ty_str = self.types().to_string(expr.ty);
        let rhs_ty = self.types().to_string(self.value_ty(func, expr.operands[1]));
        let fmt = |v: SInt| if uns { v.uval().to_string() } else { v.sval().to_string() };
        self
          .diag
          .diagnose(DiagKind::ArithmeticOperatorOverflow, expr.loc)
          .main_hint(op.token())
          .main_hint(format!("{ty_str}({}) {} {rhs_ty}({})", fmt(l), op.token(), fmt(r)))
          .note(format!(
            "range of {ty_str} is {} ~ {}", ity.min_value(), ity.max_value()
          ));
      }
      return (SIntDomain::top(width, uns), ExceptionKind::Fail)
    }
    (
      SIntDomain::new(ConstantRange::single(SInt::new(width, res)), uns),
      if ovf { ExceptionKind::Na } else { ExceptionKind::Success },
    )
  }

  fn handle_binary(
    &mut self, state: &mut State<ValueRange>, func: &Func, id: ExprId,
    op: BinOp, ov: OverflowStrategy,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    let (lhs, rhs) = (expr.operands[0], expr.operands[1]);
    if !can_analyse(self.types(), expr.ty)
      || !can_analyse(self.types(), self.value_ty(func, lhs))
      || !can_analyse(self.types(), self.value_ty(func, rhs))
    {
      state.set_to_top(id);
      return ExceptionKind::Na
    }

    if self.types().is_integer(expr.ty) {
      if !op.is_basic_arithmetic() {
        state.set_to_top(id);
        return ExceptionKind::Na
      }
      let ld = self.sint_domain_of(state, func, lhs);
      let rd = self.sint_domain_of(state, func, rhs);
      let uns = self.is_unsigned_arithmetic(func, id);
      if ld.is_single_value() && rd.is_single_value() {
        let (domain, ek) = self.check_single_value_overflow(func, id, op, ov, &ld, &rd);
        state.update(id, ValueRange::SInt(domain));
        return ek
      }
      let res = compute_arithmetic_binop(&ArithmeticBinopArgs {
        ld: &ld, rd: &rd, l: Some(lhs), r: Some(rhs), op, ov, uns,
      });
      if res.is_non_trivial() {
        state.update(id, ValueRange::SInt(res));
        return ExceptionKind::Na
      }
    }

    if self.types().is_boolean(expr.ty) {
      let res = self.bool_range_of_binop(state, func, id, op);
      if res.is_non_trivial() {
        state.update(id, ValueRange::Bool(res));
        return ExceptionKind::Na
      }
    }

    state.set_to_top(id);
    ExceptionKind::Na
  }

  fn bool_range_of_binop(
    &mut self, state: &State<ValueRange>, func: &Func, id: ExprId, op: BinOp,
  ) -> BoolDomain {
    let expr = &func.exprs[id];
    let (lhs, rhs) = (expr.operands[0], expr.operands[1]);
    if self.types().is_integer(self.value_ty(func, lhs)) {
      let ld = self.sint_domain_of(state, func, lhs);
      let rd = self.sint_domain_of(state, func, rhs);
      let uns = self.is_unsigned_arithmetic(func, id);
      return compute_rel_int_binop(&RelIntBinopArgs {
        ld: &ld, rd: &rd, l: Some(lhs), r: Some(rhs), op, uns,
      })
    }
    if self.types().is_boolean(self.value_ty(func, lhs)) {
      let ld = self.bool_domain_of(state, func, lhs);
      let rd = self.bool_domain_of(state, func, rhs);
      return compute_equality_bool_binop(ld, rd, op)
    }
    BoolDomain::TOP
  }

  // =============== TypeCast ===============

  /// Convert the numeric bound; preserve symbolic bounds only across a cast
  /// that cannot change relative order (unsigned to signed, non-truncating,
  /// with both sides known non-negative).
  fn handle_typecast(
    &mut self, state: &mut State<ValueRange>, func: &Func, id: ExprId, ov: OverflowStrategy,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    let src = expr.operands[0];
    let src_ty = self.value_ty(func, src);
    if !self.types().is_integer(src_ty) || !self.types().is_integer(expr.ty) {
      state.set_to_top_or_top_ref(id, self.types().is_ref(expr.ty));
      return ExceptionKind::Na
    }
    let dst_ity = self.types().as_int(expr.ty).expect("integer type");
    let v = self.sint_domain_of(state, func, src);
    let numeric = compute_type_cast_numeric_bound(&v, dst_ity.width, !dst_ity.signed, ov);

    if dst_ity.width < v.width()
      || v.is_unsigned()
      || dst_ity.signed
      || ov == OverflowStrategy::Saturating
      || numeric.smin_value().slt(SInt::zero(dst_ity.width))
    {
      state.update(id, ValueRange::SInt(SIntDomain::new(numeric, !dst_ity.signed)));
      return ExceptionKind::Na
    }

    // a signed source cast to an unsigned destination of the same or larger
    // width, proven non-negative: a symbolic bound a<b survives when both
    // sides are known non-negative
    let mut preserved = SymbolicBoundsMap::new();
    for (&sym, bound) in v.symbolic_bounds() {
      if_chain! {
        if let Some(ValueRange::SInt(sym_range)) = self.frame.abs_value(state, sym);
        if sym_range.numeric_bound().smin_value().sge(SInt::zero(sym_range.width()));
        then {
          // this conversion can never wrap, so Throwing gives the exact bound
          let converted = numeric_conversion(
            bound, dst_ity.width, false, false, OverflowStrategy::Throwing,
          );
          if converted.is_non_trivial() {
            preserved.insert(sym, converted);
          }
        }
      }
    }
    preserved.insert(src, ConstantRange::single(SInt::zero(dst_ity.width)));
    state.update(
      id,
      ValueRange::SInt(SIntDomain::with_symbolics(numeric, preserved, !dst_ity.signed)),
    );
    ExceptionKind::Na
  }

  // =============== VArray bounds ===============

  fn varray_sizes(&self, func: &Func, arr: Value) -> Vec<u64> {
    let mut sizes = vec![];
    let mut ty = self.types().deref(self.value_ty(func, arr));
    while let Some((elem, size)) = self.types().as_varray(ty) {
      sizes.push(size);
      ty = elem;
    }
    sizes
  }

  fn check_varray_index(
    &mut self, state: &State<ValueRange>, func: &Func, id: ExprId, kind: IntrinsicKind,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    let begin = match kind {
      IntrinsicKind::VArrayGet => 1,
      IntrinsicKind::VArraySet => 2,
      _ => return ExceptionKind::Na,
    };
    if expr.operands.len() <= begin { return ExceptionKind::Na }
    let sizes = self.varray_sizes(func, expr.operands[0]);
    if sizes.len() < expr.operands.len() - begin { return ExceptionKind::Na }

    let mut all_proved = true;
    let mut failed = false;
    for (dim, &index) in expr.operands[begin..].iter().enumerate() {
      let size = sizes[dim];
      let index_range = self.sint_domain_of(state, func, index);
      if index_range.is_top() {
        all_proved = false;
        continue
      }
      let size_node =
        SIntDomain::new(ConstantRange::single(SInt::new(IntWidth::W64, size)), false);
      let zero_node =
        SIntDomain::new(ConstantRange::single(SInt::zero(IntWidth::W64)), false);
      let lt_upper = compute_rel_int_binop(&RelIntBinopArgs {
        ld: &index_range, rd: &size_node, l: Some(index), r: None, op: BinOp::Lt, uns: false,
      });
      let ge_lower = compute_rel_int_binop(&RelIntBinopArgs {
        ld: &index_range, rd: &zero_node, l: Some(index), r: None, op: BinOp::Ge, uns: false,
      });
      if lt_upper.is_false() || ge_lower.is_false() {
        failed = true;
        if self.is_stable {
          self.diag.diagnose(DiagKind::IdxOutOfBounds, expr.loc).main_hint(format!(
            "range of index {dim} is ({}), however the size of varray is {size}",
            index_range.to_display_string()
          ));
        }
      } else if !(lt_upper.is_true() && ge_lower.is_true()) {
        all_proved = false;
      }
    }
    if failed { return ExceptionKind::Fail }
    if all_proved {
      self.proved_in_bounds.push(id);
      return ExceptionKind::Success
    }
    ExceptionKind::Na
  }

  // =============== Terminators ===============

  fn handle_branch(
    &self, state: &State<ValueRange>, func: &Func, id: ExprId,
    true_bb: BlockId, false_bb: BlockId,
  ) -> Option<BlockId> {
    let cond = self.bool_domain_of(state, func, func.exprs[id].operands[0]);
    if !cond.is_single_value() { return None }
    log::debug!(
      "[RangeAnalysis] branch at {} decided, keeping the {} block",
      func.exprs[id].loc,
      if cond.is_true() { "true" } else { "false" }
    );
    Some(if cond.is_true() { true_bb } else { false_bb })
  }

  fn handle_multibranch(
    &self, state: &State<ValueRange>, func: &Func, id: ExprId,
    default_bb: BlockId, cases: &[(u64, BlockId)],
  ) -> Option<BlockId> {
    let selector = func.exprs[id].operands[0];
    if !self.types().is_integer(self.value_ty(func, selector)) { return None }
    let domain = self.sint_domain_of(state, func, selector);
    if !domain.is_single_value() { return None }
    let val = domain.numeric_bound().single_element().uval();
    for &(case, bb) in cases {
      if case == val { return Some(bb) }
    }
    Some(default_bb)
  }

  /// Narrow the operand ranges of a relational branch condition along an
  /// outgoing edge: on the true edge the relation holds, on the false edge
  /// its complement does. Both the numeric bounds and a symbolic bound
  /// between the two operands are refined.
  fn narrow_branch_edge(
    &mut self, state: &mut State<ValueRange>, func: &Func, term: ExprId, succ: BlockId,
  ) {
    let Some(Terminator::Branch { true_bb, false_bb }) = func.exprs[term].as_terminator()
    else { return };
    let (true_bb, false_bb) = (*true_bb, *false_bb);
    if true_bb == false_bb { return }
    let taken_true = succ == true_bb;
    let cond = func.exprs[term].operands[0];

    // a plain boolean condition pins the condition value itself
    state.update_at(
      crate::analysis::value::StateKey::Value(cond),
      ValueRange::Bool(BoolDomain::from_bool(taken_true)),
    );
    if let Value::Local(cond_expr) = cond {
      let ExprKind::BinaryOp(op, _) = func.exprs[cond_expr].kind.clone() else { return };
      let Some(mut rel) = rel_of_binop(op) else { return };
      if !taken_true {
        rel = rel.negate();
      }
      let (lhs, rhs) = (func.exprs[cond_expr].operands[0], func.exprs[cond_expr].operands[1]);
      if !self.types().is_integer(self.value_ty(func, lhs)) { return }
      self.narrow_operand(state, func, lhs, rhs, rel);
      self.narrow_operand(state, func, rhs, lhs, rel.flip());
    }
  }

  /// Intersect `target`'s range with the set implied by `target rel other`.
  fn narrow_operand(
    &mut self, state: &mut State<ValueRange>, func: &Func, target: Value, other: Value,
    rel: RelationalOperation,
  ) {
    if matches!(target, Value::Literal(_)) { return }
    let target_range = self.sint_domain_of(state, func, target);
    let other_range = self.sint_domain_of(state, func, other);
    let uns = target_range.is_unsigned();
    let signed = !uns;

    // the numeric bound implied by the relation against the other side's
    // extremes
    let numeric = match rel {
      RelationalOperation::Lt =>
        Some(ConstantRange::from(RelationalOperation::Lt, other_range.numeric_bound().max_value(uns), signed)),
      RelationalOperation::Le =>
        Some(ConstantRange::from(RelationalOperation::Le, other_range.numeric_bound().max_value(uns), signed)),
      RelationalOperation::Gt =>
        Some(ConstantRange::from(RelationalOperation::Gt, other_range.numeric_bound().min_value(uns), signed)),
      RelationalOperation::Ge =>
        Some(ConstantRange::from(RelationalOperation::Ge, other_range.numeric_bound().min_value(uns), signed)),
      RelationalOperation::Eq => Some(*other_range.numeric_bound()),
      RelationalOperation::Ne => other_range
        .is_single_value()
        .then(|| ConstantRange::from(RelationalOperation::Ne, other_range.numeric_bound().single_element(), signed)),
    };
    let mut narrowed = match numeric {
      Some(bound) => SIntDomain::intersects(&target_range, &SIntDomain::new(bound, uns)),
      None => target_range,
    };
    // and the symbolic bound `target − other rel 0`
    narrowed = SIntDomain::intersects(
      &narrowed,
      &SIntDomain::from_symbolic(rel, other, narrowed.width(), uns),
    );
    if narrowed.is_non_trivial() {
      state.update_at(
        crate::analysis::value::StateKey::Value(target),
        ValueRange::SInt(narrowed),
      );
    }
  }
}

/// How an expression that may raise behaved under the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExceptionKind {
  Success,
  Fail,
  Na,
}

impl Analysis for RangeAnalysis<'_> {
  type Domain = State<ValueRange>;
  const NAME: &'static str = "range-analysis";

  fn block_limit(&self) -> Option<u32> { Some(MAX_INQUEUE_TIMES) }

  fn initial_state(&mut self, _func: &Func) -> Self::Domain { self.frame.initial_state() }

  fn collapse_to_top(&self, state: &mut Self::Domain) { *state = State::new() }

  fn transfer_expr(&mut self, state: &mut Self::Domain, func: &Func, id: ExprId) {
    if self.frame.transfer_common(state, func, id) { return }
    let kind = func.exprs[id].kind.clone();
    match kind {
      ExprKind::UnaryOp(..) => state.set_to_top(id),
      ExprKind::BinaryOp(op, ov) => {
        let _ = self.handle_binary(state, func, id, op, ov);
      }
      ExprKind::TypeCast(ov) => {
        let _ = self.handle_typecast(state, func, id, ov);
      }
      ExprKind::Intrinsic(kind) => {
        let is_ref = self.types().is_ref(func.exprs[id].ty);
        state.set_to_top_or_top_ref(id, is_ref);
        let _ = self.check_varray_index(state, func, id, kind);
      }
      ExprKind::Apply | ExprKind::Invoke { .. } => {
        let is_ref = self.types().is_ref(func.exprs[id].ty);
        state.set_to_top_or_top_ref(id, is_ref);
      }
      _ => {
        let is_ref = self.types().is_ref(func.exprs[id].ty);
        state.set_to_top_or_top_ref(id, is_ref);
      }
    }
  }

  fn transfer_terminator(
    &mut self, state: &mut Self::Domain, func: &Func, id: ExprId,
  ) -> Option<BlockId> {
    let Some(term) = func.exprs[id].as_terminator().cloned() else { return None };
    let route = |ek: ExceptionKind, ok: BlockId, err: BlockId| match ek {
      ExceptionKind::Success => Some(ok),
      ExceptionKind::Fail => Some(err),
      ExceptionKind::Na => None,
    };
    match term {
      Terminator::Branch { true_bb, false_bb } =>
        self.handle_branch(state, func, id, true_bb, false_bb),
      Terminator::MultiBranch { default_bb, ref cases } =>
        self.handle_multibranch(state, func, id, default_bb, cases),
      Terminator::TypeCastWithException { strategy, ok, err } => {
        let ek = self.handle_typecast(state, func, id, strategy);
        route(ek, ok, err)
      }
      Terminator::IntOpWithException { op, strategy, ok, err } => {
        let ek = self.handle_binary(state, func, id, op, strategy);
        route(ek, ok, err)
      }
      Terminator::IntrinsicWithException { kind, ok, err } => {
        state.set_to_top(id);
        let ek = self.check_varray_index(state, func, id, kind);
        route(ek, ok, err)
      }
      _ => {
        state.set_to_top(id);
        None
      }
    }
  }

  fn refine_on_edge(
    &mut self, state: &mut Self::Domain, func: &Func, term: ExprId, succ: BlockId,
  ) {
    self.narrow_branch_edge(state, func, term, succ);
  }
}

/// Whether a global var is tracked by the range analysis: integers, enums
/// and booleans.
#[must_use] pub fn is_tracked_gv(types: &Types, gv: &crate::types::ir::GlobalVar) -> bool {
  let base = types.deref(gv.ty);
  types.with_kind(base, |k| {
    matches!(k, TypeKind::Int(_) | TypeKind::Enum(..) | TypeKind::Bool)
  })
}

/// Run the range analysis over a package, mirroring the constant analysis
/// driver: serial init-function phase, then parallel per-function analysis.
pub fn run_range_analysis<'a>(
  package: &'a Package, types: &'a Types, diag: &'a DiagAdapter, threads: usize, is_stable: bool,
) -> AnalysisWrapper<RangeAnalysis<'a>> {
  let mut wrapper = AnalysisWrapper::new();
  let mut store: GlobalStateStore<ValueRange> = GlobalStateStore::new();

  for (gvid, gv) in package.globals.enum_iter() {
    if !is_tracked_gv(types, gv) { continue }
    if let Some(lit) = gv.init_literal {
      store.set_global_literal(gvid, types, lit, range_of_literal);
      continue
    }
    if_chain! {
      if gv.attrs.contains(Attribute::READONLY);
      if let Some(init) = gv.init_func;
      if !wrapper.contains(init);
      if should_be_analysed(&package.funcs[init]);
      then {
        let analysis = RangeAnalysis::new(package, types, diag, is_stable, store.snapshot());
        let mut results = Engine::new(&package.funcs[init], analysis).iterate_to_fixpoint();
        if let Some(exit) = results.state_at_exit(&package.funcs[init]) {
          store.absorb(&exit);
        }
        wrapper.insert(init, results);
      }
    }
  }
  store.seal();

  let snapshot = store.snapshot();
  wrapper.run_on_package(package, threads, move |_, _| {
    RangeAnalysis::new(package, types, diag, is_stable, snapshot.clone())
  });
  wrapper
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builder::{CHIRContext, FuncBuilder};
  use crate::intern;
  use crate::types::ir::{Param, ParamId};
  use crate::types::{IntTy, TypeStore};

  fn leak_package(func: Func) -> (&'static Package, crate::types::ir::FuncId) {
    let mut package = Package::new(intern("test"));
    let fid = package.funcs.push(func);
    (Box::leak(Box::new(package)), fid)
  }

  #[test]
  fn narrows_and_proves_varray_access() {
    // fn m(x: Int64) { if (x > 0 && x < 10) { varray.get(x) } }
    // lowered here as two nested branches over a VArray<Int64, 10>
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let varray_ty = ctx.types.intern(TypeKind::VArray { elem: TypeStore::INT64, size: 10 });
    let mut fb = FuncBuilder::new(
      &ctx,
      intern("m"),
      vec![
        Param { ty: TypeStore::INT64, name: intern("x"), loc: Default::default() },
        Param { ty: varray_ty, name: intern("arr"), loc: Default::default() },
      ],
      TypeStore::UNIT,
    );
    let x = Value::Param(ParamId(0));
    let arr = Value::Param(ParamId(1));

    let second = fb.new_block();
    let access = fb.new_block();
    let done = fb.new_block();

    let zero = fb.constant(Literal::Int(IntTy::INT64, 0));
    let gt = fb.binop(BinOp::Gt, OverflowStrategy::Throwing, x, zero, TypeStore::BOOL);
    fb.branch(gt, second, done);

    fb.switch_to(second);
    let ten = fb.constant(Literal::Int(IntTy::INT64, 10));
    let lt = fb.binop(BinOp::Lt, OverflowStrategy::Throwing, x, ten, TypeStore::BOOL);
    fb.branch(lt, access, done);

    fb.switch_to(access);
    let get = fb.intrinsic(IntrinsicKind::VArrayGet, &[arr, x], TypeStore::INT64);
    let Value::Local(get_id) = get else { unreachable!() };
    fb.goto(done);

    fb.switch_to(done);
    fb.exit(None);

    let (package, fid) = leak_package(fb.finish());
    let analysis = RangeAnalysis::new(package, &ctx.types, &diag, true, State::new());
    let results = Engine::new(&package.funcs[fid], analysis).iterate_to_fixpoint();

    assert!(results.analysis().proved_in_bounds().contains(&get_id));
    assert_eq!(diag.count_of(DiagKind::IdxOutOfBounds), 0);
  }

  #[test]
  fn flags_known_out_of_bounds_varray_index() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let varray_ty = ctx.types.intern(TypeKind::VArray { elem: TypeStore::INT64, size: 3 });
    let mut fb = FuncBuilder::new(
      &ctx,
      intern("oob"),
      vec![Param { ty: varray_ty, name: intern("arr"), loc: Default::default() }],
      TypeStore::UNIT,
    );
    let arr = Value::Param(ParamId(0));
    let idx = fb.constant(Literal::Int(IntTy::INT64, 5));
    let _get = fb.intrinsic(IntrinsicKind::VArrayGet, &[arr, idx], TypeStore::INT64);
    fb.exit(None);

    let (package, fid) = leak_package(fb.finish());
    let analysis = RangeAnalysis::new(package, &ctx.types, &diag, true, State::new());
    let _results = Engine::new(&package.funcs[fid], analysis).iterate_to_fixpoint();

    assert_eq!(diag.count_of(DiagKind::IdxOutOfBounds), 1);
  }

  #[test]
  fn branch_narrowing_decides_nested_compare() {
    // if (x < 10) { if (x < 20) { .. } }: the inner branch is decided
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(
      &ctx,
      intern("n"),
      vec![Param { ty: TypeStore::INT64, name: intern("x"), loc: Default::default() }],
      TypeStore::UNIT,
    );
    let x = Value::Param(ParamId(0));
    let inner = fb.new_block();
    let inner_then = fb.new_block();
    let done = fb.new_block();

    let ten = fb.constant(Literal::Int(IntTy::INT64, 10));
    let lt10 = fb.binop(BinOp::Lt, OverflowStrategy::Throwing, x, ten, TypeStore::BOOL);
    fb.branch(lt10, inner, done);

    fb.switch_to(inner);
    let twenty = fb.constant(Literal::Int(IntTy::INT64, 20));
    let lt20 = fb.binop(BinOp::Lt, OverflowStrategy::Throwing, x, twenty, TypeStore::BOOL);
    fb.branch(lt20, inner_then, done);

    fb.switch_to(inner_then);
    fb.exit(None);
    fb.switch_to(done);
    fb.exit(None);

    let (package, fid) = leak_package(fb.finish());
    let analysis = RangeAnalysis::new(package, &ctx.types, &diag, true, State::new());
    let results = Engine::new(&package.funcs[fid], analysis).iterate_to_fixpoint();

    // x < 10 on the inner edge implies x < 20, so inner_then is the only
    // successor ever queued from `inner`
    assert!(results.is_reachable(inner_then));
  }
}
