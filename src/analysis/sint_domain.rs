//! The integer abstract domain of the range analysis: a numeric
//! [`ConstantRange`] plus symbolic bounds against other SSA values.
//!
//! A symbolic bound maps an SSA value `s` to a range bounding `this − s`;
//! symbolic ranges are always stored as signed ranges, and each recorded
//! bound must be non-trivial. The symbolic part is what lets the analysis
//! prove facts like `i < len` along a branch edge even when neither operand
//! has a useful numeric bound.

use std::collections::BTreeMap;
use std::fmt;

use crate::analysis::bool_domain::BoolDomain;
use crate::analysis::constant_range::{ConstantRange, PreferredRangeType, RelationalOperation};
use crate::analysis::sint::SInt;
use crate::types::ir::{BinOp, Value};
use crate::types::{IntTy, IntWidth, OverflowStrategy};

/// The map from an SSA value to a signed range bounding `this − that`.
pub type SymbolicBoundsMap = BTreeMap<Value, ConstantRange>;

/// An integer range domain value: numeric bound, symbolic bounds, and the
/// signedness of the underlying type.
#[derive(Clone, PartialEq, Eq)]
pub struct SIntDomain {
  numeric: ConstantRange,
  symbolics: SymbolicBoundsMap,
  is_unsigned: bool,
}

impl SIntDomain {
  /// Construct a domain with `numeric` as the numeric bound and no symbolic
  /// bounds.
  #[must_use] pub fn new(numeric: ConstantRange, is_unsigned: bool) -> Self {
    Self { numeric, symbolics: SymbolicBoundsMap::new(), is_unsigned }
  }

  /// Construct a domain with explicit symbolic bounds. Trivial bounds are
  /// dropped.
  #[must_use] pub fn with_symbolics(
    numeric: ConstantRange, mut symbolics: SymbolicBoundsMap, is_unsigned: bool,
  ) -> Self {
    symbolics.retain(|_, r| r.is_non_trivial());
    Self { numeric, symbolics, is_unsigned }
  }

  /// Construct a domain with one symbolic bound.
  #[must_use] pub fn with_symbolic(
    numeric: ConstantRange, symbol: Value, bound: ConstantRange, is_unsigned: bool,
  ) -> Self {
    let mut symbolics = SymbolicBoundsMap::new();
    if bound.is_non_trivial() {
      symbolics.insert(symbol, bound);
    }
    Self { numeric, symbolics, is_unsigned }
  }

  /// The top element at `width`.
  #[must_use] pub fn top(width: IntWidth, is_unsigned: bool) -> Self {
    Self::new(ConstantRange::full(width), is_unsigned)
  }

  /// The bottom element at `width`.
  #[must_use] pub fn bottom(width: IntWidth, is_unsigned: bool) -> Self {
    Self::new(ConstantRange::empty(width), is_unsigned)
  }

  /// Construct from an integer literal payload.
  #[must_use] pub fn from_literal(ity: IntTy, bits: u64) -> Self {
    let v = SInt::new(ity.width, bits);
    Self::new(ConstantRange::single(v), !ity.signed)
  }

  /// Construct the set satisfying `x rel v`.
  #[must_use] pub fn from_numeric(rel: RelationalOperation, v: SInt, is_unsigned: bool) -> Self {
    Self::new(ConstantRange::from(rel, v, !is_unsigned), is_unsigned)
  }

  /// Construct the set satisfying `x rel symbol`, i.e. a full numeric bound
  /// plus the symbolic bound `x − symbol rel 0`.
  #[must_use] pub fn from_symbolic(
    rel: RelationalOperation, symbol: Value, width: IntWidth, is_unsigned: bool,
  ) -> Self {
    let bound = ConstantRange::from(rel, SInt::zero(width), true);
    Self::with_symbolic(ConstantRange::full(width), symbol, bound, is_unsigned)
  }

  /// Whether the domain carries no information.
  #[must_use] pub fn is_top(&self) -> bool {
    self.numeric.is_full_set() && self.symbolics.is_empty()
  }

  /// Whether the domain carries information.
  #[must_use] pub fn is_non_trivial(&self) -> bool { !self.is_top() }

  /// Whether the domain is the empty set.
  #[must_use] pub fn is_bottom(&self) -> bool { self.numeric.is_empty_set() }

  /// The numeric bound.
  #[must_use] pub fn numeric_bound(&self) -> &ConstantRange { &self.numeric }

  /// The width of the underlying type.
  #[must_use] pub fn width(&self) -> IntWidth { self.numeric.width() }

  /// Whether the underlying type is unsigned.
  #[must_use] pub fn is_unsigned(&self) -> bool { self.is_unsigned }

  /// The symbolic bounds.
  #[must_use] pub fn symbolic_bounds(&self) -> &SymbolicBoundsMap { &self.symbolics }

  /// The bound against `symbol`, if one is recorded.
  #[must_use] pub fn find_symbolic_bound(&self, symbol: Value) -> Option<&ConstantRange> {
    self.symbolics.get(&symbol)
  }

  /// Whether the numeric bound is a single value.
  #[must_use] pub fn is_single_value(&self) -> bool { self.numeric.is_single_element() }

  /// Whether the domains are identical.
  #[must_use] pub fn is_same(&self, other: &Self) -> bool { self == other }

  /// Componentwise union: the result must cover values flowing in from
  /// either side, so only symbolic bounds present on both sides survive,
  /// with their ranges unioned.
  #[must_use] pub fn unions(lhs: &Self, rhs: &Self) -> Self {
    let pref = PreferredRangeType::from_unsigned(lhs.is_unsigned);
    let numeric = lhs.numeric.union_with(&rhs.numeric, pref);
    let mut symbolics = SymbolicBoundsMap::new();
    for (&sym, lb) in &lhs.symbolics {
      if let Some(rb) = rhs.symbolics.get(&sym) {
        let merged = lb.union_with(rb, PreferredRangeType::Signed);
        if merged.is_non_trivial() {
          symbolics.insert(sym, merged);
        }
      }
    }
    Self { numeric, symbolics, is_unsigned: lhs.is_unsigned }
  }

  /// Componentwise intersection: both constraints hold, so bounds merge and
  /// common keys intersect.
  #[must_use] pub fn intersects(lhs: &Self, rhs: &Self) -> Self {
    let pref = PreferredRangeType::from_unsigned(lhs.is_unsigned);
    let numeric = lhs.numeric.intersect_with(&rhs.numeric, pref);
    let mut symbolics = lhs.symbolics.clone();
    for (&sym, rb) in &rhs.symbolics {
      symbolics
        .entry(sym)
        .and_modify(|lb| *lb = lb.intersect_with(rb, PreferredRangeType::Signed))
        .or_insert(*rb);
    }
    symbolics.retain(|_, r| r.is_non_trivial());
    Self { numeric, symbolics, is_unsigned: lhs.is_unsigned }
  }

  /// Render for diagnostics.
  #[must_use] pub fn to_display_string(&self) -> String {
    let mut s = self.numeric.to_display_string(self.is_unsigned);
    for (sym, bound) in &self.symbolics {
      s.push_str(&format!(", this-{sym:?} in {}", bound.to_display_string(false)));
    }
    s
  }
}

impl fmt::Debug for SIntDomain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "SIntDomain({})", self.to_display_string())
  }
}

/// The inputs of a domain-level arithmetic binary operation.
pub struct ArithmeticBinopArgs<'a> {
  /// The left operand domain.
  pub ld: &'a SIntDomain,
  /// The right operand domain.
  pub rd: &'a SIntDomain,
  /// The resolved left symbol, if any.
  pub l: Option<Value>,
  /// The resolved right symbol, if any.
  pub r: Option<Value>,
  /// The operator.
  pub op: BinOp,
  /// The overflow strategy of the expression.
  pub ov: OverflowStrategy,
  /// Whether the arithmetic is unsigned.
  pub uns: bool,
}

/// Compute an arithmetic binary op over two [`SIntDomain`]s.
#[must_use] pub fn compute_arithmetic_binop(args: &ArithmeticBinopArgs<'_>) -> SIntDomain {
  let ArithmeticBinopArgs { ld, rd, l, r: _, op, ov, uns } = *args;
  let (lr, rr) = (ld.numeric_bound(), rd.numeric_bound());
  let saturating = ov == OverflowStrategy::Saturating;
  let numeric = match op {
    BinOp::Add if saturating => if uns { lr.uadd_sat(rr) } else { lr.sadd_sat(rr) },
    BinOp::Add => lr.add(rr),
    BinOp::Sub if saturating => if uns { lr.usub_sat(rr) } else { lr.ssub_sat(rr) },
    BinOp::Sub => lr.sub(rr),
    BinOp::Mul if saturating => if uns { lr.umul_sat(rr) } else { lr.smul_sat(rr) },
    BinOp::Mul => if uns { lr.umul(rr) } else { lr.smul(rr) },
    BinOp::Div if uns => lr.udiv(rr),
    BinOp::Div if saturating => lr.sdiv_sat(rr),
    BinOp::Div => lr.sdiv(rr),
    BinOp::Mod => if uns { lr.urem(rr) } else { lr.srem(rr) },
    _ => ConstantRange::full(ld.width()),
  };

  // Symbolic part: adding or subtracting a known constant shifts the value
  // relative to the other operand by exactly that constant, provided the
  // operation cannot wrap (throwing arithmetic that survives to the success
  // arm cannot).
  let mut symbolics = SymbolicBoundsMap::new();
  if ov == OverflowStrategy::Throwing && matches!(op, BinOp::Add | BinOp::Sub) {
    if let (Some(l), true) = (l, rd.is_single_value()) {
      let c = rd.numeric_bound().single_element();
      let delta = if op == BinOp::Add { c } else { -c };
      // result − l = delta
      symbolics.insert(l, ConstantRange::single(delta));
      // result − s = (l − s) + delta
      for (&sym, bound) in ld.symbolic_bounds() {
        let shifted = bound.add(&ConstantRange::single(delta));
        if shifted.is_non_trivial() {
          symbolics.entry(sym).or_insert(shifted);
        }
      }
    }
  }
  SIntDomain::with_symbolics(numeric, symbolics, uns)
}

/// The relational operation corresponding to a [`BinOp`], if any.
#[must_use] pub fn rel_of_binop(op: BinOp) -> Option<RelationalOperation> {
  match op {
    BinOp::Lt => Some(RelationalOperation::Lt),
    BinOp::Le => Some(RelationalOperation::Le),
    BinOp::Gt => Some(RelationalOperation::Gt),
    BinOp::Ge => Some(RelationalOperation::Ge),
    BinOp::Equal => Some(RelationalOperation::Eq),
    BinOp::NotEqual => Some(RelationalOperation::Ne),
    _ => None,
  }
}

/// Decide `diff rel 0` from a signed range bounding a difference.
fn decide_from_difference(rel: RelationalOperation, diff: &ConstantRange) -> BoolDomain {
  use RelationalOperation::*;
  let zero = SInt::zero(diff.width());
  let (smin, smax) = (diff.smin_value(), diff.smax_value());
  match rel {
    Lt => {
      if smax.slt(zero) { return BoolDomain::TRUE }
      if smin.sge(zero) { return BoolDomain::FALSE }
    }
    Le => {
      if smax.sle(zero) { return BoolDomain::TRUE }
      if smin.sgt(zero) { return BoolDomain::FALSE }
    }
    Gt => {
      if smin.sgt(zero) { return BoolDomain::TRUE }
      if smax.sle(zero) { return BoolDomain::FALSE }
    }
    Ge => {
      if smin.sge(zero) { return BoolDomain::TRUE }
      if smax.slt(zero) { return BoolDomain::FALSE }
    }
    Eq => {
      if diff.is_single_element() && diff.single_element().is_zero() { return BoolDomain::TRUE }
      if !diff.contains(zero) { return BoolDomain::FALSE }
    }
    Ne => {
      if !diff.contains(zero) { return BoolDomain::TRUE }
      if diff.is_single_element() && diff.single_element().is_zero() { return BoolDomain::FALSE }
    }
  }
  BoolDomain::TOP
}

/// The inputs of a domain-level relational binary operation.
pub struct RelIntBinopArgs<'a> {
  /// The left operand domain.
  pub ld: &'a SIntDomain,
  /// The right operand domain.
  pub rd: &'a SIntDomain,
  /// The resolved left symbol, if any.
  pub l: Option<Value>,
  /// The resolved right symbol, if any.
  pub r: Option<Value>,
  /// The operator; must be relational.
  pub op: BinOp,
  /// Whether the comparison is unsigned.
  pub uns: bool,
}

/// Compute a relational binary op over two [`SIntDomain`]s, producing a
/// [`BoolDomain`].
#[must_use] pub fn compute_rel_int_binop(args: &RelIntBinopArgs<'_>) -> BoolDomain {
  use RelationalOperation::*;
  let RelIntBinopArgs { ld, rd, l, r, op, uns } = *args;
  let Some(rel) = rel_of_binop(op) else { return BoolDomain::TOP };

  // `a == a`, `a <= a` and friends.
  if let (Some(l), Some(r)) = (l, r) {
    if l == r {
      return match rel {
        Eq | Le | Ge => BoolDomain::TRUE,
        Ne | Lt | Gt => BoolDomain::FALSE,
      }
    }
  }

  // Symbolic bounds: a bound on `l − r` decides the relation directly.
  if let Some(r) = r {
    if let Some(diff) = ld.find_symbolic_bound(r) {
      let res = decide_from_difference(rel, diff);
      if res.is_single_value() { return res }
    }
  }
  if let Some(l) = l {
    if let Some(diff) = rd.find_symbolic_bound(l) {
      let res = decide_from_difference(rel.flip(), diff);
      if res.is_single_value() { return res }
    }
  }

  // Numeric bounds.
  let (lmin, lmax) = (ld.numeric_bound().min_value(uns), ld.numeric_bound().max_value(uns));
  let (rmin, rmax) = (rd.numeric_bound().min_value(uns), rd.numeric_bound().max_value(uns));
  let lt = |a: SInt, b: SInt| if uns { a.ult(b) } else { a.slt(b) };
  let le = |a: SInt, b: SInt| if uns { a.ule(b) } else { a.sle(b) };
  match rel {
    Lt => {
      if lt(lmax, rmin) { return BoolDomain::TRUE }
      if le(rmax, lmin) { return BoolDomain::FALSE }
    }
    Le => {
      if le(lmax, rmin) { return BoolDomain::TRUE }
      if lt(rmax, lmin) { return BoolDomain::FALSE }
    }
    Gt => {
      if lt(rmax, lmin) { return BoolDomain::TRUE }
      if le(lmax, rmin) { return BoolDomain::FALSE }
    }
    Ge => {
      if le(rmax, lmin) { return BoolDomain::TRUE }
      if lt(lmax, rmin) { return BoolDomain::FALSE }
    }
    Eq => {
      if ld.is_single_value() && rd.is_single_value()
        && ld.numeric_bound().single_element() == rd.numeric_bound().single_element()
      {
        return BoolDomain::TRUE
      }
      let pref = PreferredRangeType::from_unsigned(uns);
      if ld.numeric_bound().intersect_with(rd.numeric_bound(), pref).is_empty_set() {
        return BoolDomain::FALSE
      }
    }
    Ne => {
      let pref = PreferredRangeType::from_unsigned(uns);
      if ld.numeric_bound().intersect_with(rd.numeric_bound(), pref).is_empty_set() {
        return BoolDomain::TRUE
      }
      if ld.is_single_value() && rd.is_single_value()
        && ld.numeric_bound().single_element() == rd.numeric_bound().single_element()
      {
        return BoolDomain::FALSE
      }
    }
  }
  BoolDomain::TOP
}

/// Compute an equality or logical binary op over two [`BoolDomain`]s.
#[must_use] pub fn compute_equality_bool_binop(ld: BoolDomain, rd: BoolDomain, op: BinOp) -> BoolDomain {
  match op {
    BinOp::And => BoolDomain::logical_and(ld, rd),
    BinOp::Or => BoolDomain::logical_or(ld, rd),
    BinOp::Equal if ld.is_single_value() && rd.is_single_value() =>
      BoolDomain::from_bool(ld.single_value() == rd.single_value()),
    BinOp::NotEqual if ld.is_single_value() && rd.is_single_value() =>
      BoolDomain::from_bool(ld.single_value() != rd.single_value()),
    _ => BoolDomain::TOP,
  }
}

/// Convert a numeric bound across a signedness/width change, per the
/// overflow semantics of the cast.
#[must_use] pub fn numeric_conversion(
  src: &ConstantRange, dst_width: IntWidth, src_unsigned: bool, dst_unsigned: bool,
  ov: OverflowStrategy,
) -> ConstantRange {
  let src_width = src.width();
  let mut range = if dst_width < src_width {
    src.truncate(dst_width)
  } else if dst_width > src_width {
    if src_unsigned { src.zero_extend(dst_width) } else { src.sign_extend(dst_width) }
  } else {
    *src
  };

  // A sign change at the destination restricts the surviving values under
  // throwing semantics: negative values (signed→unsigned) or values above
  // the signed max (unsigned→signed) take the error path instead.
  if src_unsigned != dst_unsigned {
    match ov {
      OverflowStrategy::Throwing | OverflowStrategy::Checked => {
        let bound = ConstantRange::from(
          RelationalOperation::Ge, SInt::zero(dst_width), /* is_signed */ true,
        );
        range = range.intersect_with(&bound, PreferredRangeType::from_unsigned(dst_unsigned));
      }
      OverflowStrategy::Wrapping | OverflowStrategy::Saturating => {
        range = ConstantRange::full(dst_width);
      }
    }
  }
  range
}

/// Convert the numeric bound of `v` for a typecast to `dst_width`.
#[must_use] pub fn compute_type_cast_numeric_bound(
  v: &SIntDomain, dst_width: IntWidth, dst_unsigned: bool, ov: OverflowStrategy,
) -> ConstantRange {
  numeric_conversion(v.numeric_bound(), dst_width, v.is_unsigned(), dst_unsigned, ov)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ir::ExprId;

  fn sym(n: u32) -> Value { Value::Local(ExprId(n)) }

  #[test]
  fn join_keeps_common_symbolic_bounds() {
    let w = IntWidth::W64;
    let a = SIntDomain::with_symbolic(
      ConstantRange::full(w),
      sym(1),
      ConstantRange::from(RelationalOperation::Lt, SInt::zero(w), true),
      false,
    );
    let b = SIntDomain::with_symbolic(
      ConstantRange::full(w),
      sym(1),
      ConstantRange::from(RelationalOperation::Lt, SInt::zero(w), true),
      false,
    );
    let joined = SIntDomain::unions(&a, &b);
    assert!(joined.find_symbolic_bound(sym(1)).is_some());
    let c = SIntDomain::top(w, false);
    assert!(SIntDomain::unions(&a, &c).is_top());
  }

  #[test]
  fn rel_binop_on_numeric_bounds() {
    let w = IntWidth::W64;
    let lt10 = SIntDomain::new(
      ConstantRange::new(SInt::new(w, 1), SInt::new(w, 10)), false);
    let ge10 = SIntDomain::new(
      ConstantRange::from(RelationalOperation::Ge, SInt::new(w, 10), true), false);
    let res = compute_rel_int_binop(&RelIntBinopArgs {
      ld: &lt10, rd: &ge10, l: Some(sym(1)), r: Some(sym(2)), op: BinOp::Lt, uns: false,
    });
    assert!(res.is_true());
    let res = compute_rel_int_binop(&RelIntBinopArgs {
      ld: &ge10, rd: &lt10, l: Some(sym(2)), r: Some(sym(1)), op: BinOp::Lt, uns: false,
    });
    assert!(res.is_false());
  }

  #[test]
  fn rel_binop_same_symbol() {
    let w = IntWidth::W64;
    let top = SIntDomain::top(w, false);
    let res = compute_rel_int_binop(&RelIntBinopArgs {
      ld: &top, rd: &top, l: Some(sym(7)), r: Some(sym(7)), op: BinOp::Equal, uns: false,
    });
    assert!(res.is_true());
    let res = compute_rel_int_binop(&RelIntBinopArgs {
      ld: &top, rd: &top, l: Some(sym(7)), r: Some(sym(7)), op: BinOp::Lt, uns: false,
    });
    assert!(res.is_false());
  }

  #[test]
  fn rel_binop_symbolic_difference() {
    let w = IntWidth::W64;
    // ld = r + [1, 5): the bound on (l − r) is [1, 5), so l > r.
    let ld = SIntDomain::with_symbolic(
      ConstantRange::full(w),
      sym(2),
      ConstantRange::new(SInt::new(w, 1), SInt::new(w, 5)),
      false,
    );
    let rd = SIntDomain::top(w, false);
    let res = compute_rel_int_binop(&RelIntBinopArgs {
      ld: &ld, rd: &rd, l: Some(sym(1)), r: Some(sym(2)), op: BinOp::Gt, uns: false,
    });
    assert!(res.is_true());
    let res = compute_rel_int_binop(&RelIntBinopArgs {
      ld: &ld, rd: &rd, l: Some(sym(1)), r: Some(sym(2)), op: BinOp::Le, uns: false,
    });
    assert!(res.is_false());
  }

  #[test]
  fn arithmetic_records_offset_bound() {
    let w = IntWidth::W64;
    let x = SIntDomain::top(w, false);
    let one = SIntDomain::from_literal(IntTy::INT64, 1);
    let res = compute_arithmetic_binop(&ArithmeticBinopArgs {
      ld: &x, rd: &one, l: Some(sym(1)), r: None,
      op: BinOp::Add, ov: OverflowStrategy::Throwing, uns: false,
    });
    let bound = res.find_symbolic_bound(sym(1)).expect("offset bound");
    assert!(bound.is_single_element());
    assert_eq!(bound.single_element().sval(), 1);
  }
}
