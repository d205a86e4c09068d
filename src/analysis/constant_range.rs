//! Wrap-aware constant ranges.
//!
//! A [`ConstantRange`] represents a set of integer values as a half-open
//! interval `[lower, upper)` whose bounds may **wrap around** the end of the
//! numeric range.
//!
//! For the 2-bit set `{0,1,2,3}`:
//!
//! ```text
//! [0, 0) = {}           (empty)
//! [0, 3) = {0, 1, 2}
//! [1, 0) = {1, 2, 3}
//! [2, 1) = {2, 3, 0}    (wrapped)
//! [3, 3) = {3, 0, 1, 2} (full)
//! ```
//!
//! `lower == upper` encodes empty when both are the unsigned minimum and
//! full when both are the unsigned maximum; every other equal pair is
//! illegal. A range can be read as signed or unsigned; wrappedness is
//! relative to the chosen domain.

use crate::analysis::sint::SInt;
use crate::types::IntWidth;

/// If represented precisely, the result of some range operations may consist
/// of multiple disjoint ranges. As only a single range may be returned, any
/// range covering these disjoint ranges constitutes a valid result, but some
/// may be more useful than others depending on context. The preferred range
/// type specifies whether a range that is non-wrapping in the unsigned or
/// signed domain, or has the smallest size, is preferred.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PreferredRangeType {
  /// Pick the smallest result set.
  #[default]
  Smallest,
  /// Prefer a result that does not wrap in the unsigned domain.
  Unsigned,
  /// Prefer a result that does not wrap in the signed domain.
  Signed,
}

impl PreferredRangeType {
  /// The preference matching the signedness of the surrounding operation.
  #[must_use] pub fn from_unsigned(use_unsigned: bool) -> Self {
    if use_unsigned { Self::Unsigned } else { Self::Signed }
  }
}

/// A relational operator over a numeric domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationalOperation {
  /// `<`
  Lt,
  /// `<=`
  Le,
  /// `==`
  Eq,
  /// `>`
  Gt,
  /// `>=`
  Ge,
  /// `!=`
  Ne,
}

impl RelationalOperation {
  /// The relation with the operand sides swapped: `a rel b` iff
  /// `b rel.flip() a`.
  #[must_use] pub fn flip(self) -> Self {
    match self {
      Self::Lt => Self::Gt,
      Self::Le => Self::Ge,
      Self::Gt => Self::Lt,
      Self::Ge => Self::Le,
      Self::Eq => Self::Eq,
      Self::Ne => Self::Ne,
    }
  }

  /// The complement relation: `a rel b` iff not `a rel.negate() b`.
  #[must_use] pub fn negate(self) -> Self {
    match self {
      Self::Lt => Self::Ge,
      Self::Le => Self::Gt,
      Self::Gt => Self::Le,
      Self::Ge => Self::Lt,
      Self::Eq => Self::Ne,
      Self::Ne => Self::Eq,
    }
  }
}

/// A set of integers represented as a possibly wrapping interval.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConstantRange {
  lower: SInt,
  upper: SInt,
}

impl ConstantRange {
  /// The empty set at `width`.
  #[must_use] pub fn empty(width: IntWidth) -> Self {
    let v = SInt::umin_value(width);
    Self { lower: v, upper: v }
  }

  /// The full set at `width`.
  #[must_use] pub fn full(width: IntWidth) -> Self {
    let v = SInt::umax_value(width);
    Self { lower: v, upper: v }
  }

  /// The singleton `{v}`.
  #[must_use] pub fn single(v: SInt) -> Self { Self { lower: v, upper: v + 1 } }

  /// An explicit `[l, u)` range. Panics (debug) on an illegal equal pair or
  /// mismatched widths.
  #[must_use] pub fn new(l: SInt, u: SInt) -> Self {
    debug_assert_eq!(l.width(), u.width(), "ConstantRange with unequal int widths");
    debug_assert!(
      l != u || l.is_umax_value() || l.is_umin_value(),
      "lower == upper, but they aren't min or max value!"
    );
    Self { lower: l, upper: u }
  }

  /// Create a non-empty range with the given bounds; an equal pair becomes
  /// the full set.
  #[must_use] pub fn non_empty(l: SInt, u: SInt) -> Self {
    if l == u { Self::full(l.width()) } else { Self { lower: l, upper: u } }
  }

  /// The set of all values satisfying `x rel v` in the signed or unsigned
  /// domain. e.g. for the set `{0..3}`, `from(Ne, 1) = [2, 1) = {2, 3, 0}`.
  #[must_use] pub fn from(rel: RelationalOperation, v: SInt, is_signed: bool) -> Self {
    use RelationalOperation::*;
    let width = v.width();
    let is_min = if is_signed { v.is_smin_value() } else { v.is_umin_value() };
    let is_max = if is_signed { v.is_smax_value() } else { v.is_umax_value() };
    if (rel == Lt && is_min) || (rel == Gt && is_max) {
      return Self::empty(width)
    }
    if (rel == Le && is_max) || (rel == Ge && is_min) {
      return Self::full(width)
    }

    let max_val = if is_signed { SInt::smax_value(width) } else { SInt::umax_value(width) };
    let min_val = if is_signed { SInt::smin_value(width) } else { SInt::umin_value(width) };
    match rel {
      Eq => Self::single(v),
      Ne => Self::new(v + 1, v),
      Ge => Self::new(v, max_val + 1),
      Gt => Self::new(v + 1, max_val + 1),
      Le => Self::new(min_val, v + 1),
      Lt => Self::new(min_val, v),
    }
  }

  /// The inclusive lower bound.
  #[must_use] pub fn lower(&self) -> SInt { self.lower }

  /// The exclusive upper bound.
  #[must_use] pub fn upper(&self) -> SInt { self.upper }

  /// The width of the range's elements.
  #[must_use] pub fn width(&self) -> IntWidth { self.lower.width() }

  /// Whether this is the full set.
  #[must_use] pub fn is_full_set(&self) -> bool {
    self.lower == self.upper && self.lower.is_umax_value()
  }

  /// Whether this is the empty set.
  #[must_use] pub fn is_empty_set(&self) -> bool {
    self.lower == self.upper && self.lower.is_umin_value()
  }

  /// Whether this set carries information (is not full).
  #[must_use] pub fn is_non_trivial(&self) -> bool { !self.is_full_set() }

  /// Whether this set wraps around the unsigned domain, e.g. `[3, 1)`.
  /// `[X, 0)` counts as not wrapped (it is `[X, max]`).
  #[must_use] pub fn is_wrapped_set(&self) -> bool {
    self.lower.ugt(self.upper) && !self.upper.is_zero()
  }

  /// Whether the exclusive upper bound wraps around the unsigned domain;
  /// unlike [`Self::is_wrapped_set`] this counts `[X, 0)` as wrapped.
  #[must_use] pub fn is_upper_wrapped(&self) -> bool { self.lower.ugt(self.upper) }

  /// Whether this set wraps around the signed domain.
  #[must_use] pub fn is_sign_wrapped_set(&self) -> bool {
    self.lower.sgt(self.upper) && !self.upper.is_smin_value()
  }

  /// Whether the exclusive upper bound wraps around the signed domain.
  #[must_use] pub fn is_upper_sign_wrapped(&self) -> bool { self.lower.sgt(self.upper) }

  /// Split a wrapped range into its two unwrapped pieces. The behaviour is
  /// undefined if the range is not wrapped in the requested domain.
  #[must_use] pub fn split_wrapping(&self, as_unsigned: bool) -> (Self, Self) {
    debug_assert!(if as_unsigned { self.is_wrapped_set() } else { self.is_sign_wrapped_set() });
    (
      Self::from(RelationalOperation::Lt, self.upper, !as_unsigned),
      Self::from(RelationalOperation::Ge, self.lower, !as_unsigned),
    )
  }

  /// Whether `v` is in the set.
  #[must_use] pub fn contains(&self, v: SInt) -> bool {
    if self.lower == self.upper {
      return self.is_full_set()
    }
    if !self.is_upper_wrapped() {
      self.lower.ule(v) && v.ult(self.upper)
    } else {
      self.lower.ule(v) || v.ult(self.upper)
    }
  }

  /// Whether the set has exactly one member.
  #[must_use] pub fn is_single_element(&self) -> bool { self.upper == self.lower + 1 }

  /// The single member of a singleton set.
  #[must_use] pub fn single_element(&self) -> SInt {
    debug_assert!(self.is_single_element());
    self.lower
  }

  /// Whether this set has strictly fewer elements than `rhs`.
  #[must_use] pub fn is_size_strictly_smaller_than(&self, rhs: &Self) -> bool {
    debug_assert_eq!(self.width(), rhs.width());
    if self.is_full_set() { return false }
    if rhs.is_full_set() { return true }
    (self.upper - self.lower).ult(rhs.upper - rhs.lower)
  }

  /// The largest unsigned member.
  #[must_use] pub fn umax_value(&self) -> SInt {
    if self.is_full_set() || self.is_upper_wrapped() {
      SInt::umax_value(self.width())
    } else {
      self.upper - 1
    }
  }

  /// The smallest unsigned member.
  #[must_use] pub fn umin_value(&self) -> SInt {
    if self.is_full_set() || self.is_wrapped_set() {
      SInt::umin_value(self.width())
    } else {
      self.lower
    }
  }

  /// The largest signed member.
  #[must_use] pub fn smax_value(&self) -> SInt {
    if self.is_full_set() || self.is_upper_sign_wrapped() {
      SInt::smax_value(self.width())
    } else {
      self.upper - 1
    }
  }

  /// The smallest signed member.
  #[must_use] pub fn smin_value(&self) -> SInt {
    if self.is_full_set() || self.is_sign_wrapped_set() {
      SInt::smin_value(self.width())
    } else {
      self.lower
    }
  }

  /// The largest member in the chosen domain.
  #[must_use] pub fn max_value(&self, is_unsigned: bool) -> SInt {
    if is_unsigned { self.umax_value() } else { self.smax_value() }
  }

  /// The smallest member in the chosen domain.
  #[must_use] pub fn min_value(&self, is_unsigned: bool) -> SInt {
    if is_unsigned { self.umin_value() } else { self.smin_value() }
  }

  fn empty_like(&self) -> Self { Self::empty(self.width()) }

  fn full_like(&self) -> Self { Self::full(self.width()) }

  fn preferred(a: Self, b: Self, ty: PreferredRangeType) -> Self {
    match ty {
      PreferredRangeType::Unsigned => {
        if !a.is_wrapped_set() && b.is_wrapped_set() { return a }
        if a.is_wrapped_set() && !b.is_wrapped_set() { return b }
      }
      PreferredRangeType::Signed => {
        if !a.is_sign_wrapped_set() && b.is_sign_wrapped_set() { return a }
        if a.is_sign_wrapped_set() && !b.is_sign_wrapped_set() { return b }
      }
      PreferredRangeType::Smallest => {}
    }
    if a.is_size_strictly_smaller_than(&b) { a } else { b }
  }

  /// Subtract `v` from both endpoints, e.g. `[5, 8) - 3 = [2, 5)`.
  #[must_use] pub fn subtract(&self, v: SInt) -> Self {
    debug_assert_eq!(v.width(), self.width());
    if self.lower == self.upper { return *self }
    Self { lower: self.lower - v, upper: self.upper - v }
  }

  /// The set difference `self \ rhs`, e.g. `[5, 8) \ [6, 9) = [5, 6)`.
  #[must_use] pub fn difference(&self, rhs: &Self) -> Self {
    self.intersect_with(&rhs.inverse(), PreferredRangeType::Smallest)
  }

  /// The intersection of this range with `rhs`. If the intersection is
  /// disjoint, such that two results are possible, `ty` picks one.
  #[must_use] pub fn intersect_with(&self, rhs: &Self, ty: PreferredRangeType) -> Self {
    debug_assert_eq!(self.width(), rhs.width(), "ConstantRange types don't agree!");

    if self.is_empty_set() || rhs.is_full_set() { return *self }
    if rhs.is_empty_set() || self.is_full_set() { return *rhs }

    match (self.is_upper_wrapped(), rhs.is_upper_wrapped()) {
      (false, true) => rhs.intersect_with(self, ty),
      (false, false) => self.intersect_both_unwrapped(rhs),
      (true, false) => self.intersect_wrapped_with_unwrapped(rhs, ty),
      (true, true) => self.intersect_both_wrapped(rhs, ty),
    }
  }

  fn intersect_both_wrapped(&self, rhs: &Self, ty: PreferredRangeType) -> Self {
    // Both ranges are wrapped, the upper bound of rhs has three
    // possibilities relative to ours.
    if rhs.upper.ult(self.upper) {
      // ------U   L--- : this
      // --U L--------- : rhs
      if rhs.lower.ult(self.upper) {
        return Self::preferred(*self, *rhs, ty)
      }
      // -----U    L-- : this
      // ---U   L----- : rhs
      if rhs.lower.ult(self.lower) {
        return Self::new(self.lower, rhs.upper)
      }
      // ----U  L----- : this
      // --U      L--- : rhs
      *rhs
    } else if rhs.upper.ule(self.lower) {
      // --U       L---- : this
      // ----U   L------ : rhs
      if rhs.lower.ult(self.lower) {
        return *self
      }
      // --U    L------- : this
      // ----U    L----- : rhs
      Self::new(rhs.lower, self.upper)
    } else {
      // --U   L-------- : this
      // --------U  L--- : rhs
      Self::preferred(*self, *rhs, ty)
    }
  }

  fn intersect_wrapped_with_unwrapped(&self, rhs: &Self, ty: PreferredRangeType) -> Self {
    // this range is wrapped, rhs isn't.
    if rhs.lower.ult(self.upper) {
      // ------U   L--- : this
      //  L--U          : rhs
      if rhs.upper.ult(self.upper) {
        return *rhs
      }
      // ------U   L--- : this
      //  L------U      : rhs
      if rhs.upper.ule(self.lower) {
        return Self::new(rhs.lower, self.upper)
      }
      // ------U   L--- : this
      //  L----------U  : rhs
      Self::preferred(*self, *rhs, ty)
    } else if rhs.lower.ult(self.lower) {
      // ------U    L-- : this
      //        L-U     : rhs
      if rhs.upper.ule(self.lower) {
        return self.empty_like()
      }
      // ------U   L--- : this
      //        L-----U : rhs
      Self::new(self.lower, rhs.upper)
    } else {
      // ------U  L---- : this
      //           L-U  : rhs
      *rhs
    }
  }

  fn intersect_both_unwrapped(&self, rhs: &Self) -> Self {
    if self.lower.ult(rhs.lower) {
      //  L--U          : this
      //          L---U : rhs
      if self.upper.ule(rhs.lower) {
        return self.empty_like()
      }
      //  L-----U       : this
      //     L--------U : rhs
      if self.upper.ult(rhs.upper) {
        return Self::new(rhs.lower, self.upper)
      }
      //    L--------U  : this
      //      L---U     : rhs
      *rhs
    } else {
      //          L---U : this
      //   L--U         : rhs
      if rhs.upper.ule(self.lower) {
        return self.empty_like()
      }
      //        L-----U : this
      //   L-------U    : rhs
      if rhs.upper.ult(self.upper) {
        return Self::new(self.lower, rhs.upper)
      }
      //        L--U    : this
      //   L----------U : rhs
      *self
    }
  }

  /// The union of this range with `rhs`. The result is guaranteed to
  /// include the elements of both sets but may contain more: for example,
  /// `[3, 9) ∪ [12, 15)` is `[3, 15)`.
  #[must_use] pub fn union_with(&self, rhs: &Self, ty: PreferredRangeType) -> Self {
    debug_assert_eq!(self.width(), rhs.width(), "ConstantRange types don't agree!");

    if self.is_full_set() || rhs.is_empty_set() { return *self }
    if rhs.is_full_set() || self.is_empty_set() { return *rhs }

    match (self.is_upper_wrapped(), rhs.is_upper_wrapped()) {
      (true, true) => self.union_both_wrapped(rhs),
      (true, false) => self.union_wrapped_with_unwrapped(rhs, ty),
      (false, true) => rhs.union_with(self, ty),
      (false, false) => self.union_both_unwrapped(rhs, ty),
    }
  }

  fn union_both_wrapped(&self, rhs: &Self) -> Self {
    // If the two wrapped ranges overlap on both arcs they cover everything.
    if rhs.lower.ule(self.upper) || self.lower.ule(rhs.upper) {
      return self.full_like()
    }
    // -----U    L-- : this
    // ---U   L----- : rhs
    let lower = if rhs.lower.ult(self.lower) { rhs.lower } else { self.lower };
    let upper = if rhs.upper.ugt(self.upper) { rhs.upper } else { self.upper };
    Self::new(lower, upper)
  }

  fn union_wrapped_with_unwrapped(&self, rhs: &Self, ty: PreferredRangeType) -> Self {
    // this range is wrapped, rhs isn't.
    if rhs.lower.ule(self.upper) {
      // ------U   L--- : this
      //  L--U          : rhs
      if rhs.upper.ult(self.upper) {
        return *self
      }
      // ------U   L--- : this
      //  L------U      : rhs
      if rhs.upper.ult(self.lower) {
        return Self::new(self.lower, rhs.upper)
      }
      // ------U   L--- : this
      //  L----------U  : rhs
      self.full_like()
    } else if rhs.lower.ult(self.lower) {
      // ----U       L- : this
      //        L--U    : rhs
      if rhs.upper.ult(self.lower) {
        return Self::preferred(
          Self::new(self.lower, rhs.upper),
          Self::new(rhs.lower, self.upper),
          ty,
        )
      }
      // ------U    L-- : this
      //         L---U  : rhs
      Self::new(rhs.lower, self.upper)
    } else {
      // ------U  L---- : this
      //           L--U : rhs
      *self
    }
  }

  fn union_both_unwrapped(&self, rhs: &Self, ty: PreferredRangeType) -> Self {
    // Disjoint: the covering range can close either gap.
    if rhs.upper.ult(self.lower) || self.upper.ult(rhs.lower) {
      return Self::preferred(
        Self::new(self.lower, rhs.upper),
        Self::new(rhs.lower, self.upper),
        ty,
      )
    }
    let lower = if rhs.lower.ult(self.lower) { rhs.lower } else { self.lower };
    let upper = if (rhs.upper - 1).ugt(self.upper - 1) { rhs.upper } else { self.upper };
    if lower.is_zero() && upper.is_zero() {
      return self.full_like()
    }
    Self::new(lower, upper)
  }

  /// The range of values after zero-extension to the strictly larger
  /// `width`.
  #[must_use] pub fn zero_extend(&self, width: IntWidth) -> Self {
    if self.is_empty_set() { return Self::empty(width) }
    debug_assert!(self.width() < width, "Not a value extension");

    // Full or unsigned-wrapped sets cover the whole source domain.
    if self.is_full_set() || self.is_wrapped_set() {
      return Self::new(SInt::zero(width), SInt::one_bit_set(width, self.width().bits()))
    }
    // [254, 0) = {254, 255} => [254, 256)
    if self.upper.is_umin_value() {
      return Self::new(self.lower.zext(width), SInt::one_bit_set(width, self.width().bits()))
    }
    Self::new(self.lower.zext(width), self.upper.zext(width))
  }

  /// The range of values after sign-extension to the strictly larger
  /// `width`.
  #[must_use] pub fn sign_extend(&self, width: IntWidth) -> Self {
    if self.is_empty_set() { return Self::empty(width) }
    debug_assert!(self.width() < width, "Not a value extension");

    if self.is_full_set() || self.is_sign_wrapped_set() {
      let lower_width = self.width().bits();
      // e.g. 8->16: lo = 0xFF80 (-128), up = 0x007F + 1 (128)
      let lo = SInt::high_bits_set(width, width.bits() - lower_width + 1);
      let up = SInt::low_bits_set(width, lower_width - 1) + 1;
      return Self::new(lo, up)
    }
    // [-3, -128) => [-3, 128)
    if self.upper.is_smin_value() {
      return Self::new(self.lower.sext(width), self.upper.zext(width))
    }
    Self::new(self.lower.sext(width), self.upper.sext(width))
  }

  /// The range of values after truncation to the strictly smaller
  /// `dst_width`.
  #[must_use] pub fn truncate(&self, dst_width: IntWidth) -> Self {
    debug_assert!(self.width() > dst_width, "Not a value truncation");
    if self.is_empty_set() { return Self::empty(dst_width) }
    if self.is_full_set() { return Self::full(dst_width) }

    let mut lower_div = self.lower;
    let mut upper_div = self.upper;

    // Analyse unsigned wrapped sets in their two parts:
    // [0, upper) ∪ [lower, maxVal], i.e. [maxVal, upper) ∪ [lower, maxVal).
    let mut wrapped_part = Self::empty(dst_width);
    if self.is_upper_wrapped() {
      // If upper >= maxVal(dstWidth), the [maxVal, upper) piece already
      // covers the whole truncated range.
      let dst_max = SInt::umax_value(dst_width);
      if self.upper.uge(dst_max.zext(self.width())) {
        return Self::full(dst_width)
      }

      wrapped_part = Self::new(dst_max, self.upper.trunc(dst_width));

      // The [maxVal, upper) part is done; nothing remains if lower is maxVal.
      if lower_div.is_umax_value() {
        return wrapped_part
      }

      upper_div.set_all_bits();
    }

    // Cut off the most significant bits shared by both endpoints that
    // exceed the destination width.
    if lower_div.active_bits() > dst_width.bits() {
      let adjust = lower_div & SInt::bits_set_from(self.width(), dst_width.bits());
      lower_div = lower_div - adjust;
      upper_div = upper_div - adjust;
    }

    let upper_div_width = upper_div.active_bits();
    if upper_div_width <= dst_width.bits() {
      Self::new(lower_div.trunc(dst_width), upper_div.trunc(dst_width))
        .union_with(&wrapped_part, PreferredRangeType::Smallest)
    } else if upper_div_width == dst_width.bits() + 1 {
      // Clear the most significant bit so that upper_div wraps around.
      upper_div.clear_bit(dst_width.bits());
      if upper_div.ult(lower_div) {
        Self::new(lower_div.trunc(dst_width), upper_div.trunc(dst_width))
          .union_with(&wrapped_part, PreferredRangeType::Smallest)
      } else {
        Self::full(dst_width)
      }
    } else {
      Self::full(dst_width)
    }
  }

  /// The possible sums of a value in this range and a value in `rhs`.
  #[must_use] pub fn add(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }
    if self.is_full_set() || rhs.is_full_set() { return self.full_like() }

    let new_lower = self.lower + rhs.lower;
    // [0, 1) + [0, 3) = {0} + {0, 1, 2} = [0, 3)
    let new_upper = self.upper + rhs.upper - 1;
    if new_lower == new_upper { return self.full_like() }

    let res = Self::new(new_lower, new_upper);
    if res.is_size_strictly_smaller_than(self) || res.is_size_strictly_smaller_than(rhs) {
      // We've wrapped, therefore, full set.
      return self.full_like()
    }
    res
  }

  /// The possible differences of a value in this range and a value in
  /// `rhs`.
  #[must_use] pub fn sub(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }
    if self.is_full_set() || rhs.is_full_set() { return self.full_like() }

    let new_lower = self.lower - rhs.upper + 1;
    let new_upper = self.upper - rhs.lower;
    if new_lower == new_upper { return self.full_like() }

    let res = Self::new(new_lower, new_upper);
    if res.is_size_strictly_smaller_than(self) || res.is_size_strictly_smaller_than(rhs) {
      return self.full_like()
    }
    res
  }

  /// The possible products, treating both operands as unsigned.
  #[must_use] pub fn umul(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }

    let (lo, ovf1) = self.umin_value().umul_ovf(rhs.umin_value());
    let (up, ovf2) = self.umax_value().umul_ovf(rhs.umax_value());
    if ovf1 || ovf2 { return self.full_like() }
    Self::non_empty(lo, up + 1)
  }

  /// The possible products, treating both operands as signed.
  #[must_use] pub fn smul(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }

    let (this_min, this_max) = (self.smin_value(), self.smax_value());
    let (rhs_min, rhs_max) = (rhs.smin_value(), rhs.smax_value());
    let mut products = [SInt::zero(self.width()); 4];
    let mut any_ovf = false;
    for (slot, (a, b)) in products.iter_mut().zip([
      (this_min, rhs_min), (this_min, rhs_max), (this_max, rhs_min), (this_max, rhs_max),
    ]) {
      let (p, ovf) = a.smul_ovf(b);
      any_ovf |= ovf;
      *slot = p;
    }
    if any_ovf { return self.full_like() }

    let lo = products.iter().copied().reduce(SInt::smin).expect("nonempty");
    let up = products.iter().copied().reduce(SInt::smax).expect("nonempty");
    Self::non_empty(lo, up + 1)
  }

  /// The possible quotients of an unsigned division.
  #[must_use] pub fn udiv(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() || rhs.umax_value().is_zero() {
      return self.empty_like()
    }

    let new_lower = self.umin_value().udiv(rhs.umax_value());

    // When rhs is wrapped its unsigned minimum is zero; use the smallest
    // non-zero divisor instead.
    let mut rhs_umin = rhs.umin_value();
    if rhs_umin.is_zero() {
      // The min excluding zero is 1, except for a range [X, 1) where it is X.
      if rhs.upper.is_one() {
        rhs_umin = rhs.lower;
      } else {
        rhs_umin = SInt::new(self.width(), 1);
      }
    }

    let new_upper = self.umax_value().udiv(rhs_umin) + 1;
    Self::non_empty(new_lower, new_upper)
  }

  fn sdiv_impl(&self, rhs: &Self, div: impl Fn(SInt, SInt) -> SInt) -> Self {
    // Split both operands by sign and combine the four quadrant divisions
    // with the appropriate signs.
    let width = self.width();
    let zero = SInt::zero(width);
    let signed_min = SInt::smin_value(width);

    let pos_filter = Self::new(SInt::new(width, 1), signed_min);
    let neg_filter = Self::new(signed_min, zero);
    let pos_l = self.intersect_with(&pos_filter, PreferredRangeType::Smallest);
    let neg_l = self.intersect_with(&neg_filter, PreferredRangeType::Smallest);
    let pos_r = rhs.intersect_with(&pos_filter, PreferredRangeType::Smallest);
    let neg_r = rhs.intersect_with(&neg_filter, PreferredRangeType::Smallest);

    let mut pos_div_pos = Self::empty(width);
    if !pos_l.is_empty_set() && !pos_r.is_empty_set() {
      // + / + = +: [posMin/posMax, posMax/posMin]
      pos_div_pos =
        Self::new(div(pos_l.lower, pos_r.upper - 1), div(pos_l.upper - 1, pos_r.lower) + 1);
    }

    let mut neg_div_neg = Self::empty(width);
    if !neg_l.is_empty_set() && !neg_r.is_empty_set() {
      // - / - = +: e.g. [-4, 0) / [-2, 0): lower -1/-2 = 0, upper -4/-1 + 1
      let lo = div(neg_l.upper - 1, neg_r.lower);
      let mut up = div(neg_l.lower, neg_r.upper - 1) + 1;

      // signedMin / -1 is overflow, so tighten the bound by dropping either
      // signedMin from the lhs or -1 from the rhs where possible.
      if neg_l.lower.is_smin_value() && neg_r.upper.is_zero() {
        if !neg_r.lower.is_all_ones() {
          // Drop -1 from the rhs; if rhs.lower is exactly -1 the adjacent
          // upper of the negative part is rhs.upper, which is tighter.
          let mut adj_neg_r_upper = neg_r.upper - 1;
          if rhs.lower.is_all_ones() {
            adj_neg_r_upper = rhs.upper;
          }
          up = div(neg_l.lower, adj_neg_r_upper - 1) + 1;
        }
        if neg_l.upper != signed_min + 1 {
          // -1 is the only element of the rhs; drop signedMin from the lhs.
          let mut adj_neg_l_lower = neg_l.lower + 1;
          if self.upper == signed_min + 1 {
            adj_neg_l_lower = self.lower;
          }
          up = div(adj_neg_l_lower, neg_r.upper - 1) + 1;
        }
      }
      neg_div_neg = Self::new(lo, up);
    }
    let pos_res = pos_div_pos.union_with(&neg_div_neg, PreferredRangeType::Smallest);

    let mut pos_div_neg = Self::empty(width);
    if !pos_l.is_empty_set() && !neg_r.is_empty_set() {
      // + / - = -: e.g. [2, 5) / [-4, -1): lower 4/-2, upper 2/-4 + 1
      pos_div_neg =
        Self::new(div(pos_l.upper - 1, neg_r.upper - 1), div(pos_l.lower, neg_r.lower) + 1);
    }
    let mut neg_div_pos = Self::empty(width);
    if !neg_l.is_empty_set() && !pos_r.is_empty_set() {
      // - / + = -: e.g. [-4, -1) / [2, 5): lower -4/2, upper -2/4 + 1
      neg_div_pos =
        Self::new(div(neg_l.lower, pos_r.lower), div(neg_l.upper - 1, pos_r.upper - 1) + 1);
    }
    let neg_res = pos_div_neg.union_with(&neg_div_pos, PreferredRangeType::Smallest);

    let mut res = neg_res.union_with(&pos_res, PreferredRangeType::Signed);

    // Preserve the zero that we dropped when splitting the lhs by sign.
    if self.contains(zero) && (!pos_r.is_empty_set() || !neg_r.is_empty_set()) {
      res = res.union_with(&Self::single(zero), PreferredRangeType::Smallest);
    }
    res
  }

  /// The possible quotients of a signed division.
  #[must_use] pub fn sdiv(&self, rhs: &Self) -> Self { self.sdiv_impl(rhs, SInt::sdiv) }

  /// The possible quotients of a signed saturating division.
  #[must_use] pub fn sdiv_sat(&self, rhs: &Self) -> Self { self.sdiv_impl(rhs, SInt::sdiv_sat) }

  /// The possible results of an unsigned remainder.
  #[must_use] pub fn urem(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() || rhs.umax_value().is_zero() {
      return self.empty_like()
    }

    if rhs.is_single_element() {
      let rhs_int = rhs.single_element();
      if rhs_int.is_zero() { return self.empty_like() }
      if self.is_single_element() {
        return Self::single(self.single_element().urem(rhs_int))
      }
    }

    // L % R for L < R is L.
    if self.umax_value().ult(rhs.umin_value()) {
      return *self
    }

    // L % R is <= L and < R.
    let lo = SInt::zero(self.width());
    let up = SInt::umin(self.umax_value(), rhs.umax_value() - 1) + 1;
    Self::non_empty(lo, up)
  }

  /// The possible results of a signed remainder.
  #[must_use] pub fn srem(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }

    if rhs.is_single_element() {
      let rhs_int = rhs.single_element();
      if rhs_int.is_zero() { return self.empty_like() }
      if self.is_single_element() {
        return Self::single(self.single_element().srem(rhs_int))
      }
    }

    let abs_rhs = rhs.abs(false);
    let mut min_abs_rhs = abs_rhs.umin_value();
    let max_abs_rhs = abs_rhs.umax_value();
    if max_abs_rhs.is_zero() { return self.empty_like() }
    if min_abs_rhs.is_zero() { min_abs_rhs = min_abs_rhs + 1 }

    let min_lhs = self.smin_value();
    let max_lhs = self.smax_value();

    if min_lhs.is_non_neg() {
      // Non-negative lhs: same logic as urem.
      if max_lhs.ult(min_abs_rhs) {
        return *self
      }
      let lo = SInt::zero(self.width());
      let up = SInt::umin(max_lhs, max_abs_rhs - 1) + 1;
      Self::new(lo, up)
    } else if max_lhs.is_neg() {
      // Negative lhs: result is negative, bounded below by -(|R| - 1).
      if min_lhs.ugt(-min_abs_rhs) {
        return *self
      }
      let lo = SInt::umax(min_lhs, -max_abs_rhs + 1);
      let up = SInt::new(self.width(), 1);
      Self::new(lo, up)
    } else {
      // lhs crosses zero.
      let lo = SInt::umax(min_lhs, -max_abs_rhs + 1);
      let up = SInt::umin(max_lhs, max_abs_rhs - 1) + 1;
      Self::new(lo, up)
    }
  }

  /// Unsigned saturating addition of the ranges.
  #[must_use] pub fn uadd_sat(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }
    let lo = self.umin_value().uadd_sat(rhs.umin_value());
    let up = self.umax_value().uadd_sat(rhs.umax_value()) + 1;
    Self::non_empty(lo, up)
  }

  /// Signed saturating addition of the ranges.
  #[must_use] pub fn sadd_sat(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }
    let lo = self.smin_value().sadd_sat(rhs.smin_value());
    let up = self.smax_value().sadd_sat(rhs.smax_value()) + 1;
    Self::non_empty(lo, up)
  }

  /// Unsigned saturating subtraction of the ranges.
  #[must_use] pub fn usub_sat(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }
    let lo = self.umin_value().usub_sat(rhs.umax_value());
    let up = self.umax_value().usub_sat(rhs.umin_value()) + 1;
    Self::non_empty(lo, up)
  }

  /// Signed saturating subtraction of the ranges.
  #[must_use] pub fn ssub_sat(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }
    let lo = self.smin_value().ssub_sat(rhs.smax_value());
    let up = self.smax_value().ssub_sat(rhs.smin_value()) + 1;
    Self::non_empty(lo, up)
  }

  /// Unsigned saturating multiplication of the ranges.
  #[must_use] pub fn umul_sat(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }
    let lo = self.umin_value().umul_sat(rhs.umin_value());
    let up = self.umax_value().umul_sat(rhs.umax_value()) + 1;
    Self::non_empty(lo, up)
  }

  /// Signed saturating multiplication of the ranges.
  #[must_use] pub fn smul_sat(&self, rhs: &Self) -> Self {
    if self.is_empty_set() || rhs.is_empty_set() { return self.empty_like() }

    let (min, max) = (self.smin_value(), self.smax_value());
    let (rhs_min, rhs_max) = (rhs.smin_value(), rhs.smax_value());
    let products = [
      min.smul_sat(rhs_min), min.smul_sat(rhs_max), max.smul_sat(rhs_min), max.smul_sat(rhs_max),
    ];
    let lo = products.iter().copied().reduce(SInt::smin).expect("nonempty");
    let up = products.iter().copied().reduce(SInt::smax).expect("nonempty");
    Self::non_empty(lo, up + 1)
  }

  /// The absolute values of the set. If the set contains signed min, the
  /// result contains signed min iff `int_min_is_poison` is false.
  #[must_use] pub fn abs(&self, int_min_is_poison: bool) -> Self {
    if self.is_empty_set() { return *self }
    let width = self.width();

    if self.is_sign_wrapped_set() {
      let mut lo = SInt::umin(self.lower, -self.upper + 1);
      // Check whether the range crosses zero.
      if self.upper.is_positive() || !self.lower.is_positive() {
        lo = SInt::zero(width);
      }
      return if int_min_is_poison {
        Self::new(lo, SInt::smin_value(width))
      } else {
        Self::new(lo, SInt::smin_value(width) + 1)
      }
    }

    let mut smin = self.smin_value();
    let smax = self.smax_value();

    if int_min_is_poison && smin.is_smin_value() {
      if smax.is_smin_value() { return self.empty_like() }
      smin = smin + 1;
    }

    // All non-negative.
    if smin.is_non_neg() { return *self }

    // All negative.
    if smax.is_neg() {
      return Self::new(-smax, -smin + 1)
    }

    // Range crosses zero.
    Self::new(SInt::zero(width), SInt::umax(-smin, smax) + 1)
  }

  /// The complement set.
  #[must_use] pub fn inverse(&self) -> Self {
    if self.is_full_set() { return self.empty_like() }
    if self.is_empty_set() { return self.full_like() }
    Self { lower: self.upper, upper: self.lower }
  }

  /// The negation of every value in the set; signed min negates to itself.
  #[must_use] pub fn negate(&self) -> Self {
    if self.is_empty_set() || self.is_full_set() { return *self }

    // [2, 5) = {2, 3, 4} => {-4, -3, -2} = [-4, -1)
    let lo = -(self.upper - 1);
    // [-5, 1) includes both 0 and -5 = smin, which negates to itself.
    let up = if self.lower.is_smin_value() { self.lower } else { -self.lower + 1 };
    Self::new(lo, up)
  }

  /// Render the range for diagnostics: a single value plain, otherwise the
  /// bounds as `>=L,<=U` in the chosen domain.
  #[must_use] pub fn to_display_string(&self, as_unsigned: bool) -> String {
    if self.is_single_element() {
      let v = self.single_element();
      return if as_unsigned { v.uval().to_string() } else { v.sval().to_string() }
    }
    if self.is_empty_set() { return "||".into() }
    if self.is_full_set() { return "|any|".into() }
    let fmt = |v: SInt| if as_unsigned { v.uval().to_string() } else { v.sval().to_string() };
    let wrapped = if as_unsigned { self.is_wrapped_set() } else { self.is_sign_wrapped_set() };
    let (min, max) = (self.min_value(as_unsigned), self.max_value(as_unsigned));
    if wrapped {
      format!("|<={}&>={}|", fmt(self.upper - 1), fmt(self.lower))
    } else {
      format!("|>={},<={}|", fmt(min), fmt(max))
    }
  }
}

impl std::fmt::Debug for ConstantRange {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.is_empty_set() {
      write!(f, "[empty i{}]", self.width().bits())
    } else if self.is_full_set() {
      write!(f, "[full i{}]", self.width().bits())
    } else {
      write!(f, "[{}, {})", self.lower.uval(), self.upper.uval())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  const W: IntWidth = IntWidth::W8;

  fn s(v: u64) -> SInt { SInt::new(W, v) }

  fn range(l: u64, u: u64) -> ConstantRange { ConstantRange::new(s(l), s(u)) }

  /// Enumerate the members of a range over the 8-bit universe.
  fn members(r: &ConstantRange) -> Vec<u64> {
    (0..=255u64).filter(|&v| r.contains(s(v))).collect()
  }

  #[test]
  fn empty_full_encoding() {
    assert!(ConstantRange::empty(W).is_empty_set());
    assert!(ConstantRange::full(W).is_full_set());
    assert_eq!(members(&ConstantRange::empty(W)).len(), 0);
    assert_eq!(members(&ConstantRange::full(W)).len(), 256);
  }

  #[test]
  fn from_relations() {
    // for the set {0..255}
    assert_eq!(members(&ConstantRange::from(RelationalOperation::Eq, s(1), false)), vec![1]);
    let ne = ConstantRange::from(RelationalOperation::Ne, s(1), false);
    assert_eq!(members(&ne).len(), 255);
    assert!(!ne.contains(s(1)));
    let ge = ConstantRange::from(RelationalOperation::Ge, s(250), false);
    assert_eq!(members(&ge), vec![250, 251, 252, 253, 254, 255]);
    let lt = ConstantRange::from(RelationalOperation::Lt, s(3), false);
    assert_eq!(members(&lt), vec![0, 1, 2]);
    // signed: x < 0 is {128..255} viewed unsigned
    let neg = ConstantRange::from(RelationalOperation::Lt, s(0), true);
    assert_eq!(members(&neg).len(), 128);
    assert!(neg.contains(s(255)));
    assert!(!neg.contains(s(0)));
  }

  #[test]
  fn from_boundary_cases() {
    assert!(ConstantRange::from(RelationalOperation::Lt, s(0), false).is_empty_set());
    assert!(ConstantRange::from(RelationalOperation::Gt, s(255), false).is_empty_set());
    assert!(ConstantRange::from(RelationalOperation::Le, s(255), false).is_full_set());
    assert!(ConstantRange::from(RelationalOperation::Ge, s(0), false).is_full_set());
  }

  #[test]
  fn wrapped_membership() {
    let r = range(250, 5);
    assert!(r.is_wrapped_set());
    assert!(r.contains(s(250)));
    assert!(r.contains(s(0)));
    assert!(r.contains(s(4)));
    assert!(!r.contains(s(5)));
    assert!(!r.contains(s(100)));
  }

  #[test]
  fn min_max_values() {
    let r = range(250, 5); // {250..255, 0..4}
    assert_eq!(r.umin_value().uval(), 0);
    assert_eq!(r.umax_value().uval(), 255);
    assert_eq!(r.smin_value().sval(), -6);
    assert_eq!(r.smax_value().sval(), 4);
  }

  fn naive_binary(
    a: &ConstantRange, b: &ConstantRange, f: impl Fn(u64, u64) -> Option<u64>,
  ) -> Vec<u64> {
    let mut out = vec![];
    for x in members(a) {
      for y in members(b) {
        if let Some(r) = f(x, y) {
          out.push(r & 0xFF);
        }
      }
    }
    out
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn intersect_sound(a in 0u64..256, b in 0u64..256, c in 0u64..256, d in 0u64..256) {
      let r1 = ConstantRange::non_empty(s(a), s(b));
      let r2 = ConstantRange::non_empty(s(c), s(d));
      for ty in [PreferredRangeType::Smallest, PreferredRangeType::Unsigned, PreferredRangeType::Signed] {
        let isect = r1.intersect_with(&r2, ty);
        for v in 0..=255u64 {
          if r1.contains(s(v)) && r2.contains(s(v)) {
            prop_assert!(isect.contains(s(v)), "{v} lost from {r1:?} ∩ {r2:?} = {isect:?}");
          }
        }
      }
    }

    #[test]
    fn union_sound(a in 0u64..256, b in 0u64..256, c in 0u64..256, d in 0u64..256) {
      let r1 = ConstantRange::non_empty(s(a), s(b));
      let r2 = ConstantRange::non_empty(s(c), s(d));
      for ty in [PreferredRangeType::Smallest, PreferredRangeType::Unsigned, PreferredRangeType::Signed] {
        let un = r1.union_with(&r2, ty);
        for v in 0..=255u64 {
          if r1.contains(s(v)) || r2.contains(s(v)) {
            prop_assert!(un.contains(s(v)), "{v} lost from {r1:?} ∪ {r2:?} = {un:?}");
          }
        }
      }
    }

    #[test]
    fn add_sound(a in 0u64..256, b in 0u64..256, c in 0u64..256, d in 0u64..256) {
      let r1 = ConstantRange::non_empty(s(a), s(b));
      let r2 = ConstantRange::non_empty(s(c), s(d));
      let sum = r1.add(&r2);
      for v in naive_binary(&r1, &r2, |x, y| Some(x.wrapping_add(y))) {
        prop_assert!(sum.contains(s(v)));
      }
    }

    #[test]
    fn sub_sound(a in 0u64..256, b in 0u64..256, c in 0u64..256, d in 0u64..256) {
      let r1 = ConstantRange::non_empty(s(a), s(b));
      let r2 = ConstantRange::non_empty(s(c), s(d));
      let diff = r1.sub(&r2);
      for v in naive_binary(&r1, &r2, |x, y| Some(x.wrapping_sub(y))) {
        prop_assert!(diff.contains(s(v)));
      }
    }

    #[test]
    fn udiv_sound(a in 0u64..256, b in 0u64..256, c in 0u64..256, d in 0u64..256) {
      let r1 = ConstantRange::non_empty(s(a), s(b));
      let r2 = ConstantRange::non_empty(s(c), s(d));
      let q = r1.udiv(&r2);
      for v in naive_binary(&r1, &r2, |x, y| (y != 0).then(|| x / y)) {
        prop_assert!(q.contains(s(v)), "{v} lost from {r1:?} / {r2:?} = {q:?}");
      }
    }

    #[test]
    fn sdiv_sound(a in 0u64..256, b in 0u64..256, c in 0u64..256, d in 0u64..256) {
      let r1 = ConstantRange::non_empty(s(a), s(b));
      let r2 = ConstantRange::non_empty(s(c), s(d));
      let q = r1.sdiv(&r2);
      let f = |x: u64, y: u64| {
        let (x, y) = (x as u8 as i8, y as u8 as i8);
        if y == 0 { return None }
        Some(x.wrapping_div(y) as u8 as u64)
      };
      for v in naive_binary(&r1, &r2, f) {
        prop_assert!(q.contains(s(v)), "{v} lost from {r1:?} sdiv {r2:?} = {q:?}");
      }
    }

    #[test]
    fn rem_sound(a in 0u64..256, b in 0u64..256, c in 0u64..256, d in 0u64..256) {
      let r1 = ConstantRange::non_empty(s(a), s(b));
      let r2 = ConstantRange::non_empty(s(c), s(d));
      let ur = r1.urem(&r2);
      for v in naive_binary(&r1, &r2, |x, y| (y != 0).then(|| x % y)) {
        prop_assert!(ur.contains(s(v)));
      }
      let sr = r1.srem(&r2);
      let f = |x: u64, y: u64| {
        let (x, y) = (x as u8 as i8, y as u8 as i8);
        if y == 0 { return None }
        Some(x.wrapping_rem(y) as u8 as u64)
      };
      for v in naive_binary(&r1, &r2, f) {
        prop_assert!(sr.contains(s(v)), "{v} lost from {r1:?} srem {r2:?} = {sr:?}");
      }
    }

    #[test]
    fn mul_sound(a in 0u64..256, b in 0u64..256, c in 0u64..256, d in 0u64..256) {
      let r1 = ConstantRange::non_empty(s(a), s(b));
      let r2 = ConstantRange::non_empty(s(c), s(d));
      let um = r1.umul(&r2);
      for x in members(&r1) {
        for y in members(&r2) {
          if x * y <= 255 {
            prop_assert!(um.contains(s(x * y)));
          }
        }
      }
    }

    #[test]
    fn truncate_sound(a in 0u64..65536, b in 0u64..65536) {
      let w16 = IntWidth::W16;
      let r = ConstantRange::non_empty(SInt::new(w16, a), SInt::new(w16, b));
      let t = r.truncate(W);
      for v in 0..=65535u64 {
        if r.contains(SInt::new(w16, v)) {
          prop_assert!(t.contains(s(v & 0xFF)), "{v} lost from {r:?} trunc = {t:?}");
        }
      }
    }

    #[test]
    fn extend_sound(a in 0u64..256, b in 0u64..256) {
      let r = ConstantRange::non_empty(s(a), s(b));
      let w16 = IntWidth::W16;
      let z = r.zero_extend(w16);
      let sx = r.sign_extend(w16);
      for v in members(&r) {
        prop_assert!(z.contains(SInt::new(w16, v)));
        let sv = v as u8 as i8 as i64 as u64;
        prop_assert!(sx.contains(SInt::new(w16, sv)));
      }
    }

    #[test]
    fn negate_abs_inverse_sound(a in 0u64..256, b in 0u64..256) {
      let r = ConstantRange::non_empty(s(a), s(b));
      let neg = r.negate();
      let abs = r.abs(false);
      let inv = r.inverse();
      for v in 0..=255u64 {
        let inside = r.contains(s(v));
        prop_assert_eq!(inv.contains(s(v)), !inside);
        if inside {
          prop_assert!(neg.contains(s(v.wrapping_neg() & 0xFF)));
          let x = v as u8 as i8;
          prop_assert!(abs.contains(s(x.wrapping_abs() as u8 as u64)));
        }
      }
    }
  }

  #[test]
  fn truncate_examples() {
    // [60000, 255) at 16 bits covers the whole 8-bit range
    let w16 = IntWidth::W16;
    let r = ConstantRange::new(SInt::new(w16, 60000), SInt::new(w16, 255));
    assert!(r.truncate(W).is_full_set());
  }

  #[test]
  fn negate_examples() {
    // [2, 5) = {2, 3, 4} => [-4, -1)
    let r = range(2, 5).negate();
    assert_eq!(members(&r), vec![0xFC, 0xFD, 0xFE]);
  }
}
