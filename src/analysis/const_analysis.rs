//! Constant analysis: per-expression constant values over the value-analysis
//! framework, with overflow-aware folding and the diagnostics that come with
//! it (arithmetic overflow, division by zero, shift-length overflow, typecast
//! overflow, out-of-bounds array access, zero-step ranges).
//!
//! The analysis runs twice at different phases of the pipeline; diagnostics
//! are only emitted on the final (`is_stable`) run to avoid duplicates.

use if_chain::if_chain;

use crate::analysis::engine::{Analysis, Engine};
use crate::analysis::value::{
  is_tracked_gv_base, should_be_analysed, AbstractValue, GlobalStateStore, State, StateKey,
  ValueFrame,
};
use crate::analysis::AnalysisWrapper;
use crate::diag::{DiagAdapter, DiagKind};
use crate::overflow;
use crate::types::ir::{
  Attribute, BinOp, BlockId, ExprId, ExprKind, Expression, Func, IntrinsicKind, Literal,
  Package, Terminator, UnaryOp, Value,
};
use crate::types::{IntTy, OverflowStrategy, Ty, Types};
use crate::Symbol;

/// A known constant value of an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
  /// An unsigned integer (value of the declared width, zero-extended).
  UInt(u64),
  /// A signed integer (value of the declared width, sign-extended).
  Int(i64),
  /// A float.
  Float(f64),
  /// A code point.
  Rune(char),
  /// A boolean.
  Bool(bool),
  /// A string.
  Str(Symbol),
}

impl AbstractValue for ConstValue {
  fn join(&self, other: &Self) -> Option<Self> {
    (self == other).then(|| self.clone())
  }
}

impl ConstValue {
  /// Render the value for diagnostics.
  #[must_use] pub fn to_display_string(&self) -> String {
    match self {
      Self::UInt(v) => v.to_string(),
      Self::Int(v) => v.to_string(),
      Self::Float(v) => v.to_string(),
      Self::Rune(c) => format!("r'{c}'"),
      Self::Bool(b) => b.to_string(),
      Self::Str(s) => format!("{:?}", s.as_str()),
    }
  }

  /// The integer payload and signedness, for integers.
  #[must_use] pub fn as_int(&self) -> Option<(bool, i64, u64)> {
    match *self {
      Self::Int(v) => Some((true, v, v as u64)),
      Self::UInt(v) => Some((false, v as i64, v)),
      _ => None,
    }
  }
}

/// Resolve a literal operand to a [`ConstValue`].
#[must_use] pub fn const_of_literal(lit: Literal, _types: &Types) -> Option<ConstValue> {
  match lit {
    Literal::Bool(b) => Some(ConstValue::Bool(b)),
    Literal::Rune(c) => Some(ConstValue::Rune(c)),
    Literal::Str(s) => Some(ConstValue::Str(s)),
    Literal::Int(ity, bits) => Some(if ity.signed {
      ConstValue::Int(overflow::read_signed(ity, bits))
    } else {
      ConstValue::UInt(bits)
    }),
    Literal::Float(_, bits) => Some(ConstValue::Float(f64::from_bits(bits))),
    Literal::Unit => None,
  }
}

/// A recogniser for the standard-library functions the analysis models.
/// Matching is on the source identifier, the parent custom type and the
/// defining package, verbatim. If the standard library's naming changes,
/// recognition silently degrades to `⊤`.
struct FuncInfo {
  identifier: &'static str,
  /// The parent custom type's identifier; a `*` suffix makes it a prefix
  /// match (used for the mangled box classes).
  parent: &'static str,
  /// The required defining package, or `None` for any.
  package: Option<&'static str>,
}

const BOX_ARRAY_INIT: FuncInfo =
  FuncInfo { identifier: "init", parent: "$BOX_RNat5Array*", package: None };
const ARRAY_INIT: FuncInfo =
  FuncInfo { identifier: "init", parent: "Array", package: Some("std.core") };
const ARRAY_SLICE: FuncInfo =
  FuncInfo { identifier: "slice", parent: "Array", package: Some("std.core") };
const ARRAY_BRACKETS: FuncInfo =
  FuncInfo { identifier: "[]", parent: "Array", package: Some("std.core") };
const ARRAY_GET: FuncInfo =
  FuncInfo { identifier: "get", parent: "Array", package: Some("std.core") };
const ARRAY_SET: FuncInfo =
  FuncInfo { identifier: "set", parent: "Array", package: Some("std.core") };
const ARRAY_SIZE_GET: FuncInfo =
  FuncInfo { identifier: "$sizeget", parent: "Array", package: Some("std.core") };
const RANGE_INIT: FuncInfo =
  FuncInfo { identifier: "init", parent: "Range", package: Some("std.core") };

/// The index of the implicit `this` argument.
const THIS_ARG_INDEX: usize = 0;
/// `struct Array<T> { let rawptr; let start; let len; ... }`: the index of
/// the `len` field.
const LEN_FIELD_INDEX: u32 = 2;

impl FuncInfo {
  fn matches(&self, callee: Option<(Symbol, Option<Symbol>, Symbol)>) -> bool {
    let Some((name, parent, package)) = callee else { return false };
    if name.as_str() != self.identifier { return false }
    let parent_ok = match (parent, self.parent.strip_suffix('*')) {
      (Some(p), Some(prefix)) => p.as_str().starts_with(prefix),
      (Some(p), None) => p.as_str() == self.parent,
      (None, _) => false,
    };
    if !parent_ok { return false }
    match self.package {
      Some(pkg) => package.as_str() == pkg,
      None => true,
    }
  }
}

/// (identifier, parent custom type identifier, package) of a callee value.
fn callee_info(package: &Package, v: Value) -> Option<(Symbol, Option<Symbol>, Symbol)> {
  match v {
    Value::Func(fid) => {
      let f = &package.funcs[fid];
      Some((f.name, f.parent_def.map(|d| package.defs[d].name), f.package))
    }
    Value::Imported(iid) => {
      let f = &package.imports[iid];
      Some((f.name, f.parent_def.map(|d| package.defs[d].name), f.package))
    }
    _ => None,
  }
}

/// How an expression that may raise behaved under the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExceptionKind {
  /// Evaluation is known to succeed.
  Success,
  /// Evaluation is known to raise.
  Fail,
  /// Unknown.
  Na,
}

/// The constant analysis over one function.
pub struct ConstAnalysis<'a> {
  frame: ValueFrame<'a, ConstValue>,
  diag: &'a DiagAdapter,
  is_stable: bool,
  /// Arithmetic expressions proved to never overflow; the propagation pass
  /// turns these into `NEVER_OVERFLOW` attributes.
  never_overflow: Vec<ExprId>,
  /// VArray accesses proved in-bounds; the propagation pass clears their
  /// `NEED_CHECK_ARRAY_BOUND` attribute.
  proved_in_bounds: Vec<ExprId>,
}

impl<'a> ConstAnalysis<'a> {
  /// Create the analysis for one function run.
  #[must_use] pub fn new(
    package: &'a Package, types: &'a Types, diag: &'a DiagAdapter, is_stable: bool,
    global_state: State<ConstValue>,
  ) -> Self {
    let mut frame = ValueFrame::new(package, types, const_of_literal);
    frame.global_state = global_state;
    Self { frame, diag, is_stable, never_overflow: vec![], proved_in_bounds: vec![] }
  }

  /// The expressions proved to never overflow.
  #[must_use] pub fn never_overflow(&self) -> &[ExprId] { &self.never_overflow }

  /// The VArray accesses proved in-bounds.
  #[must_use] pub fn proved_in_bounds(&self) -> &[ExprId] { &self.proved_in_bounds }

  fn types(&self) -> &'a Types { self.frame.types }

  fn value_of(&self, state: &State<ConstValue>, v: Value) -> Option<ConstValue> {
    self.frame.abs_value(state, v)
  }

  fn type_range_prompt(&self, ty: Ty) -> String {
    let ity = self.types().as_int(ty).expect("integer type");
    format!("range of {} is {} ~ {}", self.types().to_string(ty), ity.min_value(), ity.max_value())
  }

  // =============== Error reporting ===============

  fn raise_div_by_zero(&self, expr: &Expression, op: BinOp) {
    if self.is_stable {
      let prompt = if op == BinOp::Div { "divide" } else { "modulo" };
      self.diag.diagnose(DiagKind::DivisorIsZero, expr.loc).main_hint(prompt);
    }
  }

  fn raise_arithmetic_overflow(
    &self, func: &Func, expr: &Expression, op: BinOp, left: &ConstValue, right: &ConstValue,
  ) {
    if self.is_stable {
      let ty = self.types().to_string(expr.ty);
      let rhs_ty = self
        .types()
        .to_string(self.frame.package.value_ty(func, expr.operands[1], self.types()));
      let hint = format!(
        "{ty}({}) {} {rhs_ty}({})",
        left.to_display_string(), op.token(), right.to_display_string()
      );
      self
        .diag
        .diagnose(DiagKind::ArithmeticOperatorOverflow, expr.loc)
        .main_hint(op.token())
        .main_hint(hint)
        .note(self.type_range_prompt(expr.ty));
    }
  }

  fn raise_negative_shift(&self, func: &Func, expr: &Expression, right: i64) {
    if self.is_stable {
      let lhs_ty = self.frame.package.value_ty(func, expr.operands[0], self.types());
      self
        .diag
        .diagnose(DiagKind::ShiftLengthOverflow, expr.loc)
        .main_hint(right.to_string())
        .main_hint(self.types().to_string(lhs_ty))
        .note("right operand can not be negative");
    }
  }

  fn raise_overshift(&self, func: &Func, expr: &Expression, right: u64, bits: u32) {
    if self.is_stable {
      let lhs_ty = self.frame.package.value_ty(func, expr.operands[0], self.types());
      let lhs_ty_str = self.types().to_string(lhs_ty);
      self
        .diag
        .diagnose(DiagKind::ShiftLengthOverflow, expr.loc)
        .main_hint(right.to_string())
        .main_hint(lhs_ty_str.clone())
        .note(format!(
          "the type of left operand is {lhs_ty_str}, the most bits that expected to shift are {}",
          bits - 1
        ));
    }
  }

  fn raise_typecast_overflow(&self, func: &Func, expr: &Expression, src: &ConstValue) {
    if self.is_stable {
      let src_ty = self.frame.package.value_ty(func, expr.operands[0], self.types());
      self
        .diag
        .diagnose(DiagKind::TypecastOverflow, expr.loc)
        .main_hint(format!("{}({})", self.types().to_string(src_ty), src.to_display_string()))
        .main_hint(self.types().to_string(expr.ty))
        .note(self.type_range_prompt(expr.ty));
    }
  }

  fn raise_out_of_bounds(&self, expr: &Expression, len: u64, index: i64) -> ExceptionKind {
    if index < 0 {
      if self.is_stable {
        self
          .diag
          .diagnose(DiagKind::IdxOutOfBounds, expr.loc)
          .main_hint("array index can not be negative");
      }
      ExceptionKind::Fail
    } else if index as u64 >= len {
      if self.is_stable {
        self.diag.diagnose(DiagKind::IdxOutOfBounds, expr.loc).main_hint(format!(
          "array index {index} is past the end of array (which contains {len} elements)"
        ));
      }
      ExceptionKind::Fail
    } else {
      ExceptionKind::Success
    }
  }

  // =============== Unary expressions ===============

  fn handle_unary(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId,
    op: UnaryOp, strategy: OverflowStrategy,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    let Some(operand) = self.value_of(state, expr.operands[0]) else {
      state.set_to_top(id);
      return ExceptionKind::Na
    };
    match (op, operand) {
      (UnaryOp::Not, ConstValue::Bool(b)) => {
        state.update(id, ConstValue::Bool(!b));
        ExceptionKind::Success
      }
      (UnaryOp::BitNot, v) => {
        if let (Some((_, _, bits)), Some(ity)) = (v.as_int(), self.types().as_int(expr.ty)) {
          let mask = overflow::wrap_to(ity, -1);
          state.update(id, int_result(ity, !bits & mask));
        } else {
          state.set_to_top(id);
        }
        ExceptionKind::Success
      }
      (UnaryOp::Neg, v @ (ConstValue::Int(_) | ConstValue::UInt(_))) => {
        let ity = self.types().as_int(expr.ty).expect("integer type");
        let (res, ovf) = match v {
          ConstValue::Int(x) => overflow::int_neg(ity, x, strategy),
          ConstValue::UInt(x) => overflow::uint_neg(ity, x, strategy),
          _ => unreachable!(),
        };
        if ovf && strategy == OverflowStrategy::Throwing {
          if self.is_stable {
            let hint = format!("-{}({})", self.types().to_string(expr.ty), v.to_display_string());
            self
              .diag
              .diagnose(DiagKind::ArithmeticOperatorOverflow, expr.loc)
              .main_hint("-")
              .main_hint(hint)
              .note(self.type_range_prompt(expr.ty));
          }
          state.set_to_top(id);
          ExceptionKind::Fail
        } else {
          if !ovf {
            self.never_overflow.push(id);
          }
          state.update(id, int_result(ity, res));
          ExceptionKind::Success
        }
      }
      (UnaryOp::Neg, ConstValue::Float(v)) => {
        state.update(id, ConstValue::Float(-v));
        ExceptionKind::Success
      }
      _ => {
        state.set_to_top(id);
        ExceptionKind::Na
      }
    }
  }

  #[allow(clippy::too_many_arguments)]
  fn finish_int_arith(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId, ity: IntTy,
    res: u64, ovf: bool, strategy: OverflowStrategy, op: BinOp,
    operands_for_diag: impl FnOnce() -> (ConstValue, ConstValue),
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    if ovf && strategy == OverflowStrategy::Throwing {
      let (l, r) = operands_for_diag();
      self.raise_arithmetic_overflow(func, expr, op, &l, &r);
      state.set_to_top(id);
      ExceptionKind::Fail
    } else {
      if !ovf {
        self.never_overflow.push(id);
      }
      state.update(id, int_result(ity, res));
      ExceptionKind::Success
    }
  }

  // =============== Binary expressions ===============

  fn handle_binary(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId,
    op: BinOp, strategy: OverflowStrategy,
  ) -> ExceptionKind {
    match op {
      BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod =>
        self.handle_arithmetic(state, func, id, op, strategy),
      BinOp::Exp => self.handle_exp(state, func, id, strategy),
      BinOp::LShift | BinOp::RShift | BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr =>
        self.handle_bitwise(state, func, id, op),
      BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Equal | BinOp::NotEqual => {
        self.handle_relational(state, func, id, op);
        ExceptionKind::Na
      }
      BinOp::And | BinOp::Or => {
        self.handle_logical(state, func, id, op);
        ExceptionKind::Na
      }
    }
  }

  fn handle_arithmetic(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId,
    op: BinOp, strategy: OverflowStrategy,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    let lhs = self.value_of(state, expr.operands[0]);
    let rhs = self.value_of(state, expr.operands[1]);

    if lhs.is_none() && rhs.is_none() {
      // `a - a` is zero even when `a` is unknown
      if op == BinOp::Sub && expr.operands[0] == expr.operands[1] {
        if let Some(ity) = self.types().as_int(expr.ty) {
          state.update(id, int_result(ity, 0));
          return ExceptionKind::Success
        }
      }
      state.set_to_top(id);
      return ExceptionKind::Na
    }

    let Some(ity) = self.types().as_int(expr.ty) else {
      return self.handle_float_arithmetic(state, func, id, op, lhs, rhs)
    };

    // trivial folds that don't need both operands
    if let Some(trivial) = self.handle_trivial_arithmetic(state, func, id, op, &lhs, &rhs, ity) {
      return trivial
    }
    if op == BinOp::Sub && expr.operands[0] == expr.operands[1] {
      state.update(id, int_result(ity, 0));
      return ExceptionKind::Success
    }

    let (Some(l), Some(r)) = (lhs, rhs) else {
      state.set_to_top(id);
      return ExceptionKind::Na
    };

    let (res, ovf) = if ity.signed {
      let (Some((_, x, _)), Some((_, y, _))) = (l.as_int(), r.as_int()) else {
        state.set_to_top(id);
        return ExceptionKind::Na
      };
      overflow::int_binop(ity, op, x, y, strategy)
    } else {
      let (Some((_, _, x)), Some((_, _, y))) = (l.as_int(), r.as_int()) else {
        state.set_to_top(id);
        return ExceptionKind::Na
      };
      overflow::uint_binop(ity, op, x, y, strategy)
    };
    self.finish_int_arith(state, func, id, ity, res, ovf, strategy, op, || (l, r))
  }

  /// Trivial arithmetic: `a * 0`, `0 * a`, `0 / a`, `a % 1` and the
  /// divide-by-zero errors. `a + 0` is *not* trivial (its result is not a
  /// constant); the propagation pass simplifies it instead.
  fn handle_trivial_arithmetic(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId, op: BinOp,
    lhs: &Option<ConstValue>, rhs: &Option<ConstValue>, ity: IntTy,
  ) -> Option<ExceptionKind> {
    let expr = &func.exprs[id];
    if let Some(r) = rhs {
      if let Some((_, rv, _)) = r.as_int() {
        if rv == 0 {
          match op {
            BinOp::Div | BinOp::Mod => {
              self.raise_div_by_zero(expr, op);
              state.set_to_top(id);
              return Some(ExceptionKind::Fail)
            }
            BinOp::Mul => {
              state.update(id, int_result(ity, 0));
              return Some(ExceptionKind::Success)
            }
            _ => {}
          }
        }
        if rv == 1 && op == BinOp::Mod {
          state.update(id, int_result(ity, 0));
          return Some(ExceptionKind::Success)
        }
      }
    }
    if_chain! {
      if let Some(l) = lhs;
      if let Some((_, 0, _)) = l.as_int();
      if matches!(op, BinOp::Mul | BinOp::Div | BinOp::Mod);
      then {
        state.update(id, int_result(ity, 0));
        return Some(ExceptionKind::Success)
      }
    }
    None
  }

  fn handle_float_arithmetic(
    &mut self, state: &mut State<ConstValue>, _func: &Func, id: ExprId, op: BinOp,
    lhs: Option<ConstValue>, rhs: Option<ConstValue>,
  ) -> ExceptionKind {
    if_chain! {
      if let (Some(ConstValue::Float(x)), Some(ConstValue::Float(y))) = (lhs, rhs);
      then {
        let res = match op {
          BinOp::Add => x + y,
          BinOp::Sub => x - y,
          BinOp::Mul => x * y,
          BinOp::Div => x / y,
          BinOp::Mod => x % y,
          _ => f64::NAN,
        };
        if res.is_finite() {
          state.update(id, ConstValue::Float(res));
          return ExceptionKind::Na
        }
      }
    }
    state.set_to_top(id);
    ExceptionKind::Na
  }

  /// `a ** b`: `a ** 0 = 1` (before `0 ** a = 0`, because `0 ** 0 = 1`),
  /// `0 ** a = 0`, `1 ** a = 1`, else fast binary exponentiation with
  /// overflow detection.
  fn handle_exp(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId,
    strategy: OverflowStrategy,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    if !self.types().is_integer(expr.ty) {
      state.set_to_top(id);
      return ExceptionKind::Na
    }
    let lhs = self.value_of(state, expr.operands[0]);
    let rhs = self.value_of(state, expr.operands[1]);
    if let Some(ConstValue::UInt(0)) = rhs {
      state.update(id, ConstValue::Int(1));
      return ExceptionKind::Success
    }
    if let Some(ConstValue::Int(v @ (0 | 1))) = lhs {
      state.update(id, ConstValue::Int(v));
      return ExceptionKind::Success
    }
    let (Some(ConstValue::Int(x)), Some(ConstValue::UInt(y))) = (lhs, rhs) else {
      state.set_to_top(id);
      return ExceptionKind::Na
    };
    let (res, ovf) = overflow::exp(x, y, strategy);
    if ovf && strategy == OverflowStrategy::Throwing {
      self.raise_arithmetic_overflow(
        func, expr, BinOp::Exp, &ConstValue::Int(x), &ConstValue::UInt(y),
      );
      state.set_to_top(id);
      ExceptionKind::Fail
    } else {
      state.update(id, ConstValue::Int(res));
      ExceptionKind::Success
    }
  }

  fn handle_bitwise(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId, op: BinOp,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    let is_shift = matches!(op, BinOp::LShift | BinOp::RShift);
    let lhs = self.value_of(state, expr.operands[0]);
    let rhs = self.value_of(state, expr.operands[1]);

    let Some(r) = rhs else {
      state.set_to_top(id);
      return ExceptionKind::Na
    };
    let Some((r_signed, r_sval, r_bits)) = r.as_int() else {
      state.set_to_top(id);
      return ExceptionKind::Na
    };
    if is_shift {
      if r_signed && r_sval < 0 {
        self.raise_negative_shift(func, expr, r_sval);
        state.set_to_top(id);
        return ExceptionKind::Fail
      }
      let lhs_ty = self.frame.package.value_ty(func, expr.operands[0], self.types());
      let bits = self.types().as_int(lhs_ty).expect("integer type").width.bits();
      if r_bits >= u64::from(bits) {
        self.raise_overshift(func, expr, r_bits, bits);
        state.set_to_top(id);
        return ExceptionKind::Fail
      }
    }
    let Some(l) = lhs else {
      state.set_to_top(id);
      return ExceptionKind::Na
    };
    let Some((l_signed, l_sval, l_bits)) = l.as_int() else {
      state.set_to_top(id);
      return ExceptionKind::Na
    };

    let ity = self.types().as_int(expr.ty).expect("integer type");
    let raw = match op {
      BinOp::LShift => l_bits << r_bits,
      // the left operand's signedness decides arithmetic vs logical shift
      BinOp::RShift if l_signed => (l_sval >> r_bits) as u64,
      BinOp::RShift => l_bits >> r_bits,
      BinOp::BitAnd => l_bits & r_bits,
      BinOp::BitXor => l_bits ^ r_bits,
      BinOp::BitOr => l_bits | r_bits,
      _ => unreachable!("not a bitwise op"),
    };
    state.update(id, int_result(ity, overflow::wrap_to(ity, raw as i128)));
    ExceptionKind::Success
  }

  fn handle_relational(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId, op: BinOp,
  ) {
    let expr = &func.exprs[id];
    let lhs = self.value_of(state, expr.operands[0]);
    let rhs = self.value_of(state, expr.operands[1]);

    // `a == a` / `a != a` fold on operand identity, unless both are floats
    // (NaN breaks reflexivity).
    if expr.operands[0] == expr.operands[1] {
      let lhs_ty = self.frame.package.value_ty(func, expr.operands[0], self.types());
      if !self.types().is_float(lhs_ty) {
        match op {
          BinOp::Equal | BinOp::Le | BinOp::Ge => {
            return state.update(id, ConstValue::Bool(true))
          }
          BinOp::NotEqual | BinOp::Lt | BinOp::Gt => {
            return state.update(id, ConstValue::Bool(false))
          }
          _ => {}
        }
      }
    }

    let (Some(l), Some(r)) = (lhs, rhs) else { return state.set_to_top(id) };
    let res = match (&l, &r) {
      (ConstValue::Int(x), ConstValue::Int(y)) => compare(op, x, y),
      (ConstValue::UInt(x), ConstValue::UInt(y)) => compare(op, x, y),
      (ConstValue::Float(x), ConstValue::Float(y)) => compare_partial(op, x, y),
      (ConstValue::Rune(x), ConstValue::Rune(y)) => compare(op, x, y),
      (ConstValue::Bool(x), ConstValue::Bool(y)) => compare(op, x, y),
      (ConstValue::Str(x), ConstValue::Str(y)) => compare(op, &x.as_str(), &y.as_str()),
      _ => None,
    };
    match res {
      Some(b) => state.update(id, ConstValue::Bool(b)),
      None => state.set_to_top(id),
    }
  }

  /// Short-circuit `&&`/`||`: if either side is known, the other need not
  /// be known.
  fn handle_logical(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId, op: BinOp,
  ) {
    let expr = &func.exprs[id];
    let as_bool = |v: Option<ConstValue>| match v {
      Some(ConstValue::Bool(b)) => Some(b),
      _ => None,
    };
    let lhs = as_bool(self.value_of(state, expr.operands[0]));
    let rhs = as_bool(self.value_of(state, expr.operands[1]));
    let res = match op {
      BinOp::And => match (lhs, rhs) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
      },
      BinOp::Or => match (lhs, rhs) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
      },
      _ => None,
    };
    match res {
      Some(b) => state.update(id, ConstValue::Bool(b)),
      None => state.set_to_top(id),
    }
  }

  // =============== TypeCast ===============

  fn handle_typecast(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId,
    strategy: OverflowStrategy,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    let src = expr.operands[0];
    let src_ty = self.frame.package.value_ty(func, src, self.types());

    if_chain! {
      if let Some(src_ity) = self.types().as_int(src_ty);
      if let Some(dst_ity) = self.types().as_int(expr.ty);
      if let Some(src_val) = self.value_of(state, src);
      if let Some((_, _, bits)) = src_val.as_int();
      then {
        let (res, ovf) = overflow::typecast(src_ity, dst_ity, bits, strategy);
        if ovf && strategy == OverflowStrategy::Throwing {
          self.raise_typecast_overflow(func, expr, &src_val);
          state.set_to_top(id);
          return ExceptionKind::Fail
        }
        state.update(id, int_result(dst_ity, res));
        return ExceptionKind::Success
      }
    }

    if self.frame.propagate_cast_identity(state, func, id) {
      return ExceptionKind::Na
    }
    // No constant folding on casts from floats (or to non-integers).
    state.set_to_top_or_top_ref(id, self.types().is_ref(expr.ty));
    ExceptionKind::Na
  }

  // =============== Apply: standard-library recognitions ===============

  fn handle_apply(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    state.set_to_top_or_top_ref(id, self.types().is_ref(expr.ty));

    let callee = callee_info(self.frame.package, expr.operands[0]);
    let args: Vec<Value> = expr.operands[1..].to_vec();

    if BOX_ARRAY_INIT.matches(callee) {
      self.handle_boxed_array_init(state, &args);
    } else if ARRAY_INIT.matches(callee) {
      self.handle_array_init(state, func, &args);
    } else if ARRAY_SLICE.matches(callee) {
      self.handle_array_slice(state, id, &args);
    } else if ARRAY_SIZE_GET.matches(callee) {
      self.handle_array_size_get(state, id, &args);
    } else if ARRAY_BRACKETS.matches(callee) || ARRAY_GET.matches(callee)
      || ARRAY_SET.matches(callee)
    {
      return self.handle_array_access(state, func, id, &args)
    } else if RANGE_INIT.matches(callee) {
      return self.handle_range_init(state, func, id, &args)
    }
    ExceptionKind::Na
  }

  /// `func init(this: $BOX_RNat5Array…&, array: Array<T>)`: the boxed value
  /// is child 0.
  fn handle_boxed_array_init(&mut self, state: &mut State<ConstValue>, args: &[Value]) {
    if args.len() != 2 { return }
    let boxed = state.child_of(args[THIS_ARG_INDEX], true, 0);
    state.propagate_key(StateKey::Value(args[1]), boxed);
  }

  /// `struct Array<T>` has constructors with one to four parameters besides
  /// `this`; every one of them determines the `len` field.
  fn handle_array_init(&mut self, state: &mut State<ConstValue>, func: &Func, args: &[Value]) {
    if args.is_empty() { return }
    let len_child = state.child_of(args[THIS_ARG_INDEX], true, LEN_FIELD_INDEX);
    match args.len() {
      // init()
      1 => state.update_at(len_child, ConstValue::Int(0)),
      // init(elements: Collection<T>): the collection arrives boxed
      2 => {
        let boxed = state.child_of(args[1], true, 0);
        let obj = state.obj_of(boxed);
        let collection_len = StateKey::Field(obj, LEN_FIELD_INDEX);
        state.propagate_key(collection_len, len_child);
      }
      // init(size, item!) / init(size, initElement)
      3 => {
        if let Some(v) = self.value_of(state, args[1]) {
          state.update_at(len_child, v);
        } else {
          state.propagate_key(StateKey::Value(args[1]), len_child);
        }
      }
      // init(data: RawArray<T>, start, len)
      4 => {
        if let Some(v) = self.value_of(state, args[3]) {
          state.update_at(len_child, v);
        } else {
          state.propagate_key(StateKey::Value(args[3]), len_child);
        }
      }
      _ => log::warn!("unsupported Array init arity {} in {}", args.len(), func.name),
    }
  }

  /// `func slice(start: Int64, len: Int64): Array<T>`
  fn handle_array_slice(&mut self, state: &mut State<ConstValue>, id: ExprId, args: &[Value]) {
    if args.len() != 3 { return }
    let len_child = state.child_of(Value::Local(id), false, LEN_FIELD_INDEX);
    if let Some(v) = self.value_of(state, args[2]) {
      state.update_at(len_child, v);
    } else {
      state.propagate_key(StateKey::Value(args[2]), len_child);
    }
  }

  /// `$sizeget: (Class-$BOX_RNat5Array…) -> Int64`
  fn handle_array_size_get(&mut self, state: &mut State<ConstValue>, id: ExprId, args: &[Value]) {
    if args.len() != 1 { return }
    let boxed = state.child_of(args[THIS_ARG_INDEX], true, 0);
    let obj = state.obj_of(boxed);
    let len_child = StateKey::Field(obj, LEN_FIELD_INDEX);
    state.propagate_key(len_child, StateKey::Value(Value::Local(id)));
  }

  /// `operator []`, `get`, `set`: diagnose provably out-of-bounds indexes.
  fn handle_array_access(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId, args: &[Value],
  ) -> ExceptionKind {
    if args.len() < 2 { return ExceptionKind::Na }
    let len_child = state.child_of(args[THIS_ARG_INDEX], true, LEN_FIELD_INDEX);
    let Some(ConstValue::Int(len)) = state.value_at(len_child).cloned() else {
      return ExceptionKind::Na
    };
    let Some(ConstValue::Int(index)) = self.value_of(state, args[1]) else {
      return ExceptionKind::Na
    };
    self.raise_out_of_bounds(&func.exprs[id], len as u64, index)
  }

  /// `Range.init(start, end, step, hasStart, hasEnd, isClosed)` plus `this`:
  /// a known zero step is an error.
  fn handle_range_init(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId, args: &[Value],
  ) -> ExceptionKind {
    if args.len() != 7 { return ExceptionKind::Na }
    let Some(ConstValue::Int(step)) = self.value_of(state, args[3]) else {
      return ExceptionKind::Na
    };
    if step != 0 { return ExceptionKind::Success }
    if self.is_stable {
      self.diag.diagnose(DiagKind::StepNonZeroRange, func.exprs[id].loc);
      return ExceptionKind::Fail
    }
    ExceptionKind::Na
  }

  // =============== Intrinsics ===============

  fn handle_intrinsic(
    &mut self, state: &mut State<ConstValue>, func: &Func, id: ExprId, kind: IntrinsicKind,
  ) -> ExceptionKind {
    let expr = &func.exprs[id];
    state.set_to_top_or_top_ref(id, self.types().is_ref(expr.ty));

    match kind {
      IntrinsicKind::VArrayGet => {
        // varrayGet(arr, index)
        if expr.operands.len() != 2 { return ExceptionKind::Na }
        let Some(ConstValue::Int(index)) = self.value_of(state, expr.operands[1]) else {
          return ExceptionKind::Na
        };
        let arr_ty = self.frame.package.value_ty(func, expr.operands[0], self.types());
        let Some((_, size)) = self.types().as_varray(arr_ty) else { return ExceptionKind::Na };
        let res = self.raise_out_of_bounds(expr, size, index);
        if res == ExceptionKind::Success {
          self.proved_in_bounds.push(id);
        }
        res
      }
      IntrinsicKind::VArraySet => {
        // varraySet(arr, value, index)
        if expr.operands.len() != 3 { return ExceptionKind::Na }
        let Some(ConstValue::Int(index)) = self.value_of(state, expr.operands[2]) else {
          return ExceptionKind::Na
        };
        let arr_ty = self.frame.package.value_ty(func, expr.operands[0], self.types());
        let Some((_, size)) = self.types().as_varray(arr_ty) else { return ExceptionKind::Na };
        let res = self.raise_out_of_bounds(expr, size, index);
        if res == ExceptionKind::Success {
          self.proved_in_bounds.push(id);
        }
        res
      }
      _ => ExceptionKind::Na,
    }
  }

  // =============== Terminators ===============

  fn handle_branch(
    &self, state: &State<ConstValue>, func: &Func, id: ExprId,
    true_bb: BlockId, false_bb: BlockId,
  ) -> Option<BlockId> {
    match self.value_of(state, func.exprs[id].operands[0]) {
      Some(ConstValue::Bool(true)) => Some(true_bb),
      Some(ConstValue::Bool(false)) => Some(false_bb),
      _ => None,
    }
  }

  fn handle_multibranch(
    &self, state: &State<ConstValue>, func: &Func, id: ExprId,
    default_bb: BlockId, cases: &[(u64, BlockId)],
  ) -> Option<BlockId> {
    let selector = self.value_of(state, func.exprs[id].operands[0])?;
    let bits = match selector {
      ConstValue::Int(v) => v as u64,
      ConstValue::UInt(v) => v,
      ConstValue::Rune(c) => u64::from(u32::from(c)),
      _ => return None,
    };
    for &(case, bb) in cases {
      if case == bits { return Some(bb) }
    }
    Some(default_bb)
  }
}

/// The integer [`ConstValue`] for the raw payload `bits` at type `ity`.
fn int_result(ity: IntTy, bits: u64) -> ConstValue {
  if ity.signed {
    ConstValue::Int(overflow::read_signed(ity, bits))
  } else {
    ConstValue::UInt(bits)
  }
}

fn compare<T: PartialOrd>(op: BinOp, x: &T, y: &T) -> Option<bool> {
  compare_partial(op, x, y)
}

fn compare_partial<T: PartialOrd>(op: BinOp, x: &T, y: &T) -> Option<bool> {
  match op {
    BinOp::Lt => x.partial_cmp(y).map(|o| o.is_lt()),
    BinOp::Le => x.partial_cmp(y).map(|o| o.is_le()),
    BinOp::Gt => x.partial_cmp(y).map(|o| o.is_gt()),
    BinOp::Ge => x.partial_cmp(y).map(|o| o.is_ge()),
    BinOp::Equal => Some(x == y),
    BinOp::NotEqual => Some(x != y),
    _ => None,
  }
}

impl Analysis for ConstAnalysis<'_> {
  type Domain = State<ConstValue>;
  const NAME: &'static str = "const-analysis";

  fn initial_state(&mut self, _func: &Func) -> Self::Domain { self.frame.initial_state() }

  fn collapse_to_top(&self, state: &mut Self::Domain) { *state = State::new() }

  fn transfer_expr(&mut self, state: &mut Self::Domain, func: &Func, id: ExprId) {
    if self.frame.transfer_common(state, func, id) { return }
    let kind = func.exprs[id].kind.clone();
    match kind {
      ExprKind::UnaryOp(op, strategy) => {
        let _ = self.handle_unary(state, func, id, op, strategy);
      }
      ExprKind::BinaryOp(op, strategy) => {
        let _ = self.handle_binary(state, func, id, op, strategy);
      }
      ExprKind::TypeCast(strategy) => {
        let _ = self.handle_typecast(state, func, id, strategy);
      }
      ExprKind::Apply => {
        let _ = self.handle_apply(state, func, id);
      }
      ExprKind::Intrinsic(kind) => {
        let _ = self.handle_intrinsic(state, func, id, kind);
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
      Terminator::IntOpWithException { op, strategy, ok, err } => {
        let ek = self.handle_binary(state, func, id, op, strategy);
        route(ek, ok, err)
      }
      Terminator::TypeCastWithException { strategy, ok, err } => {
        let ek = self.handle_typecast(state, func, id, strategy);
        route(ek, ok, err)
      }
      Terminator::IntrinsicWithException { kind, ok, err } => {
        let ek = self.handle_intrinsic(state, func, id, kind);
        route(ek, ok, err)
      }
      Terminator::ApplyWithException { ok, err } => {
        let ek = self.handle_apply(state, func, id);
        route(ek, ok, err)
      }
      Terminator::InvokeWithException { .. } => {
        state.set_to_top(id);
        None
      }
      Terminator::Goto(_) | Terminator::Exit | Terminator::RaiseException(_) => None,
    }
  }
}

/// Whether a global var is tracked by the constant analysis: its base type
/// must be a primitive, tuple, struct or enum.
#[must_use] pub fn is_tracked_gv(types: &Types, gv: &crate::types::ir::GlobalVar) -> bool {
  let base = types.deref(gv.ty);
  is_tracked_gv_base(types, base)
}

/// Run the constant analysis over a package: the serial phase analyses the
/// init functions of tracked `READONLY` globals and records their values in
/// the global store; the parallel phase analyses every other eligible
/// function with that store imported at entry.
pub fn run_const_analysis<'a>(
  package: &'a Package, types: &'a Types, diag: &'a DiagAdapter, threads: usize, is_stable: bool,
) -> AnalysisWrapper<ConstAnalysis<'a>> {
  let mut wrapper = AnalysisWrapper::new();
  let mut store: GlobalStateStore<ConstValue> = GlobalStateStore::new();

  for (gvid, gv) in package.globals.enum_iter() {
    if !is_tracked_gv(types, gv) { continue }
    if let Some(lit) = gv.init_literal {
      store.set_global_literal(gvid, types, lit, const_of_literal);
      continue
    }
    if_chain! {
      if gv.attrs.contains(Attribute::READONLY);
      if let Some(init) = gv.init_func;
      if !wrapper.contains(init);
      if should_be_analysed(&package.funcs[init]);
      then {
        // Multiple global vars may be initialised in the same function,
        // e.g. `let (x, y) = (1, 2)`; one run covers them all.
        let analysis = ConstAnalysis::new(package, types, diag, is_stable, store.snapshot());
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
    ConstAnalysis::new(package, types, diag, is_stable, snapshot.clone())
  });
  wrapper
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::engine::Results;
  use crate::builder::{CHIRContext, FuncBuilder};
  use crate::intern;
  use crate::types::ir::Literal;
  use crate::types::TypeStore;

  fn run_on<'a>(
    func: Func, ctx: &'a CHIRContext, diag: &'a DiagAdapter,
  ) -> (Func, Results<ConstAnalysis<'a>>) {
    // leak the package for the test lifetime; the analyses borrow it
    let mut package = Package::new(intern("test"));
    let fid = package.funcs.push(func);
    let package: &'static Package = Box::leak(Box::new(package));
    let analysis = ConstAnalysis::new(package, &ctx.types, diag, true, State::new());
    let results = Engine::new(&package.funcs[fid], analysis).iterate_to_fixpoint();
    (package.funcs[fid].clone(), results)
  }

  #[test]
  fn folds_arithmetic_chain() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![], TypeStore::INT64);
    let a = fb.constant(Literal::Int(IntTy::INT64, 2));
    let b = fb.constant(Literal::Int(IntTy::INT64, 3));
    let prod = fb.binop(BinOp::Mul, OverflowStrategy::Throwing, a, b, TypeStore::INT64);
    let four = fb.constant(Literal::Int(IntTy::INT64, 4));
    let sum = fb.binop(BinOp::Add, OverflowStrategy::Throwing, prod, four, TypeStore::INT64);
    fb.exit(Some(sum));
    let (func, mut results) = run_on(fb.finish(), &ctx, &diag);

    let exit = results.state_at_exit(&func).expect("function exits");
    assert_eq!(exit.value_of(sum), Some(&ConstValue::Int(10)));
  }

  #[test]
  fn diagnoses_int8_overflow() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let int8 = ctx.types.mk_int(IntTy::INT8);
    let mut fb = FuncBuilder::new(&ctx, intern("h"), vec![], int8);
    let a = fb.constant(Literal::Int(IntTy::INT8, 127));
    let one = fb.constant(Literal::Int(IntTy::INT8, 1));
    let _sum = fb.binop(BinOp::Add, OverflowStrategy::Throwing, a, one, int8);
    fb.exit(None);
    let (_, _results) = run_on(fb.finish(), &ctx, &diag);

    let diags = diag.take_sorted();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagKind::ArithmeticOperatorOverflow);
    assert_eq!(diags[0].main_hints, vec!["+", "Int8(127) + Int8(1)"]);
    assert_eq!(diags[0].notes, vec!["range of Int8 is -128 ~ 127"]);
  }

  #[test]
  fn short_circuit_and() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(&ctx, intern("sc"), vec![
      crate::types::ir::Param { ty: TypeStore::BOOL, name: intern("p"), loc: Default::default() },
    ], TypeStore::BOOL);
    let f = fb.constant(Literal::Bool(false));
    let p = Value::Param(crate::types::ir::ParamId(0));
    let and = fb.binop(BinOp::And, OverflowStrategy::Throwing, f, p, TypeStore::BOOL);
    fb.exit(Some(and));
    let (func, mut results) = run_on(fb.finish(), &ctx, &diag);

    let exit = results.state_at_exit(&func).expect("function exits");
    assert_eq!(exit.value_of(and), Some(&ConstValue::Bool(false)));
  }

  #[test]
  fn branch_on_known_condition_prunes_successor() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(&ctx, intern("g"), vec![], TypeStore::UNIT);
    let then_bb = fb.new_block();
    let else_bb = fb.new_block();
    let cond = fb.constant(Literal::Bool(false));
    fb.branch(cond, then_bb, else_bb);
    fb.switch_to(then_bb);
    fb.exit(None);
    fb.switch_to(else_bb);
    fb.exit(None);
    let (_, results) = run_on(fb.finish(), &ctx, &diag);

    assert!(!results.is_reachable(then_bb));
    assert!(results.is_reachable(else_bb));
  }

  #[test]
  fn division_by_zero_diagnosed() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(&ctx, intern("dz"), vec![
      crate::types::ir::Param { ty: TypeStore::INT64, name: intern("x"), loc: Default::default() },
    ], TypeStore::INT64);
    let x = Value::Param(crate::types::ir::ParamId(0));
    let zero = fb.constant(Literal::Int(IntTy::INT64, 0));
    let _div = fb.binop(BinOp::Div, OverflowStrategy::Throwing, x, zero, TypeStore::INT64);
    fb.exit(None);
    let _ = run_on(fb.finish(), &ctx, &diag);

    assert_eq!(diag.count_of(DiagKind::DivisorIsZero), 1);
  }
}
