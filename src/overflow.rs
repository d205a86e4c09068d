//! Width-typed overflow checking for constant folding.
//!
//! Operands are values already known to fit their declared type; the checker
//! computes the operation exactly (in 128-bit intermediates), reports whether
//! the mathematical result is representable at the declared width, and
//! produces the result mandated by the overflow strategy: the wrapped value
//! under `Wrapping` (and under `Throwing`/`Checked`, where the caller then
//! routes to the error successor), the boundary value under `Saturating`.

use crate::types::ir::BinOp;
use crate::types::{IntTy, OverflowStrategy};

/// Truncate the mathematical integer `v` to the two's complement bit pattern
/// of `ity`, returned zero-extended in a `u64`.
#[must_use] pub fn wrap_to(ity: IntTy, v: i128) -> u64 {
  let mask = if ity.width.bits() == 64 { u64::MAX } else { (1u64 << ity.width.bits()) - 1 };
  (v as u64) & mask
}

/// Sign-extend the raw payload `bits` of `ity` into an `i64`.
#[must_use] pub fn read_signed(ity: IntTy, bits: u64) -> i64 {
  let shift = 64 - ity.width.bits();
  ((bits << shift) as i64) >> shift
}

fn exact_binop(op: BinOp, x: i128, y: i128) -> Option<i128> {
  match op {
    BinOp::Add => Some(x + y),
    BinOp::Sub => Some(x - y),
    BinOp::Mul => Some(x * y),
    BinOp::Div => (y != 0).then(|| x / y),
    BinOp::Mod => (y != 0).then(|| x % y),
    _ => None,
  }
}

fn apply_strategy(ity: IntTy, exact: i128, strategy: OverflowStrategy) -> (u64, bool) {
  if ity.contains(exact) {
    return (wrap_to(ity, exact), false)
  }
  let res = match strategy {
    OverflowStrategy::Saturating => {
      if exact < ity.min_value() { wrap_to(ity, ity.min_value()) } else { wrap_to(ity, ity.max_value()) }
    }
    _ => wrap_to(ity, exact),
  };
  (res, true)
}

/// Check `x op y` on the signed type `ity`. Returns the raw result payload
/// and whether the operation overflowed. `Div`/`Mod` by zero must be ruled
/// out by the caller; `SMin / -1` is overflow, and `SMin % -1` is defined to
/// yield 0 but still counts as overflow.
#[must_use] pub fn int_binop(ity: IntTy, op: BinOp, x: i64, y: i64, strategy: OverflowStrategy) -> (u64, bool) {
  debug_assert!(ity.signed);
  if op == BinOp::Mod && x == ity.min_value() as i64 && y == -1 {
    return (0, true)
  }
  if op == BinOp::Div && x == ity.min_value() as i64 && y == -1 {
    let res = match strategy {
      OverflowStrategy::Wrapping => wrap_to(ity, ity.min_value()),
      OverflowStrategy::Saturating => wrap_to(ity, ity.max_value()),
      _ => wrap_to(ity, ity.min_value()),
    };
    return (res, true)
  }
  let exact = exact_binop(op, i128::from(x), i128::from(y)).expect("division by zero");
  apply_strategy(ity, exact, strategy)
}

/// Check `x op y` on the unsigned type `ity`. Returns the raw result payload
/// and whether the operation overflowed.
#[must_use] pub fn uint_binop(ity: IntTy, op: BinOp, x: u64, y: u64, strategy: OverflowStrategy) -> (u64, bool) {
  debug_assert!(!ity.signed);
  let exact = exact_binop(op, i128::from(x), i128::from(y)).expect("division by zero");
  apply_strategy(ity, exact, strategy)
}

/// Check unary negation of the signed value `x` at `ity`.
#[must_use] pub fn int_neg(ity: IntTy, x: i64, strategy: OverflowStrategy) -> (u64, bool) {
  apply_strategy(ity, -i128::from(x), strategy)
}

/// Check unary negation of the unsigned value `x` at `ity`: anything but
/// zero overflows.
#[must_use] pub fn uint_neg(ity: IntTy, x: u64, strategy: OverflowStrategy) -> (u64, bool) {
  apply_strategy(ity, -i128::from(x), strategy)
}

/// Check `x ** y` at `Int64` by fast binary exponentiation.
#[must_use] pub fn exp(x: i64, y: u64, strategy: OverflowStrategy) -> (i64, bool) {
  let ity = IntTy::INT64;
  let mut overflow = false;
  let mut acc = 1i64;
  let mut base = x;
  let mut n = y;
  while n > 0 {
    if n & 1 == 1 {
      let exact = i128::from(acc) * i128::from(base);
      overflow |= !ity.contains(exact);
      acc = wrap_to(ity, exact) as i64;
    }
    n >>= 1;
    if n > 0 {
      let exact = i128::from(base) * i128::from(base);
      overflow |= !ity.contains(exact);
      base = wrap_to(ity, exact) as i64;
    }
  }
  if overflow && strategy == OverflowStrategy::Saturating {
    // the sign of the true result is the sign of x, odd exponents only
    let negative = x < 0 && y % 2 == 1;
    acc = if negative { i64::MIN } else { i64::MAX };
  }
  (acc, overflow)
}

/// Check a typecast of the value with raw payload `bits` from `src` to
/// `dst`. Returns the raw result payload at `dst` and whether the value is
/// out of the destination range.
#[must_use] pub fn typecast(src: IntTy, dst: IntTy, bits: u64, strategy: OverflowStrategy) -> (u64, bool) {
  let v: i128 =
    if src.signed { i128::from(read_signed(src, bits)) } else { i128::from(bits) };
  apply_strategy(dst, v, strategy)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn add_overflow_int8() {
    let (res, ovf) = int_binop(IntTy::INT8, BinOp::Add, 127, 1, OverflowStrategy::Throwing);
    assert!(ovf);
    assert_eq!(read_signed(IntTy::INT8, res), -128);
    let (res, ovf) = int_binop(IntTy::INT8, BinOp::Add, 127, 1, OverflowStrategy::Saturating);
    assert!(ovf);
    assert_eq!(read_signed(IntTy::INT8, res), 127);
    let (res, ovf) = int_binop(IntTy::INT8, BinOp::Add, 100, 27, OverflowStrategy::Throwing);
    assert!(!ovf);
    assert_eq!(read_signed(IntTy::INT8, res), 127);
  }

  #[test]
  fn smin_div_minus_one() {
    let (res, ovf) = int_binop(IntTy::INT8, BinOp::Div, -128, -1, OverflowStrategy::Wrapping);
    assert!(ovf);
    assert_eq!(read_signed(IntTy::INT8, res), -128);
    let (res, ovf) = int_binop(IntTy::INT8, BinOp::Div, -128, -1, OverflowStrategy::Saturating);
    assert!(ovf);
    assert_eq!(read_signed(IntTy::INT8, res), 127);
    let (res, ovf) = int_binop(IntTy::INT8, BinOp::Mod, -128, -1, OverflowStrategy::Throwing);
    assert!(ovf);
    assert_eq!(res, 0);
  }

  #[test]
  fn uint_sub_wraps() {
    let (res, ovf) = uint_binop(IntTy::UINT8, BinOp::Sub, 0, 1, OverflowStrategy::Wrapping);
    assert!(ovf);
    assert_eq!(res, 255);
  }

  #[test]
  fn exp_basic() {
    assert_eq!(exp(2, 10, OverflowStrategy::Throwing), (1024, false));
    assert_eq!(exp(3, 0, OverflowStrategy::Throwing), (1, false));
    let (_, ovf) = exp(2, 64, OverflowStrategy::Throwing);
    assert!(ovf);
    let (res, ovf) = exp(2, 64, OverflowStrategy::Saturating);
    assert!(ovf);
    assert_eq!(res, i64::MAX);
  }

  #[test]
  fn typecast_ranges() {
    // UInt8(200) -> Int8 overflows
    let (_, ovf) = typecast(IntTy::UINT8, IntTy::INT8, 200, OverflowStrategy::Throwing);
    assert!(ovf);
    // Int8(-1) -> UInt64 overflows (negative to unsigned)
    let (_, ovf) = typecast(IntTy::INT8, IntTy::UINT64, 0xFF, OverflowStrategy::Throwing);
    assert!(ovf);
    // Int8(-1) -> Int64 is fine
    let (res, ovf) = typecast(IntTy::INT8, IntTy::INT64, 0xFF, OverflowStrategy::Throwing);
    assert!(!ovf);
    assert_eq!(read_signed(IntTy::INT64, res), -1);
    // saturating negative to unsigned clamps to 0
    let (res, ovf) = typecast(IntTy::INT8, IntTy::UINT8, 0x80, OverflowStrategy::Saturating);
    assert!(ovf);
    assert_eq!(res, 0);
  }
}
