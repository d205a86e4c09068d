//! Constant propagation: rewrite expressions whose value the constant
//! analysis pinned down, simplify the arithmetic identities that need no
//! constant information, prune decided branches, and record the effect map
//! linking consumed globals to their consumers.

use crate::analysis::const_analysis::{const_of_literal, ConstAnalysis, ConstValue};
use crate::analysis::value::State;
use crate::analysis::AnalysisWrapper;
use crate::overflow;
use crate::transform::{
  ConstRewrite, EffectMap, GotoRewrite, RewritePlan, UseReplacement,
};
use crate::types::ir::{
  BinOp, ExprId, ExprKind, Func, FuncId, GlobalVarId, Literal, Package, Terminator, UnaryOp,
  Value,
};
use crate::types::{TypeKind, Types};

/// The constant of `v` in `state`, resolving literal operands.
fn known_const(state: &State<ConstValue>, types: &Types, v: Value) -> Option<ConstValue> {
  if let Value::Literal(lit) = v {
    return const_of_literal(lit, types)
  }
  state.value_of(v).cloned()
}

/// Turn a known [`ConstValue`] into a literal of the expression's type.
fn literal_of_const(types: &Types, ty: crate::types::Ty, v: &ConstValue) -> Option<Literal> {
  match (types.kind(ty), v) {
    (TypeKind::Int(ity), ConstValue::Int(x)) =>
      Some(Literal::Int(ity, overflow::wrap_to(ity, i128::from(*x)))),
    (TypeKind::Int(ity), ConstValue::UInt(x)) =>
      Some(Literal::Int(ity, overflow::wrap_to(ity, i128::from(*x)))),
    (TypeKind::Bool, ConstValue::Bool(b)) => Some(Literal::Bool(*b)),
    (TypeKind::Rune, ConstValue::Rune(c)) => Some(Literal::Rune(*c)),
    (TypeKind::String, ConstValue::Str(s)) => Some(Literal::Str(*s)),
    (TypeKind::Float(fw), ConstValue::Float(f)) => Some(Literal::float(fw, *f)),
    _ => None,
  }
}

/// Whether `v` is a known integer constant equal to `n` (of either sign).
fn is_const_int(state: &State<ConstValue>, types: &Types, v: Value, n: i64) -> bool {
  match known_const(state, types, v) {
    Some(ConstValue::Int(x)) => x == n,
    Some(ConstValue::UInt(x)) => n >= 0 && x == n as u64,
    _ => false,
  }
}

/// The global variable an effect-map-relevant expression reads, if any:
/// a `Load` of a current-package global directly or through a
/// `GetElementRef`, or a `Field` of such a `Load`.
pub(super) fn effect_map_global(func: &Func, expr: ExprId) -> Option<GlobalVarId> {
  let e = &func.exprs[expr];
  match &e.kind {
    ExprKind::Load => match e.operands[0] {
      // let a = 3; Load(gv_a)
      Value::Global(gv) => Some(gv),
      // let sa = SA(); sa.x: %0 = GetElementRef(gv_sa); %1 = Load(%0)
      Value::Local(loc) => match &func.exprs[loc].kind {
        ExprKind::GetElementRef(_) => match func.exprs[loc].operands[0] {
          Value::Global(gv) => Some(gv),
          _ => None,
        },
        _ => None,
      },
      _ => None,
    },
    ExprKind::Field(_) => match e.operands[0] {
      // let a = (1, 2); a[0]: %0 = Load(gv_a); %1 = Field(%0, 0)
      Value::Local(base) => match &func.exprs[base].kind {
        ExprKind::Load => match func.exprs[base].operands[0] {
          Value::Global(gv) => Some(gv),
          _ => None,
        },
        _ => None,
      },
      _ => None,
    },
    _ => None,
  }
}

/// Collect the constant-propagation plan for every analysed function.
/// `enable_incre` turns on effect-map recording.
pub fn collect<'a>(
  package: &'a Package, types: &'a Types,
  wrapper: &mut AnalysisWrapper<ConstAnalysis<'a>>, enable_incre: bool,
) -> RewritePlan {
  let mut plan = RewritePlan::default();
  let effects = EffectMap::default();
  for (fid, func) in package.funcs.enum_iter() {
    let Some(results) = wrapper.check_func_result_mut(fid) else { continue };
    collect_for_func(package, types, fid, func, results, &effects, enable_incre, &mut plan);
    for &expr in results.analysis().never_overflow() {
      plan.never_overflow.push((fid, expr));
    }
    for &expr in results.analysis().proved_in_bounds() {
      plan.clear_bounds_check.push((fid, expr));
    }
  }
  plan.effect_map = effects.into_inner();
  plan
}

#[allow(clippy::too_many_arguments)]
fn collect_for_func<'a>(
  _package: &'a Package, types: &'a Types, fid: FuncId, func: &'a Func,
  results: &mut crate::analysis::engine::Results<ConstAnalysis<'a>>,
  effects: &EffectMap, enable_incre: bool, plan: &mut RewritePlan,
) {
  let mut const_rewrites = vec![];
  let mut use_replacements = vec![];
  let mut goto_rewrites = vec![];
  let mut needs_block_sweep = false;

  results.visit_with(
    func,
    |_, _, _| {},
    |state, id, _| {
      let expr = &func.exprs[id];
      match &expr.kind {
        ExprKind::BinaryOp(op, _) => {
          if let Some(v) = state.value_of(Value::Local(id)) {
            if let Some(lit) = literal_of_const(types, expr.ty, v) {
              const_rewrites.push(ConstRewrite { func: fid, expr: id, literal: lit });
            }
          } else if let Some(with) = try_simplify_binary(state, types, func, id, *op) {
            use_replacements.push(UseReplacement { func: fid, expr: id, with });
          }
        }
        ExprKind::UnaryOp(op, _) => {
          if let Some(v) = state.value_of(Value::Local(id)) {
            if let Some(lit) = literal_of_const(types, expr.ty, v) {
              const_rewrites.push(ConstRewrite { func: fid, expr: id, literal: lit });
            }
          } else if let Some(with) = try_simplify_unary(func, id, *op) {
            use_replacements.push(UseReplacement { func: fid, expr: id, with });
          }
        }
        ExprKind::Load | ExprKind::TypeCast(_) | ExprKind::Field(_) => {
          let foldable = types.is_integer(expr.ty)
            || types.is_float(expr.ty)
            || types.is_rune(expr.ty)
            || types.is_boolean(expr.ty)
            || types.is_string(expr.ty);
          if foldable {
            if let Some(v) = state.value_of(Value::Local(id)) {
              if let Some(lit) = literal_of_const(types, expr.ty, v) {
                const_rewrites.push(ConstRewrite { func: fid, expr: id, literal: lit });
                if enable_incre {
                  if let Some(gv) = effect_map_global(func, id) {
                    effects.record(gv, fid);
                  }
                }
              }
            }
          }
        }
        _ => {}
      }
    },
    |state, id, known_succ| {
      let expr = &func.exprs[id];
      let Some(term) = expr.as_terminator() else { return };
      let Some(target) = known_succ else { return };
      match term {
        Terminator::Branch { .. } | Terminator::MultiBranch { .. } => {
          needs_block_sweep = true;
          goto_rewrites.push(GotoRewrite { func: fid, term: id, literal: None, target });
        }
        Terminator::IntOpWithException { ok, .. }
        | Terminator::TypeCastWithException { ok, .. } => {
          // only rewrite when the success arm survives with a known value
          if target == *ok {
            if let Some(lit) = state
              .value_of(Value::Local(id))
              .and_then(|v| literal_of_const(types, expr.ty, v))
            {
              needs_block_sweep = true;
              goto_rewrites.push(GotoRewrite { func: fid, term: id, literal: Some(lit), target });
            }
          }
        }
        _ => {}
      }
    },
  );

  if needs_block_sweep {
    plan.funcs_need_remove_blocks.push(fid);
  }
  plan.const_rewrites.append(&mut const_rewrites);
  plan.use_replacements.append(&mut use_replacements);
  plan.goto_rewrites.append(&mut goto_rewrites);
}

/// Simplifications valid without any constant information about the result:
/// `0 + a`, `a + 0`, `a - 0`, `1 * a`, `a * 1`, `a / 1`, `a ** 1`,
/// `a << 0`, `a >> 0`, `a & a`, `a | a`. We don't rewrite `0 - a` to `-a`
/// because codegen lowers `-a` back to `0 - a`.
fn try_simplify_binary(
  state: &State<ConstValue>, types: &Types, func: &Func, id: ExprId, op: BinOp,
) -> Option<Value> {
  let expr = &func.exprs[id];
  if !types.is_integer(expr.ty) { return None }
  let (lhs, rhs) = (expr.operands[0], expr.operands[1]);
  match op {
    BinOp::Add => {
      if is_const_int(state, types, lhs, 0) { return Some(rhs) }
      if is_const_int(state, types, rhs, 0) { return Some(lhs) }
      None
    }
    BinOp::Sub | BinOp::LShift | BinOp::RShift =>
      is_const_int(state, types, rhs, 0).then_some(lhs),
    BinOp::Mul => {
      if is_const_int(state, types, lhs, 1) { return Some(rhs) }
      if is_const_int(state, types, rhs, 1) { return Some(lhs) }
      None
    }
    BinOp::Div | BinOp::Exp => is_const_int(state, types, rhs, 1).then_some(lhs),
    BinOp::BitAnd | BinOp::BitOr => (lhs == rhs).then_some(lhs),
    _ => None,
  }
}

/// `!(!b) => b` and `~(~x) => x`. `-(-a)` is *not* simplified: computing
/// `-a` might overflow.
fn try_simplify_unary(func: &Func, id: ExprId, op: UnaryOp) -> Option<Value> {
  if !matches!(op, UnaryOp::Not | UnaryOp::BitNot) { return None }
  let expr = &func.exprs[id];
  let Value::Local(inner) = expr.operands[0] else { return None };
  match &func.exprs[inner].kind {
    ExprKind::UnaryOp(inner_op, _) if *inner_op == op => Some(func.exprs[inner].operands[0]),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::const_analysis::run_const_analysis;
  use crate::builder::{CHIRContext, FuncBuilder};
  use crate::diag::DiagAdapter;
  use crate::intern;
  use crate::types::ir::Terminator;
  use crate::types::{IntTy, OverflowStrategy, TypeStore};

  #[test]
  fn folds_body_to_single_constant() {
    // fn f(): Int32 { let a = 2; let b = 3; return a*b + 4 }
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let int32 = ctx.types.mk_int(IntTy::INT32);
    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![], int32);
    let a = fb.constant(Literal::Int(IntTy::INT32, 2));
    let b = fb.constant(Literal::Int(IntTy::INT32, 3));
    let prod = fb.binop(BinOp::Mul, OverflowStrategy::Throwing, a, b, int32);
    let four = fb.constant(Literal::Int(IntTy::INT32, 4));
    let sum = fb.binop(BinOp::Add, OverflowStrategy::Throwing, prod, four, int32);
    fb.exit(Some(sum));

    let mut package = Package::new(intern("test"));
    let fid = package.funcs.push(fb.finish());

    let plan = {
      let mut wrapper = run_const_analysis(&package, &ctx.types, &diag, 1, true);
      collect(&package, &ctx.types, &mut wrapper, false)
    };
    plan.apply(&mut package);

    let Value::Local(sum_id) = sum else { unreachable!() };
    let expr = &package.funcs[fid].exprs[sum_id];
    assert_eq!(expr.kind, ExprKind::Constant);
    assert_eq!(expr.operands[0], Value::Literal(Literal::Int(IntTy::INT32, 10)));
  }

  #[test]
  fn prunes_branch_on_false() {
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

    let mut package = Package::new(intern("test"));
    let fid = package.funcs.push(fb.finish());

    let plan = {
      let mut wrapper = run_const_analysis(&package, &ctx.types, &diag, 1, true);
      collect(&package, &ctx.types, &mut wrapper, false)
    };
    let sweep = plan.apply(&mut package);
    assert_eq!(sweep, vec![fid]);

    let func = &package.funcs[fid];
    let entry = func.entry_block();
    let term = func.terminator_of(entry).unwrap();
    assert_eq!(
      func.exprs[term].as_terminator(),
      Some(&Terminator::Goto(else_bb))
    );
  }

  #[test]
  fn simplifies_add_zero() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(
      &ctx, intern("s"),
      vec![crate::types::ir::Param {
        ty: TypeStore::INT64, name: intern("x"), loc: Default::default(),
      }],
      TypeStore::INT64,
    );
    let x = Value::Param(crate::types::ir::ParamId(0));
    let zero = fb.constant(Literal::Int(IntTy::INT64, 0));
    let sum = fb.binop(BinOp::Add, OverflowStrategy::Throwing, x, zero, TypeStore::INT64);
    fb.exit(Some(sum));

    let mut package = Package::new(intern("test"));
    let fid = package.funcs.push(fb.finish());

    let plan = {
      let mut wrapper = run_const_analysis(&package, &ctx.types, &diag, 1, true);
      collect(&package, &ctx.types, &mut wrapper, false)
    };
    plan.apply(&mut package);

    // the EXIT now returns `x` directly
    let func = &package.funcs[fid];
    let exit = func.terminator_of(func.entry_block()).unwrap();
    assert_eq!(func.exprs[exit].operands[0], x);
  }
}
