//! Range propagation: rewrite expressions whose range the analysis narrowed
//! to a single value, prune decided branches, clear proven VArray bounds
//! checks, and record the effect map for integer/boolean globals.

use crate::analysis::range_analysis::{range_of_literal, RangeAnalysis, ValueRange};
use crate::analysis::value::State;
use crate::analysis::AnalysisWrapper;
use crate::transform::{ConstRewrite, EffectMap, GotoRewrite, RewritePlan};
use crate::types::ir::{
  ExprKind, Func, FuncId, Literal, Package, Terminator, Value,
};
use crate::types::{TypeKind, Types};

/// The literal `v` is pinned to in `state`, if its range is a single value
/// of the right type.
fn known_single(
  state: &State<ValueRange>, types: &Types, ty: crate::types::Ty, v: Value,
) -> Option<Literal> {
  let range = if let Value::Literal(lit) = v {
    range_of_literal(lit, types)?
  } else {
    state.value_of(v)?.clone()
  };
  match (types.kind(ty), range) {
    (TypeKind::Bool, ValueRange::Bool(d)) if d.is_single_value() =>
      Some(Literal::Bool(d.single_value())),
    (TypeKind::Int(ity), ValueRange::SInt(d)) if d.is_single_value() =>
      Some(Literal::Int(ity, d.numeric_bound().single_element().uval())),
    _ => None,
  }
}

/// Collect the range-propagation plan for every analysed function.
pub fn collect<'a>(
  package: &'a Package, types: &'a Types,
  wrapper: &mut AnalysisWrapper<RangeAnalysis<'a>>, enable_incre: bool,
) -> RewritePlan {
  let mut plan = RewritePlan::default();
  let effects = EffectMap::default();
  for (fid, func) in package.funcs.enum_iter() {
    let Some(results) = wrapper.check_func_result_mut(fid) else { continue };
    collect_for_func(types, fid, func, results, &effects, enable_incre, &mut plan);
    for &expr in results.analysis().proved_in_bounds() {
      plan.clear_bounds_check.push((fid, expr));
    }
  }
  plan.effect_map = effects.into_inner();
  plan
}

fn collect_for_func<'a>(
  types: &'a Types, fid: FuncId, func: &'a Func,
  results: &mut crate::analysis::engine::Results<RangeAnalysis<'a>>,
  effects: &EffectMap, enable_incre: bool, plan: &mut RewritePlan,
) {
  let mut const_rewrites = vec![];
  let mut goto_rewrites = vec![];
  let mut needs_block_sweep = false;

  results.visit_with(
    func,
    |_, _, _| {},
    |state, id, _| {
      let expr = &func.exprs[id];
      match &expr.kind {
        ExprKind::BinaryOp(..) | ExprKind::UnaryOp(..) => {
          if let Some(lit) = known_single(state, types, expr.ty, Value::Local(id)) {
            const_rewrites.push(ConstRewrite { func: fid, expr: id, literal: lit });
          }
        }
        ExprKind::Load | ExprKind::TypeCast(_) | ExprKind::Field(_)
          if types.is_integer(expr.ty) || types.is_boolean(expr.ty) =>
        {
          if let Some(lit) = known_single(state, types, expr.ty, Value::Local(id)) {
            const_rewrites.push(ConstRewrite { func: fid, expr: id, literal: lit });
            if enable_incre {
              if let Some(gv) = super::const_propagation::effect_map_global(func, id) {
                effects.record(gv, fid);
              }
            }
          }
        }
        _ => {}
      }
    },
    |_, id, known_succ| {
      let Some(term) = func.exprs[id].as_terminator() else { return };
      let Some(target) = known_succ else { return };
      if matches!(term, Terminator::Branch { .. } | Terminator::MultiBranch { .. }) {
        needs_block_sweep = true;
        goto_rewrites.push(GotoRewrite { func: fid, term: id, literal: None, target });
      }
    },
  );

  if needs_block_sweep {
    plan.funcs_need_remove_blocks.push(fid);
  }
  plan.const_rewrites.append(&mut const_rewrites);
  plan.goto_rewrites.append(&mut goto_rewrites);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::range_analysis::run_range_analysis;
  use crate::builder::{CHIRContext, FuncBuilder};
  use crate::diag::DiagAdapter;
  use crate::intern;
  use crate::types::ir::{BinOp, ExprFlags, IntrinsicKind, Param, ParamId};
  use crate::types::{IntTy, OverflowStrategy, TypeStore};

  #[test]
  fn clears_proved_bounds_check() {
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
    let access = fb.new_block();
    let done = fb.new_block();
    let second = fb.new_block();

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

    let mut func = fb.finish();
    func.exprs[get_id].flags.insert(ExprFlags::NEED_CHECK_ARRAY_BOUND);
    let mut package = Package::new(intern("test"));
    let fid = package.funcs.push(func);

    let plan = {
      let mut wrapper = run_range_analysis(&package, &ctx.types, &diag, 1, true);
      collect(&package, &ctx.types, &mut wrapper, false)
    };
    plan.apply(&mut package);

    assert!(
      !package.funcs[fid].exprs[get_id].flags.contains(ExprFlags::NEED_CHECK_ARRAY_BOUND),
      "the runtime bounds check should have been dropped"
    );
  }
}
