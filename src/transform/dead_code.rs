//! Dead code elimination: unreachable-block removal, unreachable-branch
//! warnings, useless-expression and `Nothing`-tail removal, useless-function
//! removal, and the unused-code warnings.

use bit_vec::BitVec;
use hashbrown::{HashMap, HashSet};

use crate::analysis::const_analysis::ConstAnalysis;
use crate::analysis::AnalysisWrapper;
use crate::diag::{DiagAdapter, DiagKind};
use crate::types::ir::{
  Attribute, BlockId, ExprFlags, ExprId, ExprKind, Func, FuncId, Package, Terminator, Value,
  VarKind,
};
use crate::types::Types;
use crate::{Idx, Symbol};

/// Mangled-name landmarks whose functions are never reported or removed.
const GLOBAL_INIT_MANGLED_NAME: &str = "_global_init";
const STD_CORE_FUTURE_MANGLED_NAME: &str = "_CNat6Future";
const STD_CORE_EXECUTE_CLOSURE_MANGLED_NAME: &str = "executeClosure";

fn is_landmark(sym: Symbol) -> bool {
  let s = sym.as_str();
  s == GLOBAL_INIT_MANGLED_NAME
    || s.contains(STD_CORE_FUTURE_MANGLED_NAME)
    || s == STD_CORE_EXECUTE_CLOSURE_MANGLED_NAME
}

/// The dead code elimination pass bundle.
pub struct DeadCodeElimination<'a> {
  diag: &'a DiagAdapter,
  types: &'a Types,
}

impl<'a> DeadCodeElimination<'a> {
  /// Create the pass bundle.
  #[must_use] pub fn new(types: &'a Types, diag: &'a DiagAdapter) -> Self {
    Self { diag, types }
  }

  // =============== Unreachable block elimination ===============

  /// Remove blocks not reachable from the entry of each function's body
  /// group and drop them from their groups.
  pub fn unreachable_block_elimination(&self, package: &mut Package) {
    let all: Vec<FuncId> = package.funcs.keys().collect();
    self.unreachable_block_elimination_for(package, &all);
  }

  /// The same sweep, restricted to `funcs` (the ones a propagation pass
  /// rewrote a terminator in).
  pub fn unreachable_block_elimination_for(&self, package: &mut Package, funcs: &[FuncId]) {
    for &fid in funcs {
      let func = &mut package.funcs[fid];
      if func.blocks.is_empty() { continue }
      let reachable = reachable_blocks(func);
      let group = func.body;
      let removed: Vec<BlockId> = func.groups[group]
        .blocks
        .iter()
        .copied()
        .filter(|bb| !reachable.get(bb.into_usize()).unwrap_or(false))
        .collect();
      if removed.is_empty() { continue }
      log::debug!(
        "[DCE] removing {} unreachable blocks from {}", removed.len(), func.name
      );
      func.groups[group].blocks.retain(|bb| reachable.get(bb.into_usize()).unwrap_or(false));
      for bb in removed {
        func.blocks[bb].exprs.clear();
      }
    }
  }

  // =============== Unreachable branch warnings ===============

  /// Warn on source-visible branches whose guard the constant analysis
  /// proved, skipping generated for-loop internals and the runtime
  /// landmarks. Must run while the analysis results are alive.
  pub fn unreachable_branch_warning(
    &self, package: &Package, wrapper: &mut AnalysisWrapper<ConstAnalysis<'_>>,
  ) {
    for (fid, func) in package.funcs.enum_iter() {
      if is_landmark(func.mangled) || func.attrs.contains(Attribute::COMPILER_ADD) {
        continue
      }
      let Some(results) = wrapper.check_func_result_mut(fid) else { continue };
      let mut warnings = vec![];
      results.visit_with(
        func,
        |_, _, _| {},
        |_, _, _| {},
        |_, id, known_succ| {
          let expr = &func.exprs[id];
          if known_succ.is_none() { return }
          if expr.loc.is_generated()
            || expr.flags.contains(ExprFlags::GENERATED_FOR_IN)
            || expr.flags.contains(ExprFlags::SKIP_DCE_WARNING)
          {
            return
          }
          match expr.as_terminator() {
            Some(Terminator::Branch { .. }) =>
              warnings.push((expr.loc, DiagKind::DceUnreachableBlockInExpression, "if")),
            // a decided selector proves every other arm dead
            Some(Terminator::MultiBranch { .. }) =>
              warnings.push((expr.loc, DiagKind::UnreachablePattern, "match")),
            _ => {}
          }
        },
      );
      for (loc, kind, hint) in warnings {
        self.diag.diagnose(kind, loc).main_hint(hint);
      }
    }
  }

  // =============== Useless expression elimination ===============

  /// Remove pure expressions whose results have no users, iterating until
  /// nothing more falls out.
  pub fn useless_expr_elimination(&self, package: &mut Package) {
    for func in package.funcs.iter_mut() {
      loop {
        let users = real_users(func);
        let mut removed = vec![];
        for bb in func.blocks.keys() {
          for &id in &func.blocks[bb].exprs {
            let expr = &func.exprs[id];
            if expr.as_terminator().is_some() || matches!(expr.kind, ExprKind::Debug { .. }) {
              continue
            }
            let pure = expr.is_pure_kind() || matches!(expr.kind, ExprKind::Allocate(_));
            if pure && users.get(&Value::Local(id)).is_none_or(Vec::is_empty) {
              removed.push(id);
            }
          }
        }
        if removed.is_empty() { break }
        log::debug!("[DCE] removing {} useless expressions from {}", removed.len(), func.name);
        let removed: HashSet<ExprId> = removed.into_iter().collect();
        for block in func.blocks.iter_mut() {
          block.exprs.retain(|id| !removed.contains(id));
        }
      }
    }
  }

  // =============== Nothing-type expression elimination ===============

  /// Drop the expressions that follow a diverging call (one producing
  /// `Nothing`) inside a block; they can never execute. Source-visible
  /// dropped expressions are reported as dead arms.
  pub fn nothing_type_expr_elimination(&self, package: &mut Package) {
    for func in package.funcs.iter_mut() {
      for bb in func.blocks.keys().collect::<Vec<_>>() {
        let exprs = &func.blocks[bb].exprs;
        let Some(cut) = exprs.iter().position(|&id| {
          self.types.is_nothing(func.exprs[id].ty)
            && matches!(func.exprs[id].kind, ExprKind::Apply | ExprKind::Invoke { .. })
        }) else { continue };
        let term = func.terminator_of(bb);
        let keep: Vec<ExprId> = exprs[..=cut]
          .iter()
          .copied()
          .chain(term.into_iter())
          .collect();
        if keep.len() == exprs.len() { continue }
        log::debug!("[DCE] dropping diverging tail in {} block {}", func.name, bb);
        if let Some(&first_dropped) = exprs[cut + 1..]
          .iter()
          .filter(|&&id| Some(id) != term)
          .find(|&&id| {
            let expr = &func.exprs[id];
            !expr.loc.is_generated() && !expr.flags.contains(ExprFlags::SKIP_DCE_WARNING)
          })
        {
          self.diag.diagnose(DiagKind::DceUnreachableExpression, func.exprs[first_dropped].loc);
        }
        func.blocks[bb].exprs = keep;
      }
    }
  }

  // =============== Useless function elimination ===============

  /// Remove non-`READONLY`, non-exported, non-virtual functions with no
  /// users. Runs after the other rounds so cascading dead functions fall
  /// out too.
  pub fn useless_func_elimination(&self, package: &mut Package) {
    loop {
      let mut used: HashSet<FuncId> = HashSet::new();
      if let Some(init) = package.init_func {
        used.insert(init);
      }
      for gv in package.globals.iter() {
        if let Some(init) = gv.init_func {
          used.insert(init);
        }
      }
      for func in package.funcs.iter() {
        for expr in func.exprs.iter() {
          for op in &expr.operands {
            if let Value::Func(f) = op {
              used.insert(*f);
            }
          }
        }
      }
      for def in package.defs.iter() {
        for method in &def.methods {
          if let crate::types::ir::FuncRef::Local(f) = method {
            used.insert(*f);
          }
        }
        for (_, slots) in &def.vtable {
          for slot in slots {
            if let Some(crate::types::ir::FuncRef::Local(f)) = slot.implementation {
              used.insert(f);
            }
          }
        }
      }

      let mut to_remove = vec![];
      for (fid, func) in package.funcs.enum_iter() {
        if used.contains(&fid) || func.blocks.is_empty() { continue }
        if func.attrs.intersects(
          Attribute::PUBLIC | Attribute::VIRTUAL | Attribute::READONLY | Attribute::FOREIGN
            | Attribute::GENERIC,
        ) {
          continue
        }
        if is_landmark(func.mangled) || func.func_kind != crate::types::ir::FuncKind::Default {
          continue
        }
        to_remove.push(fid);
      }
      if to_remove.is_empty() { break }
      for fid in to_remove {
        let func = &mut package.funcs[fid];
        log::debug!("[DCE] removing useless function {}", func.name);
        func.blocks = crate::IdxVec::new();
        func.groups = crate::IdxVec::new();
        func.exprs = crate::IdxVec::new();
      }
    }
  }

  // =============== Unused-code reporting ===============

  /// Warn about unused local variables, parameters, lambda variables,
  /// syntactically discarded expressions, and unused private functions and
  /// globals.
  pub fn report_unused_code(&self, package: &Package) {
    for func in package.funcs.iter() {
      if func.attrs.contains(Attribute::COMPILER_ADD) || is_landmark(func.mangled) {
        continue
      }
      let users = real_users(func);
      self.report_unused_in_func(func, &users);
      self.report_discarded_expressions(func, &users);
    }
    self.report_unused_decls(package);
  }

  /// Pure expressions whose result nothing consumes, at a source-visible
  /// location: the value was computed and thrown away.
  fn report_discarded_expressions(&self, func: &Func, users: &HashMap<Value, Vec<ExprId>>) {
    for (id, expr) in func.exprs.enum_iter() {
      if !expr.is_pure_kind()
        || matches!(expr.kind, ExprKind::Constant | ExprKind::Load | ExprKind::Lambda(_))
      {
        continue
      }
      if expr.loc.is_generated() || expr.flags.contains(ExprFlags::SKIP_DCE_WARNING) {
        continue
      }
      if !func.blocks[expr.block].exprs.contains(&id) { continue }
      if users.get(&Value::Local(id)).is_none_or(Vec::is_empty) {
        self.diag.diagnose(DiagKind::UnusedExpression, expr.loc);
      }
    }
  }

  /// Private functions and globals nothing references.
  fn report_unused_decls(&self, package: &Package) {
    let mut used_funcs: HashSet<FuncId> = package.init_func.into_iter().collect();
    let mut used_globals: HashSet<crate::types::ir::GlobalVarId> = HashSet::new();
    for gv in package.globals.iter() {
      used_funcs.extend(gv.init_func);
    }
    for func in package.funcs.iter() {
      for expr in func.exprs.iter() {
        for op in &expr.operands {
          match op {
            Value::Func(f) => { used_funcs.insert(*f); }
            Value::Global(g) => { used_globals.insert(*g); }
            _ => {}
          }
        }
      }
    }
    for def in package.defs.iter() {
      for method in &def.methods {
        if let crate::types::ir::FuncRef::Local(f) = method {
          used_funcs.insert(*f);
        }
      }
    }
    for (fid, func) in package.funcs.enum_iter() {
      if used_funcs.contains(&fid)
        || func.loc.is_generated()
        || is_landmark(func.mangled)
        || func.attrs.intersects(
          Attribute::PUBLIC | Attribute::VIRTUAL | Attribute::COMPILER_ADD | Attribute::GENERIC,
        )
      {
        continue
      }
      self.diag.diagnose(DiagKind::UnusedFunction, func.loc).main_hint(func.name.as_str());
    }
    for (gvid, gv) in package.globals.enum_iter() {
      if used_globals.contains(&gvid)
        || gv.loc.is_generated()
        || gv.attrs.intersects(Attribute::PUBLIC | Attribute::COMPILER_ADD)
      {
        continue
      }
      self.diag.diagnose(DiagKind::UnusedGlobalVariable, gv.loc).main_hint(gv.name.as_str());
    }
  }

  fn report_unused_in_func(&self, func: &Func, users: &HashMap<Value, Vec<ExprId>>) {
    for (id, expr) in func.exprs.enum_iter() {
      let ExprKind::Debug { name, kind } = expr.kind else { continue };
      if expr.flags.contains(ExprFlags::SKIP_DCE_WARNING) || expr.loc.is_generated() {
        continue
      }
      let bound = expr.operands[0];
      let bound_users = users.get(&bound).map_or(&[][..], Vec::as_slice);
      // the binding is unused when every remaining user merely initialises
      // it (a store whose target is the binding)
      let unused = bound_users.iter().all(|&u| {
        u == id
          || matches!(
            &func.exprs[u].kind,
            ExprKind::Store | ExprKind::StoreElementRef(_)
              if func.exprs[u].operands.get(1) == Some(&bound)
          )
      });
      if !unused { continue }
      let diag_kind = match kind {
        VarKind::LocalVar => DiagKind::UnusedVariable,
        VarKind::Param => DiagKind::UnusedParameter,
        VarKind::LambdaVar => DiagKind::UnusedLambdaVariable,
      };
      self.diag.diagnose(diag_kind, expr.loc).main_hint(name.as_str());
    }
  }
}

/// The blocks reachable from the body entry.
fn reachable_blocks(func: &Func) -> BitVec {
  let mut reachable = BitVec::from_elem(func.blocks.len(), false);
  let mut stack = vec![func.entry_block()];
  while let Some(bb) = stack.pop() {
    if reachable.get(bb.into_usize()).unwrap_or(true) { continue }
    reachable.set(bb.into_usize(), true);
    for succ in func.successors(bb) {
      stack.push(succ);
    }
  }
  reachable
}

/// Users of every value, not counting `Debug` binders (a variable whose only
/// user is its debug binder is still unused).
fn real_users(func: &Func) -> HashMap<Value, Vec<ExprId>> {
  let mut users: HashMap<Value, Vec<ExprId>> = HashMap::new();
  for (id, expr) in func.exprs.enum_iter() {
    if matches!(expr.kind, ExprKind::Debug { .. }) { continue }
    // only count expressions still present in a block
    if !func.blocks[expr.block].exprs.contains(&id) { continue }
    for &op in &expr.operands {
      users.entry(op).or_default().push(id);
    }
  }
  users
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::const_analysis::run_const_analysis;
  use crate::builder::{CHIRContext, FuncBuilder};
  use crate::intern;
  use crate::types::ir::{BinOp, FuncKind, ImportedValue, Literal, Param};
  use crate::types::{IntTy, OverflowStrategy, TypeStore};
  use crate::SourceRange;

  #[test]
  fn removes_unreachable_blocks() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![], TypeStore::UNIT);
    let live = fb.new_block();
    let dead = fb.new_block();
    fb.goto(live);
    fb.switch_to(live);
    fb.exit(None);
    fb.switch_to(dead);
    fb.exit(None);

    let mut package = Package::new(intern("test"));
    let fid = package.funcs.push(fb.finish());
    DeadCodeElimination::new(&ctx.types, &diag).unreachable_block_elimination(&mut package);

    let func = &package.funcs[fid];
    assert!(!func.groups[func.body].blocks.contains(&dead));
    assert!(func.blocks[dead].exprs.is_empty());
    assert!(func.groups[func.body].blocks.contains(&live));
  }

  #[test]
  fn removes_pure_unused_expressions() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![], TypeStore::UNIT);
    let a = fb.constant(Literal::Int(IntTy::INT64, 1));
    let b = fb.constant(Literal::Int(IntTy::INT64, 2));
    let _unused = fb.binop(BinOp::Add, OverflowStrategy::Throwing, a, b, TypeStore::INT64);
    fb.exit(None);

    let mut package = Package::new(intern("test"));
    let fid = package.funcs.push(fb.finish());
    DeadCodeElimination::new(&ctx.types, &diag).useless_expr_elimination(&mut package);

    let func = &package.funcs[fid];
    let entry = func.entry_block();
    // only the terminator is left: the add and both constants cascaded away
    assert_eq!(func.blocks[entry].exprs.len(), 1);
  }

  #[test]
  fn reports_unused_local() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let file = intern("a.cj");
    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![], TypeStore::UNIT);
    fb.set_loc(SourceRange::new(file, (3, 9), (3, 10)));
    let cell = fb.allocate(TypeStore::INT64);
    fb.debug(intern("x"), VarKind::LocalVar, cell);
    let one = fb.constant(Literal::Int(IntTy::INT64, 1));
    fb.store(one, cell);
    fb.exit(None);

    let mut package = Package::new(intern("test"));
    package.funcs.push(fb.finish());
    DeadCodeElimination::new(&ctx.types, &diag).report_unused_code(&package);

    assert_eq!(diag.count_of(DiagKind::UnusedVariable), 1);
  }

  #[test]
  fn used_local_not_reported() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let file = intern("a.cj");
    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![
      Param { ty: TypeStore::INT64, name: intern("p"), loc: SourceRange::default() },
    ], TypeStore::INT64);
    fb.set_loc(SourceRange::new(file, (3, 9), (3, 10)));
    let cell = fb.allocate(TypeStore::INT64);
    fb.debug(intern("x"), VarKind::LocalVar, cell);
    let one = fb.constant(Literal::Int(IntTy::INT64, 1));
    fb.store(one, cell);
    let loaded = fb.load(cell, TypeStore::INT64);
    fb.exit(Some(loaded));

    let mut package = Package::new(intern("test"));
    package.funcs.push(fb.finish());
    DeadCodeElimination::new(&ctx.types, &diag).report_unused_code(&package);

    assert_eq!(diag.count_of(DiagKind::UnusedVariable), 0);
  }

  #[test]
  fn diverging_tail_reports_dead_expression() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let file = intern("n.cj");

    let mut package = Package::new(intern("test"));
    let panic_fn = package.imports.push(ImportedValue {
      name: intern("panic"),
      mangled: intern("panic"),
      package: intern("std.core"),
      ty: TypeStore::UNIT,
      attrs: Attribute::IMPORTED,
      is_func: true,
      func_kind: FuncKind::Default,
      parent_def: None,
      loc: SourceRange::default(),
    });

    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![], TypeStore::UNIT);
    fb.set_loc(SourceRange::new(file, (2, 3), (2, 8)));
    let _ = fb.apply(Value::Imported(panic_fn), &[], TypeStore::NOTHING);
    fb.set_loc(SourceRange::new(file, (3, 3), (3, 4)));
    let dead = fb.constant(Literal::Int(IntTy::INT64, 1));
    let _ = dead;
    fb.exit(None);
    let fid = package.funcs.push(fb.finish());

    DeadCodeElimination::new(&ctx.types, &diag).nothing_type_expr_elimination(&mut package);

    assert_eq!(diag.count_of(DiagKind::DceUnreachableExpression), 1);
    let warning = diag
      .take_sorted()
      .into_iter()
      .find(|d| d.kind == DiagKind::DceUnreachableExpression)
      .expect("warning present");
    assert_eq!(warning.range.begin.line, 3);
    // the dead tail is gone: only the diverging call and the exit remain
    let func = &package.funcs[fid];
    let entry = func.entry_block();
    assert_eq!(func.blocks[entry].exprs.len(), 2);
  }

  #[test]
  fn decided_match_reports_unreachable_pattern() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let file = intern("p.cj");
    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![], TypeStore::UNIT);
    let arm1 = fb.new_block();
    let arm2 = fb.new_block();
    let default = fb.new_block();
    fb.set_loc(SourceRange::new(file, (5, 3), (5, 8)));
    let selector = fb.constant(Literal::Int(IntTy::INT64, 1));
    fb.multibranch(selector, default, &[(1, arm1), (2, arm2)]);
    for bb in [arm1, arm2, default] {
      fb.switch_to(bb);
      fb.exit(None);
    }

    let mut package = Package::new(intern("test"));
    package.funcs.push(fb.finish());

    let mut wrapper = run_const_analysis(&package, &ctx.types, &diag, 1, true);
    DeadCodeElimination::new(&ctx.types, &diag).unreachable_branch_warning(&package, &mut wrapper);

    assert_eq!(diag.count_of(DiagKind::UnreachablePattern), 1);
    assert_eq!(diag.count_of(DiagKind::DceUnreachableBlockInExpression), 0);
  }
}
