//! SanitizerCoverage instrumentation.
//!
//! Driven by [`SanitizerCoverageOptions`]; inserts coverage hooks per block,
//! comparison tracing per integer compare, switch tracing per multibranch,
//! memcmp-family weak hooks for the string/array equality entry points, and
//! a per-package constructor that allocates the counter/guard/bool-flag
//! arrays at runtime and publishes the PC table.

use hashbrown::HashMap;
use smallvec::SmallVec;
use thiserror::Error;

use crate::diag::{DiagAdapter, DiagKind};
use crate::types::ir::{
  Attribute, BinOp, Block, BlockGroup, BlockId, ExprFlags, ExprId, ExprKind, Expression, Func,
  FuncId, FuncKind, GlobalVar, GlobalVarId, ImportId, ImportedValue, IntrinsicKind, LinkTypeInfo,
  Literal, Package, Terminator, Value,
};
use crate::types::{IntTy, TypeKind, TypeStore, Types};
use crate::{intern, IdxVec, SourceRange, Symbol};

/// The granularity of block coverage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SancovLevel {
  /// No block coverage.
  #[default]
  None,
  /// Instrument function entries only.
  Function,
  /// Instrument every basic block.
  BasicBlock,
}

/// The SanitizerCoverage configuration.
#[derive(Clone, Debug, Default)]
pub struct SanitizerCoverageOptions {
  /// Insert `__sanitizer_cov_trace_pc_guard` calls.
  pub trace_pc_guard: bool,
  /// Bump an inline 8-bit counter per visit.
  pub inline_8bit_counters: bool,
  /// Set an inline bool flag per visit.
  pub inline_bool_flag: bool,
  /// Trace integer comparisons.
  pub trace_cmp: bool,
  /// Trace memory-ish comparisons (String/Array equality etc.).
  pub trace_mem_cmp: bool,
  /// Track stack depth.
  pub stack_depth: bool,
  /// Publish a PC table.
  pub pc_table: bool,
  /// The block coverage level.
  pub coverage: SancovLevel,
}

impl SanitizerCoverageOptions {
  fn any_counter(&self) -> bool {
    self.trace_pc_guard || self.inline_8bit_counters || self.inline_bool_flag
  }

  /// Whether any instrumentation is requested at all.
  #[must_use] pub fn is_enabled(&self) -> bool {
    self.any_counter() || self.trace_cmp || self.trace_mem_cmp || self.stack_depth || self.pc_table
  }
}

/// An invalid SanitizerCoverage configuration; aborts the pass.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SancovError {
  /// `pc_table` without any counter/guard/bool-flag option.
  #[error("sancov pc-table requires trace-pc-guard, inline-8bit-counters or inline-bool-flag")]
  IllegalUsageOfPcTable,
  /// A counter/guard option without a coverage level.
  #[error("sancov counters require a function or basic-block coverage level")]
  IllegalUsageOfLevel,
}

const TRACE_PC_GUARD: &str = "__sanitizer_cov_trace_pc_guard";
const INC_8BIT_COUNTER: &str = "__cj_sancov_increase_8bit_counter";
const SET_BOOL_FLAG: &str = "__cj_sancov_set_bool_flag";
const UPDATE_STACK_DEPTH: &str = "__updatesancovstackdepth";
const TRACE_SWITCH: &str = "__sanitizer_cov_trace_switch";
const WEAK_HOOK_MEMCMP: &str = "__cj_sanitizer_weak_hook_memcmp";
const WEAK_HOOK_STRCMP: &str = "__cj_sanitizer_weak_hook_strcmp";
const WEAK_HOOK_STRNCMP: &str = "__cj_sanitizer_weak_hook_strncmp";
const WEAK_HOOK_STRCASECMP: &str = "__cj_sanitizer_weak_hook_strcasecmp";
const CTOR_8BIT_COUNTERS: &str = "__cj_sancov_8bit_counters_ctor";
const CTOR_PC_GUARD: &str = "__cj_sancov_pc_guard_ctor";
const CTOR_BOOL_FLAG: &str = "__cj_sancov_bool_flag_ctor";
const PCS_INIT: &str = "__cj_sancov_pcs_init";

/// The SanitizerCoverage pass over one package.
pub struct SanitizerCoverage<'a> {
  options: SanitizerCoverageOptions,
  types: &'a Types,
  /// Imported hook functions, created once per package.
  func_bag: HashMap<&'static str, ImportId>,
  /// Per-package coverage array globals, keyed by hook.
  global_var_bag: HashMap<&'static str, GlobalVarId>,
  /// Source locations for the PC table, one per instrumented block.
  pc_array: Vec<(String, SourceRange)>,
  /// The running block counter across the package.
  bb_counter: u64,
}

impl<'a> SanitizerCoverage<'a> {
  /// Create the pass.
  #[must_use] pub fn new(options: SanitizerCoverageOptions, types: &'a Types) -> Self {
    Self {
      options,
      types,
      func_bag: HashMap::new(),
      global_var_bag: HashMap::new(),
      pc_array: vec![],
      bb_counter: 0,
    }
  }

  /// Validate the configuration, reporting through `diag` on failure.
  pub fn check_sancov_option(&self, diag: &DiagAdapter) -> Result<(), SancovError> {
    if self.options.pc_table && !self.options.any_counter() {
      diag.diagnose(DiagKind::SancovIllegalUsageOfPcTable, SourceRange::default());
      return Err(SancovError::IllegalUsageOfPcTable)
    }
    if self.options.any_counter() && self.options.coverage == SancovLevel::None {
      diag.diagnose(DiagKind::SancovIllegalUsageOfLevel, SourceRange::default());
      return Err(SancovError::IllegalUsageOfLevel)
    }
    Ok(())
  }

  /// Run the instrumentation. Returns `false` (and emits a diagnostic) on
  /// an invalid configuration.
  pub fn run_on_package(&mut self, package: &mut Package, diag: &DiagAdapter) -> bool {
    if self.check_sancov_option(diag).is_err() {
      return false
    }
    if !self.options.is_enabled() {
      return true
    }
    self.init_func_bag(package);

    let fids: Vec<FuncId> = package.funcs.keys().collect();
    for fid in fids {
      let skip = {
        let func = &package.funcs[fid];
        func.blocks.is_empty()
          || func.attrs.intersects(Attribute::FOREIGN | Attribute::COMPILER_ADD)
      };
      if skip { continue }
      self.run_on_func(package, fid);
    }

    self.generate_init_func(package);
    true
  }

  // =============== Setup ===============

  fn get_or_create_import(
    &mut self, package: &mut Package, name: &'static str,
  ) -> ImportId {
    if let Some(&id) = self.func_bag.get(name) { return id }
    let func_ty = self.types.intern(TypeKind::Func {
      params: Box::new([]),
      ret: TypeStore::UNIT,
    });
    let id = package.imports.push(ImportedValue {
      name: intern(name),
      mangled: intern(name),
      package: intern(""),
      ty: func_ty,
      attrs: Attribute::FOREIGN | Attribute::IMPORTED | Attribute::NON_RECOMPILE,
      is_func: true,
      func_kind: FuncKind::Default,
      parent_def: None,
      loc: SourceRange::default(),
    });
    self.func_bag.insert(name, id);
    id
  }

  fn get_or_create_global(
    &mut self, package: &mut Package, name: &'static str, pkg: Symbol,
  ) -> GlobalVarId {
    if let Some(&id) = self.global_var_bag.get(name) { return id }
    let elem = self.types.mk_int(IntTy::UINT8);
    let arr = self.types.intern(TypeKind::RawArray { elem, dims: 1 });
    let id = package.globals.push(GlobalVar {
      name: intern(name),
      mangled: intern(name),
      package: pkg,
      ty: self.types.mk_ref(arr),
      attrs: Attribute::COMPILER_ADD,
      init_func: None,
      init_literal: None,
      loc: SourceRange::default(),
    });
    self.global_var_bag.insert(name, id);
    id
  }

  fn init_func_bag(&mut self, package: &mut Package) {
    let pkg = package.name;
    if self.options.trace_pc_guard {
      self.get_or_create_import(package, TRACE_PC_GUARD);
      self.get_or_create_global(package, "__cj_sancov_pc_guards", pkg);
      self.get_or_create_import(package, CTOR_PC_GUARD);
    }
    if self.options.inline_8bit_counters {
      self.get_or_create_import(package, INC_8BIT_COUNTER);
      self.get_or_create_global(package, "__cj_sancov_8bit_counters", pkg);
      self.get_or_create_import(package, CTOR_8BIT_COUNTERS);
    }
    if self.options.inline_bool_flag {
      self.get_or_create_import(package, SET_BOOL_FLAG);
      self.get_or_create_global(package, "__cj_sancov_bool_flags", pkg);
      self.get_or_create_import(package, CTOR_BOOL_FLAG);
    }
    if self.options.stack_depth {
      self.get_or_create_import(package, UPDATE_STACK_DEPTH);
    }
    if self.options.trace_cmp {
      for n in [1u32, 2, 4, 8] {
        self.get_or_create_import(package, trace_cmp_hook(n, false));
        self.get_or_create_import(package, trace_cmp_hook(n, true));
      }
      self.get_or_create_import(package, TRACE_SWITCH);
    }
    if self.options.trace_mem_cmp {
      for hook in [WEAK_HOOK_MEMCMP, WEAK_HOOK_STRCMP, WEAK_HOOK_STRNCMP, WEAK_HOOK_STRCASECMP] {
        self.get_or_create_import(package, hook);
      }
    }
    if self.options.pc_table {
      self.get_or_create_import(package, PCS_INIT);
    }
  }

  // =============== Per-function instrumentation ===============

  fn run_on_func(&mut self, package: &mut Package, fid: FuncId) {
    // collect targets first: inserting expressions invalidates positions
    let (blocks, cmps, switches, mem_cmps) = {
      let func = &package.funcs[fid];
      let blocks: Vec<BlockId> = match self.options.coverage {
        SancovLevel::None => vec![],
        SancovLevel::Function => vec![func.entry_block()],
        SancovLevel::BasicBlock => func.groups[func.body].blocks.clone(),
      };
      let mut cmps = vec![];
      let mut switches = vec![];
      let mut mem_cmps = vec![];
      for &bb in &func.groups[func.body].blocks {
        for &id in &func.blocks[bb].exprs {
          match &func.exprs[id].kind {
            ExprKind::BinaryOp(op, _)
              if self.options.trace_cmp
                && op.is_relational()
                && self.types.is_integer(self.value_ty(package, func, func.exprs[id].operands[0])) =>
              cmps.push(id),
            ExprKind::Terminator(Terminator::MultiBranch { .. })
              if self.options.trace_cmp => switches.push(id),
            ExprKind::Apply if self.options.trace_mem_cmp => {
              if let Some(hook) = self.mem_cmp_hook(package, func, id) {
                mem_cmps.push((id, hook));
              }
            }
            _ => {}
          }
        }
      }
      (blocks, cmps, switches, mem_cmps)
    };

    if self.options.any_counter() || self.options.stack_depth {
      for bb in blocks {
        self.insert_coverage_ahead_block(package, fid, bb);
      }
    }
    for id in cmps {
      self.inject_trace_for_cmp(package, fid, id);
    }
    for id in switches {
      self.inject_trace_for_switch(package, fid, id);
    }
    for (id, hook) in mem_cmps {
      self.inject_trace_mem_cmp(package, fid, id, hook);
    }
  }

  fn value_ty(&self, package: &Package, func: &Func, v: Value) -> crate::types::Ty {
    package.value_ty(func, v, self.types)
  }

  /// Insert the configured coverage hook calls at the head of `bb`,
  /// indexing the per-package arrays with this block's index.
  fn insert_coverage_ahead_block(&mut self, package: &mut Package, fid: FuncId, bb: BlockId) {
    let index = self.bb_counter;
    self.bb_counter += 1;
    {
      let func = &package.funcs[fid];
      self.pc_array.push((format!("{}:{bb}", func.name), func.loc));
    }

    let mut calls: Vec<(&'static str, Option<&'static str>)> = vec![];
    if self.options.trace_pc_guard {
      calls.push((TRACE_PC_GUARD, Some("__cj_sancov_pc_guards")));
    }
    if self.options.inline_8bit_counters {
      calls.push((INC_8BIT_COUNTER, Some("__cj_sancov_8bit_counters")));
    }
    if self.options.inline_bool_flag {
      calls.push((SET_BOOL_FLAG, Some("__cj_sancov_bool_flags")));
    }
    if self.options.stack_depth && package.funcs[fid].entry_block() == bb {
      calls.push((UPDATE_STACK_DEPTH, None));
    }

    let mut at = 0;
    for (hook, array) in calls {
      let hook = self.get_or_create_import(package, hook);
      let func = &mut package.funcs[fid];
      let idx_expr = insert_expr(
        func, bb, at,
        ExprKind::Constant,
        SmallVec::from_slice(&[Value::Literal(Literal::Int(IntTy::UINT64, index))]),
        TypeStore::UINT64,
      );
      let mut operands = SmallVec::with_capacity(3);
      operands.push(Value::Imported(hook));
      if let Some(array) = array {
        operands.push(Value::Global(self.global_var_bag[array]));
      }
      operands.push(Value::Local(idx_expr));
      insert_expr(&mut package.funcs[fid], bb, at + 1, ExprKind::Apply, operands, TypeStore::UNIT);
      at += 2;
    }
  }

  /// Insert a `__sanitizer_cov_trace_cmp{N}` call ahead of an integer
  /// comparison; the `const` variant when one operand is a literal.
  fn inject_trace_for_cmp(&mut self, package: &mut Package, fid: FuncId, id: ExprId) {
    let (lhs, rhs, bytes, is_const) = {
      let func = &package.funcs[fid];
      let expr = &func.exprs[id];
      let (lhs, rhs) = (expr.operands[0], expr.operands[1]);
      let ity = self
        .types
        .as_int(self.value_ty(package, func, lhs))
        .expect("integer comparison operand");
      let is_const =
        matches!(lhs, Value::Literal(_)) || matches!(rhs, Value::Literal(_));
      (lhs, rhs, ity.width.bits() / 8, is_const)
    };
    let hook = self.get_or_create_import(package, trace_cmp_hook(bytes, is_const));
    let func = &mut package.funcs[fid];
    let (bb, at) = position_of(func, id);
    insert_expr(
      func, bb, at,
      ExprKind::Apply,
      SmallVec::from_slice(&[Value::Imported(hook), lhs, rhs]),
      TypeStore::UNIT,
    );
  }

  /// Materialise the `[n, 64, case…]` table for a multibranch, acquire its
  /// raw pointer, cast the selector to `u64` and call
  /// `__sanitizer_cov_trace_switch`.
  fn inject_trace_for_switch(&mut self, package: &mut Package, fid: FuncId, id: ExprId) {
    let (selector, cases, selector_is_int) = {
      let func = &package.funcs[fid];
      let expr = &func.exprs[id];
      let Some(Terminator::MultiBranch { cases, .. }) = expr.as_terminator() else { return };
      let selector = expr.operands[0];
      let sel_ty = self.value_ty(package, func, selector);
      let ok = self.types.is_integer(sel_ty) || self.types.is_rune(sel_ty);
      (selector, cases.iter().map(|&(v, _)| v).collect::<Vec<u64>>(), ok)
    };
    if !selector_is_int { return }

    let hook = self.get_or_create_import(package, TRACE_SWITCH);
    let u64_ty = TypeStore::UINT64;
    let func = &mut package.funcs[fid];
    let (bb, mut at) = position_of(func, id);

    // [n, 64, case…]
    let count = insert_expr(
      func, bb, at,
      ExprKind::Constant,
      SmallVec::from_slice(&[Value::Literal(Literal::Int(IntTy::UINT64, cases.len() as u64 + 2))]),
      u64_ty,
    );
    at += 1;
    let arr = insert_expr(
      func, bb, at,
      ExprKind::RawArrayAllocate(u64_ty),
      SmallVec::from_slice(&[Value::Local(count)]),
      self.types.mk_ref(self.types.intern(TypeKind::RawArray { elem: u64_ty, dims: 1 })),
    );
    at += 1;
    let mut table = vec![cases.len() as u64, 64];
    table.extend(cases);
    for (i, v) in table.into_iter().enumerate() {
      insert_expr(
        func, bb, at,
        ExprKind::StoreElementRef(Box::new([i])),
        SmallVec::from_slice(&[Value::Literal(Literal::Int(IntTy::UINT64, v)), Value::Local(arr)]),
        TypeStore::UNIT,
      );
      at += 1;
    }
    let ptr = insert_expr(
      func, bb, at,
      ExprKind::Intrinsic(IntrinsicKind::AcquireRawData),
      SmallVec::from_slice(&[Value::Local(arr)]),
      self.types.intern(TypeKind::CPointer(u64_ty)),
    );
    at += 1;
    let sel64 = insert_expr(
      func, bb, at,
      ExprKind::TypeCast(crate::types::OverflowStrategy::Wrapping),
      SmallVec::from_slice(&[selector]),
      u64_ty,
    );
    at += 1;
    insert_expr(
      func, bb, at,
      ExprKind::Apply,
      SmallVec::from_slice(&[Value::Imported(hook), Value::Local(sel64), Value::Local(ptr)]),
      TypeStore::UNIT,
    );
  }

  /// Pick the weak hook for a memory-ish equality call, if the callee is
  /// one.
  fn mem_cmp_hook(&self, package: &Package, func: &Func, id: ExprId) -> Option<&'static str> {
    let expr = &func.exprs[id];
    if expr.operands.len() < 3 { return None }
    let (name, parent) = match expr.operands[0] {
      Value::Func(f) => {
        let f = &package.funcs[f];
        (f.name, f.parent_def.map(|d| package.defs[d].name))
      }
      Value::Imported(i) => {
        let f = &package.imports[i];
        (f.name, f.parent_def.map(|d| package.defs[d].name))
      }
      _ => return None,
    };
    let parent = parent?.as_str();
    if !matches!(parent, "String" | "CString" | "Array" | "ArrayList") {
      return None
    }
    match name.as_str() {
      "==" | "equals" => Some(if parent == "CString" { WEAK_HOOK_STRCMP } else { WEAK_HOOK_MEMCMP }),
      "startsWith" | "endsWith" | "indexOf" | "contains" => Some(WEAK_HOOK_STRNCMP),
      "equalsIgnoreAsciiCase" => Some(WEAK_HOOK_STRCASECMP),
      _ => None,
    }
  }

  fn inject_trace_mem_cmp(
    &mut self, package: &mut Package, fid: FuncId, id: ExprId, hook: &'static str,
  ) {
    let hook = self.get_or_create_import(package, hook);
    let func = &mut package.funcs[fid];
    let (oper1, oper2) = {
      let expr = &func.exprs[id];
      (expr.operands[1], expr.operands[2])
    };
    let (bb, at) = position_of(func, id);
    insert_expr(
      func, bb, at,
      ExprKind::Apply,
      SmallVec::from_slice(&[Value::Imported(hook), oper1, oper2]),
      TypeStore::UNIT,
    );
  }

  // =============== The per-package constructor ===============

  /// Emit the `COMPILER_ADD` initialiser that allocates the coverage arrays
  /// at runtime and publishes the PC table.
  fn generate_init_func(&mut self, package: &mut Package) {
    if !self.options.any_counter() && !self.options.pc_table { return }

    let name = intern(&format!("_sancov_{}_init", package.name));
    let mut blocks: IdxVec<BlockId, Block> = IdxVec::new();
    let entry = blocks.push(Block::default());
    let mut groups: IdxVec<crate::types::ir::GroupId, BlockGroup> = IdxVec::new();
    let body = groups.push(BlockGroup { entry, blocks: vec![entry] });
    let mut func = Func {
      name,
      mangled: name,
      package: package.name,
      params: IdxVec::new(),
      ret_ty: TypeStore::UNIT,
      attrs: Attribute::COMPILER_ADD,
      generic_params: vec![],
      func_kind: FuncKind::GlobalVarInit,
      exprs: IdxVec::new(),
      blocks,
      groups,
      body,
      parent_def: None,
      link_info: LinkTypeInfo::Internal,
      loc: SourceRange::default(),
    };

    let bb_count = Value::Literal(Literal::Int(IntTy::UINT64, self.bb_counter));
    let mut ctors: Vec<(&'static str, &'static str)> = vec![];
    if self.options.inline_8bit_counters {
      ctors.push((CTOR_8BIT_COUNTERS, "__cj_sancov_8bit_counters"));
    }
    if self.options.trace_pc_guard {
      ctors.push((CTOR_PC_GUARD, "__cj_sancov_pc_guards"));
    }
    if self.options.inline_bool_flag {
      ctors.push((CTOR_BOOL_FLAG, "__cj_sancov_bool_flags"));
    }
    for (ctor, array) in ctors {
      let ctor = self.get_or_create_import(package, ctor);
      let array = self.global_var_bag[array];
      let call = func.append_expr(entry, Expression {
        kind: ExprKind::Apply,
        operands: SmallVec::from_slice(&[Value::Imported(ctor), bb_count]),
        ty: package.globals[array].ty,
        block: entry,
        loc: SourceRange::default(),
        flags: ExprFlags::COMPILER_ADD,
      });
      func.append_expr(entry, Expression {
        kind: ExprKind::Store,
        operands: SmallVec::from_slice(&[Value::Local(call), Value::Global(array)]),
        ty: TypeStore::UNIT,
        block: entry,
        loc: SourceRange::default(),
        flags: ExprFlags::COMPILER_ADD,
      });
    }
    if self.options.pc_table {
      let pcs_init = self.get_or_create_import(package, PCS_INIT);
      func.append_expr(entry, Expression {
        kind: ExprKind::Apply,
        operands: SmallVec::from_slice(&[Value::Imported(pcs_init), bb_count]),
        ty: TypeStore::UNIT,
        block: entry,
        loc: SourceRange::default(),
        flags: ExprFlags::COMPILER_ADD,
      });
    }
    func.append_expr(entry, Expression {
      kind: ExprKind::Terminator(Terminator::Exit),
      operands: SmallVec::new(),
      ty: TypeStore::UNIT,
      block: entry,
      loc: SourceRange::default(),
      flags: ExprFlags::COMPILER_ADD,
    });

    package.funcs.push(func);
  }
}

fn trace_cmp_hook(bytes: u32, is_const: bool) -> &'static str {
  match (bytes, is_const) {
    (1, false) => "__sanitizer_cov_trace_cmp1",
    (2, false) => "__sanitizer_cov_trace_cmp2",
    (4, false) => "__sanitizer_cov_trace_cmp4",
    (_, false) => "__sanitizer_cov_trace_cmp8",
    (1, true) => "__sanitizer_cov_trace_const_cmp1",
    (2, true) => "__sanitizer_cov_trace_const_cmp2",
    (4, true) => "__sanitizer_cov_trace_const_cmp4",
    (_, true) => "__sanitizer_cov_trace_const_cmp8",
  }
}

/// The (block, index) position of an expression in its block.
fn position_of(func: &Func, id: ExprId) -> (BlockId, usize) {
  let bb = func.exprs[id].block;
  let at = func.blocks[bb].exprs.iter().position(|&e| e == id).expect("expression in its block");
  (bb, at)
}

/// Insert an expression into `bb` at position `at`.
fn insert_expr(
  func: &mut Func, bb: BlockId, at: usize, kind: ExprKind,
  operands: SmallVec<[Value; 2]>, ty: crate::types::Ty,
) -> ExprId {
  let id = func.exprs.push(Expression {
    kind,
    operands,
    ty,
    block: bb,
    loc: SourceRange::default(),
    flags: ExprFlags::COMPILER_ADD,
  });
  let at = at.min(func.blocks[bb].exprs.len());
  func.blocks[bb].exprs.insert(at, id);
  id
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builder::{CHIRContext, FuncBuilder};
  use crate::types::ir::Param;
  use crate::types::OverflowStrategy;

  fn base_options() -> SanitizerCoverageOptions {
    SanitizerCoverageOptions {
      inline_8bit_counters: true,
      coverage: SancovLevel::BasicBlock,
      ..Default::default()
    }
  }

  #[test]
  fn validation_rejects_pc_table_without_counters() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let opts = SanitizerCoverageOptions { pc_table: true, ..Default::default() };
    let sancov = SanitizerCoverage::new(opts, &ctx.types);
    assert_eq!(
      sancov.check_sancov_option(&diag),
      Err(SancovError::IllegalUsageOfPcTable)
    );
    assert_eq!(diag.count_of(DiagKind::SancovIllegalUsageOfPcTable), 1);
  }

  #[test]
  fn validation_rejects_counters_without_level() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let opts = SanitizerCoverageOptions { trace_pc_guard: true, ..Default::default() };
    let sancov = SanitizerCoverage::new(opts, &ctx.types);
    assert_eq!(
      sancov.check_sancov_option(&diag),
      Err(SancovError::IllegalUsageOfLevel)
    );
  }

  #[test]
  fn instruments_blocks_and_emits_ctor() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(&ctx, intern("f"), vec![], TypeStore::UNIT);
    let b1 = fb.new_block();
    fb.goto(b1);
    fb.switch_to(b1);
    fb.exit(None);
    let mut package = Package::new(intern("app"));
    let fid = package.funcs.push(fb.finish());

    let before_funcs = package.funcs.len();
    let mut sancov = SanitizerCoverage::new(base_options(), &ctx.types);
    assert!(sancov.run_on_package(&mut package, &diag));

    // both blocks got a counter bump (constant + call)
    let func = &package.funcs[fid];
    let entry = func.entry_block();
    assert!(matches!(func.exprs[func.blocks[entry].exprs[1]].kind, ExprKind::Apply));
    // the package grew a ctor init function
    assert_eq!(package.funcs.len(), before_funcs + 1);
    let init = package.funcs.iter().last().unwrap();
    assert!(init.attrs.contains(Attribute::COMPILER_ADD));
    assert_eq!(init.link_info, LinkTypeInfo::Internal);
  }

  #[test]
  fn traces_integer_comparison() {
    let ctx = CHIRContext::default();
    let diag = DiagAdapter::new();
    let mut fb = FuncBuilder::new(&ctx, intern("c"), vec![
      Param { ty: TypeStore::INT64, name: intern("x"), loc: SourceRange::default() },
    ], TypeStore::BOOL);
    let x = Value::Param(crate::types::ir::ParamId(0));
    let five = fb.constant(Literal::Int(IntTy::INT64, 5));
    let cmp = fb.binop(BinOp::Lt, OverflowStrategy::Throwing, x, five, TypeStore::BOOL);
    fb.exit(Some(cmp));
    let mut package = Package::new(intern("app"));
    let fid = package.funcs.push(fb.finish());

    let opts = SanitizerCoverageOptions { trace_cmp: true, ..Default::default() };
    let mut sancov = SanitizerCoverage::new(opts, &ctx.types);
    assert!(sancov.run_on_package(&mut package, &diag));

    // an Apply of the trace hook now precedes the comparison
    let func = &package.funcs[fid];
    let Value::Local(cmp_id) = cmp else { unreachable!() };
    let (bb, at) = position_of(func, cmp_id);
    let before = func.blocks[bb].exprs[at - 1];
    assert!(matches!(func.exprs[before].kind, ExprKind::Apply));
    let Value::Imported(hook) = func.exprs[before].operands[0] else { panic!("hook call") };
    // `five` is the result of a Constant expression, not a literal operand,
    // so the non-const variant is used
    assert_eq!(package.imports[hook].name.as_str(), "__sanitizer_cov_trace_cmp8");
  }
}
