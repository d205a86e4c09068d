//! The CHIR building context: the shared type interner plus arenas for IR
//! nodes, and the per-thread sub-builders used during parallel lowering.
//!
//! A single [`CHIRContext`] holds the interned type table and is shared by
//! every builder. During parallel AST lowering each task owns a
//! [`SubBuilder`] that allocates functions locally; sub-builders are merged
//! into the shared [`CHIRBuilder`] only after the task queue drains, so all
//! cross-thread writes happen in one serial step. Types are interned through
//! the context's lock directly, which keeps interned types structurally
//! equal across sub-builders by construction.

use smallvec::SmallVec;

use crate::types::ir::{
  Block, BlockGroup, BlockId, ExprFlags, ExprId, ExprKind, Expression, Func, FuncId, FuncKind,
  GlobalVar, GlobalVarId, GroupId, ImportId, ImportedValue, Literal, Package, Param, ParamId,
  Terminator, Value,
};
use crate::types::{Types, Ty};
use crate::{IdxVec, SourceRange, Symbol};

/// The shared building context: the interned type table and the name pools.
#[derive(Debug, Default)]
pub struct CHIRContext {
  /// The interned type table, safe for concurrent interning.
  pub types: Types,
}

/// The package-level builder. Owns the package under construction.
#[derive(Debug)]
pub struct CHIRBuilder<'a> {
  /// The shared context.
  pub ctx: &'a CHIRContext,
  /// The package being built.
  pub package: Package,
}

impl<'a> CHIRBuilder<'a> {
  /// Create a builder for a fresh package named `name`.
  #[must_use] pub fn new(ctx: &'a CHIRContext, name: Symbol) -> Self {
    Self { ctx, package: Package::new(name) }
  }

  /// Add a finished function to the package.
  pub fn add_func(&mut self, func: Func) -> FuncId { self.package.funcs.push(func) }

  /// Add a global variable to the package.
  pub fn add_global(&mut self, gv: GlobalVar) -> GlobalVarId { self.package.globals.push(gv) }

  /// Add an imported declaration to the package.
  pub fn add_import(&mut self, import: ImportedValue) -> ImportId {
    self.package.imports.push(import)
  }

  /// Fold a drained [`SubBuilder`] into the package. Returns the id the
  /// sub-builder's `k`-th function received.
  pub fn merge(&mut self, sub: SubBuilder) -> Vec<FuncId> {
    sub.funcs.into_iter().map(|func| self.package.funcs.push(func)).collect()
  }

  /// Finish building and return the package.
  #[must_use] pub fn finish(self) -> Package { self.package }
}

/// A per-task builder for parallel lowering. Allocates functions locally;
/// types go through the shared context.
#[derive(Debug, Default)]
pub struct SubBuilder {
  funcs: Vec<Func>,
}

impl SubBuilder {
  /// Create an empty sub-builder.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Record a finished function for the later merge.
  pub fn add_func(&mut self, func: Func) { self.funcs.push(func) }

  /// The number of functions awaiting merge.
  #[must_use] pub fn len(&self) -> usize { self.funcs.len() }

  /// Whether no functions await merge.
  #[must_use] pub fn is_empty(&self) -> bool { self.funcs.is_empty() }
}

/// A builder for one function body. Blocks are created explicitly and
/// expressions appended to the current block; terminator helpers close the
/// block they are appended to.
#[derive(Debug)]
pub struct FuncBuilder<'a> {
  ctx: &'a CHIRContext,
  func: Func,
  cur: BlockId,
  loc: SourceRange,
}

impl<'a> FuncBuilder<'a> {
  /// Start building a function. The body group and its entry block are
  /// created; the entry block is current.
  #[must_use] pub fn new(
    ctx: &'a CHIRContext, name: Symbol, params: Vec<Param>, ret_ty: Ty,
  ) -> Self {
    let mut blocks: IdxVec<BlockId, Block> = IdxVec::new();
    let entry = blocks.push(Block::default());
    let mut groups: IdxVec<GroupId, BlockGroup> = IdxVec::new();
    let body = groups.push(BlockGroup { entry, blocks: vec![entry] });
    let func = Func {
      name,
      mangled: name,
      package: crate::intern("default"),
      params: params.into_iter().collect(),
      ret_ty,
      attrs: Default::default(),
      generic_params: vec![],
      func_kind: FuncKind::Default,
      exprs: IdxVec::new(),
      blocks,
      groups,
      body,
      parent_def: None,
      link_info: Default::default(),
      loc: SourceRange::default(),
    };
    Self { ctx, func, cur: entry, loc: SourceRange::default() }
  }

  /// The function under construction.
  #[must_use] pub fn func(&self) -> &Func { &self.func }

  /// The current block.
  #[must_use] pub fn current_block(&self) -> BlockId { self.cur }

  /// Set the source location attached to subsequently built expressions.
  pub fn set_loc(&mut self, loc: SourceRange) { self.loc = loc }

  /// Create a new block in the body group.
  pub fn new_block(&mut self) -> BlockId {
    let body = self.func.body;
    let bb = self.func.blocks.push(Block { group: body, ..Block::default() });
    self.func.groups[body].blocks.push(bb);
    bb
  }

  /// Make `bb` the current block.
  pub fn switch_to(&mut self, bb: BlockId) { self.cur = bb }

  fn push(&mut self, kind: ExprKind, operands: SmallVec<[Value; 2]>, ty: Ty) -> ExprId {
    let expr = Expression { kind, operands, ty, block: self.cur, loc: self.loc, flags: ExprFlags::default() };
    let id = self.func.exprs.push(expr);
    self.func.blocks[self.cur].exprs.push(id);
    id
  }

  /// Append a `Constant` producing `lit`.
  pub fn constant(&mut self, lit: Literal) -> Value {
    let ty = match lit {
      Literal::Int(ity, _) => self.ctx.types.mk_int(ity),
      Literal::Bool(_) => crate::types::TypeStore::BOOL,
      Literal::Rune(_) => crate::types::TypeStore::RUNE,
      Literal::Str(_) => crate::types::TypeStore::STRING,
      Literal::Unit => crate::types::TypeStore::UNIT,
      Literal::Float(fw, _) => self.ctx.types.intern(crate::types::TypeKind::Float(fw)),
    };
    let id = self.push(ExprKind::Constant, SmallVec::from_slice(&[Value::Literal(lit)]), ty);
    Value::Local(id)
  }

  /// Append a binary operation.
  pub fn binop(
    &mut self, op: crate::types::ir::BinOp, strategy: crate::types::OverflowStrategy,
    lhs: Value, rhs: Value, ty: Ty,
  ) -> Value {
    let id = self.push(ExprKind::BinaryOp(op, strategy), SmallVec::from_slice(&[lhs, rhs]), ty);
    Value::Local(id)
  }

  /// Append a unary operation.
  pub fn unop(
    &mut self, op: crate::types::ir::UnaryOp, strategy: crate::types::OverflowStrategy,
    v: Value, ty: Ty,
  ) -> Value {
    let id = self.push(ExprKind::UnaryOp(op, strategy), SmallVec::from_slice(&[v]), ty);
    Value::Local(id)
  }

  /// Append a typecast of `v` to `ty`.
  pub fn typecast(&mut self, strategy: crate::types::OverflowStrategy, v: Value, ty: Ty) -> Value {
    let id = self.push(ExprKind::TypeCast(strategy), SmallVec::from_slice(&[v]), ty);
    Value::Local(id)
  }

  /// Append an `Apply` of `callee` to `args`.
  pub fn apply(&mut self, callee: Value, args: &[Value], ret_ty: Ty) -> Value {
    let mut operands = SmallVec::with_capacity(args.len() + 1);
    operands.push(callee);
    operands.extend_from_slice(args);
    let id = self.push(ExprKind::Apply, operands, ret_ty);
    Value::Local(id)
  }

  /// Append an intrinsic call.
  pub fn intrinsic(
    &mut self, kind: crate::types::ir::IntrinsicKind, args: &[Value], ret_ty: Ty,
  ) -> Value {
    let mut operands = SmallVec::with_capacity(args.len());
    operands.extend_from_slice(args);
    let id = self.push(ExprKind::Intrinsic(kind), operands, ret_ty);
    Value::Local(id)
  }

  /// Append an `Allocate` of a cell of type `ty`; the result is a `ty&`.
  pub fn allocate(&mut self, ty: Ty) -> Value {
    let ref_ty = self.ctx.types.mk_ref(ty);
    let id = self.push(ExprKind::Allocate(ty), SmallVec::new(), ref_ty);
    Value::Local(id)
  }

  /// Append a `Load` from the reference `r`.
  pub fn load(&mut self, r: Value, ty: Ty) -> Value {
    let id = self.push(ExprKind::Load, SmallVec::from_slice(&[r]), ty);
    Value::Local(id)
  }

  /// Append a `Store` of `v` into the reference `r`.
  pub fn store(&mut self, v: Value, r: Value) {
    self.push(ExprKind::Store, SmallVec::from_slice(&[v, r]), crate::types::TypeStore::UNIT);
  }

  /// Append a `Debug` binder for unused-code reporting.
  pub fn debug(&mut self, name: Symbol, kind: crate::types::ir::VarKind, v: Value) {
    self.push(ExprKind::Debug { name, kind }, SmallVec::from_slice(&[v]), crate::types::TypeStore::UNIT);
  }

  /// Append a `Tuple` building expression.
  pub fn tuple(&mut self, elems: &[Value], ty: Ty) -> Value {
    let mut operands = SmallVec::with_capacity(elems.len());
    operands.extend_from_slice(elems);
    let id = self.push(ExprKind::Tuple, operands, ty);
    Value::Local(id)
  }

  /// Append a `Field` projection.
  pub fn field(&mut self, base: Value, path: &[usize], ty: Ty) -> Value {
    let id = self.push(ExprKind::Field(path.into()), SmallVec::from_slice(&[base]), ty);
    Value::Local(id)
  }

  fn terminator(&mut self, term: Terminator, operands: SmallVec<[Value; 2]>) {
    assert!(
      self.func.terminator_of(self.cur).is_none(),
      "block {} is already terminated", self.cur
    );
    self.push(ExprKind::Terminator(term), operands, crate::types::TypeStore::UNIT);
  }

  /// Terminate the current block with `GOTO(target)`.
  pub fn goto(&mut self, target: BlockId) {
    self.terminator(Terminator::Goto(target), SmallVec::new());
  }

  /// Terminate the current block with `BRANCH(cond, t, f)`.
  pub fn branch(&mut self, cond: Value, true_bb: BlockId, false_bb: BlockId) {
    self.terminator(Terminator::Branch { true_bb, false_bb }, SmallVec::from_slice(&[cond]));
  }

  /// Terminate the current block with a `MULTIBRANCH`.
  pub fn multibranch(&mut self, selector: Value, default_bb: BlockId, cases: &[(u64, BlockId)]) {
    self.terminator(
      Terminator::MultiBranch { default_bb, cases: cases.into() },
      SmallVec::from_slice(&[selector]),
    );
  }

  /// Terminate the current block with `EXIT`, optionally returning `v`.
  pub fn exit(&mut self, v: Option<Value>) {
    self.terminator(Terminator::Exit, v.into_iter().collect());
  }

  /// Terminate the current block with an `INT_OP_WITH_EXCEPTION`.
  pub fn int_op_with_exception(
    &mut self, op: crate::types::ir::BinOp, strategy: crate::types::OverflowStrategy,
    lhs: Value, rhs: Value, ty: Ty, ok: BlockId, err: BlockId,
  ) -> Value {
    assert!(self.func.terminator_of(self.cur).is_none());
    let id = self.push(
      ExprKind::Terminator(Terminator::IntOpWithException { op, strategy, ok, err }),
      SmallVec::from_slice(&[lhs, rhs]),
      ty,
    );
    Value::Local(id)
  }

  /// Finish the function.
  #[must_use] pub fn finish(self) -> Func { self.func }
}
