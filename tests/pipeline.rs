//! End-to-end scenarios: lowered function bodies through the full pass
//! pipeline.

use chir::analysis::sint::SInt;
use chir::builder::{CHIRContext, FuncBuilder};
use chir::diag::{DiagAdapter, DiagKind};
use chir::intern;
use chir::pipeline::{run_passes, PipelineOptions};
use chir::types::ir::{
  Attribute, BinOp, ExprFlags, ExprKind, FuncKind, ImportedValue, IntrinsicKind, Literal,
  Package, Param, ParamId, Terminator, Value, CustomTypeDef, DefKind,
};
use chir::types::{IntTy, IntWidth, OverflowStrategy, TypeKind, TypeStore};
use chir::SourceRange;
use pretty_assertions::assert_eq;

fn options() -> PipelineOptions {
  let _ = env_logger::builder().is_test(true).try_init();
  PipelineOptions { threads: 2, ..PipelineOptions::default() }
}

/// `fn f(): Int32 { let a: Int32 = 2; let b: Int32 = 3; return a*b + 4 }`
/// After the pipeline the body is a single constant and the exit.
#[test]
fn constant_folding_of_arithmetic() {
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

  let mut func = fb.finish();
  func.attrs |= Attribute::PUBLIC;
  let mut package = Package::new(intern("scenario1"));
  let fid = package.funcs.push(func);
  run_passes(&mut package, &ctx, &diag, &options());

  let func = &package.funcs[fid];
  let entry = func.entry_block();
  let exprs = &func.blocks[entry].exprs;
  // a single Constant(Int32, 10) followed by EXIT
  assert_eq!(exprs.len(), 2, "body should fold to constant + exit, got {exprs:?}");
  let first = &func.exprs[exprs[0]];
  assert_eq!(first.kind, ExprKind::Constant);
  assert_eq!(first.operands[0], Value::Literal(Literal::Int(IntTy::INT32, 10)));
  assert!(matches!(
    func.exprs[exprs[1]].as_terminator(),
    Some(Terminator::Exit)
  ));
  assert!(!diag.has_errors());
}

/// `fn g(x: Int32) { if (false) { sideEffect() } else { return } }`
/// The true block is removed and a source-visible warning emitted.
#[test]
fn branch_pruning_with_warning() {
  let ctx = CHIRContext::default();
  let diag = DiagAdapter::new();
  let file = intern("g.cj");
  let mut fb = FuncBuilder::new(&ctx, intern("g"), vec![
    Param { ty: ctx.types.mk_int(IntTy::INT32), name: intern("x"), loc: SourceRange::default() },
  ], TypeStore::UNIT);
  let then_bb = fb.new_block();
  let else_bb = fb.new_block();
  fb.set_loc(SourceRange::new(file, (2, 3), (2, 5)));
  let cond = fb.constant(Literal::Bool(false));
  fb.branch(cond, then_bb, else_bb);
  fb.switch_to(then_bb);
  fb.exit(None);
  fb.switch_to(else_bb);
  fb.exit(None);

  let mut func = fb.finish();
  func.attrs |= Attribute::PUBLIC;
  let mut package = Package::new(intern("scenario2"));
  let fid = package.funcs.push(func);
  run_passes(&mut package, &ctx, &diag, &options());

  let func = &package.funcs[fid];
  assert!(
    !func.groups[func.body].blocks.contains(&then_bb),
    "the provably-dead branch should be removed"
  );
  assert_eq!(diag.count_of(DiagKind::DceUnreachableBlockInExpression), 1);
  let warning = diag
    .take_sorted()
    .into_iter()
    .find(|d| d.kind == DiagKind::DceUnreachableBlockInExpression)
    .expect("warning present");
  assert_eq!(warning.main_hints, vec!["if"]);
  assert_eq!(warning.range.begin.line, 2);
}

/// `fn h(): Int8 { let a: Int8 = 127; return a + 1 }` with throwing
/// strategy: `arithmetic_operator_overflow` with the exact hint and note.
#[test]
fn overflow_diagnostic() {
  let ctx = CHIRContext::default();
  let diag = DiagAdapter::new();
  let int8 = ctx.types.mk_int(IntTy::INT8);
  let file = intern("h.cj");
  let mut fb = FuncBuilder::new(&ctx, intern("h"), vec![], int8);
  fb.set_loc(SourceRange::new(file, (3, 12), (3, 13)));
  let a = fb.constant(Literal::Int(IntTy::INT8, 127));
  let one = fb.constant(Literal::Int(IntTy::INT8, 1));
  let sum = fb.binop(BinOp::Add, OverflowStrategy::Throwing, a, one, int8);
  fb.exit(Some(sum));

  let mut func = fb.finish();
  func.attrs |= Attribute::PUBLIC;
  let mut package = Package::new(intern("scenario3"));
  package.funcs.push(func);
  run_passes(&mut package, &ctx, &diag, &options());

  let diags = diag.take_sorted();
  let overflow: Vec<_> = diags
    .iter()
    .filter(|d| d.kind == DiagKind::ArithmeticOperatorOverflow)
    .collect();
  assert_eq!(overflow.len(), 1, "exactly one overflow diagnostic");
  assert_eq!(overflow[0].main_hints, vec!["+", "Int8(127) + Int8(1)"]);
  assert_eq!(overflow[0].notes, vec!["range of Int8 is -128 ~ 127"]);
}

/// `fn k() { let a = Array<Int64>(3, item: 0); a[5] }`: `idx_out_of_bounds`
/// with the human-readable hint.
#[test]
fn array_out_of_bounds() {
  let ctx = CHIRContext::default();
  let diag = DiagAdapter::new();

  let mut package = Package::new(intern("scenario4"));
  let array_def = package.defs.push(CustomTypeDef {
    kind: DefKind::Struct,
    name: intern("Array"),
    package: intern("std.core"),
    generic_params: vec![intern("T")],
    implemented: vec![],
    super_class: None,
    static_vars: vec![],
    fields: vec![],
    methods: vec![],
    vtable: vec![],
    attrs: Attribute::IMPORTED | Attribute::NON_RECOMPILE,
    loc: SourceRange::default(),
  });
  let array_ty = ctx.types.intern(TypeKind::Struct(array_def, Box::new([TypeStore::INT64])));
  let mk_member = |name: &str| ImportedValue {
    name: intern(name),
    mangled: intern(name),
    package: intern("std.core"),
    ty: TypeStore::UNIT,
    attrs: Attribute::IMPORTED | Attribute::NON_RECOMPILE,
    is_func: true,
    func_kind: FuncKind::Default,
    parent_def: Some(array_def),
    loc: SourceRange::default(),
  };
  let array_init = package.imports.push(mk_member("init"));
  let array_get = package.imports.push(mk_member("get"));

  let file = intern("k.cj");
  let mut fb = FuncBuilder::new(&ctx, intern("k"), vec![], TypeStore::UNIT);
  let arr = fb.allocate(array_ty);
  let three = fb.constant(Literal::Int(IntTy::INT64, 3));
  let zero = fb.constant(Literal::Int(IntTy::INT64, 0));
  // init(this, size, item!)
  let _ = fb.apply(Value::Imported(array_init), &[arr, three, zero], TypeStore::UNIT);
  fb.set_loc(SourceRange::new(file, (2, 30), (2, 34)));
  let five = fb.constant(Literal::Int(IntTy::INT64, 5));
  let _ = fb.apply(Value::Imported(array_get), &[arr, five], TypeStore::INT64);
  fb.exit(None);

  let mut func = fb.finish();
  func.attrs |= Attribute::PUBLIC;
  package.funcs.push(func);
  run_passes(&mut package, &ctx, &diag, &options());

  let diags = diag.take_sorted();
  let oob: Vec<_> = diags.iter().filter(|d| d.kind == DiagKind::IdxOutOfBounds).collect();
  assert_eq!(oob.len(), 1);
  assert_eq!(
    oob[0].main_hints,
    vec!["array index 5 is past the end of array (which contains 3 elements)"]
  );
}

/// `fn m(x: Int64) { if (x > 0 && x < 10) { varray.get(x) } }` with
/// `varray: VArray<T, $10>`: the runtime bounds-check attribute is cleared.
#[test]
fn range_narrowing_clears_bounds_check() {
  let ctx = CHIRContext::default();
  let diag = DiagAdapter::new();
  let varray_ty = ctx.types.intern(TypeKind::VArray { elem: TypeStore::INT64, size: 10 });
  let mut fb = FuncBuilder::new(&ctx, intern("m"), vec![
    Param { ty: TypeStore::INT64, name: intern("x"), loc: SourceRange::default() },
    Param { ty: varray_ty, name: intern("varray"), loc: SourceRange::default() },
  ], TypeStore::UNIT);
  let x = Value::Param(ParamId(0));
  let varray = Value::Param(ParamId(1));

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
  let get = fb.intrinsic(IntrinsicKind::VArrayGet, &[varray, x], TypeStore::INT64);
  fb.goto(done);
  fb.switch_to(done);
  fb.exit(None);

  let Value::Local(get_id) = get else { unreachable!() };
  let mut func = fb.finish();
  func.attrs |= Attribute::PUBLIC;
  func.exprs[get_id].flags.insert(ExprFlags::NEED_CHECK_ARRAY_BOUND);

  let mut package = Package::new(intern("scenario5"));
  let fid = package.funcs.push(func);
  run_passes(&mut package, &ctx, &diag, &options());

  assert!(
    !package.funcs[fid].exprs[get_id].flags.contains(ExprFlags::NEED_CHECK_ARRAY_BOUND),
    "the proven-in-bounds access should lose its runtime check"
  );
  assert_eq!(diag.count_of(DiagKind::IdxOutOfBounds), 0);
}

/// `truncate` after `zext` is the identity on representable values.
#[test]
fn truncate_zext_round_trip() {
  for v in 0..=255u64 {
    let x = SInt::new(IntWidth::W8, v);
    assert_eq!(x.zext(IntWidth::W64).trunc(IntWidth::W8), x);
  }
}

/// Parallel scheduling produces the same analysis results as serial: run
/// the same package through both and compare the emitted diagnostics.
#[test]
fn parallel_matches_serial() {
  let build = |ctx: &CHIRContext| {
    let mut package = Package::new(intern("par"));
    for i in 0..24 {
      let int8 = ctx.types.mk_int(IntTy::INT8);
      let mut fb = FuncBuilder::new(ctx, intern(&format!("f{i}")), vec![], int8);
      fb.set_loc(SourceRange::new(intern("par.cj"), (i + 1, 1), (i + 1, 2)));
      let a = fb.constant(Literal::Int(IntTy::INT8, 127));
      let one = fb.constant(Literal::Int(IntTy::INT8, 1));
      let sum = fb.binop(BinOp::Add, OverflowStrategy::Throwing, a, one, int8);
      fb.exit(Some(sum));
      let mut func = fb.finish();
      func.attrs |= Attribute::PUBLIC;
      package.funcs.push(func);
    }
    package
  };

  let ctx = CHIRContext::default();
  let serial_diag = DiagAdapter::new();
  let mut serial_pkg = build(&ctx);
  run_passes(
    &mut serial_pkg, &ctx, &serial_diag,
    &PipelineOptions { threads: 1, ..PipelineOptions::default() },
  );

  let parallel_diag = DiagAdapter::new();
  let mut parallel_pkg = build(&ctx);
  run_passes(
    &mut parallel_pkg, &ctx, &parallel_diag,
    &PipelineOptions { threads: 8, ..PipelineOptions::default() },
  );

  let serial: Vec<_> = serial_diag.take_sorted();
  let parallel: Vec<_> = parallel_diag.take_sorted();
  assert_eq!(serial, parallel);
  assert_eq!(serial.iter().filter(|d| d.kind == DiagKind::ArithmeticOperatorOverflow).count(), 24);
}
