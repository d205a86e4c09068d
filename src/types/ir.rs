//! The CHIR IR: packages, functions, block groups, blocks, expressions and
//! terminators, plus custom type definitions and their vtables.
//!
//! All IR nodes live in id-indexed arenas. A [`Func`] owns a flat arena of
//! [`Expression`]s and [`Block`]s; blocks order expression ids and end in
//! exactly one terminator. The result of expression `e` is the SSA local
//! written `Value::Local(e)`; every expression defines exactly one typed
//! local.

use smallvec::SmallVec;

use crate::types::{DefId, IntTy, FloatWidth, OverflowStrategy, Ty, TypeStore};
use crate::{mk_id, IdxVec, SourceRange, Symbol};

mk_id! {
  /// A function in a [`Package`].
  FuncId,
  /// A basic block in a [`Func`].
  BlockId,
  /// A block group in a [`Func`]; the function body is one, nested lambdas
  /// own others.
  GroupId,
  /// An expression in a [`Func`]; also names the SSA local it defines.
  ExprId,
  /// A parameter of a [`Func`].
  ParamId,
  /// A global variable in a [`Package`].
  GlobalVarId,
  /// An imported value (variable or function) in a [`Package`].
  ImportId,
}

bitflags::bitflags! {
  /// Attributes carried by functions, globals, imports and custom type defs.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct Attribute: u16 {
    /// The declaration is generic.
    const GENERIC = 1 << 0;
    /// No reflection metadata is generated for the declaration.
    const NO_REFLECT_INFO = 1 << 1;
    /// A foreign (C ABI) function.
    const FOREIGN = 1 << 2;
    /// Synthesised by the compiler, not present in source.
    const COMPILER_ADD = 1 << 3;
    /// A `let` global evaluated at most once by its init function.
    const READONLY = 1 << 4;
    /// Calls may be treated as pure by downstream passes.
    const NO_SIDE_EFFECT = 1 << 5;
    /// The declaration is visible outside the package.
    const PUBLIC = 1 << 6;
    /// A virtual member function (occupies a vtable slot).
    const VIRTUAL = 1 << 7;
    /// A static member.
    const STATIC = 1 << 8;
    /// Imported declarations that must survive recompilation.
    const NON_RECOMPILE = 1 << 9;
    /// The declaration was imported from another package.
    const IMPORTED = 1 << 10;
    /// The declaration has been pruned; the backend skips it.
    const REMOVED = 1 << 11;
  }
}

bitflags::bitflags! {
  /// Per-expression attribute bag, readable by downstream passes.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
  pub struct ExprFlags: u8 {
    /// Analysis proved this arithmetic can never overflow.
    const NEVER_OVERFLOW = 1 << 0;
    /// The VArray access still needs a runtime bounds check.
    const NEED_CHECK_ARRAY_BOUND = 1 << 1;
    /// Suppress unused/unreachable warnings on this node.
    const SKIP_DCE_WARNING = 1 << 2;
    /// The block/expression has been proven unreachable.
    const UNREACHABLE = 1 << 3;
    /// Generated internals of a lowered `for .. in` loop.
    const GENERATED_FOR_IN = 1 << 4;
    /// Synthesised by the compiler.
    const COMPILER_ADD = 1 << 5;
  }
}

/// Link-time visibility of a compiler-added declaration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkTypeInfo {
  /// Externally visible.
  #[default]
  External,
  /// Internal to the produced object.
  Internal,
}

/// A typed compile-time constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Literal {
  /// The unit value.
  Unit,
  /// A boolean.
  Bool(bool),
  /// A code point.
  Rune(char),
  /// An interned string.
  Str(Symbol),
  /// An integer of the given type; the payload is the raw two's complement
  /// bit pattern zero-extended to 64 bits.
  Int(IntTy, u64),
  /// A float of the given width; the payload is the `f64` bit pattern.
  Float(FloatWidth, u64),
}

impl Literal {
  /// Build a float literal from an `f64`.
  #[must_use] pub fn float(width: FloatWidth, v: f64) -> Self { Self::Float(width, v.to_bits()) }

  /// The float value of a float literal.
  #[must_use] pub fn float_val(self) -> Option<f64> {
    if let Self::Float(_, bits) = self { Some(f64::from_bits(bits)) } else { None }
  }

  /// Render the literal for diagnostics.
  #[must_use] pub fn to_display_string(self) -> String {
    match self {
      Self::Unit => "()".into(),
      Self::Bool(b) => b.to_string(),
      Self::Rune(c) => format!("r'{c}'"),
      Self::Str(s) => format!("{:?}", s.as_str()),
      Self::Int(ity, bits) => {
        if ity.signed {
          let shift = 64 - ity.width.bits();
          (((bits << shift) as i64) >> shift).to_string()
        } else {
          bits.to_string()
        }
      }
      Self::Float(_, bits) => f64::from_bits(bits).to_string(),
    }
  }
}

/// A use of an SSA value: operands of expressions refer to these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
  /// The result of an expression in the current function.
  Local(ExprId),
  /// A parameter of the current function.
  Param(ParamId),
  /// A global variable of the current package.
  Global(GlobalVarId),
  /// An imported variable or function.
  Imported(ImportId),
  /// A function of the current package.
  Func(FuncId),
  /// A literal constant.
  Literal(Literal),
}

impl Value {
  /// The literal payload, if this is a literal.
  #[must_use] pub fn as_literal(self) -> Option<Literal> {
    if let Self::Literal(lit) = self { Some(lit) } else { None }
  }
}

/// A unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
  /// Arithmetic negation.
  Neg,
  /// Boolean negation.
  Not,
  /// Bitwise complement.
  BitNot,
}

/// A binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
  /// `a + b`
  Add,
  /// `a - b`
  Sub,
  /// `a * b`
  Mul,
  /// `a / b`
  Div,
  /// `a % b`
  Mod,
  /// `a ** b`
  Exp,
  /// `a << b`
  LShift,
  /// `a >> b`
  RShift,
  /// `a & b`
  BitAnd,
  /// `a ^ b`
  BitXor,
  /// `a | b`
  BitOr,
  /// `a < b`
  Lt,
  /// `a > b`
  Gt,
  /// `a <= b`
  Le,
  /// `a >= b`
  Ge,
  /// `a == b`
  Equal,
  /// `a != b`
  NotEqual,
  /// Short-circuit `a && b`
  And,
  /// Short-circuit `a || b`
  Or,
}

impl BinOp {
  /// The source token of this operator, used in diagnostics.
  #[must_use] pub fn token(self) -> &'static str {
    match self {
      Self::Add => "+",
      Self::Sub => "-",
      Self::Mul => "*",
      Self::Div => "/",
      Self::Mod => "%",
      Self::Exp => "**",
      Self::LShift => "<<",
      Self::RShift => ">>",
      Self::BitAnd => "&",
      Self::BitXor => "^",
      Self::BitOr => "|",
      Self::Lt => "<",
      Self::Gt => ">",
      Self::Le => "<=",
      Self::Ge => ">=",
      Self::Equal => "==",
      Self::NotEqual => "!=",
      Self::And => "&&",
      Self::Or => "||",
    }
  }

  /// Whether this is `ADD..MOD`, the basic arithmetic subset.
  #[must_use] pub fn is_basic_arithmetic(self) -> bool {
    matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod)
  }

  /// Whether this is a relational operator.
  #[must_use] pub fn is_relational(self) -> bool {
    matches!(self, Self::Lt | Self::Gt | Self::Le | Self::Ge | Self::Equal | Self::NotEqual)
  }
}

/// Intrinsic operations recognised by the analyses and instrumentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntrinsicKind {
  /// `varrayGet(arr, indexes...)`
  VArrayGet,
  /// `varraySet(arr, value, indexes...)`
  VArraySet,
  /// Acquire the raw data pointer of a RawArray.
  AcquireRawData,
  /// Anything else; opaque to the analyses.
  Other(Symbol),
}

/// What a [`ExprKind::Debug`] expression binds, for unused-code reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
  /// A local `let`/`var`.
  LocalVar,
  /// A function parameter.
  Param,
  /// A variable captured or declared in a lambda.
  LambdaVar,
}

/// The last expression of a block. Success/error successors are positional:
/// successor 0 is the success arm of the `*WithException` variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
  /// Unconditional jump.
  Goto(BlockId),
  /// Two-way branch on the boolean operand 0.
  Branch {
    /// Jump target when the condition is true.
    true_bb: BlockId,
    /// Jump target when the condition is false.
    false_bb: BlockId,
  },
  /// N-way branch on the integer/rune operand 0.
  MultiBranch {
    /// Jump target when no case matches.
    default_bb: BlockId,
    /// `(case value, target)` pairs, in source order.
    cases: Box<[(u64, BlockId)]>,
  },
  /// Return from the function; operand 0 (if any) is the return value.
  Exit,
  /// Raise the exception in operand 0; jumps to the landing pad if any.
  RaiseException(Option<BlockId>),
  /// Call operand 0 with the remaining operands; may throw.
  ApplyWithException {
    /// The success arm.
    ok: BlockId,
    /// The error arm.
    err: BlockId,
  },
  /// Virtual dispatch of `method` on operand 0; may throw.
  InvokeWithException {
    /// The method name in the vtable.
    method: Symbol,
    /// The success arm.
    ok: BlockId,
    /// The error arm.
    err: BlockId,
  },
  /// An arithmetic operation that can throw (overflow, division by zero).
  IntOpWithException {
    /// The arithmetic operator.
    op: BinOp,
    /// The overflow strategy (normally `Throwing`).
    strategy: OverflowStrategy,
    /// The success arm.
    ok: BlockId,
    /// The error arm.
    err: BlockId,
  },
  /// A typecast that can throw on overflow.
  TypeCastWithException {
    /// The overflow strategy.
    strategy: OverflowStrategy,
    /// The success arm.
    ok: BlockId,
    /// The error arm.
    err: BlockId,
  },
  /// An intrinsic that can throw (e.g. VArray access).
  IntrinsicWithException {
    /// The intrinsic.
    kind: IntrinsicKind,
    /// The success arm.
    ok: BlockId,
    /// The error arm.
    err: BlockId,
  },
}

impl Terminator {
  /// The successor blocks, in positional order.
  #[must_use] pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
    match self {
      Self::Goto(bb) => SmallVec::from_slice(&[*bb]),
      Self::Branch { true_bb, false_bb } => SmallVec::from_slice(&[*true_bb, *false_bb]),
      Self::MultiBranch { default_bb, cases } => {
        let mut succs = SmallVec::with_capacity(cases.len() + 1);
        succs.push(*default_bb);
        succs.extend(cases.iter().map(|&(_, bb)| bb));
        succs
      }
      Self::Exit => SmallVec::new(),
      Self::RaiseException(bb) => bb.iter().copied().collect(),
      Self::ApplyWithException { ok, err }
      | Self::InvokeWithException { ok, err, .. }
      | Self::IntOpWithException { ok, err, .. }
      | Self::TypeCastWithException { ok, err, .. }
      | Self::IntrinsicWithException { ok, err, .. } => SmallVec::from_slice(&[*ok, *err]),
    }
  }

  /// The success successor of a `*WithException` terminator.
  #[must_use] pub fn success_successor(&self) -> Option<BlockId> {
    match self {
      Self::ApplyWithException { ok, .. }
      | Self::InvokeWithException { ok, .. }
      | Self::IntOpWithException { ok, .. }
      | Self::TypeCastWithException { ok, .. }
      | Self::IntrinsicWithException { ok, .. } => Some(*ok),
      _ => None,
    }
  }

  /// The error successor of a `*WithException` terminator.
  #[must_use] pub fn error_successor(&self) -> Option<BlockId> {
    match self {
      Self::ApplyWithException { err, .. }
      | Self::InvokeWithException { err, .. }
      | Self::IntOpWithException { err, .. }
      | Self::TypeCastWithException { err, .. }
      | Self::IntrinsicWithException { err, .. } => Some(*err),
      _ => None,
    }
  }
}

/// The coarse expression classification used to dispatch transfer functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExprMajorKind {
  /// Allocations, loads, stores.
  Memory,
  /// Unary operators.
  Unary,
  /// Binary operators.
  Binary,
  /// Block-ending control flow.
  Terminator,
  /// Everything else.
  Others,
}

/// The operation performed by an [`Expression`]. Operand positions are
/// documented per variant; operands live in [`Expression::operands`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprKind {
  /// Allocate a cell of the given type; the result is a reference to it.
  Allocate(Ty),
  /// Load from the reference in operand 0.
  Load,
  /// Store operand 0 into the reference in operand 1.
  Store,
  /// Project a reference to a field path inside the reference in operand 0.
  GetElementRef(Box<[usize]>),
  /// Store operand 0 into the field path inside the reference in operand 1.
  StoreElementRef(Box<[usize]>),
  /// Allocate a runtime array; operand 0 is the element count.
  RawArrayAllocate(Ty),
  /// Produce the literal in operand 0.
  Constant,
  /// Bind the source identifier `name` to operand 0, for debug info and
  /// unused-code reporting.
  Debug {
    /// The source identifier.
    name: Symbol,
    /// What sort of binding this is.
    kind: VarKind,
  },
  /// Build a tuple/struct/enum value from the operands.
  Tuple,
  /// Project the field path out of the value in operand 0.
  Field(Box<[usize]>),
  /// Call operand 0 with the remaining operands.
  Apply,
  /// Virtual dispatch of `method` on operand 0 with the remaining operands.
  Invoke {
    /// The method name resolved through the vtable.
    method: Symbol,
  },
  /// An intrinsic operation on the operands.
  Intrinsic(IntrinsicKind),
  /// Convert operand 0 to the result type.
  TypeCast(OverflowStrategy),
  /// A lambda whose body is the given nested block group.
  Lambda(GroupId),
  /// A unary operation on operand 0.
  UnaryOp(UnaryOp, OverflowStrategy),
  /// A binary operation on operands 0 and 1.
  BinaryOp(BinOp, OverflowStrategy),
  /// A block terminator.
  Terminator(Terminator),
}

impl ExprKind {
  /// The coarse classification of this expression.
  #[must_use] pub fn major_kind(&self) -> ExprMajorKind {
    match self {
      Self::Allocate(_)
      | Self::Load
      | Self::Store
      | Self::GetElementRef(_)
      | Self::StoreElementRef(_)
      | Self::RawArrayAllocate(_) => ExprMajorKind::Memory,
      Self::UnaryOp(..) => ExprMajorKind::Unary,
      Self::BinaryOp(..) => ExprMajorKind::Binary,
      Self::Terminator(_) => ExprMajorKind::Terminator,
      _ => ExprMajorKind::Others,
    }
  }

  /// A short name for logging.
  #[must_use] pub fn name(&self) -> &'static str {
    match self {
      Self::Allocate(_) => "Allocate",
      Self::Load => "Load",
      Self::Store => "Store",
      Self::GetElementRef(_) => "GetElementRef",
      Self::StoreElementRef(_) => "StoreElementRef",
      Self::RawArrayAllocate(_) => "RawArrayAllocate",
      Self::Constant => "Constant",
      Self::Debug { .. } => "Debug",
      Self::Tuple => "Tuple",
      Self::Field(_) => "Field",
      Self::Apply => "Apply",
      Self::Invoke { .. } => "Invoke",
      Self::Intrinsic(_) => "Intrinsic",
      Self::TypeCast(_) => "TypeCast",
      Self::Lambda(_) => "Lambda",
      Self::UnaryOp(..) => "UnaryOp",
      Self::BinaryOp(..) => "BinaryOp",
      Self::Terminator(_) => "Terminator",
    }
  }
}

/// An SSA expression: an operation, its operands, the type of the local it
/// defines, a source location and an attribute bag.
#[derive(Clone, Debug)]
pub struct Expression {
  /// The operation.
  pub kind: ExprKind,
  /// The operands, interpretation per [`ExprKind`] variant.
  pub operands: SmallVec<[Value; 2]>,
  /// The type of the defined local.
  pub ty: Ty,
  /// The owning block.
  pub block: BlockId,
  /// The source range of the originating syntax.
  pub loc: SourceRange,
  /// Per-expression attributes.
  pub flags: ExprFlags,
}

impl Expression {
  /// The terminator payload, if this is a terminator.
  #[must_use] pub fn as_terminator(&self) -> Option<&Terminator> {
    if let ExprKind::Terminator(term) = &self.kind { Some(term) } else { None }
  }

  /// Whether the expression is pure: it can be deleted if its result is
  /// unused. Calls are conservatively impure unless the callee is marked
  /// `NO_SIDE_EFFECT` (checked by the caller).
  #[must_use] pub fn is_pure_kind(&self) -> bool {
    matches!(
      self.kind,
      ExprKind::Constant
        | ExprKind::Tuple
        | ExprKind::Field(_)
        | ExprKind::Load
        | ExprKind::GetElementRef(_)
        | ExprKind::TypeCast(_)
        | ExprKind::UnaryOp(..)
        | ExprKind::BinaryOp(..)
        | ExprKind::Lambda(_)
    )
  }
}

/// A basic block: ordered expressions ending in exactly one terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
  /// The expressions, in execution order. Once the function is complete the
  /// last entry is the unique terminator.
  pub exprs: Vec<ExprId>,
  /// Exception types this block is a landing pad for.
  pub exception_types: Vec<Ty>,
  /// The block group this block belongs to.
  pub group: GroupId,
}

/// An ordered collection of blocks with a distinguished entry.
#[derive(Clone, Debug, Default)]
pub struct BlockGroup {
  /// The entry block.
  pub entry: BlockId,
  /// All blocks of the group, entry first.
  pub blocks: Vec<BlockId>,
}

/// A function parameter.
#[derive(Clone, Debug)]
pub struct Param {
  /// The declared type.
  pub ty: Ty,
  /// The source identifier.
  pub name: Symbol,
  /// Where the parameter was declared.
  pub loc: SourceRange,
}

/// What kind of function this is, beyond its attributes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FuncKind {
  /// An ordinary function.
  #[default]
  Default,
  /// The init function of one or more global variables.
  GlobalVarInit,
  /// A finalizer, kept alive for the runtime.
  Finalizer,
}

/// A CHIR function: signature, attributes, and a body of blocks.
#[derive(Clone, Debug)]
pub struct Func {
  /// The source identifier.
  pub name: Symbol,
  /// The raw mangled name; whitelist matching uses this verbatim.
  pub mangled: Symbol,
  /// The defining package.
  pub package: Symbol,
  /// The parameters.
  pub params: IdxVec<ParamId, Param>,
  /// The return type.
  pub ret_ty: Ty,
  /// Declaration attributes.
  pub attrs: Attribute,
  /// The declared generic parameters, if any.
  pub generic_params: Vec<Symbol>,
  /// The function classification.
  pub func_kind: FuncKind,
  /// The expression arena.
  pub exprs: IdxVec<ExprId, Expression>,
  /// The block arena.
  pub blocks: IdxVec<BlockId, Block>,
  /// The block group arena.
  pub groups: IdxVec<GroupId, BlockGroup>,
  /// The root block group (the function body).
  pub body: GroupId,
  /// The custom type def this function is a member of, if any.
  pub parent_def: Option<DefId>,
  /// Link-time visibility for compiler-added functions.
  pub link_info: LinkTypeInfo,
  /// Where the function was declared.
  pub loc: SourceRange,
}

impl Func {
  /// The entry block of the function body.
  #[must_use] pub fn entry_block(&self) -> BlockId { self.groups[self.body].entry }

  /// The terminator expression id of `block`, if the block is terminated.
  #[must_use] pub fn terminator_of(&self, block: BlockId) -> Option<ExprId> {
    let &last = self.blocks[block].exprs.last()?;
    self.exprs[last].as_terminator().map(|_| last)
  }

  /// The successors of `block` (empty if unterminated).
  #[must_use] pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
    match self.terminator_of(block) {
      Some(term) => self.exprs[term].as_terminator().expect("terminator").successors(),
      None => SmallVec::new(),
    }
  }

  /// Compute the predecessor lists of every block.
  #[must_use] pub fn predecessors(&self) -> IdxVec<BlockId, Vec<BlockId>> {
    let mut preds: IdxVec<BlockId, Vec<BlockId>> = IdxVec::from_fn(self.blocks.len(), Vec::new);
    for bb in self.blocks.keys() {
      for succ in self.successors(bb) {
        preds[succ].push(bb);
      }
    }
    preds
  }

  /// Compute the users of every value in this function: which expressions
  /// mention it as an operand.
  #[must_use] pub fn users(&self) -> hashbrown::HashMap<Value, Vec<ExprId>> {
    let mut users: hashbrown::HashMap<Value, Vec<ExprId>> = hashbrown::HashMap::new();
    for (id, expr) in self.exprs.enum_iter() {
      for &op in &expr.operands {
        users.entry(op).or_default().push(id);
      }
    }
    users
  }

  /// Replace every operand use of `old` with `new`, in every expression.
  pub fn replace_value(&mut self, old: Value, new: Value) {
    for expr in self.exprs.iter_mut() {
      for op in &mut expr.operands {
        if *op == old { *op = new }
      }
    }
  }

  /// Append a fresh expression to `block`, returning its id.
  pub fn append_expr(&mut self, block: BlockId, mut expr: Expression) -> ExprId {
    expr.block = block;
    let id = self.exprs.push(expr);
    self.blocks[block].exprs.push(id);
    id
  }

  /// Replace the terminator of `block` with `term`, keeping the old
  /// expression id. Panics if the block is unterminated.
  pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
    let id = self.terminator_of(block).expect("block is unterminated");
    let expr = &mut self.exprs[id];
    expr.kind = ExprKind::Terminator(term);
    expr.operands.clear();
  }

  /// The number of blocks; the scheduler uses this as a task weight.
  #[must_use] pub fn block_count(&self) -> usize { self.blocks.len() }
}

/// A global variable.
#[derive(Clone, Debug)]
pub struct GlobalVar {
  /// The source identifier.
  pub name: Symbol,
  /// The raw mangled name.
  pub mangled: Symbol,
  /// The defining package.
  pub package: Symbol,
  /// The type: a reference to the stored type.
  pub ty: Ty,
  /// Declaration attributes; `READONLY` marks `let` globals.
  pub attrs: Attribute,
  /// The function that initialises this global, if it is not
  /// literal-initialised. Identity is stored here: multiple globals may
  /// share one init function (`let (x, y) = (1, 2)`).
  pub init_func: Option<FuncId>,
  /// The literal initialiser, for trivially-initialised globals.
  pub init_literal: Option<Literal>,
  /// Where the global was declared.
  pub loc: SourceRange,
}

/// An imported declaration: a variable or function from another package.
#[derive(Clone, Debug)]
pub struct ImportedValue {
  /// The source identifier.
  pub name: Symbol,
  /// The raw mangled name; whitelist matching uses this verbatim.
  pub mangled: Symbol,
  /// The package the declaration comes from.
  pub package: Symbol,
  /// The declared type (for functions, a `Func` type).
  pub ty: Ty,
  /// Declaration attributes.
  pub attrs: Attribute,
  /// Whether this is a function (as opposed to a variable).
  pub is_func: bool,
  /// The function classification, for imported functions.
  pub func_kind: FuncKind,
  /// The custom type def this is a member of, if any.
  pub parent_def: Option<DefId>,
  /// Where the import was recorded.
  pub loc: SourceRange,
}

/// A reference to a function implementation: local or imported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FuncRef {
  /// A function defined in this package.
  Local(FuncId),
  /// An imported function.
  Imported(ImportId),
}

/// One slot of a vtable: the abstract method it fills and the concrete
/// implementation supplying it.
#[derive(Clone, Debug)]
pub struct VirtualFuncInfo {
  /// The method name.
  pub name: Symbol,
  /// The method signature, parameter types then return type.
  pub sig: Box<[Ty]>,
  /// The implementation, absent for abstract slots.
  pub implementation: Option<FuncRef>,
}

/// An instance member variable of a custom type.
#[derive(Clone, Debug)]
pub struct MemberVar {
  /// The field name.
  pub name: Symbol,
  /// The field type.
  pub ty: Ty,
  /// Where the field was declared.
  pub loc: SourceRange,
}

/// What sort of custom type a [`CustomTypeDef`] is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefKind {
  /// A class or, if the flag is set, an interface.
  Class {
    /// Whether this is an interface.
    is_interface: bool,
  },
  /// A struct.
  Struct,
  /// An enum.
  Enum,
  /// An extend of the given type.
  Extend {
    /// The extended type.
    target: Ty,
  },
}

/// A custom type definition: class, struct, enum or extend.
#[derive(Clone, Debug)]
pub struct CustomTypeDef {
  /// The sort of definition.
  pub kind: DefKind,
  /// The source identifier.
  pub name: Symbol,
  /// The defining package.
  pub package: Symbol,
  /// Declared generic parameter names.
  pub generic_params: Vec<Symbol>,
  /// Implemented interface types.
  pub implemented: Vec<Ty>,
  /// The superclass type, for classes.
  pub super_class: Option<Ty>,
  /// Static member variables.
  pub static_vars: Vec<GlobalVarId>,
  /// Instance member layout, in field order.
  pub fields: Vec<MemberVar>,
  /// Methods, local or imported.
  pub methods: Vec<FuncRef>,
  /// The vtable: for each implemented class/interface type, the ordered
  /// virtual slots. Order-preserving across subtypes.
  pub vtable: Vec<(Ty, Vec<VirtualFuncInfo>)>,
  /// Declaration attributes.
  pub attrs: Attribute,
  /// Where the definition was declared.
  pub loc: SourceRange,
}

/// A named compilation unit: the root of the IR.
#[derive(Clone, Debug)]
pub struct Package {
  /// The package name.
  pub name: Symbol,
  /// The global functions.
  pub funcs: IdxVec<FuncId, Func>,
  /// The global variables.
  pub globals: IdxVec<GlobalVarId, GlobalVar>,
  /// The imported declarations.
  pub imports: IdxVec<ImportId, ImportedValue>,
  /// The custom type definitions.
  pub defs: IdxVec<DefId, CustomTypeDef>,
  /// The package-init function.
  pub init_func: Option<FuncId>,
}

impl Package {
  /// Create an empty package with the given name.
  #[must_use] pub fn new(name: Symbol) -> Self {
    Self {
      name,
      funcs: IdxVec::new(),
      globals: IdxVec::new(),
      imports: IdxVec::new(),
      defs: IdxVec::new(),
      init_func: None,
    }
  }

  /// The type of the value a `Value` denotes, given the current function.
  #[must_use] pub fn value_ty(&self, func: &Func, v: Value, types: &crate::types::Types) -> Ty {
    match v {
      Value::Local(id) => func.exprs[id].ty,
      Value::Param(id) => func.params[id].ty,
      Value::Global(id) => self.globals[id].ty,
      Value::Imported(id) => self.imports[id].ty,
      Value::Func(id) => {
        let f = &self.funcs[id];
        types.intern(crate::types::TypeKind::Func {
          params: f.params.iter().map(|p| p.ty).collect(),
          ret: f.ret_ty,
        })
      }
      Value::Literal(lit) => match lit {
        Literal::Unit => TypeStore::UNIT,
        Literal::Bool(_) => TypeStore::BOOL,
        Literal::Rune(_) => TypeStore::RUNE,
        Literal::Str(_) => TypeStore::STRING,
        Literal::Int(ity, _) => types.mk_int(ity),
        Literal::Float(fw, _) => types.intern(crate::types::TypeKind::Float(fw)),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminator_successors() {
    let term = Terminator::MultiBranch {
      default_bb: BlockId(0),
      cases: Box::new([(1, BlockId(1)), (2, BlockId(2))]),
    };
    assert_eq!(term.successors().as_slice(), &[BlockId(0), BlockId(1), BlockId(2)]);
    let term = Terminator::IntOpWithException {
      op: BinOp::Add,
      strategy: OverflowStrategy::Throwing,
      ok: BlockId(3),
      err: BlockId(4),
    };
    assert_eq!(term.success_successor(), Some(BlockId(3)));
    assert_eq!(term.error_successor(), Some(BlockId(4)));
  }

  #[test]
  fn literal_display() {
    assert_eq!(Literal::Int(IntTy::INT8, 0xFFu64).to_display_string(), "-1");
    assert_eq!(Literal::Int(IntTy::UINT8, 0xFFu64).to_display_string(), "255");
    assert_eq!(Literal::Bool(true).to_display_string(), "true");
  }
}
