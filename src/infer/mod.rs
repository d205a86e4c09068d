//! Local type-argument synthesis for generic call sites.
//!
//! This subsystem runs during AST type inference, before lowering, and
//! therefore works over its own type arena (the [`TypeManager`]) rather
//! than the CHIR type table: sema types carry type variables, union and
//! intersection types, and the *ideal* numeric placeholders that untyped
//! literals float around as until unification pins them.
//!
//! [`solve`] holds the constraint solver itself, [`promotion`] the
//! subtype-directed instantiation of nominal declarations, and
//! [`join_meet`] the least-upper-bound / greatest-lower-bound machinery the
//! solver uses to collapse bound sets.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{FloatWidth, IntTy};
use crate::{mk_id, IdxVec, Symbol};

pub mod join_meet;
pub mod promotion;
pub mod solve;

mk_id! {
  /// An interned sema type.
  SemaTy,
  /// A type variable.
  TyVarId,
  /// A nominal declaration (class, interface, struct or enum).
  DeclId,
}

/// A substitution of type variables by types.
pub type TypeSubst = BTreeMap<TyVarId, SemaTy>;

/// A one-to-many substitution: several supertypes may bind the same
/// variable differently.
pub type MultiTypeSubst = BTreeMap<TyVarId, BTreeSet<SemaTy>>;

/// The pair of maps call-site inference works with: `u2i` sends each
/// user-written (universal) type variable to the fresh placeholder
/// introduced for this call, and `inst` accumulates what the placeholders
/// (and through `u2i` the universals) were inferred to.
#[derive(Clone, Debug, Default)]
pub struct SubstPack {
  /// Universal type variable → placeholder introduced at the call site.
  pub u2i: BTreeMap<TyVarId, TyVarId>,
  /// Placeholder → inferred types.
  pub inst: MultiTypeSubst,
}

/// The structure of a sema type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemaTyKind {
  /// A type that failed checking; unifies with everything.
  Invalid,
  /// The not-yet-known type; unifies with everything.
  Quest,
  /// `Unit`
  Unit,
  /// `Bool`
  Bool,
  /// `Rune`
  Rune,
  /// `String`
  String,
  /// The bottom type.
  Nothing,
  /// The top type.
  Any,
  /// A C interop type; never a valid inference result.
  CType,
  /// The ideal integer literal type, resolved to `Int64` if it survives.
  IdealInt,
  /// The ideal float literal type, resolved to `Float64` if it survives.
  IdealFloat,
  /// A fixed-width integer type.
  Int(IntTy),
  /// A float type.
  Float(FloatWidth),
  /// A tuple type.
  Tuple(Vec<SemaTy>),
  /// A function type.
  Func {
    /// Parameter types.
    params: Vec<SemaTy>,
    /// Return type.
    ret: SemaTy,
  },
  /// An instantiated nominal declaration.
  Nominal(DeclId, Vec<SemaTy>),
  /// A type variable.
  Var(TyVarId),
  /// A union type (internal to inference; converted before surfacing).
  Union(BTreeSet<SemaTy>),
  /// An intersection type (internal to inference; converted before
  /// surfacing).
  Intersection(BTreeSet<SemaTy>),
}

/// A type variable: its name and whether it is a call-site placeholder (as
/// opposed to a user-written generic parameter).
#[derive(Clone, Debug)]
pub struct TyVarInfo {
  /// The display name.
  pub name: Symbol,
  /// Whether the variable was introduced by call-site inference.
  pub is_placeholder: bool,
}

/// What sort of nominal declaration this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NominalKind {
  /// A class, or an interface when the flag is set.
  Class {
    /// Whether this is an interface.
    is_interface: bool,
  },
  /// A struct.
  Struct,
  /// An enum.
  Enum,
}

/// A nominal declaration: name, generic parameters and declared supertypes.
#[derive(Clone, Debug)]
pub struct NominalDecl {
  /// The declaration name.
  pub name: Symbol,
  /// The declaration sort.
  pub kind: NominalKind,
  /// The universal type variables of the declaration.
  pub type_params: Vec<TyVarId>,
  /// Declared supertypes, possibly mentioning `type_params`.
  pub supers: Vec<SemaTy>,
  /// Whether this is `std.core`'s `Option`, for implicit option lifting.
  pub is_option: bool,
}

/// The sema type arena: interned types, type variables and declarations.
#[derive(Debug, Default)]
pub struct TypeManager {
  kinds: IdxVec<SemaTy, SemaTyKind>,
  dedup: hashbrown::HashMap<SemaTyKind, SemaTy>,
  tyvars: IdxVec<TyVarId, TyVarInfo>,
  decls: IdxVec<DeclId, NominalDecl>,
}

impl TypeManager {
  /// A fresh manager.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Intern a type.
  pub fn intern(&mut self, kind: SemaTyKind) -> SemaTy {
    if let Some(&ty) = self.dedup.get(&kind) { return ty }
    let ty = self.kinds.push(kind.clone());
    self.dedup.insert(kind, ty);
    ty
  }

  /// The structure of `ty`.
  #[must_use] pub fn kind(&self, ty: SemaTy) -> &SemaTyKind { &self.kinds[ty] }

  /// Create a type variable.
  pub fn fresh_ty_var(&mut self, name: Symbol, is_placeholder: bool) -> TyVarId {
    self.tyvars.push(TyVarInfo { name, is_placeholder })
  }

  /// Whether the variable is a call-site placeholder.
  #[must_use] pub fn is_placeholder(&self, tv: TyVarId) -> bool {
    self.tyvars[tv].is_placeholder
  }

  /// The display name of a type variable.
  #[must_use] pub fn ty_var_name(&self, tv: TyVarId) -> Symbol { self.tyvars[tv].name }

  /// Register a nominal declaration.
  pub fn add_decl(&mut self, decl: NominalDecl) -> DeclId { self.decls.push(decl) }

  /// The declaration `id` refers to.
  #[must_use] pub fn decl(&self, id: DeclId) -> &NominalDecl { &self.decls[id] }

  /// Intern the `Var` type for `tv`.
  pub fn mk_var(&mut self, tv: TyVarId) -> SemaTy { self.intern(SemaTyKind::Var(tv)) }

  /// Intern `Int64`, the resolution of `IdealInt`.
  pub fn int64(&mut self) -> SemaTy { self.intern(SemaTyKind::Int(IntTy::INT64)) }

  /// Intern `Float64`, the resolution of `IdealFloat`.
  pub fn float64(&mut self) -> SemaTy { self.intern(SemaTyKind::Float(FloatWidth::F64)) }

  /// Intern `Any`.
  pub fn any(&mut self) -> SemaTy { self.intern(SemaTyKind::Any) }

  /// Intern `Nothing`.
  pub fn nothing(&mut self) -> SemaTy { self.intern(SemaTyKind::Nothing) }

  /// Intern `Invalid`.
  pub fn invalid(&mut self) -> SemaTy { self.intern(SemaTyKind::Invalid) }

  /// Whether `ty` mentions the variable `tv` anywhere.
  #[must_use] pub fn contains_var(&self, ty: SemaTy, tv: TyVarId) -> bool {
    match self.kind(ty) {
      SemaTyKind::Var(v) => *v == tv,
      SemaTyKind::Tuple(elems) => elems.iter().any(|&e| self.contains_var(e, tv)),
      SemaTyKind::Func { params, ret } =>
        params.iter().any(|&p| self.contains_var(p, tv)) || self.contains_var(*ret, tv),
      SemaTyKind::Nominal(_, args) => args.iter().any(|&a| self.contains_var(a, tv)),
      SemaTyKind::Union(tys) | SemaTyKind::Intersection(tys) =>
        tys.iter().any(|&t| self.contains_var(t, tv)),
      _ => false,
    }
  }

  /// Every type variable mentioned by `ty`.
  pub fn vars_in(&self, ty: SemaTy, out: &mut BTreeSet<TyVarId>) {
    match self.kind(ty) {
      SemaTyKind::Var(v) => { out.insert(*v); }
      SemaTyKind::Tuple(elems) => {
        for &e in elems.clone().iter() { self.vars_in(e, out) }
      }
      SemaTyKind::Func { params, ret } => {
        let (params, ret) = (params.clone(), *ret);
        for &p in &params { self.vars_in(p, out) }
        self.vars_in(ret, out);
      }
      SemaTyKind::Nominal(_, args) => {
        for &a in args.clone().iter() { self.vars_in(a, out) }
      }
      SemaTyKind::Union(tys) | SemaTyKind::Intersection(tys) => {
        for &t in tys.clone().iter() { self.vars_in(t, out) }
      }
      _ => {}
    }
  }

  /// Whether `ty` mentions any type variable.
  #[must_use] pub fn has_generic(&self, ty: SemaTy) -> bool {
    let mut vars = BTreeSet::new();
    self.vars_in(ty, &mut vars);
    !vars.is_empty()
  }

  /// Whether `ty` mentions an ideal numeric placeholder.
  #[must_use] pub fn has_ideal(&self, ty: SemaTy) -> bool {
    match self.kind(ty) {
      SemaTyKind::IdealInt | SemaTyKind::IdealFloat => true,
      SemaTyKind::Tuple(elems) => elems.iter().any(|&e| self.has_ideal(e)),
      SemaTyKind::Func { params, ret } =>
        params.iter().any(|&p| self.has_ideal(p)) || self.has_ideal(*ret),
      SemaTyKind::Nominal(_, args) => args.iter().any(|&a| self.has_ideal(a)),
      SemaTyKind::Union(tys) | SemaTyKind::Intersection(tys) =>
        tys.iter().any(|&t| self.has_ideal(t)),
      _ => false,
    }
  }

  /// Whether `ty` is (or contains) `Invalid`.
  #[must_use] pub fn has_invalid(&self, ty: SemaTy) -> bool {
    match self.kind(ty) {
      SemaTyKind::Invalid => true,
      SemaTyKind::Tuple(elems) => elems.iter().any(|&e| self.has_invalid(e)),
      SemaTyKind::Func { params, ret } =>
        params.iter().any(|&p| self.has_invalid(p)) || self.has_invalid(*ret),
      SemaTyKind::Nominal(_, args) => args.iter().any(|&a| self.has_invalid(a)),
      SemaTyKind::Union(tys) | SemaTyKind::Intersection(tys) =>
        tys.iter().any(|&t| self.has_invalid(t)),
      _ => false,
    }
  }

  /// Whether `ty` is numeric (fixed or ideal).
  #[must_use] pub fn is_numeric(&self, ty: SemaTy) -> bool {
    matches!(
      self.kind(ty),
      SemaTyKind::Int(_) | SemaTyKind::Float(_) | SemaTyKind::IdealInt | SemaTyKind::IdealFloat
    )
  }

  /// Apply a substitution to `ty`.
  pub fn substitute(&mut self, ty: SemaTy, subst: &TypeSubst) -> SemaTy {
    match self.kind(ty).clone() {
      SemaTyKind::Var(v) => subst.get(&v).copied().unwrap_or(ty),
      SemaTyKind::Tuple(elems) => {
        let elems = elems.into_iter().map(|e| self.substitute(e, subst)).collect();
        self.intern(SemaTyKind::Tuple(elems))
      }
      SemaTyKind::Func { params, ret } => {
        let params = params.into_iter().map(|p| self.substitute(p, subst)).collect();
        let ret = self.substitute(ret, subst);
        self.intern(SemaTyKind::Func { params, ret })
      }
      SemaTyKind::Nominal(decl, args) => {
        let args = args.into_iter().map(|a| self.substitute(a, subst)).collect();
        self.intern(SemaTyKind::Nominal(decl, args))
      }
      SemaTyKind::Union(tys) => {
        let tys = tys.into_iter().map(|t| self.substitute(t, subst)).collect();
        self.intern(SemaTyKind::Union(tys))
      }
      SemaTyKind::Intersection(tys) => {
        let tys = tys.into_iter().map(|t| self.substitute(t, subst)).collect();
        self.intern(SemaTyKind::Intersection(tys))
      }
      _ => ty,
    }
  }

  /// How deeply `ty` is nested in `Option`s.
  #[must_use] pub fn option_nested_level(&self, ty: SemaTy) -> usize {
    match self.kind(ty) {
      SemaTyKind::Nominal(decl, args) if self.decls[*decl].is_option && args.len() == 1 =>
        1 + self.option_nested_level(args[0]),
      _ => 0,
    }
  }

  /// The `Option` payload of `ty`, when `ty` is an option type.
  #[must_use] pub fn option_payload(&self, ty: SemaTy) -> Option<SemaTy> {
    match self.kind(ty) {
      SemaTyKind::Nominal(decl, args) if self.decls[*decl].is_option && args.len() == 1 =>
        Some(args[0]),
      _ => None,
    }
  }

  /// Replace ideal numeric placeholders by their concretisations,
  /// `Int64`/`Float64`.
  pub fn replace_ideal(&mut self, ty: SemaTy) -> SemaTy {
    match self.kind(ty).clone() {
      SemaTyKind::IdealInt => self.int64(),
      SemaTyKind::IdealFloat => self.float64(),
      SemaTyKind::Tuple(elems) => {
        let elems = elems.into_iter().map(|e| self.replace_ideal(e)).collect();
        self.intern(SemaTyKind::Tuple(elems))
      }
      SemaTyKind::Func { params, ret } => {
        let params = params.into_iter().map(|p| self.replace_ideal(p)).collect();
        let ret = self.replace_ideal(ret);
        self.intern(SemaTyKind::Func { params, ret })
      }
      SemaTyKind::Nominal(decl, args) => {
        let args = args.into_iter().map(|a| self.replace_ideal(a)).collect();
        self.intern(SemaTyKind::Nominal(decl, args))
      }
      _ => ty,
    }
  }

  /// The declared supertypes of the nominal type `ty`, instantiated with
  /// its type arguments.
  #[must_use] pub fn instantiated_supers(&mut self, ty: SemaTy) -> Vec<SemaTy> {
    let SemaTyKind::Nominal(decl, args) = self.kind(ty).clone() else { return vec![] };
    let decl = self.decls[decl].clone();
    let subst: TypeSubst = decl.type_params.iter().copied().zip(args).collect();
    decl.supers.iter().map(|&sup| self.substitute(sup, &subst)).collect()
  }

  /// Subtype check `sub <: sup`. Conservative: unknown relations are `false`.
  pub fn is_subtype(&mut self, sub: SemaTy, sup: SemaTy) -> bool {
    if sub == sup { return true }
    match (self.kind(sub).clone(), self.kind(sup).clone()) {
      (SemaTyKind::Invalid | SemaTyKind::Quest, _) | (_, SemaTyKind::Invalid | SemaTyKind::Quest) =>
        true,
      (SemaTyKind::Nothing, _) => true,
      (_, SemaTyKind::Any) => true,
      // the ideal literal types fit any type of their family
      (SemaTyKind::IdealInt, SemaTyKind::Int(_) | SemaTyKind::IdealInt) => true,
      (SemaTyKind::IdealFloat, SemaTyKind::Float(_) | SemaTyKind::IdealFloat) => true,
      // A∩B <: C iff A <: C or B <: C; A <: B∩C iff both
      (SemaTyKind::Intersection(tys), _) => tys.iter().any(|&t| self.is_subtype(t, sup)),
      (_, SemaTyKind::Intersection(tys)) => tys.iter().all(|&t| self.is_subtype(sub, t)),
      // A∪B <: C iff both; A <: B∪C iff either
      (SemaTyKind::Union(tys), _) => tys.iter().all(|&t| self.is_subtype(t, sup)),
      (_, SemaTyKind::Union(tys)) => tys.iter().any(|&t| self.is_subtype(sub, t)),
      (SemaTyKind::Func { params: ps, ret: r1 }, SemaTyKind::Func { params: qs, ret: r2 }) =>
        ps.len() == qs.len()
          && ps.iter().zip(&qs).all(|(&p, &q)| self.is_subtype(q, p))
          && self.is_subtype(r1, r2),
      (SemaTyKind::Tuple(xs), SemaTyKind::Tuple(ys)) =>
        xs.len() == ys.len() && xs.iter().zip(&ys).all(|(&x, &y)| self.is_subtype(x, y)),
      (SemaTyKind::Nominal(..), _) => {
        // walk the supertype closure
        let mut worklist = self.instantiated_supers(sub);
        let mut seen = BTreeSet::new();
        while let Some(s) = worklist.pop() {
          if !seen.insert(s) { continue }
          if s == sup { return true }
          worklist.extend(self.instantiated_supers(s));
        }
        false
      }
      _ => false,
    }
  }

  /// Render `ty` for diagnostics; ideal types print as their resolution.
  #[must_use] pub fn to_string(&self, ty: SemaTy) -> String {
    match self.kind(ty) {
      SemaTyKind::Invalid => "Invalid".into(),
      SemaTyKind::Quest => "?".into(),
      SemaTyKind::Unit => "Unit".into(),
      SemaTyKind::Bool => "Bool".into(),
      SemaTyKind::Rune => "Rune".into(),
      SemaTyKind::String => "String".into(),
      SemaTyKind::Nothing => "Nothing".into(),
      SemaTyKind::Any => "Any".into(),
      SemaTyKind::CType => "CType".into(),
      SemaTyKind::IdealInt => "Int64".into(),
      SemaTyKind::IdealFloat => "Float64".into(),
      SemaTyKind::Int(ity) => ity.to_string(),
      SemaTyKind::Float(fw) => fw.to_string(),
      SemaTyKind::Tuple(elems) => {
        let inner: Vec<_> = elems.iter().map(|&t| self.to_string(t)).collect();
        format!("({})", inner.join(", "))
      }
      SemaTyKind::Func { params, ret } => {
        let inner: Vec<_> = params.iter().map(|&t| self.to_string(t)).collect();
        format!("({}) -> {}", inner.join(", "), self.to_string(*ret))
      }
      SemaTyKind::Nominal(decl, args) => {
        let mut s = self.decls[*decl].name.as_str().to_owned();
        if !args.is_empty() {
          let inner: Vec<_> = args.iter().map(|&t| self.to_string(t)).collect();
          s.push_str(&format!("<{}>", inner.join(", ")));
        }
        s
      }
      SemaTyKind::Var(tv) => self.tyvars[*tv].name.as_str().to_owned(),
      SemaTyKind::Union(tys) => {
        let inner: Vec<_> = tys.iter().map(|&t| self.to_string(t)).collect();
        inner.join(" | ")
      }
      SemaTyKind::Intersection(tys) => {
        let inner: Vec<_> = tys.iter().map(|&t| self.to_string(t)).collect();
        inner.join(" & ")
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;

  #[test]
  fn subtype_basics() {
    let mut tm = TypeManager::new();
    let nothing = tm.nothing();
    let any = tm.any();
    let bool_ty = tm.intern(SemaTyKind::Bool);
    let int64 = tm.int64();
    let ideal = tm.intern(SemaTyKind::IdealInt);
    assert!(tm.is_subtype(nothing, bool_ty));
    assert!(tm.is_subtype(bool_ty, any));
    assert!(tm.is_subtype(ideal, int64));
    assert!(!tm.is_subtype(bool_ty, int64));
  }

  #[test]
  fn nominal_supertype_walk() {
    let mut tm = TypeManager::new();
    let printable = tm.add_decl(NominalDecl {
      name: intern("Printable"),
      kind: NominalKind::Class { is_interface: true },
      type_params: vec![],
      supers: vec![],
      is_option: false,
    });
    let printable_ty = tm.intern(SemaTyKind::Nominal(printable, vec![]));
    let point = tm.add_decl(NominalDecl {
      name: intern("Point"),
      kind: NominalKind::Struct,
      type_params: vec![],
      supers: vec![printable_ty],
      is_option: false,
    });
    let point_ty = tm.intern(SemaTyKind::Nominal(point, vec![]));
    assert!(tm.is_subtype(point_ty, printable_ty));
    assert!(!tm.is_subtype(printable_ty, point_ty));
  }

  #[test]
  fn substitute_into_nominal() {
    let mut tm = TypeManager::new();
    let t = tm.fresh_ty_var(intern("T"), false);
    let t_ty = tm.mk_var(t);
    let list = tm.add_decl(NominalDecl {
      name: intern("List"),
      kind: NominalKind::Class { is_interface: false },
      type_params: vec![t],
      supers: vec![],
      is_option: false,
    });
    let list_t = tm.intern(SemaTyKind::Nominal(list, vec![t_ty]));
    let int64 = tm.int64();
    let subst: TypeSubst = [(t, int64)].into_iter().collect();
    let list_int = tm.substitute(list_t, &subst);
    assert_eq!(tm.kind(list_int), &SemaTyKind::Nominal(list, vec![int64]));
  }
}
