//! Promotion: given a subtype and a target supertype declaration, the set
//! of instantiations of the target that are supertypes of the subtype.
//!
//! This is the workhorse behind nominal unification: `ArrayList<Int64> <:
//! Collection<X>` is solved by promoting `ArrayList<Int64>` along its
//! declared supertypes until an instantiation of `Collection` falls out,
//! which then pins `X`.

use std::collections::{BTreeMap, BTreeSet};

use crate::infer::{DeclId, MultiTypeSubst, SemaTy, SemaTyKind, TypeManager};

/// The promotion calculator.
pub struct Promotion<'tm> {
  tm: &'tm mut TypeManager,
}

impl<'tm> Promotion<'tm> {
  /// Create a promotion calculator over `tm`.
  #[must_use] pub fn new(tm: &'tm mut TypeManager) -> Self { Self { tm } }

  /// All instantiations of `target`'s declaration that are supertypes of
  /// `from`. Empty when `from` cannot reach the declaration.
  pub fn promote(&mut self, from: SemaTy, target: SemaTy) -> BTreeSet<SemaTy> {
    let Some(target_decl) = self.decl_of(target) else { return BTreeSet::new() };
    match self.tm.kind(from).clone() {
      SemaTyKind::Nominal(..) => self.promote_nominal(from, target_decl),
      // the ideal types promote through their concretisation
      SemaTyKind::IdealInt => {
        let c = self.tm.int64();
        self.promote(c, target)
      }
      SemaTyKind::IdealFloat => {
        let c = self.tm.float64();
        self.promote(c, target)
      }
      // functions and tuples have no nominal supertypes beyond Any
      _ => BTreeSet::new(),
    }
  }

  /// The supertype-direction substitution map: for each type parameter of
  /// `target`'s declaration, every type it is bound to by some promotion of
  /// `from`.
  pub fn get_promote_type_mapping(&mut self, from: SemaTy, target: SemaTy) -> MultiTypeSubst {
    let mut mapping: MultiTypeSubst = BTreeMap::new();
    let Some(target_decl) = self.decl_of(target) else { return mapping };
    let params = self.tm.decl(target_decl).type_params.clone();
    for promoted in self.promote(from, target) {
      if let SemaTyKind::Nominal(_, args) = self.tm.kind(promoted).clone() {
        for (&param, arg) in params.iter().zip(args) {
          mapping.entry(param).or_default().insert(arg);
        }
      }
    }
    mapping
  }

  fn decl_of(&self, ty: SemaTy) -> Option<DeclId> {
    match self.tm.kind(ty) {
      SemaTyKind::Nominal(decl, _) => Some(*decl),
      _ => None,
    }
  }

  fn promote_nominal(&mut self, from: SemaTy, target_decl: DeclId) -> BTreeSet<SemaTy> {
    let mut out = BTreeSet::new();
    let mut seen = BTreeSet::new();
    let mut worklist = vec![from];
    while let Some(ty) = worklist.pop() {
      if !seen.insert(ty) { continue }
      if self.decl_of(ty) == Some(target_decl) {
        out.insert(ty);
        continue
      }
      worklist.extend(self.tm.instantiated_supers(ty));
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::infer::{NominalDecl, NominalKind};
  use crate::intern;

  #[test]
  fn promotes_through_instantiated_super() {
    let mut tm = TypeManager::new();
    let x = tm.fresh_ty_var(intern("X"), false);
    let x_ty = tm.mk_var(x);
    let collection = tm.add_decl(NominalDecl {
      name: intern("Collection"),
      kind: NominalKind::Class { is_interface: true },
      type_params: vec![x],
      supers: vec![],
      is_option: false,
    });
    let t = tm.fresh_ty_var(intern("T"), false);
    let t_ty = tm.mk_var(t);
    let collection_t = tm.intern(SemaTyKind::Nominal(collection, vec![t_ty]));
    let array_list = tm.add_decl(NominalDecl {
      name: intern("ArrayList"),
      kind: NominalKind::Class { is_interface: false },
      type_params: vec![t],
      supers: vec![collection_t],
      is_option: false,
    });

    let int64 = tm.int64();
    let list_int = tm.intern(SemaTyKind::Nominal(array_list, vec![int64]));
    let collection_pattern = tm.intern(SemaTyKind::Nominal(collection, vec![x_ty]));

    let mut promotion = Promotion::new(&mut tm);
    let promoted = promotion.promote(list_int, collection_pattern);
    assert_eq!(promoted.len(), 1);
    let expect = tm.intern(SemaTyKind::Nominal(collection, vec![int64]));
    assert!(promoted.contains(&expect));

    let mut promotion = Promotion::new(&mut tm);
    let mapping = promotion.get_promote_type_mapping(list_int, collection_pattern);
    assert_eq!(mapping[&x], [int64].into_iter().collect());
  }
}
