//! The smallest common supertype (join, least upper bound) and greatest
//! common subtype (meet, greatest lower bound) of a set of types.
//!
//! Union and intersection types appear only as internal intermediate
//! results; `*_as_visible_ty` collapses them to a user-visible type at the
//! very end (`Any` when a union has no better common supertype, `Nothing`
//! when an intersection has no inhabitant below the operands).

use std::collections::BTreeSet;

use itertools::Itertools;

use crate::infer::{SemaTy, SemaTyKind, TyVarId, TypeManager};

/// The join/meet calculator over a set of types, with type variables the
/// caller wants treated as opaque.
pub struct JoinAndMeet<'tm> {
  tm: &'tm mut TypeManager,
  ignored: BTreeSet<TyVarId>,
}

impl<'tm> JoinAndMeet<'tm> {
  /// Create a calculator; `ignored` variables never unify with anything.
  #[must_use] pub fn new(tm: &'tm mut TypeManager, ignored: BTreeSet<TyVarId>) -> Self {
    Self { tm, ignored }
  }

  /// The least upper bound of `tys`, converted to a user-visible type.
  pub fn join_as_visible_ty(&mut self, tys: &BTreeSet<SemaTy>) -> SemaTy {
    let joined = self.batch_join(tys);
    self.to_user_visible(joined, /* is_join */ true)
  }

  /// The greatest lower bound of `tys`, converted to a user-visible type.
  pub fn meet_as_visible_ty(&mut self, tys: &BTreeSet<SemaTy>) -> SemaTy {
    let met = self.batch_meet(tys);
    self.to_user_visible(met, /* is_join */ false)
  }

  fn batch_join(&mut self, tys: &BTreeSet<SemaTy>) -> SemaTy {
    let mut iter = tys.iter().copied();
    let Some(first) = iter.next() else { return self.tm.nothing() };
    iter.fold(first, |acc, ty| self.join2(acc, ty))
  }

  fn batch_meet(&mut self, tys: &BTreeSet<SemaTy>) -> SemaTy {
    let mut iter = tys.iter().copied();
    let Some(first) = iter.next() else { return self.tm.any() };
    iter.fold(first, |acc, ty| self.meet2(acc, ty))
  }

  fn opaque(&self, ty: SemaTy) -> bool {
    matches!(self.tm.kind(ty), SemaTyKind::Var(v) if self.ignored.contains(v))
  }

  fn join2(&mut self, a: SemaTy, b: SemaTy) -> SemaTy {
    if a == b { return a }
    if self.opaque(a) || self.opaque(b) {
      return self.tm.intern(SemaTyKind::Union([a, b].into_iter().collect()))
    }
    // the ideal literal types join with their family towards the fixed type
    match (self.tm.kind(a).clone(), self.tm.kind(b).clone()) {
      (SemaTyKind::IdealInt, SemaTyKind::Int(_)) => return b,
      (SemaTyKind::Int(_), SemaTyKind::IdealInt) => return a,
      (SemaTyKind::IdealFloat, SemaTyKind::Float(_)) => return b,
      (SemaTyKind::Float(_), SemaTyKind::IdealFloat) => return a,
      _ => {}
    }
    if self.tm.is_subtype(a, b) { return b }
    if self.tm.is_subtype(b, a) { return a }
    match (self.tm.kind(a).clone(), self.tm.kind(b).clone()) {
      // structurally: parameters meet (contravariant), returns join
      (
        SemaTyKind::Func { params: ps, ret: r1 },
        SemaTyKind::Func { params: qs, ret: r2 },
      ) if ps.len() == qs.len() => {
        let params: Vec<SemaTy> =
          ps.iter().zip(&qs).map(|(&p, &q)| self.meet2(p, q)).collect();
        let ret = self.join2(r1, r2);
        self.tm.intern(SemaTyKind::Func { params, ret })
      }
      (SemaTyKind::Tuple(xs), SemaTyKind::Tuple(ys)) if xs.len() == ys.len() => {
        let elems: Vec<SemaTy> =
          xs.iter().zip(&ys).map(|(&x, &y)| self.join2(x, y)).collect();
        self.tm.intern(SemaTyKind::Tuple(elems))
      }
      (SemaTyKind::Nominal(..), SemaTyKind::Nominal(..)) => {
        // enumerate common supertypes and keep the minimal ones
        if let Some(best) = self.least_common_super(a, b) {
          best
        } else {
          self.tm.intern(SemaTyKind::Union([a, b].into_iter().collect()))
        }
      }
      _ => self.tm.intern(SemaTyKind::Union([a, b].into_iter().collect())),
    }
  }

  fn meet2(&mut self, a: SemaTy, b: SemaTy) -> SemaTy {
    if a == b { return a }
    if self.opaque(a) || self.opaque(b) {
      return self.tm.intern(SemaTyKind::Intersection([a, b].into_iter().collect()))
    }
    match (self.tm.kind(a).clone(), self.tm.kind(b).clone()) {
      (SemaTyKind::IdealInt, SemaTyKind::Int(_)) => return b,
      (SemaTyKind::Int(_), SemaTyKind::IdealInt) => return a,
      (SemaTyKind::IdealFloat, SemaTyKind::Float(_)) => return b,
      (SemaTyKind::Float(_), SemaTyKind::IdealFloat) => return a,
      _ => {}
    }
    if self.tm.is_subtype(a, b) { return a }
    if self.tm.is_subtype(b, a) { return b }
    match (self.tm.kind(a).clone(), self.tm.kind(b).clone()) {
      (
        SemaTyKind::Func { params: ps, ret: r1 },
        SemaTyKind::Func { params: qs, ret: r2 },
      ) if ps.len() == qs.len() => {
        let params: Vec<SemaTy> =
          ps.iter().zip(&qs).map(|(&p, &q)| self.join2(p, q)).collect();
        let ret = self.meet2(r1, r2);
        self.tm.intern(SemaTyKind::Func { params, ret })
      }
      (SemaTyKind::Tuple(xs), SemaTyKind::Tuple(ys)) if xs.len() == ys.len() => {
        let elems: Vec<SemaTy> =
          xs.iter().zip(&ys).map(|(&x, &y)| self.meet2(x, y)).collect();
        self.tm.intern(SemaTyKind::Tuple(elems))
      }
      _ => self.tm.intern(SemaTyKind::Intersection([a, b].into_iter().collect())),
    }
  }

  /// The minimal common nominal supertypes of `a` and `b`, if exactly one
  /// minimal candidate exists.
  fn least_common_super(&mut self, a: SemaTy, b: SemaTy) -> Option<SemaTy> {
    let supers_of = |tm: &mut TypeManager, ty: SemaTy| {
      let mut out = BTreeSet::new();
      let mut worklist = vec![ty];
      while let Some(t) = worklist.pop() {
        if !out.insert(t) { continue }
        worklist.extend(tm.instantiated_supers(t));
      }
      out
    };
    let sa = supers_of(self.tm, a);
    let sb = supers_of(self.tm, b);
    let common: Vec<SemaTy> = sa.intersection(&sb).copied().collect();
    // keep the minimal elements under subtyping, with subtype verification
    let minimal: Vec<SemaTy> = common
      .iter()
      .copied()
      .filter(|&c| {
        self.tm.is_subtype(a, c)
          && self.tm.is_subtype(b, c)
          && common.iter().all(|&other| other == c || !self.tm.is_subtype(other, c))
      })
      .collect();
    minimal.into_iter().exactly_one().ok()
  }

  /// Eliminate internal union/intersection surface syntax.
  fn to_user_visible(&mut self, ty: SemaTy, is_join: bool) -> SemaTy {
    match self.tm.kind(ty).clone() {
      SemaTyKind::Union(tys) => {
        // a union that reaches the surface has no better common supertype
        for &t in &tys {
          if tys.iter().all(|&other| self.tm.is_subtype(other, t)) {
            return t
          }
        }
        let _ = is_join;
        self.tm.any()
      }
      SemaTyKind::Intersection(tys) => {
        for &t in &tys {
          if tys.iter().all(|&other| self.tm.is_subtype(t, other)) {
            return t
          }
        }
        self.tm.nothing()
      }
      _ => ty,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::infer::{NominalDecl, NominalKind};
  use crate::intern;

  fn iface(tm: &mut TypeManager, name: &str, supers: Vec<SemaTy>) -> SemaTy {
    let decl = tm.add_decl(NominalDecl {
      name: intern(name),
      kind: NominalKind::Class { is_interface: true },
      type_params: vec![],
      supers,
      is_option: false,
    });
    tm.intern(SemaTyKind::Nominal(decl, vec![]))
  }

  #[test]
  fn join_of_subtypes_is_the_super() {
    let mut tm = TypeManager::new();
    let animal = iface(&mut tm, "Animal", vec![]);
    let cat = iface(&mut tm, "Cat", vec![animal]);
    let dog = iface(&mut tm, "Dog", vec![animal]);
    let mut jm = JoinAndMeet::new(&mut tm, BTreeSet::new());
    let joined = jm.join_as_visible_ty(&[cat, dog].into_iter().collect());
    assert_eq!(joined, animal);
  }

  #[test]
  fn join_of_unrelated_is_any() {
    let mut tm = TypeManager::new();
    let bool_ty = tm.intern(SemaTyKind::Bool);
    let string_ty = tm.intern(SemaTyKind::String);
    let any = tm.any();
    let mut jm = JoinAndMeet::new(&mut tm, BTreeSet::new());
    let joined = jm.join_as_visible_ty(&[bool_ty, string_ty].into_iter().collect());
    assert_eq!(joined, any);
  }

  #[test]
  fn meet_of_sub_and_super_is_the_sub() {
    let mut tm = TypeManager::new();
    let animal = iface(&mut tm, "Animal", vec![]);
    let cat = iface(&mut tm, "Cat", vec![animal]);
    let mut jm = JoinAndMeet::new(&mut tm, BTreeSet::new());
    let met = jm.meet_as_visible_ty(&[cat, animal].into_iter().collect());
    assert_eq!(met, cat);
  }

  #[test]
  fn ideal_joins_toward_fixed() {
    let mut tm = TypeManager::new();
    let ideal = tm.intern(SemaTyKind::IdealInt);
    let int32 = tm.intern(SemaTyKind::Int(crate::types::IntTy::INT32));
    let mut jm = JoinAndMeet::new(&mut tm, BTreeSet::new());
    let joined = jm.join_as_visible_ty(&[ideal, int32].into_iter().collect());
    assert_eq!(joined, int32);
  }
}
