//! The value-analysis framework: per-SSA-name abstract values, tracked
//! allocations with per-field object state, reference identity, and the
//! process-wide store for `READONLY` globals.
//!
//! States fork and merge at every join point, so all maps are persistent
//! (`im`): cloning a [`State`] is O(1) and joining shares structure.
//!
//! The memory model is built from three maps:
//! * `places` sends a reference-typed SSA value to the *place* it points to;
//! * `objs` gives aggregate places an object identity whose fields are
//!   places themselves;
//! * `vals` holds the abstract value stored at a place.
//!
//! A missing entry reads as `⊤`; joins therefore only ever shrink the maps,
//! which (together with the finite value lattices) bounds the iteration.

use std::sync::Arc;

use crate::mk_id;
use crate::types::ir::{ExprId, ExprKind, Func, GlobalVarId, Literal, Package, Value};
use crate::types::Types;

mk_id! {
  /// An abstract object tracked by a value analysis.
  ObjId,
}

/// A place: either an IR value itself, or a field of a tracked abstract
/// object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateKey {
  /// The abstract slot of an IR value.
  Value(Value),
  /// Field `i` of a tracked object.
  Field(ObjId, u32),
}

/// An abstract value of a value analysis: joinable and comparable.
pub trait AbstractValue: Clone + PartialEq {
  /// Join two values. `None` means the join carries no information (`⊤`)
  /// and the entry should be dropped.
  fn join(&self, other: &Self) -> Option<Self>;
}

/// The per-program-point state of a value analysis.
pub struct State<V> {
  vals: im::HashMap<StateKey, Arc<V>>,
  places: im::HashMap<Value, StateKey>,
  objs: im::HashMap<StateKey, ObjId>,
  next_obj: u32,
}

// im's derived Clone would require V: Clone bounds in odd places; spell it
// out since the maps clone by structure sharing regardless.
impl<V> Clone for State<V> {
  fn clone(&self) -> Self {
    Self {
      vals: self.vals.clone(),
      places: self.places.clone(),
      objs: self.objs.clone(),
      next_obj: self.next_obj,
    }
  }
}

impl<V> Default for State<V> {
  fn default() -> Self {
    Self { vals: im::HashMap::new(), places: im::HashMap::new(), objs: im::HashMap::new(), next_obj: 0 }
  }
}

impl<V: AbstractValue> State<V> {
  /// The empty state; every slot reads as `⊤`.
  #[must_use] pub fn new() -> Self { Self::default() }

  fn fresh_obj(&mut self) -> ObjId {
    let id = ObjId(self.next_obj);
    self.next_obj += 1;
    id
  }

  /// The place a reference value points to, allocating one for
  /// never-seen references.
  pub fn place_of(&mut self, r: Value) -> StateKey {
    if let Some(&key) = self.places.get(&r) { return key }
    let obj = self.fresh_obj();
    let key = StateKey::Field(obj, 0);
    self.places.insert(r, key);
    key
  }

  /// The object identity of the aggregate at `key`, allocating on demand.
  pub fn obj_of(&mut self, key: StateKey) -> ObjId {
    if let Some(&obj) = self.objs.get(&key) { return obj }
    let obj = self.fresh_obj();
    self.objs.insert(key, obj);
    obj
  }

  /// The place of child `idx` of `v`. References are resolved through their
  /// pointee place first, so the children of an object are shared by every
  /// reference to it; Option payloads are child 0 of the option's object.
  pub fn child_of(&mut self, v: Value, is_ref: bool, idx: u32) -> StateKey {
    let base = if is_ref { self.place_of(v) } else { StateKey::Value(v) };
    let obj = self.obj_of(base);
    StateKey::Field(obj, idx)
  }

  /// The abstract value at `key`, if one is known.
  #[must_use] pub fn value_at(&self, key: StateKey) -> Option<&V> {
    self.vals.get(&key).map(Arc::as_ref)
  }

  /// The abstract value of the IR value `v`, if one is known. Literals are
  /// not stored in the state; the analysis resolves them first.
  #[must_use] pub fn value_of(&self, v: Value) -> Option<&V> {
    self.value_at(StateKey::Value(v))
  }

  /// Set the abstract value at `key`.
  pub fn update_at(&mut self, key: StateKey, val: V) {
    self.vals.insert(key, Arc::new(val));
  }

  /// Set the abstract value of the result of expression `dest`.
  pub fn update(&mut self, dest: ExprId, val: V) {
    self.update_at(StateKey::Value(Value::Local(dest)), val);
  }

  /// Forget everything about `dest` (it becomes `⊤`), including reference
  /// and object identity.
  pub fn set_to_top(&mut self, dest: ExprId) {
    let v = Value::Local(dest);
    self.vals.remove(&StateKey::Value(v));
    self.places.remove(&v);
    self.objs.remove(&StateKey::Value(v));
  }

  /// Forget the value of `dest` but, for references, keep it pointing at a
  /// fresh unknown place.
  pub fn set_to_top_or_top_ref(&mut self, dest: ExprId, is_ref: bool) {
    self.set_to_top(dest);
    if is_ref {
      let obj = self.fresh_obj();
      self.places.insert(Value::Local(dest), StateKey::Field(obj, 0));
    }
  }

  /// Copy everything known about the place `src` to the place `dest`:
  /// the abstract value, the pointee binding and the object identity. This
  /// is what gives reference copies (and ref-to-ref typecasts) shared
  /// object identity.
  pub fn propagate_key(&mut self, src: StateKey, dest: StateKey) {
    match self.vals.get(&src).cloned() {
      Some(v) => { self.vals.insert(dest, v); }
      None => { self.vals.remove(&dest); }
    }
    match self.objs.get(&src).copied() {
      Some(o) => { self.objs.insert(dest, o); }
      None => { self.objs.remove(&dest); }
    }
    if let (StateKey::Value(s), StateKey::Value(d)) = (src, dest) {
      match self.places.get(&s).copied() {
        Some(p) => { self.places.insert(d, p); }
        None => { self.places.remove(&d); }
      }
    }
  }

  /// Copy everything known about the value `src` to the value `dest`.
  pub fn propagate(&mut self, src: Value, dest: Value) {
    self.propagate_key(StateKey::Value(src), StateKey::Value(dest));
  }

  /// Join `other` into `self`. Entries absent from either side are dropped
  /// (absent reads as `⊤`); conflicting bindings are dropped; value entries
  /// join pointwise. Returns whether `self` changed.
  pub fn join_with(&mut self, other: &Self) -> bool {
    let mut changed = false;

    let mut vals = self.vals.clone();
    for (key, v) in &self.vals {
      match other.vals.get(key) {
        None => { vals.remove(key); changed = true }
        Some(o) if Arc::ptr_eq(v, o) || **v == **o => {}
        Some(o) => match v.join(o) {
          Some(joined) => { vals.insert(*key, Arc::new(joined)); changed = true }
          None => { vals.remove(key); changed = true }
        },
      }
    }
    self.vals = vals;

    let mut places = self.places.clone();
    for (v, key) in &self.places {
      if other.places.get(v) != Some(key) {
        places.remove(v);
        changed = true;
      }
    }
    self.places = places;

    let mut objs = self.objs.clone();
    for (key, obj) in &self.objs {
      if other.objs.get(key) != Some(obj) {
        objs.remove(key);
        changed = true;
      }
    }
    self.objs = objs;

    self.next_obj = self.next_obj.max(other.next_obj);
    changed
  }

  /// Drop everything not reachable from a global variable: the residue is
  /// what the global-state store keeps between the serial init phase and
  /// the parallel analysis of consumers.
  #[must_use] pub fn restrict_to_globals(&self) -> Self {
    let mut keep_objs: Vec<ObjId> = vec![];
    let mut out = Self::new();
    out.next_obj = self.next_obj;

    let is_global = |v: &Value| matches!(v, Value::Global(_) | Value::Imported(_));
    for (v, key) in &self.places {
      if is_global(v) {
        out.places.insert(*v, *key);
        if let StateKey::Field(obj, _) = key {
          keep_objs.push(*obj);
        }
      }
    }
    for (key, obj) in &self.objs {
      let rooted = match key {
        StateKey::Value(v) => is_global(v),
        StateKey::Field(obj, _) => keep_objs.contains(obj),
      };
      if rooted {
        out.objs.insert(*key, *obj);
        keep_objs.push(*obj);
      }
    }
    // a second sweep catches objects hanging off objects found above
    loop {
      let before = out.objs.len();
      for (key, obj) in &self.objs {
        if let StateKey::Field(parent, _) = key {
          if keep_objs.contains(parent) && !out.objs.contains_key(key) {
            out.objs.insert(*key, *obj);
            keep_objs.push(*obj);
          }
        }
      }
      if out.objs.len() == before { break }
    }
    for (key, v) in &self.vals {
      let rooted = match key {
        StateKey::Value(v) => is_global(v),
        StateKey::Field(obj, _) => keep_objs.contains(obj),
      };
      if rooted {
        out.vals.insert(*key, v.clone());
      }
    }
    out
  }
}

impl<V: AbstractValue> crate::analysis::engine::AbstractDomain for State<V> {
  fn join(&mut self, other: &Self) -> bool { self.join_with(other) }
}

/// The shared context of a value analysis over one function: the package,
/// type table, and the global-state snapshot imported at entry.
pub struct ValueFrame<'a, V> {
  /// The package being analysed.
  pub package: &'a Package,
  /// The interned type table.
  pub types: &'a Types,
  /// Resolve a literal operand to an abstract value.
  pub literal: fn(Literal, &Types) -> Option<V>,
  /// The state imported at function entry: `READONLY` globals with analysed
  /// init functions.
  pub global_state: State<V>,
}

impl<'a, V: AbstractValue> ValueFrame<'a, V> {
  /// Create a frame with an empty global state.
  #[must_use] pub fn new(
    package: &'a Package, types: &'a Types, literal: fn(Literal, &Types) -> Option<V>,
  ) -> Self {
    Self { package, types, literal, global_state: State::new() }
  }

  /// The state a function starts in: the global snapshot; parameters are
  /// absent, i.e. `⊤`.
  #[must_use] pub fn initial_state(&self) -> State<V> { self.global_state.clone() }

  /// The abstract value of `v` in `state`, resolving literal operands.
  #[must_use] pub fn abs_value(&self, state: &State<V>, v: Value) -> Option<V> {
    if let Value::Literal(lit) = v {
      return (self.literal)(lit, self.types)
    }
    state.value_of(v).cloned()
  }

  /// Shared transfer for the `MEMORY` expressions and the structural
  /// `OTHERS` expressions every value analysis interprets the same way.
  /// Returns `true` when the expression was handled.
  pub fn transfer_common(&self, state: &mut State<V>, func: &Func, id: ExprId) -> bool {
    let expr = &func.exprs[id];
    match &expr.kind {
      ExprKind::Allocate(_) | ExprKind::RawArrayAllocate(_) => {
        // a fresh cell; the result is the unique reference to it
        state.set_to_top(id);
        let _ = state.place_of(Value::Local(id));
        true
      }
      ExprKind::Load => {
        let place = state.place_of(expr.operands[0]);
        state.propagate_key(place, StateKey::Value(Value::Local(id)));
        true
      }
      ExprKind::Store => {
        let &[v, r] = &expr.operands[..] else { return true };
        let place = state.place_of(r);
        if let Some(val) = self.abs_value(state, v) {
          state.update_at(place, val);
        } else {
          state.propagate_key(StateKey::Value(v), place);
        }
        true
      }
      ExprKind::GetElementRef(path) => {
        let mut key = state.place_of(expr.operands[0]);
        for &idx in path {
          let obj = state.obj_of(key);
          key = StateKey::Field(obj, u32::try_from(idx).expect("field index overflow"));
        }
        state.places.insert(Value::Local(id), key);
        true
      }
      ExprKind::StoreElementRef(path) => {
        let &[v, r] = &expr.operands[..] else { return true };
        let mut key = state.place_of(r);
        for &idx in path {
          let obj = state.obj_of(key);
          key = StateKey::Field(obj, u32::try_from(idx).expect("field index overflow"));
        }
        if let Some(val) = self.abs_value(state, v) {
          state.update_at(key, val);
        } else {
          state.propagate_key(StateKey::Value(v), key);
        }
        true
      }
      ExprKind::Tuple => {
        // aggregate construction: bind every operand as a child, so tuple
        // fields and enum payloads (Option's payload is child 0) are
        // observable later
        state.set_to_top(id);
        let ops: Vec<Value> = expr.operands.iter().copied().collect();
        let obj = state.obj_of(StateKey::Value(Value::Local(id)));
        for (i, op) in ops.into_iter().enumerate() {
          let child = StateKey::Field(obj, u32::try_from(i).expect("tuple arity overflow"));
          if let Some(val) = self.abs_value(state, op) {
            state.update_at(child, val);
          } else {
            state.propagate_key(StateKey::Value(op), child);
          }
        }
        true
      }
      ExprKind::Field(path) => {
        let mut key = StateKey::Value(expr.operands[0]);
        for &idx in path {
          let obj = state.obj_of(key);
          key = StateKey::Field(obj, u32::try_from(idx).expect("field index overflow"));
        }
        state.propagate_key(key, StateKey::Value(Value::Local(id)));
        true
      }
      ExprKind::Constant => {
        if let Some(Value::Literal(lit)) = expr.operands.first() {
          if let Some(val) = (self.literal)(*lit, self.types) {
            state.update(id, val);
            return true
          }
        }
        state.set_to_top(id);
        true
      }
      ExprKind::Debug { .. } | ExprKind::Lambda(_) => true,
      _ => false,
    }
  }

  /// Shared handling for a typecast: reference and class casts keep the
  /// operand's identity.
  pub fn propagate_cast_identity(&self, state: &mut State<V>, func: &Func, id: ExprId) -> bool {
    let expr = &func.exprs[id];
    let src = expr.operands[0];
    let src_ty = self.package.value_ty(func, src, self.types);
    let is_identity = self.types.is_ref(src_ty)
      || self.types.with_kind(src_ty, |k| matches!(k, crate::types::TypeKind::Class(..)));
    if is_identity {
      state.propagate(src, Value::Local(id));
    }
    is_identity
  }
}

/// The filter deciding which globals a value analysis tracks, given the
/// base type behind the global's reference type.
pub fn is_tracked_gv_base(types: &Types, base: crate::types::Ty) -> bool {
  use crate::types::TypeKind;
  types.with_kind(base, |k| {
    matches!(
      k,
      TypeKind::Bool
        | TypeKind::Rune
        | TypeKind::Int(_)
        | TypeKind::Float(_)
        | TypeKind::String
        | TypeKind::Tuple(_)
        | TypeKind::Struct(..)
        | TypeKind::Enum(..)
    )
  })
}

/// The process-wide store for the abstract values of `READONLY` globals.
/// Lifecycle: populated during the serial setup phase that analyses init
/// functions, read-only during the parallel analysis of consumers, cleared
/// between packages. [`GlobalStateStore::seal`] enforces the phase shift.
pub struct GlobalStateStore<V> {
  state: State<V>,
  sealed: bool,
}

impl<V: AbstractValue> Default for GlobalStateStore<V> {
  fn default() -> Self { Self { state: State::new(), sealed: false } }
}

impl<V: AbstractValue> GlobalStateStore<V> {
  /// An empty, unsealed store.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Merge the residue of an init-function analysis into the store.
  /// Panics if the store is sealed: mutation is only legal during the
  /// serial setup phase.
  pub fn absorb(&mut self, exit_state: &State<V>) {
    assert!(!self.sealed, "global state store mutated outside the init phase");
    let restricted = exit_state.restrict_to_globals();
    // straight insertion: init functions run once and do not conflict
    for (k, v) in &restricted.vals {
      self.state.vals.insert(*k, v.clone());
    }
    for (k, v) in &restricted.places {
      self.state.places.insert(*k, *v);
    }
    for (k, v) in &restricted.objs {
      self.state.objs.insert(*k, *v);
    }
    self.state.next_obj = self.state.next_obj.max(restricted.next_obj);
  }

  /// Record a literal-initialised global directly.
  pub fn set_global_literal(&mut self, gv: GlobalVarId, types: &Types, lit: Literal,
    literal: fn(Literal, &Types) -> Option<V>) {
    assert!(!self.sealed, "global state store mutated outside the init phase");
    if let Some(val) = literal(lit, types) {
      let place = self.state.place_of(Value::Global(gv));
      self.state.update_at(place, val);
    }
  }

  /// End the setup phase.
  pub fn seal(&mut self) { self.sealed = true }

  /// The accumulated global state, for cloning into function entries.
  #[must_use] pub fn snapshot(&self) -> State<V> { self.state.clone() }
}

/// Whether `func` is eligible for per-function value analysis: it must have
/// a body and be non-generic (generic bodies are analysed after
/// instantiation).
#[must_use] pub fn should_be_analysed(func: &Func) -> bool {
  use crate::types::ir::Attribute;
  !func.blocks.is_empty()
    && !func.attrs.contains(Attribute::GENERIC)
    && !func.attrs.contains(Attribute::FOREIGN)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ir::ExprId;

  #[derive(Clone, Debug, PartialEq)]
  struct IntVal(i64);

  impl AbstractValue for IntVal {
    fn join(&self, other: &Self) -> Option<Self> {
      (self == other).then(|| self.clone())
    }
  }

  #[test]
  fn join_drops_conflicting_entries() {
    let mut a: State<IntVal> = State::new();
    let mut b: State<IntVal> = State::new();
    let k1 = StateKey::Value(Value::Local(ExprId(1)));
    let k2 = StateKey::Value(Value::Local(ExprId(2)));
    a.update_at(k1, IntVal(5));
    a.update_at(k2, IntVal(7));
    b.update_at(k1, IntVal(5));
    b.update_at(k2, IntVal(8));
    assert!(a.join_with(&b));
    assert_eq!(a.value_at(k1), Some(&IntVal(5)));
    assert_eq!(a.value_at(k2), None);
    // idempotent once stabilised
    assert!(!a.clone().join_with(&a));
  }

  #[test]
  fn reference_copies_share_objects() {
    let mut state: State<IntVal> = State::new();
    let r1 = Value::Local(ExprId(1));
    let r2 = Value::Local(ExprId(2));
    let child = state.child_of(r1, true, 2);
    state.update_at(child, IntVal(3));
    state.propagate(r1, r2);
    let child2 = state.child_of(r2, true, 2);
    assert_eq!(child, child2);
    assert_eq!(state.value_at(child2), Some(&IntVal(3)));
  }

  #[test]
  fn restrict_keeps_global_rooted_entries() {
    let mut state: State<IntVal> = State::new();
    let g = Value::Global(GlobalVarId(0));
    let child = state.child_of(g, true, 0);
    state.update_at(child, IntVal(9));
    state.update_at(StateKey::Value(Value::Local(ExprId(5))), IntVal(1));
    let restricted = state.restrict_to_globals();
    assert_eq!(restricted.value_at(child), Some(&IntVal(9)));
    assert_eq!(restricted.value_at(StateKey::Value(Value::Local(ExprId(5)))), None);
  }
}
