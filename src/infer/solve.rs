//! The local type-argument synthesis solver: constraint generation by
//! unification, fixed-point solving in dependency order, and best-solution
//! selection.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::infer::join_meet::JoinAndMeet;
use crate::infer::promotion::Promotion;
use crate::infer::{SemaTy, SemaTyKind, TyVarId, TypeManager, TypeSubst};

/// Where a constraint came from: the AST node whose checking contributed
/// the bound. Rendering happens in the caller; the solver only threads
/// these through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Blame {
  /// The contributing AST node.
  pub node: u32,
}

/// A structured inference failure, returned to the caller for rendering.
#[derive(Clone, Debug, Default, PartialEq, Eq, thiserror::Error)]
pub enum SolvingErrInfo {
  /// No failure recorded.
  #[default]
  #[error("no error")]
  Default,
  /// A type variable ended up with no constraints at all.
  #[error("cannot infer the type variable: no constraint")]
  NoConstraint {
    /// The unconstrained variable.
    ty_var: TyVarId,
  },
  /// The bounds of a type variable admit no solution.
  #[error("conflicting constraints on a type variable")]
  ConflictingConstraints {
    /// The variable that failed.
    ty_var: TyVarId,
    /// Rendered lower bounds, with their blames.
    lower_bounds: Vec<(String, BTreeSet<Blame>)>,
    /// Rendered upper bounds, with their blames.
    upper_bounds: Vec<(String, BTreeSet<Blame>)>,
  },
  /// An argument cannot be unified with its parameter type.
  #[error("argument type mismatch")]
  ArgMismatch {
    /// The argument's blame.
    blame: Blame,
  },
  /// The function's return type cannot meet the context's expectation.
  #[error("return type mismatch")]
  RetMismatch {
    /// The return position's blame.
    blame: Blame,
  },
}

/// The bounds accumulated for one type variable.
#[derive(Clone, Debug, Default)]
pub struct TyVarBounds {
  /// Lower bounds: types that must be subtypes of the variable.
  pub lbs: BTreeSet<SemaTy>,
  /// Upper bounds: types the variable must be a subtype of.
  pub ubs: BTreeSet<SemaTy>,
  /// A finite candidate set contributed by the overloading context.
  pub sum: Vec<SemaTy>,
  /// An equality pin, used by the greedy mode.
  pub eq: Option<SemaTy>,
  /// Which AST node contributed each lower bound.
  pub lb_blames: BTreeMap<SemaTy, BTreeSet<Blame>>,
  /// Which AST node contributed each upper bound.
  pub ub_blames: BTreeMap<SemaTy, BTreeSet<Blame>>,
}

impl TyVarBounds {
  fn add_lb(&mut self, ty: SemaTy, blames: &BTreeSet<Blame>) {
    self.lbs.insert(ty);
    self.lb_blames.entry(ty).or_default().extend(blames.iter().copied());
  }

  fn add_ub(&mut self, ty: SemaTy, blames: &BTreeSet<Blame>) {
    self.ubs.insert(ty);
    self.ub_blames.entry(ty).or_default().extend(blames.iter().copied());
  }
}

/// A constraint set: bounds per type variable.
pub type Constraint = BTreeMap<TyVarId, TyVarBounds>;

/// The inputs of one call-site synthesis.
#[derive(Clone, Debug, Default)]
pub struct LocTyArgSynArgPack {
  /// The placeholder variables introduced for this call.
  pub ty_vars_to_solve: Vec<TyVarId>,
  /// Argument types, parallel with `param_tys` and `arg_blames`.
  pub arg_tys: Vec<SemaTy>,
  /// Parameter types.
  pub param_tys: Vec<SemaTy>,
  /// Blame per argument.
  pub arg_blames: Vec<Blame>,
  /// The function's (possibly generic) return type.
  pub func_ret_ty: Option<SemaTy>,
  /// The context's expected upper bound on the return type.
  pub ret_ty_ub: Option<SemaTy>,
  /// Blame for the return position.
  pub ret_blame: Blame,
}

/// One branch of the search: a constraint set, the memo of already-unified
/// pairs, and whether `Nothing`/`Any` appeared as explicit bounds (which
/// legalises them as solutions).
#[derive(Clone, Debug, Default)]
struct ConstraintWithMemo {
  constraint: Constraint,
  memo: BTreeSet<(SemaTy, SemaTy)>,
  has_nothing: bool,
  has_any: bool,
}

/// The solver for one generic call site.
///
/// With `need_diag_msg`, blames must be provided in the arg pack and
/// solving uses the slower enumeration that guarantees a stable error
/// message; without it, the greedy deterministic mode may short-circuit
/// bound exploration.
pub struct LocalTypeArgumentSynthesis<'tm> {
  tm: &'tm mut TypeManager,
  arg_pack: LocTyArgSynArgPack,
  cms: Vec<ConstraintWithMemo>,
  /// Upper bounds inherited from the universal counterparts through `u2i`.
  gc_upper_bounds: BTreeMap<TyVarId, Vec<(SemaTy, Blame)>>,
  err: SolvingErrInfo,
  need_diag_msg: bool,
  deterministic: bool,
}

impl<'tm> LocalTypeArgumentSynthesis<'tm> {
  /// Create a solver. `gc_upper_bounds` are the generic-constraint upper
  /// bounds of each placeholder, already instantiated through `u2i`.
  #[must_use] pub fn new(
    tm: &'tm mut TypeManager, arg_pack: LocTyArgSynArgPack,
    gc_upper_bounds: BTreeMap<TyVarId, Vec<(SemaTy, Blame)>>, need_diag_msg: bool,
  ) -> Self {
    debug_assert_eq!(arg_pack.arg_tys.len(), arg_pack.param_tys.len());
    Self {
      tm,
      arg_pack,
      cms: vec![],
      gc_upper_bounds,
      err: SolvingErrInfo::Default,
      need_diag_msg,
      deterministic: !need_diag_msg,
    }
  }

  /// The recorded failure, for rendering.
  #[must_use] pub fn get_err_info(&self) -> SolvingErrInfo { self.err.clone() }

  /// The main entry: synthesize type arguments for the call.
  /// `allow_partial` admits solutions leaving some variables unsolved.
  pub fn synthesize_type_arguments(&mut self, allow_partial: bool) -> Option<TypeSubst> {
    for &tv in &self.arg_pack.ty_vars_to_solve {
      debug_assert!(self.tm.is_placeholder(tv), "solving a non-placeholder variable");
    }
    self.cms = vec![ConstraintWithMemo {
      constraint: self.init_constraints(),
      ..ConstraintWithMemo::default()
    }];

    let pairs: Vec<(SemaTy, SemaTy, Blame)> = self
      .arg_pack
      .arg_tys
      .iter()
      .zip(&self.arg_pack.param_tys)
      .zip(if self.arg_pack.arg_blames.is_empty() {
        // blames are optional without diagnostics
        vec![Blame::default(); self.arg_pack.arg_tys.len()]
      } else {
        self.arg_pack.arg_blames.clone()
      }.iter())
      .map(|((&a, &p), &b)| (a, p, b))
      .collect();
    for (arg, param, blame) in pairs {
      let blames: BTreeSet<Blame> = [blame].into_iter().collect();
      let cms = std::mem::take(&mut self.cms);
      self.cms = cms
        .into_iter()
        .flat_map(|cm| self.unify_one(cm, arg, param, &blames))
        .collect();
      if self.cms.is_empty() {
        self.maybe_set_err(SolvingErrInfo::ArgMismatch { blame });
        return None
      }
    }

    // The return type only constrains when it mentions a type variable.
    if let (Some(ret), Some(ub)) = (self.arg_pack.func_ret_ty, self.arg_pack.ret_ty_ub) {
      if self.tm.has_generic(ret) {
        let blames: BTreeSet<Blame> = [self.arg_pack.ret_blame].into_iter().collect();
        let cms = std::mem::take(&mut self.cms);
        self.cms = cms
          .into_iter()
          .flat_map(|cm| self.unify_one(cm, ret, ub, &blames))
          .collect();
        if self.cms.is_empty() {
          self.maybe_set_err(SolvingErrInfo::RetMismatch { blame: self.arg_pack.ret_blame });
          return None
        }
      }
    }

    if !allow_partial && !self.need_diag_msg {
      let to_solve = self.arg_pack.ty_vars_to_solve.clone();
      self.cms.retain(|cm| {
        to_solve.iter().all(|tv| {
          cm.constraint.get(tv).is_some_and(|b| !b.lbs.is_empty() || !b.ubs.is_empty())
        })
      });
    }

    let subst = self.solve_constraints(allow_partial)?;
    Some(self.reset_ideal_types(subst))
  }

  /// Seed the constraint of every variable with its inherited upper
  /// bounds.
  fn init_constraints(&mut self) -> Constraint {
    let mut constraint = Constraint::new();
    for &tv in &self.arg_pack.ty_vars_to_solve {
      let mut bounds = TyVarBounds::default();
      if let Some(ubs) = self.gc_upper_bounds.get(&tv) {
        for &(ub, blame) in ubs {
          bounds.add_ub(ub, &[blame].into_iter().collect());
        }
      }
      constraint.insert(tv, bounds);
    }
    constraint
  }

  fn maybe_set_err(&mut self, err: SolvingErrInfo) {
    if self.err == SolvingErrInfo::Default {
      self.err = err;
    }
  }

  fn placeholder_of(&self, ty: SemaTy) -> Option<TyVarId> {
    match self.tm.kind(ty) {
      SemaTyKind::Var(tv) if self.tm.is_placeholder(*tv) => Some(*tv),
      _ => None,
    }
  }

  // =============== Unification ===============

  /// Impose `arg <: param` on one branch, producing the surviving
  /// successor branches (empty means the branch is contradictory).
  fn unify_one(
    &mut self, mut cm: ConstraintWithMemo, arg: SemaTy, param: SemaTy, blames: &BTreeSet<Blame>,
  ) -> Vec<ConstraintWithMemo> {
    if arg == param { return vec![cm] }
    let (arg_kind, param_kind) = (self.tm.kind(arg).clone(), self.tm.kind(param).clone());
    if matches!(arg_kind, SemaTyKind::Invalid | SemaTyKind::Quest)
      || matches!(param_kind, SemaTyKind::Invalid | SemaTyKind::Quest)
    {
      return vec![cm]
    }

    // union/intersection branch or fan out before anything else
    if let SemaTyKind::Intersection(tys) = &param_kind {
      // A <: B∩C needs both
      let mut cms = vec![cm];
      for &member in tys {
        cms = cms.into_iter().flat_map(|c| self.unify_one(c, arg, member, blames)).collect();
      }
      return cms
    }
    if let SemaTyKind::Intersection(tys) = &arg_kind {
      // A∩B <: C holds when either conjunct does
      return self.branch(tys, cm, |this, c, member| this.unify_one(c, member, param, blames))
    }
    if let SemaTyKind::Union(tys) = &arg_kind {
      // A∪B <: C needs both
      let mut cms = vec![cm];
      for &member in tys {
        cms = cms.into_iter().flat_map(|c| self.unify_one(c, member, param, blames)).collect();
      }
      return cms
    }
    if let SemaTyKind::Union(tys) = &param_kind {
      // A <: B∪C holds when either disjunct does
      return self.branch(tys, cm, |this, c, member| this.unify_one(c, arg, member, blames))
    }

    if cm.memo.contains(&(arg, param)) { return vec![cm] }

    // a placeholder on either side records a bound
    if self.placeholder_of(param).is_some() || self.placeholder_of(arg).is_some() {
      cm.memo.insert((arg, param));
      return self.unify_ty_var(cm, arg, param, blames)
    }

    // implicit Option lifting: when the parameter is nested deeper in
    // Option than the argument, unwrap the parameter and recurse
    if self.tm.option_nested_level(param) > self.tm.option_nested_level(arg) {
      cm.memo.insert((arg, param));
      if let (Some(arg_payload), Some(param_payload)) =
        (self.tm.option_payload(arg), self.tm.option_payload(param))
      {
        return self.unify_one(cm, arg_payload, param_payload, blames)
      }
      let payload = self.tm.option_payload(param).expect("deeper nesting means an option");
      return self.unify_one(cm, arg, payload, blames)
    }

    match (&arg_kind, &param_kind) {
      // a context (universal) variable has no bounds to collect; only the
      // declared subtyping can hold
      (SemaTyKind::Var(_), _) | (_, SemaTyKind::Var(_)) =>
        self.check_subtype(cm, arg, param),
      (SemaTyKind::Nominal(..), SemaTyKind::Nominal(..)) =>
        self.unify_nominal(cm, arg, param, blames),
      (
        SemaTyKind::Func { params: ps, ret: r1 },
        SemaTyKind::Func { params: qs, ret: r2 },
      ) if ps.len() == qs.len() => {
        // parameters contravariant, return covariant
        let (ps, qs, r1, r2) = (ps.clone(), qs.clone(), *r1, *r2);
        let mut cms = vec![cm];
        for (p, q) in ps.into_iter().zip(qs) {
          cms = cms.into_iter().flat_map(|c| self.unify_one(c, q, p, blames)).collect();
        }
        cms.into_iter().flat_map(|c| self.unify_one(c, r1, r2, blames)).collect()
      }
      (SemaTyKind::Tuple(xs), SemaTyKind::Tuple(ys)) if xs.len() == ys.len() => {
        // elementwise invariant
        let (xs, ys) = (xs.clone(), ys.clone());
        let mut cms = vec![cm];
        for (x, y) in xs.into_iter().zip(ys) {
          cms = cms.into_iter().flat_map(|c| self.unify_one(c, x, y, blames)).collect();
          cms = cms.into_iter().flat_map(|c| self.unify_one(c, y, x, blames)).collect();
        }
        cms
      }
      _ => self.check_subtype(cm, arg, param),
    }
  }

  fn check_subtype(
    &mut self, cm: ConstraintWithMemo, arg: SemaTy, param: SemaTy,
  ) -> Vec<ConstraintWithMemo> {
    if self.tm.is_subtype(arg, param) { vec![cm] } else { vec![] }
  }

  /// Fan out over the alternatives of `tys`. In the greedy deterministic
  /// mode the first surviving alternative short-circuits the exploration;
  /// in diagnostic mode every alternative is enumerated so errors are
  /// stable.
  fn branch(
    &mut self, tys: &std::collections::BTreeSet<SemaTy>, cm: ConstraintWithMemo,
    mut f: impl FnMut(&mut Self, ConstraintWithMemo, SemaTy) -> Vec<ConstraintWithMemo>,
  ) -> Vec<ConstraintWithMemo> {
    let mut out = vec![];
    for &member in tys {
      out.extend(f(self, cm.clone(), member));
      if self.deterministic && !out.is_empty() {
        break
      }
    }
    out
  }

  /// Record a bound on a placeholder, keeping the bound set consistent: a
  /// new lower bound must fit under every existing upper bound, and dually.
  fn unify_ty_var(
    &mut self, mut cm: ConstraintWithMemo, arg: SemaTy, param: SemaTy, blames: &BTreeSet<Blame>,
  ) -> Vec<ConstraintWithMemo> {
    let (tv, lb, ub) = if let Some(tv) = self.placeholder_of(param) {
      (tv, Some(arg), None) // T <: X: arg is a lower bound of X
    } else {
      let tv = self.placeholder_of(arg).expect("checked by the caller");
      (tv, None, Some(param)) // X <: T: param is an upper bound of X
    };

    if let Some(lb) = lb {
      match self.tm.kind(lb) {
        SemaTyKind::Nothing => cm.has_nothing = true,
        SemaTyKind::Any => cm.has_any = true,
        _ => {}
      }
      let existing_ubs: Vec<SemaTy> =
        cm.constraint.get(&tv).map(|b| b.ubs.iter().copied().collect()).unwrap_or_default();
      let mut cms = vec![cm];
      for u in existing_ubs {
        cms = cms.into_iter().flat_map(|c| self.unify_one(c, lb, u, blames)).collect();
      }
      for c in &mut cms {
        c.constraint.entry(tv).or_default().add_lb(lb, blames);
      }
      cms
    } else {
      let ub = ub.expect("one side is a bound");
      match self.tm.kind(ub) {
        SemaTyKind::Nothing => cm.has_nothing = true,
        SemaTyKind::Any => cm.has_any = true,
        _ => {}
      }
      let existing_lbs: Vec<SemaTy> =
        cm.constraint.get(&tv).map(|b| b.lbs.iter().copied().collect()).unwrap_or_default();
      let mut cms = vec![cm];
      for l in existing_lbs {
        cms = cms.into_iter().flat_map(|c| self.unify_one(c, l, ub, blames)).collect();
      }
      for c in &mut cms {
        c.constraint.entry(tv).or_default().add_ub(ub, blames);
      }
      cms
    }
  }

  /// Promote the argument's declaration to the parameter's and unify the
  /// type arguments invariantly; each possible promotion is its own branch.
  fn unify_nominal(
    &mut self, cm: ConstraintWithMemo, arg: SemaTy, param: SemaTy, blames: &BTreeSet<Blame>,
  ) -> Vec<ConstraintWithMemo> {
    let promoted = Promotion::new(self.tm).promote(arg, param);
    if promoted.is_empty() { return vec![] }
    let SemaTyKind::Nominal(_, param_args) = self.tm.kind(param).clone() else { return vec![] };

    let mut out = vec![];
    for p in promoted {
      let SemaTyKind::Nominal(_, p_args) = self.tm.kind(p).clone() else { continue };
      if p_args.len() != param_args.len() { continue }
      let mut cms = vec![cm.clone()];
      for (&pa, &qa) in p_args.iter().zip(&param_args) {
        cms = cms.into_iter().flat_map(|c| self.unify_one(c, pa, qa, blames)).collect();
        cms = cms.into_iter().flat_map(|c| self.unify_one(c, qa, pa, blames)).collect();
      }
      out.extend(cms);
      if self.deterministic && !out.is_empty() {
        break
      }
    }
    out
  }

  // =============== Solving ===============

  fn solve_constraints(&mut self, allow_partial: bool) -> Option<TypeSubst> {
    let to_solve = self.arg_pack.ty_vars_to_solve.clone();
    let mut candidates: Vec<TypeSubst> = vec![];

    let cms = std::mem::take(&mut self.cms);
    for cm in &cms {
      let mut remaining = cm.constraint.clone();
      let mut subst = TypeSubst::new();
      while !remaining.is_empty() {
        let batch = self.topo_once(&remaining);
        let mut batch_constraint: Constraint = BTreeMap::new();
        for tv in batch {
          if let Some(bounds) = remaining.remove(&tv) {
            batch_constraint.insert(tv, bounds);
          }
        }
        let batch_constraint = self.apply_subst_to_constraint(&subst, batch_constraint);
        let batch_subst = self.find_solution(batch_constraint, cm.has_nothing, cm.has_any);
        subst.extend(batch_subst);
      }
      if allow_partial || !self.has_unsolved_ty_vars(&subst, &to_solve) {
        if !candidates.contains(&subst) {
          candidates.push(subst);
        }
      }
    }
    self.cms = cms;

    if !candidates.is_empty() {
      self.err = SolvingErrInfo::Default;
    }
    self.get_best_solution(candidates, allow_partial)
  }

  /// One topological batch: the variables whose bounds mention no other
  /// unsolved variable. A dependency cycle degrades to taking everything
  /// left; `find_solution`'s two-phase substitution handles the
  /// self-references.
  fn topo_once(&self, remaining: &Constraint) -> Vec<TyVarId> {
    let unsolved: BTreeSet<TyVarId> = remaining.keys().copied().collect();
    let independent: Vec<TyVarId> = remaining
      .iter()
      .filter(|(tv, bounds)| {
        bounds.lbs.iter().chain(bounds.ubs.iter()).all(|&b| {
          let mut vars = BTreeSet::new();
          self.tm.vars_in(b, &mut vars);
          vars.iter().all(|v| v == *tv || !unsolved.contains(v))
        })
      })
      .map(|(&tv, _)| tv)
      .collect();
    if independent.is_empty() {
      unsolved.into_iter().collect()
    } else {
      independent
    }
  }

  fn apply_subst_to_constraint(&mut self, subst: &TypeSubst, cs: Constraint) -> Constraint {
    if subst.is_empty() { return cs }
    cs.into_iter()
      .map(|(tv, bounds)| {
        let mut new_bounds = TyVarBounds { sum: bounds.sum.clone(), eq: bounds.eq, ..TyVarBounds::default() };
        for lb in bounds.lbs {
          let new_lb = self.tm.substitute(lb, subst);
          let blames = bounds.lb_blames.get(&lb).cloned().unwrap_or_default();
          new_bounds.add_lb(new_lb, &blames);
        }
        for ub in bounds.ubs {
          let new_ub = self.tm.substitute(ub, subst);
          let blames = bounds.ub_blames.get(&ub).cloned().unwrap_or_default();
          new_bounds.add_ub(new_ub, &blames);
        }
        (tv, new_bounds)
      })
      .collect()
  }

  /// Solve one batch to a fixed point: join the lower bounds, else meet the
  /// upper bounds (two-phase for self-referential bounds), resolve leftover
  /// ideal types, and report `CONFLICTING_CONSTRAINTS`/`NO_CONSTRAINT` when
  /// nothing fits.
  fn find_solution(
    &mut self, mut this_m: Constraint, has_nothing: bool, has_any: bool,
  ) -> TypeSubst {
    let mut this_subst = TypeSubst::new();
    loop {
      let mut new_info = false;
      let batch_vars: BTreeSet<TyVarId> = this_m.keys().copied().collect();
      let mut msg = SolvingErrInfo::Default;
      for tv in batch_vars.iter().copied().collect::<Vec<_>>() {
        let Some(bounds) = this_m.get(&tv) else { continue };
        if self.need_diag_msg && bounds.lbs.is_empty() && bounds.ubs.is_empty() {
          msg = SolvingErrInfo::NoConstraint { ty_var: tv };
          break
        }
        let (lbs, ubs) = (bounds.lbs.clone(), bounds.ubs.clone());

        let ty_j = JoinAndMeet::new(self.tm, batch_vars.clone()).join_as_visible_ty(&lbs);
        let ty_m = self.meet_upper_bounds(tv, &ubs, &batch_vars);

        let valid_any = has_any || (self.deterministic && ubs.iter().any(|&u| matches!(self.tm.kind(u), SemaTyKind::Any)));
        let valid_nothing = has_nothing
          || (self.deterministic && lbs.iter().any(|&l| matches!(self.tm.kind(l), SemaTyKind::Nothing)));

        if self.is_valid_solution(ty_j, valid_nothing, valid_any) {
          this_subst.insert(tv, ty_j);
        } else if self.tm.has_ideal(ty_j) && !self.tm.is_numeric(ty_m) {
          let resolved = self.tm.replace_ideal(ty_j);
          this_subst.insert(tv, resolved);
        } else if self.is_valid_solution(ty_m, valid_nothing, valid_any) {
          this_subst.insert(tv, ty_m);
        } else if self.tm.has_ideal(ty_m) {
          let resolved = self.tm.replace_ideal(ty_m);
          this_subst.insert(tv, resolved);
        } else {
          if self.need_diag_msg {
            let bounds = &this_m[&tv];
            msg = SolvingErrInfo::ConflictingConstraints {
              ty_var: tv,
              lower_bounds: bounds
                .lbs
                .iter()
                .map(|&lb| {
                  (self.tm.to_string(lb), bounds.lb_blames.get(&lb).cloned().unwrap_or_default())
                })
                .collect(),
              upper_bounds: bounds
                .ubs
                .iter()
                .map(|&ub| {
                  (self.tm.to_string(ub), bounds.ub_blames.get(&ub).cloned().unwrap_or_default())
                })
                .collect(),
            };
          }
          continue
        }
        new_info = true;
        this_m.remove(&tv);
      }
      this_m = self.apply_subst_to_constraint(&this_subst, this_m);
      self.maybe_set_err(msg);
      if !new_info { break }
    }
    this_subst
  }

  /// Meet the upper bounds, instantiating self-referential bounds
  /// (`T <: Interface<T>`) in a second phase with the first-phase result.
  fn meet_upper_bounds(
    &mut self, tv: TyVarId, ubs: &BTreeSet<SemaTy>, ignored: &BTreeSet<TyVarId>,
  ) -> SemaTy {
    let (with_tv, without_tv): (BTreeSet<SemaTy>, BTreeSet<SemaTy>) =
      ubs.iter().copied().partition(|&ty| self.tm.contains_var(ty, tv));
    let mut ty_m = JoinAndMeet::new(self.tm, ignored.clone()).meet_as_visible_ty(&without_tv);
    if !self.tm.has_invalid(ty_m) && !with_tv.is_empty() {
      let subst: TypeSubst = [(tv, ty_m)].into_iter().collect();
      let mut substituted: BTreeSet<SemaTy> =
        with_tv.iter().map(|&ty| self.tm.substitute(ty, &subst)).collect();
      substituted.insert(ty_m);
      ty_m = JoinAndMeet::new(self.tm, ignored.clone()).meet_as_visible_ty(&substituted);
    }
    ty_m
  }

  fn is_valid_solution(&self, ty: SemaTy, has_nothing: bool, has_any: bool) -> bool {
    let kind = self.tm.kind(ty);
    let plain = !self.tm.has_invalid(ty)
      && !matches!(kind, SemaTyKind::Nothing | SemaTyKind::Any | SemaTyKind::CType)
      && !self.tm.has_ideal(ty);
    plain
      || (has_nothing && matches!(kind, SemaTyKind::Nothing))
      || (has_any && matches!(kind, SemaTyKind::Any))
  }

  fn has_unsolved_ty_vars(&self, subst: &TypeSubst, to_solve: &[TyVarId]) -> bool {
    to_solve.iter().any(|&tv| {
      !subst.contains_key(&tv)
        || subst.values().any(|&ty| self.tm.contains_var(ty, tv))
    })
  }

  fn count_unsolved(&self, subst: &TypeSubst) -> usize {
    self
      .arg_pack
      .ty_vars_to_solve
      .iter()
      .filter(|&&tv| {
        !subst.contains_key(&tv) || subst.values().any(|&ty| self.tm.contains_var(ty, tv))
      })
      .count()
  }

  /// Pick the best surviving solution: per variable prefer the more
  /// specific type (numeric types through the numeric hierarchy); with
  /// `allow_partial`, solutions leaving fewer variables unsolved win first.
  fn get_best_solution(
    &mut self, candidates: Vec<TypeSubst>, allow_partial: bool,
  ) -> Option<TypeSubst> {
    if candidates.is_empty() || self.arg_pack.ty_vars_to_solve.is_empty() {
      return None
    }
    if candidates.len() == 1 {
      return candidates.into_iter().next()
    }
    let mut maximals = vec![true; candidates.len()];
    if allow_partial {
      let unsolved: Vec<usize> = candidates.iter().map(|s| self.count_unsolved(s)).collect();
      let min = *unsolved.iter().min().expect("nonempty");
      for (i, &count) in unsolved.iter().enumerate() {
        if count > min {
          maximals[i] = false;
        }
      }
    }
    for &tv in &self.arg_pack.ty_vars_to_solve.clone() {
      self.compare_candidates(tv, &candidates, &mut maximals);
    }
    let best: Vec<usize> =
      maximals.iter().enumerate().filter(|&(_, &m)| m).map(|(i, _)| i).collect();
    match best.into_iter().exactly_one() {
      Ok(i) => Some(candidates.into_iter().nth(i).expect("index in range")),
      Err(_) => None,
    }
  }

  fn compare_candidates(
    &mut self, tv: TyVarId, candidates: &[TypeSubst], maximals: &mut [bool],
  ) {
    let invalid = self.tm.invalid();
    for i in 0..candidates.len() {
      if !maximals[i] { continue }
      let ty_i = candidates[i].get(&tv).copied().unwrap_or(invalid);
      for j in i + 1..candidates.len() {
        if !maximals[j] { continue }
        let ty_j = candidates[j].get(&tv).copied().unwrap_or(invalid);
        if self.tm.is_numeric(ty_i) && self.tm.is_numeric(ty_j) {
          match numeric_rank(self.tm.kind(ty_i)).cmp(&numeric_rank(self.tm.kind(ty_j))) {
            std::cmp::Ordering::Greater => maximals[i] = false,
            std::cmp::Ordering::Less => maximals[j] = false,
            std::cmp::Ordering::Equal => {}
          }
        } else if !self.tm.is_subtype(ty_i, ty_j) {
          maximals[i] = false;
        } else if !self.tm.is_subtype(ty_j, ty_i) {
          maximals[j] = false;
        }
        if !maximals[i] { break }
      }
    }
  }

  fn reset_ideal_types(&mut self, subst: TypeSubst) -> TypeSubst {
    subst.into_iter().map(|(tv, ty)| (tv, self.tm.replace_ideal(ty))).collect()
  }
}

/// The numeric hierarchy rank: narrower integers before wider, integers
/// before floats, ideals before their concretisations.
fn numeric_rank(kind: &SemaTyKind) -> (u8, u32, bool) {
  match kind {
    SemaTyKind::IdealInt => (0, 0, false),
    SemaTyKind::Int(ity) => (1, ity.width.bits(), !ity.signed),
    SemaTyKind::IdealFloat => (2, 0, false),
    SemaTyKind::Float(fw) => (3, *fw as u32, false),
    _ => (4, 0, false),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::infer::{NominalDecl, NominalKind};
  use crate::intern;

  fn placeholder(tm: &mut TypeManager, name: &str) -> TyVarId {
    tm.fresh_ty_var(intern(name), true)
  }

  #[test]
  fn infers_bool_for_identity() {
    // fn id<T>(v: T): T called as id(true) => T := Bool
    let mut tm = TypeManager::new();
    let t = placeholder(&mut tm, "T");
    let t_ty = tm.mk_var(t);
    let bool_ty = tm.intern(SemaTyKind::Bool);
    let pack = LocTyArgSynArgPack {
      ty_vars_to_solve: vec![t],
      arg_tys: vec![bool_ty],
      param_tys: vec![t_ty],
      arg_blames: vec![Blame::default()],
      ..LocTyArgSynArgPack::default()
    };
    let mut syn = LocalTypeArgumentSynthesis::new(&mut tm, pack, BTreeMap::new(), true);
    let subst = syn.synthesize_type_arguments(false).expect("solvable");
    assert_eq!(subst[&t], bool_ty);
  }

  #[test]
  fn infers_pair_with_ideal_resolution() {
    // fn pair<A,B>(a: A, b: B): (A, B) called as pair(1, "s")
    // => A := Int64, B := String
    let mut tm = TypeManager::new();
    let a = placeholder(&mut tm, "A");
    let b = placeholder(&mut tm, "B");
    let a_ty = tm.mk_var(a);
    let b_ty = tm.mk_var(b);
    let ideal = tm.intern(SemaTyKind::IdealInt);
    let string_ty = tm.intern(SemaTyKind::String);
    let pack = LocTyArgSynArgPack {
      ty_vars_to_solve: vec![a, b],
      arg_tys: vec![ideal, string_ty],
      param_tys: vec![a_ty, b_ty],
      arg_blames: vec![Blame { node: 1 }, Blame { node: 2 }],
      ..LocTyArgSynArgPack::default()
    };
    let mut syn = LocalTypeArgumentSynthesis::new(&mut tm, pack, BTreeMap::new(), true);
    let subst = syn.synthesize_type_arguments(false).expect("solvable");
    let int64 = tm.int64();
    assert_eq!(subst[&a], int64);
    assert_eq!(subst[&b], string_ty);
  }

  #[test]
  fn conflicting_constraints_reported() {
    // fn clash<A>(a: A, b: A): A called as clash(1, "s")
    let mut tm = TypeManager::new();
    let a = placeholder(&mut tm, "A");
    let a_ty = tm.mk_var(a);
    let ideal = tm.intern(SemaTyKind::IdealInt);
    let string_ty = tm.intern(SemaTyKind::String);
    let pack = LocTyArgSynArgPack {
      ty_vars_to_solve: vec![a],
      arg_tys: vec![ideal, string_ty],
      param_tys: vec![a_ty, a_ty],
      arg_blames: vec![Blame { node: 1 }, Blame { node: 2 }],
      ..LocTyArgSynArgPack::default()
    };
    let mut syn = LocalTypeArgumentSynthesis::new(&mut tm, pack, BTreeMap::new(), true);
    assert!(syn.synthesize_type_arguments(false).is_none());
    let SolvingErrInfo::ConflictingConstraints { ty_var, lower_bounds, .. } = syn.get_err_info()
    else {
      panic!("expected conflicting constraints")
    };
    assert_eq!(ty_var, a);
    let rendered: Vec<&str> = lower_bounds.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(rendered, vec!["Int64", "String"]);
  }

  #[test]
  fn return_type_constraint_participates() {
    // fn make<T>(): T with expected return type Bool => T := Bool
    let mut tm = TypeManager::new();
    let t = placeholder(&mut tm, "T");
    let t_ty = tm.mk_var(t);
    let bool_ty = tm.intern(SemaTyKind::Bool);
    let pack = LocTyArgSynArgPack {
      ty_vars_to_solve: vec![t],
      func_ret_ty: Some(t_ty),
      ret_ty_ub: Some(bool_ty),
      ..LocTyArgSynArgPack::default()
    };
    let mut syn = LocalTypeArgumentSynthesis::new(&mut tm, pack, BTreeMap::new(), true);
    let subst = syn.synthesize_type_arguments(false).expect("solvable");
    assert_eq!(subst[&t], bool_ty);
  }

  #[test]
  fn option_lifting_unwraps_parameter() {
    // fn f<T>(v: Option<T>) called with a plain Bool argument
    let mut tm = TypeManager::new();
    let opt_param = tm.fresh_ty_var(intern("P"), false);
    let opt_param_ty = tm.mk_var(opt_param);
    let option = tm.add_decl(NominalDecl {
      name: intern("Option"),
      kind: NominalKind::Enum,
      type_params: vec![opt_param],
      supers: vec![],
      is_option: true,
    });
    let _ = opt_param_ty;
    let t = placeholder(&mut tm, "T");
    let t_ty = tm.mk_var(t);
    let option_t = tm.intern(SemaTyKind::Nominal(option, vec![t_ty]));
    let bool_ty = tm.intern(SemaTyKind::Bool);
    let pack = LocTyArgSynArgPack {
      ty_vars_to_solve: vec![t],
      arg_tys: vec![bool_ty],
      param_tys: vec![option_t],
      arg_blames: vec![Blame::default()],
      ..LocTyArgSynArgPack::default()
    };
    let mut syn = LocalTypeArgumentSynthesis::new(&mut tm, pack, BTreeMap::new(), true);
    let subst = syn.synthesize_type_arguments(false).expect("solvable");
    assert_eq!(subst[&t], bool_ty);
  }

  #[test]
  fn nominal_promotion_pins_argument() {
    // fn sum<X>(c: Collection<X>) called with ArrayList<Int64> => X := Int64
    let mut tm = TypeManager::new();
    let cx = tm.fresh_ty_var(intern("CX"), false);
    let collection = tm.add_decl(NominalDecl {
      name: intern("Collection"),
      kind: NominalKind::Class { is_interface: true },
      type_params: vec![cx],
      supers: vec![],
      is_option: false,
    });
    let lt = tm.fresh_ty_var(intern("LT"), false);
    let lt_ty = tm.mk_var(lt);
    let collection_lt = tm.intern(SemaTyKind::Nominal(collection, vec![lt_ty]));
    let array_list = tm.add_decl(NominalDecl {
      name: intern("ArrayList"),
      kind: NominalKind::Class { is_interface: false },
      type_params: vec![lt],
      supers: vec![collection_lt],
      is_option: false,
    });

    let x = placeholder(&mut tm, "X");
    let x_ty = tm.mk_var(x);
    let int64 = tm.int64();
    let list_int = tm.intern(SemaTyKind::Nominal(array_list, vec![int64]));
    let collection_x = tm.intern(SemaTyKind::Nominal(collection, vec![x_ty]));
    let pack = LocTyArgSynArgPack {
      ty_vars_to_solve: vec![x],
      arg_tys: vec![list_int],
      param_tys: vec![collection_x],
      arg_blames: vec![Blame::default()],
      ..LocTyArgSynArgPack::default()
    };
    let mut syn = LocalTypeArgumentSynthesis::new(&mut tm, pack, BTreeMap::new(), true);
    let subst = syn.synthesize_type_arguments(false).expect("solvable");
    assert_eq!(subst[&x], int64);
  }

  #[test]
  fn upper_bound_from_generic_constraint_filters() {
    // fn show<T <: Printable>(v: T); called with a non-Printable argument
    let mut tm = TypeManager::new();
    let printable = tm.add_decl(NominalDecl {
      name: intern("Printable"),
      kind: NominalKind::Class { is_interface: true },
      type_params: vec![],
      supers: vec![],
      is_option: false,
    });
    let printable_ty = tm.intern(SemaTyKind::Nominal(printable, vec![]));
    let t = placeholder(&mut tm, "T");
    let t_ty = tm.mk_var(t);
    let bool_ty = tm.intern(SemaTyKind::Bool);
    let pack = LocTyArgSynArgPack {
      ty_vars_to_solve: vec![t],
      arg_tys: vec![bool_ty],
      param_tys: vec![t_ty],
      arg_blames: vec![Blame::default()],
      ..LocTyArgSynArgPack::default()
    };
    let gc: BTreeMap<TyVarId, Vec<(SemaTy, Blame)>> =
      [(t, vec![(printable_ty, Blame::default())])].into_iter().collect();
    let mut syn = LocalTypeArgumentSynthesis::new(&mut tm, pack, gc, true);
    // Bool is not Printable: the new lower bound contradicts the inherited
    // upper bound, so every branch dies as an argument mismatch
    assert!(syn.synthesize_type_arguments(false).is_none());
    assert!(matches!(syn.get_err_info(), SolvingErrInfo::ArgMismatch { .. }));
  }
}
