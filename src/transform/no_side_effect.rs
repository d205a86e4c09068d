//! Whitelist-driven `NO_SIDE_EFFECT` marking.
//!
//! Imported (and local) functions whose package is in the allow-list and
//! whose *raw mangled name* is in the fixed allow-list get the attribute;
//! downstream passes may then treat calls to them as pure. Matching is
//! verbatim: if the standard library's mangling changes, marking silently
//! stops (a compatibility contract, not a bug).

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::types::ir::{Attribute, Package};

/// Package prefixes whose functions may be marked.
const NO_SIDE_EFFECT_PACKAGES: &[&str] = &["std"];

/// Raw mangled names of the side-effect-free `std` functions. A
/// representative subset of the shipped list: the core `Array`/`String`
/// accessors and the pure math entry points.
static STD_NO_SIDE_EFFECT_LIST: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
  [
    "_CNat5ArrayIlE4sizeHv",
    "_CNat5ArrayIlE3getHl",
    "_CNat6StringE4sizeHv",
    "_CNat6StringE7isEmptyHv",
    "_CNat6StringE5bytesHv",
    "_CNat6StringE8toStringHv",
    "_CNat4Rune7toUpperHv",
    "_CNat4Rune7toLowerHv",
    "_CNat8std.math3absHl",
    "_CNat8std.math3maxHll",
    "_CNat8std.math3minHll",
    "_CNat8std.math4sqrtHd",
    "_CNat5RangeIlE4stepHv",
    "_CNat5RangeIlE5startHv",
    "_CNat5RangeIlE3endHv",
  ]
  .into_iter()
  .collect()
});

fn check_package(package_name: &str) -> bool {
  NO_SIDE_EFFECT_PACKAGES.iter().any(|white| package_name.starts_with(white))
}

/// Mark every matching function in `package`, local and imported. Returns
/// the number of marks applied.
pub fn run_on_package(package: &mut Package) -> usize {
  let mut marked = 0;
  for func in package.funcs.iter_mut() {
    if check_package(func.package.as_str())
      && STD_NO_SIDE_EFFECT_LIST.contains(func.mangled.as_str())
    {
      func.attrs.insert(Attribute::NO_SIDE_EFFECT);
      marked += 1;
      log::debug!("[NoSideEffectMarker] marked {} as no side effect", func.name);
    }
  }
  for import in package.imports.iter_mut() {
    if !import.is_func { continue }
    if check_package(import.package.as_str())
      && STD_NO_SIDE_EFFECT_LIST.contains(import.mangled.as_str())
    {
      import.attrs.insert(Attribute::NO_SIDE_EFFECT);
      marked += 1;
      log::debug!("[NoSideEffectMarker] marked {} as no side effect", import.name);
    }
  }
  marked
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;
  use crate::types::ir::{FuncKind, ImportedValue};
  use crate::types::TypeStore;

  #[test]
  fn marks_whitelisted_import_only() {
    let mut package = Package::new(intern("app"));
    let listed = package.imports.push(ImportedValue {
      name: intern("size"),
      mangled: intern("_CNat5ArrayIlE4sizeHv"),
      package: intern("std.core"),
      ty: TypeStore::INT64,
      attrs: Attribute::IMPORTED,
      is_func: true,
      func_kind: FuncKind::Default,
      parent_def: None,
      loc: Default::default(),
    });
    let unlisted = package.imports.push(ImportedValue {
      name: intern("launchMissiles"),
      mangled: intern("_CNat5Ctrl14launchMissiles"),
      package: intern("std.ctrl"),
      ty: TypeStore::INT64,
      attrs: Attribute::IMPORTED,
      is_func: true,
      func_kind: FuncKind::Default,
      parent_def: None,
      loc: Default::default(),
    });
    let other_pkg = package.imports.push(ImportedValue {
      name: intern("size"),
      mangled: intern("_CNat5ArrayIlE4sizeHv"),
      package: intern("thirdparty"),
      ty: TypeStore::INT64,
      attrs: Attribute::IMPORTED,
      is_func: true,
      func_kind: FuncKind::Default,
      parent_def: None,
      loc: Default::default(),
    });

    assert_eq!(run_on_package(&mut package), 1);
    assert!(package.imports[listed].attrs.contains(Attribute::NO_SIDE_EFFECT));
    assert!(!package.imports[unlisted].attrs.contains(Attribute::NO_SIDE_EFFECT));
    assert!(!package.imports[other_pkg].attrs.contains(Attribute::NO_SIDE_EFFECT));
  }
}
