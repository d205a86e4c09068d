//! The CHIR type system: scalar type descriptors, the interned type table,
//! and the IR node definitions in [`ir`].

use std::fmt::{self, Display};

use parking_lot::RwLock;

use crate::{mk_id, IdxVec};

pub mod ir;

/// The bit width of a fixed-width integer. Native-width integers are
/// represented as 64-bit at the IR level; see [`IntTy::native`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntWidth {
  /// 8 bits
  W8 = 8,
  /// 16 bits
  W16 = 16,
  /// 32 bits
  W32 = 32,
  /// 64 bits
  W64 = 64,
}

impl IntWidth {
  /// The number of bits in this width.
  #[must_use] pub fn bits(self) -> u32 { self as u32 }

  /// Build an [`IntWidth`] from a bit count, panicking on anything but
  /// 8/16/32/64.
  #[must_use] pub fn from_bits(bits: u32) -> Self {
    match bits {
      8 => Self::W8,
      16 => Self::W16,
      32 => Self::W32,
      64 => Self::W64,
      _ => panic!("invalid integer width {bits}"),
    }
  }
}

/// A radix for parsing and printing integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Radix {
  /// Base 2
  Bin = 2,
  /// Base 10
  Dec = 10,
  /// Base 16
  Hex = 16,
}

/// The overflow strategy attached to arithmetic expressions and typecasts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OverflowStrategy {
  /// Overflow raises an `OverflowException` at runtime; the compiler
  /// diagnoses statically provable overflow.
  #[default]
  Throwing,
  /// Overflow wraps around two's complement.
  Wrapping,
  /// Overflow saturates to the boundary of the type's range.
  Saturating,
  /// Overflow yields `Option.None`.
  Checked,
}

/// A fixed-width integer type: signedness, width, and whether the source
/// type was the native-width alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntTy {
  /// Whether the type is signed.
  pub signed: bool,
  /// The bit width (native types are 64-bit here).
  pub width: IntWidth,
  /// Whether the source type was `IntNative`/`UIntNative`.
  pub native: bool,
}

impl IntTy {
  /// `Int8`
  pub const INT8: Self = Self { signed: true, width: IntWidth::W8, native: false };
  /// `Int16`
  pub const INT16: Self = Self { signed: true, width: IntWidth::W16, native: false };
  /// `Int32`
  pub const INT32: Self = Self { signed: true, width: IntWidth::W32, native: false };
  /// `Int64`
  pub const INT64: Self = Self { signed: true, width: IntWidth::W64, native: false };
  /// `IntNative`
  pub const INT_NATIVE: Self = Self { signed: true, width: IntWidth::W64, native: true };
  /// `UInt8`
  pub const UINT8: Self = Self { signed: false, width: IntWidth::W8, native: false };
  /// `UInt16`
  pub const UINT16: Self = Self { signed: false, width: IntWidth::W16, native: false };
  /// `UInt32`
  pub const UINT32: Self = Self { signed: false, width: IntWidth::W32, native: false };
  /// `UInt64`
  pub const UINT64: Self = Self { signed: false, width: IntWidth::W64, native: false };
  /// `UIntNative`
  pub const UINT_NATIVE: Self = Self { signed: false, width: IntWidth::W64, native: true };

  /// The smallest value of this type, as a mathematical integer.
  #[must_use] pub fn min_value(self) -> i128 {
    if self.signed { -(1i128 << (self.width.bits() - 1)) } else { 0 }
  }

  /// The largest value of this type, as a mathematical integer.
  #[must_use] pub fn max_value(self) -> i128 {
    if self.signed { (1i128 << (self.width.bits() - 1)) - 1 } else { (1i128 << self.width.bits()) - 1 }
  }

  /// Whether the mathematical integer `v` is representable in this type.
  #[must_use] pub fn contains(self, v: i128) -> bool {
    self.min_value() <= v && v <= self.max_value()
  }
}

impl Display for IntTy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let sign = if self.signed { "Int" } else { "UInt" };
    if self.native { write!(f, "{sign}Native") } else { write!(f, "{}{}", sign, self.width.bits()) }
  }
}

/// The width of a floating point type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FloatWidth {
  /// 16 bits
  F16,
  /// 32 bits
  F32,
  /// 64 bits
  F64,
}

impl Display for FloatWidth {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::F16 => write!(f, "Float16"),
      Self::F32 => write!(f, "Float32"),
      Self::F64 => write!(f, "Float64"),
    }
  }
}

mk_id! {
  /// An interned type. Index into the [`TypeStore`].
  Ty,
  /// A custom type definition (class/struct/enum/extend) in a [`ir::Package`].
  DefId,
}

/// The structure of a type. Compound types refer to other interned types.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
  /// The unit type.
  Unit,
  /// The boolean type.
  Bool,
  /// A unicode code point.
  Rune,
  /// The uninhabited type.
  Nothing,
  /// A fixed-width integer type.
  Int(IntTy),
  /// A floating point type.
  Float(FloatWidth),
  /// The string type.
  String,
  /// A C-compatible string.
  CString,
  /// A tuple of the given element types.
  Tuple(Box<[Ty]>),
  /// A function type.
  Func {
    /// The parameter types.
    params: Box<[Ty]>,
    /// The return type.
    ret: Ty,
  },
  /// A reference (pointer) to a value of the base type.
  Ref(Ty),
  /// A runtime-allocated array with the given number of dimensions.
  RawArray {
    /// The element type.
    elem: Ty,
    /// The number of dimensions.
    dims: u32,
  },
  /// A value array with a static size.
  VArray {
    /// The element type.
    elem: Ty,
    /// The static element count.
    size: u64,
  },
  /// A C pointer to the given type.
  CPointer(Ty),
  /// An instance of a class or interface definition.
  Class(DefId, Box<[Ty]>),
  /// An instance of a struct definition.
  Struct(DefId, Box<[Ty]>),
  /// An instance of an enum definition.
  Enum(DefId, Box<[Ty]>),
  /// A generic type variable, identified by its index in the enclosing
  /// declaration's parameter list.
  Generic(u32),
}

/// The append-only interned type table. `Ty(0)..` are the pre-interned
/// primitives, see the associated constants on [`TypeStore`].
#[derive(Debug, Default)]
pub struct TypeStore {
  kinds: IdxVec<Ty, TypeKind>,
  dedup: hashbrown::HashMap<TypeKind, Ty>,
}

impl TypeStore {
  /// Pre-interned `Unit`.
  pub const UNIT: Ty = Ty(0);
  /// Pre-interned `Bool`.
  pub const BOOL: Ty = Ty(1);
  /// Pre-interned `Rune`.
  pub const RUNE: Ty = Ty(2);
  /// Pre-interned `Nothing`.
  pub const NOTHING: Ty = Ty(3);
  /// Pre-interned `String`.
  pub const STRING: Ty = Ty(4);
  /// Pre-interned `Int64`.
  pub const INT64: Ty = Ty(5);
  /// Pre-interned `UInt64`.
  pub const UINT64: Ty = Ty(6);
  /// Pre-interned `UInt8`.
  pub const UINT8: Ty = Ty(7);

  /// Create a store with the primitives pre-interned.
  #[must_use] pub fn new() -> Self {
    let mut this = Self::default();
    for kind in [
      TypeKind::Unit,
      TypeKind::Bool,
      TypeKind::Rune,
      TypeKind::Nothing,
      TypeKind::String,
      TypeKind::Int(IntTy::INT64),
      TypeKind::Int(IntTy::UINT64),
      TypeKind::Int(IntTy::UINT8),
    ] {
      this.intern(kind);
    }
    this
  }

  /// Intern a type, returning its id.
  pub fn intern(&mut self, kind: TypeKind) -> Ty {
    if let Some(&ty) = self.dedup.get(&kind) { return ty }
    let ty = self.kinds.push(kind.clone());
    self.dedup.insert(kind, ty);
    ty
  }

  /// The structure of type `ty`.
  #[must_use] pub fn kind(&self, ty: Ty) -> &TypeKind { &self.kinds[ty] }

  /// The number of interned types.
  #[must_use] pub fn len(&self) -> usize { self.kinds.len() }

  /// Whether the store is empty (it never is after [`TypeStore::new`]).
  #[must_use] pub fn is_empty(&self) -> bool { self.kinds.is_empty() }
}

/// A shared, thread-safe view over a [`TypeStore`]. Reads vastly outnumber
/// writes once lowering has finished, so this is a reader-writer lock.
#[derive(Debug)]
pub struct Types(RwLock<TypeStore>);

impl Default for Types {
  fn default() -> Self { Self(RwLock::new(TypeStore::new())) }
}

impl Types {
  /// Intern a type.
  pub fn intern(&self, kind: TypeKind) -> Ty {
    if let Some(&ty) = self.0.read().dedup.get(&kind) { return ty }
    self.0.write().intern(kind)
  }

  /// Clone out the structure of `ty`.
  #[must_use] pub fn kind(&self, ty: Ty) -> TypeKind { self.0.read().kind(ty).clone() }

  /// Run `f` on the structure of `ty` without cloning.
  pub fn with_kind<R>(&self, ty: Ty, f: impl FnOnce(&TypeKind) -> R) -> R {
    f(self.0.read().kind(ty))
  }

  /// The integer descriptor of `ty`, if it is an integer type.
  #[must_use] pub fn as_int(&self, ty: Ty) -> Option<IntTy> {
    self.with_kind(ty, |k| if let TypeKind::Int(ity) = *k { Some(ity) } else { None })
  }

  /// Whether `ty` is an integer type.
  #[must_use] pub fn is_integer(&self, ty: Ty) -> bool { self.as_int(ty).is_some() }

  /// Whether `ty` is an unsigned integer type.
  #[must_use] pub fn is_unsigned_integer(&self, ty: Ty) -> bool {
    self.as_int(ty).is_some_and(|ity| !ity.signed)
  }

  /// Whether `ty` is a floating point type.
  #[must_use] pub fn is_float(&self, ty: Ty) -> bool {
    self.with_kind(ty, |k| matches!(k, TypeKind::Float(_)))
  }

  /// Whether `ty` is `Bool`.
  #[must_use] pub fn is_boolean(&self, ty: Ty) -> bool { ty == TypeStore::BOOL }

  /// Whether `ty` is `Rune`.
  #[must_use] pub fn is_rune(&self, ty: Ty) -> bool { ty == TypeStore::RUNE }

  /// Whether `ty` is `String`.
  #[must_use] pub fn is_string(&self, ty: Ty) -> bool { ty == TypeStore::STRING }

  /// Whether `ty` is `Unit`.
  #[must_use] pub fn is_unit(&self, ty: Ty) -> bool { ty == TypeStore::UNIT }

  /// Whether `ty` is `Nothing`.
  #[must_use] pub fn is_nothing(&self, ty: Ty) -> bool { ty == TypeStore::NOTHING }

  /// Whether `ty` is a reference type.
  #[must_use] pub fn is_ref(&self, ty: Ty) -> bool {
    self.with_kind(ty, |k| matches!(k, TypeKind::Ref(_)))
  }

  /// The base type of a reference type, or `ty` itself otherwise.
  #[must_use] pub fn deref(&self, ty: Ty) -> Ty {
    self.with_kind(ty, |k| if let TypeKind::Ref(base) = *k { base } else { ty })
  }

  /// Whether `ty` is a VArray type (looking through one level of reference).
  #[must_use] pub fn as_varray(&self, ty: Ty) -> Option<(Ty, u64)> {
    let ty = self.deref(ty);
    self.with_kind(ty, |k| {
      if let TypeKind::VArray { elem, size } = *k { Some((elem, size)) } else { None }
    })
  }

  /// Intern a reference to `base`.
  pub fn mk_ref(&self, base: Ty) -> Ty { self.intern(TypeKind::Ref(base)) }

  /// Intern an integer type.
  pub fn mk_int(&self, ity: IntTy) -> Ty { self.intern(TypeKind::Int(ity)) }

  /// Render `ty` for diagnostics, e.g. `Int8`, `(Int64, Bool)`,
  /// `VArray<Int64, $5>`.
  #[must_use] pub fn to_string(&self, ty: Ty) -> String {
    match self.kind(ty) {
      TypeKind::Unit => "Unit".into(),
      TypeKind::Bool => "Bool".into(),
      TypeKind::Rune => "Rune".into(),
      TypeKind::Nothing => "Nothing".into(),
      TypeKind::Int(ity) => ity.to_string(),
      TypeKind::Float(fw) => fw.to_string(),
      TypeKind::String => "String".into(),
      TypeKind::CString => "CString".into(),
      TypeKind::Tuple(elems) => {
        let inner: Vec<_> = elems.iter().map(|&t| self.to_string(t)).collect();
        format!("({})", inner.join(", "))
      }
      TypeKind::Func { params, ret } => {
        let inner: Vec<_> = params.iter().map(|&t| self.to_string(t)).collect();
        format!("({}) -> {}", inner.join(", "), self.to_string(ret))
      }
      TypeKind::Ref(base) => format!("{}&", self.to_string(base)),
      TypeKind::RawArray { elem, dims } => format!("RawArray<{}>[{dims}]", self.to_string(elem)),
      TypeKind::VArray { elem, size } => format!("VArray<{}, ${size}>", self.to_string(elem)),
      TypeKind::CPointer(base) => format!("CPointer<{}>", self.to_string(base)),
      TypeKind::Class(def, args) | TypeKind::Struct(def, args) | TypeKind::Enum(def, args) => {
        let mut s = format!("Custom-{}", def.0);
        if !args.is_empty() {
          let inner: Vec<_> = args.iter().map(|&t| self.to_string(t)).collect();
          s.push_str(&format!("<{}>", inner.join(", ")));
        }
        s
      }
      TypeKind::Generic(n) => format!("T{n}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn int_ty_bounds() {
    assert_eq!(IntTy::INT8.min_value(), -128);
    assert_eq!(IntTy::INT8.max_value(), 127);
    assert_eq!(IntTy::UINT8.max_value(), 255);
    assert!(IntTy::INT32.contains(i128::from(i32::MAX)));
    assert!(!IntTy::INT32.contains(i128::from(i32::MAX) + 1));
  }

  #[test]
  fn interning_dedups() {
    let types = Types::default();
    let a = types.intern(TypeKind::Tuple(Box::new([TypeStore::INT64, TypeStore::BOOL])));
    let b = types.intern(TypeKind::Tuple(Box::new([TypeStore::INT64, TypeStore::BOOL])));
    assert_eq!(a, b);
    assert_eq!(types.mk_int(IntTy::INT64), TypeStore::INT64);
  }
}
