//! Semantic type signatures
//!
//! Members and contract methods are described by [`TypeSig`] values rather
//! than host types. Scalar signatures come in two interchangeable spellings:
//! the primitive form (`int`) and the boxed object form (`Int`). Every cache
//! key and every resolution comparison goes through [`TypeSig::canonical`],
//! which maps the primitive form onto the boxed one, so callers may query
//! with either spelling and reach the same member.

use std::fmt;
use std::sync::Arc;

/// Scalar kinds that exist in both primitive and boxed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimKind {
    /// Boolean scalar
    Bool,
    /// 64-bit integer scalar
    Int,
    /// 64-bit float scalar
    Float,
}

impl PrimKind {
    /// Primitive spelling (`bool`, `int`, `float`)
    pub const fn name(self) -> &'static str {
        match self {
            PrimKind::Bool => "bool",
            PrimKind::Int => "int",
            PrimKind::Float => "float",
        }
    }

    /// Boxed spelling (`Bool`, `Int`, `Float`)
    pub const fn boxed_name(self) -> &'static str {
        match self {
            PrimKind::Bool => "Bool",
            PrimKind::Int => "Int",
            PrimKind::Float => "Float",
        }
    }
}

/// A semantic type signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// No value (method return position only)
    Void,
    /// The dynamic type of the `null` value
    Null,
    /// Primitive scalar form
    Prim(PrimKind),
    /// Boxed scalar form
    Boxed(PrimKind),
    /// String
    Str,
    /// A named runtime type (class or interface)
    Named(Arc<str>),
}

impl TypeSig {
    /// Signature naming a runtime type.
    pub fn named(name: &str) -> Self {
        TypeSig::Named(Arc::from(name))
    }

    /// Canonical form: primitive scalars collapse onto their boxed
    /// equivalent, everything else is unchanged.
    pub fn canonical(&self) -> TypeSig {
        match self {
            TypeSig::Prim(p) => TypeSig::Boxed(*p),
            other => other.clone(),
        }
    }

    /// Whether this is the void signature.
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// Whether the canonical form is a reference form (boxed scalar,
    /// string, or named type). `null` is assignable to reference forms.
    pub fn is_reference(&self) -> bool {
        matches!(
            self.canonical(),
            TypeSig::Boxed(_) | TypeSig::Str | TypeSig::Named(_)
        )
    }

    /// Whether a value of dynamic signature `value_sig` is acceptable where
    /// this signature is expected, after canonicalization.
    pub fn accepts(&self, value_sig: &TypeSig) -> bool {
        if matches!(value_sig, TypeSig::Null) {
            return self.is_reference();
        }
        self.canonical() == value_sig.canonical()
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => write!(f, "void"),
            TypeSig::Null => write!(f, "null"),
            TypeSig::Prim(p) => write!(f, "{}", p.name()),
            TypeSig::Boxed(p) => write!(f, "{}", p.boxed_name()),
            TypeSig::Str => write!(f, "str"),
            TypeSig::Named(name) => write!(f, "{}", name),
        }
    }
}
