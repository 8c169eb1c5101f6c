//! Runtime value representation
//!
//! Values are cheap to clone: scalars are inline, strings and object
//! instances are reference-counted. Object identity is pointer identity.

use std::fmt;
use std::sync::Arc;

use crate::object::InstanceRef;
use crate::sig::{PrimKind, TypeSig};

/// A managed runtime value
#[derive(Clone)]
pub enum Value {
    /// The null reference
    Null,
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Float scalar
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Object instance reference
    Obj(InstanceRef),
}

impl Value {
    /// String value from a `&str`.
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Dynamic type signature of this value. Scalars report their
    /// primitive form; `canonical()` reconciles them with boxed queries.
    pub fn type_sig(&self) -> TypeSig {
        match self {
            Value::Null => TypeSig::Null,
            Value::Bool(_) => TypeSig::Prim(PrimKind::Bool),
            Value::Int(_) => TypeSig::Prim(PrimKind::Int),
            Value::Float(_) => TypeSig::Prim(PrimKind::Float),
            Value::Str(_) => TypeSig::Str,
            Value::Obj(inst) => TypeSig::Named(inst.type_name().clone()),
        }
    }

    /// Whether this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Extract a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Extract a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extract an instance reference.
    pub fn as_obj(&self) -> Option<&InstanceRef> {
        match self {
            Value::Obj(inst) => Some(inst),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Obj(inst) => write!(f, "<{} instance>", inst.type_name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            other => write!(f, "{:?}", other),
        }
    }
}
