//! Veil Managed Object Runtime
//!
//! This crate provides the object substrate the synthesis engine reflects
//! over:
//! - Runtime values and object instances
//! - Semantic type signatures with primitive/boxed canonicalization
//! - Member definitions with mutable access attributes
//! - The type registry and the fluent type builder
//! - The explicit access-widening capability

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod access;
pub mod builder;
pub mod member;
pub mod object;
pub mod registry;
pub mod sig;
pub mod typedef;
pub mod value;

pub use access::{AccessWidener, ProcessWidener};
pub use builder::{CtorSpec, FieldSpec, MethodSpec, TypeBuilder};
pub use member::{AccessFlags, CtorDef, CtorFn, FieldDef, MethodBody, MethodDef, NativeFn, RoleMarker};
pub use object::{Instance, InstanceRef, TypeId};
pub use registry::TypeRegistry;
pub use sig::{PrimKind, TypeSig};
pub use typedef::{TypeDef, TypeKind};
pub use value::Value;

/// Object-runtime errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Value or signature mismatch
    #[error("type error: {0}")]
    TypeError(String),

    /// Field slot out of range for the type
    #[error("no field slot {slot} on `{type_name}`")]
    FieldOutOfBounds {
        /// Offending type
        type_name: String,
        /// Requested slot
        slot: usize,
    },

    /// A type with this name is already registered
    #[error("duplicate type name `{0}`")]
    DuplicateTypeName(String),

    /// Referenced type is not registered
    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// Wrong number of arguments
    #[error("arity mismatch: expected {expected}, got {actual}")]
    ArityMismatch {
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// Other runtime failure
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Object-runtime result
pub type RuntimeResult<T> = Result<T, RuntimeError>;
