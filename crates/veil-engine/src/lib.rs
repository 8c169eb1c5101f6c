//! Veil Accessor Synthesis Engine
//!
//! This crate synthesizes accessor types at runtime. Given a target class
//! wrapped in a [`TargetDescriptor`] and a public contract interface whose
//! methods carry role markers, the engine resolves each contract method
//! against the target's members, decides between a direct member access and
//! a pre-resolved invocation handle, emits a typed instruction body per
//! method, defines the batch in an [`IsolatedLoader`] namespace, and
//! instantiates the result as an [`Accessor`].
//!
//! - [`descriptor`] — reflective metadata cache over a wrapped target type
//! - [`signature`] — canonical signature rendering
//! - [`ir`] — accessor instruction IR and its builder
//! - [`loader`] — isolated, lock-guarded definition namespace
//! - [`handles`] — bound invocation handles and the acquisition policy
//! - [`engine`] — per-method planning and type synthesis
//! - [`cache`] — weakly keyed accessor memoization

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod descriptor;
pub mod engine;
pub mod handles;
pub mod ir;
pub mod loader;
pub mod signature;
pub mod synth;

pub use cache::AccessorCache;
pub use descriptor::{FieldAccessor, FieldRef, MemberSignature, MethodRef, TargetDescriptor};
pub use engine::AccessorGenerator;
pub use handles::{HandleProvider, MemberHandle, ReflectionPolicy, RuntimeHandleProvider};
pub use ir::{Inst, IrBuilder, MethodImage, ValidationReport};
pub use loader::IsolatedLoader;
pub use signature::{Signature, SignatureBuilder};
pub use synth::{Accessor, SynthesizedType, TypeImage};

use veil_runtime::RuntimeError;

/// Synthesis and lookup errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// More than one role marker on a contract method
    #[error("conflicting role markers on contract method `{0}`")]
    ConflictingRoles(String),

    /// Contract method shape does not fit its role
    #[error("invalid contract method shape: {0}")]
    InvalidShape(String),

    /// No matching method, field, or constructor on the target
    #[error("member not found: {0}")]
    MemberNotFound(String),

    /// Handle acquisition refused; recovered per-method with a raising stub
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A type of this name is already resolvable in the loader namespace
    #[error("duplicate definition of `{0}`")]
    DuplicateDefinition(String),

    /// Rejected before any generation work began
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The descriptor already carries a bound instance
    #[error("instance already bound to descriptor for `{0}`")]
    AlreadyBound(String),

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A plan needs a bound instance the descriptor does not carry
    #[error("missing bound instance for target `{0}`")]
    MissingInstance(String),

    /// Requested and resolved types disagree after canonicalization
    #[error("type error: {0}")]
    TypeError(String),

    /// A type image failed on-load validation; indicates a generator bug
    #[error("malformed type image: {0}")]
    Malformed(String),

    /// Raised by a stub method or by an accessor body at call time
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Failure surfaced by the object runtime
    #[error(transparent)]
    Object(#[from] RuntimeError),
}

/// Synthesis result
pub type EngineResult<T> = Result<T, EngineError>;
