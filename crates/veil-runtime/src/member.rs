//! Member definitions
//!
//! Fields, methods, and constructors declared on a [`crate::TypeDef`].
//! Access attributes live in [`AccessFlags`], whose visibility and finality
//! bits are atomics: widening a member or stripping its finality is a
//! permanent, process-wide store with no rollback. Concurrent first-time
//! widening of the same member is racy but idempotent.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::object::InstanceRef;
use crate::sig::TypeSig;
use crate::value::Value;
use crate::RuntimeResult;

/// Access attributes of a member
#[derive(Debug)]
pub struct AccessFlags {
    public: AtomicBool,
    final_flag: AtomicBool,
    static_flag: bool,
}

impl AccessFlags {
    /// Flags with explicit attribute values.
    pub fn new(public: bool, is_static: bool, is_final: bool) -> Self {
        Self {
            public: AtomicBool::new(public),
            final_flag: AtomicBool::new(is_final),
            static_flag: is_static,
        }
    }

    /// Public, non-static, non-final.
    pub fn public() -> Self {
        Self::new(true, false, false)
    }

    /// Non-public, non-static, non-final.
    pub fn private() -> Self {
        Self::new(false, false, false)
    }

    /// Current visibility.
    pub fn is_public(&self) -> bool {
        self.public.load(Ordering::Relaxed)
    }

    /// Whether the member is static.
    pub fn is_static(&self) -> bool {
        self.static_flag
    }

    /// Current finality.
    pub fn is_final(&self) -> bool {
        self.final_flag.load(Ordering::Relaxed)
    }

    /// Mark the member public. Irreversible for the process lifetime.
    pub fn widen(&self) {
        self.public.store(true, Ordering::Relaxed);
    }

    /// Strip the final attribute. Irreversible for the process lifetime.
    pub fn strip_final(&self) {
        self.final_flag.store(false, Ordering::Relaxed);
    }
}

impl Clone for AccessFlags {
    fn clone(&self) -> Self {
        Self::new(self.is_public(), self.is_static(), self.is_final())
    }
}

/// Native implementation of a class method: receives the receiver (None for
/// static methods) and the argument slice.
pub type NativeFn = Arc<dyn Fn(Option<&Value>, &[Value]) -> RuntimeResult<Value> + Send + Sync>;

/// Constructor initializer: receives the freshly allocated instance and the
/// argument slice.
pub type CtorFn = Arc<dyn Fn(&InstanceRef, &[Value]) -> RuntimeResult<()> + Send + Sync>;

/// Method implementation
#[derive(Clone)]
pub enum MethodBody {
    /// No implementation (interface methods)
    Abstract,
    /// Native implementation (class methods)
    Native(NativeFn),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Abstract => write!(f, "Abstract"),
            MethodBody::Native(_) => write!(f, "Native(..)"),
        }
    }
}

/// Declarative role marker on a contract-interface method
///
/// At most one marker may apply to a method; conflicting combinations are a
/// configuration error caught at generation time. A method with no marker
/// defaults to target-method-by-same-name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleMarker {
    /// Read the named field of the target type
    FieldGetter {
        /// Target field name
        field: Arc<str>,
    },
    /// Write the named field of the target type
    FieldSetter {
        /// Target field name
        field: Arc<str>,
        /// Field signature override; defaults to the parameter signature
        sig: Option<TypeSig>,
    },
    /// Call a method of the target type
    TargetMethod {
        /// Name override; defaults to the contract method's own name
        name: Option<Arc<str>>,
    },
    /// Call a constructor of the target type
    TargetConstructor,
}

impl RoleMarker {
    /// Getter marker for `field`.
    pub fn getter(field: &str) -> Self {
        RoleMarker::FieldGetter {
            field: Arc::from(field),
        }
    }

    /// Setter marker for `field`.
    pub fn setter(field: &str) -> Self {
        RoleMarker::FieldSetter {
            field: Arc::from(field),
            sig: None,
        }
    }

    /// Setter marker for `field` with an explicit field signature.
    pub fn setter_with_sig(field: &str, sig: TypeSig) -> Self {
        RoleMarker::FieldSetter {
            field: Arc::from(field),
            sig: Some(sig),
        }
    }

    /// Method marker delegating to `name` on the target.
    pub fn method(name: &str) -> Self {
        RoleMarker::TargetMethod {
            name: Some(Arc::from(name)),
        }
    }

    /// Constructor marker.
    pub fn constructor() -> Self {
        RoleMarker::TargetConstructor
    }
}

/// A declared field
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name
    pub name: Arc<str>,
    /// Field signature
    pub sig: TypeSig,
    /// Access attributes
    pub access: AccessFlags,
    /// Slot index: absolute instance slot, or static-table slot
    pub slot: usize,
    /// Initial value applied at construction (instance) or registration
    /// (static)
    pub default: Option<Value>,
}

/// A declared method
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Method name
    pub name: Arc<str>,
    /// Parameter signatures
    pub params: Vec<TypeSig>,
    /// Return signature
    pub ret: TypeSig,
    /// Access attributes
    pub access: AccessFlags,
    /// Role markers (contract interfaces only)
    pub markers: Vec<RoleMarker>,
    /// Implementation
    pub body: MethodBody,
}

/// A declared constructor
#[derive(Clone)]
pub struct CtorDef {
    /// Parameter signatures
    pub params: Vec<TypeSig>,
    /// Access attributes
    pub access: AccessFlags,
    /// Initializer
    pub init: CtorFn,
}

impl fmt::Debug for CtorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtorDef")
            .field("params", &self.params)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}
