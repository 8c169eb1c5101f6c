//! Fluent type declaration
//!
//! [`TypeBuilder`] assembles a [`TypeDef`] and registers it in one step,
//! assigning field slots (instance slots offset past the parent's,
//! static slots counted separately) and materializing the static-field
//! table from declared defaults.
//!
//! ```ignore
//! let counter = TypeBuilder::class("Counter")
//!     .field(FieldSpec::new("count", TypeSig::Prim(PrimKind::Int)).private())
//!     .method(
//!         MethodSpec::new("tick")
//!             .returns(TypeSig::Prim(PrimKind::Int))
//!             .native(|recv, _args| { ... }),
//!     )
//!     .register(&registry)?;
//! ```

use std::sync::Arc;

use crate::member::{
    AccessFlags, CtorDef, CtorFn, FieldDef, MethodBody, MethodDef, NativeFn, RoleMarker,
};
use crate::object::InstanceRef;
use crate::registry::TypeRegistry;
use crate::sig::TypeSig;
use crate::typedef::{TypeDef, TypeKind};
use crate::value::Value;
use crate::{RuntimeError, RuntimeResult};

/// Declaration of a field to be added to a type
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    sig: TypeSig,
    public: bool,
    is_static: bool,
    is_final: bool,
    default: Option<Value>,
}

impl FieldSpec {
    /// Public instance field.
    pub fn new(name: &str, sig: TypeSig) -> Self {
        Self {
            name: name.to_string(),
            sig,
            public: true,
            is_static: false,
            is_final: false,
            default: None,
        }
    }

    /// Mark non-public.
    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    /// Mark static.
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Mark final.
    pub fn as_final(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Set the initial value.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Declaration of a method to be added to a type
#[derive(Clone)]
pub struct MethodSpec {
    name: String,
    params: Vec<TypeSig>,
    ret: TypeSig,
    public: bool,
    is_static: bool,
    markers: Vec<RoleMarker>,
    body: Option<NativeFn>,
}

impl MethodSpec {
    /// Public instance method returning void.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            ret: TypeSig::Void,
            public: true,
            is_static: false,
            markers: Vec::new(),
            body: None,
        }
    }

    /// Append a parameter.
    pub fn param(mut self, sig: TypeSig) -> Self {
        self.params.push(sig);
        self
    }

    /// Set the return signature.
    pub fn returns(mut self, sig: TypeSig) -> Self {
        self.ret = sig;
        self
    }

    /// Mark non-public.
    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    /// Mark static.
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Attach a role marker (contract interfaces).
    pub fn marker(mut self, marker: RoleMarker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Attach the native implementation (class methods).
    pub fn native(
        mut self,
        f: impl Fn(Option<&Value>, &[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.body = Some(Arc::new(f));
        self
    }
}

/// Declaration of a constructor to be added to a class
#[derive(Clone)]
pub struct CtorSpec {
    params: Vec<TypeSig>,
    public: bool,
    init: Option<CtorFn>,
}

impl CtorSpec {
    /// Public zero-argument constructor with no initializer body.
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            public: true,
            init: None,
        }
    }

    /// Append a parameter.
    pub fn param(mut self, sig: TypeSig) -> Self {
        self.params.push(sig);
        self
    }

    /// Mark non-public.
    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    /// Attach the initializer.
    pub fn init(
        mut self,
        f: impl Fn(&InstanceRef, &[Value]) -> RuntimeResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.init = Some(Arc::new(f));
        self
    }
}

impl Default for CtorSpec {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for declaring a class or interface
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    public: bool,
    parent: Option<Arc<TypeDef>>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    ctors: Vec<CtorSpec>,
}

impl TypeBuilder {
    /// Start a class declaration.
    pub fn class(name: &str) -> Self {
        Self::with_kind(name, TypeKind::Class)
    }

    /// Start an interface declaration.
    pub fn interface(name: &str) -> Self {
        Self::with_kind(name, TypeKind::Interface)
    }

    fn with_kind(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            public: true,
            parent: None,
            fields: Vec::new(),
            methods: Vec::new(),
            ctors: Vec::new(),
        }
    }

    /// Mark the type non-public.
    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    /// Set the parent class.
    pub fn extends(mut self, parent: &Arc<TypeDef>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Add a field.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Add a method.
    pub fn method(mut self, spec: MethodSpec) -> Self {
        self.methods.push(spec);
        self
    }

    /// Add a constructor.
    pub fn ctor(mut self, spec: CtorSpec) -> Self {
        self.ctors.push(spec);
        self
    }

    /// Validate the declaration and register it.
    pub fn register(self, registry: &TypeRegistry) -> RuntimeResult<Arc<TypeDef>> {
        if self.kind == TypeKind::Interface {
            if !self.fields.is_empty() {
                return Err(RuntimeError::TypeError(format!(
                    "interface `{}` may not declare fields",
                    self.name
                )));
            }
            if !self.ctors.is_empty() {
                return Err(RuntimeError::TypeError(format!(
                    "interface `{}` may not declare constructors",
                    self.name
                )));
            }
            if self.parent.is_some() {
                return Err(RuntimeError::TypeError(format!(
                    "interface `{}` may not extend a class",
                    self.name
                )));
            }
        }

        let base_slots = self.parent.as_ref().map_or(0, |p| p.instance_slots);
        let mut instance_slot = base_slots;
        let mut static_slot = 0usize;
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut statics = Vec::new();

        for spec in &self.fields {
            if let Some(default) = &spec.default {
                if !spec.sig.accepts(&default.type_sig()) {
                    return Err(RuntimeError::TypeError(format!(
                        "default for field `{}.{}` is not a `{}`",
                        self.name, spec.name, spec.sig
                    )));
                }
            }
            let slot = if spec.is_static {
                statics.push(spec.default.clone().unwrap_or(Value::Null));
                let s = static_slot;
                static_slot += 1;
                s
            } else {
                let s = instance_slot;
                instance_slot += 1;
                s
            };
            fields.push(FieldDef {
                name: Arc::from(spec.name.as_str()),
                sig: spec.sig.clone(),
                access: AccessFlags::new(spec.public, spec.is_static, spec.is_final),
                slot,
                default: spec.default.clone(),
            });
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for spec in self.methods {
            let body = match (self.kind, spec.body) {
                (TypeKind::Interface, None) => MethodBody::Abstract,
                (TypeKind::Interface, Some(_)) => {
                    return Err(RuntimeError::TypeError(format!(
                        "interface method `{}.{}` may not have a body",
                        self.name, spec.name
                    )));
                }
                (TypeKind::Class, Some(f)) => MethodBody::Native(f),
                (TypeKind::Class, None) => {
                    return Err(RuntimeError::TypeError(format!(
                        "class method `{}.{}` has no body",
                        self.name, spec.name
                    )));
                }
            };
            methods.push(MethodDef {
                name: Arc::from(spec.name.as_str()),
                params: spec.params,
                ret: spec.ret,
                access: AccessFlags::new(spec.public, spec.is_static, false),
                markers: spec.markers,
                body,
            });
        }

        let mut ctors = Vec::with_capacity(self.ctors.len());
        for spec in self.ctors {
            let init: CtorFn = spec.init.unwrap_or_else(|| Arc::new(|_, _| Ok(())));
            ctors.push(CtorDef {
                params: spec.params,
                access: AccessFlags::new(spec.public, false, false),
                init,
            });
        }

        let parent_id = self.parent.as_ref().map(|p| p.id);
        registry.register_with(move |id| {
            Ok(TypeDef::new(
                id,
                Arc::from(self.name.as_str()),
                self.kind,
                self.public,
                parent_id,
                instance_slot,
                fields,
                methods,
                ctors,
                statics,
            ))
        })
    }
}
