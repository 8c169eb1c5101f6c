//! Reflective metadata cache
//!
//! A [`TargetDescriptor`] wraps one target type and indexes its declared
//! methods and fields by canonical [`MemberSignature`] — one scan at wrap
//! time, O(1) lookups afterwards. Signature keys canonicalize scalar forms,
//! so a field declared `int` is found whether the caller asks with the
//! primitive or the boxed spelling. Lookups that miss the index fall back
//! to a linear scan of the wrapped type and its ancestor chain
//! (most-derived first, first match wins) and cache the result.
//!
//! The descriptor holds at most one bound instance, set exactly once.
//! Members discovered non-public are widened permanently through the
//! injected [`AccessWidener`] on first access.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use veil_runtime::{
    AccessWidener, MethodBody, ProcessWidener, TypeDef, TypeRegistry, TypeSig, Value,
};

use crate::signature::SignatureBuilder;
use crate::{EngineError, EngineResult};

/// Cache key: member name plus canonicalized return/field and parameter
/// signatures. Two keys are equal iff the name and every canonical
/// signature match, which makes primitive and boxed queries collide onto
/// the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberSignature {
    name: Arc<str>,
    ret: TypeSig,
    params: Vec<TypeSig>,
}

impl MemberSignature {
    /// Key for a field: the field signature in return position, no
    /// parameters.
    pub fn field(name: &str, sig: &TypeSig) -> Self {
        Self {
            name: Arc::from(name),
            ret: sig.canonical(),
            params: Vec::new(),
        }
    }

    /// Key for a method.
    pub fn method(name: &str, ret: &TypeSig, params: &[TypeSig]) -> Self {
        Self {
            name: Arc::from(name),
            ret: ret.canonical(),
            params: params.iter().map(TypeSig::canonical).collect(),
        }
    }

    /// Member name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Reference to a declared method: owning type plus index into its
/// declared-method table.
#[derive(Debug, Clone)]
pub struct MethodRef {
    /// Declaring type
    pub owner: Arc<TypeDef>,
    /// Index into `owner.methods`
    pub index: usize,
}

impl MethodRef {
    /// The referenced definition.
    pub fn def(&self) -> &veil_runtime::MethodDef {
        &self.owner.methods[self.index]
    }

    /// Human-readable description for diagnostics.
    pub fn describe(&self) -> String {
        let def = self.def();
        format!(
            "method `{}.{}{}`",
            self.owner.name,
            def.name,
            SignatureBuilder::new()
                .accept_all(&def.params)
                .returns(def.ret.clone())
                .build()
        )
    }
}

/// Reference to a declared field: owning type plus index into its
/// declared-field table.
#[derive(Debug, Clone)]
pub struct FieldRef {
    /// Declaring type
    pub owner: Arc<TypeDef>,
    /// Index into `owner.fields`
    pub index: usize,
}

impl FieldRef {
    /// The referenced definition.
    pub fn def(&self) -> &veil_runtime::FieldDef {
        &self.owner.fields[self.index]
    }

    /// Human-readable description for diagnostics.
    pub fn describe(&self) -> String {
        let def = self.def();
        format!("field `{}.{}: {}`", self.owner.name, def.name, def.sig)
    }
}

/// Read a field through a resolved reference. Static fields read the
/// owner's static table; instance fields require an object receiver.
pub(crate) fn read_field(field: &FieldRef, recv: Option<&Value>) -> EngineResult<Value> {
    let def = field.def();
    if def.access.is_static() {
        field.owner.static_value(def.slot).ok_or_else(|| {
            EngineError::InvalidState(format!("static slot missing for {}", field.describe()))
        })
    } else {
        let recv = recv.ok_or_else(|| {
            EngineError::InvalidState(format!("no receiver for instance {}", field.describe()))
        })?;
        let inst = recv.as_obj().ok_or_else(|| {
            EngineError::TypeError(format!("receiver for {} is not an object", field.describe()))
        })?;
        inst.get_field(def.slot).ok_or_else(|| {
            EngineError::InvalidState(format!("slot missing for {}", field.describe()))
        })
    }
}

/// Write a field through a resolved reference. Rejects values of the wrong
/// type and fields whose final attribute has not been stripped.
pub(crate) fn write_field(field: &FieldRef, recv: Option<&Value>, value: Value) -> EngineResult<()> {
    let def = field.def();
    if !def.sig.accepts(&value.type_sig()) {
        return Err(EngineError::TypeError(format!(
            "cannot store `{}` into {}",
            value.type_sig(),
            field.describe()
        )));
    }
    if def.access.is_final() {
        return Err(EngineError::InvalidState(format!(
            "{} is final",
            field.describe()
        )));
    }
    if def.access.is_static() {
        field.owner.set_static(def.slot, value)?;
        Ok(())
    } else {
        let recv = recv.ok_or_else(|| {
            EngineError::InvalidState(format!("no receiver for instance {}", field.describe()))
        })?;
        let inst = recv.as_obj().ok_or_else(|| {
            EngineError::TypeError(format!("receiver for {} is not an object", field.describe()))
        })?;
        inst.set_field(def.slot, value)?;
        Ok(())
    }
}

/// Memoized accessor object for one resolved field
#[derive(Debug, Clone)]
pub struct FieldAccessor {
    field: FieldRef,
}

impl FieldAccessor {
    fn new(field: FieldRef) -> Self {
        Self { field }
    }

    /// The resolved field.
    pub fn field(&self) -> &FieldRef {
        &self.field
    }

    /// Read the field; `recv` is ignored for static fields.
    pub fn read(&self, recv: Option<&Value>) -> EngineResult<Value> {
        read_field(&self.field, recv)
    }

    /// Write the field; `recv` is ignored for static fields.
    pub fn write(&self, recv: Option<&Value>, value: Value) -> EngineResult<()> {
        write_field(&self.field, recv, value)
    }
}

/// Reflective metadata cache over one wrapped target type
pub struct TargetDescriptor {
    registry: Arc<TypeRegistry>,
    target: Arc<TypeDef>,
    widener: Arc<dyn AccessWidener>,
    methods: DashMap<MemberSignature, MethodRef>,
    fields: DashMap<MemberSignature, FieldRef>,
    accessors: DashMap<MemberSignature, Arc<FieldAccessor>>,
    instance: OnceCell<Value>,
}

impl TargetDescriptor {
    /// Wrap `target`, scanning its declared members once.
    pub fn wrap(registry: Arc<TypeRegistry>, target: Arc<TypeDef>) -> Arc<Self> {
        Self::wrap_with_widener(registry, target, Arc::new(ProcessWidener))
    }

    /// Wrap with an explicit widening capability.
    pub fn wrap_with_widener(
        registry: Arc<TypeRegistry>,
        target: Arc<TypeDef>,
        widener: Arc<dyn AccessWidener>,
    ) -> Arc<Self> {
        let methods = DashMap::new();
        let fields = DashMap::new();
        for (index, def) in target.fields.iter().enumerate() {
            fields.insert(
                MemberSignature::field(&def.name, &def.sig),
                FieldRef {
                    owner: target.clone(),
                    index,
                },
            );
        }
        for (index, def) in target.methods.iter().enumerate() {
            methods.insert(
                MemberSignature::method(&def.name, &def.ret, &def.params),
                MethodRef {
                    owner: target.clone(),
                    index,
                },
            );
        }
        tracing::debug!(target_type = %target.name, "wrapped target type");
        Arc::new(Self {
            registry,
            target,
            widener,
            methods,
            fields,
            accessors: DashMap::new(),
            instance: OnceCell::new(),
        })
    }

    /// The wrapped type.
    pub fn target(&self) -> &Arc<TypeDef> {
        &self.target
    }

    /// The registry the descriptor resolves ancestors against.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Bind the instance the descriptor operates on. Fails if one is
    /// already bound or if the value is not an instance of the target type.
    pub fn bind_instance(&self, value: Value) -> EngineResult<()> {
        let inst = value.as_obj().ok_or_else(|| {
            EngineError::TypeError(format!(
                "bound instance for `{}` must be an object",
                self.target.name
            ))
        })?;
        if !self.registry.is_descendant(inst.type_id(), self.target.id) {
            return Err(EngineError::TypeError(format!(
                "cannot bind `{}` instance to descriptor for `{}`",
                inst.type_name(),
                self.target.name
            )));
        }
        self.instance
            .set(value)
            .map_err(|_| EngineError::AlreadyBound(self.target.name.to_string()))
    }

    /// The bound instance, if any.
    pub fn bound_instance(&self) -> Option<&Value> {
        self.instance.get()
    }

    /// Look up a field by name and signature (primitive or boxed form).
    /// Returns the memoized accessor object for it, or `None` if no such
    /// field exists on the target or its ancestors.
    pub fn get_field(&self, name: &str, sig: &TypeSig) -> Option<Arc<FieldAccessor>> {
        let key = MemberSignature::field(name, sig);
        if let Some(acc) = self.accessors.get(&key) {
            return Some(acc.clone());
        }
        let fref = match self.fields.get(&key) {
            Some(r) => r.clone(),
            None => {
                let r = self.scan_field(name, sig)?;
                self.fields.insert(key.clone(), r.clone());
                r
            }
        };
        if !fref.def().access.is_public() {
            self.widener.widen(&fref.def().access);
        }
        let acc = self
            .accessors
            .entry(key)
            .or_insert_with(|| Arc::new(FieldAccessor::new(fref)))
            .clone();
        Some(acc)
    }

    /// Invoke a method by name and expected return signature, with
    /// parameter signatures derived from the argument values.
    pub fn invoke_method(
        &self,
        name: &str,
        ret: &TypeSig,
        args: &[Value],
    ) -> EngineResult<Value> {
        let param_sigs: Vec<TypeSig> = args.iter().map(Value::type_sig).collect();
        let key = MemberSignature::method(name, ret, &param_sigs);
        let mref = match self.methods.get(&key) {
            Some(r) => r.clone(),
            None => {
                let r = self.scan_method(name, &param_sigs).ok_or_else(|| {
                    EngineError::MemberNotFound(format!(
                        "method `{}.{}{}`",
                        self.target.name,
                        name,
                        SignatureBuilder::new()
                            .accept_all(&param_sigs)
                            .returns(ret.clone())
                            .build()
                    ))
                })?;
                if r.def().ret.canonical() == ret.canonical() {
                    self.methods.insert(key, r.clone());
                }
                r
            }
        };
        let def = mref.def();
        if def.ret.canonical() != ret.canonical() {
            return Err(EngineError::TypeError(format!(
                "{} returns `{}`, not `{}`",
                mref.describe(),
                def.ret,
                ret
            )));
        }
        if !def.access.is_public() {
            self.widener.widen(&def.access);
        }
        let body = match &def.body {
            MethodBody::Native(f) => f.clone(),
            MethodBody::Abstract => {
                return Err(EngineError::InvalidState(format!(
                    "{} is abstract",
                    mref.describe()
                )));
            }
        };
        if def.access.is_static() {
            Ok(body(None, args)?)
        } else {
            let recv = self.instance.get().ok_or_else(|| {
                EngineError::InvalidState(format!(
                    "no bound instance for non-static {}",
                    mref.describe()
                ))
            })?;
            Ok(body(Some(recv), args)?)
        }
    }

    /// Construct an instance of the target type and bind it to this
    /// descriptor. Fails if an instance is already bound or no constructor
    /// matches the argument types.
    pub fn construct(&self, args: &[Value]) -> EngineResult<Value> {
        if self.instance.get().is_some() {
            return Err(EngineError::AlreadyBound(self.target.name.to_string()));
        }
        let param_sigs: Vec<TypeSig> = args.iter().map(Value::type_sig).collect();
        let index = self
            .target
            .ctors
            .iter()
            .position(|c| {
                c.params.len() == args.len()
                    && c.params.iter().zip(&param_sigs).all(|(p, a)| p.accepts(a))
            })
            .ok_or_else(|| {
                EngineError::MemberNotFound(format!(
                    "constructor `{}{}`",
                    self.target.name,
                    SignatureBuilder::new().accept_all(&param_sigs).build()
                ))
            })?;
        let access = &self.target.ctors[index].access;
        if !access.is_public() {
            self.widener.widen(access);
        }
        let value = self.target.construct(index, args)?;
        self.instance
            .set(value.clone())
            .map_err(|_| EngineError::AlreadyBound(self.target.name.to_string()))?;
        Ok(value)
    }

    fn scan_field(&self, name: &str, sig: &TypeSig) -> Option<FieldRef> {
        for ty in self.registry.hierarchy(self.target.id) {
            for (index, def) in ty.fields.iter().enumerate() {
                if &*def.name == name && def.sig.canonical() == sig.canonical() {
                    return Some(FieldRef {
                        owner: ty.clone(),
                        index,
                    });
                }
            }
        }
        None
    }

    fn scan_method(&self, name: &str, arg_sigs: &[TypeSig]) -> Option<MethodRef> {
        for ty in self.registry.hierarchy(self.target.id) {
            for (index, def) in ty.methods.iter().enumerate() {
                if &*def.name == name
                    && def.params.len() == arg_sigs.len()
                    && def.params.iter().zip(arg_sigs).all(|(p, a)| p.accepts(a))
                {
                    return Some(MethodRef {
                        owner: ty.clone(),
                        index,
                    });
                }
            }
        }
        None
    }
}
