//! Type definitions
//!
//! A [`TypeDef`] is the runtime description of a class or interface: its
//! declared fields, methods, and constructors, plus the static-field table.
//! Definitions are immutable once registered, except for the access
//! attributes on members (see [`crate::member::AccessFlags`]) and the
//! static-field values.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::member::{CtorDef, FieldDef, MethodDef};
use crate::object::{Instance, InstanceRef, TypeId};
use crate::sig::TypeSig;
use crate::value::Value;
use crate::{RuntimeError, RuntimeResult};

/// Kind of a registered type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Concrete class with state and native method bodies
    Class,
    /// Capability contract: abstract methods, optionally role-marked
    Interface,
}

/// Runtime description of a class or interface
#[derive(Debug)]
pub struct TypeDef {
    /// Unique id assigned at registration
    pub id: TypeId,
    /// Type name, unique within a registry
    pub name: Arc<str>,
    /// Class or interface
    pub kind: TypeKind,
    /// Whether the type itself is public
    pub is_public: bool,
    /// Parent type id, if any
    pub parent: Option<TypeId>,
    /// Total instance slots including inherited ones
    pub instance_slots: usize,
    /// Declared fields (not inherited ones)
    pub fields: Vec<FieldDef>,
    /// Declared methods
    pub methods: Vec<MethodDef>,
    /// Declared constructors
    pub ctors: Vec<CtorDef>,
    statics: Mutex<Vec<Value>>,
}

impl TypeDef {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TypeId,
        name: Arc<str>,
        kind: TypeKind,
        is_public: bool,
        parent: Option<TypeId>,
        instance_slots: usize,
        fields: Vec<FieldDef>,
        methods: Vec<MethodDef>,
        ctors: Vec<CtorDef>,
        statics: Vec<Value>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            is_public,
            parent,
            instance_slots,
            fields,
            methods,
            ctors,
            statics: Mutex::new(statics),
        }
    }

    /// Find a declared field by name.
    pub fn declared_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Find the first declared method with the given name.
    pub fn declared_method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| &*m.name == name)
    }

    /// Find a declared constructor whose parameter list matches `params`
    /// exactly after canonicalization. Returns its index.
    pub fn ctor_matching(&self, params: &[TypeSig]) -> Option<usize> {
        self.ctors.iter().position(|c| {
            c.params.len() == params.len()
                && c.params
                    .iter()
                    .zip(params)
                    .all(|(a, b)| a.canonical() == b.canonical())
        })
    }

    /// Number of static-field slots.
    pub fn static_count(&self) -> usize {
        self.statics.lock().len()
    }

    /// Read a static-field slot.
    pub fn static_value(&self, slot: usize) -> Option<Value> {
        self.statics.lock().get(slot).cloned()
    }

    /// Write a static-field slot.
    pub fn set_static(&self, slot: usize, value: Value) -> RuntimeResult<()> {
        let mut statics = self.statics.lock();
        if slot < statics.len() {
            statics[slot] = value;
            Ok(())
        } else {
            Err(RuntimeError::FieldOutOfBounds {
                type_name: self.name.to_string(),
                slot,
            })
        }
    }

    /// Allocate an instance and apply this type's declared field defaults.
    /// Defaults declared by ancestors are the constructor's concern.
    pub fn instantiate_raw(self: &Arc<Self>) -> InstanceRef {
        let inst = Arc::new(Instance::new(
            self.id,
            self.name.clone(),
            self.instance_slots,
        ));
        for field in &self.fields {
            if field.access.is_static() {
                continue;
            }
            if let Some(default) = &field.default {
                // Slot is in range by construction
                let _ = inst.set_field(field.slot, default.clone());
            }
        }
        inst
    }

    /// Allocate an instance and run the indexed constructor over it.
    pub fn construct(self: &Arc<Self>, ctor_index: usize, args: &[Value]) -> RuntimeResult<Value> {
        let ctor = self.ctors.get(ctor_index).ok_or_else(|| {
            RuntimeError::Runtime(format!(
                "no constructor #{} on `{}`",
                ctor_index, self.name
            ))
        })?;
        if args.len() != ctor.params.len() {
            return Err(RuntimeError::ArityMismatch {
                expected: ctor.params.len(),
                actual: args.len(),
            });
        }
        let inst = self.instantiate_raw();
        (ctor.init)(&inst, args)?;
        Ok(Value::Obj(inst))
    }
}
