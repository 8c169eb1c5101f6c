//! Type registry
//!
//! Registers [`TypeDef`]s under process-unique ids and unique names, and
//! answers the ancestry queries the synthesis engine needs. A parent must
//! be registered before its children, so parent ids are always smaller
//! than child ids and ancestor walks terminate.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::object::TypeId;
use crate::typedef::TypeDef;
use crate::{RuntimeError, RuntimeResult};

#[derive(Default)]
struct RegistryInner {
    types: Vec<Arc<TypeDef>>,
    by_name: FxHashMap<Arc<str>, TypeId>,
}

/// Registry of runtime types
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. The callback receives the id the type will get and
    /// returns the finished definition, which lets the definition embed its
    /// own id.
    pub fn register_with(
        &self,
        build: impl FnOnce(TypeId) -> RuntimeResult<TypeDef>,
    ) -> RuntimeResult<Arc<TypeDef>> {
        let mut inner = self.inner.write();
        let id = inner.types.len();
        let def = build(id)?;
        if def.id != id {
            return Err(RuntimeError::Runtime(format!(
                "type `{}` built with id {} but registered as {}",
                def.name, def.id, id
            )));
        }
        if inner.by_name.contains_key(&def.name) {
            return Err(RuntimeError::DuplicateTypeName(def.name.to_string()));
        }
        if let Some(parent) = def.parent {
            if parent >= id {
                return Err(RuntimeError::UnknownType(format!(
                    "parent #{} of `{}`",
                    parent, def.name
                )));
            }
        }
        let def = Arc::new(def);
        inner.by_name.insert(def.name.clone(), id);
        inner.types.push(def.clone());
        tracing::debug!(name = %def.name, id, "registered type");
        Ok(def)
    }

    /// Look up a type by id.
    pub fn get(&self, id: TypeId) -> Option<Arc<TypeDef>> {
        self.inner.read().types.get(id).cloned()
    }

    /// Look up a type by name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<TypeDef>> {
        let inner = self.inner.read();
        let id = *inner.by_name.get(name)?;
        inner.types.get(id).cloned()
    }

    /// Inheritance chain starting at `id`: the type itself first, then its
    /// ancestors up to the root.
    pub fn hierarchy(&self, id: TypeId) -> Vec<Arc<TypeDef>> {
        let inner = self.inner.read();
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            match inner.types.get(id) {
                Some(def) => {
                    chain.push(def.clone());
                    current = def.parent;
                }
                None => break,
            }
        }
        chain
    }

    /// Whether `sub` is `ancestor` or inherits from it.
    pub fn is_descendant(&self, sub: TypeId, ancestor: TypeId) -> bool {
        if sub == ancestor {
            return true;
        }
        let inner = self.inner.read();
        let mut current = inner.types.get(sub).and_then(|d| d.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = inner.types.get(id).and_then(|d| d.parent);
        }
        false
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.inner.read().types.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().types.is_empty()
    }
}
