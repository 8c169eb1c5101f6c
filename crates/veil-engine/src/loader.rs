//! Isolated type loader
//!
//! Each loader owns a private namespace of synthesized types, optionally
//! parented to a fallback namespace that resolution probes consult.
//! Definition is guarded by a per-name lock held only for the duration of
//! define-plus-resolve: if two threads race to define the same name, one
//! wins and the other fails fast with a duplicate-definition error rather
//! than waiting.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::synth::{SynthesizedType, TypeImage};
use crate::{EngineError, EngineResult};

/// Private definition namespace for synthesized types
#[derive(Default)]
pub struct IsolatedLoader {
    parent: Option<Arc<IsolatedLoader>>,
    namespace: RwLock<FxHashMap<Arc<str>, Arc<SynthesizedType>>>,
    name_locks: Mutex<FxHashMap<Arc<str>, Arc<Mutex<()>>>>,
}

impl IsolatedLoader {
    /// Root loader with no parent namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader whose failed lookups fall back to `parent`.
    pub fn with_parent(parent: Arc<IsolatedLoader>) -> Self {
        Self {
            parent: Some(parent),
            namespace: RwLock::default(),
            name_locks: Mutex::default(),
        }
    }

    /// Resolve a type by name, consulting the parent namespace on miss.
    pub fn resolve(&self, name: &str) -> Option<Arc<SynthesizedType>> {
        if let Some(ty) = self.namespace.read().get(name).cloned() {
            return Some(ty);
        }
        self.parent.as_ref().and_then(|p| p.resolve(name))
    }

    /// Whether a type of this name is resolvable.
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Define a synthesized type. At most one definition per name ever
    /// succeeds; every method body is re-audited on load, and the defined
    /// type's reported name must equal the requested one.
    pub fn define(&self, image: TypeImage) -> EngineResult<Arc<SynthesizedType>> {
        let name: Arc<str> = Arc::from(image.name.as_str());
        let lock = {
            let mut locks = self.name_locks.lock();
            locks.entry(name.clone()).or_default().clone()
        };
        let _guard = lock.lock();

        // Failed-lookup probe: already resolvable (here or in the parent)
        // means a duplicate definition.
        if self.resolve(&name).is_some() {
            return Err(EngineError::DuplicateDefinition(name.to_string()));
        }

        let defined = Arc::new(SynthesizedType::from_image(image)?);
        if defined.name() != &*name {
            // Should never fail absent a generator bug
            return Err(EngineError::Malformed(format!(
                "defined type reports name `{}`, requested `{}`",
                defined.name(),
                name
            )));
        }
        self.namespace.write().insert(name.clone(), defined);
        tracing::debug!(name = %name, "defined synthesized type");

        self.resolve(&name).ok_or_else(|| {
            EngineError::Malformed(format!("`{}` not resolvable after definition", name))
        })
    }

    /// Number of types defined in this namespace (parent excluded).
    pub fn len(&self) -> usize {
        self.namespace.read().len()
    }

    /// Whether this namespace is empty (parent excluded).
    pub fn is_empty(&self) -> bool {
        self.namespace.read().is_empty()
    }
}
