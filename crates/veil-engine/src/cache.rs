//! Accessor memoization
//!
//! One generated accessor per (target descriptor, contract) pair. Keys are
//! identity pairs; entries hold weak references to both key components and
//! to the accessor itself, and dead entries are swept on every access, so
//! dropping either the descriptor, the contract, or the accessor makes the
//! entry collectable. Generation is serialized per key by an in-flight
//! guard, so concurrent first requests for the same pair run the expensive
//! path exactly once.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use veil_runtime::{TypeDef, TypeKind};

use crate::descriptor::TargetDescriptor;
use crate::engine::AccessorGenerator;
use crate::synth::Accessor;
use crate::{EngineError, EngineResult};

type CacheKey = (usize, usize);

struct CacheEntry {
    target: Weak<TargetDescriptor>,
    contract: Weak<TypeDef>,
    accessor: Weak<Accessor>,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        self.target.strong_count() > 0
            && self.contract.strong_count() > 0
            && self.accessor.strong_count() > 0
    }
}

/// Weakly keyed memo of generated accessors
pub struct AccessorCache {
    generator: AccessorGenerator,
    entries: Mutex<FxHashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<FxHashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl AccessorCache {
    /// Cache wrapping an existing generator.
    pub fn new(generator: AccessorGenerator) -> Self {
        Self {
            generator,
            entries: Mutex::default(),
            in_flight: Mutex::default(),
        }
    }

    /// The wrapped generator.
    pub fn generator(&self) -> &AccessorGenerator {
        &self.generator
    }

    /// Get or generate the accessor for (descriptor, contract).
    ///
    /// Preconditions, checked before any generation work: the contract is
    /// a public interface and the target type is public.
    pub fn new_instance(
        &self,
        descriptor: &Arc<TargetDescriptor>,
        contract: &Arc<TypeDef>,
    ) -> EngineResult<Arc<Accessor>> {
        if contract.kind != TypeKind::Interface {
            return Err(EngineError::Precondition(format!(
                "contract `{}` is not an interface",
                contract.name
            )));
        }
        if !contract.is_public {
            return Err(EngineError::Precondition(format!(
                "contract `{}` is not public",
                contract.name
            )));
        }
        if !descriptor.target().is_public {
            return Err(EngineError::Precondition(format!(
                "target type `{}` is not public",
                descriptor.target().name
            )));
        }

        let key = (
            Arc::as_ptr(descriptor) as usize,
            Arc::as_ptr(contract) as usize,
        );
        if let Some(hit) = self.lookup(key, descriptor, contract) {
            tracing::trace!(contract = %contract.name, "accessor cache hit");
            return Ok(hit);
        }

        // Serialize generation per key so it runs at most once
        let guard = {
            let mut in_flight = self.in_flight.lock();
            in_flight.entry(key).or_default().clone()
        };
        let result = {
            let _generating = guard.lock();
            if let Some(hit) = self.lookup(key, descriptor, contract) {
                Ok(hit)
            } else {
                let accessor = Arc::new(self.generator.generate(descriptor, contract)?);
                self.entries.lock().insert(
                    key,
                    CacheEntry {
                        target: Arc::downgrade(descriptor),
                        contract: Arc::downgrade(contract),
                        accessor: Arc::downgrade(&accessor),
                    },
                );
                Ok(accessor)
            }
        };
        self.in_flight.lock().remove(&key);
        result
    }

    /// Number of live entries, after a sweep.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.is_live());
        entries.len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(
        &self,
        key: CacheKey,
        descriptor: &Arc<TargetDescriptor>,
        contract: &Arc<TypeDef>,
    ) -> Option<Arc<Accessor>> {
        let mut entries = self.entries.lock();
        // On-access sweep: drop entries whose key components or value died
        entries.retain(|_, e| e.is_live());
        let entry = entries.get(&key)?;
        // Addresses can be reused after deallocation; require the stamps
        // to still point at the queried components
        let target = entry.target.upgrade()?;
        let stamped = entry.contract.upgrade()?;
        if !Arc::ptr_eq(&target, descriptor) || !Arc::ptr_eq(&stamped, contract) {
            return None;
        }
        entry.accessor.upgrade()
    }
}
