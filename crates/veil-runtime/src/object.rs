//! Object instances
//!
//! An [`Instance`] is a slot-indexed field vector tagged with the id and
//! name of its defining type. Slot numbering is absolute across the
//! inheritance chain (ancestor slots first), so a field resolved on an
//! ancestor type reads the right slot on a descendant instance.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::Value;
use crate::{RuntimeError, RuntimeResult};

/// Unique id of a registered type
pub type TypeId = usize;

/// A heap object: field slots plus the identity of its type
#[derive(Debug)]
pub struct Instance {
    type_id: TypeId,
    type_name: Arc<str>,
    fields: Mutex<Vec<Value>>,
}

/// Shared reference to an instance
pub type InstanceRef = Arc<Instance>;

impl Instance {
    /// Create an instance with `field_count` null-initialized slots.
    pub fn new(type_id: TypeId, type_name: Arc<str>, field_count: usize) -> Self {
        Self {
            type_id,
            type_name,
            fields: Mutex::new(vec![Value::Null; field_count]),
        }
    }

    /// Id of the defining type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the defining type.
    pub fn type_name(&self) -> &Arc<str> {
        &self.type_name
    }

    /// Read a field slot.
    pub fn get_field(&self, slot: usize) -> Option<Value> {
        self.fields.lock().get(slot).cloned()
    }

    /// Write a field slot.
    pub fn set_field(&self, slot: usize, value: Value) -> RuntimeResult<()> {
        let mut fields = self.fields.lock();
        if slot < fields.len() {
            fields[slot] = value;
            Ok(())
        } else {
            Err(RuntimeError::FieldOutOfBounds {
                type_name: self.type_name.to_string(),
                slot,
            })
        }
    }

    /// Number of field slots.
    pub fn field_count(&self) -> usize {
        self.fields.lock().len()
    }
}
