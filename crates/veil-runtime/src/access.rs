//! Access widening capability
//!
//! Widening a member's visibility (and stripping a field's finality) is a
//! global, irreversible, process-wide side effect. Rather than leaving it
//! an ambient mutation, the capability is explicit: everything that widens
//! goes through an [`AccessWidener`], so embedders can observe or veto it.
//! Both operations are idempotent and safe under concurrent first use.

use crate::member::AccessFlags;

/// Capability to permanently widen member access
pub trait AccessWidener: Send + Sync {
    /// Make the member public for the rest of the process lifetime.
    fn widen(&self, flags: &AccessFlags);

    /// Strip the member's final attribute for the rest of the process
    /// lifetime.
    fn strip_final(&self, flags: &AccessFlags);
}

/// Default widener: applies the mutation directly.
#[derive(Debug, Default)]
pub struct ProcessWidener;

impl AccessWidener for ProcessWidener {
    fn widen(&self, flags: &AccessFlags) {
        if !flags.is_public() {
            flags.widen();
        }
    }

    fn strip_final(&self, flags: &AccessFlags) {
        if flags.is_final() {
            flags.strip_final();
        }
    }
}
