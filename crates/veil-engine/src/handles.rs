//! Bound invocation handles
//!
//! A [`MemberHandle`] is a pre-resolved callable/readable/writable handle
//! to one member, used by synthesized methods whenever the member cannot be
//! reached by a direct access (non-public, or a final field). Acquisition
//! goes through a [`HandleProvider`]; the default provider enforces a
//! [`ReflectionPolicy`] and widens the member on grant. A denied
//! acquisition is recoverable at single-method granularity — the engine
//! emits a raising stub for that contract method and keeps going.

use std::sync::Arc;

use veil_runtime::{AccessWidener, MethodBody, ProcessWidener, RuntimeError, TypeDef, Value};

use crate::descriptor::{read_field, write_field, FieldRef, MethodRef};
use crate::{EngineError, EngineResult};

/// Grants controlling which non-public members handles may be acquired for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReflectionPolicy(u8);

impl ReflectionPolicy {
    /// No non-public access
    pub const NONE: Self = Self(0x00);
    /// Read non-public fields
    pub const READ_PRIVATE: Self = Self(0x01);
    /// Write non-public fields
    pub const WRITE_PRIVATE: Self = Self(0x02);
    /// Invoke non-public methods
    pub const INVOKE_PRIVATE: Self = Self(0x04);
    /// Call non-public constructors
    pub const CONSTRUCT_PRIVATE: Self = Self(0x08);
    /// Everything
    pub const ALL: Self = Self(0x0F);

    /// Policy from raw bits.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Whether every grant in `other` is present.
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of grants.
    pub const fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Grants in `self` but not `other`.
    pub const fn difference(&self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// A pre-resolved handle to one target member
#[derive(Debug, Clone)]
pub enum MemberHandle {
    /// Invoke a resolved method
    Method(MethodRef),
    /// Read a resolved field
    FieldRead(FieldRef),
    /// Write a resolved field
    FieldWrite(FieldRef),
    /// Call a resolved constructor
    Ctor {
        /// Declaring type
        owner: Arc<TypeDef>,
        /// Index into `owner.ctors`
        index: usize,
    },
}

impl MemberHandle {
    /// Invoke the handle. `recv` is required for instance members; field
    /// writes take the value as the single argument and return null.
    pub fn invoke(&self, recv: Option<&Value>, args: &[Value]) -> EngineResult<Value> {
        match self {
            MemberHandle::Method(m) => {
                let def = m.def();
                if args.len() != def.params.len() {
                    return Err(RuntimeError::ArityMismatch {
                        expected: def.params.len(),
                        actual: args.len(),
                    }
                    .into());
                }
                let body = match &def.body {
                    MethodBody::Native(f) => f.clone(),
                    MethodBody::Abstract => {
                        return Err(EngineError::InvalidState(format!(
                            "{} is abstract",
                            m.describe()
                        )));
                    }
                };
                if def.access.is_static() {
                    Ok(body(None, args)?)
                } else {
                    let recv = recv.ok_or_else(|| {
                        EngineError::InvalidState(format!("no receiver for {}", m.describe()))
                    })?;
                    Ok(body(Some(recv), args)?)
                }
            }
            MemberHandle::FieldRead(f) => read_field(f, recv),
            MemberHandle::FieldWrite(f) => {
                if args.len() != 1 {
                    return Err(RuntimeError::ArityMismatch {
                        expected: 1,
                        actual: args.len(),
                    }
                    .into());
                }
                write_field(f, recv, args[0].clone())?;
                Ok(Value::Null)
            }
            MemberHandle::Ctor { owner, index } => Ok(owner.construct(*index, args)?),
        }
    }

    /// Human-readable description for diagnostics and stub messages.
    pub fn describe(&self) -> String {
        match self {
            MemberHandle::Method(m) => m.describe(),
            MemberHandle::FieldRead(f) => format!("read of {}", f.describe()),
            MemberHandle::FieldWrite(f) => format!("write of {}", f.describe()),
            MemberHandle::Ctor { owner, index } => {
                format!("constructor #{} of `{}`", index, owner.name)
            }
        }
    }
}

/// Boundary contract: produce handles for members the generated code
/// cannot reach directly. Denial must be reported as
/// [`EngineError::AccessDenied`], which the engine treats as recoverable.
pub trait HandleProvider: Send + Sync {
    /// Handle invoking `method`.
    fn method_handle(&self, method: &MethodRef) -> EngineResult<MemberHandle>;
    /// Handle reading `field`.
    fn field_read_handle(&self, field: &FieldRef) -> EngineResult<MemberHandle>;
    /// Handle writing `field`.
    fn field_write_handle(&self, field: &FieldRef) -> EngineResult<MemberHandle>;
    /// Handle calling constructor `index` of `owner`.
    fn ctor_handle(&self, owner: &Arc<TypeDef>, index: usize) -> EngineResult<MemberHandle>;
}

/// Default provider: enforces a [`ReflectionPolicy`] and widens members on
/// grant. Public members never need a grant; a public-but-final field
/// write handle is always grantable, since finality is a mutability
/// attribute rather than a visibility one.
pub struct RuntimeHandleProvider {
    policy: ReflectionPolicy,
    widener: Arc<dyn AccessWidener>,
}

impl RuntimeHandleProvider {
    /// Provider with the given policy and the default widener.
    pub fn new(policy: ReflectionPolicy) -> Self {
        Self::with_widener(policy, Arc::new(ProcessWidener))
    }

    /// Provider with an explicit widening capability.
    pub fn with_widener(policy: ReflectionPolicy, widener: Arc<dyn AccessWidener>) -> Self {
        Self { policy, widener }
    }

    /// Provider granting everything.
    pub fn allowing_all() -> Self {
        Self::new(ReflectionPolicy::ALL)
    }

    fn require(
        &self,
        grant: ReflectionPolicy,
        describe: impl FnOnce() -> String,
    ) -> EngineResult<()> {
        if self.policy.contains(grant) {
            Ok(())
        } else {
            Err(EngineError::AccessDenied(describe()))
        }
    }
}

impl HandleProvider for RuntimeHandleProvider {
    fn method_handle(&self, method: &MethodRef) -> EngineResult<MemberHandle> {
        let access = &method.def().access;
        if !access.is_public() {
            self.require(ReflectionPolicy::INVOKE_PRIVATE, || method.describe())?;
            self.widener.widen(access);
        }
        Ok(MemberHandle::Method(method.clone()))
    }

    fn field_read_handle(&self, field: &FieldRef) -> EngineResult<MemberHandle> {
        let access = &field.def().access;
        if !access.is_public() {
            self.require(ReflectionPolicy::READ_PRIVATE, || field.describe())?;
            self.widener.widen(access);
        }
        Ok(MemberHandle::FieldRead(field.clone()))
    }

    fn field_write_handle(&self, field: &FieldRef) -> EngineResult<MemberHandle> {
        let access = &field.def().access;
        if !access.is_public() {
            self.require(ReflectionPolicy::WRITE_PRIVATE, || field.describe())?;
            self.widener.widen(access);
        }
        Ok(MemberHandle::FieldWrite(field.clone()))
    }

    fn ctor_handle(&self, owner: &Arc<TypeDef>, index: usize) -> EngineResult<MemberHandle> {
        let ctor = owner.ctors.get(index).ok_or_else(|| {
            EngineError::MemberNotFound(format!("constructor #{} of `{}`", index, owner.name))
        })?;
        if !ctor.access.is_public() {
            self.require(ReflectionPolicy::CONSTRUCT_PRIVATE, || {
                format!("constructor #{} of `{}`", index, owner.name)
            })?;
            self.widener.widen(&ctor.access);
        }
        Ok(MemberHandle::Ctor {
            owner: owner.clone(),
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_runtime::{
        CtorSpec, FieldSpec, MethodSpec, PrimKind, TypeBuilder, TypeRegistry, TypeSig,
    };

    fn int_sig() -> TypeSig {
        TypeSig::Prim(PrimKind::Int)
    }

    fn fixture() -> (Arc<TypeRegistry>, Arc<TypeDef>) {
        let registry = Arc::new(TypeRegistry::new());
        let ty = TypeBuilder::class("Vault")
            .field(
                FieldSpec::new("secret", int_sig())
                    .private()
                    .default_value(Value::Int(41)),
            )
            .method(
                MethodSpec::new("peek")
                    .private()
                    .returns(int_sig())
                    .native(|recv, _| {
                        let inst = recv.unwrap().as_obj().unwrap();
                        Ok(inst.get_field(0).unwrap())
                    }),
            )
            .ctor(CtorSpec::new().private())
            .register(&registry)
            .unwrap();
        (registry, ty)
    }

    #[test]
    fn test_policy_contains_and_union() {
        let rw = ReflectionPolicy::READ_PRIVATE.union(ReflectionPolicy::WRITE_PRIVATE);
        assert!(rw.contains(ReflectionPolicy::READ_PRIVATE));
        assert!(rw.contains(ReflectionPolicy::WRITE_PRIVATE));
        assert!(!rw.contains(ReflectionPolicy::INVOKE_PRIVATE));
        assert!(ReflectionPolicy::ALL.contains(rw));
        assert_eq!(
            ReflectionPolicy::ALL.difference(rw).bits(),
            ReflectionPolicy::INVOKE_PRIVATE
                .union(ReflectionPolicy::CONSTRUCT_PRIVATE)
                .bits()
        );
    }

    #[test]
    fn test_denied_by_policy() {
        let (_registry, ty) = fixture();
        let provider = RuntimeHandleProvider::new(ReflectionPolicy::NONE);
        let fref = FieldRef {
            owner: ty.clone(),
            index: 0,
        };

        assert!(matches!(
            provider.field_read_handle(&fref),
            Err(EngineError::AccessDenied(_))
        ));
        let mref = MethodRef {
            owner: ty.clone(),
            index: 0,
        };
        assert!(matches!(
            provider.method_handle(&mref),
            Err(EngineError::AccessDenied(_))
        ));
        assert!(matches!(
            provider.ctor_handle(&ty, 0),
            Err(EngineError::AccessDenied(_))
        ));
    }

    #[test]
    fn test_grant_widens_member() {
        let (_registry, ty) = fixture();
        let provider = RuntimeHandleProvider::allowing_all();
        let fref = FieldRef {
            owner: ty.clone(),
            index: 0,
        };

        assert!(!fref.def().access.is_public());
        provider.field_read_handle(&fref).unwrap();
        assert!(fref.def().access.is_public());
    }

    #[test]
    fn test_field_handles_round_trip() {
        let (_registry, ty) = fixture();
        let provider = RuntimeHandleProvider::allowing_all();
        let fref = FieldRef {
            owner: ty.clone(),
            index: 0,
        };
        let read = provider.field_read_handle(&fref).unwrap();
        let write = provider.field_write_handle(&fref).unwrap();

        let inst = ty.construct(0, &[]).unwrap();
        assert_eq!(read.invoke(Some(&inst), &[]).unwrap(), Value::Int(41));
        write.invoke(Some(&inst), &[Value::Int(7)]).unwrap();
        assert_eq!(read.invoke(Some(&inst), &[]).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_method_handle_invokes() {
        let (_registry, ty) = fixture();
        let provider = RuntimeHandleProvider::allowing_all();
        let mref = MethodRef {
            owner: ty.clone(),
            index: 0,
        };
        let handle = provider.method_handle(&mref).unwrap();

        let inst = ty.construct(0, &[]).unwrap();
        assert_eq!(handle.invoke(Some(&inst), &[]).unwrap(), Value::Int(41));
        // Missing receiver
        assert!(matches!(
            handle.invoke(None, &[]),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_ctor_handle_constructs() {
        let (_registry, ty) = fixture();
        let provider = RuntimeHandleProvider::allowing_all();
        let handle = provider.ctor_handle(&ty, 0).unwrap();

        let value = handle.invoke(None, &[]).unwrap();
        assert!(value.as_obj().is_some());
    }

    #[test]
    fn test_ctor_handle_unknown_index() {
        let (_registry, ty) = fixture();
        let provider = RuntimeHandleProvider::allowing_all();
        assert!(matches!(
            provider.ctor_handle(&ty, 9),
            Err(EngineError::MemberNotFound(_))
        ));
    }
}
