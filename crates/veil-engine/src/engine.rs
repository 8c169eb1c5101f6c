//! Code generation engine
//!
//! One synthesized implementation type per (target, contract) pair. For
//! every contract method, in declaration order, the engine resolves the
//! role markers, validates the method shape, resolves the target member,
//! and picks a strategy: a direct member access when the member is public
//! (and, for fields, non-final), or an indirect call through a bound
//! invocation handle otherwise. A denied handle acquisition downgrades
//! that one method to a raising stub; every other failure aborts the
//! whole generation before anything is defined.

use std::sync::Arc;

use dashmap::DashMap;

use veil_runtime::{
    AccessWidener, MethodDef, ProcessWidener, RoleMarker, TypeDef, TypeId, TypeRegistry, TypeSig,
};

use crate::descriptor::{FieldRef, MethodRef, TargetDescriptor};
use crate::handles::{HandleProvider, MemberHandle, RuntimeHandleProvider};
use crate::ir::{IrBuilder, MethodImage};
use crate::loader::IsolatedLoader;
use crate::signature::SignatureBuilder;
use crate::synth::{Accessor, TypeImage};
use crate::{EngineError, EngineResult};

/// Resolved role of one contract method
enum Role<'a> {
    Getter {
        field: &'a str,
    },
    Setter {
        field: &'a str,
        sig: Option<&'a TypeSig>,
    },
    Method {
        name: Option<&'a str>,
    },
    Constructor,
}

/// Report the role of a contract method. Zero markers default to
/// target-method-by-same-name; more than one marker is a configuration
/// error.
fn resolve_role(method: &MethodDef) -> EngineResult<Role<'_>> {
    match method.markers.as_slice() {
        [] => Ok(Role::Method { name: None }),
        [marker] => Ok(match marker {
            RoleMarker::FieldGetter { field } => Role::Getter {
                field: field.as_ref(),
            },
            RoleMarker::FieldSetter { field, sig } => Role::Setter {
                field: field.as_ref(),
                sig: sig.as_ref(),
            },
            RoleMarker::TargetMethod { name } => Role::Method {
                name: name.as_deref(),
            },
            RoleMarker::TargetConstructor => Role::Constructor,
        }),
        _ => Err(EngineError::ConflictingRoles(method.name.to_string())),
    }
}

/// Plan for one contract method
struct PlannedMethod {
    image: MethodImage,
    uses_bound_instance: bool,
}

fn resolve_declared_field(
    target: &Arc<TypeDef>,
    name: &str,
    sig: &TypeSig,
) -> EngineResult<FieldRef> {
    let index = target
        .fields
        .iter()
        .position(|f| &*f.name == name && f.sig.canonical() == sig.canonical())
        .ok_or_else(|| {
            EngineError::MemberNotFound(format!("field `{}.{}: {}`", target.name, name, sig))
        })?;
    Ok(FieldRef {
        owner: target.clone(),
        index,
    })
}

/// Synthesizes accessor types for (target, contract) pairs
pub struct AccessorGenerator {
    registry: Arc<TypeRegistry>,
    loader: Arc<IsolatedLoader>,
    provider: Arc<dyn HandleProvider>,
    widener: Arc<dyn AccessWidener>,
    counters: DashMap<TypeId, u64>,
}

impl AccessorGenerator {
    /// Generator with the default handle provider (everything granted) and
    /// the default widener.
    pub fn new(registry: Arc<TypeRegistry>, loader: Arc<IsolatedLoader>) -> Self {
        Self::with_parts(
            registry,
            loader,
            Arc::new(RuntimeHandleProvider::allowing_all()),
            Arc::new(ProcessWidener),
        )
    }

    /// Generator with explicit collaborators.
    pub fn with_parts(
        registry: Arc<TypeRegistry>,
        loader: Arc<IsolatedLoader>,
        provider: Arc<dyn HandleProvider>,
        widener: Arc<dyn AccessWidener>,
    ) -> Self {
        Self {
            registry,
            loader,
            provider,
            widener,
            counters: DashMap::new(),
        }
    }

    /// The loader synthesized types are defined into.
    pub fn loader(&self) -> &Arc<IsolatedLoader> {
        &self.loader
    }

    /// The registry targets are resolved against.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Synthesize and instantiate an accessor implementing `contract`
    /// against the descriptor's target.
    pub fn generate(
        &self,
        descriptor: &Arc<TargetDescriptor>,
        contract: &Arc<TypeDef>,
    ) -> EngineResult<Accessor> {
        let target = descriptor.target().clone();
        let mut handles: Vec<MemberHandle> = Vec::new();
        let mut plans: Vec<PlannedMethod> = Vec::with_capacity(contract.methods.len());

        for method in &contract.methods {
            let plan = match resolve_role(method)? {
                Role::Getter { field } => self.plan_getter(&target, method, field, &mut handles)?,
                Role::Setter { field, sig } => {
                    self.plan_setter(&target, method, field, sig, &mut handles)?
                }
                Role::Constructor => self.plan_ctor(&target, method, &mut handles)?,
                Role::Method { name } => self.plan_method(&target, method, name, &mut handles)?,
            };
            plans.push(plan);
        }

        let needs_instance = plans.iter().any(|p| p.uses_bound_instance);
        if needs_instance && descriptor.bound_instance().is_none() {
            return Err(EngineError::MissingInstance(target.name.to_string()));
        }

        let serial = {
            let mut counter = self.counters.entry(contract.id).or_insert(0);
            *counter += 1;
            *counter
        };
        let name = format!("{}$Accessor${}", contract.name, serial);
        tracing::debug!(
            name = %name,
            target_type = %target.name,
            methods = plans.len(),
            handles = handles.len(),
            "synthesizing accessor type"
        );

        let image = TypeImage {
            name,
            contract: contract.clone(),
            target: target.clone(),
            methods: plans.into_iter().map(|p| p.image).collect(),
            needs_instance,
            handle_count: handles.len(),
        };
        let synthesized = self.loader.define(image)?;
        let bound = if needs_instance {
            descriptor.bound_instance().cloned()
        } else {
            None
        };
        synthesized.instantiate(bound, handles)
    }

    fn plan_getter(
        &self,
        target: &Arc<TypeDef>,
        method: &MethodDef,
        field: &str,
        handles: &mut Vec<MemberHandle>,
    ) -> EngineResult<PlannedMethod> {
        if method.ret.is_void() || !method.params.is_empty() {
            return Err(EngineError::InvalidShape(format!(
                "getter `{}` must take no parameters and return a value",
                method.name
            )));
        }
        let fref = resolve_declared_field(target, field, &method.ret)?;
        let uses_instance = !fref.def().access.is_static();
        let needs_handle = !fref.def().access.is_public() || fref.def().access.is_final();

        let mut b = IrBuilder::new(&method.name, method.params.clone(), method.ret.clone());
        if !needs_handle {
            if uses_instance {
                b.emit_load_bound_instance()?;
            }
            b.emit_read_field(fref)?;
            b.emit_return()?;
            return Ok(PlannedMethod {
                image: b.build()?,
                uses_bound_instance: uses_instance,
            });
        }

        if fref.def().access.is_final() {
            self.widener.strip_final(&fref.def().access);
        }
        match self.provider.field_read_handle(&fref) {
            Ok(handle) => {
                let index = handles.len();
                handles.push(handle);
                if uses_instance {
                    b.emit_load_bound_instance()?;
                }
                b.emit_call_handle(index, 0, uses_instance)?;
                b.emit_return()?;
                Ok(PlannedMethod {
                    image: b.build()?,
                    uses_bound_instance: uses_instance,
                })
            }
            Err(EngineError::AccessDenied(cause)) => self.plan_stub(method, &cause),
            Err(e) => Err(e),
        }
    }

    fn plan_setter(
        &self,
        target: &Arc<TypeDef>,
        method: &MethodDef,
        field: &str,
        sig_override: Option<&TypeSig>,
        handles: &mut Vec<MemberHandle>,
    ) -> EngineResult<PlannedMethod> {
        if !method.ret.is_void() || method.params.len() != 1 {
            return Err(EngineError::InvalidShape(format!(
                "setter `{}` must return void and take exactly one parameter",
                method.name
            )));
        }
        let field_sig = sig_override.cloned().unwrap_or_else(|| method.params[0].clone());
        let fref = resolve_declared_field(target, field, &field_sig)?;
        let uses_instance = !fref.def().access.is_static();
        let needs_handle = !fref.def().access.is_public() || fref.def().access.is_final();

        let mut b = IrBuilder::new(&method.name, method.params.clone(), method.ret.clone());
        if !needs_handle {
            if uses_instance {
                b.emit_load_bound_instance()?;
            }
            b.emit_load_arg(0)?;
            b.emit_write_field(fref)?;
            b.emit_return_void()?;
            return Ok(PlannedMethod {
                image: b.build()?,
                uses_bound_instance: uses_instance,
            });
        }

        if fref.def().access.is_final() {
            self.widener.strip_final(&fref.def().access);
        }
        match self.provider.field_write_handle(&fref) {
            Ok(handle) => {
                let index = handles.len();
                handles.push(handle);
                if uses_instance {
                    b.emit_load_bound_instance()?;
                }
                b.emit_load_arg(0)?;
                b.emit_call_handle(index, 1, uses_instance)?;
                b.emit_pop()?;
                b.emit_return_void()?;
                Ok(PlannedMethod {
                    image: b.build()?,
                    uses_bound_instance: uses_instance,
                })
            }
            Err(EngineError::AccessDenied(cause)) => self.plan_stub(method, &cause),
            Err(e) => Err(e),
        }
    }

    fn plan_ctor(
        &self,
        target: &Arc<TypeDef>,
        method: &MethodDef,
        handles: &mut Vec<MemberHandle>,
    ) -> EngineResult<PlannedMethod> {
        let expected = TypeSig::Named(target.name.clone());
        if method.ret != expected {
            return Err(EngineError::InvalidShape(format!(
                "constructor method `{}` must return `{}`, not `{}`",
                method.name, target.name, method.ret
            )));
        }
        let ctor = target.ctor_matching(&method.params).ok_or_else(|| {
            EngineError::MemberNotFound(format!(
                "constructor `{}{}`",
                target.name,
                SignatureBuilder::new().accept_all(&method.params).build()
            ))
        })?;
        let argc = method.params.len();

        let mut b = IrBuilder::new(&method.name, method.params.clone(), method.ret.clone());
        if target.ctors[ctor].access.is_public() {
            for i in 0..argc {
                b.emit_load_arg(i)?;
            }
            b.emit_construct(target.clone(), ctor)?;
            b.emit_return()?;
            return Ok(PlannedMethod {
                image: b.build()?,
                uses_bound_instance: false,
            });
        }

        match self.provider.ctor_handle(target, ctor) {
            Ok(handle) => {
                let index = handles.len();
                handles.push(handle);
                for i in 0..argc {
                    b.emit_load_arg(i)?;
                }
                b.emit_call_handle(index, argc, false)?;
                b.emit_return()?;
                Ok(PlannedMethod {
                    image: b.build()?,
                    uses_bound_instance: false,
                })
            }
            Err(EngineError::AccessDenied(cause)) => self.plan_stub(method, &cause),
            Err(e) => Err(e),
        }
    }

    fn plan_method(
        &self,
        target: &Arc<TypeDef>,
        method: &MethodDef,
        name_override: Option<&str>,
        handles: &mut Vec<MemberHandle>,
    ) -> EngineResult<PlannedMethod> {
        let lookup = name_override.unwrap_or(&method.name);
        let mref = target
            .methods
            .iter()
            .position(|m| {
                &*m.name == lookup
                    && m.params.len() == method.params.len()
                    && m.params
                        .iter()
                        .zip(&method.params)
                        .all(|(a, b)| a.canonical() == b.canonical())
                    && m.ret.canonical() == method.ret.canonical()
            })
            .map(|index| MethodRef {
                owner: target.clone(),
                index,
            })
            .ok_or_else(|| {
                EngineError::MemberNotFound(format!(
                    "method `{}.{}{}`",
                    target.name,
                    lookup,
                    SignatureBuilder::new()
                        .accept_all(&method.params)
                        .returns(method.ret.clone())
                        .build()
                ))
            })?;
        let uses_instance = !mref.def().access.is_static();
        let needs_handle = !mref.def().access.is_public();
        let argc = method.params.len();
        let is_void = method.ret.is_void();

        let mut b = IrBuilder::new(&method.name, method.params.clone(), method.ret.clone());
        if !needs_handle {
            if uses_instance {
                b.emit_load_bound_instance()?;
            }
            for i in 0..argc {
                b.emit_load_arg(i)?;
            }
            b.emit_call_method(mref)?;
            if is_void {
                b.emit_pop()?;
                b.emit_return_void()?;
            } else {
                b.emit_return()?;
            }
            return Ok(PlannedMethod {
                image: b.build()?,
                uses_bound_instance: uses_instance,
            });
        }

        match self.provider.method_handle(&mref) {
            Ok(handle) => {
                let index = handles.len();
                handles.push(handle);
                if uses_instance {
                    b.emit_load_bound_instance()?;
                }
                for i in 0..argc {
                    b.emit_load_arg(i)?;
                }
                b.emit_call_handle(index, argc, uses_instance)?;
                if is_void {
                    b.emit_pop()?;
                    b.emit_return_void()?;
                } else {
                    b.emit_return()?;
                }
                Ok(PlannedMethod {
                    image: b.build()?,
                    uses_bound_instance: uses_instance,
                })
            }
            Err(EngineError::AccessDenied(cause)) => self.plan_stub(method, &cause),
            Err(e) => Err(e),
        }
    }

    fn plan_stub(&self, method: &MethodDef, cause: &str) -> EngineResult<PlannedMethod> {
        tracing::warn!(method = %method.name, cause, "handle denied, emitting stub");
        let mut b = IrBuilder::new(&method.name, method.params.clone(), method.ret.clone());
        b.emit_raise(&format!(
            "no invocation handle for `{}`: {}",
            method.name, cause
        ))?;
        Ok(PlannedMethod {
            image: b.build()?,
            uses_bound_instance: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::ReflectionPolicy;
    use veil_runtime::{
        CtorSpec, FieldSpec, MethodSpec, PrimKind, TypeBuilder, Value,
    };

    fn int_sig() -> TypeSig {
        TypeSig::Prim(PrimKind::Int)
    }

    fn setup() -> (Arc<TypeRegistry>, Arc<IsolatedLoader>) {
        (Arc::new(TypeRegistry::new()), Arc::new(IsolatedLoader::new()))
    }

    fn counter_class(registry: &TypeRegistry) -> Arc<TypeDef> {
        TypeBuilder::class("Counter")
            .field(
                FieldSpec::new("count", int_sig())
                    .private()
                    .default_value(Value::Int(5)),
            )
            .ctor(CtorSpec::new())
            .register(registry)
            .unwrap()
    }

    #[test]
    fn test_conflicting_markers_rejected_before_definition() {
        let (registry, loader) = setup();
        let target = counter_class(&registry);
        let contract = TypeBuilder::interface("Confused")
            .method(
                MethodSpec::new("get_count")
                    .returns(int_sig())
                    .marker(RoleMarker::getter("count"))
                    .marker(RoleMarker::constructor()),
            )
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader.clone());
        let descriptor = TargetDescriptor::wrap(registry, target);
        let result = generator.generate(&descriptor, &contract);

        assert!(matches!(result, Err(EngineError::ConflictingRoles(_))));
        assert!(loader.is_empty());
    }

    #[test]
    fn test_getter_shape_validated() {
        let (registry, loader) = setup();
        let target = counter_class(&registry);
        // Getter returning void
        let contract = TypeBuilder::interface("BadGetter")
            .method(MethodSpec::new("get_count").marker(RoleMarker::getter("count")))
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader);
        let descriptor = TargetDescriptor::wrap(registry, target);
        assert!(matches!(
            generator.generate(&descriptor, &contract),
            Err(EngineError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_setter_shape_validated() {
        let (registry, loader) = setup();
        let target = counter_class(&registry);
        // Setter with a return value
        let contract = TypeBuilder::interface("BadSetter")
            .method(
                MethodSpec::new("set_count")
                    .param(int_sig())
                    .returns(int_sig())
                    .marker(RoleMarker::setter("count")),
            )
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader);
        let descriptor = TargetDescriptor::wrap(registry, target);
        assert!(matches!(
            generator.generate(&descriptor, &contract),
            Err(EngineError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_missing_member_defines_nothing() {
        let (registry, loader) = setup();
        let target = counter_class(&registry);
        let contract = TypeBuilder::interface("Wrong")
            .method(
                MethodSpec::new("get_absent")
                    .returns(int_sig())
                    .marker(RoleMarker::getter("absent")),
            )
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader.clone());
        let descriptor = TargetDescriptor::wrap(registry, target);
        let result = generator.generate(&descriptor, &contract);

        assert!(matches!(result, Err(EngineError::MemberNotFound(_))));
        assert!(loader.is_empty());
    }

    #[test]
    fn test_missing_instance_for_instance_field() {
        let (registry, loader) = setup();
        let target = counter_class(&registry);
        let contract = TypeBuilder::interface("Access")
            .method(
                MethodSpec::new("get_count")
                    .returns(int_sig())
                    .marker(RoleMarker::getter("count")),
            )
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader);
        let descriptor = TargetDescriptor::wrap(registry, target);
        // No bound instance
        assert!(matches!(
            generator.generate(&descriptor, &contract),
            Err(EngineError::MissingInstance(_))
        ));
    }

    #[test]
    fn test_private_field_round_trip_via_handles() {
        let (registry, loader) = setup();
        let target = counter_class(&registry);
        let contract = TypeBuilder::interface("CounterAccess")
            .method(
                MethodSpec::new("get_count")
                    .returns(int_sig())
                    .marker(RoleMarker::getter("count")),
            )
            .method(
                MethodSpec::new("set_count")
                    .param(int_sig())
                    .marker(RoleMarker::setter("count")),
            )
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader);
        let descriptor = TargetDescriptor::wrap(registry, target);
        descriptor.construct(&[]).unwrap();

        let accessor = generator.generate(&descriptor, &contract).unwrap();
        assert_eq!(accessor.call("get_count", &[]).unwrap(), Value::Int(5));
        accessor.call("set_count", &[Value::Int(9)]).unwrap();
        assert_eq!(accessor.call("get_count", &[]).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_constructor_role() {
        let (registry, loader) = setup();
        let target = TypeBuilder::class("Pair")
            .field(FieldSpec::new("a", int_sig()))
            .field(FieldSpec::new("b", int_sig()))
            .ctor(
                CtorSpec::new()
                    .param(int_sig())
                    .param(int_sig())
                    .init(|inst, args| {
                        inst.set_field(0, args[0].clone())?;
                        inst.set_field(1, args[1].clone())?;
                        Ok(())
                    }),
            )
            .register(&registry)
            .unwrap();
        let contract = TypeBuilder::interface("PairFactory")
            .method(
                MethodSpec::new("make")
                    .param(int_sig())
                    .param(int_sig())
                    .returns(TypeSig::named("Pair"))
                    .marker(RoleMarker::constructor()),
            )
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader);
        let descriptor = TargetDescriptor::wrap(registry, target);
        let accessor = generator.generate(&descriptor, &contract).unwrap();

        let pair = accessor
            .call("make", &[Value::Int(1), Value::Int(2)])
            .unwrap();
        let inst = pair.as_obj().unwrap();
        assert_eq!(inst.get_field(0), Some(Value::Int(1)));
        assert_eq!(inst.get_field(1), Some(Value::Int(2)));
    }

    #[test]
    fn test_constructor_role_return_type_enforced() {
        let (registry, loader) = setup();
        let target = counter_class(&registry);
        let contract = TypeBuilder::interface("WrongFactory")
            .method(
                MethodSpec::new("make")
                    .returns(TypeSig::named("Other"))
                    .marker(RoleMarker::constructor()),
            )
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader);
        let descriptor = TargetDescriptor::wrap(registry, target);
        assert!(matches!(
            generator.generate(&descriptor, &contract),
            Err(EngineError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_denied_handle_becomes_stub_and_rest_still_works() {
        let (registry, loader) = setup();
        let target = TypeBuilder::class("Mixed")
            .field(FieldSpec::new("open", int_sig()).default_value(Value::Int(1)))
            .method(
                MethodSpec::new("hidden")
                    .private()
                    .returns(int_sig())
                    .native(|_, _| Ok(Value::Int(99))),
            )
            .ctor(CtorSpec::new())
            .register(&registry)
            .unwrap();
        let contract = TypeBuilder::interface("MixedAccess")
            .method(
                MethodSpec::new("get_open")
                    .returns(int_sig())
                    .marker(RoleMarker::getter("open")),
            )
            .method(MethodSpec::new("hidden").returns(int_sig()))
            .register(&registry)
            .unwrap();

        // A policy with no INVOKE_PRIVATE grant denies the method handle
        let provider = Arc::new(RuntimeHandleProvider::new(ReflectionPolicy::NONE));
        let generator = AccessorGenerator::with_parts(
            registry.clone(),
            loader,
            provider,
            Arc::new(ProcessWidener),
        );
        let descriptor = TargetDescriptor::wrap(registry, target);
        descriptor.construct(&[]).unwrap();

        let accessor = generator.generate(&descriptor, &contract).unwrap();
        assert_eq!(accessor.call("get_open", &[]).unwrap(), Value::Int(1));
        match accessor.call("hidden", &[]) {
            Err(EngineError::Runtime(msg)) => assert!(msg.contains("hidden")),
            other => panic!("expected stub error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_synthesized_names_are_unique_per_contract() {
        let (registry, loader) = setup();
        let target_a = counter_class(&registry);
        let target_b = TypeBuilder::class("Counter2")
            .field(
                FieldSpec::new("count", int_sig())
                    .private()
                    .default_value(Value::Int(0)),
            )
            .ctor(CtorSpec::new())
            .register(&registry)
            .unwrap();
        let contract = TypeBuilder::interface("Access")
            .method(
                MethodSpec::new("get_count")
                    .returns(int_sig())
                    .marker(RoleMarker::getter("count")),
            )
            .register(&registry)
            .unwrap();

        let generator = AccessorGenerator::new(registry.clone(), loader.clone());

        let da = TargetDescriptor::wrap(registry.clone(), target_a);
        da.construct(&[]).unwrap();
        let a = generator.generate(&da, &contract).unwrap();

        let db = TargetDescriptor::wrap(registry, target_b);
        db.construct(&[]).unwrap();
        let b = generator.generate(&db, &contract).unwrap();

        assert_eq!(a.synthesized().name(), "Access$Accessor$1");
        assert_eq!(b.synthesized().name(), "Access$Accessor$2");
        assert_eq!(loader.len(), 2);
    }
}
