//! End-to-end accessor synthesis scenarios

use std::sync::Arc;

use veil_engine::{
    AccessorCache, AccessorGenerator, EngineError, IsolatedLoader, ReflectionPolicy,
    RuntimeHandleProvider, TargetDescriptor,
};
use veil_runtime::{
    CtorSpec, FieldSpec, MethodSpec, PrimKind, ProcessWidener, RoleMarker, TypeBuilder,
    TypeRegistry, TypeSig, Value,
};

fn int_sig() -> TypeSig {
    TypeSig::Prim(PrimKind::Int)
}

fn setup() -> (Arc<TypeRegistry>, Arc<IsolatedLoader>, AccessorCache) {
    let registry = Arc::new(TypeRegistry::new());
    let loader = Arc::new(IsolatedLoader::new());
    let cache = AccessorCache::new(AccessorGenerator::new(registry.clone(), loader.clone()));
    (registry, loader, cache)
}

#[test]
fn static_string_method_delegates_to_direct_invocation() {
    let (registry, _loader, cache) = setup();
    let target = TypeBuilder::class("Greeter")
        .method(
            MethodSpec::new("greeting")
                .as_static()
                .returns(TypeSig::Str)
                .native(|_, _| Ok(Value::str("hello from Greeter"))),
        )
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();
    let contract = TypeBuilder::interface("GreeterContract")
        .method(MethodSpec::new("greeting").returns(TypeSig::Str))
        .register(&registry)
        .unwrap();

    let descriptor = TargetDescriptor::wrap(registry, target);
    let direct = descriptor
        .invoke_method("greeting", &TypeSig::Str, &[])
        .unwrap();

    let accessor = cache.new_instance(&descriptor, &contract).unwrap();
    assert_eq!(accessor.call("greeting", &[]).unwrap(), direct);
}

#[test]
fn private_field_round_trip_through_generated_pair() {
    // Target type with `private int count = 5`
    let (registry, _loader, cache) = setup();
    let target = TypeBuilder::class("Counter")
        .field(
            FieldSpec::new("count", int_sig())
                .private()
                .default_value(Value::Int(5)),
        )
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();
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

    let descriptor = TargetDescriptor::wrap(registry, target);
    descriptor.construct(&[]).unwrap();

    let accessor = cache.new_instance(&descriptor, &contract).unwrap();
    assert_eq!(accessor.call("get_count", &[]).unwrap(), Value::Int(5));
    accessor.call("set_count", &[Value::Int(9)]).unwrap();
    assert_eq!(accessor.call("get_count", &[]).unwrap(), Value::Int(9));
}

#[test]
fn private_final_field_round_trips_after_finality_strip() {
    let (registry, _loader, cache) = setup();
    let target = TypeBuilder::class("Sealed")
        .field(
            FieldSpec::new("token", TypeSig::Str)
                .private()
                .as_final()
                .default_value(Value::str("initial")),
        )
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();
    let contract = TypeBuilder::interface("SealedAccess")
        .method(
            MethodSpec::new("get_token")
                .returns(TypeSig::Str)
                .marker(RoleMarker::getter("token")),
        )
        .method(
            MethodSpec::new("set_token")
                .param(TypeSig::Str)
                .marker(RoleMarker::setter("token")),
        )
        .register(&registry)
        .unwrap();

    assert!(target.declared_field("token").unwrap().access.is_final());

    let descriptor = TargetDescriptor::wrap(registry, target.clone());
    descriptor.construct(&[]).unwrap();
    let accessor = cache.new_instance(&descriptor, &contract).unwrap();

    // Planning the field role stripped the final attribute in place
    assert!(!target.declared_field("token").unwrap().access.is_final());

    assert_eq!(
        accessor.call("get_token", &[]).unwrap(),
        Value::str("initial")
    );
    accessor
        .call("set_token", &[Value::str("rotated")])
        .unwrap();
    assert_eq!(
        accessor.call("get_token", &[]).unwrap(),
        Value::str("rotated")
    );
}

#[test]
fn conflicting_markers_fail_before_any_definition() {
    let (registry, loader, cache) = setup();
    let target = TypeBuilder::class("T")
        .field(FieldSpec::new("x", int_sig()))
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();
    let contract = TypeBuilder::interface("Conflicted")
        .method(
            MethodSpec::new("x")
                .returns(int_sig())
                .marker(RoleMarker::getter("x"))
                .marker(RoleMarker::method("x")),
        )
        .register(&registry)
        .unwrap();

    let descriptor = TargetDescriptor::wrap(registry, target);
    descriptor.construct(&[]).unwrap();

    let result = cache.new_instance(&descriptor, &contract);
    assert!(matches!(result, Err(EngineError::ConflictingRoles(_))));
    assert!(loader.is_empty());
}

#[test]
fn missing_member_leaves_namespace_clean() {
    // Contract asks for `missing()` which the target does not declare
    let (registry, loader, cache) = setup();
    let target = TypeBuilder::class("Bare")
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();
    let contract = TypeBuilder::interface("WantsMissing")
        .method(MethodSpec::new("missing"))
        .register(&registry)
        .unwrap();

    let descriptor = TargetDescriptor::wrap(registry, target);
    let result = cache.new_instance(&descriptor, &contract);

    assert!(matches!(result, Err(EngineError::MemberNotFound(_))));
    assert!(loader.is_empty());
    assert!(!loader.contains("WantsMissing$Accessor$1"));
}

#[test]
fn repeated_requests_return_the_same_accessor() {
    let (registry, loader, cache) = setup();
    let target = TypeBuilder::class("Counter")
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

    let descriptor = TargetDescriptor::wrap(registry, target);
    descriptor.construct(&[]).unwrap();

    let a = cache.new_instance(&descriptor, &contract).unwrap();
    let b = cache.new_instance(&descriptor, &contract).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(loader.len(), 1);
}

#[test]
fn primitive_and_boxed_queries_resolve_to_the_same_field() {
    let (registry, _loader, _cache) = setup();
    let target = TypeBuilder::class("Holder")
        .field(FieldSpec::new("x", int_sig()).default_value(Value::Int(42)))
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();

    let descriptor = TargetDescriptor::wrap(registry, target);
    descriptor.construct(&[]).unwrap();
    let recv = descriptor.bound_instance().cloned().unwrap();

    let via_prim = descriptor
        .get_field("x", &TypeSig::Prim(PrimKind::Int))
        .unwrap();
    let via_boxed = descriptor
        .get_field("x", &TypeSig::Boxed(PrimKind::Int))
        .unwrap();

    assert!(Arc::ptr_eq(&via_prim, &via_boxed));
    assert_eq!(
        via_prim.read(Some(&recv)).unwrap(),
        via_boxed.read(Some(&recv)).unwrap()
    );
    assert_eq!(via_prim.read(Some(&recv)).unwrap(), Value::Int(42));
}

#[test]
fn denied_method_stub_coexists_with_working_methods() {
    let registry = Arc::new(TypeRegistry::new());
    let loader = Arc::new(IsolatedLoader::new());
    // Grant field access but not private-method invocation
    let policy = ReflectionPolicy::READ_PRIVATE.union(ReflectionPolicy::WRITE_PRIVATE);
    let generator = AccessorGenerator::with_parts(
        registry.clone(),
        loader,
        Arc::new(RuntimeHandleProvider::new(policy)),
        Arc::new(ProcessWidener),
    );
    let cache = AccessorCache::new(generator);

    let target = TypeBuilder::class("Guarded")
        .field(
            FieldSpec::new("level", int_sig())
                .private()
                .default_value(Value::Int(3)),
        )
        .method(
            MethodSpec::new("reset")
                .private()
                .native(|recv, _| {
                    let inst = recv.unwrap().as_obj().unwrap();
                    inst.set_field(0, Value::Int(0))?;
                    Ok(Value::Null)
                }),
        )
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();
    let contract = TypeBuilder::interface("GuardedAccess")
        .method(
            MethodSpec::new("get_level")
                .returns(int_sig())
                .marker(RoleMarker::getter("level")),
        )
        .method(MethodSpec::new("reset"))
        .register(&registry)
        .unwrap();

    let descriptor = TargetDescriptor::wrap(registry, target);
    descriptor.construct(&[]).unwrap();
    let accessor = cache.new_instance(&descriptor, &contract).unwrap();

    // The field getter works through its granted handle
    assert_eq!(accessor.call("get_level", &[]).unwrap(), Value::Int(3));
    // The denied method is a stub that raises with a descriptive message
    match accessor.call("reset", &[]) {
        Err(EngineError::Runtime(msg)) => {
            assert!(msg.contains("reset"));
            assert!(msg.contains("no invocation handle"));
        }
        other => panic!("expected stub error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn widening_is_visible_across_descriptors_of_the_same_type() {
    let (registry, _loader, _cache) = setup();
    let target = TypeBuilder::class("Shared")
        .field(
            FieldSpec::new("hidden", int_sig())
                .private()
                .default_value(Value::Int(1)),
        )
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();

    let first = TargetDescriptor::wrap(registry.clone(), target.clone());
    first.get_field("hidden", &int_sig()).unwrap();

    // The widening happened on the shared definition, so a second
    // descriptor observes the member as public
    let _second = TargetDescriptor::wrap(registry, target.clone());
    assert!(target.declared_field("hidden").unwrap().access.is_public());
}

#[test]
fn method_role_with_name_override_and_instance_state() {
    let (registry, _loader, cache) = setup();
    let target = TypeBuilder::class("Tally")
        .field(
            FieldSpec::new("total", int_sig())
                .private()
                .default_value(Value::Int(0)),
        )
        .method(
            MethodSpec::new("bump")
                .param(int_sig())
                .returns(int_sig())
                .native(|recv, args| {
                    let inst = recv.unwrap().as_obj().unwrap();
                    let next =
                        inst.get_field(0).unwrap().as_int().unwrap() + args[0].as_int().unwrap();
                    inst.set_field(0, Value::Int(next))?;
                    Ok(Value::Int(next))
                }),
        )
        .ctor(CtorSpec::new())
        .register(&registry)
        .unwrap();
    let contract = TypeBuilder::interface("TallyOps")
        .method(
            MethodSpec::new("add")
                .param(int_sig())
                .returns(int_sig())
                .marker(RoleMarker::method("bump")),
        )
        .register(&registry)
        .unwrap();

    let descriptor = TargetDescriptor::wrap(registry, target);
    descriptor.construct(&[]).unwrap();
    let accessor = cache.new_instance(&descriptor, &contract).unwrap();

    assert_eq!(accessor.call("add", &[Value::Int(4)]).unwrap(), Value::Int(4));
    assert_eq!(accessor.call("add", &[Value::Int(6)]).unwrap(), Value::Int(10));
}

#[test]
fn concurrent_requests_generate_once() {
    let (registry, loader, cache) = setup();
    let target = TypeBuilder::class("Counter")
        .field(
            FieldSpec::new("count", int_sig())
                .private()
                .default_value(Value::Int(5)),
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

    let descriptor = TargetDescriptor::wrap(registry, target);
    descriptor.construct(&[]).unwrap();

    let cache = Arc::new(cache);
    let mut joins = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let descriptor = descriptor.clone();
        let contract = contract.clone();
        joins.push(std::thread::spawn(move || {
            cache.new_instance(&descriptor, &contract).unwrap()
        }));
    }
    let accessors: Vec<_> = joins.into_iter().map(|j| j.join().unwrap()).collect();

    // The per-key guard serialized generation: exactly one type defined
    assert_eq!(loader.len(), 1);
    for accessor in &accessors[1..] {
        assert!(Arc::ptr_eq(&accessors[0], accessor));
    }
}

#[test]
fn private_constructor_reached_through_handle() {
    let (registry, _loader, cache) = setup();
    let target = TypeBuilder::class("Singletonish")
        .field(FieldSpec::new("id", int_sig()))
        .ctor(CtorSpec::new().private().param(int_sig()).init(|inst, args| {
            inst.set_field(0, args[0].clone())?;
            Ok(())
        }))
        .register(&registry)
        .unwrap();
    let contract = TypeBuilder::interface("Maker")
        .method(
            MethodSpec::new("make")
                .param(int_sig())
                .returns(TypeSig::named("Singletonish"))
                .marker(RoleMarker::constructor()),
        )
        .register(&registry)
        .unwrap();

    let descriptor = TargetDescriptor::wrap(registry, target);
    let accessor = cache.new_instance(&descriptor, &contract).unwrap();

    let made = accessor.call("make", &[Value::Int(77)]).unwrap();
    assert_eq!(made.as_obj().unwrap().get_field(0), Some(Value::Int(77)));
}
