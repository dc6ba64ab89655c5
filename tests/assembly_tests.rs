/// Assembly tests
///
/// Translation between domain objects and persistent objects: identity,
/// cycles, collection reconciliation and type dispatch.
/// Run with: cargo test --test assembly_tests

use graph_assembler::assembly::AssemblingKey;
use graph_assembler::persistent::SetChange;
use graph_assembler::{
    AssemblerConfig, AssemblyError, CompoundAssembler, Context, DoKey, DoRef, DomainGraph, DomainKey,
    DomainObject, DomainType, Env, LinkId, MemoryStore, PersistentType, StorageSession,
};

fn persistent_of(context: &Context, key: DomainKey) -> DoKey {
    let state = context.cached_state(key).unwrap();
    context.states().state(state).unwrap().object()
}

fn context_for(session: &dyn StorageSession, config: AssemblerConfig) -> Context {
    Context::new(session.session_id(), config, false)
}

#[test]
fn test_translating_twice_yields_same_result() {
    let registry = CompoundAssembler::with_default_assemblers();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let customer = domain.insert(DomainObject::party("party.customer").named("Bob")).unwrap();
    let mut context = context_for(&session, AssemblerConfig::default());

    let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
    let first = registry.assemble_do(&mut env, customer).unwrap();
    let second = registry.assemble_do(&mut env, customer).unwrap();

    assert_eq!(first, second);
    assert_eq!(env.graph().len(), 1);
}

#[test]
fn test_cycle_terminates_and_links_both_ways() {
    let registry = CompoundAssembler::with_default_assemblers();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let a = domain.insert(DomainObject::party("party.customer")).unwrap();
    let b = domain.insert(DomainObject::party("party.customer")).unwrap();
    let a_to_b = domain.relate("entityRelationship.referral", a, b).unwrap();
    let b_to_a = domain.relate("entityRelationship.referral", b, a).unwrap();
    let mut context = context_for(&session, AssemblerConfig::default());

    let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
    let state = registry.assemble_do(&mut env, a).unwrap();
    assert!(env.context.is_complete(state));
    assert_eq!(env.context.assembling_count(), 0);
    assert_eq!(env.context.objects(state).len(), 4);

    let a_do = persistent_of(env.context, a);
    let b_do = persistent_of(env.context, b);
    let b_to_a_do = persistent_of(env.context, b_to_a);
    let a_to_b_do = persistent_of(env.context, a_to_b);

    let graph = env.graph();
    let b_entity = graph.object(b_do).unwrap().as_entity().unwrap();
    assert!(b_entity.relationships.contains(&b_to_a_do));
    assert!(b_entity.relationships.contains(&a_to_b_do));
    let back = graph.object(b_to_a_do).unwrap().as_relationship().unwrap();
    assert_eq!(back.source, Some(DoRef::Loaded(b_do)));
    assert_eq!(back.target, Some(DoRef::Loaded(a_do)));
}

#[test]
fn test_collection_reconciled_with_minimal_changes() {
    let registry = CompoundAssembler::with_default_assemblers();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let customer = domain.insert(DomainObject::party("party.customer")).unwrap();
    let pets: Vec<_> = (0..4)
        .map(|_| domain.insert(DomainObject::party("party.patient")).unwrap())
        .collect();
    let a = domain.relate("entityRelationship.owner", customer, pets[0]).unwrap();
    let b = domain.relate("entityRelationship.owner", customer, pets[1]).unwrap();
    let c = domain.relate("entityRelationship.owner", customer, pets[2]).unwrap();
    let mut context = context_for(&session, AssemblerConfig::default());

    let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
    let state = registry.assemble_do(&mut env, customer).unwrap();
    let customer_do = env.context.states().state(state).unwrap().object();
    let retained: Vec<_> = [b, c].iter().map(|key| persistent_of(env.context, *key)).collect();
    env.graph_mut().object_mut(customer_do).unwrap().reset_changes();

    env.domain.unrelate(a).unwrap();
    let d = env.domain.relate("entityRelationship.owner", customer, pets[3]).unwrap();
    registry.assemble_do(&mut env, customer).unwrap();

    let entity = env.graph().object(customer_do).unwrap().as_entity().unwrap();
    let changes = entity.relationships.changes();
    assert_eq!(changes.len(), 2);
    assert!(matches!(changes[0], SetChange::Removed(_)));
    assert!(matches!(changes[1], SetChange::Added(_)));
    for key in &retained {
        assert!(entity.relationships.contains(key));
    }
    assert_eq!(entity.relationships.len(), 3);
    assert!(env.context.cached_state(d).is_some());
}

#[test]
fn test_emptied_collection_is_cleared() {
    let registry = CompoundAssembler::with_default_assemblers();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let pet = domain.insert(DomainObject::party("party.patient")).unwrap();
    let canine = domain.insert(DomainObject::lookup("lookup.species", "CANINE")).unwrap();
    domain.classify(pet, canine).unwrap();
    let mut context = context_for(&session, AssemblerConfig::default());

    let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
    let state = registry.assemble_do(&mut env, pet).unwrap();
    let pet_do = env.context.states().state(state).unwrap().object();
    env.graph_mut().object_mut(pet_do).unwrap().reset_changes();

    env.domain.entity_mut(pet).unwrap().classifications.clear();
    registry.assemble_do(&mut env, pet).unwrap();

    let entity = env.graph().object(pet_do).unwrap().as_entity().unwrap();
    assert!(entity.classifications.is_empty());
    assert_eq!(entity.classifications.changes(), &[SetChange::Cleared]);
}

#[test]
fn test_most_specific_assembler_is_chosen() {
    let registry = CompoundAssembler::with_default_assemblers();

    let party = registry.resolve_persistent(PersistentType::Party).unwrap();
    assert_eq!(party.name(), "PartyAssembler");
    assert_eq!(party.persistent_type(), PersistentType::Party);

    let product = registry.resolve_persistent(PersistentType::Product).unwrap();
    assert_eq!(product.name(), "EntityAssembler");
}

#[test]
fn test_unregistered_type_is_unsupported() {
    let registry = CompoundAssembler::with_default_assemblers();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let product = domain
        .insert(DomainObject::new(DomainType::Product, "product.medication"))
        .unwrap();
    let mut context = context_for(&session, AssemblerConfig::default());

    let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
    let result = registry.assemble_do(&mut env, product);
    assert!(matches!(result, Err(AssemblyError::UnsupportedType(ref name)) if name == "Product"));
}

#[test]
fn test_guard_released_after_nested_failure() {
    let registry = CompoundAssembler::with_default_assemblers();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let pet = domain.insert(DomainObject::party("party.patient")).unwrap();
    // persisted lookup that storage has never seen
    let missing = domain
        .insert(DomainObject::with_identity(
            DomainType::Lookup,
            "lookup.species",
            404,
            LinkId::new(),
            1,
        ))
        .unwrap();
    domain.entity_mut(pet).unwrap().classifications.insert(missing);
    let mut context = context_for(&session, AssemblerConfig::default());

    let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
    let result = registry.assemble_do(&mut env, pet);
    assert!(matches!(result, Err(AssemblyError::ObjectNotFound(_))));
    assert_eq!(env.context.assembling_count(), 0);

    let state = env.context.cached_state(pet).unwrap();
    assert!(!env.context.is_assembling(AssemblingKey::State(state)));

    env.domain.entity_mut(pet).unwrap().classifications.clear();
    assert_eq!(registry.assemble_do(&mut env, pet).unwrap(), state);
}

#[test]
fn test_existing_domain_object_refreshed_in_place() {
    let registry = CompoundAssembler::with_default_assemblers();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let customer = domain.insert(DomainObject::party("party.customer").named("Bob")).unwrap();
    let mut context = context_for(&session, AssemblerConfig::default());
    let customer_do = {
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let state = registry.assemble_do(&mut env, customer).unwrap();
        env.context.states().state(state).unwrap().object()
    };
    session.graph_mut().object_mut(customer_do).unwrap().name = Some("Robert".into());

    let mut fresh = context_for(&session, AssemblerConfig::default());
    let mut env = Env::new(&registry, &mut domain, &mut session, &mut fresh);
    let target = registry.assemble_domain(&mut env, &DoRef::Loaded(customer_do)).unwrap();

    assert_eq!(target, customer);
    assert_eq!(domain.len(), 1);
    assert_eq!(domain.object(customer).unwrap().name.as_deref(), Some("Robert"));
}

#[test]
fn test_scalar_round_trip_is_field_equal() {
    let registry = CompoundAssembler::with_default_assemblers();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let note = domain
        .insert(
            DomainObject::new(DomainType::Object, "act.note")
                .named("Checkup")
                .described("Annual visit")
                .with_detail("weight", serde_json::json!(12.5)),
        )
        .unwrap();
    let mut context = context_for(&session, AssemblerConfig::default());
    let note_do = {
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let state = registry.assemble_do(&mut env, note).unwrap();
        env.context.states().state(state).unwrap().object()
    };

    let mut copy = DomainGraph::new();
    let mut fresh = context_for(&session, AssemblerConfig::default());
    let mut env = Env::new(&registry, &mut copy, &mut session, &mut fresh);
    let target = registry.assemble_domain(&mut env, &DoRef::Loaded(note_do)).unwrap();

    assert!(copy.object(target).unwrap().same_fields(domain.object(note).unwrap()));
}
