/// Snapshot tests
///
/// Committed records written to disk and read back into a fresh store.
/// Run with: cargo test --test snapshot_tests

use graph_assembler::storage::StoredBody;
use graph_assembler::{DomainGraph, DomainObject, MemoryStore, Persister, TransactionScope};
use tempfile::TempDir;

#[test]
fn test_snapshot_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.snapshot");
    let persister = Persister::with_defaults();
    let store = MemoryStore::new();
    let mut session = store.open_session();
    let mut domain = DomainGraph::new();
    let customer = domain
        .insert(DomainObject::party("party.customer").named("Alice"))
        .unwrap();
    let pet = domain.insert(DomainObject::party("party.patient").named("Rex")).unwrap();
    domain.relate("entityRelationship.owner", customer, pet).unwrap();
    let mut scope = TransactionScope::new();
    persister.save(&mut scope, &mut session, &mut domain, customer).unwrap();

    store.save_to(&path).unwrap();
    let restored = MemoryStore::load_from(&path).unwrap();

    assert_eq!(restored.record_count().unwrap(), 3);
    let id = domain.object(customer).unwrap().id();
    let record = restored.get("party.customer", id).unwrap().unwrap();
    assert_eq!(record.name.as_deref(), Some("Alice"));
    assert_eq!(record.version, 1);
    match record.body {
        StoredBody::Entity { relationships, .. } => assert_eq!(relationships.len(), 1),
        other => panic!("unexpected body {:?}", other),
    }
}

#[test]
fn test_restored_store_continues_id_sequence() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.snapshot");
    let persister = Persister::with_defaults();
    let store = MemoryStore::new();
    let mut domain = DomainGraph::new();
    let first = domain.insert(DomainObject::party("party.customer")).unwrap();
    let mut scope = TransactionScope::new();
    {
        let mut session = store.open_session();
        persister.save(&mut scope, &mut session, &mut domain, first).unwrap();
    }
    store.save_to(&path).unwrap();

    let restored = MemoryStore::load_from(&path).unwrap();
    let mut session = restored.open_session();
    let second = domain.insert(DomainObject::party("party.customer")).unwrap();
    persister.save(&mut scope, &mut session, &mut domain, second).unwrap();

    assert!(domain.object(second).unwrap().id() > domain.object(first).unwrap().id());
    assert_eq!(restored.record_count().unwrap(), 2);
}

#[test]
fn test_missing_snapshot_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = MemoryStore::load_from(temp_dir.path().join("absent.snapshot"));
    assert!(result.is_err());
}
