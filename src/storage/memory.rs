// ============================================================================
// In-Memory Storage
// ============================================================================
//
// MemoryStore holds committed records shared by every session opened on it.
// MemoryStorage is one session: it owns a persistence graph of loaded and new
// objects, queues saves and deletes, and writes them to the store on flush.
//
// ============================================================================

use super::StorageSession;
use super::record::{StoredBody, StoredObject, StoredRef};
use super::snapshot::{SnapshotManager, StoreSnapshot, StoreTables};
use crate::core::{AssemblyError, ObjectId, Reference, Result, SessionId};
use crate::persistent::{
    DoKey, DoRef, EntityDo, PersistenceGraph, PersistentBody, PersistentObject, RelationshipDo,
    TrackedMap, TrackedSet,
};
use log::debug;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct StoreState {
    records: StoreTables,
    next_id: ObjectId,
    writes: u64,
}

/// Shared committed data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session over this store.
    pub fn open_session(&self) -> MemoryStorage {
        MemoryStorage::new(self.clone())
    }

    pub fn get(&self, kind: &str, id: ObjectId) -> Result<Option<StoredObject>> {
        let state = self.inner.read()?;
        Ok(state.records.get(kind).and_then(|rows| rows.get(&id)).cloned())
    }

    pub fn contains(&self, kind: &str, id: ObjectId) -> Result<bool> {
        Ok(self.get(kind, id)?.is_some())
    }

    pub fn record_count(&self) -> Result<usize> {
        let state = self.inner.read()?;
        Ok(state.records.values().map(BTreeMap::len).sum())
    }

    /// Number of record inserts and updates performed so far.
    pub fn write_count(&self) -> Result<u64> {
        Ok(self.inner.read()?.writes)
    }

    fn next_id(&self) -> Result<ObjectId> {
        let mut state = self.inner.write()?;
        state.next_id += 1;
        Ok(state.next_id)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshot = {
            let state = self.inner.read()?;
            StoreSnapshot::new(state.records.clone(), state.next_id)
        };
        SnapshotManager::new(path).save(&snapshot)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let snapshot = SnapshotManager::new(path)
            .load()?
            .ok_or_else(|| AssemblyError::StorageError("Snapshot not found".into()))?;
        let store = Self::new();
        {
            let mut state = store.inner.write()?;
            state.records = snapshot.records;
            state.next_id = snapshot.next_id;
        }
        Ok(store)
    }
}

/// Session counters, used to observe how much work the assembler caused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub loads: usize,
    pub saves: usize,
    pub deletes: usize,
    pub flushes: usize,
}

pub struct MemoryStorage {
    id: SessionId,
    store: MemoryStore,
    graph: PersistenceGraph,
    pending_saves: Vec<DoKey>,
    pending_deletes: Vec<DoKey>,
    stats: SessionStats,
}

impl MemoryStorage {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            id: SessionId::new(),
            store,
            graph: PersistenceGraph::new(),
            pending_saves: Vec::new(),
            pending_deletes: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn pending_saves(&self) -> &[DoKey] {
        &self.pending_saves
    }

    pub fn pending_deletes(&self) -> &[DoKey] {
        &self.pending_deletes
    }

    fn materialize(&mut self, record: StoredObject) -> Result<DoKey> {
        let reference = Reference::new(record.kind.clone(), record.id, record.link_id);
        let mut object = PersistentObject::new(record.ty, &reference);
        object.version = record.version;
        object.name = record.name;
        object.description = record.description;
        object.active = record.active;
        object.last_modified = record.last_modified;
        object.details = record.details;
        let members = match record.body {
            StoredBody::Plain => None,
            StoredBody::Lookup { code } => {
                object.body = PersistentBody::Lookup { code };
                None
            }
            StoredBody::Identity { identity } => {
                object.body = PersistentBody::Identity { identity };
                None
            }
            StoredBody::Relationship {
                source,
                target,
                sequence,
            } => {
                object.body = PersistentBody::Relationship(RelationshipDo {
                    source: source.map(proxy),
                    target: target.map(proxy),
                    sequence,
                });
                None
            }
            StoredBody::Entity {
                relationships,
                identities,
                classifications,
            } => Some((relationships, identities, classifications)),
        };

        // insert before loading members so a member pointing back finds it
        let key = self.graph.insert(object)?;
        if let Some((relationships, identities, classifications)) = members {
            let relationships = self.load_members(&relationships)?;
            let classifications = self.load_members(&classifications)?;
            let mut identity_keys = Vec::with_capacity(identities.len());
            for (name, member) in identities {
                identity_keys.push((name, self.load_required(&member)?));
            }
            self.graph.object_mut(key)?.body = PersistentBody::Entity(EntityDo {
                relationships: TrackedSet::from_loaded(relationships),
                identities: TrackedMap::from_loaded(identity_keys),
                classifications: TrackedSet::from_loaded(classifications),
            });
        }
        Ok(key)
    }

    fn load_members(&mut self, members: &[StoredRef]) -> Result<Vec<DoKey>> {
        members.iter().map(|member| self.load_required(member)).collect()
    }

    fn load_required(&mut self, member: &StoredRef) -> Result<DoKey> {
        self.load(&member.kind, member.id)?.ok_or_else(|| {
            AssemblyError::StorageError(format!("Dangling reference {}:{}", member.kind, member.id))
        })
    }

    fn stored_ref(&self, owner: &PersistentObject, key: DoKey) -> Result<StoredRef> {
        let member = self.graph.object(key)?;
        if member.is_new() {
            return Err(AssemblyError::TransientObject(owner.reference()));
        }
        Ok(StoredRef::new(member.kind(), member.id()))
    }

    /// Members sorted by kind and id, so equal collections store equally.
    fn stored_refs<'a>(
        &self,
        owner: &PersistentObject,
        members: impl Iterator<Item = &'a DoKey>,
    ) -> Result<Vec<StoredRef>> {
        let mut refs = members
            .map(|key| self.stored_ref(owner, *key))
            .collect::<Result<Vec<_>>>()?;
        refs.sort();
        Ok(refs)
    }

    fn stored_end(&self, owner: &PersistentObject, end: Option<&DoRef>) -> Result<Option<StoredRef>> {
        match end {
            None => Ok(None),
            Some(DoRef::Loaded(key)) => self.stored_ref(owner, *key).map(Some),
            Some(DoRef::Proxy { kind, id }) => Ok(Some(StoredRef::new(kind.clone(), *id))),
        }
    }

    fn to_record(&self, object: &PersistentObject) -> Result<StoredObject> {
        let body = match &object.body {
            PersistentBody::Plain => StoredBody::Plain,
            PersistentBody::Lookup { code } => StoredBody::Lookup { code: code.clone() },
            PersistentBody::Identity { identity } => StoredBody::Identity {
                identity: identity.clone(),
            },
            PersistentBody::Relationship(relationship) => StoredBody::Relationship {
                source: self.stored_end(object, relationship.source.as_ref())?,
                target: self.stored_end(object, relationship.target.as_ref())?,
                sequence: relationship.sequence,
            },
            PersistentBody::Entity(entity) => StoredBody::Entity {
                relationships: self.stored_refs(object, entity.relationships.iter())?,
                identities: entity
                    .identities
                    .iter()
                    .map(|(name, key)| Ok((name.clone(), self.stored_ref(object, *key)?)))
                    .collect::<Result<_>>()?,
                classifications: self.stored_refs(object, entity.classifications.iter())?,
            },
        };
        Ok(StoredObject {
            ty: object.persistent_type(),
            kind: object.kind().to_string(),
            id: object.id(),
            link_id: object.link_id(),
            version: object.version(),
            name: object.name.clone(),
            description: object.description.clone(),
            active: object.active,
            last_modified: object.last_modified,
            details: object.details.clone(),
            body,
        })
    }
}

fn proxy(stored: StoredRef) -> DoRef {
    DoRef::Proxy {
        kind: stored.kind,
        id: stored.id,
    }
}

impl StorageSession for MemoryStorage {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn graph(&self) -> &PersistenceGraph {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut PersistenceGraph {
        &mut self.graph
    }

    fn load(&mut self, kind: &str, id: ObjectId) -> Result<Option<DoKey>> {
        if let Some(key) = self.graph.lookup_id(kind, id) {
            return Ok(Some(key));
        }
        let Some(record) = self.store.get(kind, id)? else {
            return Ok(None);
        };
        self.stats.loads += 1;
        debug!("Loading {}:{} into {}", kind, id, self.id);
        self.materialize(record).map(Some)
    }

    fn save(&mut self, key: DoKey) -> Result<()> {
        if self.graph.object(key)?.is_new() {
            let id = self.store.next_id()?;
            self.graph.assign_id(key, id)?;
        }
        self.pending_deletes.retain(|pending| *pending != key);
        if !self.pending_saves.contains(&key) {
            self.pending_saves.push(key);
        }
        self.stats.saves += 1;
        Ok(())
    }

    fn delete(&mut self, key: DoKey) -> Result<()> {
        self.graph.object(key)?;
        self.pending_saves.retain(|pending| *pending != key);
        if !self.pending_deletes.contains(&key) {
            self.pending_deletes.push(key);
        }
        self.stats.deletes += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut updates = Vec::with_capacity(self.pending_saves.len());
        for key in &self.pending_saves {
            updates.push((*key, self.to_record(self.graph.object(*key)?)?));
        }

        {
            let mut state = self.store.inner.write()?;
            for (key, mut record) in updates {
                let existing = state
                    .records
                    .get(&record.kind)
                    .and_then(|rows| rows.get(&record.id));
                let version = match existing {
                    Some(existing) if existing.same_content(&record) => {
                        if let Some(object) = self.graph.get_mut(key) {
                            object.reset_changes();
                        }
                        continue;
                    }
                    Some(existing) => existing.version + 1,
                    None => 1,
                };
                record.version = version;
                self.graph.set_version(key, version)?;
                self.graph.object_mut(key)?.reset_changes();
                debug!("Writing {}:{} version {}", record.kind, record.id, version);
                state
                    .records
                    .entry(record.kind.clone())
                    .or_default()
                    .insert(record.id, record);
                state.writes += 1;
            }

            for key in &self.pending_deletes {
                if let Some(object) = self.graph.get(*key) {
                    if !object.is_new() {
                        if let Some(rows) = state.records.get_mut(object.kind()) {
                            rows.remove(&object.id());
                        }
                    }
                }
            }
        }

        for key in std::mem::take(&mut self.pending_deletes) {
            self.graph.detach(key);
        }
        self.pending_saves.clear();
        self.stats.flushes += 1;
        Ok(())
    }

    fn discard(&mut self) {
        self.pending_saves.clear();
        self.pending_deletes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LinkId, NEW_ID};
    use crate::persistent::PersistentType;

    fn new_object(graph: &mut PersistenceGraph, ty: PersistentType, kind: &str) -> DoKey {
        let reference = Reference::new(kind, NEW_ID, LinkId::new());
        graph.insert(PersistentObject::new(ty, &reference)).unwrap()
    }

    #[test]
    fn test_save_assigns_id_and_flush_writes() {
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let key = new_object(session.graph_mut(), PersistentType::Party, "party.customer");

        session.save(key).unwrap();
        let id = session.graph().object(key).unwrap().id();
        assert!(id > 0);
        assert!(!store.contains("party.customer", id).unwrap());

        session.flush().unwrap();
        let record = store.get("party.customer", id).unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(session.graph().object(key).unwrap().version(), 1);
    }

    #[test]
    fn test_unchanged_record_is_not_rewritten() {
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let key = new_object(session.graph_mut(), PersistentType::Lookup, "lookup.species");
        session.save(key).unwrap();
        session.flush().unwrap();
        assert_eq!(store.write_count().unwrap(), 1);

        session.save(key).unwrap();
        session.flush().unwrap();
        assert_eq!(store.write_count().unwrap(), 1);

        session.graph_mut().object_mut(key).unwrap().name = Some("Species".into());
        session.save(key).unwrap();
        session.flush().unwrap();
        assert_eq!(store.write_count().unwrap(), 2);
        assert_eq!(session.graph().object(key).unwrap().version(), 2);
    }

    #[test]
    fn test_flush_rejects_unsaved_member() {
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let owner = new_object(session.graph_mut(), PersistentType::Entity, "entity.thing");
        let rel = new_object(session.graph_mut(), PersistentType::Relationship, "entityRelationship.link");
        session
            .graph_mut()
            .object_mut(owner)
            .unwrap()
            .as_entity_mut()
            .unwrap()
            .relationships
            .insert(rel);

        session.save(owner).unwrap();
        assert!(matches!(session.flush(), Err(AssemblyError::TransientObject(_))));
    }

    #[test]
    fn test_load_materializes_members_and_proxies_ends() {
        let store = MemoryStore::new();
        let (owner_id, pet_id) = {
            let mut session = store.open_session();
            let owner = new_object(session.graph_mut(), PersistentType::Party, "party.customer");
            let pet = new_object(session.graph_mut(), PersistentType::Party, "party.patient");
            let rel = new_object(session.graph_mut(), PersistentType::Relationship, "entityRelationship.owner");
            for key in [owner, pet, rel] {
                session.save(key).unwrap();
            }
            {
                let graph = session.graph_mut();
                let body = graph.object_mut(rel).unwrap().as_relationship_mut().unwrap();
                body.source = Some(DoRef::Loaded(owner));
                body.target = Some(DoRef::Loaded(pet));
                graph.object_mut(owner).unwrap().as_entity_mut().unwrap().relationships.insert(rel);
            }
            session.flush().unwrap();
            let graph = session.graph();
            (graph.object(owner).unwrap().id(), graph.object(pet).unwrap().id())
        };

        let mut session = store.open_session();
        let owner = session.load("party.customer", owner_id).unwrap().unwrap();
        let entity = session.graph().object(owner).unwrap().as_entity().unwrap();
        assert_eq!(entity.relationships.len(), 1);
        assert!(!entity.relationships.is_dirty());

        let rel = *entity.relationships.iter().next().unwrap();
        let body = session.graph().object(rel).unwrap().as_relationship().unwrap();
        assert_eq!(
            body.source,
            Some(DoRef::Proxy {
                kind: "party.customer".into(),
                id: owner_id,
            })
        );
        assert_eq!(
            body.target,
            Some(DoRef::Proxy {
                kind: "party.patient".into(),
                id: pet_id,
            })
        );
        assert_eq!(session.graph().resolve(body.source.as_ref().unwrap()), Some(owner));
        assert_eq!(session.stats().loads, 2);
    }

    #[test]
    fn test_delete_removes_record_and_detaches() {
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let key = new_object(session.graph_mut(), PersistentType::Object, "act.note");
        session.save(key).unwrap();
        session.flush().unwrap();
        let id = session.graph().object(key).unwrap().id();

        session.delete(key).unwrap();
        session.flush().unwrap();
        assert!(!store.contains("act.note", id).unwrap());
        assert!(session.graph().get(key).is_none());
    }

    #[test]
    fn test_discard_drops_pending_work() {
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let key = new_object(session.graph_mut(), PersistentType::Object, "act.note");
        session.save(key).unwrap();
        session.discard();
        session.flush().unwrap();
        assert_eq!(store.record_count().unwrap(), 0);
    }
}
