// ============================================================================
// Persistence Graph
// ============================================================================
//
// Arena of storage-facing objects owned by a storage session, the equivalent
// of an ORM's first-level cache. Collections hold arena keys; relationship
// ends hold either a key or an uninitialized lazy proxy.
//
// ============================================================================

pub mod object;
pub mod tracked;

pub use object::{DoRef, EntityDo, PersistentBody, PersistentObject, PersistentType, RelationshipDo};
pub use tracked::{MapChange, SetChange, TrackedMap, TrackedSet};

use crate::core::{AssemblyError, NEW_ID, ObjectId, Reference, Result};
use std::collections::HashMap;
use std::fmt;

/// Handle to an object in a [`PersistenceGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DoKey(usize);

impl DoKey {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for DoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "do#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct PersistenceGraph {
    objects: Vec<Option<PersistentObject>>,
    by_reference: HashMap<Reference, DoKey>,
    by_id: HashMap<(String, ObjectId), DoKey>,
}

impl PersistenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: PersistentObject) -> Result<DoKey> {
        let reference = object.reference();
        if self.by_reference.contains_key(&reference) {
            return Err(AssemblyError::DuplicateObject(reference));
        }
        let key = DoKey(self.objects.len());
        if !object.is_new() {
            self.by_id.insert((object.kind().to_string(), object.id()), key);
        }
        self.by_reference.insert(reference, key);
        self.objects.push(Some(object));
        Ok(key)
    }

    pub fn get(&self, key: DoKey) -> Option<&PersistentObject> {
        self.objects.get(key.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, key: DoKey) -> Option<&mut PersistentObject> {
        self.objects.get_mut(key.0).and_then(Option::as_mut)
    }

    pub fn object(&self, key: DoKey) -> Result<&PersistentObject> {
        self.get(key)
            .ok_or_else(|| AssemblyError::UnknownObject(key.to_string()))
    }

    pub fn object_mut(&mut self, key: DoKey) -> Result<&mut PersistentObject> {
        self.get_mut(key)
            .ok_or_else(|| AssemblyError::UnknownObject(key.to_string()))
    }

    pub fn contains(&self, key: DoKey) -> bool {
        self.get(key).is_some()
    }

    pub fn lookup(&self, reference: &Reference) -> Option<DoKey> {
        self.by_reference.get(reference).copied()
    }

    pub fn lookup_id(&self, kind: &str, id: ObjectId) -> Option<DoKey> {
        self.by_id.get(&(kind.to_string(), id)).copied()
    }

    /// Follow a relationship end to an object in this graph. Proxies whose
    /// referent has not been loaded resolve to `None`.
    pub fn resolve(&self, reference: &DoRef) -> Option<DoKey> {
        match reference {
            DoRef::Loaded(key) => Some(*key).filter(|key| self.contains(*key)),
            DoRef::Proxy { kind, id } => self.lookup_id(kind, *id),
        }
    }

    pub fn reference(&self, key: DoKey) -> Option<Reference> {
        self.get(key).map(PersistentObject::reference)
    }

    /// Record the durable id the storage assigned to an object.
    pub fn assign_id(&mut self, key: DoKey, id: ObjectId) -> Result<()> {
        let object = self.object_mut(key)?;
        let old = object.id;
        object.id = id;
        let kind = object.kind().to_string();
        if old != NEW_ID {
            self.by_id.remove(&(kind.clone(), old));
        }
        if id != NEW_ID {
            self.by_id.insert((kind, id), key);
        }
        Ok(())
    }

    pub fn set_version(&mut self, key: DoKey, version: i64) -> Result<()> {
        self.object_mut(key)?.version = version;
        Ok(())
    }

    /// Remove an object from the graph. Its key is never reused.
    pub fn detach(&mut self, key: DoKey) -> Option<PersistentObject> {
        let object = self.objects.get_mut(key.0).and_then(Option::take)?;
        self.by_reference.remove(&object.reference());
        if !object.is_new() {
            self.by_id.remove(&(object.kind().to_string(), object.id()));
        }
        Some(object)
    }

    pub fn keys(&self) -> impl Iterator<Item = DoKey> + '_ {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, object)| object.is_some())
            .map(|(index, _)| DoKey(index))
    }

    pub fn len(&self) -> usize {
        self.by_reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_reference.is_empty()
    }
}
