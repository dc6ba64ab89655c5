// ============================================================================
// Domain Graph
// ============================================================================
//
// Arena owning the application-facing objects. Objects refer to one another
// either by arena key (collections an entity owns) or by Reference
// (relationship ends), never by pointer, so cyclic graphs need no shared
// ownership.
//
// ============================================================================

pub mod object;

pub use object::{DomainBody, DomainObject, DomainType, EntityBody, RelationshipBody};

use crate::core::{AssemblyError, LinkId, Reference, Result};
use std::collections::HashMap;
use std::fmt;

/// Handle to an object in a [`DomainGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainKey(usize);

impl DomainKey {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct DomainGraph {
    objects: Vec<DomainObject>,
    by_link: HashMap<LinkId, DomainKey>,
}

impl DomainGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object. Link ids are unique within a graph.
    pub fn insert(&mut self, object: DomainObject) -> Result<DomainKey> {
        if self.by_link.contains_key(&object.link_id()) {
            return Err(AssemblyError::DuplicateObject(object.reference()));
        }
        let key = DomainKey(self.objects.len());
        self.by_link.insert(object.link_id(), key);
        self.objects.push(object);
        Ok(key)
    }

    pub fn get(&self, key: DomainKey) -> Option<&DomainObject> {
        self.objects.get(key.0)
    }

    pub fn get_mut(&mut self, key: DomainKey) -> Option<&mut DomainObject> {
        self.objects.get_mut(key.0)
    }

    pub fn object(&self, key: DomainKey) -> Result<&DomainObject> {
        self.get(key)
            .ok_or_else(|| AssemblyError::UnknownObject(key.to_string()))
    }

    pub fn object_mut(&mut self, key: DomainKey) -> Result<&mut DomainObject> {
        self.get_mut(key)
            .ok_or_else(|| AssemblyError::UnknownObject(key.to_string()))
    }

    /// Find the object a reference points at.
    pub fn lookup(&self, reference: &Reference) -> Option<DomainKey> {
        self.by_link
            .get(&reference.link_id())
            .copied()
            .filter(|key| self.objects[key.0].kind() == reference.kind())
    }

    pub fn keys(&self) -> impl Iterator<Item = DomainKey> + '_ {
        (0..self.objects.len()).map(DomainKey)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Create a relationship from `source` to `target` and add it to both
    /// entities' relationship sets.
    pub fn relate(
        &mut self,
        kind: impl Into<String>,
        source: DomainKey,
        target: DomainKey,
    ) -> Result<DomainKey> {
        let source_ref = self.entity_reference(source)?;
        let target_ref = self.entity_reference(target)?;
        let relationship = self.insert(DomainObject::relationship(kind, source_ref, target_ref))?;
        self.entity_mut(source)?.relationships.insert(relationship);
        self.entity_mut(target)?.relationships.insert(relationship);
        Ok(relationship)
    }

    /// Remove a relationship from both of its ends that live in this graph.
    pub fn unrelate(&mut self, relationship: DomainKey) -> Result<()> {
        let body = self
            .object(relationship)?
            .as_relationship()
            .cloned()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not a relationship", relationship)))?;
        for reference in [body.source, body.target].into_iter().flatten() {
            if let Some(end) = self.lookup(&reference) {
                if let Some(entity) = self.objects[end.0].as_entity_mut() {
                    entity.relationships.remove(&relationship);
                }
            }
        }
        Ok(())
    }

    pub fn add_identity(&mut self, entity: DomainKey, identity: DomainObject) -> Result<DomainKey> {
        let value = match &identity.body {
            DomainBody::Identity { identity } => identity.clone(),
            _ => {
                return Err(AssemblyError::TypeMismatch(format!(
                    "{} is not an identity",
                    identity.reference()
                )));
            }
        };
        self.entity(entity)?;
        let key = self.insert(identity)?;
        self.entity_mut(entity)?.identities.insert(value, key);
        Ok(key)
    }

    pub fn classify(&mut self, entity: DomainKey, lookup: DomainKey) -> Result<()> {
        if !matches!(self.object(lookup)?.body, DomainBody::Lookup { .. }) {
            return Err(AssemblyError::TypeMismatch(format!("{} is not a lookup", lookup)));
        }
        self.entity_mut(entity)?.classifications.insert(lookup);
        Ok(())
    }

    pub fn entity(&self, key: DomainKey) -> Result<&EntityBody> {
        self.object(key)?
            .as_entity()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not an entity", key)))
    }

    pub fn entity_mut(&mut self, key: DomainKey) -> Result<&mut EntityBody> {
        self.object_mut(key)?
            .as_entity_mut()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not an entity", key)))
    }

    pub fn relationship(&self, key: DomainKey) -> Result<&RelationshipBody> {
        self.object(key)?
            .as_relationship()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not a relationship", key)))
    }

    fn entity_reference(&self, key: DomainKey) -> Result<Reference> {
        self.entity(key)?;
        Ok(self.object(key)?.reference())
    }
}
