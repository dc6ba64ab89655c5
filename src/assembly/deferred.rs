use super::context::Context;
use super::state::StateId;
use crate::core::{AssemblyError, ObjectId, Reference, RelationshipEnd, Result};
use crate::domain::{DomainGraph, DomainKey};
use crate::persistent::{DoRef, PersistenceGraph};

/// A relationship end that could not be set while assembling its owner,
/// because the referenced object had no persistent counterpart yet.
///
/// Equality covers the owning state, the end and the reference, so the same
/// pending work registered twice is kept once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeferredAssembly {
    owner: StateId,
    reference: Reference,
    end: RelationshipEnd,
}

impl DeferredAssembly {
    pub fn new(owner: StateId, reference: Reference, end: RelationshipEnd) -> Self {
        Self {
            owner,
            reference,
            end,
        }
    }

    pub fn owner(&self) -> StateId {
        self.owner
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn end(&self) -> RelationshipEnd {
        self.end
    }

    pub fn is_resolvable(&self, context: &Context) -> bool {
        context.cached_reference(&self.reference).is_some()
    }

    /// Finish the work once the referenced object is in the context's cache.
    ///
    /// Returns `false`, leaving everything untouched, while it is not.
    pub fn assemble(&self, context: &mut Context, graph: &mut PersistenceGraph) -> Result<bool> {
        let Some(referent) = context.cached_reference(&self.reference) else {
            return Ok(false);
        };
        let referent_object = context.states().state(referent)?.object();
        let owner_object = context.states().state(self.owner)?.object();

        graph
            .object_mut(owner_object)?
            .as_relationship_mut()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not a relationship", owner_object)))?
            .set_end(self.end, Some(DoRef::Loaded(referent_object)));

        let states = context.states_mut();
        states.add_child(self.owner, referent)?;
        states.remove_deferred(self.owner, self)?;
        log::debug!("Resolved deferred {} end {} -> {}", self.end, owner_object, self.reference);
        Ok(true)
    }
}

/// A domain relationship end whose persistent referent was an uninitialized
/// proxy when the relationship was read back. Resolved by loading the
/// referent by kind and id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredReference {
    object: DomainKey,
    end: RelationshipEnd,
    kind: String,
    id: ObjectId,
}

impl DeferredReference {
    pub fn new(object: DomainKey, end: RelationshipEnd, kind: impl Into<String>, id: ObjectId) -> Self {
        Self {
            object,
            end,
            kind: kind.into(),
            id,
        }
    }

    pub fn object(&self) -> DomainKey {
        self.object
    }

    pub fn end(&self) -> RelationshipEnd {
        self.end
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn apply(&self, domain: &mut DomainGraph, reference: Reference) -> Result<()> {
        domain
            .object_mut(self.object)?
            .as_relationship_mut()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not a relationship", self.object)))?
            .set_end(self.end, Some(reference));
        Ok(())
    }
}
