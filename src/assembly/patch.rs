use crate::core::{AssemblyError, Reference, RelationshipEnd, Result};
use crate::domain::{DomainGraph, DomainKey, RelationshipBody};

/// Keeps a domain relationship end in step with the durable id of the object
/// it refers to. Registered when the referenced object is new: once storage
/// assigns the id the end is rewritten, and a rollback restores the
/// original unsaved reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePatch {
    object: DomainKey,
    end: RelationshipEnd,
    original: Reference,
}

impl ReferencePatch {
    pub fn new(object: DomainKey, end: RelationshipEnd, original: Reference) -> Self {
        Self {
            object,
            end,
            original,
        }
    }

    pub fn object(&self) -> DomainKey {
        self.object
    }

    pub fn end(&self) -> RelationshipEnd {
        self.end
    }

    /// The reference as it was when the patch was registered.
    pub fn reference(&self) -> &Reference {
        &self.original
    }

    /// Rewrite the end to `reference`. Ends that have since been pointed at a
    /// different object are left alone. Returns whether the end changed.
    pub fn update(&self, domain: &mut DomainGraph, reference: Reference) -> Result<bool> {
        let body = self.body(domain)?;
        match body.end(self.end) {
            Some(current) if *current == self.original && current.id() != reference.id() => {
                body.set_end(self.end, Some(reference));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn revert(&self, domain: &mut DomainGraph) -> Result<()> {
        let body = self.body(domain)?;
        if body.end(self.end) == Some(&self.original) {
            body.set_end(self.end, Some(self.original.clone()));
        }
        Ok(())
    }

    fn body<'a>(&self, domain: &'a mut DomainGraph) -> Result<&'a mut RelationshipBody> {
        domain
            .object_mut(self.object)?
            .as_relationship_mut()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not a relationship", self.object)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LinkId, NEW_ID};
    use crate::domain::DomainObject;

    fn graph() -> (DomainGraph, DomainKey, Reference) {
        let mut domain = DomainGraph::new();
        let owner = Reference::new("party.customer", 3, LinkId::new());
        let pet = Reference::new("party.patient", NEW_ID, LinkId::new());
        let rel = domain
            .insert(DomainObject::relationship("entityRelationship.owner", owner, pet.clone()))
            .unwrap();
        (domain, rel, pet)
    }

    #[test]
    fn test_update_then_revert() {
        let (mut domain, rel, pet) = graph();
        let patch = ReferencePatch::new(rel, RelationshipEnd::Target, pet.clone());

        assert!(patch.update(&mut domain, pet.with_id(21)).unwrap());
        assert_eq!(domain.relationship(rel).unwrap().target.as_ref().map(Reference::id), Some(21));
        assert!(!patch.update(&mut domain, pet.with_id(21)).unwrap());

        patch.revert(&mut domain).unwrap();
        assert_eq!(domain.relationship(rel).unwrap().target.as_ref().map(Reference::id), Some(NEW_ID));
    }

    #[test]
    fn test_update_skips_repointed_end() {
        let (mut domain, rel, pet) = graph();
        let patch = ReferencePatch::new(rel, RelationshipEnd::Target, pet.clone());
        let other = Reference::new("party.patient", 9, LinkId::new());
        domain.object_mut(rel).unwrap().as_relationship_mut().unwrap().target = Some(other.clone());

        assert!(!patch.update(&mut domain, pet.with_id(21)).unwrap());
        patch.revert(&mut domain).unwrap();
        assert_eq!(domain.relationship(rel).unwrap().target, Some(other));
    }
}
