use super::collections::{MapAssembler, RemovalHook, SetAssembler};
use super::state::StateId;
use super::{Assembler, Env};
use crate::core::Result;
use crate::domain::{DomainKey, DomainType};
use crate::persistent::{DoKey, PersistentObject, PersistentType, TrackedMap, TrackedSet};

fn relationships_of(object: &mut PersistentObject) -> Option<&mut TrackedSet<DoKey>> {
    object.as_entity_mut().map(|entity| &mut entity.relationships)
}

fn classifications_of(object: &mut PersistentObject) -> Option<&mut TrackedSet<DoKey>> {
    object.as_entity_mut().map(|entity| &mut entity.classifications)
}

fn identities_of(object: &mut PersistentObject) -> Option<&mut TrackedMap<String, DoKey>> {
    object.as_entity_mut().map(|entity| &mut entity.identities)
}

/// Assembler for entities and their subtypes. Besides the scalar fields it
/// reconciles the relationship, identity and classification collections.
pub struct EntityAssembler {
    name: &'static str,
    domain_type: DomainType,
    persistent_type: PersistentType,
    relationships: SetAssembler,
    identities: MapAssembler,
    classifications: SetAssembler,
}

impl EntityAssembler {
    pub fn new(name: &'static str, domain_type: DomainType, persistent_type: PersistentType) -> Self {
        Self {
            name,
            domain_type,
            persistent_type,
            relationships: SetAssembler::new("relationships", relationships_of)
                .with_removal_hook(RemovalHook::DetachRelationship),
            identities: MapAssembler::new("identities", identities_of),
            classifications: SetAssembler::new("classifications", classifications_of),
        }
    }

    pub fn entity() -> Self {
        Self::new("EntityAssembler", DomainType::Entity, PersistentType::Entity)
    }

    pub fn party() -> Self {
        Self::new("PartyAssembler", DomainType::Party, PersistentType::Party)
    }
}

impl Assembler for EntityAssembler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn domain_type(&self) -> DomainType {
        self.domain_type
    }

    fn persistent_type(&self) -> PersistentType {
        self.persistent_type
    }

    fn assemble_do_fields(&self, env: &mut Env<'_>, target: DoKey, source: DomainKey, state: StateId) -> Result<()> {
        let entity = env.domain.entity(source)?;
        let relationships: Vec<DomainKey> = entity.relationships.iter().copied().collect();
        let identities: Vec<(String, DomainKey)> = entity
            .identities
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        let classifications: Vec<DomainKey> = entity.classifications.iter().copied().collect();

        self.relationships.assemble(env, target, state, &relationships)?;
        self.identities.assemble(env, target, state, &identities)?;
        self.classifications.assemble(env, target, state, &classifications)?;
        Ok(())
    }

    fn assemble_domain_fields(&self, env: &mut Env<'_>, target: DomainKey, source: DoKey) -> Result<()> {
        let relationships = self.relationships.assemble_domain(env, source)?;
        let identities = self.identities.assemble_domain(env, source)?;
        let classifications = self.classifications.assemble_domain(env, source)?;

        let entity = env.domain.entity_mut(target)?;
        entity.relationships = relationships.into_iter().collect();
        entity.identities = identities.into_iter().collect();
        entity.classifications = classifications.into_iter().collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{CompoundAssembler, Context};
    use crate::config::AssemblerConfig;
    use crate::domain::{DomainGraph, DomainObject};
    use crate::persistent::{MapChange, SetChange};
    use crate::storage::{MemoryStore, StorageSession};

    #[test]
    fn test_classifications_reconciled_in_place() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let pet = domain.insert(DomainObject::party("party.patient")).unwrap();
        let canine = domain.insert(DomainObject::lookup("lookup.species", "CANINE")).unwrap();
        let male = domain.insert(DomainObject::lookup("lookup.sex", "MALE")).unwrap();
        let desexed = domain.insert(DomainObject::lookup("lookup.desexed", "YES")).unwrap();
        domain.classify(pet, canine).unwrap();
        domain.classify(pet, male).unwrap();

        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let state = registry.assemble_do(&mut env, pet).unwrap();
        let target = env.context.states().state(state).unwrap().object();
        env.graph_mut().object_mut(target).unwrap().reset_changes();

        env.domain.entity_mut(pet).unwrap().classifications.remove(&male);
        env.domain.classify(pet, desexed).unwrap();
        registry.assemble_do(&mut env, pet).unwrap();

        let entity = env.graph().object(target).unwrap().as_entity().unwrap();
        assert_eq!(entity.classifications.len(), 2);
        let changes = entity.classifications.changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|c| matches!(c, SetChange::Removed(_))));
        assert!(changes.iter().any(|c| matches!(c, SetChange::Added(_))));
    }

    #[test]
    fn test_identities_keep_equal_entries() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let customer = domain.insert(DomainObject::party("party.customer")).unwrap();
        domain
            .add_identity(customer, DomainObject::identity("entityIdentity.code", "C-1"))
            .unwrap();

        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let state = registry.assemble_do(&mut env, customer).unwrap();
        let target = env.context.states().state(state).unwrap().object();
        env.graph_mut().object_mut(target).unwrap().reset_changes();

        registry.assemble_do(&mut env, customer).unwrap();
        let entity = env.graph().object(target).unwrap().as_entity().unwrap();
        assert_eq!(entity.identities.len(), 1);
        assert!(!entity.identities.is_dirty());
    }

    #[test]
    fn test_identities_reconciled_by_key() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let customer = domain.insert(DomainObject::party("party.customer")).unwrap();
        for code in ["C-1", "O-1", "T-1"] {
            domain
                .add_identity(customer, DomainObject::identity("entityIdentity.code", code))
                .unwrap();
        }

        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let state = registry.assemble_do(&mut env, customer).unwrap();
        let target = env.context.states().state(state).unwrap().object();
        let kept = env.graph().object(target).unwrap().as_entity().unwrap().identities
            .get(&"T-1".to_string())
            .copied();
        env.graph_mut().object_mut(target).unwrap().reset_changes();

        let reissued = env
            .domain
            .insert(DomainObject::identity("entityIdentity.code", "C-1"))
            .unwrap();
        let identities = &mut env.domain.entity_mut(customer).unwrap().identities;
        identities.remove("O-1");
        identities.insert("C-1".to_string(), reissued);
        env.domain
            .add_identity(customer, DomainObject::identity("entityIdentity.email", "E-1"))
            .unwrap();
        registry.assemble_do(&mut env, customer).unwrap();

        let entity = env.graph().object(target).unwrap().as_entity().unwrap();
        assert_eq!(entity.identities.len(), 3);
        assert_eq!(
            entity.identities.changes(),
            &[
                MapChange::Removed("O-1".to_string()),
                MapChange::Replaced("C-1".to_string()),
                MapChange::Inserted("E-1".to_string()),
            ]
        );
        assert_eq!(entity.identities.get(&"T-1".to_string()).copied(), kept);
    }
}
