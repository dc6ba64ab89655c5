use super::deferred::{DeferredAssembly, DeferredReference};
use super::patch::ReferencePatch;
use super::state::StateId;
use super::{Assembler, Context, Env};
use crate::core::{AssemblyError, Reference, RelationshipEnd, Result};
use crate::domain::{DomainKey, DomainType};
use crate::persistent::{DoKey, DoRef, PersistentType, RelationshipDo};

const ENDS: [RelationshipEnd; 2] = [RelationshipEnd::Source, RelationshipEnd::Target];

/// Assembler for relationships between entities.
///
/// An end whose referent has no persistent counterpart yet is left unset
/// and recorded as deferred work on the translation result; an end that
/// refers to an unsaved object gets a patch so it picks up the durable id
/// once one is assigned.
#[derive(Debug, Default)]
pub struct RelationshipAssembler;

impl RelationshipAssembler {
    pub fn new() -> Self {
        Self
    }

    fn assemble_end(
        &self,
        env: &mut Env<'_>,
        target: DoKey,
        source: DomainKey,
        state: StateId,
        end: RelationshipEnd,
        reference: Option<Reference>,
    ) -> Result<()> {
        let value = match &reference {
            None => None,
            Some(reference) => match self.resolve_end(env, state, reference)? {
                Some(key) => Some(DoRef::Loaded(key)),
                None => {
                    log::debug!("Deferring {} end of {} -> {}", end, target, reference);
                    env.context
                        .states_mut()
                        .add_deferred(state, DeferredAssembly::new(state, reference.clone(), end))?;
                    None
                }
            },
        };
        relationship_mut(env, target)?.set_end(end, value);

        if let Some(reference) = reference.filter(Reference::is_new) {
            env.context
                .states_mut()
                .add_patch(state, ReferencePatch::new(source, end, reference))?;
        }
        Ok(())
    }

    /// Find or produce the persistent object an end refers to, nesting its
    /// translation result under `state`.
    fn resolve_end(&self, env: &mut Env<'_>, state: StateId, reference: &Reference) -> Result<Option<DoKey>> {
        if let Some(referent) = env.context.cached_reference(reference) {
            env.context.states_mut().add_child(state, referent)?;
            return Ok(Some(env.context.states().state(referent)?.object()));
        }
        if env.context.config().resolve_domain_references {
            if let Some(key) = env.domain.lookup(reference) {
                let registry = env.registry;
                let referent = registry.assemble_do(env, key)?;
                env.context.states_mut().add_child(state, referent)?;
                return Ok(Some(env.context.states().state(referent)?.object()));
            }
        }
        if reference.is_new() {
            return Ok(None);
        }
        Context::get(env.session, reference)
    }
}

fn relationship_mut<'a>(env: &'a mut Env<'_>, key: DoKey) -> Result<&'a mut RelationshipDo> {
    env.session
        .graph_mut()
        .object_mut(key)?
        .as_relationship_mut()
        .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not a relationship", key)))
}

impl Assembler for RelationshipAssembler {
    fn name(&self) -> &'static str {
        "RelationshipAssembler"
    }

    fn domain_type(&self) -> DomainType {
        DomainType::Relationship
    }

    fn persistent_type(&self) -> PersistentType {
        PersistentType::Relationship
    }

    fn assemble_do_fields(&self, env: &mut Env<'_>, target: DoKey, source: DomainKey, state: StateId) -> Result<()> {
        let body = env.domain.relationship(source)?.clone();
        relationship_mut(env, target)?.sequence = body.sequence;
        for end in ENDS {
            self.assemble_end(env, target, source, state, end, body.end(end).cloned())?;
        }
        Ok(())
    }

    fn assemble_domain_fields(&self, env: &mut Env<'_>, target: DomainKey, source: DoKey) -> Result<()> {
        let graph = env.session.graph();
        let body = graph
            .object(source)?
            .as_relationship()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not a relationship", source)))?;
        let sequence = body.sequence;

        let mut ends = Vec::with_capacity(ENDS.len());
        let mut unresolved = Vec::new();
        for end in ENDS {
            let value = match body.end(end) {
                None => None,
                Some(reference) => match graph.resolve(reference) {
                    Some(key) => graph.reference(key),
                    None => {
                        if let DoRef::Proxy { kind, id } = reference {
                            unresolved.push(DeferredReference::new(target, end, kind.clone(), *id));
                        }
                        None
                    }
                },
            };
            ends.push((end, value));
        }

        for deferred in unresolved {
            env.context.add_deferred_reference(deferred);
        }
        let relationship = env
            .domain
            .object_mut(target)?
            .as_relationship_mut()
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} is not a relationship", target)))?;
        relationship.sequence = sequence;
        for (end, value) in ends {
            relationship.set_end(end, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::CompoundAssembler;
    use crate::config::AssemblerConfig;
    use crate::core::{LinkId, NEW_ID};
    use crate::domain::{DomainGraph, DomainObject};
    use crate::storage::{MemoryStore, StorageSession};

    #[test]
    fn test_unknown_new_end_is_deferred_and_patched() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let owner = domain.insert(DomainObject::party("party.customer")).unwrap();
        let owner_ref = domain.object(owner).unwrap().reference();
        let elsewhere = Reference::new("party.patient", NEW_ID, LinkId::new());
        let rel = domain
            .insert(DomainObject::relationship("entityRelationship.owner", owner_ref, elsewhere.clone()))
            .unwrap();

        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let state = registry.assemble_do(&mut env, rel).unwrap();

        assert!(!env.context.is_complete(state));
        let deferred = env.context.deferred(state);
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].reference(), &elsewhere);
        assert_eq!(deferred[0].end(), RelationshipEnd::Target);

        let target = env.context.states().state(state).unwrap().object();
        let body = env.graph().object(target).unwrap().as_relationship().unwrap();
        assert!(matches!(body.source, Some(DoRef::Loaded(_))));
        assert_eq!(body.target, None);
        // both ends refer to unsaved objects
        assert_eq!(env.context.states().state(state).unwrap().patches().len(), 2);
    }

    #[test]
    fn test_deferred_end_without_domain_resolution() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let owner = domain.insert(DomainObject::party("party.customer")).unwrap();
        let pet = domain.insert(DomainObject::party("party.patient")).unwrap();
        let rel = domain.relate("entityRelationship.owner", owner, pet).unwrap();
        domain.entity_mut(owner).unwrap().relationships.clear();
        domain.entity_mut(pet).unwrap().relationships.clear();

        let config = AssemblerConfig::default().resolve_domain_references(false);
        let mut context = Context::new(session.session_id(), config, false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let state = registry.assemble_do(&mut env, rel).unwrap();
        assert_eq!(env.context.deferred(state).len(), 2);

        registry.assemble_do(&mut env, owner).unwrap();
        registry.assemble_do(&mut env, pet).unwrap();
        for deferred in env.context.deferred(state) {
            assert!(deferred.is_resolvable(env.context));
            assert!(deferred.assemble(env.context, env.session.graph_mut()).unwrap());
        }
        assert!(env.context.is_complete(state));
    }
}
