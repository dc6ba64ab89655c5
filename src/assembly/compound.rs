// ============================================================================
// Assembler Registry
// ============================================================================
//
// Dispatches translation to the assembler registered for an object's type.
// Domain types are matched exactly. Persistent types fall back along their
// supertype chain, most specific first, so a subtype with no assembler of
// its own is handled by its nearest registered ancestor.
//
// ============================================================================

use super::entity::EntityAssembler;
use super::lookup::{IdentityAssembler, LookupAssembler};
use super::object::ObjectAssembler;
use super::relationship::RelationshipAssembler;
use super::state::StateId;
use super::{Assembler, Env};
use crate::core::{AssemblyError, Result};
use crate::domain::{DomainKey, DomainType};
use crate::persistent::{DoKey, DoRef, PersistentType};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct CompoundAssembler {
    by_domain: HashMap<DomainType, Arc<dyn Assembler>>,
    by_persistent: HashMap<PersistentType, Arc<dyn Assembler>>,
}

impl CompoundAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with assemblers for every built-in type except products,
    /// which are read back through the entity assembler.
    pub fn with_default_assemblers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ObjectAssembler::new()));
        registry.register(Arc::new(EntityAssembler::entity()));
        registry.register(Arc::new(EntityAssembler::party()));
        registry.register(Arc::new(RelationshipAssembler::new()));
        registry.register(Arc::new(LookupAssembler::new()));
        registry.register(Arc::new(IdentityAssembler::new()));
        registry
    }

    /// Register an assembler under both of its types, replacing any earlier
    /// registration.
    pub fn register(&mut self, assembler: Arc<dyn Assembler>) {
        self.by_domain.insert(assembler.domain_type(), assembler.clone());
        self.by_persistent.insert(assembler.persistent_type(), assembler);
    }

    pub fn resolve_domain(&self, ty: DomainType) -> Result<&Arc<dyn Assembler>> {
        self.by_domain
            .get(&ty)
            .ok_or_else(|| AssemblyError::UnsupportedType(ty.to_string()))
    }

    pub fn resolve_persistent(&self, ty: PersistentType) -> Result<&Arc<dyn Assembler>> {
        for candidate in ty.ancestry() {
            if let Some(assembler) = self.by_persistent.get(&candidate) {
                if candidate != ty {
                    log::debug!("{} handled by {} assembler", ty, candidate);
                }
                return Ok(assembler);
            }
        }
        Err(AssemblyError::UnsupportedType(ty.to_string()))
    }

    /// Names of the registered assemblers, sorted.
    pub fn assembler_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.by_domain.values().map(|a| a.name()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn assemble_do(&self, env: &mut Env<'_>, source: DomainKey) -> Result<StateId> {
        let ty = env.domain.object(source)?.domain_type();
        self.resolve_domain(ty)?.assemble_do(env, source)
    }

    /// Translate a relationship end or collection member back to the domain,
    /// loading it first when it is an uninitialized proxy.
    pub fn assemble_domain(&self, env: &mut Env<'_>, source: &DoRef) -> Result<DomainKey> {
        let key = self.deproxy(env, source)?;
        self.assemble_domain_key(env, key)
    }

    pub fn assemble_domain_key(&self, env: &mut Env<'_>, source: DoKey) -> Result<DomainKey> {
        let ty = env.session.graph().object(source)?.persistent_type();
        self.resolve_persistent(ty)?.assemble_domain(env, source)
    }

    pub fn assemble_domain_into(&self, env: &mut Env<'_>, target: DomainKey, source: &DoRef) -> Result<()> {
        let key = self.deproxy(env, source)?;
        let ty = env.session.graph().object(key)?.persistent_type();
        self.resolve_persistent(ty)?.assemble_domain_into(env, target, key)
    }

    fn deproxy(&self, env: &mut Env<'_>, source: &DoRef) -> Result<DoKey> {
        if let Some(key) = env.session.graph().resolve(source) {
            return Ok(key);
        }
        match source {
            DoRef::Proxy { kind, id } => env
                .session
                .load(kind, *id)?
                .ok_or_else(|| AssemblyError::UnknownObject(format!("{}:{}", kind, id))),
            DoRef::Loaded(key) => Err(AssemblyError::UnknownObject(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Context;
    use crate::config::AssemblerConfig;
    use crate::core::{LinkId, NEW_ID, Reference};
    use crate::domain::{DomainGraph, DomainObject};
    use crate::persistent::PersistentObject;
    use crate::storage::{MemoryStore, StorageSession};

    #[test]
    fn test_most_specific_assembler_wins() {
        let registry = CompoundAssembler::with_default_assemblers();
        assert_eq!(registry.resolve_persistent(PersistentType::Party).unwrap().name(), "PartyAssembler");
        assert_eq!(registry.resolve_persistent(PersistentType::Product).unwrap().name(), "EntityAssembler");
        assert!(matches!(
            registry.resolve_domain(DomainType::Product),
            Err(AssemblyError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_empty_registry_rejects_everything() {
        let registry = CompoundAssembler::new();
        assert!(matches!(
            registry.resolve_persistent(PersistentType::Party),
            Err(AssemblyError::UnsupportedType(_))
        ));
        assert!(registry.assembler_names().is_empty());
    }

    #[test]
    fn test_product_read_back_as_entity() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let reference = Reference::new("product.medication", NEW_ID, LinkId::new());
        let mut object = PersistentObject::new(PersistentType::Product, &reference);
        object.name = Some("Amoxicillin".into());
        let key = session.graph_mut().insert(object).unwrap();

        let mut domain = DomainGraph::new();
        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let target = registry.assemble_domain(&mut env, &DoRef::Loaded(key)).unwrap();

        let product = domain.object(target).unwrap();
        assert_eq!(product.domain_type(), DomainType::Product);
        assert_eq!(product.name.as_deref(), Some("Amoxicillin"));
    }

    #[test]
    fn test_product_cannot_be_saved() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let product = domain
            .insert(DomainObject::new(DomainType::Product, "product.medication"))
            .unwrap();

        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        assert!(matches!(
            registry.assemble_do(&mut env, product),
            Err(AssemblyError::UnsupportedType(_))
        ));
    }
}
