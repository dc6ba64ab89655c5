use super::state::{DoState, StateId, check_version};
use super::{Assembler, AssemblingKey, Env, guarded};
use crate::core::{AssemblyError, Result};
use crate::domain::{DomainKey, DomainObject, DomainType};
use crate::persistent::{DoKey, PersistentObject, PersistentType};

/// Assembler for plain objects: identity and scalar fields only.
#[derive(Debug, Default)]
pub struct ObjectAssembler;

impl ObjectAssembler {
    pub fn new() -> Self {
        Self
    }
}

impl Assembler for ObjectAssembler {
    fn name(&self) -> &'static str {
        "ObjectAssembler"
    }

    fn domain_type(&self) -> DomainType {
        DomainType::Object
    }

    fn persistent_type(&self) -> PersistentType {
        PersistentType::Object
    }
}

/// Translate a domain object to its persistent counterpart.
///
/// A source already translated in this context yields the cached result;
/// unless it is still being assembled further up the stack, its fields are
/// copied again first.
pub fn assemble_do<A: Assembler + ?Sized>(assembler: &A, env: &mut Env<'_>, source: DomainKey) -> Result<StateId> {
    if let Some(state) = env.context.cached_state(source) {
        if env.context.is_assembling(AssemblingKey::State(state)) {
            return Ok(state);
        }
        let target = env.context.states().state(state)?.object();
        let object = env.domain.object(source)?;
        let (reference, version, is_new) = (object.reference(), object.version(), object.is_new());
        if !is_new && env.context.config().check_versions {
            check_version(&reference, version, env.session.graph().object(target)?.version())?;
        }
        env.context.states_mut().reset(state)?;
        guarded(env, AssemblingKey::State(state), |env| {
            copy_to_do(assembler, env, target, source, state)
        })?;
        return Ok(state);
    }

    let object = env.domain.object(source)?;
    let (reference, version, is_new) = (object.reference(), object.version(), object.is_new());
    let target = if is_new {
        match env.session.graph().lookup(&reference) {
            Some(existing) => existing,
            None => env
                .session
                .graph_mut()
                .insert(PersistentObject::new(assembler.persistent_type(), &reference))?,
        }
    } else {
        super::Context::get(env.session, &reference)?
            .ok_or_else(|| AssemblyError::ObjectNotFound(reference.clone()))?
    };

    let existing = env.session.graph().object(target)?;
    if !existing.persistent_type().is_subtype_of(assembler.persistent_type()) {
        return Err(AssemblyError::TypeMismatch(format!(
            "{} is a {}, expected {}",
            reference,
            existing.persistent_type(),
            assembler.persistent_type()
        )));
    }
    if !is_new && env.context.config().check_versions {
        check_version(&reference, version, existing.version())?;
    }

    let state = env
        .context
        .add(DoState::new(target, Some(source), is_new, version), reference);
    log::debug!("{} assembling {} -> {}", assembler.name(), source, target);
    guarded(env, AssemblingKey::State(state), |env| {
        copy_to_do(assembler, env, target, source, state)
    })?;
    Ok(state)
}

fn copy_to_do<A: Assembler + ?Sized>(
    assembler: &A,
    env: &mut Env<'_>,
    target: DoKey,
    source: DomainKey,
    state: StateId,
) -> Result<()> {
    let from = env.domain.object(source)?;
    let to = env.session.graph_mut().object_mut(target)?;
    if to.name != from.name {
        to.name = from.name.clone();
    }
    if to.description != from.description {
        to.description = from.description.clone();
    }
    to.active = from.active;
    to.last_modified = from.last_modified;
    if to.details != from.details {
        to.details = from.details.clone();
    }
    assembler.assemble_do_fields(env, target, source, state)
}

/// Translate a persistent object back to a domain object. An object already
/// in the domain graph under the same reference is refreshed in place.
pub fn assemble_domain<A: Assembler + ?Sized>(assembler: &A, env: &mut Env<'_>, source: DoKey) -> Result<DomainKey> {
    if let Some(target) = env.context.cached_domain(source) {
        return Ok(target);
    }
    let object = env.session.graph().object(source)?;
    let reference = object.reference();
    if let Some(existing) = env.domain.lookup(&reference) {
        assemble_domain_into(assembler, env, existing, source)?;
        return Ok(existing);
    }

    let domain_type = object.persistent_type().domain_type();
    let created = DomainObject::with_identity(
        domain_type,
        object.kind(),
        object.id(),
        object.link_id(),
        object.version(),
    );
    let target = env.domain.insert(created)?;
    env.context.add_domain(target, source);
    log::debug!("{} assembling {} -> {}", assembler.name(), source, target);
    guarded(env, AssemblingKey::Domain(target), |env| {
        copy_to_domain(assembler, env, target, source)
    })?;
    Ok(target)
}

/// Copy a persistent object onto an existing domain object.
pub fn assemble_domain_into<A: Assembler + ?Sized>(
    assembler: &A,
    env: &mut Env<'_>,
    target: DomainKey,
    source: DoKey,
) -> Result<()> {
    if env.context.is_assembling(AssemblingKey::Domain(target)) {
        return Ok(());
    }
    let expected = env.session.graph().object(source)?.reference();
    let found = env.domain.object(target)?.reference();
    if expected != found {
        return Err(AssemblyError::TypeMismatch(format!(
            "cannot copy {} onto {}",
            expected, found
        )));
    }
    env.context.add_domain(target, source);
    guarded(env, AssemblingKey::Domain(target), |env| {
        copy_to_domain(assembler, env, target, source)
    })
}

fn copy_to_domain<A: Assembler + ?Sized>(
    assembler: &A,
    env: &mut Env<'_>,
    target: DomainKey,
    source: DoKey,
) -> Result<()> {
    let from = env.session.graph().object(source)?;
    let to = env.domain.object_mut(target)?;
    to.set_id(from.id());
    to.set_version(from.version());
    to.name = from.name.clone();
    to.description = from.description.clone();
    to.active = from.active;
    to.last_modified = from.last_modified;
    to.details = from.details.clone();
    assembler.assemble_domain_fields(env, target, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{CompoundAssembler, Context};
    use crate::config::AssemblerConfig;
    use crate::domain::DomainGraph;
    use crate::storage::{MemoryStore, StorageSession};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_scalars_round_trip() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let source = domain
            .insert(
                DomainObject::new(DomainType::Object, "act.note")
                    .named("note")
                    .described("first visit")
                    .with_detail("weight", json!(12.5)),
            )
            .unwrap();
        domain.object_mut(source).unwrap().last_modified = Some(Utc::now());
        domain.object_mut(source).unwrap().active = false;

        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let state = registry.assemble_do(&mut env, source).unwrap();
        let target = env.context.states().state(state).unwrap().object();

        let mut copy = DomainGraph::new();
        let mut fresh = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut copy, &mut session, &mut fresh);
        let back = registry.assemble_domain_key(&mut env, target).unwrap();

        assert!(copy.object(back).unwrap().same_fields(domain.object(source).unwrap()));
    }

    #[test]
    fn test_same_source_yields_same_result() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let source = domain.insert(DomainObject::new(DomainType::Object, "act.note")).unwrap();

        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        let first = registry.assemble_do(&mut env, source).unwrap();
        env.domain.object_mut(source).unwrap().name = Some("renamed".into());
        let second = registry.assemble_do(&mut env, source).unwrap();

        assert_eq!(first, second);
        let target = env.context.states().state(first).unwrap().object();
        assert_eq!(env.graph().object(target).unwrap().name.as_deref(), Some("renamed"));
        assert_eq!(env.context.assembling_count(), 0);
    }

    #[test]
    fn test_missing_persisted_object_fails() {
        let registry = CompoundAssembler::with_default_assemblers();
        let store = MemoryStore::new();
        let mut session = store.open_session();
        let mut domain = DomainGraph::new();
        let source = domain
            .insert(DomainObject::with_identity(
                DomainType::Object,
                "act.note",
                77,
                crate::core::LinkId::new(),
                1,
            ))
            .unwrap();

        let mut context = Context::new(session.session_id(), AssemblerConfig::default(), false);
        let mut env = Env::new(&registry, &mut domain, &mut session, &mut context);
        assert!(matches!(
            registry.assemble_do(&mut env, source),
            Err(AssemblyError::ObjectNotFound(_))
        ));
        assert_eq!(env.context.assembling_count(), 0);
    }
}
