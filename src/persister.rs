// ============================================================================
// Persister
// ============================================================================
//
// Entry point for saving, loading and removing domain objects. Each call
// runs against the assembly context bound to the active transaction, or a
// throwaway context committed immediately when no transaction is active.
//
// Objects whose references cannot all be resolved yet are held back as
// save-deferred and retried on every later save, and one final time before
// the transaction commits.
//
// ============================================================================

use crate::assembly::{CompoundAssembler, Context, ContextHandler, DeferredAssembly, Env, StateId};
use crate::config::AssemblerConfig;
use crate::core::{AssemblyError, Reference, Result};
use crate::domain::{DomainGraph, DomainKey};
use crate::storage::StorageSession;
use crate::transaction::TransactionScope;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// Saves, loads and removes domain objects through a storage session.
///
/// Cheap to clone: clones share the assembler registry and configuration.
///
/// # Examples
///
/// ```
/// use graph_assembler::{DomainGraph, DomainObject, MemoryStore, Persister, TransactionScope};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let persister = Persister::with_defaults();
/// let store = MemoryStore::new();
/// let mut session = store.open_session();
/// let mut domain = DomainGraph::new();
/// let mut scope = TransactionScope::new();
///
/// let customer = domain.insert(DomainObject::party("party.customer").named("Bob"))?;
///
/// scope.begin()?;
/// persister.save(&mut scope, &mut session, &mut domain, customer)?;
/// scope.commit(&mut session, &mut domain)?;
///
/// assert!(!domain.object(customer)?.is_new());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Persister {
    core: Arc<PersisterCore>,
}

struct PersisterCore {
    registry: CompoundAssembler,
    config: AssemblerConfig,
}

impl Persister {
    pub fn new(registry: CompoundAssembler, config: AssemblerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(PersisterCore { registry, config }),
        })
    }

    /// Persister with the built-in assemblers and default configuration.
    pub fn with_defaults() -> Self {
        Self {
            core: Arc::new(PersisterCore {
                registry: CompoundAssembler::with_default_assemblers(),
                config: AssemblerConfig::default(),
            }),
        }
    }

    pub fn registry(&self) -> &CompoundAssembler {
        &self.core.registry
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.core.config
    }

    pub fn save(
        &self,
        scope: &mut TransactionScope,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
        object: DomainKey,
    ) -> Result<()> {
        let span = info_span!("persister_save", object = %object);
        let _enter = span.enter();

        self.execute(scope, session, domain, |core, env| {
            core.save_object(env, object)?;
            if !env.context.save_deferred().is_empty() {
                core.save_deferred(env, false)?;
            }
            Ok(())
        })
    }

    /// Save several objects as one unit of work. References between them
    /// resolve regardless of the order they are given in.
    pub fn save_all(
        &self,
        scope: &mut TransactionScope,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
        objects: &[DomainKey],
    ) -> Result<()> {
        let span = info_span!("persister_save_all", count = objects.len());
        let _enter = span.enter();

        self.execute(scope, session, domain, |core, env| {
            for object in objects {
                core.save_object(env, *object)?;
            }
            if !env.context.save_deferred().is_empty() {
                core.save_deferred(env, false)?;
            }
            Ok(())
        })
    }

    /// Load the object `reference` names and translate it to the domain.
    /// Returns `None` when storage has no such object.
    pub fn get(
        &self,
        scope: &mut TransactionScope,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
        reference: &Reference,
    ) -> Result<Option<DomainKey>> {
        let span = info_span!("persister_get", reference = %reference);
        let _enter = span.enter();

        self.execute(scope, session, domain, |core, env| {
            if let Some(state) = env.context.cached_reference(reference) {
                if let Some(source) = env.context.states().state(state)?.source() {
                    return Ok(Some(source));
                }
            }
            let Some(key) = Context::get(env.session, reference)? else {
                return Ok(None);
            };
            let registry = env.registry;
            let target = registry.assemble_domain_key(env, key)?;
            core.resolve_deferred_references(env)?;
            Ok(Some(target))
        })
    }

    /// Delete the persistent counterpart of `object`.
    pub fn remove(
        &self,
        scope: &mut TransactionScope,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
        object: DomainKey,
    ) -> Result<()> {
        let span = info_span!("persister_remove", object = %object);
        let _enter = span.enter();

        self.execute(scope, session, domain, |_, env| {
            let reference = env.domain.object(object)?.reference();
            let key = match env.context.cached_reference(&reference) {
                Some(state) => Some(env.context.states().state(state)?.object()),
                None => Context::get(env.session, &reference)?,
            };
            match key {
                Some(key) => env.context.remove(env.session, key),
                None => {
                    event!(Level::DEBUG, reference = %reference, "nothing to remove");
                    Ok(())
                }
            }
        })
    }

    fn execute<R>(
        &self,
        scope: &mut TransactionScope,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
        operation: impl FnOnce(&PersisterCore, &mut Env<'_>) -> Result<R>,
    ) -> Result<R> {
        let core = self.core.as_ref();
        let handler: Arc<dyn ContextHandler> = self.core.clone();

        if scope.is_synchronization_active() {
            let context = Context::get_context(scope, session.session_id(), &core.config, Some(handler))?;
            let mut env = Env::new(&core.registry, domain, session, context);
            return operation(core, &mut env);
        }

        let mut context = Context::new(session.session_id(), core.config.clone(), false);
        context.set_handler(Some(handler));
        let result = {
            let mut env = Env::new(&core.registry, &mut *domain, &mut *session, &mut context);
            operation(core, &mut env)
        };
        let result = result.and_then(|value| {
            core.auto_commit(&mut context, session, domain)?;
            Ok(value)
        });
        if result.is_err() {
            session.discard();
        }
        context.destroy();
        result
    }
}

impl PersisterCore {
    fn save_object(&self, env: &mut Env<'_>, object: DomainKey) -> Result<()> {
        let registry = env.registry;
        let state = registry.assemble_do(env, object)?;
        if env.context.is_complete(state) {
            self.save_state(env, state)
        } else {
            event!(Level::DEBUG, object = %object, "save deferred until references resolve");
            env.context.add_save_deferred(state);
            Ok(())
        }
    }

    fn save_state(&self, env: &mut Env<'_>, state: StateId) -> Result<()> {
        for key in env.context.objects(state) {
            if !env.context.is_removed(key) {
                env.session.save(key)?;
            }
        }
        self.remove_orphans(env)?;
        env.context.update_ids(state, env.domain, env.session.graph())?;
        env.context.add_saved(state);
        Ok(())
    }

    /// Delete relationships dropped from a collection that no entity in the
    /// session still holds.
    fn remove_orphans(&self, env: &mut Env<'_>) -> Result<()> {
        for orphan in env.context.take_orphans() {
            let graph = env.session.graph();
            if !graph.contains(orphan) {
                continue;
            }
            let held = graph.keys().any(|key| {
                graph
                    .get(key)
                    .and_then(|object| object.as_entity())
                    .is_some_and(|entity| entity.relationships.contains(&orphan))
            });
            if !held {
                event!(Level::DEBUG, orphan = %orphan, "removing orphaned relationship");
                env.context.remove(env.session, orphan)?;
            }
        }
        Ok(())
    }

    fn save_deferred(&self, env: &mut Env<'_>, fail_on_incomplete: bool) -> Result<()> {
        for state in self.assemble_deferred(env)? {
            self.save_state(env, state)?;
        }
        if fail_on_incomplete {
            if let Some(&state) = env.context.save_deferred().first() {
                let deferred = env.context.deferred(state);
                return Err(match deferred.first() {
                    Some(pending) => AssemblyError::UnresolvedReference(pending.reference().clone()),
                    None => AssemblyError::TransactionError(format!("{} could not be saved", state)),
                });
            }
        }
        Ok(())
    }

    /// Replay deferred work until a pass makes no progress. Returns the
    /// states that became complete.
    fn assemble_deferred(&self, env: &mut Env<'_>) -> Result<Vec<StateId>> {
        let mut result = Vec::new();
        for pass in 0..self.config.max_deferred_passes {
            take_complete(env.context, &mut result);
            let mut deferred: Vec<DeferredAssembly> = Vec::new();
            for state in env.context.save_deferred() {
                for item in env.context.deferred(*state) {
                    if !deferred.contains(&item) {
                        deferred.push(item);
                    }
                }
            }
            let mut processed = false;
            for item in &deferred {
                if item.assemble(env.context, env.session.graph_mut())? {
                    processed = true;
                }
            }
            if !processed {
                break;
            }
            log::debug!("Deferred assembly pass {} made progress", pass + 1);
        }
        // work resolved by the last pass
        take_complete(env.context, &mut result);
        Ok(result)
    }

    /// Fill in relationship ends that were read back as unloaded proxies.
    fn resolve_deferred_references(&self, env: &mut Env<'_>) -> Result<()> {
        let pending = env.context.take_deferred_references();
        if pending.is_empty() {
            return Ok(());
        }
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for deferred in &pending {
            *by_kind.entry(deferred.kind().to_string()).or_default() += 1;
        }
        log::debug!("Resolving deferred references: {:?}", by_kind);

        for deferred in pending {
            let resolved = env
                .session
                .load(deferred.kind(), deferred.id())?
                .and_then(|key| env.session.graph().reference(key));
            match resolved {
                Some(reference) => deferred.apply(env.domain, reference)?,
                None => log::warn!(
                    "Unable to resolve {}:{} for {} end of {}",
                    deferred.kind(),
                    deferred.id(),
                    deferred.end(),
                    deferred.object()
                ),
            }
        }
        Ok(())
    }

    /// Commit the work of a context used outside any transaction.
    fn auto_commit(&self, context: &mut Context, session: &mut dyn StorageSession, domain: &mut DomainGraph) -> Result<()> {
        let result = self.pre_commit(context, session, domain).and_then(|_| session.flush());
        match result {
            Ok(()) => {
                self.commit(context, session, domain);
                Ok(())
            }
            Err(e) => {
                session.discard();
                self.rollback(context, session, domain);
                Err(e)
            }
        }
    }
}

/// Move save-deferred states with no pending work into `result`.
fn take_complete(context: &mut Context, result: &mut Vec<StateId>) {
    for state in context.save_deferred().to_vec() {
        if context.is_complete(state) {
            context.remove_save_deferred(state);
            result.push(state);
        }
    }
}

impl ContextHandler for PersisterCore {
    fn pre_commit(&self, context: &mut Context, session: &mut dyn StorageSession, domain: &mut DomainGraph) -> Result<()> {
        if context.save_deferred().is_empty() {
            return Ok(());
        }
        let span = info_span!("persister_pre_commit", pending = context.save_deferred().len());
        let _enter = span.enter();
        let mut env = Env::new(&self.registry, domain, session, context);
        self.save_deferred(&mut env, true)
    }

    fn commit(&self, context: &mut Context, session: &mut dyn StorageSession, domain: &mut DomainGraph) {
        for state in context.saved().to_vec() {
            if let Err(e) = context.update_ids(state, domain, session.graph()) {
                event!(Level::ERROR, state = %state, error = %e, "failed to propagate ids after commit");
            }
        }
    }

    fn rollback(&self, context: &mut Context, session: &mut dyn StorageSession, domain: &mut DomainGraph) {
        if !self.config.revert_ids_on_rollback {
            return;
        }
        for state in context.saved().to_vec() {
            if let Err(e) = context.rollback_ids(state, domain, session.graph_mut()) {
                event!(Level::ERROR, state = %state, error = %e, "failed to revert ids after rollback");
            }
        }
    }
}
