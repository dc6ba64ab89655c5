// ============================================================================
// Assembly Context
// ============================================================================
//
// Per-transaction identity cache. Every domain object translated during a
// transaction maps to exactly one DoState, so translating an object twice,
// or reaching it again through a cycle, yields the same persistent object.
//
// Inside a transaction the context is bound to the TransactionScope under
// the storage session's id and torn down when the transaction completes.
// Outside one, callers create a throwaway context per operation.
//
// ============================================================================

use super::deferred::{DeferredAssembly, DeferredReference};
use super::state::{DoState, StateId, StateTable, VisitOrder};
use crate::config::AssemblerConfig;
use crate::core::{AssemblyError, NEW_ID, Reference, Result, SessionId};
use crate::domain::{DomainGraph, DomainKey};
use crate::persistent::{DoKey, PersistenceGraph};
use crate::storage::StorageSession;
use crate::transaction::{Resources, TransactionScope, TransactionState, TransactionSynchronization};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Marks an object whose translation is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssemblingKey {
    /// Domain to persistent, keyed by the state being filled in
    State(StateId),
    /// Persistent to domain, keyed by the domain object being filled in
    Domain(DomainKey),
}

/// Callbacks invoked as the transaction a context is bound to completes.
pub trait ContextHandler: Send + Sync {
    /// Runs before the storage session is flushed. An error aborts the
    /// commit.
    fn pre_commit(
        &self,
        context: &mut Context,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
    ) -> Result<()>;

    fn commit(&self, context: &mut Context, session: &mut dyn StorageSession, domain: &mut DomainGraph);

    fn rollback(&self, context: &mut Context, session: &mut dyn StorageSession, domain: &mut DomainGraph);
}

pub struct Context {
    session: SessionId,
    config: AssemblerConfig,
    synchronization_active: bool,
    states: StateTable,
    by_domain: HashMap<DomainKey, StateId>,
    by_object: HashMap<DoKey, DomainKey>,
    by_reference: HashMap<Reference, StateId>,
    assembling: HashSet<AssemblingKey>,
    saved: Vec<StateId>,
    save_deferred: Vec<StateId>,
    deferred_references: Vec<DeferredReference>,
    orphans: Vec<DoKey>,
    removed: HashSet<DoKey>,
    handler: Option<Arc<dyn ContextHandler>>,
}

impl Context {
    pub fn new(session: SessionId, config: AssemblerConfig, synchronization_active: bool) -> Self {
        Self {
            session,
            config,
            synchronization_active,
            states: StateTable::new(),
            by_domain: HashMap::new(),
            by_object: HashMap::new(),
            by_reference: HashMap::new(),
            assembling: HashSet::new(),
            saved: Vec::new(),
            save_deferred: Vec::new(),
            deferred_references: Vec::new(),
            orphans: Vec::new(),
            removed: HashSet::new(),
            handler: None,
        }
    }

    /// Returns the context bound to the active transaction for `session`,
    /// creating and binding one on first use.
    pub fn get_context<'s>(
        scope: &'s mut TransactionScope,
        session: SessionId,
        config: &AssemblerConfig,
        handler: Option<Arc<dyn ContextHandler>>,
    ) -> Result<&'s mut Context> {
        if !scope.is_synchronization_active() {
            return Err(AssemblyError::TransactionError(
                "No transaction synchronization is active".into(),
            ));
        }
        if !scope.has_resource(session) {
            scope.bind_resource(session, Context::new(session, config.clone(), true))?;
            scope.register_synchronization(Box::new(ContextSynchronization::new(session)))?;
            log::debug!("Bound assembly context to {}", session);
        }
        let context = scope.resource_mut(session).ok_or_else(|| {
            AssemblyError::TransactionError(format!("No context bound to {}", session))
        })?;
        context.handler = handler;
        Ok(context)
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn is_synchronization_active(&self) -> bool {
        self.synchronization_active
    }

    pub fn handler(&self) -> Option<&Arc<dyn ContextHandler>> {
        self.handler.as_ref()
    }

    pub fn set_handler(&mut self, handler: Option<Arc<dyn ContextHandler>>) {
        self.handler = handler;
    }

    pub fn states(&self) -> &StateTable {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut StateTable {
        &mut self.states
    }

    // ------------------------------------------------------------------------
    // Identity cache
    // ------------------------------------------------------------------------

    /// Register a translation result under its source's identity and
    /// reference.
    pub fn add(&mut self, state: DoState, reference: Reference) -> StateId {
        let object = state.object();
        let source = state.source();
        let id = self.states.insert(state);
        if let Some(source) = source {
            self.by_domain.insert(source, id);
            self.by_object.insert(object, source);
        }
        self.by_reference.insert(reference, id);
        id
    }

    /// Record that `target` was read back from `source`.
    pub fn add_domain(&mut self, target: DomainKey, source: DoKey) {
        self.by_object.insert(source, target);
    }

    pub fn cached_state(&self, source: DomainKey) -> Option<StateId> {
        self.by_domain.get(&source).copied()
    }

    pub fn cached_domain(&self, object: DoKey) -> Option<DomainKey> {
        self.by_object.get(&object).copied()
    }

    pub fn cached_reference(&self, reference: &Reference) -> Option<StateId> {
        self.by_reference.get(reference).copied()
    }

    /// Find the persistent object for a reference: first in the session,
    /// then by loading it from storage when it has a durable id.
    pub fn get(session: &mut dyn StorageSession, reference: &Reference) -> Result<Option<DoKey>> {
        if let Some(key) = session.graph().lookup(reference) {
            return Ok(Some(key));
        }
        if reference.is_new() {
            return Ok(None);
        }
        session.load(reference.kind(), reference.id())
    }

    /// Delete an object and evict it from the cache.
    pub fn remove(&mut self, session: &mut dyn StorageSession, object: DoKey) -> Result<()> {
        let reference = session
            .graph()
            .reference(object)
            .ok_or_else(|| AssemblyError::UnknownObject(object.to_string()))?;
        if !reference.is_new() {
            session.delete(object)?;
        }
        self.removed.insert(object);
        if let Some(source) = self.by_object.remove(&object) {
            if let Some(state) = self.by_domain.remove(&source) {
                self.save_deferred.retain(|s| *s != state);
                self.saved.retain(|s| *s != state);
            }
        }
        self.by_reference.remove(&reference);
        log::debug!("Removed {} from {}", reference, self.session);
        Ok(())
    }

    pub fn is_removed(&self, object: DoKey) -> bool {
        self.removed.contains(&object)
    }

    // ------------------------------------------------------------------------
    // Re-entrancy guard
    // ------------------------------------------------------------------------

    pub fn add_assembling(&mut self, key: AssemblingKey) {
        self.assembling.insert(key);
    }

    pub fn remove_assembling(&mut self, key: AssemblingKey) {
        self.assembling.remove(&key);
    }

    pub fn is_assembling(&self, key: AssemblingKey) -> bool {
        self.assembling.contains(&key)
    }

    pub fn assembling_count(&self) -> usize {
        self.assembling.len()
    }

    // ------------------------------------------------------------------------
    // Saved and deferred work
    // ------------------------------------------------------------------------

    pub fn add_saved(&mut self, state: StateId) {
        if !self.saved.contains(&state) {
            self.saved.push(state);
        }
    }

    pub fn saved(&self) -> &[StateId] {
        &self.saved
    }

    pub fn add_save_deferred(&mut self, state: StateId) {
        if !self.save_deferred.contains(&state) {
            self.save_deferred.push(state);
        }
    }

    pub fn remove_save_deferred(&mut self, state: StateId) {
        self.save_deferred.retain(|s| *s != state);
    }

    pub fn save_deferred(&self) -> &[StateId] {
        &self.save_deferred
    }

    pub fn is_complete(&self, state: StateId) -> bool {
        self.states.is_complete(state)
    }

    pub fn deferred(&self, state: StateId) -> Vec<DeferredAssembly> {
        self.states.deferred(state)
    }

    pub fn objects(&self, state: StateId) -> Vec<DoKey> {
        self.states.objects(state)
    }

    pub fn add_deferred_reference(&mut self, deferred: DeferredReference) {
        if !self.deferred_references.contains(&deferred) {
            self.deferred_references.push(deferred);
        }
    }

    pub fn take_deferred_references(&mut self) -> Vec<DeferredReference> {
        std::mem::take(&mut self.deferred_references)
    }

    /// Record a relationship dropped from an entity's collection.
    pub fn add_orphan(&mut self, object: DoKey) {
        if !self.orphans.contains(&object) {
            self.orphans.push(object);
        }
    }

    pub fn take_orphans(&mut self) -> Vec<DoKey> {
        std::mem::take(&mut self.orphans)
    }

    // ------------------------------------------------------------------------
    // Identifier propagation
    // ------------------------------------------------------------------------

    /// Copy ids and versions from persistent objects back to their sources,
    /// and rewrite relationship ends that referred to new objects.
    pub fn update_ids(&self, root: StateId, domain: &mut DomainGraph, graph: &PersistenceGraph) -> Result<()> {
        for id in self.states.walk(root, VisitOrder::Pre) {
            let state = self.states.state(id)?;
            let Some(object) = graph.get(state.object()) else {
                continue;
            };
            if let Some(target) = state.source().and_then(|source| domain.get_mut(source)) {
                target.set_id(object.id());
                target.set_version(object.version());
            }
            for patch in state.patches() {
                let Some(referent) = self.cached_reference(patch.reference()) else {
                    continue;
                };
                let referent = self.states.state(referent)?.object();
                if let Some(reference) = graph.reference(referent) {
                    if !reference.is_new() {
                        patch.update(domain, reference)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Undo identifiers tentatively assigned to objects that were new when
    /// they were translated.
    pub fn rollback_ids(&self, root: StateId, domain: &mut DomainGraph, graph: &mut PersistenceGraph) -> Result<()> {
        for id in self.states.walk(root, VisitOrder::Pre) {
            let state = self.states.state(id)?;
            if state.is_new() {
                if graph.contains(state.object()) {
                    graph.assign_id(state.object(), NEW_ID)?;
                    graph.set_version(state.object(), 0)?;
                }
                if let Some(target) = state.source().and_then(|source| domain.get_mut(source)) {
                    target.set_id(NEW_ID);
                    target.set_version(state.version());
                }
            }
            for patch in state.patches().iter().chain(state.reverters()) {
                patch.revert(domain)?;
            }
        }
        Ok(())
    }

    /// Drop every cached translation and all pending work.
    pub fn destroy(&mut self) {
        let roots: Vec<StateId> = self.by_domain.values().copied().collect();
        for root in roots {
            self.states.destroy(root);
        }
        self.states = StateTable::new();
        self.by_domain.clear();
        self.by_object.clear();
        self.by_reference.clear();
        self.assembling.clear();
        self.saved.clear();
        self.save_deferred.clear();
        self.deferred_references.clear();
        self.orphans.clear();
        self.removed.clear();
        log::debug!("Destroyed assembly context for {}", self.session);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("session", &self.session)
            .field("synchronization_active", &self.synchronization_active)
            .field("states", &self.states.len())
            .field("saved", &self.saved.len())
            .field("save_deferred", &self.save_deferred.len())
            .finish()
    }
}

/// Ties a bound context to its transaction: parks it while the transaction
/// is suspended, drives the handler on completion, then unbinds it.
pub(crate) struct ContextSynchronization {
    key: SessionId,
    parked: Option<Context>,
}

impl ContextSynchronization {
    pub(crate) fn new(key: SessionId) -> Self {
        Self { key, parked: None }
    }
}

impl TransactionSynchronization for ContextSynchronization {
    fn suspend(&mut self, resources: &mut Resources) {
        self.parked = resources.remove(&self.key);
    }

    fn resume(&mut self, resources: &mut Resources) {
        if let Some(context) = self.parked.take() {
            resources.insert(self.key, context);
        }
    }

    fn before_commit(
        &mut self,
        resources: &mut Resources,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
    ) -> Result<()> {
        if session.session_id() != self.key {
            return Ok(());
        }
        if let Some(context) = resources.get_mut(&self.key) {
            if let Some(handler) = context.handler().cloned() {
                handler.pre_commit(context, session, domain)?;
            }
        }
        Ok(())
    }

    fn after_completion(
        &mut self,
        resources: &mut Resources,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
        status: TransactionState,
    ) {
        let Some(mut context) = resources.remove(&self.key) else {
            return;
        };
        if session.session_id() == self.key {
            if let Some(handler) = context.handler().cloned() {
                match status {
                    TransactionState::Committed => handler.commit(&mut context, session, domain),
                    _ => handler.rollback(&mut context, session, domain),
                }
            }
        }
        context.destroy();
    }
}
