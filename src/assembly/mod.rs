// ============================================================================
// Assembly Module
// ============================================================================
//
// Translates between domain objects and their persistent counterparts in
// both directions. Each object type has an Assembler; the CompoundAssembler
// dispatches to them by type and the Context caches what has already been
// translated in the current transaction.
//
// Collections are reconciled in place: members that survive keep their
// persistent objects and only real differences are written.
//
// ============================================================================

pub mod collections;
pub mod compound;
pub mod context;
pub mod deferred;
pub mod entity;
pub mod lookup;
pub mod object;
pub mod patch;
pub mod relationship;
pub mod state;

pub use collections::{MapAssembler, MapDelta, RemovalHook, SetAssembler, SetDelta};
pub use compound::CompoundAssembler;
pub use context::{AssemblingKey, Context, ContextHandler};
pub use deferred::{DeferredAssembly, DeferredReference};
pub use entity::EntityAssembler;
pub use lookup::{IdentityAssembler, LookupAssembler};
pub use object::ObjectAssembler;
pub use patch::ReferencePatch;
pub use relationship::RelationshipAssembler;
pub use state::{DoState, StateId, StateTable, VisitOrder};

use crate::core::Result;
use crate::domain::{DomainGraph, DomainKey, DomainType};
use crate::persistent::{DoKey, PersistenceGraph, PersistentType};
use crate::storage::StorageSession;

/// Everything an assembler works against for one operation.
pub struct Env<'a> {
    pub registry: &'a CompoundAssembler,
    pub domain: &'a mut DomainGraph,
    pub session: &'a mut dyn StorageSession,
    pub context: &'a mut Context,
}

impl<'a> Env<'a> {
    pub fn new(
        registry: &'a CompoundAssembler,
        domain: &'a mut DomainGraph,
        session: &'a mut dyn StorageSession,
        context: &'a mut Context,
    ) -> Self {
        Self {
            registry,
            domain,
            session,
            context,
        }
    }

    pub fn graph(&self) -> &PersistenceGraph {
        self.session.graph()
    }

    pub fn graph_mut(&mut self) -> &mut PersistenceGraph {
        self.session.graph_mut()
    }
}

/// Translates one domain type and its persistent counterpart.
///
/// Implementations supply the type-specific field copies; the default
/// `assemble_*` methods handle caching, identity and the common scalar
/// fields around them.
pub trait Assembler: Send + Sync {
    fn name(&self) -> &'static str;

    fn domain_type(&self) -> DomainType;

    fn persistent_type(&self) -> PersistentType;

    /// Copy type-specific fields of `source` onto `target`. `state` is the
    /// translation result being filled in.
    fn assemble_do_fields(
        &self,
        _env: &mut Env<'_>,
        _target: DoKey,
        _source: DomainKey,
        _state: StateId,
    ) -> Result<()> {
        Ok(())
    }

    /// Copy type-specific fields of `source` onto `target`.
    fn assemble_domain_fields(&self, _env: &mut Env<'_>, _target: DomainKey, _source: DoKey) -> Result<()> {
        Ok(())
    }

    fn assemble_do(&self, env: &mut Env<'_>, source: DomainKey) -> Result<StateId> {
        object::assemble_do(self, env, source)
    }

    fn assemble_domain(&self, env: &mut Env<'_>, source: DoKey) -> Result<DomainKey> {
        object::assemble_domain(self, env, source)
    }

    fn assemble_domain_into(&self, env: &mut Env<'_>, target: DomainKey, source: DoKey) -> Result<()> {
        object::assemble_domain_into(self, env, target, source)
    }
}

/// Run `f` with `key` marked as assembling. The mark is cleared whether or
/// not `f` succeeds.
pub(crate) fn guarded<R>(
    env: &mut Env<'_>,
    key: AssemblingKey,
    f: impl FnOnce(&mut Env<'_>) -> Result<R>,
) -> Result<R> {
    env.context.add_assembling(key);
    let result = f(env);
    env.context.remove_assembling(key);
    result
}
