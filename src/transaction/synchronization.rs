use super::TransactionState;
use crate::assembly::Context;
use crate::core::{Result, SessionId};
use crate::domain::DomainGraph;
use crate::storage::StorageSession;
use std::collections::HashMap;

/// Resources bound to a transaction, keyed by storage session.
pub type Resources = HashMap<SessionId, Context>;

/// Callback registered with an active [`TransactionScope`](super::TransactionScope).
///
/// Every hook has an empty default so implementations only override the
/// phases they care about.
pub trait TransactionSynchronization {
    /// The transaction is being suspended; unbind anything held in `resources`.
    fn suspend(&mut self, _resources: &mut Resources) {}

    /// The transaction is being resumed; rebind what `suspend` removed.
    fn resume(&mut self, _resources: &mut Resources) {}

    /// Runs before the storage session is flushed. An error rolls the
    /// transaction back.
    fn before_commit(
        &mut self,
        _resources: &mut Resources,
        _session: &mut dyn StorageSession,
        _domain: &mut DomainGraph,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs once the transaction reached `status`, which is terminal.
    fn after_completion(
        &mut self,
        _resources: &mut Resources,
        _session: &mut dyn StorageSession,
        _domain: &mut DomainGraph,
        _status: TransactionState,
    ) {
    }
}
