// ============================================================================
// Transaction Scope
// ============================================================================
//
// Thread-confined registry of what is bound to the current transaction:
// resources keyed by storage session and the synchronizations to run when
// the transaction completes. The scope drives commit and rollback of the
// storage session it is handed.
//
// ============================================================================

use super::synchronization::{Resources, TransactionSynchronization};
use super::{TransactionId, TransactionState};
use crate::assembly::Context;
use crate::core::{AssemblyError, Result, SessionId};
use crate::domain::DomainGraph;
use crate::storage::StorageSession;
use tracing::{Level, event, info_span};

/// An active transaction taken off its scope by [`TransactionScope::suspend`].
pub struct SuspendedTransaction {
    id: TransactionId,
    synchronizations: Vec<Box<dyn TransactionSynchronization>>,
}

impl SuspendedTransaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }
}

#[derive(Default)]
pub struct TransactionScope {
    current: Option<TransactionId>,
    resources: Resources,
    synchronizations: Vec<Box<dyn TransactionSynchronization>>,
}

impl TransactionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> Result<TransactionId> {
        if let Some(id) = self.current {
            return Err(AssemblyError::TransactionError(format!(
                "Transaction {} is already active",
                id
            )));
        }
        let id = TransactionId::new();
        self.current = Some(id);
        event!(Level::DEBUG, transaction = %id, "transaction begun");
        Ok(id)
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.current
    }

    pub fn is_synchronization_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_resource(&self, key: SessionId) -> bool {
        self.resources.contains_key(&key)
    }

    pub fn bind_resource(&mut self, key: SessionId, context: Context) -> Result<()> {
        if self.resources.contains_key(&key) {
            return Err(AssemblyError::TransactionError(format!(
                "A context is already bound to {}",
                key
            )));
        }
        self.resources.insert(key, context);
        Ok(())
    }

    pub fn resource(&self, key: SessionId) -> Option<&Context> {
        self.resources.get(&key)
    }

    pub fn resource_mut(&mut self, key: SessionId) -> Option<&mut Context> {
        self.resources.get_mut(&key)
    }

    pub fn unbind_resource(&mut self, key: SessionId) -> Option<Context> {
        self.resources.remove(&key)
    }

    pub fn register_synchronization(&mut self, synchronization: Box<dyn TransactionSynchronization>) -> Result<()> {
        if self.current.is_none() {
            return Err(AssemblyError::TransactionError(
                "Cannot register a synchronization without an active transaction".into(),
            ));
        }
        self.synchronizations.push(synchronization);
        Ok(())
    }

    pub fn synchronization_count(&self) -> usize {
        self.synchronizations.len()
    }

    /// Detach the active transaction so another can run in this scope.
    pub fn suspend(&mut self) -> Result<SuspendedTransaction> {
        let id = self.require_active()?;
        let mut synchronizations = std::mem::take(&mut self.synchronizations);
        for synchronization in synchronizations.iter_mut() {
            synchronization.suspend(&mut self.resources);
        }
        self.current = None;
        event!(Level::DEBUG, transaction = %id, "transaction suspended");
        Ok(SuspendedTransaction {
            id,
            synchronizations,
        })
    }

    pub fn resume(&mut self, suspended: SuspendedTransaction) -> Result<()> {
        if let Some(id) = self.current {
            return Err(AssemblyError::TransactionError(format!(
                "Cannot resume {} while {} is active",
                suspended.id, id
            )));
        }
        let SuspendedTransaction {
            id,
            mut synchronizations,
        } = suspended;
        for synchronization in synchronizations.iter_mut() {
            synchronization.resume(&mut self.resources);
        }
        self.synchronizations = synchronizations;
        self.current = Some(id);
        event!(Level::DEBUG, transaction = %id, "transaction resumed");
        Ok(())
    }

    /// Run the before-commit hooks, flush the session, then report the outcome
    /// to every synchronization. A failing hook or flush rolls back instead
    /// and its error is returned.
    pub fn commit(&mut self, session: &mut dyn StorageSession, domain: &mut DomainGraph) -> Result<()> {
        let id = self.require_active()?;
        let span = info_span!("transaction_commit", transaction = %id);
        let _enter = span.enter();

        let mut synchronizations = std::mem::take(&mut self.synchronizations);
        let mut result = Ok(());
        for synchronization in synchronizations.iter_mut() {
            result = synchronization.before_commit(&mut self.resources, session, domain);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = session.flush();
        }

        let status = match &result {
            Ok(()) => TransactionState::Committed,
            Err(e) => {
                event!(Level::WARN, error = %e, "commit failed, rolling back");
                session.discard();
                TransactionState::RolledBack
            }
        };
        self.complete(synchronizations, session, domain, status);
        result
    }

    pub fn rollback(&mut self, session: &mut dyn StorageSession, domain: &mut DomainGraph) -> Result<()> {
        let id = self.require_active()?;
        let span = info_span!("transaction_rollback", transaction = %id);
        let _enter = span.enter();

        session.discard();
        let synchronizations = std::mem::take(&mut self.synchronizations);
        self.complete(synchronizations, session, domain, TransactionState::RolledBack);
        Ok(())
    }

    fn complete(
        &mut self,
        mut synchronizations: Vec<Box<dyn TransactionSynchronization>>,
        session: &mut dyn StorageSession,
        domain: &mut DomainGraph,
        status: TransactionState,
    ) {
        for synchronization in synchronizations.iter_mut() {
            synchronization.after_completion(&mut self.resources, session, domain, status);
        }
        self.current = None;
        event!(Level::DEBUG, status = %status, "transaction completed");
    }

    fn require_active(&self) -> Result<TransactionId> {
        self.current
            .ok_or_else(|| AssemblyError::TransactionError("No active transaction".into()))
    }
}
