// ============================================================================
// Transaction Synchronization Module
// ============================================================================
//
// Binds per-transaction resources (assembly contexts) to the running
// transaction and notifies registered synchronizations as it is suspended,
// resumed, committed or rolled back.
//
// ============================================================================

pub mod scope;
pub mod state;
pub mod synchronization;

pub use scope::{SuspendedTransaction, TransactionScope};
pub use state::{TransactionId, TransactionState};
pub use synchronization::{Resources, TransactionSynchronization};
