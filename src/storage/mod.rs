// ============================================================================
// Storage Session
// ============================================================================
//
// The storage collaborator the assembler drives. A session owns the
// persistence graph of every object it has loaded or been handed, assigns
// durable ids on save and writes queued work on flush. Transaction commit and
// rollback belong to the caller.
//
// ============================================================================

pub mod memory;
pub mod record;
pub mod snapshot;

pub use memory::{MemoryStorage, MemoryStore, SessionStats};
pub use record::{StoredBody, StoredObject, StoredRef};

use crate::core::{ObjectId, Result, SessionId};
use crate::persistent::{DoKey, PersistenceGraph};

pub trait StorageSession {
    fn session_id(&self) -> SessionId;

    fn graph(&self) -> &PersistenceGraph;

    fn graph_mut(&mut self) -> &mut PersistenceGraph;

    /// Load an object by kind and durable id, returning the object already in
    /// the session when there is one.
    fn load(&mut self, kind: &str, id: ObjectId) -> Result<Option<DoKey>>;

    /// Queue an object for writing. New objects are given their durable id
    /// here.
    fn save(&mut self, key: DoKey) -> Result<()>;

    fn delete(&mut self, key: DoKey) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Drop queued work that has not been flushed.
    fn discard(&mut self) {}
}
