// ============================================================================
// Graph Assembler Library
// ============================================================================
//
// Translates graphs of domain objects to and from the storage-facing objects
// a persistence session works with, preserving identity, cycles and shared
// references, and propagating storage-assigned ids back to the domain.
//
// ============================================================================

pub mod assembly;
pub mod config;
pub mod core;
pub mod domain;
pub mod persistent;
pub mod persister;
pub mod storage;
pub mod transaction;

pub use assembly::{Assembler, CompoundAssembler, Context, ContextHandler, Env, StateId};
pub use config::AssemblerConfig;
pub use core::{AssemblyError, LinkId, NEW_ID, ObjectId, Reference, RelationshipEnd, Result, SessionId};
pub use domain::{DomainGraph, DomainKey, DomainObject, DomainType};
pub use persistent::{DoKey, DoRef, PersistenceGraph, PersistentObject, PersistentType};
pub use persister::Persister;
pub use storage::{MemoryStorage, MemoryStore, StorageSession};
pub use transaction::{TransactionScope, TransactionState};
