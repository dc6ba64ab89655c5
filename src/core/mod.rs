pub mod error;
pub mod types;

pub use error::{AssemblyError, Result};
pub use types::{LinkId, NEW_ID, ObjectId, Reference, RelationshipEnd, SessionId};
