// ============================================================================
// Identity Types
// ============================================================================
//
// Both object graphs share the same identity vocabulary: a durable id that the
// storage assigns on first save, and a link id generated on creation that is
// stable for the lifetime of the object.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Durable identifier assigned by the storage.
pub type ObjectId = i64;

/// Id carried by objects that have not been saved yet.
pub const NEW_ID: ObjectId = -1;

/// Client-generated identifier, stable from creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(Uuid);

impl LinkId {
    pub fn new() -> Self {
        LinkId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        LinkId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an object in either graph.
///
/// Two references are equal when they name the same kind and link id. The
/// durable id is carried along but does not take part in equality, so a
/// reference taken before the first save still matches the saved object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    kind: String,
    id: ObjectId,
    link_id: LinkId,
}

impl Reference {
    pub fn new(kind: impl Into<String>, id: ObjectId, link_id: LinkId) -> Self {
        Self {
            kind: kind.into(),
            id,
            link_id,
        }
    }

    /// The archetype short name, e.g. `party.customer`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    pub fn is_new(&self) -> bool {
        self.id == NEW_ID
    }

    /// Returns a copy of this reference carrying `id`.
    pub fn with_id(&self, id: ObjectId) -> Self {
        Self {
            kind: self.kind.clone(),
            id,
            link_id: self.link_id,
        }
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.link_id == other.link_id && self.kind == other.kind
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.link_id.hash(state);
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_new() {
            write!(f, "{}:new:{}", self.kind, self.link_id)
        } else {
            write!(f, "{}:{}", self.kind, self.id)
        }
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one storage session. Used as the key that binds an assembly
/// context to its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Which end of a relationship a piece of pending work applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipEnd {
    Source,
    Target,
}

impl fmt::Display for RelationshipEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipEnd::Source => write!(f, "source"),
            RelationshipEnd::Target => write!(f, "target"),
        }
    }
}
