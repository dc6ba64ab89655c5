use crate::core::{LinkId, ObjectId};
use crate::persistent::PersistentType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Foreign key as stored: kind and durable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoredRef {
    pub kind: String,
    pub id: ObjectId,
}

impl StoredRef {
    pub fn new(kind: impl Into<String>, id: ObjectId) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredBody {
    Plain,
    Entity {
        relationships: Vec<StoredRef>,
        identities: BTreeMap<String, StoredRef>,
        classifications: Vec<StoredRef>,
    },
    Relationship {
        source: Option<StoredRef>,
        target: Option<StoredRef>,
        sequence: i32,
    },
    Lookup {
        code: String,
    },
    Identity {
        identity: String,
    },
}

/// Committed row of the memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub ty: PersistentType,
    pub kind: String,
    pub id: ObjectId,
    pub link_id: LinkId,
    pub version: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    pub last_modified: Option<DateTime<Utc>>,
    pub details: BTreeMap<String, JsonValue>,
    pub body: StoredBody,
}

impl StoredObject {
    /// Compare everything except the version.
    pub fn same_content(&self, other: &StoredObject) -> bool {
        self.ty == other.ty
            && self.kind == other.kind
            && self.id == other.id
            && self.link_id == other.link_id
            && self.name == other.name
            && self.description == other.description
            && self.active == other.active
            && self.last_modified == other.last_modified
            && self.details == other.details
            && self.body == other.body
    }
}
