use super::DomainKey;
use crate::core::{LinkId, NEW_ID, ObjectId, Reference, RelationshipEnd};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Concrete kinds of domain object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DomainType {
    /// Plain object with scalar fields only
    Object,
    Entity,
    Party,
    Product,
    Relationship,
    Lookup,
    Identity,
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DomainType::Object => "Object",
            DomainType::Entity => "Entity",
            DomainType::Party => "Party",
            DomainType::Product => "Product",
            DomainType::Relationship => "Relationship",
            DomainType::Lookup => "Lookup",
            DomainType::Identity => "Identity",
        };
        write!(f, "{}", name)
    }
}

/// Collections owned by an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityBody {
    /// Relationships where the entity is either the source or the target
    pub relationships: BTreeSet<DomainKey>,
    /// Identities keyed by their identity string
    pub identities: BTreeMap<String, DomainKey>,
    /// Lookups classifying the entity
    pub classifications: BTreeSet<DomainKey>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipBody {
    pub source: Option<Reference>,
    pub target: Option<Reference>,
    pub sequence: i32,
}

impl RelationshipBody {
    pub fn end(&self, end: RelationshipEnd) -> Option<&Reference> {
        match end {
            RelationshipEnd::Source => self.source.as_ref(),
            RelationshipEnd::Target => self.target.as_ref(),
        }
    }

    pub fn set_end(&mut self, end: RelationshipEnd, reference: Option<Reference>) {
        match end {
            RelationshipEnd::Source => self.source = reference,
            RelationshipEnd::Target => self.target = reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainBody {
    Plain,
    Entity(EntityBody),
    Relationship(RelationshipBody),
    Lookup { code: String },
    Identity { identity: String },
}

impl DomainBody {
    /// Empty body matching the shape of `ty`.
    pub fn for_type(ty: DomainType) -> Self {
        match ty {
            DomainType::Object => DomainBody::Plain,
            DomainType::Entity | DomainType::Party | DomainType::Product => {
                DomainBody::Entity(EntityBody::default())
            }
            DomainType::Relationship => DomainBody::Relationship(RelationshipBody::default()),
            DomainType::Lookup => DomainBody::Lookup {
                code: String::new(),
            },
            DomainType::Identity => DomainBody::Identity {
                identity: String::new(),
            },
        }
    }
}

/// Application-facing object.
///
/// Identity fields are only changed by the assembler: the durable id and
/// version are propagated from the persistent counterpart once it has been
/// saved.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainObject {
    ty: DomainType,
    kind: String,
    id: ObjectId,
    link_id: LinkId,
    version: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    pub last_modified: Option<DateTime<Utc>>,
    pub details: BTreeMap<String, JsonValue>,
    pub body: DomainBody,
}

impl DomainObject {
    /// Create a new, unsaved object.
    pub fn new(ty: DomainType, kind: impl Into<String>) -> Self {
        Self::with_identity(ty, kind, NEW_ID, LinkId::new(), 0)
    }

    /// Create an object with a known identity, e.g. one read back from storage.
    pub fn with_identity(
        ty: DomainType,
        kind: impl Into<String>,
        id: ObjectId,
        link_id: LinkId,
        version: i64,
    ) -> Self {
        Self {
            ty,
            kind: kind.into(),
            id,
            link_id,
            version,
            name: None,
            description: None,
            active: true,
            last_modified: None,
            details: BTreeMap::new(),
            body: DomainBody::for_type(ty),
        }
    }

    pub fn entity(kind: impl Into<String>) -> Self {
        Self::new(DomainType::Entity, kind)
    }

    pub fn party(kind: impl Into<String>) -> Self {
        Self::new(DomainType::Party, kind)
    }

    pub fn relationship(kind: impl Into<String>, source: Reference, target: Reference) -> Self {
        let mut object = Self::new(DomainType::Relationship, kind);
        object.body = DomainBody::Relationship(RelationshipBody {
            source: Some(source),
            target: Some(target),
            sequence: 0,
        });
        object
    }

    pub fn lookup(kind: impl Into<String>, code: impl Into<String>) -> Self {
        let mut object = Self::new(DomainType::Lookup, kind);
        object.body = DomainBody::Lookup { code: code.into() };
        object
    }

    pub fn identity(kind: impl Into<String>, identity: impl Into<String>) -> Self {
        let mut object = Self::new(DomainType::Identity, kind);
        object.body = DomainBody::Identity {
            identity: identity.into(),
        };
        object
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn domain_type(&self) -> DomainType {
        self.ty
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn is_new(&self) -> bool {
        self.id == NEW_ID
    }

    pub fn reference(&self) -> Reference {
        Reference::new(self.kind.clone(), self.id, self.link_id)
    }

    pub(crate) fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    pub fn as_entity(&self) -> Option<&EntityBody> {
        match &self.body {
            DomainBody::Entity(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut EntityBody> {
        match &mut self.body {
            DomainBody::Entity(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&RelationshipBody> {
        match &self.body {
            DomainBody::Relationship(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_relationship_mut(&mut self) -> Option<&mut RelationshipBody> {
        match &mut self.body {
            DomainBody::Relationship(body) => Some(body),
            _ => None,
        }
    }

    /// Field-level comparison of everything except the collections' arena keys.
    pub fn same_fields(&self, other: &DomainObject) -> bool {
        self.ty == other.ty
            && self.kind == other.kind
            && self.id == other.id
            && self.link_id == other.link_id
            && self.version == other.version
            && self.name == other.name
            && self.description == other.description
            && self.active == other.active
            && self.last_modified == other.last_modified
            && self.details == other.details
            && match (&self.body, &other.body) {
                (DomainBody::Entity(_), DomainBody::Entity(_)) => true,
                (a, b) => a == b,
            }
    }
}
