use super::DoKey;
use super::tracked::{TrackedMap, TrackedSet};
use crate::core::{LinkId, NEW_ID, ObjectId, Reference, RelationshipEnd};
use crate::domain::DomainType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Storage-facing object kinds, with a declared supertype chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PersistentType {
    Object,
    Entity,
    Party,
    Product,
    Relationship,
    Lookup,
    Identity,
}

impl PersistentType {
    pub fn supertype(self) -> Option<PersistentType> {
        match self {
            PersistentType::Object => None,
            PersistentType::Entity
            | PersistentType::Relationship
            | PersistentType::Lookup
            | PersistentType::Identity => Some(PersistentType::Object),
            PersistentType::Party | PersistentType::Product => Some(PersistentType::Entity),
        }
    }

    /// This type followed by its supertypes, most specific first.
    pub fn ancestry(self) -> impl Iterator<Item = PersistentType> {
        std::iter::successors(Some(self), |ty| ty.supertype())
    }

    pub fn is_subtype_of(self, other: PersistentType) -> bool {
        self.ancestry().any(|ty| ty == other)
    }

    /// Domain type built when reading an object of this type back.
    pub fn domain_type(self) -> DomainType {
        match self {
            PersistentType::Object => DomainType::Object,
            PersistentType::Entity => DomainType::Entity,
            PersistentType::Party => DomainType::Party,
            PersistentType::Product => DomainType::Product,
            PersistentType::Relationship => DomainType::Relationship,
            PersistentType::Lookup => DomainType::Lookup,
            PersistentType::Identity => DomainType::Identity,
        }
    }
}

impl From<DomainType> for PersistentType {
    fn from(ty: DomainType) -> Self {
        match ty {
            DomainType::Object => PersistentType::Object,
            DomainType::Entity => PersistentType::Entity,
            DomainType::Party => PersistentType::Party,
            DomainType::Product => PersistentType::Product,
            DomainType::Relationship => PersistentType::Relationship,
            DomainType::Lookup => PersistentType::Lookup,
            DomainType::Identity => PersistentType::Identity,
        }
    }
}

impl fmt::Display for PersistentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}DO", self.domain_type())
    }
}

/// A relationship end as the storage hands it out: either an object already in
/// the session, or a lazy proxy that only knows the referent's kind and id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoRef {
    Loaded(DoKey),
    Proxy { kind: String, id: ObjectId },
}

#[derive(Debug, Clone, Default)]
pub struct EntityDo {
    pub relationships: TrackedSet<DoKey>,
    pub identities: TrackedMap<String, DoKey>,
    pub classifications: TrackedSet<DoKey>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipDo {
    pub source: Option<DoRef>,
    pub target: Option<DoRef>,
    pub sequence: i32,
}

impl RelationshipDo {
    pub fn end(&self, end: RelationshipEnd) -> Option<&DoRef> {
        match end {
            RelationshipEnd::Source => self.source.as_ref(),
            RelationshipEnd::Target => self.target.as_ref(),
        }
    }

    pub fn set_end(&mut self, end: RelationshipEnd, value: Option<DoRef>) {
        match end {
            RelationshipEnd::Source => self.source = value,
            RelationshipEnd::Target => self.target = value,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PersistentBody {
    Plain,
    Entity(EntityDo),
    Relationship(RelationshipDo),
    Lookup { code: String },
    Identity { identity: String },
}

impl PersistentBody {
    pub fn for_type(ty: PersistentType) -> Self {
        match ty {
            PersistentType::Object => PersistentBody::Plain,
            PersistentType::Entity | PersistentType::Party | PersistentType::Product => {
                PersistentBody::Entity(EntityDo::default())
            }
            PersistentType::Relationship => PersistentBody::Relationship(RelationshipDo::default()),
            PersistentType::Lookup => PersistentBody::Lookup {
                code: String::new(),
            },
            PersistentType::Identity => PersistentBody::Identity {
                identity: String::new(),
            },
        }
    }
}

/// Storage-facing counterpart of a domain object.
///
/// Identity (kind and link id) is fixed at construction, before the object
/// is placed in any keyed structure.
#[derive(Debug, Clone)]
pub struct PersistentObject {
    ty: PersistentType,
    kind: String,
    link_id: LinkId,
    pub(crate) id: ObjectId,
    pub(crate) version: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    pub last_modified: Option<DateTime<Utc>>,
    pub details: BTreeMap<String, JsonValue>,
    pub body: PersistentBody,
}

impl PersistentObject {
    /// Create an object carrying the identity of `reference`.
    pub fn new(ty: PersistentType, reference: &Reference) -> Self {
        Self {
            ty,
            kind: reference.kind().to_string(),
            link_id: reference.link_id(),
            id: reference.id(),
            version: 0,
            name: None,
            description: None,
            active: true,
            last_modified: None,
            details: BTreeMap::new(),
            body: PersistentBody::for_type(ty),
        }
    }

    pub fn persistent_type(&self) -> PersistentType {
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

    pub fn as_entity(&self) -> Option<&EntityDo> {
        match &self.body {
            PersistentBody::Entity(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut EntityDo> {
        match &mut self.body {
            PersistentBody::Entity(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&RelationshipDo> {
        match &self.body {
            PersistentBody::Relationship(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_relationship_mut(&mut self) -> Option<&mut RelationshipDo> {
        match &mut self.body {
            PersistentBody::Relationship(body) => Some(body),
            _ => None,
        }
    }

    /// Forget change tracking on owned collections.
    pub fn reset_changes(&mut self) {
        if let PersistentBody::Entity(entity) = &mut self.body {
            entity.relationships.reset_changes();
            entity.identities.reset_changes();
            entity.classifications.reset_changes();
        }
    }
}
