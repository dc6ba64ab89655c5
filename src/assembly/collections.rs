// ============================================================================
// Collection Reconciliation
// ============================================================================
//
// Brings a persistent collection in line with its domain source without
// rebuilding it. Every source member is translated first; only then is the
// target touched, removing members that are gone and adding members that
// are new. Members present on both sides are left alone, so the storage
// sees a change only where there is one.
//
// ============================================================================

use super::state::StateId;
use super::Env;
use crate::core::{AssemblyError, RelationshipEnd, Result};
use crate::domain::DomainKey;
use crate::persistent::{DoKey, PersistentObject, TrackedMap, TrackedSet};

pub type SetSelector = fn(&mut PersistentObject) -> Option<&mut TrackedSet<DoKey>>;
pub type MapSelector = fn(&mut PersistentObject) -> Option<&mut TrackedMap<String, DoKey>>;

/// Extra work done for each member dropped from a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalHook {
    /// The member is a relationship: drop it from the entity at its other end
    /// too, and queue it for deletion when orphan removal is on.
    DetachRelationship,
}

/// What a set reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDelta {
    pub added: Vec<DoKey>,
    pub removed: Vec<DoKey>,
    pub retained: Vec<DoKey>,
}

impl SetDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct SetAssembler {
    name: &'static str,
    select: SetSelector,
    removal_hook: Option<RemovalHook>,
}

impl SetAssembler {
    pub fn new(name: &'static str, select: SetSelector) -> Self {
        Self {
            name,
            select,
            removal_hook: None,
        }
    }

    pub fn with_removal_hook(mut self, hook: RemovalHook) -> Self {
        self.removal_hook = Some(hook);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn target<'a>(&self, object: &'a mut PersistentObject) -> Result<&'a mut TrackedSet<DoKey>> {
        let kind = object.kind().to_string();
        (self.select)(object)
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} has no {} collection", kind, self.name)))
    }

    /// Reconcile the collection of `owner` with `source`. Each member's
    /// translation result is nested under `state`.
    pub fn assemble(&self, env: &mut Env<'_>, owner: DoKey, state: StateId, source: &[DomainKey]) -> Result<SetDelta> {
        let current: Vec<DoKey> = self
            .target(env.session.graph_mut().object_mut(owner)?)?
            .iter()
            .copied()
            .collect();
        if current.is_empty() && source.is_empty() {
            return Ok(SetDelta::default());
        }

        let mut members = Vec::with_capacity(source.len());
        let registry = env.registry;
        for member in source {
            let child = registry.assemble_do(env, *member)?;
            env.context.states_mut().add_child(state, child)?;
            let object = env.context.states().state(child)?.object();
            if !members.contains(&object) {
                members.push(object);
            }
        }

        let mut delta = SetDelta::default();
        for object in &current {
            if members.contains(object) {
                delta.retained.push(*object);
            } else {
                delta.removed.push(*object);
            }
        }
        delta.added = members
            .iter()
            .filter(|object| !current.contains(object))
            .copied()
            .collect();

        let target = self.target(env.session.graph_mut().object_mut(owner)?)?;
        if members.is_empty() {
            target.clear();
        } else {
            for object in &delta.removed {
                target.remove(object);
            }
            for object in &delta.added {
                target.insert(*object);
            }
        }

        for object in &delta.removed {
            if let Some(child) = env
                .context
                .cached_domain(*object)
                .and_then(|source| env.context.cached_state(source))
            {
                env.context.states_mut().remove_child(state, child)?;
            }
            if let Some(hook) = self.removal_hook {
                apply_removal_hook(env, hook, owner, *object)?;
            }
        }

        if !delta.is_empty() {
            log::debug!(
                "{} of {}: +{} -{} ={}",
                self.name,
                owner,
                delta.added.len(),
                delta.removed.len(),
                delta.retained.len()
            );
        }
        Ok(delta)
    }

    /// Translate every member of the collection of `owner` back to the
    /// domain.
    pub fn assemble_domain(&self, env: &mut Env<'_>, owner: DoKey) -> Result<Vec<DomainKey>> {
        let members: Vec<DoKey> = self
            .target(env.session.graph_mut().object_mut(owner)?)?
            .iter()
            .copied()
            .collect();
        let registry = env.registry;
        let mut result = Vec::with_capacity(members.len());
        for member in members {
            result.push(registry.assemble_domain_key(env, member)?);
        }
        Ok(result)
    }
}

fn apply_removal_hook(env: &mut Env<'_>, hook: RemovalHook, owner: DoKey, removed: DoKey) -> Result<()> {
    match hook {
        RemovalHook::DetachRelationship => {
            let graph = env.session.graph_mut();
            let Some(relationship) = graph.get(removed).and_then(|o| o.as_relationship()) else {
                return Ok(());
            };
            let ends: Vec<DoKey> = [RelationshipEnd::Source, RelationshipEnd::Target]
                .into_iter()
                .filter_map(|end| relationship.end(end))
                .filter_map(|end| graph.resolve(end))
                .filter(|end| *end != owner)
                .collect();
            let mut touched = Vec::new();
            for end in ends {
                let Some(object) = graph.get_mut(end) else {
                    continue;
                };
                let persisted = !object.is_new();
                if let Some(entity) = object.as_entity_mut() {
                    if entity.relationships.remove(&removed) && persisted {
                        touched.push(end);
                    }
                }
            }
            // the other end is not reachable from the owner any more
            for end in touched {
                env.session.save(end)?;
            }
            if env.context.config().remove_orphans {
                env.context.add_orphan(removed);
            }
            Ok(())
        }
    }
}

/// What a map reconciliation did, by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapDelta {
    pub added: Vec<String>,
    pub replaced: Vec<String>,
    pub removed: Vec<String>,
    pub retained: Vec<String>,
}

impl MapDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.replaced.is_empty() && self.removed.is_empty()
    }
}

pub struct MapAssembler {
    name: &'static str,
    select: MapSelector,
}

impl MapAssembler {
    pub fn new(name: &'static str, select: MapSelector) -> Self {
        Self { name, select }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn target<'a>(&self, object: &'a mut PersistentObject) -> Result<&'a mut TrackedMap<String, DoKey>> {
        let kind = object.kind().to_string();
        (self.select)(object)
            .ok_or_else(|| AssemblyError::TypeMismatch(format!("{} has no {} collection", kind, self.name)))
    }

    /// Reconcile the map of `owner` with `source`, keyed the same way.
    pub fn assemble(
        &self,
        env: &mut Env<'_>,
        owner: DoKey,
        state: StateId,
        source: &[(String, DomainKey)],
    ) -> Result<MapDelta> {
        let current: Vec<(String, DoKey)> = self
            .target(env.session.graph_mut().object_mut(owner)?)?
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        if current.is_empty() && source.is_empty() {
            return Ok(MapDelta::default());
        }

        let registry = env.registry;
        let mut entries = Vec::with_capacity(source.len());
        for (key, member) in source {
            let child = registry.assemble_do(env, *member)?;
            env.context.states_mut().add_child(state, child)?;
            entries.push((key.clone(), env.context.states().state(child)?.object()));
        }

        let mut delta = MapDelta::default();
        for (key, value) in &entries {
            match current.iter().find(|(existing, _)| existing == key) {
                None => delta.added.push(key.clone()),
                Some((_, existing)) if existing == value => delta.retained.push(key.clone()),
                Some(_) => delta.replaced.push(key.clone()),
            }
        }
        delta.removed = current
            .iter()
            .filter(|(key, _)| !entries.iter().any(|(entry, _)| entry == key))
            .map(|(key, _)| key.clone())
            .collect();

        let target = self.target(env.session.graph_mut().object_mut(owner)?)?;
        if entries.is_empty() {
            target.clear();
        } else {
            for key in &delta.removed {
                target.remove(key);
            }
            for (key, value) in entries {
                target.insert(key, value);
            }
        }

        if !delta.is_empty() {
            log::debug!(
                "{} of {}: +{} ~{} -{}",
                self.name,
                owner,
                delta.added.len(),
                delta.replaced.len(),
                delta.removed.len()
            );
        }
        Ok(delta)
    }

    pub fn assemble_domain(&self, env: &mut Env<'_>, owner: DoKey) -> Result<Vec<(String, DomainKey)>> {
        let members: Vec<(String, DoKey)> = self
            .target(env.session.graph_mut().object_mut(owner)?)?
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        let registry = env.registry;
        let mut result = Vec::with_capacity(members.len());
        for (key, member) in members {
            result.push((key, registry.assemble_domain_key(env, member)?));
        }
        Ok(result)
    }
}
