// ============================================================================
// Translation Results
// ============================================================================
//
// A DoState pairs one domain object with its persistent counterpart for the
// duration of a transaction, and records the work that could not be finished
// while assembling it. Nested states form a graph that mirrors the object
// graph; walks over it use a visited set so back edges are skipped.
//
// ============================================================================

use super::deferred::DeferredAssembly;
use super::patch::ReferencePatch;
use crate::core::{AssemblyError, Reference, Result};
use crate::domain::DomainKey;
use crate::persistent::DoKey;
use std::collections::HashSet;
use std::fmt;

/// Handle to a [`DoState`] in a [`StateTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(usize);

impl StateId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOrder {
    /// A state before the states it owns
    Pre,
    /// The owned states first
    Post,
}

#[derive(Debug, Clone)]
pub struct DoState {
    object: DoKey,
    source: Option<DomainKey>,
    is_new: bool,
    version: i64,
    deferred: Vec<DeferredAssembly>,
    patches: Vec<ReferencePatch>,
    reverters: Vec<ReferencePatch>,
    children: Vec<StateId>,
}

impl DoState {
    /// `is_new` and `version` capture the source as it was when the state was
    /// created, so a rollback can restore them.
    pub fn new(object: DoKey, source: Option<DomainKey>, is_new: bool, version: i64) -> Self {
        Self {
            object,
            source,
            is_new,
            version,
            deferred: Vec::new(),
            patches: Vec::new(),
            reverters: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn object(&self) -> DoKey {
        self.object
    }

    pub fn source(&self) -> Option<DomainKey> {
        self.source
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Deferred work registered directly on this state.
    pub fn own_deferred(&self) -> &[DeferredAssembly] {
        &self.deferred
    }

    pub fn patches(&self) -> &[ReferencePatch] {
        &self.patches
    }

    /// Patches from earlier passes over this state. Their ends may already
    /// carry a durable id, so they are kept for rollback only.
    pub fn reverters(&self) -> &[ReferencePatch] {
        &self.reverters
    }

    pub fn children(&self) -> &[StateId] {
        &self.children
    }
}

/// Fails when a persisted source is out of step with its counterpart.
pub fn check_version(reference: &Reference, source_version: i64, object_version: i64) -> Result<()> {
    if source_version != object_version {
        return Err(AssemblyError::StaleObject {
            reference: reference.clone(),
            expected: object_version,
            found: source_version,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct StateTable {
    states: Vec<DoState>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: DoState) -> StateId {
        let id = StateId(self.states.len());
        self.states.push(state);
        id
    }

    pub fn get(&self, id: StateId) -> Option<&DoState> {
        self.states.get(id.0)
    }

    pub fn state(&self, id: StateId) -> Result<&DoState> {
        self.get(id)
            .ok_or_else(|| AssemblyError::UnknownObject(id.to_string()))
    }

    fn state_mut(&mut self, id: StateId) -> Result<&mut DoState> {
        self.states
            .get_mut(id.0)
            .ok_or_else(|| AssemblyError::UnknownObject(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn add_child(&mut self, parent: StateId, child: StateId) -> Result<()> {
        let state = self.state_mut(parent)?;
        if !state.children.contains(&child) {
            state.children.push(child);
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent: StateId, child: StateId) -> Result<()> {
        self.state_mut(parent)?.children.retain(|c| *c != child);
        Ok(())
    }

    pub fn add_deferred(&mut self, id: StateId, deferred: DeferredAssembly) -> Result<()> {
        let state = self.state_mut(id)?;
        if !state.deferred.contains(&deferred) {
            state.deferred.push(deferred);
        }
        Ok(())
    }

    pub fn remove_deferred(&mut self, id: StateId, deferred: &DeferredAssembly) -> Result<bool> {
        let state = self.state_mut(id)?;
        let before = state.deferred.len();
        state.deferred.retain(|d| d != deferred);
        Ok(state.deferred.len() != before)
    }

    pub fn add_patch(&mut self, id: StateId, patch: ReferencePatch) -> Result<()> {
        let state = self.state_mut(id)?;
        if !state.patches.contains(&patch) {
            state.patches.push(patch);
        }
        Ok(())
    }

    /// Prepare a state to be assembled again from an updated source: pending
    /// work is dropped as the new pass registers its own. Patches move to the
    /// reverters, one per relationship end.
    pub fn reset(&mut self, id: StateId) -> Result<()> {
        let state = self.state_mut(id)?;
        state.deferred.clear();
        for patch in std::mem::take(&mut state.patches) {
            let known = state
                .reverters
                .iter()
                .any(|r| r.object() == patch.object() && r.end() == patch.end());
            if !known {
                state.reverters.push(patch);
            }
        }
        Ok(())
    }

    /// Every state reachable from `root`, each listed once.
    pub fn walk(&self, root: StateId, order: VisitOrder) -> Vec<StateId> {
        let mut visited = HashSet::new();
        let mut result = Vec::new();
        self.visit(root, order, &mut visited, &mut result);
        result
    }

    fn visit(
        &self,
        id: StateId,
        order: VisitOrder,
        visited: &mut HashSet<StateId>,
        result: &mut Vec<StateId>,
    ) {
        visited.insert(id);
        let Some(state) = self.get(id) else {
            return;
        };
        if order == VisitOrder::Pre {
            result.push(id);
        }
        for child in &state.children {
            if !visited.contains(child) {
                self.visit(*child, order, visited, result);
            }
        }
        if order == VisitOrder::Post {
            result.push(id);
        }
    }

    /// True when no reachable state has pending deferred work.
    pub fn is_complete(&self, root: StateId) -> bool {
        self.walk(root, VisitOrder::Pre)
            .into_iter()
            .filter_map(|id| self.get(id))
            .all(|state| state.deferred.is_empty())
    }

    /// Pending deferred work of every reachable state.
    pub fn deferred(&self, root: StateId) -> Vec<DeferredAssembly> {
        let mut result: Vec<DeferredAssembly> = Vec::new();
        for id in self.walk(root, VisitOrder::Pre) {
            if let Some(state) = self.get(id) {
                for deferred in &state.deferred {
                    if !result.contains(deferred) {
                        result.push(deferred.clone());
                    }
                }
            }
        }
        result
    }

    /// Persistent objects reachable from `root`, owned objects first.
    pub fn objects(&self, root: StateId) -> Vec<DoKey> {
        let mut result = Vec::new();
        for id in self.walk(root, VisitOrder::Post) {
            if let Some(state) = self.get(id) {
                if !result.contains(&state.object) {
                    result.push(state.object);
                }
            }
        }
        result
    }

    /// Drop all pending work and nested states reachable from `root`.
    pub fn destroy(&mut self, root: StateId) {
        for id in self.walk(root, VisitOrder::Post) {
            if let Some(state) = self.states.get_mut(id.0) {
                state.deferred.clear();
                state.patches.clear();
                state.reverters.clear();
                state.children.clear();
            }
        }
    }
}
