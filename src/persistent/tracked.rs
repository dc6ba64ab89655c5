// ============================================================================
// Change-Tracked Collections
// ============================================================================
//
// Collections held by persistent objects. Every mutation is recorded so the
// storage can tell which members changed, and so callers can verify that a
// retained member was never removed and re-added.
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetChange<T> {
    Added(T),
    Removed(T),
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapChange<K> {
    Inserted(K),
    Replaced(K),
    Removed(K),
    Cleared,
}

/// Set that records its mutations.
#[derive(Debug, Clone)]
pub struct TrackedSet<T: Ord + Clone> {
    items: BTreeSet<T>,
    changes: Vec<SetChange<T>>,
}

impl<T: Ord + Clone> Default for TrackedSet<T> {
    fn default() -> Self {
        Self {
            items: BTreeSet::new(),
            changes: Vec::new(),
        }
    }
}

impl<T: Ord + Clone> TrackedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set whose initial contents are not recorded as changes.
    pub fn from_loaded(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
            changes: Vec::new(),
        }
    }

    pub fn insert(&mut self, item: T) -> bool {
        let inserted = self.items.insert(item.clone());
        if inserted {
            self.changes.push(SetChange::Added(item));
        }
        inserted
    }

    pub fn remove(&mut self, item: &T) -> bool {
        let removed = self.items.remove(item);
        if removed {
            self.changes.push(SetChange::Removed(item.clone()));
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.changes.push(SetChange::Cleared);
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn changes(&self) -> &[SetChange<T>] {
        &self.changes
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Forget recorded changes, e.g. once they have been flushed.
    pub fn reset_changes(&mut self) {
        self.changes.clear();
    }
}

/// Map that records its mutations.
#[derive(Debug, Clone)]
pub struct TrackedMap<K: Ord + Clone, V: PartialEq> {
    entries: BTreeMap<K, V>,
    changes: Vec<MapChange<K>>,
}

impl<K: Ord + Clone, V: PartialEq> Default for TrackedMap<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            changes: Vec::new(),
        }
    }
}

impl<K: Ord + Clone, V: PartialEq> TrackedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_loaded(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            changes: Vec::new(),
        }
    }

    /// Insert or replace. Writing a value equal to the current one is not a
    /// change.
    pub fn insert(&mut self, key: K, value: V) {
        match self.entries.get(&key) {
            Some(current) if *current == value => {}
            Some(_) => {
                self.changes.push(MapChange::Replaced(key.clone()));
                self.entries.insert(key, value);
            }
            None => {
                self.changes.push(MapChange::Inserted(key.clone()));
                self.entries.insert(key, value);
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.changes.push(MapChange::Removed(key.clone()));
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.changes.push(MapChange::Cleared);
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn changes(&self) -> &[MapChange<K>] {
        &self.changes
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn reset_changes(&mut self) {
        self.changes.clear();
    }
}
