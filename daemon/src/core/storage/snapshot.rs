use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// State of an entry in a snapshot overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState<T> {
    /// Added or overwritten in the snapshot.
    Stored(T),
    /// Deleted in the snapshot.
    Deleted,
    /// Untouched by the snapshot, fall back to disk.
    Absent,
}

/// Pending changes for a single tree: key to `Some(value)` for a write,
/// `None` for a delete.
#[derive(Clone, Debug, Default)]
pub struct Changes {
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Changes {
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, Some(value));
    }

    pub fn remove(&mut self, key: Vec<u8>) {
        self.entries.insert(key, None);
    }

    pub fn get(&self, key: &[u8]) -> EntryState<&[u8]> {
        match self.entries.get(key) {
            Some(Some(value)) => EntryState::Stored(value.as_slice()),
            Some(None) => EntryState::Deleted,
            None => EntryState::Absent,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Option<Vec<u8>>)> {
        self.entries.iter()
    }

    /// Staged entries whose key starts with `prefix`, in key order.
    pub fn iter_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Option<Vec<u8>>)> + 'a {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(move |(key, _)| key.starts_with(prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A transactional batch of staged changes across trees.
///
/// Reads go through the overlay first and fall back to disk; nothing touches
/// disk until the whole snapshot commits in one multi-tree transaction.
/// Cloning yields a checkpoint that can be restored to roll back everything
/// staged after it (the per-event savepoint of the sync batch).
#[derive(Clone, Debug)]
pub struct Snapshot<C: Hash + Eq> {
    trees: HashMap<C, Changes>,
}

impl<C: Hash + Eq> Default for Snapshot<C> {
    fn default() -> Self {
        Self {
            trees: HashMap::new(),
        }
    }
}

impl<C: Hash + Eq + Copy> Snapshot<C> {
    pub fn changes(&self, column: C) -> Option<&Changes> {
        self.trees.get(&column)
    }

    pub fn changes_mut(&mut self, column: C) -> &mut Changes {
        self.trees.entry(column).or_default()
    }

    pub fn get(&self, column: C, key: &[u8]) -> EntryState<&[u8]> {
        match self.trees.get(&column) {
            Some(changes) => changes.get(key),
            None => EntryState::Absent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trees.values().all(Changes::is_empty)
    }
}
