//! Placement ledger: which entries exist, where their weights live, and how big they are.

use std::collections::HashMap;

use super::types::{CacheEntry, CacheKey, EntryId, Pool};

#[derive(Debug, Default)]
pub(crate) struct PlacementLedger {
    entries: HashMap<CacheKey, CacheEntry>,
    next_id: u64,
}

impl PlacementLedger {
    /// Hands out the id for the next entry. Ids are never reused.
    pub(crate) fn allocate_id(&mut self) -> EntryId {
        self.next_id += 1;
        EntryId(self.next_id)
    }

    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, key: &CacheKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    /// The entry for `key`, only if it is still the one identified by `id`.
    pub(crate) fn get_current(&self, key: &CacheKey, id: EntryId) -> Option<&CacheEntry> {
        self.entries.get(key).filter(|entry| entry.id == id)
    }

    pub(crate) fn get_current_mut(&mut self, key: &CacheKey, id: EntryId) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key).filter(|entry| entry.id == id)
    }

    /// Inserts `entry` unless its key is already present.
    ///
    /// Returns `false` (and drops `entry`) when the key already exists.
    pub(crate) fn insert(&mut self, entry: CacheEntry) -> bool {
        if self.entries.contains_key(&entry.key) {
            return false;
        }
        self.entries.insert(entry.key.clone(), entry);
        true
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Sum of the sizes of all entries occupying `pool`.
    pub(crate) fn pool_bytes(&self, pool: Pool) -> u64 {
        self.entries.values().filter(|entry| entry.occupies(pool)).map(|entry| entry.size).sum()
    }

    /// Total estimated size of the cache, i.e. bulk pool usage.
    pub(crate) fn total_bytes(&self) -> u64 {
        self.pool_bytes(Pool::Bulk)
    }

    /// Estimated size of entries currently being copied towards `target`.
    pub(crate) fn in_flight_bytes(&self, target: Pool) -> u64 {
        self.entries.values().filter(|entry| entry.transfer == Some(target)).map(|entry| entry.size).sum()
    }

    /// Whether any entry is currently being copied towards `target`.
    pub(crate) fn has_in_flight(&self, target: Pool) -> bool {
        self.entries.values().any(|entry| entry.transfer == Some(target))
    }
}
