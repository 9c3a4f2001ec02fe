//! Recency order of cached keys.

use std::collections::{BTreeMap, HashMap};

use super::types::CacheKey;

/// Keys ordered from least- to most-recently used.
///
/// Each key carries a monotonically increasing stamp; moving a key to the
/// tail re-stamps it, so the ordered index stays free of duplicates.
#[derive(Debug, Default)]
pub(crate) struct RecencyStack {
    order: BTreeMap<u64, CacheKey>,
    stamps: HashMap<CacheKey, u64>,
    next_stamp: u64,
}

impl RecencyStack {
    /// Moves `key` to the tail, inserting it if absent.
    pub(crate) fn touch(&mut self, key: &CacheKey) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(previous) = self.stamps.insert(key.clone(), stamp) {
            self.order.remove(&previous);
        }
        self.order.insert(stamp, key.clone());
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) -> bool {
        match self.stamps.remove(key) {
            Some(stamp) => {
                self.order.remove(&stamp);
                true
            }
            None => false,
        }
    }

    /// Head-first (least-recently-used first) iteration.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &CacheKey> {
        self.order.values()
    }

    /// Position of `key` counted from the head.
    #[cfg(test)]
    pub(crate) fn position(&self, key: &CacheKey) -> Option<usize> {
        let stamp = self.stamps.get(key)?;
        Some(self.order.range(..stamp).count())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}
