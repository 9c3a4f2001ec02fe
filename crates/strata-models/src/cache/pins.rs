//! Reference-counted pins per cache entry.

use std::collections::HashMap;
use tracing::error;

use super::types::EntryId;

/// Pin counts. An entry with a count above zero must not be evicted or relocated.
///
/// Counts are kept per entry rather than per key: lockers on an entry that
/// was removed release against that entry, never against a later one
/// inserted under the same key.
#[derive(Debug, Default)]
pub(crate) struct PinTable {
    counts: HashMap<EntryId, usize>,
}

impl PinTable {
    /// Adds a pin and returns the new count.
    pub(crate) fn acquire(&mut self, id: EntryId) -> usize {
        let count = self.counts.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    /// Removes a pin and returns the remaining count.
    ///
    /// # Panics
    /// Releasing an entry that holds no pin is a programming error; the pin
    /// table would be corrupted, so this aborts the caller.
    pub(crate) fn release(&mut self, id: EntryId) -> usize {
        let Some(count) = self.counts.get_mut(&id) else {
            error!(entry = %id, "Pin released without a matching acquire");
            panic!("pin imbalance: release of unpinned entry {id}");
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(&id);
        }
        remaining
    }

    pub(crate) fn is_locked(&self, id: EntryId) -> bool {
        self.count(id) > 0
    }

    pub(crate) fn count(&self, id: EntryId) -> usize {
        self.counts.get(&id).copied().unwrap_or(0)
    }
}
