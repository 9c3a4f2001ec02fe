//! Victim selection.
//!
//! Both functions are pure over the cache state and fully deterministic: the
//! recency stack has a strict order, so equal-recency ties cannot occur.

use super::ledger::PlacementLedger;
use super::pins::PinTable;
use super::recency::RecencyStack;
use super::types::{CacheEntry, CacheKey, Pool};

/// Selects unpinned entries occupying `pool`, least-recently-used first,
/// until their combined size reaches `bytes_to_free`.
///
/// Entries with a transfer in flight are skipped. Returns fewer bytes than
/// requested when the pool runs out of unpinned entries.
pub(crate) fn select_victims(
    recency: &RecencyStack,
    ledger: &PlacementLedger,
    pins: &PinTable,
    pool: Pool,
    bytes_to_free: u64,
) -> Vec<CacheKey> {
    let mut victims = Vec::new();
    let mut freed = 0u64;

    for key in recency.iter() {
        if freed >= bytes_to_free {
            break;
        }
        let Some(entry) = ledger.get(key) else {
            continue;
        };
        if pins.is_locked(entry.id) || entry.transfer.is_some() || !entry.occupies(pool) {
            continue;
        }
        freed += entry.size;
        victims.push(key.clone());
    }

    victims
}

/// Unpinned execution-resident entries, smallest first.
///
/// Equal sizes fall back to recency order so older entries are offloaded
/// first. Entries with a transfer in flight are skipped.
pub(crate) fn offload_candidates<'a>(
    recency: &RecencyStack,
    ledger: &'a PlacementLedger,
    pins: &PinTable,
) -> Vec<&'a CacheEntry> {
    let mut candidates: Vec<(usize, &CacheEntry)> = recency
        .iter()
        .enumerate()
        .filter_map(|(position, key)| ledger.get(key).map(|entry| (position, entry)))
        .filter(|(_, entry)| {
            entry.pool == Pool::Execution && entry.transfer.is_none() && !pins.is_locked(entry.id)
        })
        .collect();

    candidates.sort_by_key(|(position, entry)| (entry.size, *position));
    candidates.into_iter().map(|(_, entry)| entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpaqueModel;

    struct Fixture {
        recency: RecencyStack,
        ledger: PlacementLedger,
        pins: PinTable,
    }

    impl Fixture {
        fn new(entries: &[(&str, u64)]) -> Self {
            let mut fixture =
                Self { recency: RecencyStack::default(), ledger: PlacementLedger::default(), pins: PinTable::default() };
            for (name, size) in entries {
                let key = CacheKey::new(*name);
                let id = fixture.ledger.allocate_id();
                fixture.ledger.insert(CacheEntry::new(id, key.clone(), Box::new(OpaqueModel::new(*name, *size)), *size));
                fixture.recency.touch(&key);
            }
            fixture
        }

        fn to_execution(&mut self, name: &str) {
            if let Some(entry) = self.ledger.get_mut(&CacheKey::new(name)) {
                entry.pool = Pool::Execution;
            }
        }

        fn pin(&mut self, name: &str) {
            let id = self.ledger.get(&CacheKey::new(name)).unwrap().id;
            self.pins.acquire(id);
        }

        fn victims(&self, pool: Pool, bytes: u64) -> Vec<String> {
            select_victims(&self.recency, &self.ledger, &self.pins, pool, bytes)
                .iter()
                .map(ToString::to_string)
                .collect()
        }
    }

    #[test]
    fn test_victims_are_least_recently_used_first() {
        let mut fixture = Fixture::new(&[("a", 4), ("b", 4), ("c", 4)]);
        fixture.recency.touch(&CacheKey::new("a"));

        assert_eq!(fixture.victims(Pool::Bulk, 1), vec!["b"]);
        assert_eq!(fixture.victims(Pool::Bulk, 5), vec!["b", "c"]);
        assert_eq!(fixture.victims(Pool::Bulk, 100), vec!["b", "c", "a"]);
        assert!(fixture.victims(Pool::Bulk, 0).is_empty());
    }

    #[test]
    fn test_victims_skip_pinned_entries() {
        let mut fixture = Fixture::new(&[("y", 4), ("z", 4)]);
        fixture.pin("y");

        assert_eq!(fixture.victims(Pool::Bulk, 6), vec!["z"]);
    }

    #[test]
    fn test_victims_respect_pool() {
        let mut fixture = Fixture::new(&[("a", 4), ("b", 4)]);
        fixture.to_execution("b");

        assert_eq!(fixture.victims(Pool::Execution, 10), vec!["b"]);
        assert_eq!(fixture.victims(Pool::Bulk, 10), vec!["a", "b"]);
    }

    #[test]
    fn test_offload_candidates_smallest_first() {
        let mut fixture = Fixture::new(&[("big", 8), ("small", 2), ("mid", 4), ("mid2", 4), ("idle", 1)]);
        for name in ["big", "small", "mid", "mid2"] {
            fixture.to_execution(name);
        }
        fixture.pin("small");

        let order: Vec<String> = offload_candidates(&fixture.recency, &fixture.ledger, &fixture.pins)
            .into_iter()
            .map(|entry| entry.key.to_string())
            .collect();

        assert_eq!(order, vec!["mid", "mid2", "big"]);
    }

    #[test]
    fn test_entries_in_transfer_are_never_selected() {
        let mut fixture = Fixture::new(&[("a", 4), ("b", 4), ("c", 4)]);
        fixture.to_execution("a");
        fixture.to_execution("b");
        fixture.ledger.get_mut(&CacheKey::new("a")).unwrap().transfer = Some(Pool::Bulk);
        fixture.ledger.get_mut(&CacheKey::new("c")).unwrap().transfer = Some(Pool::Execution);

        assert_eq!(fixture.victims(Pool::Bulk, 100), vec!["b"]);
        let offload: Vec<&CacheKey> = offload_candidates(&fixture.recency, &fixture.ledger, &fixture.pins)
            .into_iter()
            .map(|entry| &entry.key)
            .collect();
        assert_eq!(offload, vec![&CacheKey::new("b")]);
    }
}
