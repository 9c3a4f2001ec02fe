//! Property tests for bulk pool budget convergence.

use proptest::prelude::*;
use strata_models::{CacheConfig, CacheKey, ModelCache, OpaqueModel, Pool};

const CEILING: u64 = 100;

proptest! {
    #[test]
    fn make_room_converges_or_only_pinned_remain(
        models in prop::collection::vec((1u64..60, any::<bool>()), 1..24),
        request in 0u64..150,
    ) {
        let cache = ModelCache::new(CacheConfig { max_cache_bytes: CEILING, ..CacheConfig::default() }).unwrap();
        let mut lockers = Vec::new();

        for (i, (size, pin)) in models.iter().enumerate() {
            let name = format!("m{i}");
            cache.put(CacheKey::new(name.as_str()), Box::new(OpaqueModel::new(name.as_str(), *size))).unwrap();
            if *pin {
                lockers.push(cache.get(&CacheKey::new(name)).unwrap());
            }
        }

        cache.make_room(Pool::Bulk, request).unwrap();

        let entries = cache.entries();
        let all_pinned = entries.iter().all(|entry| entry.locks > 0);
        prop_assert!(cache.cache_size() + request <= CEILING || all_pinned);

        for locker in &lockers {
            prop_assert!(cache.exists(locker.key()));
        }
    }

    #[test]
    fn unpinned_puts_stay_within_budget(
        sizes in prop::collection::vec(1u64..30, 2..16),
    ) {
        let cache = ModelCache::new(CacheConfig { max_cache_bytes: CEILING, ..CacheConfig::default() }).unwrap();
        for (i, size) in sizes.iter().enumerate() {
            cache.put(CacheKey::new(format!("m{i}")), Box::new(OpaqueModel::new(format!("m{i}"), *size))).unwrap();
        }

        let entries = cache.entries();
        let total: u64 = entries.iter().map(|entry| entry.size).sum();
        prop_assert!(total <= CEILING);
        prop_assert_eq!(total, cache.cache_size());

        let newest = entries.last().unwrap();
        prop_assert_eq!(&newest.key, &format!("m{}", sizes.len() - 1));
    }
}
