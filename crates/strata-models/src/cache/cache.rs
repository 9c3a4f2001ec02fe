//! ModelCache implementation with two memory pools, LRU eviction and pinning.

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use strata_abstraction::{DeviceMemory, ModelHandle, StateDict};
use tracing::{debug, info, warn};

use crate::loader::ModelLoader;

use super::config::{CacheConfig, CacheConfigError, CapacityPolicy};
use super::error::{CacheError, CacheResult};
use super::eviction::{offload_candidates, select_victims};
use super::ledger::PlacementLedger;
use super::locker::Locker;
use super::mover::DeviceMover;
use super::pins::PinTable;
use super::recency::RecencyStack;
use super::size::estimate_model_size;
use super::stats::{CacheStats, MemorySnapshot, StatsSink};
use super::types::{CacheEntry, CacheKey, EntryId, EntryInfo, Pool, SharedModel};

/// Everything guarded by the cache mutex.
///
/// The ledger, pin table and recency stack change together inside one
/// critical section so that "is it pinned" and "evict it" cannot interleave.
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub(crate) ledger: PlacementLedger,
    pub(crate) pins: PinTable,
    pub(crate) recency: RecencyStack,
    pub(crate) stats: Option<CacheStats>,
}

impl CacheState {
    /// Removes an entry from the ledger and the recency stack.
    ///
    /// Pins are left alone. They belong to the removed entry's id, so
    /// outstanding lockers release them without touching a later entry
    /// inserted under the same key.
    pub(crate) fn delete(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.recency.remove(key);
        self.ledger.remove(key)
    }

    fn refresh_stats(&mut self, config: &CacheConfig) {
        let total = self.ledger.total_bytes();
        let in_cache = self.ledger.len();
        if let Some(stats) = self.stats.as_mut() {
            stats.high_watermark = stats.high_watermark.max(total);
            stats.in_cache = in_cache;
            stats.cache_size = config.max_cache_bytes;
        }
    }
}

#[derive(Debug)]
pub(crate) struct CacheInner {
    config: RwLock<CacheConfig>,
    state: Mutex<CacheState>,
    /// Signalled whenever a transfer commits or fails.
    transfer_done: Condvar,
    execution_memory: Arc<DeviceMemory>,
}

/// Two-tier model cache.
///
/// Every entry keeps its weights in the bulk pool. Entries that are being
/// executed additionally hold a copy in the execution pool, which stays there
/// until the space is needed (lazy offloading) or the last pin is released.
///
/// Weight copies run with the cache lock released. An entry with a copy in
/// flight is never evicted or offloaded, and new pins on an entry wait while
/// it is being returned to the bulk pool.
///
/// Cloning is cheap and yields another handle to the same cache.
#[derive(Debug, Clone)]
pub struct ModelCache {
    inner: Arc<CacheInner>,
}

impl ModelCache {
    /// Create a new model cache with the given configuration.
    ///
    /// Execution memory is tracked without a physical capacity.
    ///
    /// # Errors
    /// Returns `CacheError::Config` if the configuration is invalid.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        let execution_memory = DeviceMemory::new(config.execution_device);
        Self::with_device_memory(config, execution_memory)
    }

    /// Create a cache that allocates execution copies from `execution_memory`.
    ///
    /// # Errors
    /// Returns `CacheError::Config` if the configuration is invalid or the
    /// tracker belongs to a different device than `config.execution_device`.
    pub fn with_device_memory(config: CacheConfig, execution_memory: Arc<DeviceMemory>) -> CacheResult<Self> {
        config.validate()?;
        if execution_memory.device() != config.execution_device {
            return Err(CacheConfigError::DeviceMismatch {
                expected: config.execution_device,
                actual: execution_memory.device(),
            }
            .into());
        }

        info!(
            max_cache_bytes = config.max_cache_bytes,
            max_vram_cache_bytes = config.max_vram_cache_bytes,
            execution_device = %config.execution_device,
            lazy_offloading = config.effective_lazy_offloading(),
            "Model cache initialized"
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                config: RwLock::new(config),
                state: Mutex::new(CacheState::default()),
                transfer_done: Condvar::new(),
                execution_memory,
            }),
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.inner.config.read().clone()
    }

    /// Memory tracker of the execution device.
    #[must_use]
    pub fn execution_memory(&self) -> &Arc<DeviceMemory> {
        &self.inner.execution_memory
    }

    /// Change the bulk pool ceiling. Takes effect on the next insertion.
    ///
    /// # Errors
    /// Returns `CacheError::Config` if `bytes` is zero.
    pub fn set_max_cache_bytes(&self, bytes: u64) -> CacheResult<()> {
        if bytes == 0 {
            return Err(CacheConfigError::InvalidMaxCacheSize.into());
        }
        self.inner.config.write().max_cache_bytes = bytes;
        info!(max_cache_bytes = bytes, "Bulk pool ceiling changed");
        Ok(())
    }

    /// Change the execution pool ceiling. Takes effect on the next placement.
    pub fn set_max_vram_cache_bytes(&self, bytes: u64) {
        self.inner.config.write().max_vram_cache_bytes = bytes;
        info!(max_vram_cache_bytes = bytes, "Execution pool ceiling changed");
    }

    /// Start collecting statistics into `stats`, replacing any previous collector.
    pub fn attach_stats(&self, stats: CacheStats) {
        let config = self.config();
        let mut state = self.inner.state.lock();
        state.stats = Some(stats);
        state.refresh_stats(&config);
    }

    /// Stop collecting statistics, returning what was collected.
    pub fn detach_stats(&self) -> Option<CacheStats> {
        self.inner.state.lock().stats.take()
    }

    /// Copy of the attached statistics.
    #[must_use]
    pub fn stats(&self) -> Option<CacheStats> {
        self.inner.state.lock().stats.clone()
    }

    /// Send the attached statistics to `sink`.
    ///
    /// # Returns
    /// `false` if no statistics are attached.
    pub fn report_stats(&self, sink: &dyn StatsSink) -> bool {
        match self.stats() {
            Some(stats) => {
                sink.record(&stats);
                true
            }
            None => false,
        }
    }

    /// Whether an entry for `key` is present, in either pool.
    #[must_use]
    pub fn exists(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().ledger.contains(key)
    }

    /// Insert a model, sized by its weights (or its size hint).
    ///
    /// Does nothing if the key is already cached. Least-recently-used unpinned
    /// entries are evicted to make room in the bulk pool.
    ///
    /// # Errors
    /// Returns `CacheError::CapacityExceeded` if the bulk pool cannot make room
    /// and the hard capacity policy is active.
    pub fn put(&self, key: CacheKey, model: Box<dyn ModelHandle>) -> CacheResult<()> {
        let size = estimate_model_size(model.as_ref());
        self.put_sized(key, model, size)
    }

    /// Insert a model with an externally supplied size.
    ///
    /// # Errors
    /// See [`ModelCache::put`].
    pub fn put_sized(&self, key: CacheKey, model: Box<dyn ModelHandle>, size: u64) -> CacheResult<()> {
        let config = self.config();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if state.ledger.contains(&key) {
            debug!(key = %key, "Model already cached, ignoring put");
            return Ok(());
        }

        let evicted = CacheInner::insert_locked(state, &config, key, model, size)?;
        drop(guard);

        release_evicted(evicted);
        Ok(())
    }

    /// Look up `key` and pin it.
    ///
    /// The model is not moved; call [`Locker::model_on_device`] to place it in
    /// the execution pool.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the key is absent.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Locker> {
        self.get_as(key, None)
    }

    /// Look up `key` and pin it, recording its size under `stats_name`.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the key is absent.
    pub fn get_as(&self, key: &CacheKey, stats_name: Option<&str>) -> CacheResult<Locker> {
        let config = self.config();
        let mut guard = self.inner.state.lock();
        self.inner.wait_for_transfer(&mut guard, key, Some(Pool::Bulk));
        let state = &mut *guard;

        let Some((model, id, size)) = CacheInner::pin_locked(state, &config, key, stats_name, true) else {
            if let Some(stats) = state.stats.as_mut() {
                stats.misses += 1;
            }
            debug!(key = %key, "Cache miss");
            return Err(CacheError::NotFound { key: key.to_string() });
        };
        drop(guard);

        debug!(key = %key, size, "Cache hit");
        Ok(Locker::new(Arc::clone(&self.inner), key.clone(), id, model, size))
    }

    /// Look up `key`, loading and inserting it on a miss.
    ///
    /// Loading happens outside the cache lock. Insertion and pinning of the
    /// loaded model happen in one step, so it cannot be evicted before the
    /// caller receives its locker.
    ///
    /// # Errors
    /// Returns `CacheError::Model` if the loader fails, or
    /// `CacheError::CapacityExceeded` under the hard capacity policy.
    pub fn get_or_load(&self, key: &CacheKey, loader: &dyn ModelLoader) -> CacheResult<Locker> {
        match self.get(key) {
            Err(err) if err.is_not_found() => {}
            other => return other,
        }

        debug!(key = %key, "Loading model");
        let loaded = loader.load(key)?;
        let size = loaded.size_hint.unwrap_or_else(|| estimate_model_size(loaded.handle.as_ref()));

        let config = self.config();
        let mut guard = self.inner.state.lock();
        self.inner.wait_for_transfer(&mut guard, key, Some(Pool::Bulk));
        let state = &mut *guard;

        let evicted = if state.ledger.contains(key) {
            Vec::new()
        } else {
            CacheInner::insert_locked(state, &config, key.clone(), loaded.handle, size)?
        };
        let pinned = CacheInner::pin_locked(state, &config, key, None, false);
        drop(guard);

        release_evicted(evicted);
        let (model, id, size) = pinned.ok_or_else(|| CacheError::NotFound { key: key.to_string() })?;
        Ok(Locker::new(Arc::clone(&self.inner), key.clone(), id, model, size))
    }

    /// Evict unpinned entries occupying `pool`, least-recently-used first,
    /// until `bytes_needed` more bytes fit under the pool's ceiling.
    ///
    /// # Errors
    /// Returns `CacheError::CapacityExceeded` if the request cannot be met and
    /// the hard capacity policy is active. Nothing is evicted in that case.
    pub fn make_room(&self, pool: Pool, bytes_needed: u64) -> CacheResult<()> {
        let config = self.config();
        let evicted = {
            let mut state = self.inner.state.lock();
            CacheInner::make_room_locked(&mut state, &config, pool, bytes_needed)?
        };
        release_evicted(evicted);
        Ok(())
    }

    /// Move unpinned execution-resident models back to the bulk pool, smallest
    /// first, until `size_required` more bytes fit in the execution pool.
    ///
    /// # Errors
    /// Returns `CacheError::Transfer` if an offload fails, or
    /// `CacheError::CapacityExceeded` under the hard capacity policy.
    pub fn offload_unlocked(&self, size_required: u64) -> CacheResult<()> {
        self.inner.offload_unlocked(size_required)
    }

    /// Estimated bytes held in the bulk pool.
    #[must_use]
    pub fn cache_size(&self) -> u64 {
        self.inner.state.lock().ledger.total_bytes()
    }

    /// Bytes allocated on the execution device.
    #[must_use]
    pub fn execution_bytes(&self) -> u64 {
        self.inner.execution_memory.allocated()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().ledger.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` holds at least one pin.
    #[must_use]
    pub fn is_locked(&self, key: &CacheKey) -> bool {
        let state = self.inner.state.lock();
        state.ledger.get(key).is_some_and(|entry| state.pins.is_locked(entry.id))
    }

    /// All entries, least-recently-used first.
    #[must_use]
    pub fn entries(&self) -> Vec<EntryInfo> {
        let state = self.inner.state.lock();
        state
            .recency
            .iter()
            .filter_map(|key| {
                let entry = state.ledger.get(key)?;
                Some(EntryInfo {
                    key: key.to_string(),
                    pool: entry.pool,
                    size: entry.size,
                    locks: state.pins.count(entry.id),
                })
            })
            .collect()
    }

    /// Current memory usage of both pools.
    #[must_use]
    pub fn memory_snapshot(&self) -> MemorySnapshot {
        let bulk_bytes = self.cache_size();
        MemorySnapshot::capture(bulk_bytes, &self.inner.execution_memory)
    }

    /// Log pool usage and how many models sit in each pool.
    pub fn log_memory_stats(&self) {
        let state = self.inner.state.lock();
        self.inner.log_memory_stats_locked(&state);
    }
}

impl CacheInner {
    fn insert_locked(
        state: &mut CacheState,
        config: &CacheConfig,
        key: CacheKey,
        model: Box<dyn ModelHandle>,
        size: u64,
    ) -> CacheResult<Vec<CacheEntry>> {
        let evicted = Self::make_room_locked(state, config, Pool::Bulk, size)?;
        let id = state.ledger.allocate_id();
        state.ledger.insert(CacheEntry::new(id, key.clone(), model, size));
        state.recency.touch(&key);
        state.refresh_stats(config);
        info!(key = %key, size, "Model cached");
        Ok(evicted)
    }

    /// Pins `key` and moves it to the recency tail.
    fn pin_locked(
        state: &mut CacheState,
        config: &CacheConfig,
        key: &CacheKey,
        stats_name: Option<&str>,
        count_hit: bool,
    ) -> Option<(SharedModel, EntryId, u64)> {
        let entry = state.ledger.get(key)?;
        let model = Arc::clone(&entry.model);
        let (id, size) = (entry.id, entry.size);

        state.pins.acquire(id);
        state.recency.touch(key);
        if let Some(stats) = state.stats.as_mut() {
            if count_hit {
                stats.hits += 1;
            }
            let name = stats_name.map_or_else(|| key.to_string(), str::to_string);
            stats.loaded_model_sizes.entry(name).and_modify(|largest| *largest = (*largest).max(size)).or_insert(size);
        }
        state.refresh_stats(config);

        Some((model, id, size))
    }

    fn make_room_locked(
        state: &mut CacheState,
        config: &CacheConfig,
        pool: Pool,
        bytes_needed: u64,
    ) -> CacheResult<Vec<CacheEntry>> {
        let ceiling = config.ceiling(pool);
        let in_use = state.ledger.pool_bytes(pool);
        let excess = (in_use + bytes_needed).saturating_sub(ceiling);
        if excess == 0 {
            return Ok(Vec::new());
        }

        let victims = select_victims(&state.recency, &state.ledger, &state.pins, pool, excess);
        let freeable: u64 = victims.iter().filter_map(|key| state.ledger.get(key)).map(|entry| entry.size).sum();
        let remaining = in_use - freeable;

        if remaining + bytes_needed > ceiling {
            match config.capacity_policy {
                CapacityPolicy::Hard => {
                    warn!(pool = %pool, requested = bytes_needed, in_use = remaining, ceiling, "Pool capacity exceeded");
                    return Err(CacheError::CapacityExceeded { pool, requested: bytes_needed, in_use: remaining, ceiling });
                }
                CapacityPolicy::Soft => {
                    warn!(
                        pool = %pool,
                        requested = bytes_needed,
                        in_use = remaining,
                        ceiling,
                        "Pool over capacity after evicting all unpinned models, proceeding"
                    );
                }
            }
        }

        let mut evicted = Vec::with_capacity(victims.len());
        for key in victims {
            if let Some(entry) = state.delete(&key) {
                info!(key = %key, size = entry.size, pool = %pool, "Evicted model from cache");
                evicted.push(entry);
            }
        }
        if let Some(stats) = state.stats.as_mut() {
            stats.cleared += evicted.len() as u64;
        }
        state.refresh_stats(config);

        Ok(evicted)
    }

    fn offload_unlocked(&self, size_required: u64) -> CacheResult<()> {
        let config = self.config.read().clone();
        let mover = DeviceMover::new(&config, &self.execution_memory);
        let mut guard = self.state.lock();
        self.offload_unlocked_locked(&mut guard, &config, &mover, size_required)
    }

    /// Execution bytes in use, counting copies still in flight at their estimated size.
    fn execution_demand(&self, state: &CacheState) -> u64 {
        self.execution_memory.allocated() + state.ledger.in_flight_bytes(Pool::Execution)
    }

    fn offload_unlocked_locked(
        &self,
        guard: &mut MutexGuard<'_, CacheState>,
        config: &CacheConfig,
        mover: &DeviceMover<'_>,
        size_required: u64,
    ) -> CacheResult<()> {
        let ceiling = config.max_vram_cache_bytes;

        while self.execution_demand(guard) + size_required > ceiling {
            let candidate = offload_candidates(&guard.recency, &guard.ledger, &guard.pins)
                .first()
                .map(|entry| (entry.key.clone(), entry.id, entry.size));

            match candidate {
                Some((key, id, size)) => {
                    if !self.relocate(guard, mover, &key, id, Pool::Bulk)? {
                        break;
                    }
                    info!(key = %key, size, "Offloaded model from execution pool");
                }
                // Offloads started by other threads free their memory once they commit.
                None if guard.ledger.has_in_flight(Pool::Bulk) => self.transfer_done.wait(guard),
                None => break,
            }
        }

        let in_use = self.execution_demand(guard);
        if in_use + size_required > ceiling {
            match config.capacity_policy {
                CapacityPolicy::Hard => {
                    warn!(requested = size_required, in_use, ceiling, "Execution pool capacity exceeded");
                    return Err(CacheError::CapacityExceeded {
                        pool: Pool::Execution,
                        requested: size_required,
                        in_use,
                        ceiling,
                    });
                }
                CapacityPolicy::Soft => {
                    warn!(
                        requested = size_required,
                        in_use,
                        ceiling,
                        "Execution pool over capacity after offloading all unpinned models, proceeding"
                    );
                }
            }
        }
        Ok(())
    }

    pub(crate) fn load_into_execution(&self, key: &CacheKey, id: EntryId) -> CacheResult<()> {
        let config = self.config.read().clone();
        let mover = DeviceMover::new(&config, &self.execution_memory);
        let mut guard = self.state.lock();

        loop {
            self.wait_for_transfer(&mut guard, key, None);
            let Some(entry) = guard.ledger.get_current(key, id) else {
                return Err(CacheError::NotFound { key: key.to_string() });
            };
            if entry.pool == Pool::Execution || !config.has_distinct_execution_device() || !entry.movable {
                return Ok(());
            }
            let size = entry.size;

            self.offload_unlocked_locked(&mut guard, &config, &mover, size)?;
            // Another locker may have started placing this entry while offloads ran.
            if guard.ledger.get_current(key, id).is_some_and(|entry| entry.transfer.is_some()) {
                continue;
            }
            self.relocate(&mut guard, &mover, key, id, Pool::Execution)?;
            break;
        }

        if config.log_memory_usage {
            self.log_memory_stats_locked(&guard);
        }
        Ok(())
    }

    /// Drops one pin. In non-lazy mode the model returns to the bulk pool
    /// once its last pin is gone.
    pub(crate) fn unlock(&self, key: &CacheKey, id: EntryId) {
        let config = self.config.read().clone();
        let mut guard = self.state.lock();

        let remaining = guard.pins.release(id);
        if remaining > 0 || config.effective_lazy_offloading() || guard.ledger.get_current(key, id).is_none() {
            return;
        }

        let mover = DeviceMover::new(&config, &self.execution_memory);
        if let Err(err) = self.relocate(&mut guard, &mover, key, id, Pool::Bulk) {
            warn!(key = %key, error = %err, "Failed to return model to bulk pool after use");
        }
    }

    /// Runs one transfer, releasing the cache lock while weights are copied.
    ///
    /// Returns `false` when the mover had nothing to do.
    fn relocate(
        &self,
        guard: &mut MutexGuard<'_, CacheState>,
        mover: &DeviceMover<'_>,
        key: &CacheKey,
        id: EntryId,
        target: Pool,
    ) -> CacheResult<bool> {
        let Some(transfer) = mover.begin(guard, key, id, target)? else {
            return Ok(false);
        };
        let outcome = MutexGuard::unlocked(guard, || mover.run(&transfer));
        let committed = mover.finish(guard, transfer, outcome);
        self.transfer_done.notify_all();
        committed.map(|()| true)
    }

    /// Blocks until no transfer of `key` towards `target` is in flight. `None`
    /// waits for a transfer in either direction.
    fn wait_for_transfer(&self, guard: &mut MutexGuard<'_, CacheState>, key: &CacheKey, target: Option<Pool>) {
        while guard
            .ledger
            .get(key)
            .and_then(|entry| entry.transfer)
            .is_some_and(|pool| target.is_none_or(|target| target == pool))
        {
            self.transfer_done.wait(guard);
        }
    }

    pub(crate) fn pool_of(&self, key: &CacheKey, id: EntryId) -> Option<Pool> {
        self.state.lock().ledger.get_current(key, id).map(|entry| entry.pool)
    }

    pub(crate) fn state_dict_of(&self, key: &CacheKey, id: EntryId) -> Option<StateDict> {
        self.state.lock().ledger.get_current(key, id).and_then(|entry| entry.state_dict.clone())
    }

    fn log_memory_stats_locked(&self, state: &CacheState) {
        let snapshot = MemorySnapshot::capture(state.ledger.total_bytes(), &self.execution_memory);
        let in_execution = state.ledger.iter().filter(|entry| entry.pool == Pool::Execution).count();
        let locked = state.ledger.iter().filter(|entry| state.pins.is_locked(entry.id)).count();
        info!(
            memory = %snapshot,
            models = state.ledger.len(),
            in_bulk = state.ledger.len() - in_execution,
            in_execution,
            locked,
            "Model cache memory usage"
        );
    }
}

/// Drops evicted entries outside the cache lock, as one batch.
fn release_evicted(evicted: Vec<CacheEntry>) {
    if evicted.is_empty() {
        return;
    }
    let count = evicted.len();
    let bytes: u64 = evicted.iter().map(|entry| entry.size).sum();
    drop(evicted);
    debug!(count, bytes, "Released evicted models");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpaqueModel;

    fn cache(max_cache_bytes: u64) -> ModelCache {
        ModelCache::new(CacheConfig { max_cache_bytes, ..CacheConfig::default() }).unwrap()
    }

    fn put(cache: &ModelCache, name: &str, size: u64) {
        cache.put(CacheKey::new(name), Box::new(OpaqueModel::new(name, size))).unwrap();
    }

    fn keys(cache: &ModelCache) -> Vec<String> {
        cache.entries().into_iter().map(|entry| entry.key).collect()
    }

    #[test]
    fn test_cache_new_rejects_invalid_config() {
        let result = ModelCache::new(CacheConfig { max_cache_bytes: 0, ..CacheConfig::default() });
        assert!(matches!(result, Err(CacheError::Config(CacheConfigError::InvalidMaxCacheSize))));
    }

    #[test]
    fn test_cache_rejects_foreign_device_memory() {
        let memory = DeviceMemory::new(strata_abstraction::Device::Mps);
        let result = ModelCache::with_device_memory(CacheConfig::default(), memory);
        assert!(matches!(result, Err(CacheError::Config(CacheConfigError::DeviceMismatch { .. }))));
    }

    #[test]
    fn test_put_evicts_oldest() {
        let cache = cache(10);
        put(&cache, "x", 4);
        put(&cache, "y", 4);
        put(&cache, "z", 4);

        assert_eq!(keys(&cache), vec!["y", "z"]);
        assert_eq!(cache.cache_size(), 8);
        assert!(!cache.exists(&CacheKey::new("x")));
    }

    #[test]
    fn test_get_pins_and_drop_unpins() {
        let cache = cache(10);
        put(&cache, "a", 4);
        let key = CacheKey::new("a");

        let locker = cache.get(&key).unwrap();
        assert!(cache.is_locked(&key));
        assert_eq!(locker.size(), 4);
        assert_eq!(locker.pool(), Some(Pool::Bulk));
        assert_eq!(cache.entries()[0].locks, 1);

        drop(locker);
        assert!(!cache.is_locked(&key));
    }

    #[test]
    fn test_miss_counts() {
        let cache = cache(10);
        cache.attach_stats(CacheStats::default());

        let err = cache.get(&CacheKey::new("absent")).unwrap_err();
        assert!(err.is_not_found());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_stats_name_keeps_largest_size() {
        let cache = cache(10);
        put(&cache, "base", 4);
        put(&cache, "refiner", 2);
        cache.attach_stats(CacheStats::default());

        cache.get_as(&CacheKey::new("base"), Some("sdxl")).unwrap().release();
        cache.get_as(&CacheKey::new("refiner"), Some("sdxl")).unwrap().release();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.loaded_model_sizes["sdxl"], 4);
        assert_eq!(stats.hits, 2);
    }

    #[test]
    fn test_set_max_cache_bytes() {
        let cache = cache(10);
        assert!(cache.set_max_cache_bytes(0).is_err());
        cache.set_max_cache_bytes(20).unwrap();
        cache.set_max_vram_cache_bytes(5);

        let config = cache.config();
        assert_eq!(config.max_cache_bytes, 20);
        assert_eq!(config.max_vram_cache_bytes, 5);
    }

    #[test]
    fn test_clones_share_state() {
        let cache = cache(10);
        let other = cache.clone();
        put(&cache, "a", 1);
        assert!(other.exists(&CacheKey::new("a")));
        assert_eq!(other.len(), 1);
        assert!(!other.is_empty());
    }
}
