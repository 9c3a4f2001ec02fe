//! Scoped pins on cache entries.

use parking_lot::RwLockReadGuard;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use strata_abstraction::{ModelHandle, StateDict};

use super::cache::CacheInner;
use super::error::CacheResult;
use super::types::{CacheKey, EntryId, Pool, SharedModel};

/// An active pin on a cache entry.
///
/// While a `Locker` is alive its entry is never evicted and never moved out of
/// the execution pool. The pin is released when the locker is dropped, on
/// every exit path. Access to the model is only ever borrowed from the
/// locker, so it cannot outlive the pin.
#[must_use = "dropping a Locker releases the pin immediately"]
pub struct Locker {
    cache: Arc<CacheInner>,
    key: CacheKey,
    id: EntryId,
    model: SharedModel,
    size: u64,
}

impl Locker {
    pub(crate) fn new(cache: Arc<CacheInner>, key: CacheKey, id: EntryId, model: SharedModel, size: u64) -> Self {
        Self { cache, key, id, model, size }
    }

    /// Key of the pinned entry.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Read access to the pinned model, wherever its weights currently live.
    ///
    /// A transfer of this model waits until outstanding guards are dropped
    /// before installing new weights.
    ///
    /// ```compile_fail
    /// use strata_models::{CacheConfig, CacheKey, ModelCache, OpaqueModel};
    ///
    /// let cache = ModelCache::new(CacheConfig::default()).unwrap();
    /// let key = CacheKey::new("tokenizer");
    /// cache.put(key.clone(), Box::new(OpaqueModel::new("tokenizer", 16))).unwrap();
    ///
    /// let locker = cache.get(&key).unwrap();
    /// let model = locker.model();
    /// drop(locker);
    /// println!("{}", model.model_id());
    /// ```
    pub fn model(&self) -> ModelGuard<'_> {
        ModelGuard { guard: self.model.read() }
    }

    /// Estimated size of the entry in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Pool currently holding the live weights, or `None` if the entry was
    /// removed after a failed transfer.
    pub fn pool(&self) -> Option<Pool> {
        self.cache.pool_of(&self.key, self.id)
    }

    /// The weight snapshot retained in the bulk pool, if the model has one.
    pub fn state_dict(&self) -> Option<StateDict> {
        self.cache.state_dict_of(&self.key, self.id)
    }

    /// Places the model in the execution pool and returns read access to it.
    ///
    /// Unpinned execution-resident models are offloaded first if the
    /// execution pool lacks room. The copy waits for guards on this model
    /// held through other lockers to be dropped.
    ///
    /// # Errors
    /// Returns `CacheError::Transfer` if the copy fails (the entry is removed),
    /// `CacheError::CapacityExceeded` under the hard capacity policy, or
    /// `CacheError::NotFound` if the entry has already been removed.
    pub fn model_on_device(&mut self) -> CacheResult<ModelGuard<'_>> {
        self.cache.load_into_execution(&self.key, self.id)?;
        Ok(self.model())
    }

    /// Releases the pin. Equivalent to dropping the locker.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Locker {
    fn drop(&mut self) {
        self.cache.unlock(&self.key, self.id);
    }
}

impl fmt::Debug for Locker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("key", &self.key)
            .field("entry", &self.id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Shared access to a pinned model, borrowed from its [`Locker`].
pub struct ModelGuard<'a> {
    guard: RwLockReadGuard<'a, Box<dyn ModelHandle>>,
}

impl Deref for ModelGuard<'_> {
    type Target = dyn ModelHandle;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl fmt::Debug for ModelGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelGuard").field("model_id", &self.model_id()).finish_non_exhaustive()
    }
}
