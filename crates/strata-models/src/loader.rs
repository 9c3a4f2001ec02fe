//! Seam between the cache and whatever produces model handles.

use std::fmt;
use strata_abstraction::{ModelError, ModelHandle};

use crate::cache::CacheKey;

/// A freshly loaded model.
pub struct LoadedModel {
    /// The model handle.
    pub handle: Box<dyn ModelHandle>,
    /// Byte size reported by the loader. Estimated from the handle when `None`.
    pub size_hint: Option<u64>,
}

impl LoadedModel {
    /// Wraps a handle whose size the cache should estimate.
    pub fn new(handle: Box<dyn ModelHandle>) -> Self {
        Self { handle, size_hint: None }
    }

    /// Wraps a handle with a known size.
    pub fn with_size(handle: Box<dyn ModelHandle>, size: u64) -> Self {
        Self { handle, size_hint: Some(size) }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model_id", &self.handle.model_id())
            .field("size_hint", &self.size_hint)
            .finish()
    }
}

/// Produces model handles on cache misses.
pub trait ModelLoader: Send + Sync {
    /// Loads the model identified by `key`.
    ///
    /// # Errors
    /// Returns `ModelError::LoadError` if the model cannot be produced.
    fn load(&self, key: &CacheKey) -> Result<LoadedModel, ModelError>;
}

impl<F> ModelLoader for F
where
    F: Fn(&CacheKey) -> Result<LoadedModel, ModelError> + Send + Sync,
{
    fn load(&self, key: &CacheKey) -> Result<LoadedModel, ModelError> {
        self(key)
    }
}
