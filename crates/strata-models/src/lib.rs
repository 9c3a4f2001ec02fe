//! Model caching for Strata.
//!
//! This crate provides the two-tier [`ModelCache`], the concrete model handles
//! it is usually filled with, and the [`ModelLoader`] seam used to populate it
//! on a miss.

pub mod cache;
pub mod handles;
pub mod loader;

pub use cache::{
    CacheConfig, CacheConfigError, CacheError, CacheKey, CacheResult, CacheStats, CacheStatsSummary, CapacityPolicy,
    EntryInfo, Locker, MemorySnapshot, ModelCache, ModelGuard, Pool, StatsSink, SubModelType, TracingStatsSink,
    load_cache_config,
};
pub use handles::{OpaqueModel, TensorModel};
pub use loader::{LoadedModel, ModelLoader};
