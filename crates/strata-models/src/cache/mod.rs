//! Two-tier model cache.
//!
//! Models live in a large bulk pool (host RAM) and are copied into a small
//! execution pool (accelerator memory) while they run. Unpinned models are
//! evicted least-recently-used first when the bulk pool is full, and offloaded
//! smallest first when the execution pool is full. A [`Locker`] pins a model
//! for as long as it is alive.

#[allow(clippy::module_inception)]
pub mod cache;
pub mod config;
pub mod error;
pub mod locker;
pub mod size;
pub mod stats;
pub mod types;

mod eviction;
mod ledger;
mod mover;
mod pins;
mod recency;

pub use cache::ModelCache;
pub use config::{CacheConfig, CacheConfigError, CapacityPolicy, GIB, MIB, load_cache_config};
pub use error::{CacheError, CacheResult};
pub use locker::{Locker, ModelGuard};
pub use size::{estimate_model_size, state_dict_size};
pub use stats::{CacheStats, CacheStatsSummary, MemorySnapshot, StatsSink, TracingStatsSink};
pub use types::{CacheKey, EntryInfo, Pool, SubModelType};
