//! Errors raised by cache operations.

use strata_abstraction::ModelError;
use thiserror::Error;

use super::config::CacheConfigError;
use super::types::Pool;

/// Errors returned by [`ModelCache`](super::ModelCache) and [`Locker`](super::Locker).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key is not present in the cache.
    #[error("Model not found in cache: {key}")]
    NotFound {
        /// Composite key that was looked up.
        key: String,
    },

    /// A weight transfer failed; the entry has been removed from the cache.
    #[error("Transfer of '{key}' from {from} to {to} failed: {reason}")]
    Transfer {
        /// Composite key of the removed entry.
        key: String,
        /// Pool the weights were leaving.
        from: Pool,
        /// Pool the weights were moving to.
        to: Pool,
        /// Underlying failure.
        reason: String,
    },

    /// A pool could not be brought under its ceiling and the hard capacity policy is active.
    #[error("Capacity exceeded in {pool} pool: requested {requested} bytes with {in_use} of {ceiling} in use")]
    CapacityExceeded {
        /// Pool that overflowed.
        pool: Pool,
        /// Bytes the operation needed.
        requested: u64,
        /// Bytes in use after every possible eviction.
        in_use: u64,
        /// Configured ceiling.
        ceiling: u64,
    },

    /// The model handle or loader failed.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] CacheConfigError),
}

impl CacheError {
    /// Whether this is a lookup miss, which callers are expected to handle by loading.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
