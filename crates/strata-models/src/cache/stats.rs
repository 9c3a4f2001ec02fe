//! Cache statistics, their reporting seam and memory snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strata_abstraction::DeviceMemory;
use tracing::info;

use super::config::GIB;

/// Counters maintained by the cache while a stats object is attached.
///
/// Written only by the cache; callers get copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups of absent keys.
    pub misses: u64,
    /// Highest bulk pool usage observed, in bytes.
    pub high_watermark: u64,
    /// Entries resident at the last update.
    pub in_cache: usize,
    /// Entries evicted since the stats were attached.
    pub cleared: u64,
    /// Bulk pool ceiling at the last update, in bytes.
    pub cache_size: u64,
    /// Size of each model that has been served, keyed by its stats name.
    pub loaded_model_sizes: BTreeMap<String, u64>,
}

/// Receives periodic stats snapshots.
pub trait StatsSink: Send + Sync {
    /// Records one snapshot.
    fn record(&self, stats: &CacheStats);
}

/// Sink that writes each snapshot as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatsSink;

impl StatsSink for TracingStatsSink {
    fn record(&self, stats: &CacheStats) {
        let summary = CacheStatsSummary::from(stats);
        info!(
            hits = stats.hits,
            misses = stats.misses,
            in_cache = stats.in_cache,
            cleared = stats.cleared,
            high_watermark_gb = summary.high_watermark_gb,
            cache_size_gb = summary.cache_size_gb,
            "Model cache statistics"
        );
    }
}

/// Human-facing rendering of [`CacheStats`] with sizes in GiB.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSummary {
    pub hits: u64,
    pub misses: u64,
    pub in_cache: usize,
    pub cleared: u64,
    pub high_watermark_gb: f64,
    pub cache_size_gb: f64,
    pub model_sizes_gb: BTreeMap<String, f64>,
}

#[allow(clippy::cast_precision_loss)]
fn to_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

impl From<&CacheStats> for CacheStatsSummary {
    fn from(stats: &CacheStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            in_cache: stats.in_cache,
            cleared: stats.cleared,
            high_watermark_gb: to_gib(stats.high_watermark),
            cache_size_gb: to_gib(stats.cache_size),
            model_sizes_gb: stats.loaded_model_sizes.iter().map(|(name, size)| (name.clone(), to_gib(*size))).collect(),
        }
    }
}

impl fmt::Display for CacheStatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model cache statistics:")?;
        writeln!(f, "   Cache hits:                   {}", self.hits)?;
        writeln!(f, "   Cache misses:                 {}", self.misses)?;
        writeln!(f, "   Models cached:                {}", self.in_cache)?;
        writeln!(f, "   Models cleared from cache:    {}", self.cleared)?;
        writeln!(f, "   Cache high water mark:        {:.2}/{:.2} GiB", self.high_watermark_gb, self.cache_size_gb)?;
        for (name, size) in &self.model_sizes_gb {
            writeln!(f, "   {name}: {size:.2} GiB")?;
        }
        Ok(())
    }
}

/// Memory usage at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    /// Estimated bytes held in the bulk pool.
    pub bulk_bytes: u64,
    /// Bytes allocated on the execution device.
    pub execution_bytes: u64,
    /// Peak execution device allocation.
    pub execution_peak: u64,
}

impl MemorySnapshot {
    /// Captures the current execution device usage alongside `bulk_bytes`.
    #[must_use]
    pub fn capture(bulk_bytes: u64, execution_memory: &DeviceMemory) -> Self {
        Self { bulk_bytes, execution_bytes: execution_memory.allocated(), execution_peak: execution_memory.peak() }
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bulk={:.3} GiB, execution={:.3} GiB (peak {:.3} GiB)",
            to_gib(self.bulk_bytes),
            to_gib(self.execution_bytes),
            to_gib(self.execution_peak)
        )
    }
}
