//! Configuration for the model cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use strata_abstraction::{DType, Device};
use thiserror::Error;

use super::types::Pool;

/// One gibibyte in bytes.
pub const GIB: u64 = 1 << 30;

/// One mebibyte in bytes.
pub const MIB: u64 = 1 << 20;

/// What to do when a pool cannot be brought under its ceiling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityPolicy {
    /// Log the overage and proceed.
    #[default]
    Soft,
    /// Fail the operation with `CacheError::CapacityExceeded`.
    Hard,
}

impl fmt::Display for CapacityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Soft => write!(f, "soft"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

/// Configuration for the model cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Bulk (RAM) pool ceiling in bytes (default: 6 GiB).
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// Execution (VRAM) pool ceiling in bytes (default: 2.75 GiB).
    #[serde(default = "default_max_vram_cache_bytes")]
    pub max_vram_cache_bytes: u64,

    /// Device models execute on.
    #[serde(default = "default_execution_device")]
    pub execution_device: Device,

    /// Device inactive models are stored on. Must be host memory.
    #[serde(default)]
    pub storage_device: Device,

    /// Precision of execution-resident weight copies.
    #[serde(default = "default_precision")]
    pub precision: DType,

    /// Keep models on the execution device until the space is needed.
    #[serde(default = "default_lazy_offloading")]
    pub lazy_offloading: bool,

    /// Capture and log memory snapshots around every transfer.
    #[serde(default)]
    pub log_memory_usage: bool,

    /// Behavior when a pool cannot be brought under its ceiling.
    #[serde(default)]
    pub capacity_policy: CapacityPolicy,
}

fn default_max_cache_bytes() -> u64 {
    6 * GIB
}

fn default_max_vram_cache_bytes() -> u64 {
    // 2.75 GiB
    11 * GIB / 4
}

fn default_execution_device() -> Device {
    Device::Cuda(0)
}

fn default_precision() -> DType {
    DType::Float16
}

fn default_lazy_offloading() -> bool {
    true
}

/// Errors that can occur during cache configuration loading and validation.
#[derive(Debug, Error)]
pub enum CacheConfigError {
    /// Invalid bulk pool ceiling (must be > 0).
    #[error("Invalid max cache size: must be greater than 0")]
    InvalidMaxCacheSize,

    /// The storage device must be host memory.
    #[error("Invalid storage device '{0}': inactive models must be stored in host memory")]
    StorageDeviceNotHost(Device),

    /// The supplied device memory tracker is for a different device.
    #[error("Execution memory tracks {actual} but the cache executes on {expected}")]
    DeviceMismatch {
        /// Configured execution device.
        expected: Device,
        /// Device of the supplied tracker.
        actual: Device,
    },

    /// I/O error reading a config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: default_max_cache_bytes(),
            max_vram_cache_bytes: default_max_vram_cache_bytes(),
            execution_device: default_execution_device(),
            storage_device: Device::Cpu,
            precision: default_precision(),
            lazy_offloading: default_lazy_offloading(),
            log_memory_usage: false,
            capacity_policy: CapacityPolicy::Soft,
        }
    }
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.max_cache_bytes == 0 {
            return Err(CacheConfigError::InvalidMaxCacheSize);
        }

        if !self.storage_device.is_host() {
            return Err(CacheConfigError::StorageDeviceNotHost(self.storage_device));
        }

        Ok(())
    }

    /// Byte ceiling of `pool`.
    #[must_use]
    pub fn ceiling(&self, pool: Pool) -> u64 {
        match pool {
            Pool::Bulk => self.max_cache_bytes,
            Pool::Execution => self.max_vram_cache_bytes,
        }
    }

    /// Lazy offloading only applies when an execution pool is configured.
    #[must_use]
    pub fn effective_lazy_offloading(&self) -> bool {
        self.lazy_offloading && self.max_vram_cache_bytes > 0
    }

    /// Whether transfers actually change device.
    #[must_use]
    pub fn has_distinct_execution_device(&self) -> bool {
        !self.execution_device.same_kind(self.storage_device)
    }
}

/// Load cache configuration from the `[model_cache]` table of a TOML file.
///
/// Returns the default configuration when the file or the section is missing.
///
/// # Errors
/// Returns an error if the file exists but cannot be read, parsed or validated.
pub fn load_cache_config(path: &Path) -> Result<CacheConfig, CacheConfigError> {
    if !path.exists() {
        return Ok(CacheConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&content)?;

    let Some(section) = table.get("model_cache") else {
        return Ok(CacheConfig::default());
    };

    let section_str = toml::to_string(section)?;
    let config: CacheConfig = toml::from_str(&section_str)?;
    config.validate()?;

    Ok(config)
}
