//! Scripted cache workloads.
//!
//! A workload is a TOML file listing synthetic models and the steps to replay
//! against a cache. The same file may carry a `[model_cache]` table with the
//! cache configuration.
//!
//! ```toml
//! [device]
//! capacity_bytes = 4096
//!
//! [[models]]
//! key = "sdxl:unet"
//! parameters = 256
//!
//! [[models]]
//! key = "sdxl:tokenizer"
//! size_bytes = 10
//!
//! [[steps]]
//! op = "use"
//! model = "sdxl:unet"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use strata_abstraction::{DType, ModelError, ModelHandle, StateDict, Tensor};
use strata_models::{CacheKey, LoadedModel, ModelLoader, OpaqueModel, Pool, SubModelType, TensorModel};

/// A parsed workload file.
#[derive(Debug, Deserialize)]
pub struct Workload {
    /// Execution device limits.
    #[serde(default)]
    pub device: DeviceSpec,
    /// Models the steps may refer to.
    pub models: Vec<ModelSpec>,
    /// Steps to replay, in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Physical limits of the simulated execution device.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceSpec {
    /// Allocations beyond this fail with out-of-memory. Unbounded when absent.
    pub capacity_bytes: Option<u64>,
}

/// A synthetic model.
///
/// Exactly one of `parameters` (a movable single-tensor model) or `size_bytes`
/// (an immovable model of that size) must be given.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    /// Cache key, `base` or `base:submodel`.
    pub key: String,
    /// Number of weight elements.
    pub parameters: Option<usize>,
    /// Footprint of an immovable model.
    pub size_bytes: Option<u64>,
    /// Element type of the weights.
    #[serde(default = "default_dtype")]
    pub dtype: DType,
}

fn default_dtype() -> DType {
    DType::Float32
}

impl ModelSpec {
    /// Builds a fresh handle for this model.
    pub fn build(&self) -> Result<Box<dyn ModelHandle>, ModelError> {
        match (self.parameters, self.size_bytes) {
            (Some(parameters), None) => {
                #[allow(clippy::cast_precision_loss)]
                let values: Vec<f32> = (0..parameters).map(|i| (i % 64) as f32 / 8.0 - 4.0).collect();
                let mut weights = StateDict::new();
                weights.insert("weight".to_string(), Tensor::from_f32(&[parameters], &values, self.dtype)?);
                Ok(Box::new(TensorModel::new(self.key.as_str(), weights)))
            }
            (None, Some(size_bytes)) => Ok(Box::new(OpaqueModel::new(self.key.as_str(), size_bytes))),
            _ => Err(ModelError::LoadError(format!(
                "model '{}' needs exactly one of `parameters` or `size_bytes`",
                self.key
            ))),
        }
    }
}

/// One workload step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Insert the model without pinning it.
    Load { model: String },
    /// Look up (loading on a miss), place on the execution device, release.
    Use { model: String },
    /// Look up (loading on a miss) and keep the pin until a matching `unpin`.
    Pin { model: String },
    /// Release one pin taken by `pin`.
    Unpin { model: String },
    /// Offload unpinned models until `bytes` fit in the execution pool.
    Offload { bytes: u64 },
    /// Evict unpinned models until `bytes` fit in `pool`.
    MakeRoom { pool: Pool, bytes: u64 },
}

impl Step {
    /// The model this step refers to, if any.
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Load { model } | Self::Use { model } | Self::Pin { model } | Self::Unpin { model } => Some(model.as_str()),
            Self::Offload { .. } | Self::MakeRoom { .. } => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { model } => write!(f, "load {model}"),
            Self::Use { model } => write!(f, "use {model}"),
            Self::Pin { model } => write!(f, "pin {model}"),
            Self::Unpin { model } => write!(f, "unpin {model}"),
            Self::Offload { bytes } => write!(f, "offload {bytes}"),
            Self::MakeRoom { pool, bytes } => write!(f, "make_room {pool} {bytes}"),
        }
    }
}

/// Parses `base` or `base:submodel` into a cache key.
pub fn parse_key(key: &str) -> Result<CacheKey> {
    match key.split_once(':') {
        Some((base, submodel)) => {
            let submodel: SubModelType = submodel.parse().map_err(anyhow::Error::msg)?;
            Ok(CacheKey::with_submodel(base, submodel))
        }
        None => Ok(CacheKey::new(key)),
    }
}

/// Reads and validates a workload file.
pub fn load_workload(path: &Path) -> Result<Workload> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read workload {}", path.display()))?;
    let workload: Workload =
        toml::from_str(&content).with_context(|| format!("Failed to parse workload {}", path.display()))?;
    workload.validate()?;
    Ok(workload)
}

impl Workload {
    fn validate(&self) -> Result<()> {
        let mut known = HashSet::new();
        for spec in &self.models {
            parse_key(&spec.key).with_context(|| format!("Invalid model key '{}'", spec.key))?;
            if spec.parameters.is_some() == spec.size_bytes.is_some() {
                bail!("model '{}' needs exactly one of `parameters` or `size_bytes`", spec.key);
            }
            if !known.insert(spec.key.as_str()) {
                bail!("model '{}' is declared twice", spec.key);
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            if let Some(model) = step.model() {
                if !known.contains(model) {
                    bail!("step {} ({step}) refers to unknown model '{model}'", index + 1);
                }
            }
        }
        Ok(())
    }
}

/// Loads workload models on cache misses.
pub struct WorkloadLoader<'a> {
    models: HashMap<CacheKey, &'a ModelSpec>,
}

impl<'a> WorkloadLoader<'a> {
    pub fn new(models: &'a [ModelSpec]) -> Result<Self> {
        let models = models.iter().map(|spec| Ok((parse_key(&spec.key)?, spec))).collect::<Result<_>>()?;
        Ok(Self { models })
    }
}

impl ModelLoader for WorkloadLoader<'_> {
    fn load(&self, key: &CacheKey) -> Result<LoadedModel, ModelError> {
        let spec = self.models.get(key).ok_or_else(|| ModelError::LoadError(format!("no model named '{key}'")))?;
        Ok(LoadedModel::new(spec.build()?))
    }
}
