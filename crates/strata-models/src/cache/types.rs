//! Core data types for model caching.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use strata_abstraction::{ModelHandle, StateDict};

/// A cached model handle, shared between the cache and active lockers.
pub(crate) type SharedModel = Arc<RwLock<Box<dyn ModelHandle>>>;

/// Identity of one cache entry.
///
/// A key that is evicted and inserted again gets a new id, so pins and
/// lockers taken on the old entry never apply to its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct EntryId(pub(crate) u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Component of a multi-part model pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubModelType {
    #[serde(rename = "unet")]
    UNet,
    Transformer,
    TextEncoder,
    #[serde(rename = "text_encoder_2")]
    TextEncoder2,
    Tokenizer,
    #[serde(rename = "tokenizer_2")]
    Tokenizer2,
    Vae,
    VaeDecoder,
    VaeEncoder,
    Scheduler,
    SafetyChecker,
}

impl SubModelType {
    /// Identifier used in composite cache keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UNet => "unet",
            Self::Transformer => "transformer",
            Self::TextEncoder => "text_encoder",
            Self::TextEncoder2 => "text_encoder_2",
            Self::Tokenizer => "tokenizer",
            Self::Tokenizer2 => "tokenizer_2",
            Self::Vae => "vae",
            Self::VaeDecoder => "vae_decoder",
            Self::VaeEncoder => "vae_encoder",
            Self::Scheduler => "scheduler",
            Self::SafetyChecker => "safety_checker",
        }
    }

    const ALL: [Self; 11] = [
        Self::UNet,
        Self::Transformer,
        Self::TextEncoder,
        Self::TextEncoder2,
        Self::Tokenizer,
        Self::Tokenizer2,
        Self::Vae,
        Self::VaeDecoder,
        Self::VaeEncoder,
        Self::Scheduler,
        Self::SafetyChecker,
    ];
}

impl fmt::Display for SubModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|submodel| submodel.as_str() == s)
            .ok_or_else(|| format!("unknown submodel type '{s}'"))
    }
}

/// Cache key for identifying cached models.
///
/// A model key with an optional sub-model qualifier. The composite form is
/// rendered as `"base:submodel"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    model_key: String,
    submodel: Option<SubModelType>,
}

impl CacheKey {
    /// Key for a whole model.
    pub fn new(model_key: impl Into<String>) -> Self {
        Self { model_key: model_key.into(), submodel: None }
    }

    /// Key for one component of a model.
    pub fn with_submodel(model_key: impl Into<String>, submodel: SubModelType) -> Self {
        Self { model_key: model_key.into(), submodel: Some(submodel) }
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    pub fn submodel(&self) -> Option<SubModelType> {
        self.submodel
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.submodel {
            Some(submodel) => write!(f, "{}:{}", self.model_key, submodel),
            None => f.write_str(&self.model_key),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(model_key: &str) -> Self {
        Self::new(model_key)
    }
}

/// Memory tier holding a model's live weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// Large, slow tier (host RAM).
    Bulk,
    /// Small, fast tier (accelerator memory).
    Execution,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bulk => write!(f, "bulk"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

/// A cached model and its placement.
pub(crate) struct CacheEntry {
    pub(crate) id: EntryId,
    pub(crate) key: CacheKey,
    pub(crate) model: SharedModel,
    pub(crate) pool: Pool,
    /// Estimated footprint, fixed at insertion.
    pub(crate) size: u64,
    /// Whether the handle can relocate its weights. Fixed at insertion.
    pub(crate) movable: bool,
    /// Bulk-resident copy of the weights, used to restore after execution.
    pub(crate) state_dict: Option<StateDict>,
    /// Destination of a transfer that is copying weights outside the cache lock.
    pub(crate) transfer: Option<Pool>,
}

impl CacheEntry {
    pub(crate) fn new(id: EntryId, key: CacheKey, model: Box<dyn ModelHandle>, size: u64) -> Self {
        let movable = model.is_movable();
        let state_dict = if movable { model.export_weights() } else { None };
        Self {
            id,
            key,
            model: Arc::new(RwLock::new(model)),
            pool: Pool::Bulk,
            size,
            movable,
            state_dict,
            transfer: None,
        }
    }

    /// Every entry keeps its weights in the bulk pool; only some also occupy
    /// the execution pool.
    pub(crate) fn occupies(&self, pool: Pool) -> bool {
        match pool {
            Pool::Bulk => true,
            Pool::Execution => self.pool == Pool::Execution,
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("pool", &self.pool)
            .field("size", &self.size)
            .field("transfer", &self.transfer)
            .field("has_state_dict", &self.state_dict.is_some())
            .finish_non_exhaustive()
    }
}

/// Read-only view of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    /// Composite cache key.
    pub key: String,
    /// Pool holding the live weights.
    pub pool: Pool,
    /// Estimated size in bytes.
    pub size: u64,
    /// Active pins.
    pub locks: usize,
}
