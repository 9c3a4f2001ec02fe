//! Model abstraction layer for Strata.
//!
//! This crate defines the capability interface that cached model handles
//! implement, together with the tensor and device types their weights are
//! expressed in.

pub mod device;
pub mod tensor;

use std::fmt;
use thiserror::Error;

pub use device::{Device, DeviceError, DeviceMemory, Reservation};
pub use tensor::{DType, StateDict, Tensor};

/// Represents an error raised by a model handle or a model loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A tensor was constructed from inconsistent data.
    #[error("Invalid tensor: {0}")]
    InvalidTensor(String),

    /// Imported weights do not match the model's parameter layout.
    #[error("Weight mismatch: {0}")]
    WeightMismatch(String),

    /// The loader could not produce the requested model.
    #[error("Load Error: {0}")]
    LoadError(String),

    /// A device-level failure while handling weights.
    #[error("Device Error: {0}")]
    Device(#[from] DeviceError),

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

/// Capability interface for objects held by the model cache.
///
/// Handles whose weights can be relocated between devices override
/// [`is_movable`](Self::is_movable), [`export_weights`](Self::export_weights)
/// and [`import_weights`](Self::import_weights). The defaults describe a handle
/// that stays wherever it was created, such as a tokenizer or scheduler.
///
/// All handles must be `Send + Sync` to allow concurrent use across threads.
pub trait ModelHandle: Send + Sync + fmt::Debug {
    /// Returns the ID of the model.
    fn model_id(&self) -> &str;

    /// Whether the weights can be moved between devices.
    fn is_movable(&self) -> bool {
        false
    }

    /// Returns the current weights. Tensors share storage with the model.
    fn export_weights(&self) -> Option<StateDict> {
        None
    }

    /// Replaces the model's weights with `weights`.
    ///
    /// # Errors
    /// Returns [`ModelError::WeightMismatch`] if the layout does not match.
    fn import_weights(&mut self, _weights: StateDict) -> Result<(), ModelError> {
        Ok(())
    }

    /// Device currently holding the weights, if the handle has any.
    fn device(&self) -> Option<Device> {
        None
    }

    /// Byte size reported by the handle when it exposes no weights.
    fn size_hint(&self) -> u64 {
        0
    }
}
