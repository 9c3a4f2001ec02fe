//! Dense weight tensors.

use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::ModelError;
use crate::device::{Device, Reservation};

/// Named weight tensors of a model, ordered by name.
pub type StateDict = BTreeMap<String, Tensor>;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// IEEE 754 single precision.
    #[serde(alias = "f32", alias = "fp32")]
    Float32,
    /// IEEE 754 half precision.
    #[serde(alias = "f16", alias = "fp16")]
    Float16,
    /// Brain floating point.
    #[serde(alias = "bf16")]
    BFloat16,
}

impl DType {
    /// Bytes per element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float16 | Self::BFloat16 => 2,
        }
    }

    fn encode(self, value: f32, out: &mut Vec<u8>) {
        match self {
            Self::Float32 => out.extend_from_slice(&value.to_le_bytes()),
            Self::Float16 => out.extend_from_slice(&f16::from_f32(value).to_le_bytes()),
            Self::BFloat16 => out.extend_from_slice(&bf16::from_f32(value).to_le_bytes()),
        }
    }

    fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            Self::Float16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            Self::BFloat16 => bf16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
            Self::BFloat16 => "bfloat16",
        };
        f.write_str(name)
    }
}

/// A dense, immutable tensor.
///
/// Cloning is cheap: clones share the underlying buffer and, for device
/// tensors, the device reservation.
#[derive(Clone)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    device: Device,
    data: Arc<[u8]>,
    reservation: Option<Arc<Reservation>>,
}

impl Tensor {
    /// Builds a host tensor from `f32` values, converting to `dtype`.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidTensor`] if `values` does not match `shape`.
    pub fn from_f32(shape: &[usize], values: &[f32], dtype: DType) -> Result<Self, ModelError> {
        let numel: usize = shape.iter().product();
        if numel != values.len() {
            return Err(ModelError::InvalidTensor(format!(
                "shape {shape:?} holds {numel} elements but {} values were given",
                values.len()
            )));
        }
        let mut data = Vec::with_capacity(numel * dtype.size_in_bytes());
        for &value in values {
            dtype.encode(value, &mut data);
        }
        Ok(Self::from_parts(shape.to_vec(), dtype, Device::Cpu, data.into(), None))
    }

    /// A zero-filled host tensor.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        let data = vec![0_u8; numel * dtype.size_in_bytes()];
        Self::from_parts(shape.to_vec(), dtype, Device::Cpu, data.into(), None)
    }

    pub(crate) fn from_parts(
        shape: Vec<usize>,
        dtype: DType,
        device: Device,
        data: Arc<[u8]>,
        reservation: Option<Arc<Reservation>>,
    ) -> Self {
        Self { shape, dtype, device, data, reservation }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the data buffer in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Device bytes held by this tensor's reservation; zero for host tensors.
    pub fn reserved_bytes(&self) -> u64 {
        self.reservation.as_ref().map_or(0, |r| r.bytes())
    }

    /// Identity of the underlying buffer; equal for tensors sharing storage.
    pub fn storage_id(&self) -> usize {
        Arc::as_ptr(&self.data).cast::<u8>() as usize
    }

    /// Returns `true` if both tensors share one buffer.
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Raw little-endian element bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decodes every element to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.data.chunks_exact(self.dtype.size_in_bytes()).map(|chunk| self.dtype.decode(chunk)).collect()
    }

    /// Element bytes converted to `dtype`; a plain copy when the type is unchanged.
    pub(crate) fn cast_bytes(&self, dtype: DType) -> Vec<u8> {
        if dtype == self.dtype {
            return self.data.to_vec();
        }
        let mut out = Vec::with_capacity(self.numel() * dtype.size_in_bytes());
        for chunk in self.data.chunks_exact(self.dtype.size_in_bytes()) {
            dtype.encode(self.dtype.decode(chunk), &mut out);
        }
        out
    }
}

impl PartialEq for Tensor {
    /// Value equality; the device is not compared.
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.dtype == other.dtype && self.data == other.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .field("nbytes", &self.nbytes())
            .finish_non_exhaustive()
    }
}
