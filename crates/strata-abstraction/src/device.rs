//! Devices and device memory accounting.
//!
//! A [`DeviceMemory`] tracks how many bytes are currently allocated on one
//! device. Tensors copied onto the device hold a [`Reservation`], and the bytes
//! are returned to the pool when the last tensor sharing that reservation is
//! dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::tensor::{DType, Tensor};

/// Errors raised by device parsing and device memory allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device specifier could not be parsed.
    #[error("Invalid device specifier: {0}")]
    InvalidDevice(String),

    /// The device does not have enough free memory for the allocation.
    #[error("Out of memory on {device}: requested {requested} bytes, {available} bytes available")]
    OutOfMemory {
        /// Device the allocation was attempted on.
        device: Device,
        /// Bytes requested.
        requested: u64,
        /// Bytes still free at the time of the request.
        available: u64,
    },
}

/// A compute or storage device.
///
/// Parsed from strings such as `cpu`, `cuda`, `cuda:1` or `mps`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// CUDA device with ordinal.
    Cuda(u32),
    /// Apple Metal device.
    Mps,
}

impl Device {
    /// Returns `true` for host memory.
    pub fn is_host(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Compares device types only, so `cuda:0` and `cuda:1` match.
    pub fn same_kind(self, other: Self) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            Self::Mps => write!(f, "mps"),
        }
    }
}

impl FromStr for Device {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim().to_ascii_lowercase();
        match spec.split_once(':') {
            None => match spec.as_str() {
                "cpu" => Ok(Self::Cpu),
                "cuda" => Ok(Self::Cuda(0)),
                "mps" => Ok(Self::Mps),
                _ => Err(DeviceError::InvalidDevice(s.to_string())),
            },
            Some(("cuda", ordinal)) => ordinal
                .parse::<u32>()
                .map(Self::Cuda)
                .map_err(|_| DeviceError::InvalidDevice(s.to_string())),
            Some(_) => Err(DeviceError::InvalidDevice(s.to_string())),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = DeviceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

/// Allocation accounting for a single device.
#[derive(Debug)]
pub struct DeviceMemory {
    device: Device,
    /// Physical capacity; `None` means allocations never fail.
    capacity_bytes: Option<u64>,
    allocated: AtomicU64,
    peak: AtomicU64,
}

impl DeviceMemory {
    /// Creates an unbounded memory tracker for `device`.
    pub fn new(device: Device) -> Arc<Self> {
        Arc::new(Self { device, capacity_bytes: None, allocated: AtomicU64::new(0), peak: AtomicU64::new(0) })
    }

    /// Creates a memory tracker that refuses allocations beyond `capacity_bytes`.
    pub fn with_capacity(device: Device, capacity_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            device,
            capacity_bytes: Some(capacity_bytes),
            allocated: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        })
    }

    /// The device this tracker accounts for.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Physical capacity, if bounded.
    pub fn capacity(&self) -> Option<u64> {
        self.capacity_bytes
    }

    /// Bytes currently allocated.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Highest allocation level seen since creation or the last [`Self::reset_peak`].
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Resets the peak to the current allocation level.
    pub fn reset_peak(&self) {
        self.peak.store(self.allocated(), Ordering::Release);
    }

    /// Reserves `bytes` on the device.
    ///
    /// # Errors
    /// Returns [`DeviceError::OutOfMemory`] when the reservation would exceed the
    /// physical capacity.
    pub fn reserve(self: &Arc<Self>, bytes: u64) -> Result<Reservation, DeviceError> {
        let mut current = self.allocated.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            if let Some(capacity) = self.capacity_bytes {
                if next > capacity {
                    return Err(DeviceError::OutOfMemory {
                        device: self.device,
                        requested: bytes,
                        available: capacity.saturating_sub(current),
                    });
                }
            }
            match self.allocated.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::AcqRel);
                    return Ok(Reservation { memory: Arc::clone(self), bytes });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Copies `tensor` into newly reserved device memory, converting to `dtype`.
    ///
    /// The source tensor is left untouched.
    ///
    /// # Errors
    /// Returns [`DeviceError::OutOfMemory`] if the copy does not fit.
    pub fn copy_in(self: &Arc<Self>, tensor: &Tensor, dtype: DType) -> Result<Tensor, DeviceError> {
        let bytes = (tensor.numel() * dtype.size_in_bytes()) as u64;
        let reservation = self.reserve(bytes)?;
        let data = tensor.cast_bytes(dtype);
        Ok(Tensor::from_parts(tensor.shape().to_vec(), dtype, self.device, data.into(), Some(Arc::new(reservation))))
    }
}

/// Bytes held on a device; released on drop.
#[derive(Debug)]
pub struct Reservation {
    memory: Arc<DeviceMemory>,
    bytes: u64,
}

impl Reservation {
    /// Size of the reservation in bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.memory.allocated.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}
