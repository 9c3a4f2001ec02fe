//! Concrete model handles.

use strata_abstraction::{Device, ModelError, ModelHandle, StateDict};
use tracing::debug;

/// A model whose weights are a named set of tensors and can move between devices.
#[derive(Debug, Clone)]
pub struct TensorModel {
    id: String,
    weights: StateDict,
}

impl TensorModel {
    /// Creates a model from its weights.
    pub fn new(id: impl Into<String>, weights: StateDict) -> Self {
        Self { id: id.into(), weights }
    }

    /// The live weights.
    pub fn weights(&self) -> &StateDict {
        &self.weights
    }
}

impl ModelHandle for TensorModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn is_movable(&self) -> bool {
        true
    }

    fn export_weights(&self) -> Option<StateDict> {
        Some(self.weights.clone())
    }

    fn import_weights(&mut self, weights: StateDict) -> Result<(), ModelError> {
        if weights.len() != self.weights.len() {
            return Err(ModelError::WeightMismatch(format!(
                "'{}' has {} parameters, got {}",
                self.id,
                self.weights.len(),
                weights.len()
            )));
        }
        for (name, tensor) in &weights {
            let Some(current) = self.weights.get(name) else {
                return Err(ModelError::WeightMismatch(format!("'{}' has no parameter '{name}'", self.id)));
            };
            if current.shape() != tensor.shape() {
                return Err(ModelError::WeightMismatch(format!(
                    "'{}' parameter '{name}' has shape {:?}, got {:?}",
                    self.id,
                    current.shape(),
                    tensor.shape()
                )));
            }
        }

        debug!(model_id = %self.id, device = ?weights.values().next().map(|t| t.device()), "Importing weights");
        self.weights = weights;
        Ok(())
    }

    fn device(&self) -> Option<Device> {
        self.weights.values().next().map(|tensor| tensor.device())
    }
}

/// A model without relocatable weights, such as a tokenizer or scheduler.
#[derive(Debug, Clone)]
pub struct OpaqueModel {
    id: String,
    size_bytes: u64,
}

impl OpaqueModel {
    /// Creates a handle that reports `size_bytes` as its footprint.
    pub fn new(id: impl Into<String>, size_bytes: u64) -> Self {
        Self { id: id.into(), size_bytes }
    }
}

impl ModelHandle for OpaqueModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn size_hint(&self) -> u64 {
        self.size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_abstraction::{DType, Tensor};

    fn model() -> TensorModel {
        let mut weights = StateDict::new();
        weights.insert("w".to_string(), Tensor::zeros(&[2, 3], DType::Float32));
        weights.insert("b".to_string(), Tensor::zeros(&[3], DType::Float32));
        TensorModel::new("linear", weights)
    }

    #[test]
    fn test_tensor_model_import_replaces_weights() {
        let mut model = model();
        let mut weights = StateDict::new();
        weights.insert("w".to_string(), Tensor::from_f32(&[2, 3], &[1.0; 6], DType::Float16).unwrap());
        weights.insert("b".to_string(), Tensor::zeros(&[3], DType::Float16));

        model.import_weights(weights).unwrap();
        assert_eq!(model.weights()["w"].dtype(), DType::Float16);
        assert_eq!(model.weights()["w"].to_f32_vec(), vec![1.0; 6]);
        assert_eq!(model.device(), Some(Device::Cpu));
    }

    #[test]
    fn test_tensor_model_import_rejects_mismatch() {
        let mut model = model();

        let mut wrong_shape = model.weights().clone();
        wrong_shape.insert("b".to_string(), Tensor::zeros(&[4], DType::Float32));
        assert!(matches!(model.import_weights(wrong_shape), Err(ModelError::WeightMismatch(_))));

        let mut wrong_name = StateDict::new();
        wrong_name.insert("w".to_string(), Tensor::zeros(&[2, 3], DType::Float32));
        wrong_name.insert("bias".to_string(), Tensor::zeros(&[3], DType::Float32));
        assert!(matches!(model.import_weights(wrong_name), Err(ModelError::WeightMismatch(_))));

        let mut missing = model.weights().clone();
        missing.remove("b");
        assert!(matches!(model.import_weights(missing), Err(ModelError::WeightMismatch(_))));
    }

    #[test]
    fn test_opaque_model_is_not_movable() {
        let model = OpaqueModel::new("scheduler", 42);
        assert!(!model.is_movable());
        assert_eq!(model.size_hint(), 42);
        assert_eq!(model.model_id(), "scheduler");
    }
}
