//! Byte footprint estimation for model handles.

use std::collections::HashSet;
use strata_abstraction::{ModelHandle, StateDict};

/// Total bytes of a state dict, counting shared storage once.
#[must_use]
pub fn state_dict_size(weights: &StateDict) -> u64 {
    let mut seen = HashSet::new();
    weights
        .values()
        .filter(|tensor| seen.insert(tensor.storage_id()))
        .map(|tensor| tensor.nbytes() as u64)
        .sum()
}

/// Estimated footprint of `model`.
///
/// Uses the exported weights when there are any, otherwise the handle's own
/// size hint.
#[must_use]
pub fn estimate_model_size(model: &dyn ModelHandle) -> u64 {
    match model.export_weights() {
        Some(weights) if !weights.is_empty() => state_dict_size(&weights),
        _ => model.size_hint(),
    }
}
