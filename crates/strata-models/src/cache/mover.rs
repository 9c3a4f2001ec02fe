//! Weight transfer between the bulk and execution pools.

use std::collections::HashMap;
use std::sync::Arc;
use strata_abstraction::{DType, DeviceMemory, ModelError, StateDict, Tensor};
use tracing::{debug, error, warn};

use super::cache::CacheState;
use super::config::{CacheConfig, MIB};
use super::error::{CacheError, CacheResult};
use super::stats::MemorySnapshot;
use super::types::{CacheKey, EntryId, Pool, SharedModel};

/// Absolute slack allowed between estimated and observed transfer sizes.
const TRANSFER_TOLERANCE_BYTES: u64 = 10 * MIB;

/// Moves an entry's live weights between pools.
///
/// A transfer runs in three steps. [`DeviceMover::begin`] claims the entry
/// under the cache lock, [`DeviceMover::run`] copies weights with the lock
/// released, and [`DeviceMover::finish`] commits the new pool under the lock
/// again. The model's own lock is taken only by `run`, and only to install
/// the new weights, so the cache lock is never held while waiting for it.
///
/// Moving to execution copies the retained bulk snapshot into execution
/// device memory; moving back re-installs the snapshot, dropping the device
/// copies. A failed transfer removes the entry from the cache.
pub(crate) struct DeviceMover<'a> {
    execution_memory: &'a Arc<DeviceMemory>,
    precision: DType,
    distinct_devices: bool,
    log_memory_usage: bool,
}

/// A transfer claimed by [`DeviceMover::begin`].
#[derive(Debug)]
pub(crate) struct Transfer {
    key: CacheKey,
    id: EntryId,
    model: SharedModel,
    snapshot: Option<StateDict>,
    source: Pool,
    target: Pool,
    size: u64,
    before: MemorySnapshot,
}

impl<'a> DeviceMover<'a> {
    pub(crate) fn new(config: &CacheConfig, execution_memory: &'a Arc<DeviceMemory>) -> Self {
        Self {
            execution_memory,
            precision: config.precision,
            distinct_devices: config.has_distinct_execution_device(),
            log_memory_usage: config.log_memory_usage,
        }
    }

    /// Claims entry `id` under `key` for a move to `target`.
    ///
    /// Returns `None` when there is nothing to do: the entry is already in
    /// `target`, another transfer owns it, it is pinned and `target` is bulk,
    /// or its weights cannot be relocated.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the entry no longer exists.
    pub(crate) fn begin(
        &self,
        state: &mut CacheState,
        key: &CacheKey,
        id: EntryId,
        target: Pool,
    ) -> CacheResult<Option<Transfer>> {
        let bulk_bytes = state.ledger.total_bytes();
        let locked = state.pins.is_locked(id);
        let Some(entry) = state.ledger.get_current_mut(key, id) else {
            return Err(CacheError::NotFound { key: key.to_string() });
        };

        if entry.pool == target || entry.transfer.is_some() {
            return Ok(None);
        }
        if target == Pool::Bulk && locked {
            debug!(key = %key, "Not offloading pinned model");
            return Ok(None);
        }
        if !entry.movable || !self.distinct_devices {
            debug!(key = %key, target = %target, "Model weights are not relocatable, leaving in place");
            return Ok(None);
        }

        entry.transfer = Some(target);
        Ok(Some(Transfer {
            key: key.clone(),
            id,
            model: Arc::clone(&entry.model),
            snapshot: entry.state_dict.clone(),
            source: entry.pool,
            target,
            size: entry.size,
            before: MemorySnapshot::capture(bulk_bytes, self.execution_memory),
        }))
    }

    /// Copies the weights and installs them into the handle.
    ///
    /// Must be called without the cache lock held.
    pub(crate) fn run(&self, transfer: &Transfer) -> Result<(), ModelError> {
        let Some(snapshot) = transfer.snapshot.as_ref() else {
            return Err(ModelError::Other(format!("no bulk copy retained for '{}'", transfer.key)));
        };

        let weights = match transfer.target {
            Pool::Bulk => snapshot.clone(),
            Pool::Execution => self.copy_to_execution(snapshot)?,
        };
        transfer.model.write().import_weights(weights)
    }

    /// Commits the outcome of [`DeviceMover::run`].
    ///
    /// # Errors
    /// Returns `CacheError::Transfer` if the copy failed, in which case the
    /// entry has been deleted.
    pub(crate) fn finish(
        &self,
        state: &mut CacheState,
        transfer: Transfer,
        outcome: Result<(), ModelError>,
    ) -> CacheResult<()> {
        let Transfer { key, id, source, target, size, before, .. } = transfer;

        match outcome {
            Ok(()) => {
                if let Some(entry) = state.ledger.get_current_mut(&key, id) {
                    entry.pool = target;
                    entry.transfer = None;
                }
                let after = MemorySnapshot::capture(state.ledger.total_bytes(), self.execution_memory);
                self.check_footprint(&key, size, source, target, &before, &after);
                Ok(())
            }
            Err(err) => {
                error!(key = %key, from = %source, to = %target, error = %err, "Model transfer failed, removing from cache");
                if state.ledger.get_current(&key, id).is_some() {
                    state.delete(&key);
                }
                Err(CacheError::Transfer { key: key.to_string(), from: source, to: target, reason: err.to_string() })
            }
        }
    }

    /// Copies every tensor of `snapshot` into execution memory at the configured precision.
    ///
    /// Tensors sharing storage in the snapshot share one device copy.
    fn copy_to_execution(&self, snapshot: &StateDict) -> Result<StateDict, ModelError> {
        let mut copies: HashMap<usize, Tensor> = HashMap::new();
        let mut weights = StateDict::new();
        for (name, tensor) in snapshot {
            let copy = match copies.get(&tensor.storage_id()) {
                Some(copy) => copy.clone(),
                None => {
                    let copy = self.execution_memory.copy_in(tensor, self.precision)?;
                    copies.insert(tensor.storage_id(), copy.clone());
                    copy
                }
            };
            weights.insert(name.clone(), copy);
        }
        Ok(weights)
    }

    fn check_footprint(
        &self,
        key: &CacheKey,
        estimated: u64,
        source: Pool,
        target: Pool,
        before: &MemorySnapshot,
        after: &MemorySnapshot,
    ) {
        let actual = before.execution_bytes.abs_diff(after.execution_bytes);
        debug!(key = %key, from = %source, to = %target, estimated, actual, "Moved model");

        if !within_tolerance(estimated, actual) {
            warn!(
                key = %key,
                from = %source,
                to = %target,
                estimated,
                actual,
                "Observed execution memory change does not match the estimated model size"
            );
        }

        if self.log_memory_usage {
            debug!(key = %key, before = %before, after = %after, "Memory usage around transfer");
        }
    }
}

/// Accepts differences up to 10% of the larger figure or 10 MiB, whichever is bigger.
fn within_tolerance(estimated: u64, actual: u64) -> bool {
    let slack = (estimated.max(actual) / 10).max(TRANSFER_TOLERANCE_BYTES);
    estimated.abs_diff(actual) <= slack
}
