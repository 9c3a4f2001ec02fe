//! Integration tests for execution pool placement and offloading.

use std::sync::Arc;
use strata_abstraction::{DType, Device, DeviceMemory, StateDict, Tensor};
use strata_models::{CacheConfig, CacheError, CacheKey, CapacityPolicy, ModelCache, Pool, TensorModel};

fn config(max_vram_cache_bytes: u64) -> CacheConfig {
    CacheConfig { max_vram_cache_bytes, precision: DType::Float32, ..CacheConfig::default() }
}

/// A single-tensor f32 model of `len` elements (4 bytes each).
fn model(name: &str, len: usize) -> TensorModel {
    #[allow(clippy::cast_precision_loss)]
    let values: Vec<f32> = (0..len).map(|i| i as f32 * 0.5 - 1.25).collect();
    let mut weights = StateDict::new();
    weights.insert("weight".to_string(), Tensor::from_f32(&[len], &values, DType::Float32).unwrap());
    TensorModel::new(name, weights)
}

fn put(cache: &ModelCache, name: &str, len: usize) -> CacheKey {
    let key = CacheKey::new(name);
    cache.put(key.clone(), Box::new(model(name, len))).unwrap();
    key
}

fn run_on_device(cache: &ModelCache, key: &CacheKey) {
    let mut locker = cache.get(key).unwrap();
    locker.model_on_device().unwrap();
}

fn pool(cache: &ModelCache, name: &str) -> Pool {
    cache.entries().into_iter().find(|entry| entry.key == name).map(|entry| entry.pool).unwrap()
}

#[test]
fn test_round_trip_preserves_weights() {
    let cache = ModelCache::new(config(1024)).unwrap();
    let key = put(&cache, "unet", 16);
    let original = model("unet", 16).weights()["weight"].to_f32_vec();

    let mut locker = cache.get(&key).unwrap();
    let live = locker.model_on_device().unwrap();
    assert_eq!(live.device(), Some(Device::Cuda(0)));
    drop(live);
    assert_eq!(locker.pool(), Some(Pool::Execution));
    assert_eq!(cache.execution_bytes(), 64);
    drop(locker);

    // Lazy offloading keeps the model resident after use.
    assert_eq!(pool(&cache, "unet"), Pool::Execution);

    cache.set_max_vram_cache_bytes(0);
    cache.offload_unlocked(0).unwrap();

    assert_eq!(pool(&cache, "unet"), Pool::Bulk);
    assert_eq!(cache.execution_bytes(), 0);
    let locker = cache.get(&key).unwrap();
    let restored = locker.model().export_weights().unwrap();
    assert_eq!(restored["weight"].device(), Device::Cpu);
    assert_eq!(restored["weight"].to_f32_vec(), original);
}

#[test]
fn test_execution_copy_is_precision_cast() {
    let config = CacheConfig { precision: DType::BFloat16, ..config(1024) };
    let cache = ModelCache::new(config).unwrap();
    let key = put(&cache, "vae", 8);

    let mut locker = cache.get(&key).unwrap();
    let weights = locker.model_on_device().unwrap().export_weights().unwrap();
    assert_eq!(weights["weight"].dtype(), DType::BFloat16);
    assert_eq!(cache.execution_bytes(), 16);

    // Values on the grid used by `model` are exact in bfloat16.
    assert_eq!(weights["weight"].to_f32_vec(), model("vae", 8).weights()["weight"].to_f32_vec());

    let snapshot = locker.state_dict().unwrap();
    assert_eq!(snapshot["weight"].dtype(), DType::Float32);
}

#[test]
fn test_non_lazy_mode_returns_model_after_use() {
    let config = CacheConfig { lazy_offloading: false, ..config(1024) };
    let cache = ModelCache::new(config).unwrap();
    let key = put(&cache, "text_encoder", 8);

    let mut first = cache.get(&key).unwrap();
    let second = cache.get(&key).unwrap();
    first.model_on_device().unwrap();
    drop(first);
    assert_eq!(pool(&cache, "text_encoder"), Pool::Execution);

    drop(second);
    assert_eq!(pool(&cache, "text_encoder"), Pool::Bulk);
    assert_eq!(cache.execution_bytes(), 0);
}

#[test]
fn test_offload_smallest_first() {
    let cache = ModelCache::new(config(64)).unwrap();
    let a = put(&cache, "a", 8);
    let b = put(&cache, "b", 4);
    let c = put(&cache, "c", 2);
    let d = put(&cache, "d", 8);

    run_on_device(&cache, &a);
    run_on_device(&cache, &b);
    run_on_device(&cache, &c);
    assert_eq!(cache.execution_bytes(), 56);

    run_on_device(&cache, &d);

    assert_eq!(pool(&cache, "a"), Pool::Execution);
    assert_eq!(pool(&cache, "b"), Pool::Bulk);
    assert_eq!(pool(&cache, "c"), Pool::Bulk);
    assert_eq!(pool(&cache, "d"), Pool::Execution);
    assert_eq!(cache.execution_bytes(), 64);
}

#[test]
fn test_pinned_model_is_never_offloaded() {
    let cache = ModelCache::new(config(1024)).unwrap();
    let key = put(&cache, "unet", 16);
    let mut locker = cache.get(&key).unwrap();
    locker.model_on_device().unwrap();

    cache.set_max_vram_cache_bytes(0);
    cache.offload_unlocked(0).unwrap();

    assert_eq!(locker.pool(), Some(Pool::Execution));
    assert_eq!(cache.execution_bytes(), 64);
}

#[test]
fn test_hard_policy_fails_when_execution_pool_is_pinned_full() {
    let config = CacheConfig { capacity_policy: CapacityPolicy::Hard, ..config(64) };
    let cache = ModelCache::new(config).unwrap();
    let busy = put(&cache, "busy", 12);
    let next = put(&cache, "next", 8);

    let mut held = cache.get(&busy).unwrap();
    held.model_on_device().unwrap();

    let mut waiting = cache.get(&next).unwrap();
    let err = waiting.model_on_device().unwrap_err();
    assert!(matches!(
        err,
        CacheError::CapacityExceeded { pool: Pool::Execution, requested: 32, in_use: 48, ceiling: 64 }
    ));
    assert_eq!(waiting.pool(), Some(Pool::Bulk));
}

#[test]
fn test_out_of_memory_removes_entry() {
    let memory = DeviceMemory::with_capacity(Device::Cuda(0), 16);
    let cache = ModelCache::with_device_memory(config(1024), Arc::clone(&memory)).unwrap();
    let key = put(&cache, "huge", 8);

    let mut locker = cache.get(&key).unwrap();
    let err = locker.model_on_device().unwrap_err();

    assert!(matches!(err, CacheError::Transfer { from: Pool::Bulk, to: Pool::Execution, .. }));
    assert!(!cache.exists(&key));
    assert_eq!(locker.pool(), None);
    assert_eq!(memory.allocated(), 0);

    drop(locker);
    cache.put(key.clone(), Box::new(model("huge", 2))).unwrap();
    assert!(cache.exists(&key));
}

#[test]
fn test_reinserted_entry_is_independent_of_stale_locker() {
    let memory = DeviceMemory::with_capacity(Device::Cuda(0), 16);
    let config = CacheConfig { max_cache_bytes: 64, lazy_offloading: false, ..config(1024) };
    let cache = ModelCache::with_device_memory(config, memory).unwrap();
    let key = put(&cache, "unet", 8);

    let mut stale = cache.get(&key).unwrap();
    assert!(matches!(stale.model_on_device(), Err(CacheError::Transfer { .. })));
    assert!(!cache.exists(&key));

    // The retry inserts a fresh entry that nobody has pinned.
    put(&cache, "unet", 2);
    assert!(!cache.is_locked(&key));
    assert_eq!(cache.entries()[0].locks, 0);
    assert_eq!(stale.pool(), None);

    cache.make_room(Pool::Bulk, 64).unwrap();
    assert!(!cache.exists(&key));

    put(&cache, "unet", 2);
    let mut fresh = cache.get(&key).unwrap();
    fresh.model_on_device().unwrap();

    drop(stale);
    assert_eq!(fresh.pool(), Some(Pool::Execution));
    assert!(cache.is_locked(&key));

    drop(fresh);
    assert_eq!(pool(&cache, "unet"), Pool::Bulk);
    assert!(!cache.is_locked(&key));
}

#[test]
fn test_guard_reflects_current_placement() {
    let cache = ModelCache::new(config(1024)).unwrap();
    let key = put(&cache, "unet", 4);

    let mut locker = cache.get(&key).unwrap();
    assert_eq!(locker.model().device(), Some(Device::Cpu));
    assert_eq!(locker.model_on_device().unwrap().device(), Some(Device::Cuda(0)));
    assert_eq!(locker.model().model_id(), "unet");
    drop(locker);

    cache.set_max_vram_cache_bytes(0);
    cache.offload_unlocked(0).unwrap();

    let locker = cache.get(&key).unwrap();
    assert_eq!(locker.model().device(), Some(Device::Cpu));
}

#[test]
fn test_same_device_placement_is_noop() {
    let config = CacheConfig { execution_device: Device::Cpu, ..config(1024) };
    let cache = ModelCache::new(config).unwrap();
    let key = put(&cache, "cpu-only", 4);

    let mut locker = cache.get(&key).unwrap();
    locker.model_on_device().unwrap();

    assert_eq!(locker.pool(), Some(Pool::Bulk));
    assert_eq!(cache.execution_bytes(), 0);
}

#[test]
fn test_memory_snapshot_reports_both_pools() {
    let cache = ModelCache::new(config(1024)).unwrap();
    let key = put(&cache, "m", 4);
    run_on_device(&cache, &key);

    let snapshot = cache.memory_snapshot();
    assert_eq!(snapshot.bulk_bytes, 16);
    assert_eq!(snapshot.execution_bytes, 16);
    assert_eq!(snapshot.execution_peak, 16);
    cache.log_memory_stats();
}
