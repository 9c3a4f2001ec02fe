//! Workload simulation command.
//!
//! Replays a scripted workload against a fresh cache and reports what ended
//! up where.

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use strata_abstraction::DeviceMemory;
use strata_models::{
    CacheKey, CacheStats, CacheStatsSummary, EntryInfo, Locker, MemorySnapshot, ModelCache, ModelLoader,
    load_cache_config,
};
use tabled::{Table, Tabled, settings::Style};
use tracing::{debug, warn};

use crate::workload::{Step, Workload, WorkloadLoader, load_workload, parse_key};

/// Outcome of one replayed step.
#[derive(Debug, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub step: String,
    /// Error message when the step failed.
    pub error: Option<String>,
}

/// Everything the simulation reports.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub steps: Vec<StepOutcome>,
    /// Resident entries at the end of the workload, least-recently-used first.
    pub entries: Vec<EntryInfo>,
    pub stats: Option<CacheStatsSummary>,
    pub memory: MemorySnapshot,
}

/// Execute the simulate command.
///
/// The cache configuration comes from `config_path` when given, otherwise from
/// the workload file's own `[model_cache]` table.
pub fn execute(workload_path: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    let workload = load_workload(workload_path)?;
    let config = load_cache_config(config_path.unwrap_or(workload_path)).context("Failed to load cache configuration")?;

    let cache = match workload.device.capacity_bytes {
        Some(capacity) => {
            let memory = DeviceMemory::with_capacity(config.execution_device, capacity);
            ModelCache::with_device_memory(config, memory)?
        }
        None => ModelCache::new(config)?,
    };
    cache.attach_stats(CacheStats::default());

    let report = run(&cache, &workload)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Replays every step of `workload`. Failing steps are recorded, not fatal.
pub fn run(cache: &ModelCache, workload: &Workload) -> Result<SimulationReport> {
    let loader = WorkloadLoader::new(&workload.models)?;
    let mut pinned: HashMap<CacheKey, Vec<Locker>> = HashMap::new();
    let mut steps = Vec::with_capacity(workload.steps.len());

    for (index, step) in workload.steps.iter().enumerate() {
        let result = apply(cache, &loader, &mut pinned, step);
        match &result {
            Ok(()) => debug!(step = index + 1, op = %step, "Workload step completed"),
            Err(err) => warn!(step = index + 1, op = %step, error = %err, "Workload step failed"),
        }
        steps.push(StepOutcome { index: index + 1, step: step.to_string(), error: result.err().map(|err| err.to_string()) });
    }

    cache.log_memory_stats();
    let report = SimulationReport {
        steps,
        entries: cache.entries(),
        stats: cache.stats().as_ref().map(CacheStatsSummary::from),
        memory: cache.memory_snapshot(),
    };

    // Pins left open by the workload end with it.
    drop(pinned);
    Ok(report)
}

fn apply(
    cache: &ModelCache,
    loader: &WorkloadLoader<'_>,
    pinned: &mut HashMap<CacheKey, Vec<Locker>>,
    step: &Step,
) -> Result<()> {
    match step {
        Step::Load { model } => {
            let key = parse_key(model)?;
            let loaded = loader.load(&key)?;
            match loaded.size_hint {
                Some(size) => cache.put_sized(key, loaded.handle, size)?,
                None => cache.put(key, loaded.handle)?,
            }
        }
        Step::Use { model } => {
            let key = parse_key(model)?;
            let mut locker = cache.get_or_load(&key, loader)?;
            locker.model_on_device()?;
        }
        Step::Pin { model } => {
            let key = parse_key(model)?;
            let locker = cache.get_or_load(&key, loader)?;
            pinned.entry(key).or_default().push(locker);
        }
        Step::Unpin { model } => {
            let key = parse_key(model)?;
            let Some(locker) = pinned.get_mut(&key).and_then(Vec::pop) else {
                bail!("'{model}' is not pinned");
            };
            locker.release();
        }
        Step::Offload { bytes } => cache.offload_unlocked(*bytes)?,
        Step::MakeRoom { pool, bytes } => cache.make_room(*pool, *bytes)?,
    }
    Ok(())
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Pool")]
    pool: String,
    #[tabled(rename = "Size (bytes)")]
    size: u64,
    #[tabled(rename = "Locks")]
    locks: usize,
}

fn print_report(report: &SimulationReport) {
    let failed = report.steps.iter().filter(|step| step.error.is_some()).count();
    println!("{}", format!("Simulated {} steps", report.steps.len()).bold().green());
    if failed > 0 {
        println!("{}", format!("{failed} steps failed").yellow());
    }
    println!();

    for step in &report.steps {
        match &step.error {
            None => println!("  {:>3}. {} {}", step.index, step.step, "ok".green()),
            Some(error) => println!("  {:>3}. {} {}", step.index, step.step, error.red()),
        }
    }
    println!();

    if report.entries.is_empty() {
        println!("{}", "Cache is empty.".yellow());
    } else {
        let rows: Vec<EntryRow> = report
            .entries
            .iter()
            .map(|entry| EntryRow {
                key: entry.key.clone(),
                pool: entry.pool.to_string(),
                size: entry.size,
                locks: entry.locks,
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
    println!();

    if let Some(stats) = &report.stats {
        print!("{stats}");
    }
    println!("Memory: {}", report.memory);
}
