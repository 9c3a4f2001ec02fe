//! Effective cache configuration command.

use anyhow::{Context, Result};
use std::path::Path;
use strata_models::{CacheConfig, load_cache_config};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "strata.toml";

/// Execute the config command.
pub fn execute(config_path: Option<&Path>, json: bool) -> Result<()> {
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let config = load_cache_config(path).with_context(|| format!("Failed to load {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", render_toml(&config)?);
    }
    Ok(())
}

/// Renders `config` as the `[model_cache]` table it is loaded from.
fn render_toml(config: &CacheConfig) -> Result<String> {
    let mut table = toml::Table::new();
    table.insert("model_cache".to_string(), toml::Value::try_from(config)?);
    Ok(toml::to_string_pretty(&table)?)
}
