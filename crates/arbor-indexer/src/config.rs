//! Loading `arbor.toml`

use anyhow::{Context, Result};
use arbor_core::config::{IndexerConfig, ModelConfig};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

pub const CONFIG_FILE: &str = "arbor.toml";

/// Read `arbor.toml` from `root`, or the defaults if there is none.
pub fn load_config(root: &Path) -> Result<ModelConfig> {
    let path = root.join(CONFIG_FILE);
    if !path.is_file() {
        tracing::debug!("No {} in {:?}, using defaults", CONFIG_FILE, root);
        return Ok(ModelConfig::default());
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
    let config: ModelConfig = toml::from_str(&text).with_context(|| format!("Invalid config in {:?}", path))?;
    tracing::info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Compile the exclude patterns of `config`.
pub fn build_excludes(config: &IndexerConfig) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in &config.exclude {
        let glob = Glob::new(pattern).with_context(|| format!("Invalid exclude pattern {:?}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
