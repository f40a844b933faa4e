//! Configuration file loading (YAML / TOML / JSON, chosen by extension)

use anyhow::{Context, Result};
use config::{Config, File};
use std::path::Path;

use shellexec_core::domain::ShellExecConfig;

/// Read the stage configuration
///
/// Only the file shape is checked here; missing commands are reported by
/// `StageRunner::prepare` before anything is spawned.
pub fn load(path: &Path) -> Result<ShellExecConfig> {
    let settings = Config::builder()
        .add_source(File::from(path))
        .build()
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    settings
        .try_deserialize::<ShellExecConfig>()
        .with_context(|| format!("Invalid config file {}", path.display()))
}
