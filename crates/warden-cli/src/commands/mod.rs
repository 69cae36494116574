//! CLI command implementations.

pub mod check;
pub mod config;
pub mod evaluate;
pub mod init;
pub mod version;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use warden_abac::{Change, Engine, PolicySnapshot};
use warden_config::WardenConfig;

/// Output format shared by the reporting commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Json,
    Toml,
}

/// Loads configuration: an explicit file wins, otherwise the layered
/// project configuration rooted at `project`.
pub fn load_config(project: &Path, explicit: Option<&Path>) -> Result<WardenConfig> {
    match explicit {
        Some(path) => {
            let mut config = WardenConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            config.resolve_paths(project);
            Ok(config)
        }
        None => WardenConfig::load_from_dir(project).context("Failed to load configuration"),
    }
}

/// Reads and parses a snapshot file.
pub fn read_snapshot(path: &Path) -> Result<PolicySnapshot> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    PolicySnapshot::from_json(&json)
        .with_context(|| format!("Invalid snapshot {}", path.display()))
}

/// Builds an engine from configuration and loads a snapshot into it.
pub fn load_engine(config: &WardenConfig, snapshot_path: &Path) -> Result<Engine> {
    let snapshot = read_snapshot(snapshot_path)?;
    let engine = Engine::from_config(config);
    engine
        .import(
            snapshot,
            &Change::new(format!("Loaded from {}", snapshot_path.display())),
        )
        .context("Failed to import snapshot")?;
    Ok(engine)
}

/// The snapshot argument if given, otherwise `store.snapshot_path`.
pub fn snapshot_path(config: &WardenConfig, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| config.store.snapshot_path.clone())
}
