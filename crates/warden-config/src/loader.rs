//! Layered configuration loading.

use crate::{ConfigLayer, WardenConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variables are read as `WARDEN_<SECTION>__<KEY>`.
const ENV_PREFIX: &str = "WARDEN";

/// Merges built-in defaults, the config file layers and the environment.
pub struct ConfigLoader {
    project_dir: PathBuf,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Loads relative to the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            include_user_config: true,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Skips the user layer, for tests and hermetic runs.
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// Loads, validates and resolves relative paths against the project dir.
    pub fn load(self) -> Result<WardenConfig> {
        let defaults = WardenConfig::default();
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&defaults)?);

        for layer in ConfigLayer::ALL {
            if layer == ConfigLayer::User && !self.include_user_config {
                continue;
            }
            let Some(file) = layer.file(&self.project_dir) else {
                continue;
            };
            if file.exists() {
                builder = builder.add_source(
                    config::File::from(file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // WARDEN_CACHE__TTL_SECS=60
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut warden_config: WardenConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        warden_config
            .validate()
            .context("Configuration failed validation")?;
        warden_config.resolve_paths(&self.project_dir);

        Ok(warden_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
