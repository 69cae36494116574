//! Configuration management for Warden
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (WARDEN_* prefix, `__` between section and key)
//! 2. warden.local.toml (gitignored, local overrides)
//! 3. warden.toml (git-tracked, project config)
//! 4. ~/.config/warden/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_types::PolicyCombiningAlgorithm;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{ConfigLayer, LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE, is_initialized};

/// Main Warden configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub audit: AuditConfig,
    pub store: StoreConfig,
}

/// Decision procedure settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Policy-level combining algorithm used when a request does not override it.
    pub policy_combining_algorithm: PolicyCombiningAlgorithm,
    /// Principal recorded on policy versions when the caller does not name one.
    pub default_actor: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy_combining_algorithm: PolicyCombiningAlgorithm::DenyOverrides,
            default_actor: "system".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry lifetime in seconds, measured from the write.
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Fold the request time into the cache key. Environment attributes are
    /// always part of it.
    pub key_request_time: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 10_000,
            key_request_time: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit a tracing event for every recorded decision.
    pub log_decisions: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_decisions: true,
        }
    }
}

/// Location of the serialized policy snapshot used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub snapshot_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("policies.json"),
        }
    }
}

impl WardenConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Load a single TOML file without layering (used for explicit `--config` paths)
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create a development configuration: short-lived cache, verbose audit
    pub fn development() -> Self {
        Self {
            cache: CacheConfig {
                ttl_secs: 5,
                ..Default::default()
            },
            audit: AuditConfig {
                log_decisions: true,
            },
            ..Default::default()
        }
    }

    /// Create a production configuration
    pub fn production() -> Self {
        Self {
            cache: CacheConfig {
                max_entries: 100_000,
                ..Default::default()
            },
            audit: AuditConfig {
                log_decisions: false,
            },
            ..Default::default()
        }
    }

    /// Check invariants the type system cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "cache.ttl_secs",
                "must be greater than zero when the cache is enabled",
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::invalid(
                "cache.max_entries",
                "must be greater than zero when the cache is enabled",
            ));
        }
        if self.engine.default_actor.trim().is_empty() {
            return Err(ConfigError::invalid(
                "engine.default_actor",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.store.snapshot_path.is_relative() {
            self.store.snapshot_path = base.join(&self.store.snapshot_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WardenConfig::default();
        assert_eq!(
            config.engine.policy_combining_algorithm,
            PolicyCombiningAlgorithm::DenyOverrides
        );
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert!(!config.cache.key_request_time);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = WardenConfig::development();
        assert_eq!(config.cache.ttl_secs, 5);
        assert!(config.audit.log_decisions);
    }

    #[test]
    fn test_production_config() {
        let config = WardenConfig::production();
        assert_eq!(config.cache.max_entries, 100_000);
        assert!(!config.audit.log_decisions);
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let mut config = WardenConfig::default();
        config.cache.ttl_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "cache.ttl_secs",
                ..
            })
        ));

        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[cache]\nenabled = false\n").expect("Failed to write config");

        let config = WardenConfig::from_toml_file(&path).expect("Failed to load config");
        assert!(!config.cache.enabled);

        let missing = WardenConfig::from_toml_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        std::fs::write(&path, "[cache\n").expect("Failed to write config");
        let broken = WardenConfig::from_toml_file(&path);
        assert!(matches!(broken, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_path_resolution() {
        let mut config = WardenConfig::default();
        config.resolve_paths("/srv/warden");

        assert_eq!(
            config.store.snapshot_path,
            PathBuf::from("/srv/warden/policies.json")
        );
    }
}
