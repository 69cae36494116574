//! Where warden looks for configuration files.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Git-tracked project configuration.
pub const PROJECT_CONFIG_FILE: &str = "warden.toml";

/// Untracked per-checkout overrides.
pub const LOCAL_CONFIG_FILE: &str = "warden.local.toml";

/// A configuration file layer. Layers are listed lowest precedence first;
/// environment variables sit above all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// `config.toml` in the platform config directory for warden.
    User,
    Project,
    Local,
}

impl ConfigLayer {
    pub const ALL: [Self; 3] = [Self::User, Self::Project, Self::Local];

    /// The file backing this layer. `None` for the user layer when the
    /// platform has no home directory.
    pub fn file(self, project_dir: &Path) -> Option<PathBuf> {
        match self {
            Self::User => ProjectDirs::from("dev", "Warden", "warden")
                .map(|dirs| dirs.config_dir().join("config.toml")),
            Self::Project => Some(project_dir.join(PROJECT_CONFIG_FILE)),
            Self::Local => Some(project_dir.join(LOCAL_CONFIG_FILE)),
        }
    }
}

/// Whether `project_dir` already has a `warden.toml`.
pub fn is_initialized(project_dir: impl AsRef<Path>) -> bool {
    project_dir.as_ref().join(PROJECT_CONFIG_FILE).exists()
}
