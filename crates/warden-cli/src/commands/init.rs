//! Initialize command - creates a new Warden project.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use warden_abac::PolicySnapshot;
use warden_config::{PROJECT_CONFIG_FILE, WardenConfig, is_initialized};

use crate::style::{Mark, print_labeled, print_mark, print_spacer};

pub fn run(path: &str, development: bool) -> Result<()> {
    let project_dir = Path::new(path);

    if is_initialized(project_dir) {
        anyhow::bail!(
            "Project already initialized in {}. warden.toml already exists.",
            project_dir.display()
        );
    }

    fs::create_dir_all(project_dir).context("Failed to create project directory")?;

    let config = if development {
        WardenConfig::development()
    } else {
        WardenConfig::default()
    };
    let config_path = project_dir.join(PROJECT_CONFIG_FILE);
    let config_content =
        toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
    fs::write(&config_path, config_content).context("Failed to write warden.toml")?;
    print_mark(Mark::Ok, "Wrote warden.toml");

    let snapshot_path = project_dir.join(&config.store.snapshot_path);
    if snapshot_path.exists() {
        print_labeled("Kept existing snapshot", &snapshot_path.display().to_string());
    } else {
        let json = PolicySnapshot::default().to_json()?;
        fs::write(&snapshot_path, json)
            .with_context(|| format!("Failed to write {}", snapshot_path.display()))?;
        print_mark(Mark::Ok, &format!("Created {}", config.store.snapshot_path.display()));
    }

    let gitignore_path = project_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(&gitignore_path, "# Local config overrides\nwarden.local.toml\n")
            .context("Failed to write .gitignore")?;
        print_mark(Mark::Ok, "Created .gitignore");
    }

    print_spacer();
    print_labeled("Project", &project_dir.display().to_string());
    print_labeled("Next", "warden check");
    Ok(())
}
