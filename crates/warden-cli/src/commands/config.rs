//! Configuration management commands.

use std::path::Path;

use anyhow::Result;
use warden_config::WardenConfig;

use super::{Format, load_config};
use crate::style::{Mark, print_header, print_labeled, print_mark, print_spacer};

/// Show the effective configuration.
pub fn show(project: &str, config_file: Option<&Path>, format: Format) -> Result<()> {
    let config = load_config(Path::new(project), config_file)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        Format::Toml => println!("{}", toml::to_string_pretty(&config)?),
        Format::Text => print_text(&config),
    }

    Ok(())
}

fn print_text(config: &WardenConfig) {
    print_header("Warden Configuration");
    print_spacer();

    println!("Engine:");
    print_labeled(
        "Policy combining algorithm",
        &config.engine.policy_combining_algorithm.to_string(),
    );
    print_labeled("Default actor", &config.engine.default_actor);
    print_spacer();

    println!("Cache:");
    print_labeled("Enabled", &config.cache.enabled.to_string());
    print_labeled("TTL (seconds)", &config.cache.ttl_secs.to_string());
    print_labeled("Max entries", &config.cache.max_entries.to_string());
    print_labeled("Key request time", &config.cache.key_request_time.to_string());
    print_spacer();

    println!("Audit:");
    print_labeled("Log decisions", &config.audit.log_decisions.to_string());
    print_spacer();

    println!("Store:");
    print_labeled("Snapshot", &config.store.snapshot_path.display().to_string());
}

/// Validate configuration files.
pub fn validate(project: &str, config_file: Option<&Path>) -> Result<()> {
    let project_path = Path::new(project);

    println!("Validating configuration in {}...", project_path.display());

    let loaded = load_config(project_path, config_file).and_then(|config| {
        config.validate()?;
        Ok(config)
    });
    match loaded {
        Ok(_) => {
            print_mark(Mark::Ok, "Configuration is valid");
            Ok(())
        }
        Err(e) => {
            print_mark(Mark::Problem, &format!("Configuration validation failed: {e:#}"));
            Err(e)
        }
    }
}
