//! Warden command-line interface.
//!
//! Attribute-based access control from the shell: check policy snapshots,
//! evaluate access requests, inspect configuration.
//!
//! # Quick Start
//!
//! ```bash
//! # Create warden.toml and an empty policies.json
//! warden init ./authz
//!
//! # Validate the snapshot
//! warden check --project ./authz
//!
//! # Decide a request
//! warden evaluate request.json --project ./authz
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::Format;
use commands::evaluate::EvaluateArgs;
use warden_types::PolicyCombiningAlgorithm;

/// Warden - attribute-based access control policy decision engine.
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Disable colored output (also honored via NO_COLOR).
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Initialize a new project directory.
    Init {
        /// Path to the project directory to create.
        path: String,

        /// Use the development configuration (short cache TTL).
        #[arg(long)]
        development: bool,
    },

    /// Validate a policy snapshot.
    Check {
        /// Snapshot file (defaults to store.snapshot_path).
        snapshot: Option<PathBuf>,

        /// Project directory.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Explicit configuration file instead of the layered project config.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Treat dangling rule references as errors.
        #[arg(long)]
        strict: bool,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },

    /// Evaluate access requests against a policy snapshot.
    Evaluate {
        /// Request file: one evaluation context or a JSON array of them.
        request: PathBuf,

        /// Snapshot file (defaults to store.snapshot_path).
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        /// Project directory.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Explicit configuration file instead of the layered project config.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Restrict evaluation to one policy set.
        #[arg(long)]
        set: Option<u64>,

        /// Bypass the decision cache.
        #[arg(long)]
        no_cache: bool,

        /// Override the policy combining algorithm.
        #[arg(short, long, value_parser = parse_algorithm)]
        algorithm: Option<PolicyCombiningAlgorithm>,

        /// Report requests that violate the attribute catalog.
        #[arg(long)]
        check_catalog: bool,

        /// Exit non-zero unless every request is permitted.
        #[arg(long)]
        fail_on_deny: bool,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },

    /// Configuration management.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration.
    Show {
        /// Project directory.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Explicit configuration file instead of the layered project config.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t)]
        format: Format,
    },

    /// Validate configuration files.
    Validate {
        /// Project directory.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Explicit configuration file instead of the layered project config.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn parse_algorithm(s: &str) -> Result<PolicyCombiningAlgorithm, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn main() -> Result<()> {
    // Logs go to stderr so JSON output stays parseable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color || std::env::var_os("NO_COLOR").is_some());

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Init { path, development } => commands::init::run(&path, development),
        Commands::Check {
            snapshot,
            project,
            config,
            strict,
            format,
        } => commands::check::run(&project, config.as_deref(), snapshot, strict, format),
        Commands::Evaluate {
            request,
            snapshot,
            project,
            config,
            set,
            no_cache,
            algorithm,
            check_catalog,
            fail_on_deny,
            format,
        } => commands::evaluate::run(
            &project,
            config.as_deref(),
            &request,
            snapshot,
            &EvaluateArgs {
                set,
                no_cache,
                algorithm,
                check_catalog,
                fail_on_deny,
                format,
            },
        ),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show {
                project,
                config,
                format,
            } => commands::config::show(&project, config.as_deref(), format),
            ConfigCommands::Validate { project, config } => {
                commands::config::validate(&project, config.as_deref())
            }
        },
    }
}
