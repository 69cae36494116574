//! Check command - validates a policy snapshot file.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::debug;
use warden_abac::PolicySnapshot;
use warden_types::PolicyStatus;

use super::{Format, load_config, read_snapshot, snapshot_path};
use crate::style::{Mark, print_mark, print_policies, print_spacer, print_summary};

/// What `warden check` found in a snapshot.
#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub path: PathBuf,
    pub generation: u64,
    pub attributes: usize,
    pub rules: usize,
    pub policies: usize,
    pub active_policies: usize,
    pub policy_sets: usize,
    /// Rule references that do not resolve; tolerated at evaluation time.
    pub dangling: Vec<String>,
    /// Entities that creation-time validation would reject.
    pub problems: Vec<String>,
}

impl CheckReport {
    pub fn of(path: &Path, snapshot: &PolicySnapshot) -> Self {
        Self {
            path: path.to_path_buf(),
            generation: snapshot.generation,
            attributes: snapshot.catalog.len(),
            rules: snapshot.rules.len(),
            policies: snapshot.policies.len(),
            active_policies: snapshot
                .policies
                .values()
                .filter(|p| p.status == PolicyStatus::Active)
                .count(),
            policy_sets: snapshot.policy_sets.len(),
            dangling: snapshot
                .dangling_rules()
                .into_iter()
                .map(|(policy, rule)| format!("{policy} references missing {rule}"))
                .collect(),
            problems: snapshot.problems(),
        }
    }

    fn passes(&self, strict: bool) -> bool {
        self.problems.is_empty() && (!strict || self.dangling.is_empty())
    }
}

pub fn run(
    project: &str,
    config_file: Option<&Path>,
    snapshot: Option<PathBuf>,
    strict: bool,
    format: Format,
) -> Result<()> {
    let config = load_config(Path::new(project), config_file)?;
    let path = snapshot_path(&config, snapshot);
    debug!(path = %path.display(), "checking snapshot");

    let snapshot = read_snapshot(&path)?;
    let report = CheckReport::of(&path, &snapshot);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Toml => println!("{}", toml::to_string_pretty(&report)?),
        Format::Text => print_text(&report, &snapshot),
    }

    if !report.passes(strict) {
        anyhow::bail!(
            "{} problem(s), {} dangling reference(s) in {}",
            report.problems.len(),
            report.dangling.len(),
            path.display()
        );
    }
    Ok(())
}

fn print_text(report: &CheckReport, snapshot: &PolicySnapshot) {
    print_summary(&[
        ("Snapshot", report.path.display().to_string()),
        ("Generation", report.generation.to_string()),
        ("Attributes", report.attributes.to_string()),
        ("Rules", report.rules.to_string()),
        (
            "Policies",
            format!("{} ({} active)", report.policies, report.active_policies),
        ),
        ("Policy sets", report.policy_sets.to_string()),
    ]);
    print_spacer();

    print_policies(&snapshot.policies.values().collect::<Vec<_>>());
    print_spacer();

    for dangling in &report.dangling {
        print_mark(Mark::Notice, dangling);
    }
    for problem in &report.problems {
        print_mark(Mark::Problem, problem);
    }
    if report.problems.is_empty() && report.dangling.is_empty() {
        print_mark(Mark::Ok, "Snapshot is consistent");
    }
}
