//! Evaluate command - decides access requests against a snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use warden_abac::{EvaluateOptions, EvaluationContext, EvaluationResult};
use warden_types::{PolicyCombiningAlgorithm, PolicySetId};

use super::{Format, load_config, load_engine, snapshot_path};
use crate::style::colors::SemanticStyle;
use crate::style::{Mark, print_decision, print_labeled, print_mark, print_spacer};

/// A request file holds one context or a list evaluated in order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RequestFile {
    One(EvaluationContext),
    Many(Vec<EvaluationContext>),
}

impl RequestFile {
    fn into_contexts(self) -> Vec<EvaluationContext> {
        match self {
            Self::One(context) => vec![context],
            Self::Many(contexts) => contexts,
        }
    }
}

/// TOML documents need a table at the root.
#[derive(Serialize)]
struct TomlResults<'a> {
    results: &'a [EvaluationResult],
}

/// Flags of `warden evaluate` beyond file locations.
#[derive(Debug, Default)]
pub struct EvaluateArgs {
    pub set: Option<u64>,
    pub no_cache: bool,
    pub algorithm: Option<PolicyCombiningAlgorithm>,
    pub check_catalog: bool,
    pub fail_on_deny: bool,
    pub format: Format,
}

pub fn run(
    project: &str,
    config_file: Option<&Path>,
    request: &Path,
    snapshot: Option<PathBuf>,
    args: &EvaluateArgs,
) -> Result<()> {
    let config = load_config(Path::new(project), config_file)?;
    let engine = load_engine(&config, &snapshot_path(&config, snapshot))?;

    let contents = fs::read_to_string(request)
        .with_context(|| format!("Failed to read request {}", request.display()))?;
    let contexts = serde_json::from_str::<RequestFile>(&contents)
        .with_context(|| format!("Invalid request {}", request.display()))?
        .into_contexts();

    let mut options = EvaluateOptions::default();
    if args.no_cache {
        options = options.without_cache();
    }
    if let Some(algorithm) = args.algorithm {
        options = options.with_algorithm(algorithm);
    }

    let mut results = Vec::with_capacity(contexts.len());
    for context in &contexts {
        if args.check_catalog {
            for violation in engine.validate_context(context)? {
                print_mark(Mark::Notice, &violation.to_string());
            }
        }
        let result = match args.set {
            Some(set) => engine.evaluate_in_set(PolicySetId::new(set), context, &options),
            None => engine.evaluate_with(context, &options),
        };
        results.push(result);
    }

    let stats = engine.cache_stats()?;
    info!(
        requests = results.len(),
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "evaluation finished"
    );

    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        Format::Toml => println!("{}", toml::to_string_pretty(&TomlResults { results: &results })?),
        Format::Text => {
            for (i, result) in results.iter().enumerate() {
                if i > 0 {
                    print_spacer();
                }
                print_text(result);
            }
        }
    }

    if args.fail_on_deny {
        let refused = results.iter().filter(|r| !r.is_permit()).count();
        if refused > 0 {
            anyhow::bail!("{refused} of {} request(s) not permitted", results.len());
        }
    }
    Ok(())
}

fn print_text(result: &EvaluationResult) {
    print_decision(result.decision);
    print_labeled("Reason", &result.reason);
    if let Some(policy) = result.policy_id {
        print_labeled("Policy", &policy.to_string());
    }
    if let Some(rule) = result.rule_id {
        print_labeled("Rule", &rule.to_string());
    }
    if !result.obligations.is_empty() {
        print_labeled("Obligations", &result.obligations.join(", "));
    }
    print_labeled(
        "Evaluated",
        &format!(
            "{} policies, {} rules in {}µs{}",
            result.policies_evaluated,
            result.rules_evaluated,
            result.elapsed_micros,
            if result.cached { " (cached)" } else { "" }
        ),
    );
    if let Some(audit_id) = result.audit_id {
        print_labeled("Audit", &audit_id.to_string().muted());
    }
    for diagnostic in &result.diagnostics {
        print_mark(Mark::Notice, diagnostic);
    }
}
