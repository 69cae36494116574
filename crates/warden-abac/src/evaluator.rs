//! The decision procedure.
//!
//! Pure function from a policy snapshot and a request to an
//! [`EvaluationResult`]. It holds no locks and touches no shared state, so
//! any number of evaluations may run in parallel.
//!
//! 1. Select candidates: `ACTIVE` policies whose target holds (restricted to
//!    a policy set's members when scoped to a set).
//! 2. Sort candidates by priority, highest first (stable).
//! 3. Evaluate each candidate's rules and combine them per policy.
//! 4. Combine the per-policy outcomes with the policy-level algorithm.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_types::{Decision, PolicyCombiningAlgorithm, PolicyId, PolicySetId, RuleId};

use crate::attributes::EvaluationContext;
use crate::condition::evaluate_all;
use crate::policy::{Policy, PolicyOutcome, combine_policies, evaluate_policy};
use crate::store::PolicySnapshot;

pub(crate) const NO_APPLICABLE_POLICIES: &str = "No applicable policies";
pub(crate) const NO_APPLICABLE_RULES: &str = "No applicable rules in candidate policies";
pub(crate) const SET_TARGET_MISMATCH: &str = "Policy set target did not match";
pub(crate) const CACHED_DECISION: &str = "Cached decision";

/// Which policies an evaluation considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every policy in the repository.
    #[default]
    All,
    /// Only the members of one policy set.
    Set(PolicySetId),
}

/// The answer to one access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub decision: Decision,
    pub policy_id: Option<PolicyId>,
    pub rule_id: Option<RuleId>,
    pub reason: String,
    /// Obligations of the deciding rule.
    #[serde(default)]
    pub obligations: Vec<String>,
    /// Repository inconsistencies met while evaluating (dangling rules).
    #[serde(default)]
    pub diagnostics: Vec<String>,
    pub policies_evaluated: usize,
    pub rules_evaluated: usize,
    pub elapsed_micros: u64,
    /// Served from the decision cache.
    pub cached: bool,
    /// The audit record written for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_id: Option<Uuid>,
}

impl EvaluationResult {
    fn new(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            policy_id: None,
            rule_id: None,
            reason: reason.into(),
            obligations: Vec::new(),
            diagnostics: Vec::new(),
            policies_evaluated: 0,
            rules_evaluated: 0,
            elapsed_micros: 0,
            cached: false,
            audit_id: None,
        }
    }

    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self::new(Decision::NotApplicable, reason)
    }

    pub fn indeterminate(reason: impl Into<String>) -> Self {
        Self::new(Decision::Indeterminate, reason)
    }

    pub fn is_permit(&self) -> bool {
        self.decision == Decision::Permit
    }

    /// The result a cache hit returns: same decision and attribution, no
    /// evaluation work.
    pub(crate) fn as_cache_hit(&self) -> Self {
        Self {
            reason: CACHED_DECISION.to_string(),
            policies_evaluated: 0,
            rules_evaluated: 0,
            elapsed_micros: 0,
            cached: true,
            audit_id: None,
            ..self.clone()
        }
    }
}

/// Evaluates a request against a snapshot.
pub fn evaluate(
    snapshot: &PolicySnapshot,
    context: &EvaluationContext,
    scope: Scope,
    algorithm: PolicyCombiningAlgorithm,
) -> EvaluationResult {
    let mut candidates: Vec<&Policy> = match scope {
        Scope::All => snapshot
            .policies
            .values()
            .filter(|p| p.is_applicable(context))
            .collect(),
        Scope::Set(set_id) => {
            let Some(set) = snapshot.policy_sets.get(&set_id) else {
                return EvaluationResult::indeterminate(format!("Unknown policy set {set_id}"));
            };
            if !evaluate_all(&set.target, context) {
                return EvaluationResult::not_applicable(SET_TARGET_MISMATCH);
            }
            set.policies
                .iter()
                .filter_map(|id| snapshot.policies.get(id))
                .filter(|p| p.is_applicable(context))
                .collect()
        }
    };

    if candidates.is_empty() {
        return EvaluationResult::not_applicable(NO_APPLICABLE_POLICIES);
    }

    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

    let outcomes: Vec<PolicyOutcome> = candidates
        .iter()
        .map(|p| evaluate_policy(p, &snapshot.rules, context))
        .collect();

    let diagnostics: Vec<String> = outcomes
        .iter()
        .flat_map(|o| {
            o.missing_rules
                .iter()
                .map(move |r| format!("{} references missing {r}", o.policy_id))
        })
        .collect();

    let mut result = match combine_policies(algorithm, &outcomes) {
        Some(decided) => EvaluationResult {
            policy_id: Some(decided.policy_id),
            rule_id: decided.rule_id,
            obligations: decided.obligations.clone(),
            ..EvaluationResult::new(decided.decision, describe(decided, algorithm))
        },
        None => EvaluationResult::not_applicable(NO_APPLICABLE_RULES),
    };

    result.diagnostics = diagnostics;
    result.policies_evaluated = outcomes.len();
    result.rules_evaluated = outcomes.iter().map(|o| o.rules_evaluated).sum();
    result
}

fn describe(outcome: &PolicyOutcome, algorithm: PolicyCombiningAlgorithm) -> String {
    if !outcome.decision.is_applicable() {
        return format!(
            "Top policy '{}' ({}) had no applicable rule under {algorithm}",
            outcome.policy_name, outcome.policy_id,
        );
    }
    format!(
        "Rule '{}' in policy '{}' ({}) decided {} under {algorithm}",
        outcome.rule_name.as_deref().unwrap_or("?"),
        outcome.policy_name,
        outcome.policy_id,
        outcome.decision,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::policy::{PolicySet, PolicySetSpec, PolicySpec};
    use crate::rule::{Rule, RuleSpec};
    use chrono::Utc;
    use warden_types::{Effect, PolicyStatus};

    struct Fixture {
        snapshot: PolicySnapshot,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                snapshot: PolicySnapshot::default(),
            }
        }

        fn rule(&mut self, spec: RuleSpec) -> RuleId {
            let id = self.snapshot.next_rule_id();
            self.snapshot
                .rules
                .insert(id, Rule::from_spec(id, spec, Utc::now()));
            id
        }

        fn policy(&mut self, spec: PolicySpec, status: PolicyStatus) -> PolicyId {
            let id = self.snapshot.next_policy_id();
            let mut policy = Policy::from_spec(id, spec, Utc::now());
            policy.status = status;
            self.snapshot.policies.insert(id, policy);
            id
        }

        fn eval(&self, ctx: &EvaluationContext) -> EvaluationResult {
            evaluate(
                &self.snapshot,
                ctx,
                Scope::All,
                PolicyCombiningAlgorithm::DenyOverrides,
            )
        }
    }

    fn role_is(role: &str) -> Condition {
        Condition::equals("subject.role", role).unwrap()
    }

    #[test]
    fn empty_repository_is_not_applicable() {
        let result = Fixture::new().eval(&EvaluationContext::new());
        assert_eq!(result.decision, Decision::NotApplicable);
        assert_eq!(result.reason, NO_APPLICABLE_POLICIES);
        assert_eq!(result.policy_id, None);
    }

    #[test]
    fn draft_policies_are_ignored() {
        let mut f = Fixture::new();
        let r = f.rule(RuleSpec::new("any", Effect::Allow));
        f.policy(PolicySpec::new("draft").with_rule(r), PolicyStatus::Draft);
        assert_eq!(
            f.eval(&EvaluationContext::new()).reason,
            NO_APPLICABLE_POLICIES
        );
    }

    #[test]
    fn candidates_without_matching_rules() {
        let mut f = Fixture::new();
        let r = f.rule(RuleSpec::new("admins", Effect::Allow).with_condition(role_is("admin")));
        f.policy(PolicySpec::new("p").with_rule(r), PolicyStatus::Active);

        let result = f.eval(&EvaluationContext::new().with_subject("role", "guest"));
        assert_eq!(result.decision, Decision::NotApplicable);
        assert_eq!(result.reason, NO_APPLICABLE_RULES);
        assert_eq!(result.policies_evaluated, 1);
        assert_eq!(result.rules_evaluated, 1);
    }

    #[test]
    fn deny_in_lower_priority_policy_still_overrides() {
        let mut f = Fixture::new();
        let allow = f.rule(RuleSpec::new("allow", Effect::Allow));
        let deny = f.rule(RuleSpec::new("deny", Effect::Deny));
        f.policy(
            PolicySpec::new("high").with_rule(allow).with_priority(100),
            PolicyStatus::Active,
        );
        let low = f.policy(
            PolicySpec::new("low").with_rule(deny).with_priority(1),
            PolicyStatus::Active,
        );

        let result = f.eval(&EvaluationContext::new());
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.policy_id, Some(low));
        assert_eq!(result.rule_id, Some(deny));

        let first = evaluate(
            &f.snapshot,
            &EvaluationContext::new(),
            Scope::All,
            PolicyCombiningAlgorithm::FirstApplicableByPriority,
        );
        assert_eq!(first.decision, Decision::Permit);
    }

    #[test]
    fn leading_not_applicable_policy_ends_priority_evaluation() {
        let mut f = Fixture::new();
        let admins = f.rule(RuleSpec::new("admins", Effect::Allow).with_condition(role_is("admin")));
        let anyone = f.rule(RuleSpec::new("anyone", Effect::Allow));
        let high = f.policy(
            PolicySpec::new("high").with_rule(admins).with_priority(100),
            PolicyStatus::Active,
        );
        f.policy(
            PolicySpec::new("low").with_rule(anyone).with_priority(1),
            PolicyStatus::Active,
        );

        let ctx = EvaluationContext::new().with_subject("role", "guest");
        for algorithm in [
            PolicyCombiningAlgorithm::FirstApplicableByPriority,
            PolicyCombiningAlgorithm::HighestPriority,
        ] {
            let result = evaluate(&f.snapshot, &ctx, Scope::All, algorithm);
            assert_eq!(result.decision, Decision::NotApplicable);
            assert_eq!(result.policy_id, Some(high));
            assert_eq!(result.rule_id, None);
            assert!(result.reason.contains("'high'"), "{}", result.reason);
        }

        let overrides = evaluate(
            &f.snapshot,
            &ctx,
            Scope::All,
            PolicyCombiningAlgorithm::AllowOverrides,
        );
        assert_eq!(overrides.decision, Decision::Permit);
    }

    #[test]
    fn dangling_rules_become_diagnostics() {
        let mut f = Fixture::new();
        let allow = f.rule(RuleSpec::new("allow", Effect::Allow).with_obligation("notify"));
        let p = f.policy(
            PolicySpec::new("p")
                .with_rule(RuleId::new(404))
                .with_rule(allow),
            PolicyStatus::Active,
        );

        let result = f.eval(&EvaluationContext::new());
        assert_eq!(result.decision, Decision::Permit);
        assert_eq!(result.obligations, vec!["notify".to_string()]);
        assert_eq!(
            result.diagnostics,
            vec![format!("{p} references missing rule:404")]
        );
    }

    #[test]
    fn policy_set_scope() {
        let mut f = Fixture::new();
        let allow = f.rule(RuleSpec::new("allow", Effect::Allow));
        let deny = f.rule(RuleSpec::new("deny", Effect::Deny));
        let inside = f.policy(PolicySpec::new("in").with_rule(allow), PolicyStatus::Active);
        f.policy(PolicySpec::new("out").with_rule(deny), PolicyStatus::Active);

        let set_id = PolicySetId::new(1);
        f.snapshot.policy_sets.insert(
            set_id,
            PolicySet::from_spec(
                set_id,
                PolicySetSpec::new("records", [inside])
                    .with_target(Condition::equals("resource.type", "record").unwrap()),
                Utc::now(),
            ),
        );

        let ctx = EvaluationContext::new().with_resource("type", "record");
        let algorithm = PolicyCombiningAlgorithm::DenyOverrides;
        let result = evaluate(&f.snapshot, &ctx, Scope::Set(set_id), algorithm);
        assert_eq!(result.decision, Decision::Permit);
        assert_eq!(result.policy_id, Some(inside));

        let miss = evaluate(
            &f.snapshot,
            &EvaluationContext::new(),
            Scope::Set(set_id),
            algorithm,
        );
        assert_eq!(miss.reason, SET_TARGET_MISMATCH);

        let unknown = evaluate(&f.snapshot, &ctx, Scope::Set(PolicySetId::new(9)), algorithm);
        assert_eq!(unknown.decision, Decision::Indeterminate);
    }

    #[test]
    fn cache_hit_view_keeps_attribution() {
        let mut result = EvaluationResult::not_applicable("x");
        result.policy_id = Some(PolicyId::new(1));
        result.rules_evaluated = 3;
        let hit = result.as_cache_hit();
        assert!(hit.cached);
        assert_eq!(hit.reason, CACHED_DECISION);
        assert_eq!(hit.policy_id, Some(PolicyId::new(1)));
        assert_eq!(hit.rules_evaluated, 0);
    }
}
