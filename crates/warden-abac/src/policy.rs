//! Policies, policy sets and policy combining.
//!
//! A policy bundles an ordered list of rule references under a rule-level
//! combining algorithm. It is a candidate for a request only while `ACTIVE`
//! and only when all of its target conditions hold.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_types::{
    Decision, IdempotencyKey, PolicyCombiningAlgorithm, PolicyId, PolicySetId, PolicyStatus,
    RuleCombiningAlgorithm, RuleId,
};

use crate::attributes::EvaluationContext;
use crate::condition::{Condition, evaluate_all};
use crate::error::{AbacError, Result};
use crate::rule::{Rule, combine_rules, evaluate_rule};

// ============================================================================
// Policy
// ============================================================================

/// Everything needed to create a policy. New policies start in `DRAFT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target: Vec<Condition>,
    #[serde(default)]
    pub rules: Vec<RuleId>,
    #[serde(default)]
    pub algorithm: RuleCombiningAlgorithm,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
}

impl PolicySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            target: Vec::new(),
            rules: Vec::new(),
            algorithm: RuleCombiningAlgorithm::default(),
            priority: 0,
            idempotency_key: None,
        }
    }

    pub fn with_rule(mut self, rule: RuleId) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_target(mut self, condition: Condition) -> Self {
        self.target.push(condition);
        self
    }

    pub fn with_algorithm(mut self, algorithm: RuleCombiningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AbacError::Validation(
                "policy name must not be empty".to_string(),
            ));
        }
        for condition in &self.target {
            condition.validate()?;
        }
        Ok(())
    }
}

/// A created policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Starts at 1 and grows by exactly one per structural change.
    pub version: u64,
    #[serde(default)]
    pub target: Vec<Condition>,
    pub rules: Vec<RuleId>,
    pub algorithm: RuleCombiningAlgorithm,
    pub priority: i32,
    pub status: PolicyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn from_spec(id: PolicyId, spec: PolicySpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            version: 1,
            target: spec.target,
            rules: spec.rules,
            algorithm: spec.algorithm,
            priority: spec.priority,
            status: PolicyStatus::Draft,
            created_at,
            updated_at: created_at,
        }
    }

    /// A policy is a candidate when it is active and its target holds.
    pub fn is_applicable(&self, context: &EvaluationContext) -> bool {
        self.status == PolicyStatus::Active && evaluate_all(&self.target, context)
    }
}

/// The per-policy result of rule evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    pub policy_id: PolicyId,
    pub policy_name: String,
    pub priority: i32,
    /// `PERMIT`, `DENY` or `NOT_APPLICABLE`.
    pub decision: Decision,
    pub rule_id: Option<RuleId>,
    pub rule_name: Option<String>,
    pub obligations: Vec<String>,
    pub rules_evaluated: usize,
    /// Rule references that no longer resolve.
    pub missing_rules: Vec<RuleId>,
}

/// Evaluates a policy's rules in declaration order and combines the matches.
///
/// Dangling rule references are skipped and reported in `missing_rules`.
pub fn evaluate_policy(
    policy: &Policy,
    rules: &BTreeMap<RuleId, Rule>,
    context: &EvaluationContext,
) -> PolicyOutcome {
    let mut matched = Vec::new();
    let mut missing_rules = Vec::new();
    let mut rules_evaluated = 0;

    for rule_id in &policy.rules {
        let Some(rule) = rules.get(rule_id) else {
            missing_rules.push(*rule_id);
            continue;
        };
        rules_evaluated += 1;
        if evaluate_rule(rule, context).is_some() {
            matched.push(rule);
        }
    }

    let decided = combine_rules(policy.algorithm, &matched);

    PolicyOutcome {
        policy_id: policy.id,
        policy_name: policy.name.clone(),
        priority: policy.priority,
        decision: decided.map_or(Decision::NotApplicable, |r| r.effect.into()),
        rule_id: decided.map(|r| r.id),
        rule_name: decided.map(|r| r.name.clone()),
        obligations: decided.map(|r| r.obligations.clone()).unwrap_or_default(),
        rules_evaluated,
        missing_rules,
    }
}

/// Picks the deciding outcome among candidates sorted by descending priority.
///
/// The override algorithms only let `PERMIT` or `DENY` decide and return
/// `None` when neither occurs. The priority algorithms take the top candidate
/// as is, so a leading `NOT_APPLICABLE` policy ends the evaluation.
pub fn combine_policies(
    algorithm: PolicyCombiningAlgorithm,
    outcomes: &[PolicyOutcome],
) -> Option<&PolicyOutcome> {
    let first_with = |decision: Decision| outcomes.iter().find(|o| o.decision == decision);

    match algorithm {
        PolicyCombiningAlgorithm::DenyOverrides => {
            first_with(Decision::Deny).or_else(|| first_with(Decision::Permit))
        }
        PolicyCombiningAlgorithm::AllowOverrides => {
            first_with(Decision::Permit).or_else(|| first_with(Decision::Deny))
        }
        PolicyCombiningAlgorithm::FirstApplicableByPriority => outcomes.first(),
        // min_by_key keeps the earliest of equal keys, so ties stay in input order.
        PolicyCombiningAlgorithm::HighestPriority => {
            outcomes.iter().min_by_key(|o| Reverse(o.priority))
        }
    }
}

// ============================================================================
// Policy Set
// ============================================================================

/// Everything needed to create a policy set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySetSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target: Vec<Condition>,
    pub policies: Vec<PolicyId>,
    #[serde(default)]
    pub algorithm: PolicyCombiningAlgorithm,
}

impl PolicySetSpec {
    pub fn new(name: impl Into<String>, policies: impl IntoIterator<Item = PolicyId>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            target: Vec::new(),
            policies: policies.into_iter().collect(),
            algorithm: PolicyCombiningAlgorithm::default(),
        }
    }

    pub fn with_target(mut self, condition: Condition) -> Self {
        self.target.push(condition);
        self
    }

    pub fn with_algorithm(mut self, algorithm: PolicyCombiningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AbacError::Validation(
                "policy set name must not be empty".to_string(),
            ));
        }
        for condition in &self.target {
            condition.validate()?;
        }
        Ok(())
    }
}

/// A named group of policies combined under their own algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    pub id: PolicySetId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target: Vec<Condition>,
    pub policies: Vec<PolicyId>,
    pub algorithm: PolicyCombiningAlgorithm,
    pub created_at: DateTime<Utc>,
}

impl PolicySet {
    pub(crate) fn from_spec(
        id: PolicySetId,
        spec: PolicySetSpec,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            target: spec.target,
            policies: spec.policies,
            algorithm: spec.algorithm,
            created_at,
        }
    }
}
