//! Rules and rule combining.
//!
//! A rule matches when it is enabled, its temporal window admits the request
//! time, and every one of its conditions holds. The matched rules of a policy
//! are merged by a [`RuleCombiningAlgorithm`].

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use warden_types::{Effect, IdempotencyKey, RuleCombiningAlgorithm, RuleId};

use crate::attributes::EvaluationContext;
use crate::condition::{Condition, evaluate_all};
use crate::error::{AbacError, Result};

// ============================================================================
// Temporal Window
// ============================================================================

/// Restricts when a rule may match.
///
/// `valid_from` and `valid_until` are inclusive bounds on the rule's lifetime.
/// `allowed_hours` (0-23) and `allowed_days` (0 = Monday .. 6 = Sunday) are
/// checked against the request time in the caller's own UTC offset. An empty
/// list places no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_hours: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_days: Vec<u32>,
}

impl TemporalWindow {
    pub fn is_unrestricted(&self) -> bool {
        self.valid_from.is_none()
            && self.valid_until.is_none()
            && self.allowed_hours.is_empty()
            && self.allowed_days.is_empty()
    }

    /// Returns whether the window admits a request issued at `at`.
    pub fn admits(&self, at: &DateTime<FixedOffset>) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let instant = at.with_timezone(&Utc);

        if self.valid_from.is_some_and(|from| instant < from) {
            return false;
        }
        if self.valid_until.is_some_and(|until| instant > until) {
            return false;
        }
        if !self.allowed_hours.is_empty() && !self.allowed_hours.contains(&at.hour()) {
            return false;
        }
        if !self.allowed_days.is_empty()
            && !self
                .allowed_days
                .contains(&at.weekday().num_days_from_monday())
        {
            return false;
        }
        true
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(hour) = self.allowed_hours.iter().find(|h| **h > 23) {
            return Err(AbacError::Validation(format!(
                "allowed hour {hour} is outside 0..=23"
            )));
        }
        if let Some(day) = self.allowed_days.iter().find(|d| **d > 6) {
            return Err(AbacError::Validation(format!(
                "allowed day {day} is outside 0..=6"
            )));
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if from > until {
                return Err(AbacError::Validation(format!(
                    "valid_from {from} is after valid_until {until}"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Rule
// ============================================================================

/// Everything needed to create a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub effect: Effect,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub temporal: TemporalWindow,
    #[serde(default)]
    pub obligations: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
}

fn enabled_by_default() -> bool {
    true
}

impl RuleSpec {
    pub fn new(name: impl Into<String>, effect: Effect) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            conditions: Vec::new(),
            effect,
            priority: 0,
            temporal: TemporalWindow::default(),
            obligations: Vec::new(),
            enabled: true,
            idempotency_key: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
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

    pub fn with_allowed_hours(mut self, hours: impl IntoIterator<Item = u32>) -> Self {
        self.temporal.allowed_hours = hours.into_iter().collect();
        self
    }

    pub fn with_allowed_days(mut self, days: impl IntoIterator<Item = u32>) -> Self {
        self.temporal.allowed_days = days.into_iter().collect();
        self
    }

    pub fn valid_between(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.temporal.valid_from = from;
        self.temporal.valid_until = until;
        self
    }

    pub fn with_obligation(mut self, obligation: impl Into<String>) -> Self {
        self.obligations.push(obligation.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AbacError::Validation(
                "rule name must not be empty".to_string(),
            ));
        }
        for condition in &self.conditions {
            condition.validate()?;
        }
        self.temporal.validate()
    }
}

/// A created rule. Conditions, effect and window never change after
/// creation; only `enabled` may be toggled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub conditions: Vec<Condition>,
    pub effect: Effect,
    pub priority: i32,
    #[serde(default)]
    pub temporal: TemporalWindow,
    #[serde(default)]
    pub obligations: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub(crate) fn from_spec(id: RuleId, spec: RuleSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            conditions: spec.conditions,
            effect: spec.effect,
            priority: spec.priority,
            temporal: spec.temporal,
            obligations: spec.obligations,
            enabled: spec.enabled,
            created_at,
        }
    }
}

/// Returns the rule's effect if it matches the context.
pub fn evaluate_rule(rule: &Rule, context: &EvaluationContext) -> Option<Effect> {
    if !rule.enabled || !rule.temporal.admits(&context.request_time) {
        return None;
    }
    evaluate_all(&rule.conditions, context).then_some(rule.effect)
}

/// Picks the deciding rule among the matched rules of one policy.
///
/// `matched` must be in the policy's declaration order. Returns `None` when
/// nothing matched.
pub fn combine_rules<'a>(
    algorithm: RuleCombiningAlgorithm,
    matched: &[&'a Rule],
) -> Option<&'a Rule> {
    let first_with = |effect: Effect| matched.iter().copied().find(|r| r.effect == effect);

    match algorithm {
        RuleCombiningAlgorithm::DenyOverrides => {
            first_with(Effect::Deny).or_else(|| first_with(Effect::Allow))
        }
        RuleCombiningAlgorithm::AllowOverrides => {
            first_with(Effect::Allow).or_else(|| first_with(Effect::Deny))
        }
        RuleCombiningAlgorithm::FirstApplicableByDeclaration => matched.first().copied(),
        RuleCombiningAlgorithm::HighestPriority => {
            let mut best: Option<&'a Rule> = None;
            for rule in matched.iter().copied() {
                if best.is_none_or(|b| rule.priority > b.priority) {
                    best = Some(rule);
                }
            }
            best
        }
    }
}
