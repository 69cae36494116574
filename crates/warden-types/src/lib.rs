//! # warden-types: Core types for `Warden`
//!
//! This crate contains shared types used across the `Warden` system:
//! - Entity IDs ([`PolicyId`], [`RuleId`], [`PolicySetId`])
//! - Idempotency ([`IdempotencyKey`])
//! - Decision outcomes ([`Effect`], [`Decision`])
//! - Policy lifecycle ([`PolicyStatus`])
//! - Combining algorithms ([`RuleCombiningAlgorithm`], [`PolicyCombiningAlgorithm`])

use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised when parsing or constructing shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The combining algorithm name is not recognized at this level.
    #[error("unknown {level} combining algorithm: '{name}'")]
    UnknownAlgorithm { level: &'static str, name: String },

    /// The policy status name is not recognized.
    #[error("unknown policy status: '{0}'")]
    UnknownStatus(String),

    /// The effect name is not recognized.
    #[error("unknown effect: '{0}'")]
    UnknownEffect(String),

    /// Idempotency keys must contain at least one non-whitespace character.
    #[error("idempotency key must not be empty")]
    EmptyIdempotencyKey,
}

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn as_u64(&self) -> u64 {
                self.0
            }

            /// Returns the next identifier in allocation order.
            pub fn next(&self) -> Self {
                Self(self.0.saturating_add(1))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a policy. Allocated monotonically by the engine.
    PolicyId,
    "policy"
);

entity_id!(
    /// Unique identifier for a rule. Rules are immutable once created, so a
    /// `RuleId` always refers to the same condition set.
    RuleId,
    "rule"
);

entity_id!(
    /// Unique identifier for a policy set.
    PolicySetId,
    "set"
);

// ============================================================================
// Idempotency
// ============================================================================

/// Caller-supplied key that makes an administrative create operation safe to
/// retry.
///
/// If a create call is retried with the same key, the engine returns the
/// entity created by the first attempt instead of creating a second one.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self, TypeError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(TypeError::EmptyIdempotencyKey);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdempotencyKey({})", self.0)
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

// ============================================================================
// Effect & Decision
// ============================================================================

/// The effect of a rule: allow or deny access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    /// Grant access.
    Allow,
    /// Deny access.
    Deny,
}

impl Default for Effect {
    /// Defaults to `Deny` (deny unless explicitly allowed).
    fn default() -> Self {
        Self::Deny
    }
}

impl Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => f.write_str("ALLOW"),
            Self::Deny => f.write_str("DENY"),
        }
    }
}

impl FromStr for Effect {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" | "permit" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            _ => Err(TypeError::UnknownEffect(s.to_string())),
        }
    }
}

/// The outcome of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Access is granted.
    Permit,
    /// Access is refused.
    Deny,
    /// No policy or rule applied to the request.
    NotApplicable,
    /// The request could not be evaluated (invalid context, engine fault).
    Indeterminate,
}

impl Decision {
    /// Returns true for `Permit` and `Deny`.
    pub fn is_applicable(&self) -> bool {
        matches!(self, Self::Permit | Self::Deny)
    }
}

impl From<Effect> for Decision {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Allow => Self::Permit,
            Effect::Deny => Self::Deny,
        }
    }
}

impl Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Permit => "PERMIT",
            Self::Deny => "DENY",
            Self::NotApplicable => "NOT_APPLICABLE",
            Self::Indeterminate => "INDETERMINATE",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Policy Lifecycle
// ============================================================================

/// Lifecycle state of a policy.
///
/// ```text
/// Draft ──► Active ◄──► Disabled
///   │         │            │
///   └─────────┴─────┬──────┘
///                   ▼
///               Archived (terminal)
/// ```
///
/// Only `Active` policies are candidates for evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    #[default]
    Draft,
    Active,
    Disabled,
    Archived,
}

impl PolicyStatus {
    /// Returns whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: PolicyStatus) -> bool {
        match (self, next) {
            (Self::Archived, _) => false,
            (_, Self::Archived) => true,
            (Self::Draft | Self::Disabled, Self::Active) | (Self::Active, Self::Disabled) => true,
            _ => false,
        }
    }
}

impl Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Disabled => "DISABLED",
            Self::Archived => "ARCHIVED",
        };
        f.write_str(s)
    }
}

impl FromStr for PolicyStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            "archived" => Ok(Self::Archived),
            _ => Err(TypeError::UnknownStatus(s.to_string())),
        }
    }
}

// ============================================================================
// Combining Algorithms
// ============================================================================

/// Strategy for merging the matched rules of a single policy.
///
/// `FirstApplicableByDeclaration` follows the policy's declared rule order and
/// ignores rule priority. It is deliberately a different strategy from
/// [`PolicyCombiningAlgorithm::FirstApplicableByPriority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCombiningAlgorithm {
    /// Any matched DENY wins; otherwise any matched ALLOW permits.
    #[default]
    DenyOverrides,
    /// Any matched ALLOW wins; otherwise any matched DENY denies.
    AllowOverrides,
    /// The first matched rule in declaration order decides.
    #[serde(alias = "first_applicable")]
    FirstApplicableByDeclaration,
    /// The matched rule with the greatest priority decides; ties go to the
    /// earlier declared rule.
    HighestPriority,
}

impl Display for RuleCombiningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DenyOverrides => "deny_overrides",
            Self::AllowOverrides => "allow_overrides",
            Self::FirstApplicableByDeclaration => "first_applicable_by_declaration",
            Self::HighestPriority => "highest_priority",
        };
        f.write_str(s)
    }
}

impl FromStr for RuleCombiningAlgorithm {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny_overrides" => Ok(Self::DenyOverrides),
            "allow_overrides" => Ok(Self::AllowOverrides),
            "first_applicable" | "first_applicable_by_declaration" => {
                Ok(Self::FirstApplicableByDeclaration)
            }
            "highest_priority" => Ok(Self::HighestPriority),
            _ => Err(TypeError::UnknownAlgorithm {
                level: "rule",
                name: s.to_string(),
            }),
        }
    }
}

/// Strategy for merging per-policy decisions into the final decision.
///
/// Candidates are always scanned in descending policy priority, so
/// `FirstApplicableByPriority` takes the top candidate's decision, even when
/// that decision is `NOT_APPLICABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCombiningAlgorithm {
    /// The first DENY found wins; otherwise the first PERMIT.
    #[default]
    DenyOverrides,
    /// The first PERMIT found wins; otherwise the first DENY.
    AllowOverrides,
    /// The first candidate in priority order decides.
    #[serde(alias = "first_applicable")]
    FirstApplicableByPriority,
    /// Candidates are stably re-sorted by priority and the top one decides.
    HighestPriority,
}

impl Display for PolicyCombiningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DenyOverrides => "deny_overrides",
            Self::AllowOverrides => "allow_overrides",
            Self::FirstApplicableByPriority => "first_applicable_by_priority",
            Self::HighestPriority => "highest_priority",
        };
        f.write_str(s)
    }
}

impl FromStr for PolicyCombiningAlgorithm {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny_overrides" => Ok(Self::DenyOverrides),
            "allow_overrides" => Ok(Self::AllowOverrides),
            "first_applicable" | "first_applicable_by_priority" => {
                Ok(Self::FirstApplicableByPriority)
            }
            "highest_priority" => Ok(Self::HighestPriority),
            _ => Err(TypeError::UnknownAlgorithm {
                level: "policy",
                name: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn entity_ids_display_with_prefix() {
        assert_eq!(PolicyId::new(7).to_string(), "policy:7");
        assert_eq!(RuleId::new(3).to_string(), "rule:3");
        assert_eq!(PolicySetId::new(1).to_string(), "set:1");
    }

    #[test]
    fn entity_ids_serialize_transparently() {
        let json = serde_json::to_string(&PolicyId::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: RuleId = serde_json::from_str("9").unwrap();
        assert_eq!(back, RuleId::new(9));
    }

    #[test]
    fn empty_idempotency_key_is_rejected() {
        assert_eq!(
            IdempotencyKey::new("   "),
            Err(TypeError::EmptyIdempotencyKey)
        );
        assert!(serde_json::from_str::<IdempotencyKey>("\"\"").is_err());
        assert_eq!(IdempotencyKey::new("req-1").unwrap().as_str(), "req-1");
    }

    #[test]
    fn effect_maps_to_decision() {
        assert_eq!(Decision::from(Effect::Allow), Decision::Permit);
        assert_eq!(Decision::from(Effect::Deny), Decision::Deny);
        assert_eq!(Effect::default(), Effect::Deny);
    }

    #[test]
    fn decision_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&Decision::NotApplicable).unwrap();
        assert_eq!(json, "\"NOT_APPLICABLE\"");
        assert!(!Decision::Indeterminate.is_applicable());
        assert!(Decision::Deny.is_applicable());
    }

    #[test_case(PolicyStatus::Draft, PolicyStatus::Active => true; "draft activates")]
    #[test_case(PolicyStatus::Draft, PolicyStatus::Disabled => false; "draft cannot disable")]
    #[test_case(PolicyStatus::Active, PolicyStatus::Disabled => true; "active disables")]
    #[test_case(PolicyStatus::Disabled, PolicyStatus::Active => true; "disabled reactivates")]
    #[test_case(PolicyStatus::Active, PolicyStatus::Active => false; "active to active")]
    #[test_case(PolicyStatus::Disabled, PolicyStatus::Archived => true; "disabled archives")]
    #[test_case(PolicyStatus::Archived, PolicyStatus::Active => false; "archived is terminal")]
    #[test_case(PolicyStatus::Archived, PolicyStatus::Archived => false; "archived stays")]
    fn status_transitions(from: PolicyStatus, to: PolicyStatus) -> bool {
        from.can_transition_to(to)
    }

    #[test]
    fn first_applicable_resolves_per_level() {
        assert_eq!(
            "first_applicable".parse::<RuleCombiningAlgorithm>().unwrap(),
            RuleCombiningAlgorithm::FirstApplicableByDeclaration
        );
        assert_eq!(
            "first_applicable".parse::<PolicyCombiningAlgorithm>().unwrap(),
            PolicyCombiningAlgorithm::FirstApplicableByPriority
        );

        let rule: RuleCombiningAlgorithm = serde_json::from_str("\"first_applicable\"").unwrap();
        assert_eq!(rule, RuleCombiningAlgorithm::FirstApplicableByDeclaration);
        let policy: PolicyCombiningAlgorithm =
            serde_json::from_str("\"first_applicable\"").unwrap();
        assert_eq!(policy, PolicyCombiningAlgorithm::FirstApplicableByPriority);
    }

    #[test]
    fn unknown_algorithm_is_a_typed_error() {
        let err = "majority_vote".parse::<PolicyCombiningAlgorithm>().unwrap_err();
        assert_eq!(
            err,
            TypeError::UnknownAlgorithm {
                level: "policy",
                name: "majority_vote".to_string()
            }
        );
        assert!(err.to_string().contains("majority_vote"));
    }

    proptest! {
        #[test]
        fn algorithm_display_parses_back(idx in 0usize..4) {
            let algs = [
                RuleCombiningAlgorithm::DenyOverrides,
                RuleCombiningAlgorithm::AllowOverrides,
                RuleCombiningAlgorithm::FirstApplicableByDeclaration,
                RuleCombiningAlgorithm::HighestPriority,
            ];
            let alg = algs[idx];
            prop_assert_eq!(alg.to_string().parse::<RuleCombiningAlgorithm>().unwrap(), alg);
        }

        #[test]
        fn next_id_is_strictly_greater(raw in 0u64..u64::MAX) {
            let id = PolicyId::new(raw);
            prop_assert!(id.next() > id);
        }
    }
}
