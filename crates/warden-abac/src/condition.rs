//! Condition evaluation.
//!
//! A [`Condition`] is one typed comparison between an attribute of the
//! request and a literal. Evaluation never fails: a missing attribute or a
//! type mismatch makes positive operators false and negative operators true,
//! so a data-quality gap can never grant access.

use std::fmt::{self, Display};
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeRef, AttributeValue, EvaluationContext};
use crate::error::{AbacError, Result};

// ============================================================================
// Operator
// ============================================================================

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    /// Regular expression anchored at the start of the string only.
    #[serde(alias = "matches_prefix")]
    Matches,
    /// Regular expression that must cover the whole string.
    MatchesFull,
    IsBetween,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub const ALL: [Operator; 17] = [
        Self::Equals,
        Self::NotEquals,
        Self::GreaterThan,
        Self::LessThan,
        Self::GreaterOrEqual,
        Self::LessOrEqual,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::In,
        Self::NotIn,
        Self::Matches,
        Self::MatchesFull,
        Self::IsBetween,
        Self::IsNull,
        Self::IsNotNull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::LessOrEqual => "less_or_equal",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Matches => "matches",
            Self::MatchesFull => "matches_full",
            Self::IsBetween => "is_between",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
        }
    }

    fn is_numeric_comparison(self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::LessThan | Self::GreaterOrEqual | Self::LessOrEqual
        )
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = AbacError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "matches_prefix" {
            return Ok(Self::Matches);
        }
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AbacError::UnknownOperator(s.to_string()))
    }
}

// ============================================================================
// Condition
// ============================================================================

/// A single comparison against one attribute of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: AttributeRef,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<AttributeValue>,
    /// Inverts the result of the comparison.
    #[serde(default)]
    pub negate: bool,
}

impl Condition {
    pub fn new(attribute: AttributeRef, operator: Operator) -> Self {
        Self {
            attribute,
            operator,
            value: None,
            values: Vec::new(),
            negate: false,
        }
    }

    /// Builds a condition from a dotted attribute name.
    pub fn on(attribute: &str, operator: Operator) -> Result<Self> {
        Ok(Self::new(AttributeRef::parse(attribute)?, operator))
    }

    /// Shorthand for `<attribute> equals <value>`.
    pub fn equals(attribute: &str, value: impl Into<AttributeValue>) -> Result<Self> {
        Ok(Self::on(attribute, Operator::Equals)?.with_value(value))
    }

    pub fn with_value(mut self, value: impl Into<AttributeValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_values<V: Into<AttributeValue>>(
        mut self,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    fn expected(&self) -> Option<&AttributeValue> {
        self.value.as_ref().filter(|v| !v.is_null())
    }

    /// Checks that the operands fit the operator.
    ///
    /// Run when a rule or policy is created so that malformed conditions
    /// never reach evaluation.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| {
            Err(AbacError::Validation(format!(
                "condition on '{}' ({}): {msg}",
                self.attribute, self.operator
            )))
        };

        match self.operator {
            Operator::Equals
            | Operator::NotEquals
            | Operator::Contains
            | Operator::NotContains
            | Operator::StartsWith
            | Operator::EndsWith => {
                if self.expected().is_none() {
                    return invalid("a non-null value is required");
                }
            }
            op if op.is_numeric_comparison() => {
                if self.expected().and_then(AttributeValue::as_f64).is_none() {
                    return invalid("a numeric value is required");
                }
            }
            Operator::In | Operator::NotIn => {
                if self.values.is_empty() {
                    return invalid("a non-empty values list is required");
                }
            }
            Operator::Matches | Operator::MatchesFull => {
                let Some(pattern) = self.expected().and_then(AttributeValue::as_str) else {
                    return invalid("a string pattern is required");
                };
                if let Err(e) = compile_pattern(pattern, self.operator) {
                    return invalid(&format!("invalid pattern: {e}"));
                }
            }
            Operator::IsBetween => match self.bounds() {
                Some((lo, hi)) if lo <= hi => {}
                Some(_) => return invalid("lower bound exceeds upper bound"),
                None => return invalid("exactly two numeric bounds are required"),
            },
            _ => {}
        }
        Ok(())
    }

    fn bounds(&self) -> Option<(f64, f64)> {
        match self.values.as_slice() {
            [lo, hi] => Some((lo.as_f64()?, hi.as_f64()?)),
            _ => None,
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            f.write_str("not ")?;
        }
        write!(f, "{} {}", self.attribute, self.operator)?;
        if let Some(value) = &self.value {
            write!(f, " {value}")?;
        }
        if !self.values.is_empty() {
            let list = AttributeValue::List(self.values.clone());
            write!(f, " {list}")?;
        }
        Ok(())
    }
}

fn compile_pattern(pattern: &str, operator: Operator) -> std::result::Result<Regex, regex::Error> {
    match operator {
        Operator::MatchesFull => Regex::new(&format!("^(?:{pattern})$")),
        _ => Regex::new(&format!("^(?:{pattern})")),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluates one condition against a context.
pub fn evaluate_condition(condition: &Condition, context: &EvaluationContext) -> bool {
    let actual = context.resolve(&condition.attribute);
    let raw = compare(condition, actual);
    raw != condition.negate
}

/// Evaluates a condition list as a conjunction. An empty list is true.
pub fn evaluate_all(conditions: &[Condition], context: &EvaluationContext) -> bool {
    conditions.iter().all(|c| evaluate_condition(c, context))
}

fn compare(condition: &Condition, actual: Option<&AttributeValue>) -> bool {
    let expected = condition.expected();

    match condition.operator {
        Operator::Equals => values_equal(actual, expected),
        Operator::NotEquals => !values_equal(actual, expected),

        Operator::GreaterThan => numeric(actual, expected, |a, b| a > b),
        Operator::LessThan => numeric(actual, expected, |a, b| a < b),
        Operator::GreaterOrEqual => numeric(actual, expected, |a, b| a >= b),
        Operator::LessOrEqual => numeric(actual, expected, |a, b| a <= b),

        Operator::Contains => textual(actual, expected, |a, b| a.contains(b)),
        Operator::NotContains => !textual(actual, expected, |a, b| a.contains(b)),
        Operator::StartsWith => textual(actual, expected, |a, b| a.starts_with(b)),
        Operator::EndsWith => textual(actual, expected, |a, b| a.ends_with(b)),

        Operator::In => member(actual, &condition.values),
        Operator::NotIn => !member(actual, &condition.values),

        Operator::Matches | Operator::MatchesFull => {
            let (Some(actual), Some(pattern)) = (actual, expected.and_then(AttributeValue::as_str))
            else {
                return false;
            };
            compile_pattern(pattern, condition.operator)
                .is_ok_and(|re| re.is_match(&actual.string_form()))
        }

        Operator::IsBetween => match (actual.and_then(AttributeValue::as_f64), condition.bounds()) {
            (Some(x), Some((lo, hi))) => lo <= x && x <= hi,
            _ => false,
        },

        Operator::IsNull => actual.is_none(),
        Operator::IsNotNull => actual.is_some(),
    }
}

fn values_equal(actual: Option<&AttributeValue>, expected: Option<&AttributeValue>) -> bool {
    match (actual, expected) {
        (Some(a), Some(b)) => a.loosely_eq(b),
        (None, None) => true,
        _ => false,
    }
}

fn numeric(
    actual: Option<&AttributeValue>,
    expected: Option<&AttributeValue>,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (
        actual.and_then(AttributeValue::as_f64),
        expected.and_then(AttributeValue::as_f64),
    ) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn textual(
    actual: Option<&AttributeValue>,
    expected: Option<&AttributeValue>,
    test: impl Fn(&str, &str) -> bool,
) -> bool {
    match (actual, expected) {
        (Some(a), Some(b)) => test(&a.string_form(), &b.string_form()),
        _ => false,
    }
}

fn member(actual: Option<&AttributeValue>, values: &[AttributeValue]) -> bool {
    actual.is_some_and(|a| values.iter().any(|v| v.loosely_eq(a)))
}

// ============================================================================
// Tests
// ============================================================================
