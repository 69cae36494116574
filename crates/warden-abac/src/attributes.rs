//! Attribute values, references and the evaluation context.
//!
//! Four attribute categories drive access decisions, plus a free-form one:
//! - **Subject**: who is asking (role, department, clearance)
//! - **Resource**: what is being accessed (classification, owner)
//! - **Action**: what is being done (read, write, delete)
//! - **Environment**: request circumstances (network, location)
//! - **Custom**: caller-defined extras

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AbacError;

// ============================================================================
// Attribute Value
// ============================================================================

/// A single attribute value.
///
/// Serialized as a plain JSON scalar or array. `Null` and an absent
/// attribute are treated identically by the condition evaluator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value. Booleans and numeric-looking strings are
    /// not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Value equality used by `equals` and `in`.
    ///
    /// Type-sensitive, except that integers and floats compare numerically.
    pub fn loosely_eq(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                (*a as f64) == *b
            }
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
            }
            _ => self == other,
        }
    }

    /// String form used by the substring, prefix, suffix and regex operators.
    pub fn string_form(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                let json = serde_json::to_string(items).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Attribute Category & Reference
// ============================================================================

/// The attribute map a reference resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeCategory {
    Subject,
    Resource,
    Action,
    Environment,
    Custom,
}

impl AttributeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Resource => "resource",
            Self::Action => "action",
            Self::Environment => "environment",
            Self::Custom => "custom",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "subject" => Some(Self::Subject),
            "resource" => Some(Self::Resource),
            "action" => Some(Self::Action),
            "environment" => Some(Self::Environment),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl Display for AttributeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed reference to one attribute: a category plus a key.
///
/// Written as a dotted name, `"<category>.<key>"`. The name is split on the
/// first `.` only, so `"resource.owner.team"` is the key `owner.team` in the
/// resource map. A name without a dot refers to a subject attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttributeRef {
    pub category: AttributeCategory,
    pub key: String,
}

impl AttributeRef {
    pub fn new(category: AttributeCategory, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }

    pub fn subject(key: impl Into<String>) -> Self {
        Self::new(AttributeCategory::Subject, key)
    }

    pub fn resource(key: impl Into<String>) -> Self {
        Self::new(AttributeCategory::Resource, key)
    }

    pub fn action(key: impl Into<String>) -> Self {
        Self::new(AttributeCategory::Action, key)
    }

    pub fn environment(key: impl Into<String>) -> Self {
        Self::new(AttributeCategory::Environment, key)
    }

    /// Parses a dotted attribute name.
    pub fn parse(name: &str) -> Result<Self, AbacError> {
        let (category, key) = match name.split_once('.') {
            Some((prefix, key)) => {
                let category = AttributeCategory::from_prefix(prefix)
                    .ok_or_else(|| AbacError::UnknownCategory(name.to_string()))?;
                (category, key)
            }
            None => (AttributeCategory::Subject, name),
        };

        if key.trim().is_empty() {
            return Err(AbacError::Validation(format!(
                "attribute name '{name}' has an empty key"
            )));
        }

        Ok(Self::new(category, key))
    }
}

impl Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.key)
    }
}

impl FromStr for AttributeRef {
    type Err = AbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AttributeRef {
    type Error = AbacError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AttributeRef> for String {
    fn from(r: AttributeRef) -> Self {
        r.to_string()
    }
}

// ============================================================================
// Evaluation Context
// ============================================================================

/// Everything the engine knows about one access request.
///
/// `request_time` keeps the caller's UTC offset so that hour-of-day and
/// day-of-week restrictions are checked in the caller's local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub subject: HashMap<String, AttributeValue>,
    #[serde(default)]
    pub resource: HashMap<String, AttributeValue>,
    #[serde(default)]
    pub action: HashMap<String, AttributeValue>,
    #[serde(default)]
    pub environment: HashMap<String, AttributeValue>,
    #[serde(default)]
    pub custom: HashMap<String, AttributeValue>,
    #[serde(default = "default_request_time")]
    pub request_time: DateTime<FixedOffset>,
}

fn default_request_time() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::at(default_request_time())
    }
}

impl EvaluationContext {
    /// Creates an empty context stamped with the current UTC time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty context for a request issued at `request_time`.
    pub fn at(request_time: DateTime<FixedOffset>) -> Self {
        Self {
            subject: HashMap::new(),
            resource: HashMap::new(),
            action: HashMap::new(),
            environment: HashMap::new(),
            custom: HashMap::new(),
            request_time,
        }
    }

    pub fn with_subject(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.subject.insert(key.to_string(), value.into());
        self
    }

    pub fn with_resource(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.resource.insert(key.to_string(), value.into());
        self
    }

    pub fn with_action(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.action.insert(key.to_string(), value.into());
        self
    }

    pub fn with_environment(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.environment.insert(key.to_string(), value.into());
        self
    }

    pub fn with_custom(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.custom.insert(key.to_string(), value.into());
        self
    }

    /// Returns the map backing a category.
    pub fn category(&self, category: AttributeCategory) -> &HashMap<String, AttributeValue> {
        match category {
            AttributeCategory::Subject => &self.subject,
            AttributeCategory::Resource => &self.resource,
            AttributeCategory::Action => &self.action,
            AttributeCategory::Environment => &self.environment,
            AttributeCategory::Custom => &self.custom,
        }
    }

    /// Raw lookup: distinguishes an explicit `Null` from a missing key.
    pub fn get(&self, attribute: &AttributeRef) -> Option<&AttributeValue> {
        self.category(attribute.category).get(&attribute.key)
    }

    /// Lookup used by the evaluator. Missing keys and explicit nulls both
    /// resolve to `None`.
    pub fn resolve(&self, attribute: &AttributeRef) -> Option<&AttributeValue> {
        self.get(attribute).filter(|v| !v.is_null())
    }

    /// Identifier of the subject, resource or action (`id` attribute), used
    /// for audit attribution.
    pub fn identifier(&self, category: AttributeCategory) -> Option<String> {
        self.category(category)
            .get("id")
            .filter(|v| !v.is_null())
            .map(AttributeValue::string_form)
    }

    /// Rejects contexts the engine cannot evaluate at all.
    pub(crate) fn validate(&self) -> Result<(), String> {
        for category in [
            AttributeCategory::Subject,
            AttributeCategory::Resource,
            AttributeCategory::Action,
            AttributeCategory::Environment,
            AttributeCategory::Custom,
        ] {
            if self.category(category).keys().any(|k| k.trim().is_empty()) {
                return Err(format!("{category} attributes contain an empty key"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
