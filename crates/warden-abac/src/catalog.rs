//! Attribute catalog.
//!
//! Declares the attribute names conditions are expected to use. The catalog
//! is metadata for tooling and validation only: the evaluator resolves any
//! attribute present in the context whether or not it has been declared.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeCategory, AttributeRef, AttributeValue, EvaluationContext};
use crate::error::{AbacError, Result};

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Datetime,
}

impl AttributeType {
    /// Returns whether `value` is an instance of this type. `Null` is
    /// accepted by every type.
    pub fn admits(self, value: &AttributeValue) -> bool {
        match (self, value) {
            (_, AttributeValue::Null)
            | (Self::String | Self::Datetime, AttributeValue::String(_))
            | (Self::Integer, AttributeValue::Integer(_))
            | (Self::Float, AttributeValue::Float(_) | AttributeValue::Integer(_))
            | (Self::Boolean, AttributeValue::Bool(_))
            | (Self::List, AttributeValue::List(_)) => true,
            _ => false,
        }
    }
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Datetime => "datetime",
        };
        f.write_str(s)
    }
}

/// Declaration of a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub category: AttributeCategory,
    pub attribute_type: AttributeType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<AttributeValue>,
    #[serde(default)]
    pub allowed_values: Vec<AttributeValue>,
    #[serde(default)]
    pub description: String,
}

impl AttributeDefinition {
    pub fn new(
        name: impl Into<String>,
        category: AttributeCategory,
        attribute_type: AttributeType,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            attribute_type,
            required: false,
            default_value: None,
            allowed_values: Vec::new(),
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<AttributeValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_allowed_values<V: Into<AttributeValue>>(
        mut self,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The reference conditions use to address this attribute.
    pub fn reference(&self) -> AttributeRef {
        AttributeRef::new(self.category, self.name.clone())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AbacError::Validation(
                "attribute name must not be empty".to_string(),
            ));
        }
        if let Some(default) = &self.default_value {
            if !self.attribute_type.admits(default) {
                return Err(AbacError::Validation(format!(
                    "default value {default} of '{}' is not a {}",
                    self.reference(),
                    self.attribute_type
                )));
            }
        }
        if let Some(bad) = self
            .allowed_values
            .iter()
            .find(|v| !self.attribute_type.admits(v))
        {
            return Err(AbacError::Validation(format!(
                "allowed value {bad} of '{}' is not a {}",
                self.reference(),
                self.attribute_type
            )));
        }
        Ok(())
    }
}

/// A declared attribute that a context fails to satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogViolation {
    pub attribute: AttributeRef,
    pub message: String,
}

impl Display for CatalogViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.attribute, self.message)
    }
}

/// All declared attributes, keyed by reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeCatalog {
    definitions: BTreeMap<AttributeRef, AttributeDefinition>,
}

impl AttributeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition. Rejects a second definition for the same
    /// category and name.
    pub fn define(&mut self, definition: AttributeDefinition) -> Result<&AttributeDefinition> {
        definition.validate()?;
        let key = definition.reference();
        if self.definitions.contains_key(&key) {
            return Err(AbacError::DuplicateAttribute(key.to_string()));
        }
        Ok(self.definitions.entry(key).or_insert(definition))
    }

    pub fn get(&self, attribute: &AttributeRef) -> Option<&AttributeDefinition> {
        self.definitions.get(attribute)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Checks a context against the declarations: required attributes must
    /// be present (or have a default), values must match the declared type
    /// and, when an allowed-value set exists, belong to it.
    ///
    /// Undeclared attributes in the context are ignored.
    pub fn validate_context(&self, context: &EvaluationContext) -> Vec<CatalogViolation> {
        let mut violations = Vec::new();

        for (attribute, definition) in &self.definitions {
            let violation = |message: String| CatalogViolation {
                attribute: attribute.clone(),
                message,
            };

            let Some(value) = context.resolve(attribute) else {
                if definition.required && definition.default_value.is_none() {
                    violations.push(violation("required attribute is missing".to_string()));
                }
                continue;
            };

            if !definition.attribute_type.admits(value) {
                violations.push(violation(format!(
                    "expected {}, found {value}",
                    definition.attribute_type
                )));
            } else if !definition.allowed_values.is_empty()
                && !definition.allowed_values.iter().any(|a| a.loosely_eq(value))
            {
                violations.push(violation(format!("value {value} is not allowed")));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role() -> AttributeDefinition {
        AttributeDefinition::new("role", AttributeCategory::Subject, AttributeType::String)
            .required()
            .with_allowed_values(["admin", "analyst", "viewer"])
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let mut catalog = AttributeCatalog::new();
        catalog.define(role()).unwrap();

        let err = catalog.define(role()).unwrap_err();
        assert!(matches!(err, AbacError::DuplicateAttribute(name) if name == "subject.role"));

        // Same name in another category is a different attribute.
        catalog
            .define(AttributeDefinition::new(
                "role",
                AttributeCategory::Resource,
                AttributeType::String,
            ))
            .unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn default_must_match_declared_type() {
        let mut catalog = AttributeCatalog::new();
        let bad = AttributeDefinition::new(
            "clearance",
            AttributeCategory::Subject,
            AttributeType::Integer,
        )
        .with_default("high");
        assert!(matches!(catalog.define(bad), Err(AbacError::Validation(_))));
    }

    #[test]
    fn validate_context_reports_violations() {
        let mut catalog = AttributeCatalog::new();
        catalog.define(role()).unwrap();
        catalog
            .define(AttributeDefinition::new(
                "clearance",
                AttributeCategory::Subject,
                AttributeType::Integer,
            ))
            .unwrap();

        let ok = EvaluationContext::new()
            .with_subject("role", "admin")
            .with_subject("clearance", 3)
            .with_subject("undeclared", true);
        assert!(catalog.validate_context(&ok).is_empty());

        let missing = EvaluationContext::new();
        let violations = catalog.validate_context(&missing);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].attribute, AttributeRef::subject("role"));

        let wrong = EvaluationContext::new()
            .with_subject("role", "root")
            .with_subject("clearance", "3");
        assert_eq!(catalog.validate_context(&wrong).len(), 2);
    }

    #[test]
    fn required_with_default_is_satisfied_when_absent() {
        let mut catalog = AttributeCatalog::new();
        catalog
            .define(
                AttributeDefinition::new(
                    "network",
                    AttributeCategory::Environment,
                    AttributeType::String,
                )
                .required()
                .with_default("internal"),
            )
            .unwrap();
        assert!(catalog.validate_context(&EvaluationContext::new()).is_empty());
    }
}
