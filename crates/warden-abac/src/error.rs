//! Error types for the decision engine.
//!
//! Only administrative operations return errors. Evaluation never does:
//! missing attributes and type mismatches degrade to `false`, and engine
//! faults surface as an `INDETERMINATE` decision.

use thiserror::Error;
use warden_types::{PolicyId, PolicyStatus, TypeError};

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AbacError {
    /// A rule, policy, condition or attribute definition is malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operator name is not one of the supported operators.
    #[error("Unknown operator: '{0}'")]
    UnknownOperator(String),

    /// The attribute name carries a category prefix that does not exist.
    #[error("Unknown attribute category in '{0}'")]
    UnknownCategory(String),

    /// Shared-type parse failure (combining algorithm, status, effect).
    #[error(transparent)]
    Type(#[from] TypeError),

    /// The referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An attribute with the same category and name is already declared.
    #[error("Attribute already defined: {0}")]
    DuplicateAttribute(String),

    /// The policy lifecycle does not allow this status change.
    #[error("Invalid status transition for {policy}: {from} -> {to}")]
    InvalidTransition {
        policy: PolicyId,
        from: PolicyStatus,
        to: PolicyStatus,
    },

    /// The idempotency key was already used to create a different kind of entity.
    #[error("Idempotency key '{key}' already used for {existing}")]
    IdempotencyConflict { key: String, existing: String },

    /// A shared lock was poisoned by a panicking writer.
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    /// Snapshot or audit export failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AbacError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, AbacError>;
