//! # warden-abac: Attribute-Based Access Control
//!
//! A policy decision point: takes a request described by subject, resource,
//! action and environment attributes and decides PERMIT, DENY,
//! NOT_APPLICABLE or INDETERMINATE by evaluating rules and policies under
//! configurable combining algorithms.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Access Request (EvaluationContext)          │
//! │  subject / resource / action / environment   │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Engine                                      │
//! │  ├─ Decision cache (canonical key, TTL)      │
//! │  ├─ Policy snapshot (copy-on-write)          │
//! │  ├─ Policy engine: target, priority, combine │
//! │  ├─ Rule engine: enabled, window, conditions │
//! │  └─ Condition evaluator (fail-closed)        │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  EvaluationResult + AuditRecord              │
//! │  - Decision                                  │
//! │  - Deciding policy and rule                  │
//! │  - Human-readable reason                     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Missing attributes never raise errors. Positive operators evaluate to
//! false and negative ones to true, so a data-quality gap cannot grant
//! access.
//!
//! ## Examples
//!
//! ```
//! use warden_abac::{Change, Condition, Engine, EvaluationContext, PolicySpec, RuleSpec};
//! use warden_types::{Decision, Effect};
//!
//! let engine = Engine::new();
//!
//! let rule = engine
//!     .create_rule(
//!         RuleSpec::new("AdminAccess", Effect::Allow)
//!             .with_condition(Condition::equals("subject.role", "admin")?)
//!             .with_priority(100),
//!     )?;
//! let policy = engine.create_policy(
//!     PolicySpec::new("P1").with_rule(rule.id),
//!     &Change::new("initial import").by("security-team"),
//! )?;
//! engine.activate_policy(policy.id)?;
//!
//! let ctx = EvaluationContext::new().with_subject("role", "admin");
//! let result = engine.evaluate(&ctx);
//! assert_eq!(result.decision, Decision::Permit);
//! assert_eq!(result.policy_id, Some(policy.id));
//! # Ok::<(), warden_abac::AbacError>(())
//! ```

pub mod attributes;
pub mod audit;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod condition;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod policy;
pub mod rule;
pub mod store;

pub use attributes::{AttributeCategory, AttributeRef, AttributeValue, EvaluationContext};
pub use audit::{AuditLog, AuditQuery, AuditRecord, PolicyVersion};
pub use cache::{CacheKey, CacheStats};
pub use catalog::{AttributeDefinition, AttributeType, CatalogViolation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{Condition, Operator};
pub use engine::{Change, Engine, EvaluateOptions};
pub use error::{AbacError, Result};
pub use evaluator::{EvaluationResult, Scope};
pub use policy::{Policy, PolicySet, PolicySetSpec, PolicySpec};
pub use rule::{Rule, RuleSpec, TemporalWindow};
pub use store::PolicySnapshot;
