//! Append-only decision audit log and policy version history.
//!
//! Neither store exposes update or delete. Every top-level evaluation
//! appends exactly one [`AuditRecord`], cache hits included; every
//! structural policy change appends exactly one [`PolicyVersion`].

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_types::{
    Decision, PolicyId, PolicyStatus, RuleCombiningAlgorithm, RuleId,
};

use crate::attributes::{AttributeCategory, EvaluationContext};
use crate::condition::Condition;
use crate::error::{AbacError, Result};
use crate::evaluator::EvaluationResult;
use crate::policy::Policy;

// ============================================================================
// Decision Audit
// ============================================================================

/// One evaluated request.
///
/// Holds the full context by value so a decision can be explained after the
/// caller has dropped or changed its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub subject_id: Option<String>,
    pub resource_id: Option<String>,
    pub action_id: Option<String>,
    pub decision: Decision,
    pub policy_id: Option<PolicyId>,
    pub rule_id: Option<RuleId>,
    pub reason: String,
    pub cached: bool,
    pub elapsed_micros: u64,
    #[serde(default)]
    pub diagnostics: Vec<String>,
    pub context: EvaluationContext,
}

impl AuditRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        context: &EvaluationContext,
        result: &EvaluationResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            subject_id: context.identifier(AttributeCategory::Subject),
            resource_id: context.identifier(AttributeCategory::Resource),
            action_id: context.identifier(AttributeCategory::Action),
            decision: result.decision,
            policy_id: result.policy_id,
            rule_id: result.rule_id,
            reason: result.reason.clone(),
            cached: result.cached,
            elapsed_micros: result.elapsed_micros,
            diagnostics: result.diagnostics.clone(),
            context: context.clone(),
        }
    }
}

/// Filter for [`AuditLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub subject_id: Option<String>,
    pub resource_id: Option<String>,
    pub decision: Option<Decision>,
    pub policy_id: Option<PolicyId>,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn with_subject(mut self, subject_id: &str) -> Self {
        self.subject_id = Some(subject_id.to_string());
        self
    }

    pub fn with_resource(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_policy(mut self, policy_id: PolicyId) -> Self {
        self.policy_id = Some(policy_id);
        self
    }

    /// Filter to records within a time range (inclusive).
    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.time_from = Some(from);
        self.time_to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        if self
            .subject_id
            .as_ref()
            .is_some_and(|s| record.subject_id.as_ref() != Some(s))
        {
            return false;
        }
        if self
            .resource_id
            .as_ref()
            .is_some_and(|r| record.resource_id.as_ref() != Some(r))
        {
            return false;
        }
        if self.decision.is_some_and(|d| record.decision != d) {
            return false;
        }
        if self.policy_id.is_some_and(|p| record.policy_id != Some(p)) {
            return false;
        }
        if self.time_from.is_some_and(|from| record.timestamp < from) {
            return false;
        }
        if self.time_to.is_some_and(|to| record.timestamp > to) {
            return false;
        }
        true
    }
}

/// Append-only log of evaluated requests.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: AuditRecord) -> Result<Uuid> {
        let id = record.id;
        self.records
            .write()
            .map_err(|_| AbacError::LockPoisoned("audit log"))?
            .push(record);
        Ok(id)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<AuditRecord>> {
        Ok(self.read()?.iter().find(|r| r.id == id).cloned())
    }

    /// Records matching `filter`, oldest first.
    pub fn query(&self, filter: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let records = self.read()?;
        let matching = records.iter().filter(|r| filter.matches(r)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    /// Export matching records as pretty-printed JSON.
    pub fn export_json(&self, filter: &AuditQuery) -> Result<String> {
        let records = self.query(filter)?;
        Ok(serde_json::to_string_pretty(&records)?)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<AuditRecord>>> {
        self.records
            .read()
            .map_err(|_| AbacError::LockPoisoned("audit log"))
    }
}

// ============================================================================
// Policy Versions
// ============================================================================

/// The behavior-relevant state of a policy at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub policy_id: PolicyId,
    pub version: u64,
    pub rules: Vec<RuleId>,
    pub target: Vec<Condition>,
    pub algorithm: RuleCombiningAlgorithm,
    pub priority: i32,
    pub status: PolicyStatus,
    pub changed_by: String,
    pub change_reason: String,
    pub created_at: DateTime<Utc>,
}

impl PolicyVersion {
    pub fn of(
        policy: &Policy,
        changed_by: impl Into<String>,
        change_reason: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            policy_id: policy.id,
            version: policy.version,
            rules: policy.rules.clone(),
            target: policy.target.clone(),
            algorithm: policy.algorithm,
            priority: policy.priority,
            status: policy.status,
            changed_by: changed_by.into(),
            change_reason: change_reason.into(),
            created_at,
        }
    }

    /// Whether this record captures the structure of `policy`, version
    /// included. Status is ignored since transitions are not versioned.
    pub fn describes(&self, policy: &Policy) -> bool {
        self.policy_id == policy.id
            && self.version == policy.version
            && self.rules == policy.rules
            && self.target == policy.target
            && self.algorithm == policy.algorithm
            && self.priority == policy.priority
    }
}

/// Append-only history of policy versions.
#[derive(Debug, Default)]
pub struct VersionStore {
    versions: RwLock<BTreeMap<PolicyId, Vec<PolicyVersion>>>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a version. A policy's versions must arrive in increasing
    /// order; a record for a version that already exists is rejected.
    pub fn append(&self, version: PolicyVersion) -> Result<()> {
        let mut versions = self
            .versions
            .write()
            .map_err(|_| AbacError::LockPoisoned("version store"))?;
        let history = versions.entry(version.policy_id).or_default();
        if history.last().is_some_and(|v| v.version >= version.version) {
            return Err(AbacError::Validation(format!(
                "{} already has version {}",
                version.policy_id, version.version
            )));
        }
        history.push(version);
        Ok(())
    }

    /// All recorded versions of a policy, oldest first.
    pub fn history(&self, policy_id: PolicyId) -> Result<Vec<PolicyVersion>> {
        Ok(self.read()?.get(&policy_id).cloned().unwrap_or_default())
    }

    pub fn version(&self, policy_id: PolicyId, version: u64) -> Result<Option<PolicyVersion>> {
        Ok(self
            .read()?
            .get(&policy_id)
            .and_then(|h| h.iter().find(|v| v.version == version))
            .cloned())
    }

    pub fn latest(&self, policy_id: PolicyId) -> Result<Option<u64>> {
        Ok(self
            .read()?
            .get(&policy_id)
            .and_then(|h| h.last())
            .map(|v| v.version))
    }

    /// The most recent record of a policy.
    pub fn last(&self, policy_id: PolicyId) -> Result<Option<PolicyVersion>> {
        Ok(self.read()?.get(&policy_id).and_then(|h| h.last()).cloned())
    }

    /// The highest policy id with any recorded history. Ids stay reserved
    /// after their policy leaves the repository.
    pub fn last_policy_id(&self) -> Result<Option<PolicyId>> {
        Ok(self.read()?.keys().next_back().copied())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<PolicyId, Vec<PolicyVersion>>>> {
        self.versions
            .read()
            .map_err(|_| AbacError::LockPoisoned("version store"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicySpec;
    use chrono::{TimeDelta, TimeZone};

    fn record(at: DateTime<Utc>, subject: &str, decision: Decision) -> AuditRecord {
        let ctx = EvaluationContext::new()
            .with_subject("id", subject)
            .with_resource("id", "doc-1");
        let result = EvaluationResult {
            decision,
            ..EvaluationResult::not_applicable("test")
        };
        AuditRecord::new(at, &ctx, &result)
    }

    #[test]
    fn audit_record_snapshots_context() {
        let mut ctx = EvaluationContext::new().with_subject("id", "alice");
        let r = AuditRecord::new(
            Utc::now(),
            &ctx,
            &EvaluationResult::not_applicable("No applicable policies"),
        );
        ctx.subject.clear();
        assert_eq!(r.subject_id.as_deref(), Some("alice"));
        assert_eq!(r.context.subject.len(), 1);
        assert_eq!(r.resource_id, None);
    }

    #[test]
    fn query_filters_and_limits() {
        let t0 = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let log = AuditLog::new();
        log.append(record(t0, "alice", Decision::Permit)).unwrap();
        log.append(record(t0 + TimeDelta::hours(1), "bob", Decision::Deny))
            .unwrap();
        log.append(record(t0 + TimeDelta::hours(2), "alice", Decision::Deny))
            .unwrap();

        assert_eq!(log.len().unwrap(), 3);
        assert_eq!(
            log.query(&AuditQuery::default().with_subject("alice"))
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            log.query(&AuditQuery::default().with_decision(Decision::Deny))
                .unwrap()
                .len(),
            2
        );
        let window = AuditQuery::default().with_time_range(t0, t0 + TimeDelta::hours(1));
        assert_eq!(log.query(&window).unwrap().len(), 2);

        let limited = log.query(&AuditQuery::default().with_limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].subject_id.as_deref(), Some("alice"));
    }

    #[test]
    fn export_json_and_lookup() {
        let log = AuditLog::new();
        let id = log
            .append(record(Utc::now(), "alice", Decision::Permit))
            .unwrap();
        assert!(log.get(id).unwrap().is_some());

        let json = log
            .export_json(&AuditQuery::default().with_resource("doc-1"))
            .unwrap();
        let parsed: Vec<AuditRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, id);
    }

    #[test]
    fn versions_are_append_only_and_ordered() {
        let store = VersionStore::new();
        let mut policy = Policy::from_spec(PolicyId::new(1), PolicySpec::new("p"), Utc::now());

        store
            .append(PolicyVersion::of(&policy, "alice", "created", Utc::now()))
            .unwrap();
        assert!(
            store
                .append(PolicyVersion::of(&policy, "alice", "again", Utc::now()))
                .is_err()
        );

        policy.version = 2;
        policy.priority = 9;
        store
            .append(PolicyVersion::of(&policy, "bob", "priority", Utc::now()))
            .unwrap();

        let history = store.history(PolicyId::new(1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].changed_by, "bob");
        assert_eq!(store.latest(PolicyId::new(1)).unwrap(), Some(2));
        assert_eq!(
            store.version(PolicyId::new(1), 1).unwrap().unwrap().priority,
            0
        );
        assert!(store.history(PolicyId::new(2)).unwrap().is_empty());
    }
}
