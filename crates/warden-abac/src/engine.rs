//! The policy decision point.
//!
//! [`Engine`] owns the policy repository, the decision cache and the audit
//! and version stores. Evaluation runs in this order:
//!
//! ```text
//! validate context ─► cache lookup ─► snapshot ─► evaluate ─► cache write ─► audit
//!                          │ hit                                              ▲
//!                          └──────────────────────────────────────────────────┘
//! ```
//!
//! Administrative operations commit a new snapshot, record a policy version
//! when the change is structural, and clear the decision cache when the
//! change can alter a decision. The cache is cleared right after the new
//! snapshot is published and before anything else can fail, so every
//! evaluation issued after the operation returns observes the change, even
//! when the operation itself returns an error.

use std::sync::{Arc, MutexGuard};
use std::time::Instant;

use tracing::{debug, info, warn};
use warden_config::WardenConfig;
use warden_types::{
    Decision, IdempotencyKey, PolicyCombiningAlgorithm, PolicyId, PolicySetId, PolicyStatus,
    RuleCombiningAlgorithm, RuleId,
};

use crate::attributes::{AttributeRef, EvaluationContext};
use crate::audit::{AuditLog, AuditRecord, PolicyVersion, VersionStore};
use crate::cache::{CacheKey, CacheStats, DecisionCache};
use crate::catalog::{AttributeDefinition, CatalogViolation};
use crate::clock::{Clock, SystemClock};
use crate::condition::Condition;
use crate::error::{AbacError, Result};
use crate::evaluator::{self, EvaluationResult, Scope};
use crate::policy::{Policy, PolicySet, PolicySetSpec, PolicySpec};
use crate::rule::{Rule, RuleSpec};
use crate::store::{EntityRef, PolicySnapshot, PolicyStore, Transaction};

/// Who made an administrative change and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Change {
    /// Falls back to the configured default actor.
    pub actor: Option<String>,
    pub reason: String,
}

impl Change {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            actor: None,
            reason: reason.into(),
        }
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Per-request evaluation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluateOptions {
    pub use_cache: bool,
    /// Overrides the policy combining algorithm for this request.
    pub algorithm: Option<PolicyCombiningAlgorithm>,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            algorithm: None,
        }
    }
}

impl EvaluateOptions {
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_algorithm(mut self, algorithm: PolicyCombiningAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }
}

/// Attribute-based policy decision engine.
#[derive(Debug)]
pub struct Engine {
    store: PolicyStore,
    cache: DecisionCache,
    audit: AuditLog,
    versions: VersionStore,
    clock: Arc<dyn Clock>,
    algorithm: PolicyCombiningAlgorithm,
    default_actor: String,
    cache_enabled: bool,
    key_request_time: bool,
    log_decisions: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with the built-in default configuration.
    pub fn new() -> Self {
        Self::from_config(&WardenConfig::default())
    }

    pub fn from_config(config: &WardenConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an engine that reads time from `clock`.
    pub fn with_clock(config: &WardenConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: PolicyStore::default(),
            cache: DecisionCache::new(&config.cache, Arc::clone(&clock)),
            audit: AuditLog::new(),
            versions: VersionStore::new(),
            clock,
            algorithm: config.engine.policy_combining_algorithm,
            default_actor: config.engine.default_actor.clone(),
            cache_enabled: config.cache.enabled,
            key_request_time: config.cache.key_request_time,
            log_decisions: config.audit.log_decisions,
        }
    }

    // ------------------------------------------------------------------------
    // Attribute catalog
    // ------------------------------------------------------------------------

    /// Declares an attribute. Fails if the same category and name exist.
    pub fn define_attribute(&self, definition: AttributeDefinition) -> Result<AttributeDefinition> {
        let mut tx = self.store.begin()?;
        let defined = tx.draft_mut().catalog.define(definition)?.clone();
        let _writer = tx.commit()?;

        info!(
            attribute = %defined.reference(),
            attribute_type = %defined.attribute_type,
            required = defined.required,
            "Attribute defined"
        );
        Ok(defined)
    }

    pub fn attribute(&self, attribute: &AttributeRef) -> Result<Option<AttributeDefinition>> {
        Ok(self.store.load()?.catalog.get(attribute).cloned())
    }

    pub fn attributes(&self) -> Result<Vec<AttributeDefinition>> {
        Ok(self.store.load()?.catalog.iter().cloned().collect())
    }

    /// Checks a context against the declared attributes. Advisory only:
    /// evaluation does not consult the catalog.
    pub fn validate_context(&self, context: &EvaluationContext) -> Result<Vec<CatalogViolation>> {
        Ok(self.store.load()?.catalog.validate_context(context))
    }

    // ------------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------------

    /// Creates a rule. With an idempotency key, a repeated call returns the
    /// rule created by the first one.
    pub fn create_rule(&self, spec: RuleSpec) -> Result<Rule> {
        spec.validate()?;

        let mut tx = self.store.begin()?;
        if let Some(existing) = replayed(tx.draft(), spec.idempotency_key.as_ref()) {
            let EntityRef::Rule(id) = existing else {
                return Err(conflict(spec.idempotency_key.as_ref(), existing));
            };
            debug!(rule = %id, "Rule creation replayed");
            return tx
                .draft()
                .rules
                .get(&id)
                .cloned()
                .ok_or_else(|| AbacError::not_found("rule", id));
        }

        let id = tx.draft().next_rule_id();
        let key = spec.idempotency_key.clone();
        let rule = Rule::from_spec(id, spec, self.clock.now());

        let draft = tx.draft_mut();
        draft.rules.insert(id, rule.clone());
        if let Some(key) = key {
            draft.idempotency.insert(key, EntityRef::Rule(id));
        }
        let _writer = tx.commit()?;

        info!(
            rule = %id,
            name = %rule.name,
            effect = %rule.effect,
            priority = rule.priority,
            "Rule created"
        );
        Ok(rule)
    }

    /// Enables or disables a rule. The only mutation a rule allows.
    pub fn set_rule_enabled(&self, id: RuleId, enabled: bool) -> Result<Rule> {
        let mut tx = self.store.begin()?;
        let rule = tx
            .draft_mut()
            .rules
            .get_mut(&id)
            .ok_or_else(|| AbacError::not_found("rule", id))?;
        if rule.enabled == enabled {
            return Ok(rule.clone());
        }
        rule.enabled = enabled;
        let updated = rule.clone();

        let _writer = self.publish(tx)?;

        info!(rule = %id, enabled, "Rule toggled");
        Ok(updated)
    }

    pub fn rule(&self, id: RuleId) -> Result<Rule> {
        self.store
            .load()?
            .rules
            .get(&id)
            .cloned()
            .ok_or_else(|| AbacError::not_found("rule", id))
    }

    pub fn rules(&self) -> Result<Vec<Rule>> {
        Ok(self.store.load()?.rules.values().cloned().collect())
    }

    // ------------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------------

    /// Creates a policy in `DRAFT` at version 1 and records that version.
    ///
    /// Every referenced rule must exist.
    pub fn create_policy(&self, spec: PolicySpec, change: &Change) -> Result<Policy> {
        spec.validate()?;

        let mut tx = self.store.begin()?;
        if let Some(existing) = replayed(tx.draft(), spec.idempotency_key.as_ref()) {
            let EntityRef::Policy(id) = existing else {
                return Err(conflict(spec.idempotency_key.as_ref(), existing));
            };
            debug!(policy = %id, "Policy creation replayed");
            return tx
                .draft()
                .policies
                .get(&id)
                .cloned()
                .ok_or_else(|| AbacError::not_found("policy", id));
        }
        ensure_rules_exist(tx.draft(), &spec.rules)?;

        let now = self.clock.now();
        // Ids with recorded history are never handed out again.
        let unrecorded = self
            .versions
            .last_policy_id()?
            .map_or(PolicyId::new(1), |id| id.next());
        let id = tx.draft().next_policy_id().max(unrecorded);
        let key = spec.idempotency_key.clone();
        let policy = Policy::from_spec(id, spec, now);

        let draft = tx.draft_mut();
        draft.policies.insert(id, policy.clone());
        if let Some(key) = key {
            draft.idempotency.insert(key, EntityRef::Policy(id));
        }
        let _writer = tx.commit()?;

        let actor = self.actor(change);
        self.versions.append(PolicyVersion::of(
            &policy,
            actor.clone(),
            reason_or(change, "Policy created"),
            now,
        ))?;

        info!(
            policy = %id,
            name = %policy.name,
            rules = policy.rules.len(),
            actor = %actor,
            "Policy created"
        );
        Ok(policy)
    }

    pub fn activate_policy(&self, id: PolicyId) -> Result<Policy> {
        self.transition(id, PolicyStatus::Active)
    }

    pub fn disable_policy(&self, id: PolicyId) -> Result<Policy> {
        self.transition(id, PolicyStatus::Disabled)
    }

    /// Archives a policy. Archived policies can no longer change.
    pub fn archive_policy(&self, id: PolicyId) -> Result<Policy> {
        self.transition(id, PolicyStatus::Archived)
    }

    /// Replaces the policy's rule list. Rules are referenced, never edited:
    /// changing behavior means pointing at new rules.
    pub fn update_policy_rules(
        &self,
        id: PolicyId,
        rules: Vec<RuleId>,
        change: &Change,
    ) -> Result<Policy> {
        self.revise(id, change, "rules", |snapshot_rules, policy| {
            if let Some(missing) = rules.iter().find(|r| !snapshot_rules.contains_key(*r)) {
                return Err(AbacError::not_found("rule", missing));
            }
            policy.rules = rules;
            Ok(())
        })
    }

    pub fn set_policy_algorithm(
        &self,
        id: PolicyId,
        algorithm: RuleCombiningAlgorithm,
        change: &Change,
    ) -> Result<Policy> {
        self.revise(id, change, "algorithm", |_, policy| {
            policy.algorithm = algorithm;
            Ok(())
        })
    }

    pub fn set_policy_priority(&self, id: PolicyId, priority: i32, change: &Change) -> Result<Policy> {
        self.revise(id, change, "priority", |_, policy| {
            policy.priority = priority;
            Ok(())
        })
    }

    pub fn set_policy_target(
        &self,
        id: PolicyId,
        target: Vec<Condition>,
        change: &Change,
    ) -> Result<Policy> {
        for condition in &target {
            condition.validate()?;
        }
        self.revise(id, change, "target", |_, policy| {
            policy.target = target;
            Ok(())
        })
    }

    pub fn policy(&self, id: PolicyId) -> Result<Policy> {
        self.store
            .load()?
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| AbacError::not_found("policy", id))
    }

    pub fn policies(&self) -> Result<Vec<Policy>> {
        Ok(self.store.load()?.policies.values().cloned().collect())
    }

    /// Version history of a policy, oldest first.
    pub fn policy_versions(&self, id: PolicyId) -> Result<Vec<PolicyVersion>> {
        if !self.store.load()?.policies.contains_key(&id) {
            return Err(AbacError::not_found("policy", id));
        }
        self.versions.history(id)
    }

    // ------------------------------------------------------------------------
    // Policy sets
    // ------------------------------------------------------------------------

    pub fn create_policy_set(&self, spec: PolicySetSpec) -> Result<PolicySet> {
        spec.validate()?;

        let mut tx = self.store.begin()?;
        if let Some(missing) = spec
            .policies
            .iter()
            .find(|p| !tx.draft().policies.contains_key(*p))
        {
            return Err(AbacError::not_found("policy", missing));
        }

        let id = tx.draft().next_policy_set_id();
        let set = PolicySet::from_spec(id, spec, self.clock.now());
        tx.draft_mut().policy_sets.insert(id, set.clone());
        let _writer = tx.commit()?;

        info!(
            policy_set = %id,
            name = %set.name,
            members = set.policies.len(),
            algorithm = %set.algorithm,
            "Policy set created"
        );
        Ok(set)
    }

    pub fn policy_set(&self, id: PolicySetId) -> Result<PolicySet> {
        self.store
            .load()?
            .policy_sets
            .get(&id)
            .cloned()
            .ok_or_else(|| AbacError::not_found("policy set", id))
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// The current repository state.
    pub fn snapshot(&self) -> Result<Arc<PolicySnapshot>> {
        self.store.load()
    }

    /// Replaces the repository with `snapshot`.
    ///
    /// No referential checks are made: dangling rule references are kept
    /// and reported as diagnostics when evaluation meets them. Each imported
    /// policy that differs from its last recorded version gets a new version
    /// record. A policy whose version does not exceed its recorded history,
    /// as happens when an older backup is restored, is rebased to follow
    /// that history.
    pub fn import(&self, snapshot: PolicySnapshot, change: &Change) -> Result<()> {
        let now = self.clock.now();
        let actor = self.actor(change);
        let mut tx = self.store.begin()?;

        let mut snapshot = PolicySnapshot {
            generation: tx.draft().generation,
            ..snapshot
        };
        let mut records = Vec::new();
        for policy in snapshot.policies.values_mut() {
            let last = self.versions.last(policy.id)?;
            if last.as_ref().is_some_and(|v| v.describes(policy)) {
                continue;
            }
            if let Some(last) = last.filter(|v| v.version >= policy.version) {
                debug!(
                    policy = %policy.id,
                    imported = policy.version,
                    rebased = last.version + 1,
                    "Imported policy rebased onto its history"
                );
                policy.version = last.version + 1;
            }
            records.push(PolicyVersion::of(
                policy,
                actor.clone(),
                reason_or(change, "Imported snapshot"),
                now,
            ));
        }

        *tx.draft_mut() = snapshot;
        let imported = tx.draft().clone();
        let _writer = self.publish(tx)?;
        for record in records {
            self.versions.append(record)?;
        }

        for (policy, rule) in imported.dangling_rules() {
            warn!(policy = %policy, rule = %rule, "Imported policy references missing rule");
        }
        info!(
            rules = imported.rules.len(),
            policies = imported.policies.len(),
            policy_sets = imported.policy_sets.len(),
            actor = %actor,
            "Snapshot imported"
        );
        Ok(())
    }

    /// Parses a JSON snapshot and imports it.
    pub fn import_json(&self, json: &str, change: &Change) -> Result<()> {
        self.import(PolicySnapshot::from_json(json)?, change)
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Evaluates a request against every policy, using the cache.
    pub fn evaluate(&self, context: &EvaluationContext) -> EvaluationResult {
        self.evaluate_with(context, &EvaluateOptions::default())
    }

    pub fn evaluate_with(
        &self,
        context: &EvaluationContext,
        options: &EvaluateOptions,
    ) -> EvaluationResult {
        self.run(Scope::All, context, options)
    }

    /// Evaluates a request against the members of one policy set, combined
    /// with the set's algorithm unless `options` overrides it.
    pub fn evaluate_in_set(
        &self,
        set: PolicySetId,
        context: &EvaluationContext,
        options: &EvaluateOptions,
    ) -> EvaluationResult {
        self.run(Scope::Set(set), context, options)
    }

    fn run(
        &self,
        scope: Scope,
        context: &EvaluationContext,
        options: &EvaluateOptions,
    ) -> EvaluationResult {
        let started = Instant::now();

        let mut result = self.decide(scope, context, options).unwrap_or_else(|e| {
            warn!(error = %e, "Evaluation aborted");
            EvaluationResult::indeterminate(format!("Engine unavailable: {e}"))
        });
        result.elapsed_micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        result.audit_id = self.record(context, &result);
        result
    }

    fn decide(
        &self,
        scope: Scope,
        context: &EvaluationContext,
        options: &EvaluateOptions,
    ) -> Result<EvaluationResult> {
        if let Err(problem) = context.validate() {
            return Ok(EvaluationResult::indeterminate(format!(
                "Invalid context: {problem}"
            )));
        }

        // The epoch is read before the snapshot so that a write computed
        // against a snapshot superseded in between is refused.
        let slot = if self.cache_enabled && options.use_cache {
            let key = CacheKey::derive(context, scope, options.algorithm, self.key_request_time)?;
            let epoch = self.cache.epoch()?;
            if let Some(hit) = self.cache.lookup(&key)? {
                debug!(key = %key, decision = %hit.decision, "Decision cache hit");
                return Ok(hit.as_cache_hit());
            }
            Some((key, epoch))
        } else {
            None
        };

        let snapshot = self.store.load()?;
        let algorithm = options
            .algorithm
            .or_else(|| match scope {
                Scope::Set(id) => snapshot.policy_sets.get(&id).map(|s| s.algorithm),
                Scope::All => None,
            })
            .unwrap_or(self.algorithm);

        let result = evaluator::evaluate(&snapshot, context, scope, algorithm);

        for diagnostic in &result.diagnostics {
            warn!(diagnostic = %diagnostic, "Skipped missing rule during evaluation");
        }
        debug!(
            decision = %result.decision,
            policy = ?result.policy_id,
            rule = ?result.rule_id,
            policies_evaluated = result.policies_evaluated,
            rules_evaluated = result.rules_evaluated,
            algorithm = %algorithm,
            generation = snapshot.generation,
            "Request evaluated"
        );

        if let Some((key, epoch)) = slot {
            if result.decision != Decision::Indeterminate {
                self.cache.store(key, result.clone(), epoch)?;
            }
        }
        Ok(result)
    }

    fn record(&self, context: &EvaluationContext, result: &EvaluationResult) -> Option<uuid::Uuid> {
        let record = AuditRecord::new(self.clock.now(), context, result);

        if self.log_decisions {
            info!(
                audit_id = %record.id,
                subject = ?record.subject_id,
                resource = ?record.resource_id,
                action = ?record.action_id,
                decision = %record.decision,
                policy = ?record.policy_id,
                cached = record.cached,
                "Access decision"
            );
        }

        match self.audit.append(record) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Failed to append audit record");
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Stores
    // ------------------------------------------------------------------------

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats()
    }

    /// How often the live cache entry for this request has been served.
    /// `None` when no unexpired entry exists.
    pub fn cache_entry_hits(
        &self,
        scope: Scope,
        context: &EvaluationContext,
        options: &EvaluateOptions,
    ) -> Result<Option<u64>> {
        let key = CacheKey::derive(context, scope, options.algorithm, self.key_request_time)?;
        self.cache.entry_hits(&key)
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache.invalidate_all()
    }

    /// Drops expired cache entries ahead of their lazy eviction.
    pub fn purge_expired_cache(&self) -> Result<usize> {
        self.cache.purge_expired()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn actor(&self, change: &Change) -> String {
        change
            .actor
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.default_actor.clone())
    }

    /// Commits the draft and clears every decision cached against the
    /// snapshot it replaces.
    fn publish<'a>(&self, tx: Transaction<'a>) -> Result<MutexGuard<'a, ()>> {
        let writer = tx.commit()?;
        self.cache.invalidate_all()?;
        Ok(writer)
    }

    /// Applies a structural change: bumps the version by one, records it
    /// and clears the cache. Nothing is published when the new version
    /// would collide with recorded history.
    fn revise(
        &self,
        id: PolicyId,
        change: &Change,
        field: &'static str,
        apply: impl FnOnce(&std::collections::BTreeMap<RuleId, Rule>, &mut Policy) -> Result<()>,
    ) -> Result<Policy> {
        let now = self.clock.now();
        let mut tx = self.store.begin()?;

        let draft = tx.draft_mut();
        let policy = draft
            .policies
            .get_mut(&id)
            .ok_or_else(|| AbacError::not_found("policy", id))?;
        if policy.status == PolicyStatus::Archived {
            return Err(AbacError::Validation(format!("{id} is archived")));
        }
        apply(&draft.rules, policy)?;
        policy.version += 1;
        policy.updated_at = now;
        let updated = policy.clone();

        if let Some(latest) = self
            .versions
            .latest(id)?
            .filter(|latest| *latest >= updated.version)
        {
            return Err(AbacError::Validation(format!(
                "{id} would become version {} but history already records version {latest}",
                updated.version
            )));
        }

        let actor = self.actor(change);
        let record = PolicyVersion::of(
            &updated,
            actor.clone(),
            reason_or(change, &format!("Updated {field}")),
            now,
        );
        let _writer = self.publish(tx)?;
        self.versions.append(record)?;

        info!(
            policy = %id,
            version = updated.version,
            field,
            actor = %actor,
            "Policy revised"
        );
        Ok(updated)
    }

    fn transition(&self, id: PolicyId, to: PolicyStatus) -> Result<Policy> {
        let now = self.clock.now();
        let mut tx = self.store.begin()?;

        let policy = tx
            .draft_mut()
            .policies
            .get_mut(&id)
            .ok_or_else(|| AbacError::not_found("policy", id))?;
        let from = policy.status;
        if !from.can_transition_to(to) {
            return Err(AbacError::InvalidTransition {
                policy: id,
                from,
                to,
            });
        }
        policy.status = to;
        policy.updated_at = now;
        let updated = policy.clone();

        let _writer = self.publish(tx)?;

        info!(policy = %id, from = %from, to = %to, "Policy status changed");
        Ok(updated)
    }
}

fn replayed(snapshot: &PolicySnapshot, key: Option<&IdempotencyKey>) -> Option<EntityRef> {
    key.and_then(|k| snapshot.idempotency.get(k).copied())
}

fn conflict(key: Option<&IdempotencyKey>, existing: EntityRef) -> AbacError {
    AbacError::IdempotencyConflict {
        key: key.map(ToString::to_string).unwrap_or_default(),
        existing: existing.to_string(),
    }
}

fn ensure_rules_exist(snapshot: &PolicySnapshot, rules: &[RuleId]) -> Result<()> {
    match rules.iter().find(|r| !snapshot.rules.contains_key(*r)) {
        Some(missing) => Err(AbacError::not_found("rule", missing)),
        None => Ok(()),
    }
}

fn reason_or(change: &Change, default: &str) -> String {
    if change.reason.trim().is_empty() {
        default.to_string()
    } else {
        change.reason.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeCategory;
    use crate::catalog::AttributeType;
    use crate::clock::ManualClock;
    use chrono::{TimeDelta, TimeZone, Utc};
    use warden_types::Effect;

    fn engine() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap(),
        ));
        let engine = Engine::with_clock(&WardenConfig::default(), Arc::clone(&clock) as Arc<dyn Clock>);
        (engine, clock)
    }

    fn allow_admins(engine: &Engine) -> (RuleId, PolicyId) {
        let rule = engine
            .create_rule(
                RuleSpec::new("AdminAccess", Effect::Allow)
                    .with_condition(Condition::equals("subject.role", "admin").unwrap())
                    .with_priority(100),
            )
            .unwrap();
        let policy = engine
            .create_policy(PolicySpec::new("P1").with_rule(rule.id), &Change::default())
            .unwrap();
        (rule.id, policy.id)
    }

    #[test]
    fn ids_are_allocated_monotonically() {
        let (engine, _) = engine();
        let a = engine.create_rule(RuleSpec::new("a", Effect::Allow)).unwrap();
        let b = engine.create_rule(RuleSpec::new("b", Effect::Deny)).unwrap();
        assert_eq!(a.id, RuleId::new(1));
        assert_eq!(b.id, RuleId::new(2));
    }

    #[test]
    fn idempotent_rule_creation() {
        let (engine, _) = engine();
        let key = IdempotencyKey::new("req-1").unwrap();
        let first = engine
            .create_rule(RuleSpec::new("a", Effect::Allow).with_idempotency_key(key.clone()))
            .unwrap();
        let again = engine
            .create_rule(RuleSpec::new("other", Effect::Deny).with_idempotency_key(key.clone()))
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(engine.rules().unwrap().len(), 1);

        let err = engine
            .create_policy(
                PolicySpec::new("p").with_idempotency_key(key),
                &Change::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AbacError::IdempotencyConflict { .. }));
    }

    #[test]
    fn create_policy_rejects_unknown_rules() {
        let (engine, _) = engine();
        let err = engine
            .create_policy(
                PolicySpec::new("p").with_rule(RuleId::new(5)),
                &Change::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AbacError::NotFound { kind: "rule", .. }));
    }

    #[test]
    fn invalid_rule_is_rejected_at_creation() {
        let (engine, _) = engine();
        let bad = RuleSpec::new("between", Effect::Allow).with_condition(
            Condition::on("subject.age", crate::condition::Operator::IsBetween)
                .unwrap()
                .with_values([1]),
        );
        assert!(matches!(
            engine.create_rule(bad),
            Err(AbacError::Validation(_))
        ));
        assert!(engine.rules().unwrap().is_empty());
    }

    #[test]
    fn lifecycle_transitions() {
        let (engine, _) = engine();
        let (_, policy) = allow_admins(&engine);

        assert!(matches!(
            engine.disable_policy(policy),
            Err(AbacError::InvalidTransition { .. })
        ));
        assert_eq!(
            engine.activate_policy(policy).unwrap().status,
            PolicyStatus::Active
        );
        assert_eq!(
            engine.disable_policy(policy).unwrap().status,
            PolicyStatus::Disabled
        );
        assert_eq!(
            engine.activate_policy(policy).unwrap().status,
            PolicyStatus::Active
        );
        engine.archive_policy(policy).unwrap();
        assert!(engine.activate_policy(policy).is_err());
        assert!(
            engine
                .set_policy_priority(policy, 3, &Change::default())
                .is_err()
        );
    }

    #[test]
    fn structural_changes_bump_version_once() {
        let (engine, _) = engine();
        let (rule, policy) = allow_admins(&engine);
        let other = engine.create_rule(RuleSpec::new("deny", Effect::Deny)).unwrap();

        engine
            .set_policy_priority(policy, 7, &Change::new("raise").by("alice"))
            .unwrap();
        engine
            .update_policy_rules(policy, vec![rule, other.id], &Change::default())
            .unwrap();
        engine
            .set_policy_algorithm(
                policy,
                RuleCombiningAlgorithm::AllowOverrides,
                &Change::default(),
            )
            .unwrap();
        // Status changes are not structural.
        engine.activate_policy(policy).unwrap();

        let current = engine.policy(policy).unwrap();
        assert_eq!(current.version, 4);

        let versions = engine.policy_versions(policy).unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(versions[0].changed_by, "system");
        assert_eq!(versions[0].change_reason, "Policy created");
        assert_eq!(versions[1].changed_by, "alice");
        assert_eq!(versions[1].change_reason, "raise");
        assert_eq!(versions[1].priority, 7);
        assert_eq!(versions[2].rules, vec![rule, other.id]);
        assert_eq!(versions[2].change_reason, "Updated rules");
    }

    #[test]
    fn update_rules_rejects_unknown_rule() {
        let (engine, _) = engine();
        let (_, policy) = allow_admins(&engine);
        assert!(
            engine
                .update_policy_rules(policy, vec![RuleId::new(77)], &Change::default())
                .is_err()
        );
        assert_eq!(engine.policy(policy).unwrap().version, 1);
        assert_eq!(engine.policy_versions(policy).unwrap().len(), 1);
    }

    #[test]
    fn catalog_round_trip() {
        let (engine, _) = engine();
        let def = AttributeDefinition::new("role", AttributeCategory::Subject, AttributeType::String)
            .required();
        engine.define_attribute(def.clone()).unwrap();
        assert!(matches!(
            engine.define_attribute(def),
            Err(AbacError::DuplicateAttribute(_))
        ));
        assert!(
            engine
                .attribute(&AttributeRef::subject("role"))
                .unwrap()
                .is_some()
        );
        assert_eq!(engine.attributes().unwrap().len(), 1);
        assert_eq!(
            engine
                .validate_context(&EvaluationContext::new())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn activation_invalidates_cached_decisions() {
        let (engine, _) = engine();
        let (_, policy) = allow_admins(&engine);
        let ctx = EvaluationContext::new().with_subject("role", "admin");

        let before = engine.evaluate(&ctx);
        assert_eq!(before.decision, Decision::NotApplicable);

        engine.activate_policy(policy).unwrap();
        let after = engine.evaluate(&ctx);
        assert_eq!(after.decision, Decision::Permit);
        assert!(!after.cached);
        assert_eq!(engine.cache_stats().unwrap().invalidations, 1);
    }

    #[test]
    fn disabling_a_rule_invalidates_cached_decisions() {
        let (engine, _) = engine();
        let (rule, policy) = allow_admins(&engine);
        engine.activate_policy(policy).unwrap();
        let ctx = EvaluationContext::new().with_subject("role", "admin");

        assert!(engine.evaluate(&ctx).is_permit());
        assert!(engine.evaluate(&ctx).cached);

        engine.set_rule_enabled(rule, false).unwrap();
        let result = engine.evaluate(&ctx);
        assert!(!result.cached);
        assert_eq!(result.decision, Decision::NotApplicable);
    }

    #[test]
    fn cache_entries_expire_after_ttl() {
        let (engine, clock) = engine();
        let (_, policy) = allow_admins(&engine);
        engine.activate_policy(policy).unwrap();
        let ctx = EvaluationContext::new().with_subject("role", "admin");

        engine.evaluate(&ctx);
        clock.advance(TimeDelta::seconds(299));
        assert!(engine.evaluate(&ctx).cached);
        clock.advance(TimeDelta::seconds(1));
        assert!(!engine.evaluate(&ctx).cached);
    }

    #[test]
    fn invalid_context_is_indeterminate_and_audited() {
        let (engine, _) = engine();
        let ctx = EvaluationContext::new().with_subject("", "x");
        let result = engine.evaluate(&ctx);
        assert_eq!(result.decision, Decision::Indeterminate);
        assert!(result.reason.starts_with("Invalid context"));
        assert!(result.audit_id.is_some());
        assert_eq!(engine.audit_log().len().unwrap(), 1);
    }

    #[test]
    fn request_algorithm_override() {
        let (engine, _) = engine();
        let allow = engine.create_rule(RuleSpec::new("allow", Effect::Allow)).unwrap();
        let deny = engine.create_rule(RuleSpec::new("deny", Effect::Deny)).unwrap();
        let high = engine
            .create_policy(
                PolicySpec::new("high").with_rule(allow.id).with_priority(10),
                &Change::default(),
            )
            .unwrap();
        let low = engine
            .create_policy(
                PolicySpec::new("low").with_rule(deny.id).with_priority(1),
                &Change::default(),
            )
            .unwrap();
        engine.activate_policy(high.id).unwrap();
        engine.activate_policy(low.id).unwrap();

        let ctx = EvaluationContext::new();
        assert_eq!(engine.evaluate(&ctx).decision, Decision::Deny);

        let first = engine.evaluate_with(
            &ctx,
            &EvaluateOptions::default()
                .with_algorithm(PolicyCombiningAlgorithm::FirstApplicableByPriority),
        );
        assert_eq!(first.decision, Decision::Permit);
        assert!(!first.cached);
    }

    #[test]
    fn evaluate_in_policy_set() {
        let (engine, _) = engine();
        let (_, admin_policy) = allow_admins(&engine);
        engine.activate_policy(admin_policy).unwrap();
        let set = engine
            .create_policy_set(
                PolicySetSpec::new("records", [admin_policy])
                    .with_target(Condition::equals("resource.type", "record").unwrap()),
            )
            .unwrap();

        let ctx = EvaluationContext::new().with_subject("role", "admin");
        let miss = engine.evaluate_in_set(set.id, &ctx, &EvaluateOptions::default());
        assert_eq!(miss.decision, Decision::NotApplicable);
        assert_eq!(miss.reason, "Policy set target did not match");

        let hit = engine.evaluate_in_set(
            set.id,
            &ctx.clone().with_resource("type", "record"),
            &EvaluateOptions::default(),
        );
        assert!(hit.is_permit());

        assert!(
            engine
                .create_policy_set(PolicySetSpec::new("bad", [PolicyId::new(99)]))
                .is_err()
        );
    }

    #[test]
    fn import_keeps_dangling_references() {
        let (engine, _) = engine();
        let (_, policy) = allow_admins(&engine);
        engine.activate_policy(policy).unwrap();

        let mut snapshot = (*engine.snapshot().unwrap()).clone();
        snapshot.rules.clear();
        let json = snapshot.to_json().unwrap();

        let source = engine.snapshot().unwrap().generation;
        engine.import_json(&json, &Change::new("restore")).unwrap();
        assert!(engine.snapshot().unwrap().generation > source);

        let result = engine.evaluate(&EvaluationContext::new().with_subject("role", "admin"));
        assert_eq!(result.decision, Decision::NotApplicable);
        assert_eq!(result.diagnostics.len(), 1);
        // Version 1 was already recorded, so nothing new was appended.
        assert_eq!(engine.policy_versions(policy).unwrap().len(), 1);
    }

    #[test]
    fn restoring_an_older_backup_rebases_onto_history() {
        let (engine, _) = engine();
        let (_, policy) = allow_admins(&engine);
        let backup = engine.snapshot().unwrap().to_json().unwrap();
        engine
            .set_policy_priority(policy, 10, &Change::new("raise"))
            .unwrap();

        engine.import_json(&backup, &Change::new("restore")).unwrap();
        let restored = engine.policy(policy).unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.priority, 0);

        let history = engine.policy_versions(policy).unwrap();
        let versions: Vec<u64> = history.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(history[2].change_reason, "restore");
        assert_eq!(history[2].priority, 0);

        let revised = engine
            .set_policy_priority(policy, 5, &Change::default())
            .unwrap();
        assert_eq!(revised.version, 4);
        assert_eq!(engine.policy_versions(policy).unwrap().len(), 4);
    }

    #[test]
    fn reimporting_the_current_state_records_nothing() {
        let (engine, _) = engine();
        let (_, policy) = allow_admins(&engine);
        engine
            .set_policy_priority(policy, 10, &Change::default())
            .unwrap();
        let current = engine.snapshot().unwrap().to_json().unwrap();

        engine.import_json(&current, &Change::default()).unwrap();
        assert_eq!(engine.policy(policy).unwrap().version, 2);
        assert_eq!(engine.policy_versions(policy).unwrap().len(), 2);
    }

    #[test]
    fn policy_ids_with_history_are_not_reused() {
        let (engine, _) = engine();
        let (rule, first) = allow_admins(&engine);
        let dropped = engine
            .create_policy(PolicySpec::new("P2").with_rule(rule), &Change::default())
            .unwrap();

        let mut snapshot = (*engine.snapshot().unwrap()).clone();
        snapshot.policies.remove(&dropped.id);
        engine.import(snapshot, &Change::default()).unwrap();

        let created = engine
            .create_policy(PolicySpec::new("P3").with_rule(rule), &Change::default())
            .unwrap();
        assert!(created.id > dropped.id);
        assert_ne!(created.id, first);
        assert_eq!(engine.policy_versions(created.id).unwrap().len(), 1);
    }
}
