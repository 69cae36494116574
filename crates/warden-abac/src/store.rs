//! Copy-on-write policy repository.
//!
//! Readers take an `Arc` to the current [`PolicySnapshot`] and evaluate
//! against it without holding any lock. Writers serialize on a mutex, mutate
//! a private copy, and publish it with a single pointer swap, so a reader
//! sees either the whole old state or the whole new state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use warden_types::{IdempotencyKey, PolicyId, PolicySetId, RuleId};

use crate::catalog::AttributeCatalog;
use crate::error::{AbacError, Result};
use crate::policy::{Policy, PolicySet};
use crate::rule::Rule;

/// The entity an idempotency key was first used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    Rule(RuleId),
    Policy(PolicyId),
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rule(id) => write!(f, "{id}"),
            Self::Policy(id) => write!(f, "{id}"),
        }
    }
}

/// An immutable view of every rule, policy and attribute definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySnapshot {
    pub catalog: AttributeCatalog,
    pub rules: BTreeMap<RuleId, Rule>,
    pub policies: BTreeMap<PolicyId, Policy>,
    pub policy_sets: BTreeMap<PolicySetId, PolicySet>,
    pub idempotency: BTreeMap<IdempotencyKey, EntityRef>,
    /// Bumped on every committed change.
    pub generation: u64,
}

impl PolicySnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub(crate) fn next_rule_id(&self) -> RuleId {
        self.rules
            .keys()
            .next_back()
            .map_or(RuleId::new(1), RuleId::next)
    }

    pub(crate) fn next_policy_id(&self) -> PolicyId {
        self.policies
            .keys()
            .next_back()
            .map_or(PolicyId::new(1), PolicyId::next)
    }

    pub(crate) fn next_policy_set_id(&self) -> PolicySetId {
        self.policy_sets
            .keys()
            .next_back()
            .map_or(PolicySetId::new(1), PolicySetId::next)
    }

    /// Rule references of every policy that do not resolve.
    pub fn dangling_rules(&self) -> Vec<(PolicyId, RuleId)> {
        self.policies
            .values()
            .flat_map(|p| {
                p.rules
                    .iter()
                    .filter(|r| !self.rules.contains_key(*r))
                    .map(move |r| (p.id, *r))
            })
            .collect()
    }

    /// Everything in the snapshot that creation-time validation would have
    /// rejected. Imports skip these checks, so a loaded file may carry them.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for rule in self.rules.values() {
            for condition in &rule.conditions {
                if let Err(e) = condition.validate() {
                    problems.push(format!("{} '{}': {e}", rule.id, rule.name));
                }
            }
            if let Err(e) = rule.temporal.validate() {
                problems.push(format!("{} '{}': {e}", rule.id, rule.name));
            }
        }

        for policy in self.policies.values() {
            for condition in &policy.target {
                if let Err(e) = condition.validate() {
                    problems.push(format!("{} '{}': {e}", policy.id, policy.name));
                }
            }
        }

        for set in self.policy_sets.values() {
            for condition in &set.target {
                if let Err(e) = condition.validate() {
                    problems.push(format!("{} '{}': {e}", set.id, set.name));
                }
            }
            for member in set.policies.iter().filter(|p| !self.policies.contains_key(*p)) {
                problems.push(format!("{} '{}' references missing {member}", set.id, set.name));
            }
        }

        problems
    }
}

/// Holds the current snapshot and serializes writers.
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
    writer: Mutex<()>,
}

impl PolicyStore {
    /// Returns the current snapshot.
    pub fn load(&self) -> Result<Arc<PolicySnapshot>> {
        let guard = self
            .current
            .read()
            .map_err(|_| AbacError::LockPoisoned("policy store"))?;
        Ok(Arc::clone(&guard))
    }

    /// Starts a write. Other writers block until the returned transaction
    /// (or the guard returned by [`Transaction::commit`]) is dropped.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        let guard = self
            .writer
            .lock()
            .map_err(|_| AbacError::LockPoisoned("policy writer"))?;
        let draft = (*self.load()?).clone();
        Ok(Transaction {
            store: self,
            guard,
            draft,
        })
    }
}

/// A private copy of the snapshot being edited by the single active writer.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a PolicyStore,
    guard: MutexGuard<'a, ()>,
    draft: PolicySnapshot,
}

impl<'a> Transaction<'a> {
    pub fn draft(&self) -> &PolicySnapshot {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut PolicySnapshot {
        &mut self.draft
    }

    /// Publishes the draft. The returned guard keeps other writers out so
    /// the caller can finish follow-up work (version records, cache
    /// invalidation) before the next change starts.
    pub fn commit(self) -> Result<MutexGuard<'a, ()>> {
        let Transaction {
            store,
            guard,
            mut draft,
        } = self;
        draft.generation += 1;

        let mut current = store
            .current
            .write()
            .map_err(|_| AbacError::LockPoisoned("policy store"))?;
        *current = Arc::new(draft);
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicySpec;
    use chrono::Utc;

    #[test]
    fn readers_keep_their_snapshot_across_commits() {
        let store = PolicyStore::default();
        let before = store.load().unwrap();

        let mut tx = store.begin().unwrap();
        let id = tx.draft().next_policy_id();
        tx.draft_mut()
            .policies
            .insert(id, Policy::from_spec(id, PolicySpec::new("p"), Utc::now()));
        drop(tx.commit().unwrap());

        let after = store.load().unwrap();
        assert!(before.policies.is_empty());
        assert_eq!(before.generation, 0);
        assert_eq!(after.policies.len(), 1);
        assert_eq!(after.generation, 1);
    }

    #[test]
    fn dropped_transaction_publishes_nothing() {
        let store = PolicyStore::default();
        {
            let mut tx = store.begin().unwrap();
            tx.draft_mut().generation = 42;
        }
        assert_eq!(store.load().unwrap().generation, 0);
    }

    #[test]
    fn ids_follow_the_largest_allocated() {
        let mut snapshot = PolicySnapshot::default();
        assert_eq!(snapshot.next_policy_id(), PolicyId::new(1));
        snapshot.policies.insert(
            PolicyId::new(5),
            Policy::from_spec(PolicyId::new(5), PolicySpec::new("p"), Utc::now()),
        );
        assert_eq!(snapshot.next_policy_id(), PolicyId::new(6));
    }

    #[test]
    fn snapshot_json_roundtrip_keeps_maps() {
        let mut snapshot = PolicySnapshot::default();
        let id = PolicyId::new(3);
        snapshot.policies.insert(
            id,
            Policy::from_spec(id, PolicySpec::new("p").with_rule(RuleId::new(9)), Utc::now()),
        );
        let json = snapshot.to_json().unwrap();
        let back = PolicySnapshot::from_json(&json).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.dangling_rules(), vec![(id, RuleId::new(9))]);
    }

    #[test]
    fn problems_report_malformed_imported_entities() {
        use crate::condition::{Condition, Operator};
        use crate::rule::RuleSpec;
        use warden_types::Effect;

        let mut snapshot = PolicySnapshot::default();
        let rule_id = RuleId::new(1);
        let spec = RuleSpec::new("broken", Effect::Allow)
            .with_condition(Condition::on("subject.level", Operator::IsBetween).unwrap());
        snapshot
            .rules
            .insert(rule_id, Rule::from_spec(rule_id, spec, Utc::now()));

        let set_id = PolicySetId::new(1);
        let set = PolicySet::from_spec(
            set_id,
            crate::policy::PolicySetSpec::new("s", [PolicyId::new(4)]),
            Utc::now(),
        );
        snapshot.policy_sets.insert(set_id, set);

        let problems = snapshot.problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].starts_with("rule:1 'broken'"));
        assert_eq!(problems[1], "set:1 's' references missing policy:4");
    }
}
