//! Decision cache.
//!
//! Results are keyed by a blake3 digest of the canonical request: every
//! attribute map is copied into a `BTreeMap` before serialization, so the
//! insertion order of the caller's maps never affects the key.
//!
//! Entries expire `ttl` after they are written and are evicted lazily by the
//! lookup that finds them expired.
//!
//! # Invalidation
//!
//! [`DecisionCache::invalidate_all`] clears every entry and bumps an epoch.
//! A writer passes the epoch it observed before reading the policy snapshot;
//! [`DecisionCache::store`] rejects the write if the epoch has moved on, so a
//! decision computed against a superseded snapshot is never cached.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::debug;
use warden_config::CacheConfig;
use warden_types::PolicyCombiningAlgorithm;

use crate::attributes::{AttributeValue, EvaluationContext};
use crate::clock::Clock;
use crate::error::{AbacError, Result};
use crate::evaluator::{EvaluationResult, Scope};

// ============================================================================
// Key
// ============================================================================

/// Digest of a canonical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(blake3::Hash);

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    scope: Scope,
    algorithm: Option<PolicyCombiningAlgorithm>,
    subject: BTreeMap<&'a str, &'a AttributeValue>,
    resource: BTreeMap<&'a str, &'a AttributeValue>,
    action: BTreeMap<&'a str, &'a AttributeValue>,
    custom: BTreeMap<&'a str, &'a AttributeValue>,
    environment: BTreeMap<&'a str, &'a AttributeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_time: Option<String>,
}

fn canonical(map: &HashMap<String, AttributeValue>) -> BTreeMap<&str, &AttributeValue> {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.as_str(), v))
        .collect()
}

impl CacheKey {
    /// Derives the key for a request.
    ///
    /// Explicit nulls are dropped since the evaluator cannot tell them from
    /// absent attributes. The request time only takes part when
    /// `include_request_time` is set.
    pub fn derive(
        context: &EvaluationContext,
        scope: Scope,
        algorithm: Option<PolicyCombiningAlgorithm>,
        include_request_time: bool,
    ) -> Result<Self> {
        let request = CanonicalRequest {
            scope,
            algorithm,
            subject: canonical(&context.subject),
            resource: canonical(&context.resource),
            action: canonical(&context.action),
            custom: canonical(&context.custom),
            environment: canonical(&context.environment),
            request_time: include_request_time.then(|| context.request_time.to_rfc3339()),
        };
        let bytes = serde_json::to_vec(&request)?;
        Ok(Self(blake3::hash(&bytes)))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_hex().as_str())
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug)]
struct CacheEntry {
    result: EvaluationResult,
    expires_at: DateTime<Utc>,
    hits: AtomicU64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    epoch: u64,
}

/// Counters reported by [`DecisionCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub invalidations: u64,
}

/// Thread-safe TTL cache of evaluation results.
#[derive(Debug)]
pub struct DecisionCache {
    ttl: TimeDelta,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl DecisionCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: TimeDelta::from_std(config.ttl()).unwrap_or(TimeDelta::MAX),
            max_entries: config.max_entries,
            clock,
            state: RwLock::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Current invalidation epoch.
    pub fn epoch(&self) -> Result<u64> {
        Ok(self.read()?.epoch)
    }

    /// Returns the cached result for `key` if it has not expired.
    ///
    /// A hit increments the entry's hit counter. An expired entry counts as
    /// a miss and is removed.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<EvaluationResult>> {
        let now = self.clock.now();
        {
            let state = self.read()?;
            match state.entries.get(key) {
                Some(entry) if now < entry.expires_at => {
                    entry.hits.fetch_add(1, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.result.clone()));
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            }
        }

        let mut state = self.write()?;
        if state
            .entries
            .get(key)
            .is_some_and(|entry| now >= entry.expires_at)
        {
            state.entries.remove(key);
            debug!(key = %key, "evicted expired cache entry");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Caches `result` unless the cache was invalidated after `epoch` was
    /// read, or the cache is full of live entries. Returns whether the entry
    /// was written.
    pub fn store(&self, key: CacheKey, result: EvaluationResult, epoch: u64) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.write()?;

        if state.epoch != epoch {
            debug!(key = %key, epoch, current = state.epoch, "skipped stale cache write");
            return Ok(false);
        }

        if state.entries.len() >= self.max_entries && !state.entries.contains_key(&key) {
            state.entries.retain(|_, entry| now < entry.expires_at);
            if state.entries.len() >= self.max_entries {
                debug!(max_entries = self.max_entries, "decision cache full");
                return Ok(false);
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                result,
                expires_at: now
                    .checked_add_signed(self.ttl)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                hits: AtomicU64::new(0),
            },
        );
        Ok(true)
    }

    /// Hit count of a live entry.
    pub fn entry_hits(&self, key: &CacheKey) -> Result<Option<u64>> {
        let now = self.clock.now();
        Ok(self
            .read()?
            .entries
            .get(key)
            .filter(|e| now < e.expires_at)
            .map(|e| e.hits.load(Ordering::Relaxed)))
    }

    /// Drops every entry and advances the epoch.
    pub fn invalidate_all(&self) -> Result<()> {
        let mut state = self.write()?;
        let dropped = state.entries.len();
        state.entries.clear();
        state.epoch += 1;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(dropped, epoch = state.epoch, "decision cache invalidated");
        Ok(())
    }

    /// Removes expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut state = self.write()?;
        let before = state.entries.len();
        state.entries.retain(|_, entry| now < entry.expires_at);
        Ok(before - state.entries.len())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.read()?.entries.len(),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, CacheState>> {
        self.state
            .read()
            .map_err(|_| AbacError::LockPoisoned("decision cache"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, CacheState>> {
        self.state
            .write()
            .map_err(|_| AbacError::LockPoisoned("decision cache"))
    }
}
