//! Tumbling-window rate limiting.
//!
//! Counters are keyed by `(rule id, aggregate key)`. A window starts on the
//! first hit and lasts `window` from that instant; the next hit after it ends
//! starts a fresh window with a count of one. Windows never overlap, so a
//! client can land up to roughly twice the limit across a window boundary.
//! That burst tolerance is accepted in exchange for O(1) state per key.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

const DEFAULT_SHARDS: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// What to do when the counter store cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Treat the key as within its limit.
    #[default]
    FailOpen,
    /// Treat the key as over its limit.
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub rule_id: String,
    pub aggregate_key: String,
}

/// State of one key's current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitCounter {
    pub aggregate_key: String,
    pub window_start_millis: u64,
    pub window_millis: u64,
    pub count: u64,
}

impl RateLimitCounter {
    fn expired(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.window_start_millis) >= self.window_millis
    }
}

/// Storage for rate-limit counters.
///
/// `hit` records one request and returns the counter after the increment.
/// Implementations backed by an external service return
/// [`StoreError::Unavailable`] when it cannot be reached.
pub trait CounterStore: Send + Sync {
    fn hit(
        &self,
        rule_id: &str,
        aggregate_key: &str,
        window_millis: u64,
        now_millis: u64,
    ) -> Result<RateLimitCounter, StoreError>;

    /// Drop counters whose window has ended. Returns how many were removed.
    fn purge_expired(&self, now_millis: u64) -> usize;
}

/// In-process counter table split into independently locked shards, so hot
/// keys only contend with keys hashing to the same shard.
pub struct ShardedCounterStore {
    shards: Vec<Mutex<HashMap<CounterKey, RateLimitCounter>>>,
    hasher: RandomState,
}

impl ShardedCounterStore {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &CounterKey) -> &Mutex<HashMap<CounterKey, RateLimitCounter>> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }

    pub fn counter(&self, rule_id: &str, aggregate_key: &str) -> Option<RateLimitCounter> {
        let key = CounterKey {
            rule_id: rule_id.to_string(),
            aggregate_key: aggregate_key.to_string(),
        };
        self.shard(&key).lock().get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ShardedCounterStore {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl std::fmt::Debug for ShardedCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedCounterStore")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl CounterStore for ShardedCounterStore {
    fn hit(
        &self,
        rule_id: &str,
        aggregate_key: &str,
        window_millis: u64,
        now_millis: u64,
    ) -> Result<RateLimitCounter, StoreError> {
        let key = CounterKey {
            rule_id: rule_id.to_string(),
            aggregate_key: aggregate_key.to_string(),
        };
        let mut shard = self.shard(&key).lock();
        let counter = shard.entry(key).or_insert_with(|| RateLimitCounter {
            aggregate_key: aggregate_key.to_string(),
            window_start_millis: now_millis,
            window_millis,
            count: 0,
        });
        if counter.count > 0 && counter.expired(now_millis) {
            counter.window_start_millis = now_millis;
            counter.count = 0;
        }
        counter.window_millis = window_millis;
        counter.count = counter.count.saturating_add(1);
        Ok(counter.clone())
    }

    fn purge_expired(&self, now_millis: u64) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.lock();
            let before = map.len();
            map.retain(|_, c| !c.expired(now_millis));
            removed += before - map.len();
        }
        removed
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateCheck {
    Within { count: u64 },
    Exceeded { count: u64 },
    /// The store failed; `within` is the failure policy's verdict.
    Unavailable { within: bool, reason: String },
}

impl RateCheck {
    pub fn is_within(&self) -> bool {
        match self {
            RateCheck::Within { .. } => true,
            RateCheck::Exceeded { .. } => false,
            RateCheck::Unavailable { within, .. } => *within,
        }
    }
}

/// Owns the counter table and answers "is this key within its limit".
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    failure_policy: FailurePolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            failure_policy,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Count one hit for `(rule_id, aggregate_key)` and report whether the
    /// post-increment count is within `limit`.
    pub fn check(
        &self,
        rule_id: &str,
        aggregate_key: &str,
        limit: u64,
        window: Duration,
    ) -> RateCheck {
        let now = self.clock.now_millis();
        let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        match self.store.hit(rule_id, aggregate_key, window_millis, now) {
            Ok(counter) if counter.count <= limit => RateCheck::Within {
                count: counter.count,
            },
            Ok(counter) => RateCheck::Exceeded {
                count: counter.count,
            },
            Err(err) => RateCheck::Unavailable {
                within: self.failure_policy == FailurePolicy::FailOpen,
                reason: err.to_string(),
            },
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now_millis())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            Arc::new(ShardedCounterStore::default()),
            Arc::new(SystemClock),
            FailurePolicy::default(),
        )
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}
