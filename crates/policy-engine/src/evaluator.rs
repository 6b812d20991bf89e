use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::{AuditRecord, DecisionAudit};
use crate::clock::{Clock, SystemClock};
use crate::context::Context;
use crate::decision::Decision;
use crate::policy::PolicySet;
use crate::rate_limit::{CounterStore, FailurePolicy, RateLimiter, ShardedCounterStore};
use crate::resolver;
use crate::risk::{self, Indicator, RiskScore};
use crate::telemetry::{NoopTelemetry, TelemetrySink};
use crate::trace::{EvalLimits, EvalScope};

/// Tunables for a [`DecisionEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget for a single regex match.
    pub regex_timeout_ms: u64,
    /// Budget for one whole `evaluate` call.
    pub evaluation_timeout_ms: u64,
    /// Longer regex inputs are treated as a timeout without being scanned.
    pub max_regex_input_bytes: usize,
    pub failure_policy: FailurePolicy,
    pub counter_shards: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = EvalLimits::default();
        Self {
            regex_timeout_ms: limits.regex_timeout.as_millis() as u64,
            evaluation_timeout_ms: limits.evaluation_timeout.as_millis() as u64,
            max_regex_input_bytes: limits.max_regex_input_bytes,
            failure_policy: FailurePolicy::FailOpen,
            counter_shards: 64,
        }
    }
}

impl EngineConfig {
    pub fn limits(&self) -> EvalLimits {
        EvalLimits {
            regex_timeout: Duration::from_millis(self.regex_timeout_ms),
            evaluation_timeout: Duration::from_millis(self.evaluation_timeout_ms),
            max_regex_input_bytes: self.max_regex_input_bytes,
        }
    }
}

/// Engine-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub evaluations: u64,
    pub timeouts: u64,
}

/// The facade callers evaluate through.
///
/// Holds no policy of its own: every call names the [`PolicySet`] snapshot to
/// use. The only state shared between calls is the rate-limit counter table
/// and the engine counters, so a single engine can be shared across threads.
pub struct DecisionEngine {
    limits: EvalLimits,
    limiter: RateLimiter,
    telemetry: Arc<dyn TelemetrySink>,
    audit: Option<Arc<dyn DecisionAudit>>,
    evaluations: AtomicU64,
    timeouts: AtomicU64,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("limits", &self.limits)
            .field("limiter", &self.limiter)
            .field("audit", &self.audit.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DecisionEngine {
    /// An engine with in-process counters, the system clock, and no
    /// telemetry or audit.
    pub fn new(config: EngineConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            telemetry: None,
            audit: None,
            store: None,
            clock: None,
        }
    }

    /// Evaluate one context against `policy`.
    ///
    /// Never fails: malformed data, decode errors and timeouts all degrade to
    /// "condition did not match" and show up in [`Decision::trace`].
    pub fn evaluate(&self, policy: &PolicySet, ctx: &Context) -> Decision {
        let mut scope = EvalScope::new(&self.limits, self.telemetry.as_ref(), &self.limiter);
        let mut decision = resolver::resolve(policy, ctx, &mut scope);

        let timeouts = scope.timeouts();
        if timeouts > 0 {
            self.timeouts.fetch_add(timeouts, Ordering::Relaxed);
        }
        decision.trace = scope.into_notes();
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        if let Some(audit) = &self.audit {
            audit.record(AuditRecord {
                decision: decision.clone(),
                context_fingerprint: ctx.fingerprint(),
                timestamp: chrono::Utc::now(),
                policy_version: policy.version().to_string(),
                scope: policy.scope().map(str::to_string),
            });
        }
        decision
    }

    /// Evaluate a batch against one snapshot on the rayon pool.
    ///
    /// Results are returned in input order.
    pub fn evaluate_batch(&self, policy: &PolicySet, contexts: &[Context]) -> Vec<Decision> {
        debug!(
            batch = contexts.len(),
            version = policy.version(),
            "evaluating batch"
        );
        contexts
            .par_iter()
            .map(|ctx| self.evaluate(policy, ctx))
            .collect()
    }

    /// Score indicators without a policy set.
    pub fn score(indicators: &[Indicator]) -> RiskScore {
        risk::score(indicators)
    }

    /// Drop rate-limit counters whose window has ended.
    pub fn purge_expired_counters(&self) -> usize {
        let removed = self.limiter.purge_expired();
        if removed > 0 {
            debug!(removed, "purged expired rate-limit counters");
        }
        removed
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn limits(&self) -> &EvalLimits {
        &self.limits
    }
}

/// Wires optional collaborators into a [`DecisionEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    audit: Option<Arc<dyn DecisionAudit>>,
    store: Option<Arc<dyn CounterStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn DecisionAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Replace the in-process counter table, e.g. with an external store.
    pub fn counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> DecisionEngine {
        let shards = self.config.counter_shards;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(ShardedCounterStore::new(shards)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        DecisionEngine {
            limits: self.config.limits(),
            limiter: RateLimiter::new(store, clock, self.config.failure_policy),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(NoopTelemetry)),
            audit: self.audit,
            evaluations: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }
}
