//! Rule-level telemetry.
//!
//! The engine reports what it does through a [`TelemetrySink`]. Sinks must be
//! cheap and non-blocking; they are called on the evaluation hot path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::decision::Effect;
use crate::policy::PolicySet;
use crate::rate_limit::FailurePolicy;
use crate::schema::Transform;
use crate::trace::TimeoutStage;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent<'a> {
    RuleEvaluated {
        rule_id: &'a str,
    },
    RuleMatched {
        rule_id: &'a str,
        effect: Effect,
    },
    /// Emitted once per window, when a key first crosses its limit.
    RateLimitExceeded {
        rule_id: &'a str,
        aggregate_key: &'a str,
        count: u64,
        limit: u64,
    },
    TimeoutExceeded {
        rule_id: &'a str,
        field: &'a str,
        stage: TimeoutStage,
    },
    DecodeFailure {
        rule_id: &'a str,
        field: &'a str,
        transform: Transform,
    },
    RateLimitStoreUnavailable {
        rule_id: &'a str,
        reason: &'a str,
        failure_policy: FailurePolicy,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &TelemetryEvent<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _event: &TelemetryEvent<'_>) {}
}

/// Forwards every event as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: &TelemetryEvent<'_>) {
        match event {
            TelemetryEvent::RuleEvaluated { rule_id } => {
                trace!(rule = rule_id, "rule evaluated");
            }
            TelemetryEvent::RuleMatched { rule_id, effect } => {
                debug!(rule = rule_id, %effect, "rule matched");
            }
            TelemetryEvent::RateLimitExceeded {
                rule_id,
                aggregate_key,
                count,
                limit,
            } => {
                warn!(
                    rule = rule_id,
                    aggregate_key, count, limit, "rate limit exceeded"
                );
            }
            TelemetryEvent::TimeoutExceeded {
                rule_id,
                field,
                stage,
            } => {
                warn!(rule = rule_id, field, ?stage, "condition timed out; treated as no match");
            }
            TelemetryEvent::DecodeFailure {
                rule_id,
                field,
                transform,
            } => {
                debug!(
                    rule = rule_id,
                    field,
                    transform = transform.as_str(),
                    "transform decode failure"
                );
            }
            TelemetryEvent::RateLimitStoreUnavailable {
                rule_id,
                reason,
                failure_policy,
            } => {
                warn!(
                    rule = rule_id,
                    reason,
                    ?failure_policy,
                    "rate-limit counter store unavailable"
                );
            }
        }
    }
}

/// Sends every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutTelemetry {
    fn emit(&self, event: &TelemetryEvent<'_>) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Hit counters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RuleCounters {
    evaluated: AtomicU64,
    matched: AtomicU64,
    rate_limited: AtomicU64,
}

/// In-process hit/match counters per rule, plus engine-wide degraded-path
/// totals. Feeds [`RuleHitCounters::report`].
#[derive(Debug, Default)]
pub struct RuleHitCounters {
    rules: RwLock<HashMap<String, Arc<RuleCounters>>>,
    timeouts: AtomicU64,
    decode_failures: AtomicU64,
    store_unavailable: AtomicU64,
}

impl RuleHitCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, rule_id: &str) -> Arc<RuleCounters> {
        if let Some(c) = self.rules.read().get(rule_id) {
            return Arc::clone(c);
        }
        let mut rules = self.rules.write();
        Arc::clone(rules.entry(rule_id.to_string()).or_default())
    }

    pub fn stats(&self, rule_id: &str) -> RuleStats {
        let rules = self.rules.read();
        match rules.get(rule_id) {
            Some(c) => RuleStats::from_counters(rule_id, c),
            None => RuleStats::empty(rule_id),
        }
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn store_unavailable(&self) -> u64 {
        self.store_unavailable.load(Ordering::Relaxed)
    }

    /// Per-rule optimization report for the enabled rules of `policy`.
    ///
    /// Rules evaluated at least `min_samples` times are classified: a rule
    /// that never matched is a redundancy candidate, a rule that matched every
    /// time it was evaluated is a false-positive candidate.
    pub fn report(&self, policy: &PolicySet, min_samples: u64) -> RuleReport {
        let rules = policy
            .evaluation_order()
            .map(|rule| {
                let stats = self.stats(rule.id());
                let finding = if stats.evaluated < min_samples {
                    RuleFinding::InsufficientData
                } else if stats.matched == 0 {
                    RuleFinding::NeverMatched
                } else if stats.matched == stats.evaluated {
                    RuleFinding::AlwaysMatched
                } else {
                    RuleFinding::Active
                };
                RuleReportEntry {
                    rule_id: rule.id().to_string(),
                    effect: rule.effect(),
                    priority: rule.priority(),
                    stats,
                    finding,
                }
            })
            .collect();
        RuleReport {
            policy_version: policy.version().to_string(),
            rules,
            timeouts: self.timeouts(),
            decode_failures: self.decode_failures(),
            store_unavailable: self.store_unavailable(),
        }
    }
}

impl TelemetrySink for RuleHitCounters {
    fn emit(&self, event: &TelemetryEvent<'_>) {
        match event {
            TelemetryEvent::RuleEvaluated { rule_id } => {
                self.counters(rule_id).evaluated.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::RuleMatched { rule_id, .. } => {
                self.counters(rule_id).matched.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::RateLimitExceeded { rule_id, .. } => {
                self.counters(rule_id)
                    .rate_limited
                    .fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::TimeoutExceeded { .. } => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::DecodeFailure { .. } => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::RateLimitStoreUnavailable { .. } => {
                self.store_unavailable.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStats {
    pub rule_id: String,
    pub evaluated: u64,
    pub matched: u64,
    pub rate_limited: u64,
}

impl RuleStats {
    fn empty(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            evaluated: 0,
            matched: 0,
            rate_limited: 0,
        }
    }

    fn from_counters(rule_id: &str, c: &RuleCounters) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            evaluated: c.evaluated.load(Ordering::Relaxed),
            matched: c.matched.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
        }
    }

    pub fn match_ratio(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.matched as f64 / self.evaluated as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFinding {
    InsufficientData,
    NeverMatched,
    AlwaysMatched,
    Active,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleReportEntry {
    pub rule_id: String,
    pub effect: Effect,
    pub priority: i32,
    #[serde(flatten)]
    pub stats: RuleStats,
    pub finding: RuleFinding,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleReport {
    pub policy_version: String,
    pub rules: Vec<RuleReportEntry>,
    pub timeouts: u64,
    pub decode_failures: u64,
    pub store_unavailable: u64,
}

impl RuleReport {
    pub fn entry(&self, rule_id: &str) -> Option<&RuleReportEntry> {
        self.rules.iter().find(|e| e.rule_id == rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_rule() {
        let counters = RuleHitCounters::new();
        for _ in 0..3 {
            counters.emit(&TelemetryEvent::RuleEvaluated { rule_id: "a" });
        }
        counters.emit(&TelemetryEvent::RuleMatched {
            rule_id: "a",
            effect: Effect::Deny,
        });
        counters.emit(&TelemetryEvent::RuleEvaluated { rule_id: "b" });

        let a = counters.stats("a");
        assert_eq!(a.evaluated, 3);
        assert_eq!(a.matched, 1);
        assert!((a.match_ratio() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(counters.stats("b").evaluated, 1);
        assert_eq!(counters.stats("missing").evaluated, 0);
    }

    #[test]
    fn degraded_path_totals() {
        let counters = RuleHitCounters::new();
        counters.emit(&TelemetryEvent::TimeoutExceeded {
            rule_id: "r",
            field: "request.body",
            stage: TimeoutStage::Regex,
        });
        counters.emit(&TelemetryEvent::DecodeFailure {
            rule_id: "r",
            field: "request.uri",
            transform: Transform::Base64Decode,
        });
        assert_eq!(counters.timeouts(), 1);
        assert_eq!(counters.decode_failures(), 1);
        assert_eq!(counters.store_unavailable(), 0);
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(RuleHitCounters::new());
        let b = Arc::new(RuleHitCounters::new());
        let fanout = FanoutTelemetry::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(NoopTelemetry));
        fanout.emit(&TelemetryEvent::RuleEvaluated { rule_id: "x" });
        assert_eq!(a.stats("x").evaluated, 1);
        assert_eq!(b.stats("x").evaluated, 1);
    }

    #[test]
    fn event_serializes_with_tag() {
        let json = serde_json::to_value(TelemetryEvent::RuleMatched {
            rule_id: "r1",
            effect: Effect::Challenge,
        })
        .unwrap();
        assert_eq!(json["event"], "rule_matched");
        assert_eq!(json["effect"], "challenge");
    }
}
