use std::time::{Duration, Instant};

use serde::Serialize;

use crate::rate_limit::RateLimiter;
use crate::schema::Transform;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Where a time budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStage {
    /// A single regex match exceeded its budget or input cap.
    Regex,
    /// The whole evaluation call exceeded its budget.
    Evaluation,
}

/// A degraded-path detail recorded while evaluating one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceNote {
    DecodeFailure {
        rule_id: String,
        field: String,
        transform: Transform,
        reason: String,
    },
    Timeout {
        rule_id: String,
        field: String,
        stage: TimeoutStage,
    },
    MissingAggregateKey {
        rule_id: String,
        path: String,
    },
    RateLimited {
        rule_id: String,
        aggregate_key: String,
        count: u64,
        limit: u64,
    },
    RateLimitStoreUnavailable {
        rule_id: String,
        reason: String,
        treated_as_within: bool,
    },
}

/// Time and size bounds applied to every evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvalLimits {
    pub regex_timeout: Duration,
    pub evaluation_timeout: Duration,
    pub max_regex_input_bytes: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            regex_timeout: Duration::from_millis(50),
            evaluation_timeout: Duration::from_millis(250),
            max_regex_input_bytes: 64 * 1024,
        }
    }
}

/// Per-call state threaded through the matcher: the current rule, collected
/// notes, the deadline, and the collaborators that may be notified.
pub(crate) struct EvalScope<'a> {
    pub rule_id: &'a str,
    pub limits: &'a EvalLimits,
    pub telemetry: &'a dyn TelemetrySink,
    pub limiter: &'a RateLimiter,
    started: Instant,
    notes: Vec<TraceNote>,
    timeouts: u64,
}

impl<'a> EvalScope<'a> {
    pub fn new(
        limits: &'a EvalLimits,
        telemetry: &'a dyn TelemetrySink,
        limiter: &'a RateLimiter,
    ) -> Self {
        Self {
            rule_id: "",
            limits,
            telemetry,
            limiter,
            started: Instant::now(),
            notes: Vec::new(),
            timeouts: 0,
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.started.elapsed() >= self.limits.evaluation_timeout
    }

    pub fn note(&mut self, note: TraceNote) {
        self.notes.push(note);
    }

    pub fn decode_failure(&mut self, field: &str, transform: Transform, reason: String) {
        tracing::debug!(
            rule = self.rule_id,
            field,
            transform = transform.as_str(),
            %reason,
            "transform failed; comparing pre-transform value"
        );
        self.telemetry.emit(&TelemetryEvent::DecodeFailure {
            rule_id: self.rule_id,
            field,
            transform,
        });
        self.notes.push(TraceNote::DecodeFailure {
            rule_id: self.rule_id.to_string(),
            field: field.to_string(),
            transform,
            reason,
        });
    }

    pub fn timeout(&mut self, field: &str, stage: TimeoutStage) {
        self.timeouts += 1;
        self.telemetry.emit(&TelemetryEvent::TimeoutExceeded {
            rule_id: self.rule_id,
            field,
            stage,
        });
        self.notes.push(TraceNote::Timeout {
            rule_id: self.rule_id.to_string(),
            field: field.to_string(),
            stage,
        });
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn into_notes(self) -> Vec<TraceNote> {
        self.notes
    }
}
