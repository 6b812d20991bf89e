use serde_json::Value;
use tracing::trace;

use crate::context::Context;
use crate::field::Resolved;
use crate::policy::{RateLimit, Rule};
use crate::rate_limit::RateCheck;
use crate::schema::RateLimitTrigger;
use crate::telemetry::TelemetryEvent;
use crate::trace::{EvalScope, TraceNote};

/// Whether `rule` matches `ctx`.
///
/// Conditions are ANDed in declared order and short-circuit on the first
/// failure. The rate-limit leg, if any, is only consulted once every
/// condition holds, so non-matching traffic never touches a counter.
pub(crate) fn rule_matches(rule: &Rule, ctx: &Context, scope: &mut EvalScope<'_>) -> bool {
    for (idx, condition) in rule.conditions().iter().enumerate() {
        if !condition.evaluate(ctx, scope) {
            trace!(rule = rule.id(), condition = idx, field = condition.field(), "condition failed");
            return false;
        }
    }

    match rule.rate_limit() {
        Some(rl) => rate_limit_leg(rule.id(), rl, ctx, scope),
        None => true,
    }
}

fn rate_limit_leg(rule_id: &str, rl: &RateLimit, ctx: &Context, scope: &mut EvalScope<'_>) -> bool {
    let key = match ctx.get(&rl.aggregate_key) {
        Resolved::Value(v) => aggregate_key_string(v),
        Resolved::Missing => {
            trace!(rule = rule_id, path = %rl.aggregate_key, "aggregate key missing");
            scope.note(TraceNote::MissingAggregateKey {
                rule_id: rule_id.to_string(),
                path: rl.aggregate_key.clone(),
            });
            return false;
        }
    };

    let within = match scope.limiter.check(rule_id, &key, rl.limit, rl.window) {
        RateCheck::Within { .. } => true,
        RateCheck::Exceeded { count } => {
            if count == rl.limit + 1 {
                scope.telemetry.emit(&TelemetryEvent::RateLimitExceeded {
                    rule_id,
                    aggregate_key: &key,
                    count,
                    limit: rl.limit,
                });
            }
            scope.note(TraceNote::RateLimited {
                rule_id: rule_id.to_string(),
                aggregate_key: key,
                count,
                limit: rl.limit,
            });
            false
        }
        RateCheck::Unavailable { within, reason } => {
            scope.telemetry.emit(&TelemetryEvent::RateLimitStoreUnavailable {
                rule_id,
                reason: &reason,
                failure_policy: scope.limiter.failure_policy(),
            });
            scope.note(TraceNote::RateLimitStoreUnavailable {
                rule_id: rule_id.to_string(),
                reason,
                treated_as_within: within,
            });
            within
        }
    };

    match rl.trigger {
        RateLimitTrigger::WithinLimit => within,
        RateLimitTrigger::Exceeded => !within,
    }
}

/// Strings bucket by their contents; anything else by its JSON text.
fn aggregate_key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
