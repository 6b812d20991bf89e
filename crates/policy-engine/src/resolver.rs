use tracing::{debug, trace};

use crate::context::Context;
use crate::decision::{Annotation, Decision, Effect};
use crate::matcher::rule_matches;
use crate::policy::{PolicySet, Rule};
use crate::risk::RiskAccumulator;
use crate::telemetry::TelemetryEvent;
use crate::trace::EvalScope;

/// Walk the enabled rules of `policy` in evaluation order and settle on one
/// effect.
///
/// * A matching `deny` ends evaluation at once.
/// * The first matching `allow`/`challenge` becomes the candidate; after
///   that only `deny` rules are still evaluated, since a later deny overrides it.
/// * `log`/`count` matches are annotations and never end evaluation.
/// * No terminating match: the policy's default effect applies.
pub(crate) fn resolve<'p>(
    policy: &'p PolicySet,
    ctx: &Context,
    scope: &mut EvalScope<'p>,
) -> Decision {
    let mut evaluated = 0usize;
    let mut candidate: Option<&Rule> = None;
    let mut annotations = Vec::new();
    let mut risk = RiskAccumulator::new();
    let mut indicators = Vec::new();

    for rule in policy.evaluation_order() {
        if candidate.is_some() && rule.effect() != Effect::Deny {
            continue;
        }

        evaluated += 1;
        scope.rule_id = rule.id();
        scope
            .telemetry
            .emit(&TelemetryEvent::RuleEvaluated { rule_id: rule.id() });

        if !rule_matches(rule, ctx, scope) {
            continue;
        }

        trace!(rule = rule.id(), effect = %rule.effect(), "rule matched");
        scope.telemetry.emit(&TelemetryEvent::RuleMatched {
            rule_id: rule.id(),
            effect: rule.effect(),
        });
        for indicator in rule.indicators() {
            risk.push(indicator);
            indicators.push(indicator.clone());
        }

        if !rule.effect().is_terminating() {
            annotations.push(Annotation {
                rule_id: rule.id().to_string(),
                effect: rule.effect(),
            });
            continue;
        }
        candidate = Some(rule);
        if rule.effect() == Effect::Deny {
            break;
        }
    }

    let (effect, matched_rule_id, reason) = match candidate {
        Some(rule) => (
            rule.effect(),
            Some(rule.id().to_string()),
            rule.description()
                .map(str::to_string)
                .unwrap_or_else(|| format!("matched rule '{}'", rule.id())),
        ),
        None => (
            policy.default_effect(),
            None,
            format!(
                "no rule matched; default effect {} applied",
                policy.default_effect()
            ),
        ),
    };

    debug!(
        effect = %effect,
        rule = matched_rule_id.as_deref().unwrap_or("-"),
        evaluated,
        "decision resolved"
    );

    Decision {
        effect,
        matched_rule_id,
        reason,
        evaluated_rule_count: evaluated,
        matched_indicators: indicators,
        risk: risk.finish(),
        annotations,
        trace: Vec::new(),
        policy_version: policy.version().to_string(),
    }
}
