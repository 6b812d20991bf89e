use std::fmt;

use serde::{Deserialize, Serialize};

use crate::risk::{Indicator, RiskScore};
use crate::trace::TraceNote;

/// The action a matching rule prescribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Let the event through.
    Allow,
    /// Reject the event. A matching deny overrides every other match.
    Deny,
    /// Require the caller to prove itself (captcha, step-up auth, ...).
    Challenge,
    /// Record the match and keep evaluating.
    Log,
    /// Count the match and keep evaluating.
    Count,
}

impl Effect {
    /// Whether a match with this effect ends evaluation (possibly pending a
    /// later explicit deny).
    pub fn is_terminating(self) -> bool {
        matches!(self, Effect::Allow | Effect::Deny | Effect::Challenge)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
            Effect::Challenge => "challenge",
            Effect::Log => "log",
            Effect::Count => "count",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-terminating (`log` / `count`) match recorded on the way to the final
/// decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub rule_id: String,
    pub effect: Effect,
}

/// The outcome of evaluating one context against a policy set.
///
/// Built once by the engine and handed out by value; nothing inside the
/// engine holds on to it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// The resolved effect.
    pub effect: Effect,
    /// Id of the rule that decided, or `None` when the default applied.
    pub matched_rule_id: Option<String>,
    /// Human-readable reason explaining the decision.
    pub reason: String,
    /// Number of rules handed to the rule matcher for this evaluation.
    pub evaluated_rule_count: usize,
    /// Indicators emitted by every rule that matched, in evaluation order.
    pub matched_indicators: Vec<Indicator>,
    /// Score of `matched_indicators`.
    pub risk: RiskScore,
    /// `log` / `count` rules that matched.
    pub annotations: Vec<Annotation>,
    /// Degraded-path details: decode failures, timeouts, rate-limit events.
    pub trace: Vec<TraceNote>,
    /// Version of the policy set the decision was made against.
    pub policy_version: String,
}

impl Decision {
    pub fn is_default(&self) -> bool {
        self.matched_rule_id.is_none()
    }

    pub fn annotated_by(&self, rule_id: &str) -> bool {
        self.annotations.iter().any(|a| a.rule_id == rule_id)
    }
}
