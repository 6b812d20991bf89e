use serde::{Deserialize, Serialize};

use crate::decision::Effect;
use crate::risk::Indicator;

/// Top-level policy document as written by a rule author (YAML or JSON).
///
/// A document is only raw data; [`PolicySet::compile`](crate::PolicySet::compile)
/// validates it and pre-compiles every condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Document schema; currently must be "1.0".
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Rule-set revision assigned by the rule store.
    pub version: String,
    /// Optional scope this set applies to (e.g. "edge", "admin-api").
    #[serde(default)]
    pub scope: Option<String>,
    /// Effect applied when no rule matches.
    #[serde(alias = "defaultEffect")]
    pub default_effect: Effect,
    /// Rules in insertion order.
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

/// A single rule: all conditions must hold (AND) for the rule to match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    /// Unique, non-empty rule id.
    pub id: String,
    /// Optional description, used as the decision reason.
    #[serde(default)]
    pub description: Option<String>,
    /// Lower numbers are evaluated first. Default 100.
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: Vec<ConditionDef>,
    #[serde(default, alias = "rateLimit")]
    pub rate_limit: Option<RateLimitDef>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Indicators emitted whenever this rule matches.
    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDef {
    /// Dotted context path, e.g. `request.headers.user-agent`.
    pub field: String,
    pub operator: Operator,
    /// Scalar or list operand; absent for `exists` / `not_exists`.
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub negate: bool,
    /// Applied to string values, in order, before comparison.
    #[serde(default)]
    pub transforms: Vec<Transform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,
    Exists,
    NotExists,
    GreaterThan,
    LessThan,
    IpInSet,
    InGeoSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Lowercase,
    UrlDecode,
    HtmlEntityDecode,
    Base64Decode,
}

impl Transform {
    pub fn as_str(self) -> &'static str {
        match self {
            Transform::Lowercase => "lowercase",
            Transform::UrlDecode => "url_decode",
            Transform::HtmlEntityDecode => "html_entity_decode",
            Transform::Base64Decode => "base64_decode",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDef {
    /// Hits allowed per window.
    pub limit: u64,
    #[serde(alias = "windowSeconds")]
    pub window_seconds: u64,
    /// Context path whose value buckets the counter (e.g. `request.ip`).
    #[serde(alias = "aggregateKey")]
    pub aggregate_key: String,
    #[serde(default)]
    pub trigger: RateLimitTrigger,
}

/// Which side of the limit makes the rule's rate-limit leg hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitTrigger {
    /// The rule matches while the key is within its limit (quota rules).
    #[default]
    WithinLimit,
    /// The rule matches once the key has exceeded its limit.
    Exceeded,
}

fn default_schema() -> String {
    "1.0".to_string()
}

fn default_priority() -> i32 {
    100
}

fn default_true() -> bool {
    true
}
