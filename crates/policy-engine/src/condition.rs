use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Instant;

use ipnet::IpNet;
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::context::Context;
use crate::error::{PolicyError, Result};
use crate::field::Resolved;
use crate::schema::{ConditionDef, Operator, Transform};
use crate::trace::{EvalScope, TimeoutStage};
use crate::transform;

/// Compiled-program size cap for rule regexes.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Pre-compiled operand, shaped for the operator it belongs to.
#[derive(Debug)]
enum Operand {
    None,
    Scalar(Value),
    Text(String),
    Number(f64),
    Pattern(Regex),
    Networks(Vec<IpNet>),
    Countries(HashSet<String>),
}

/// A single `(field, operator, value, negate)` test, compiled once when the
/// policy set is loaded.
#[derive(Debug)]
pub struct Condition {
    field: String,
    operator: Operator,
    negate: bool,
    transforms: Vec<Transform>,
    operand: Operand,
}

impl Condition {
    pub fn compile(def: &ConditionDef, rule_id: &str) -> Result<Self> {
        let field = def.field.trim();
        if field.is_empty() {
            return Err(PolicyError::condition(rule_id, &def.field, "field path is empty"));
        }
        let invalid = |reason: String| PolicyError::condition(rule_id, field, reason);

        let operand = match def.operator {
            Operator::Exists | Operator::NotExists => Operand::None,
            Operator::Equals
            | Operator::NotEquals
            | Operator::Contains
            | Operator::NotContains => match &def.value {
                v @ (Value::String(_) | Value::Number(_) | Value::Bool(_)) => {
                    Operand::Scalar(v.clone())
                }
                other => {
                    return Err(invalid(format!(
                        "{:?} needs a string, number or boolean value, got {other}",
                        def.operator
                    )))
                }
            },
            Operator::StartsWith | Operator::EndsWith => match &def.value {
                Value::String(s) => Operand::Text(s.clone()),
                other => {
                    return Err(invalid(format!(
                        "{:?} needs a string value, got {other}",
                        def.operator
                    )))
                }
            },
            Operator::Regex => {
                let pattern = def
                    .value
                    .as_str()
                    .ok_or_else(|| invalid("regex needs a string pattern".to_string()))?;
                let regex = RegexBuilder::new(pattern)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| invalid(format!("invalid regex '{pattern}': {e}")))?;
                Operand::Pattern(regex)
            }
            Operator::GreaterThan | Operator::LessThan => match def.value.as_f64() {
                Some(n) => Operand::Number(n),
                None => {
                    return Err(invalid(format!(
                        "{:?} needs a numeric value, got {}",
                        def.operator, def.value
                    )))
                }
            },
            Operator::IpInSet => {
                let entries = string_list(&def.value)
                    .ok_or_else(|| invalid("ip_in_set needs a list of addresses or CIDRs".into()))?;
                let nets = entries
                    .iter()
                    .map(|raw| parse_network(raw).ok_or_else(|| invalid(format!("invalid address or CIDR '{raw}'"))))
                    .collect::<Result<Vec<_>>>()?;
                if nets.is_empty() {
                    return Err(invalid("ip_in_set needs at least one entry".into()));
                }
                Operand::Networks(nets)
            }
            Operator::InGeoSet => {
                let entries = string_list(&def.value)
                    .ok_or_else(|| invalid("in_geo_set needs a list of country codes".into()))?;
                let codes = entries
                    .iter()
                    .map(|raw| {
                        normalize_country_code(raw)
                            .ok_or_else(|| invalid(format!("invalid country code '{raw}'")))
                    })
                    .collect::<Result<HashSet<_>>>()?;
                if codes.is_empty() {
                    return Err(invalid("in_geo_set needs at least one entry".into()));
                }
                Operand::Countries(codes)
            }
        };

        Ok(Self {
            field: field.to_string(),
            operator: def.operator,
            negate: def.negate,
            transforms: def.transforms.clone(),
            operand,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn negate(&self) -> bool {
        self.negate
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Evaluate against `ctx`. Shape mismatches are `false` before negation;
    /// a timeout is `false` regardless of negation.
    pub(crate) fn evaluate(&self, ctx: &Context, scope: &mut EvalScope<'_>) -> bool {
        if scope.budget_exhausted() {
            scope.timeout(&self.field, TimeoutStage::Evaluation);
            return false;
        }

        let raw = match ctx.get(&self.field) {
            Resolved::Missing => return self.finish(self.test_presence(false)),
            Resolved::Value(v) => v,
        };
        if matches!(self.operator, Operator::Exists | Operator::NotExists) {
            return self.finish(self.test_presence(true));
        }

        let value = transform::apply(raw, &self.transforms, &self.field, scope);
        match self.test(&value, scope) {
            Some(result) => self.finish(result),
            None => false,
        }
    }

    fn finish(&self, result: bool) -> bool {
        result != self.negate
    }

    fn test_presence(&self, present: bool) -> bool {
        match self.operator {
            Operator::Exists => present,
            Operator::NotExists => !present,
            _ => false,
        }
    }

    /// `None` means the test timed out.
    fn test(&self, value: &Value, scope: &mut EvalScope<'_>) -> Option<bool> {
        let result = match (&self.operator, &self.operand) {
            (Operator::Equals, Operand::Scalar(expected)) => scalar_eq(value, expected),
            (Operator::NotEquals, Operand::Scalar(expected)) => {
                same_kind(value, expected) && !scalar_eq(value, expected)
            }
            (Operator::Contains, Operand::Scalar(needle)) => {
                contains(value, needle).unwrap_or(false)
            }
            (Operator::NotContains, Operand::Scalar(needle)) => {
                contains(value, needle).map(|hit| !hit).unwrap_or(false)
            }
            (Operator::StartsWith, Operand::Text(prefix)) => {
                value.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
            }
            (Operator::EndsWith, Operand::Text(suffix)) => {
                value.as_str().is_some_and(|s| s.ends_with(suffix.as_str()))
            }
            (Operator::Regex, Operand::Pattern(regex)) => match value.as_str() {
                Some(s) => return self.bounded_match(regex, s, scope),
                None => false,
            },
            (Operator::GreaterThan, Operand::Number(bound)) => {
                number(value).is_some_and(|n| n > *bound)
            }
            (Operator::LessThan, Operand::Number(bound)) => {
                number(value).is_some_and(|n| n < *bound)
            }
            (Operator::IpInSet, Operand::Networks(nets)) => value
                .as_str()
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
                .is_some_and(|ip| nets.iter().any(|net| net.contains(&ip))),
            (Operator::InGeoSet, Operand::Countries(codes)) => value
                .as_str()
                .is_some_and(|s| codes.contains(&s.trim().to_ascii_uppercase())),
            _ => false,
        };
        Some(result)
    }

    fn bounded_match(&self, regex: &Regex, input: &str, scope: &mut EvalScope<'_>) -> Option<bool> {
        if input.len() > scope.limits.max_regex_input_bytes {
            scope.timeout(&self.field, TimeoutStage::Regex);
            return None;
        }
        let started = Instant::now();
        let hit = regex.is_match(input);
        if started.elapsed() > scope.limits.regex_timeout {
            scope.timeout(&self.field, TimeoutStage::Regex);
            return None;
        }
        Some(hit)
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => match (integer(x), integer(y)) {
            (Some(x), Some(y)) => x == y,
            _ => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        },
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => false,
    }
}

/// Integers compare exactly; f64 loses precision above 2^53.
fn integer(n: &serde_json::Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::String(_), Value::String(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

/// Substring for strings, membership for lists; `None` for anything else.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match haystack {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)),
        Value::Array(items) => Some(items.iter().any(|item| scalar_eq(item, needle))),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn parse_network(raw: &str) -> Option<IpNet> {
    let raw = raw.trim();
    if let Ok(net) = raw.parse::<IpNet>() {
        return Some(net.trunc());
    }
    raw.parse::<IpAddr>().ok().map(IpNet::from)
}

fn normalize_country_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() != 2 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}
