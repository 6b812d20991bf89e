//! Cumulative risk scoring.
//!
//! Rules and heuristics that should contribute to a score rather than decide
//! on their own emit [`Indicator`]s. [`score`] folds any number of them into a
//! bounded 0-100 value and a discrete [`RiskLevel`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of an indicator. Each maps to a fixed multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn factor(self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.75,
            Severity::Medium => 0.5,
            Severity::Low => 0.25,
            Severity::Info => 0.1,
        }
    }
}

/// A weighted signal, e.g. `WILDCARD_PERMISSION` or `NO_MFA`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    #[serde(rename = "type")]
    pub kind: String,
    /// Expected in `0.0..=1.0`; out-of-range weights are clamped when scored.
    pub weight: f64,
    pub severity: Severity,
}

impl Indicator {
    pub fn new(kind: impl Into<String>, weight: f64, severity: Severity) -> Self {
        Self {
            kind: kind.into(),
            weight,
            severity,
        }
    }

    fn contribution(&self) -> f64 {
        let weight = if self.weight.is_finite() {
            self.weight.clamp(0.0, 1.0)
        } else {
            0.0
        };
        weight * self.severity.factor() * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Band an unrounded total; a raw 24.5 is still low.
    pub fn from_total(total: f64) -> Self {
        if total >= 75.0 {
            RiskLevel::Critical
        } else if total >= 50.0 {
            RiskLevel::High
        } else if total >= 25.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskScore {
    pub score: u8,
    pub level: RiskLevel,
}

impl Default for RiskScore {
    fn default() -> Self {
        Self {
            score: 0,
            level: RiskLevel::Low,
        }
    }
}

/// Running sum of indicator contributions.
#[derive(Debug, Default, Clone)]
pub struct RiskAccumulator {
    total: f64,
    count: usize,
}

impl RiskAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, indicator: &Indicator) {
        self.total += indicator.contribution();
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(&self) -> RiskScore {
        let total = if self.total.is_nan() {
            0.0
        } else {
            self.total.clamp(0.0, 100.0)
        };
        RiskScore {
            score: total.round() as u8,
            level: RiskLevel::from_total(total),
        }
    }
}

/// Score a set of indicators without a policy set.
pub fn score(indicators: &[Indicator]) -> RiskScore {
    let mut acc = RiskAccumulator::new();
    for indicator in indicators {
        acc.push(indicator);
    }
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_permission_and_missing_mfa_is_critical() {
        let result = score(&[
            Indicator::new("WILDCARD_PERMISSION", 0.8, Severity::High),
            Indicator::new("NO_MFA", 0.5, Severity::Medium),
        ]);
        assert_eq!(result.score, 85);
        assert_eq!(result.level, RiskLevel::Critical);
    }

    #[test]
    fn empty_indicator_list_scores_zero() {
        let result = score(&[]);
        assert_eq!(result.score, 0);
        assert_eq!(result.level, RiskLevel::Low);
    }

    #[test]
    fn score_is_clamped_to_100() {
        let many: Vec<Indicator> = (0..5)
            .map(|i| Indicator::new(format!("I{i}"), 1.0, Severity::Critical))
            .collect();
        assert_eq!(score(&many).score, 100);
    }

    #[test]
    fn weights_are_clamped() {
        let result = score(&[Indicator::new("X", 4.0, Severity::Low)]);
        assert_eq!(result.score, 25);
        let negative = score(&[Indicator::new("Y", -1.0, Severity::Critical)]);
        assert_eq!(negative.score, 0);
        let nan = score(&[Indicator::new("Z", f64::NAN, Severity::Critical)]);
        assert_eq!(nan.score, 0);
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(RiskLevel::from_total(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_total(24.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_total(25.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_total(49.9), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_total(50.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_total(74.9), RiskLevel::High);
        assert_eq!(RiskLevel::from_total(75.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_total(100.0), RiskLevel::Critical);
    }

    #[test]
    fn level_uses_the_unrounded_total() {
        let result = score(&[Indicator::new("STALE_TOKEN", 0.98, Severity::Low)]);
        assert_eq!(result.score, 25);
        assert_eq!(result.level, RiskLevel::Low);
    }

    #[test]
    fn info_indicator_contributes_a_tenth() {
        let result = score(&[Indicator::new("VERBOSE_ERRORS", 1.0, Severity::Info)]);
        assert_eq!(result.score, 10);
    }

    #[test]
    fn indicator_deserializes_type_field() {
        let i: Indicator =
            serde_json::from_str(r#"{"type":"NO_MFA","weight":0.5,"severity":"medium"}"#).unwrap();
        assert_eq!(i.kind, "NO_MFA");
        assert_eq!(i.severity, Severity::Medium);
    }
}
