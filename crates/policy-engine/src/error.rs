use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced synchronously by the engine.
///
/// Everything here is a configuration-time failure: a policy that cannot be
/// read, parsed, validated, or compiled. Data-shape problems in the events
/// being evaluated never produce a `PolicyError`; they degrade to "no match".
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("policy deserialization failed: {0}")]
    Parse(String),

    #[error("unsupported policy schema '{0}'; only '1.0' is supported")]
    UnsupportedSchema(String),

    #[error("policy version must not be empty")]
    MissingVersion,

    #[error("rule id must not be empty (rule #{0})")]
    EmptyRuleId(usize),

    #[error("duplicate rule id: '{0}'")]
    DuplicateRule(String),

    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("invalid condition on field '{field}' in rule '{rule}': {reason}")]
    InvalidCondition {
        rule: String,
        field: String,
        reason: String,
    },

    #[error("context must be a JSON object, got {0}")]
    InvalidContext(&'static str),

    #[error("policy scope '{0}' not found")]
    ScopeNotFound(String),

    #[error("invalid policy scope name '{0}'")]
    InvalidScope(String),
}

impl PolicyError {
    pub(crate) fn rule(rule: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn condition(rule: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCondition {
            rule: rule.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_error_names_rule_and_field() {
        let err = PolicyError::condition("block-admin", "request.uri", "bad regex");
        let msg = err.to_string();
        assert!(msg.contains("block-admin"));
        assert!(msg.contains("request.uri"));
        assert!(msg.contains("bad regex"));
    }

    #[test]
    fn io_error_includes_path() {
        let err = PolicyError::Io {
            path: PathBuf::from("/etc/rulegate/edge.yaml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/etc/rulegate/edge.yaml"));
    }
}
