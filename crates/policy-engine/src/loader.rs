use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::error::{PolicyError, Result};
use crate::policy::PolicySet;
use crate::schema::PolicyDocument;

const SUPPORTED_SCHEMA: &str = "1.0";

/// On-disk encoding of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// `.json` files are JSON; anything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }
}

/// Load, validate and compile a [`PolicySet`] from a file on disk.
pub fn load_policy(path: impl AsRef<Path>) -> Result<PolicySet> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = parse_document(&contents, DocumentFormat::from_path(path))?;
    let policy = PolicySet::compile(&doc)?;
    info!(
        path = %path.display(),
        version = policy.version(),
        rules = policy.len(),
        enabled = policy.enabled_count(),
        "policy set loaded"
    );
    Ok(policy)
}

/// Parse, validate and compile a [`PolicySet`] from a YAML string.
pub fn load_policy_from_str(yaml: &str) -> Result<PolicySet> {
    let doc = parse_document(yaml, DocumentFormat::Yaml)?;
    PolicySet::compile(&doc)
}

/// Deserialize a document without validating it.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<PolicyDocument> {
    match format {
        DocumentFormat::Yaml => {
            serde_yml::from_str(text).map_err(|e| PolicyError::Parse(e.to_string()))
        }
        DocumentFormat::Json => {
            serde_json::from_str(text).map_err(|e| PolicyError::Parse(e.to_string()))
        }
    }
}

/// Structural checks that do not need the rule conditions compiled.
pub fn validate(doc: &PolicyDocument) -> Result<()> {
    if doc.schema != SUPPORTED_SCHEMA {
        return Err(PolicyError::UnsupportedSchema(doc.schema.clone()));
    }
    if doc.version.trim().is_empty() {
        return Err(PolicyError::MissingVersion);
    }

    let mut seen = HashSet::new();
    for (idx, rule) in doc.rules.iter().enumerate() {
        if rule.id.trim().is_empty() {
            return Err(PolicyError::EmptyRuleId(idx));
        }
        if !seen.insert(rule.id.as_str()) {
            return Err(PolicyError::DuplicateRule(rule.id.clone()));
        }

        if let Some(rl) = &rule.rate_limit {
            if rl.limit == 0 {
                return Err(PolicyError::rule(&rule.id, "rate_limit.limit must be at least 1"));
            }
            if rl.window_seconds == 0 {
                return Err(PolicyError::rule(
                    &rule.id,
                    "rate_limit.window_seconds must be at least 1",
                ));
            }
            if rl.window_seconds.checked_mul(1000).is_none() {
                return Err(PolicyError::rule(
                    &rule.id,
                    format!(
                        "rate_limit.window_seconds {} does not fit in milliseconds",
                        rl.window_seconds
                    ),
                ));
            }
            if rl.aggregate_key.trim().is_empty() {
                return Err(PolicyError::rule(&rule.id, "rate_limit.aggregate_key is empty"));
            }
        }

        for indicator in &rule.indicators {
            if indicator.kind.trim().is_empty() {
                return Err(PolicyError::rule(&rule.id, "indicator type is empty"));
            }
            if !(0.0..=1.0).contains(&indicator.weight) {
                return Err(PolicyError::rule(
                    &rule.id,
                    format!(
                        "indicator '{}' weight {} is outside 0..=1",
                        indicator.kind, indicator.weight
                    ),
                ));
            }
        }
    }

    Ok(())
}
