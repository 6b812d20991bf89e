use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decision::Decision;

/// What the engine hands to the audit sink after every evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub decision: Decision,
    /// SHA-256 of the canonical context JSON; the context itself is not kept.
    pub context_fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub policy_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Receives decisions for compliance logging.
///
/// Called on the evaluation path: implementations must hand the record off
/// without blocking (e.g. a bounded channel `try_send`) and drop it if they
/// cannot.
pub trait DecisionAudit: Send + Sync {
    fn record(&self, record: AuditRecord);
}
