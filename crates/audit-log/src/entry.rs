use serde::{Deserialize, Serialize};

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionRecord>,
}

impl AuditEntry {
    /// New entry with a v4 id, stamped now.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
            decision: None,
        }
    }

    /// A `decision_recorded` entry carrying `decision`, stamped with the time
    /// the decision was made rather than the time it is logged.
    pub fn decision(
        source: AuditSource,
        timestamp: chrono::DateTime<chrono::Utc>,
        decision: DecisionRecord,
    ) -> Self {
        Self {
            timestamp,
            ..Self::new(AuditEventType::DecisionRecorded, source, serde_json::Value::Null)
        }
        .with_decision(decision)
    }

    pub fn with_decision(mut self, decision: DecisionRecord) -> Self {
        self.decision = Some(decision);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    EngineStarted,
    EngineStopped,
    PolicyLoaded,
    PolicyRejected,
    DecisionRecorded,
}

/// Which component wrote the entry, and for which scope or request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AuditSource {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            scope: None,
            request_id: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Compliance view of one decision. Carries a fingerprint of the evaluated
/// context, never the context itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub effect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    pub reason: String,
    pub evaluated_rules: usize,
    pub risk_score: u8,
    pub risk_level: String,
    pub policy_version: String,
    pub context_fingerprint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
}
