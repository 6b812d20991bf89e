use audit_log::{AuditEntry, AuditSink, AuditSource, DecisionRecord};
use policy_engine::{AuditRecord, DecisionAudit};

/// Feeds engine decisions into the audit log without blocking the caller.
pub struct AuditBridge {
    sink: AuditSink,
    component: String,
}

impl AuditBridge {
    pub fn new(sink: AuditSink, component: impl Into<String>) -> Self {
        Self {
            sink,
            component: component.into(),
        }
    }
}

impl DecisionAudit for AuditBridge {
    fn record(&self, record: AuditRecord) {
        let mut source = AuditSource::new(self.component.as_str());
        if let Some(scope) = &record.scope {
            source = source.with_scope(scope.as_str());
        }
        let entry = AuditEntry::decision(source, record.timestamp, to_record(record));
        // Dropped entries are counted and logged by the sink.
        self.sink.try_log(entry);
    }
}

fn to_record(record: AuditRecord) -> DecisionRecord {
    let decision = record.decision;
    DecisionRecord {
        effect: decision.effect.to_string(),
        matched_rule: decision.matched_rule_id,
        reason: decision.reason,
        evaluated_rules: decision.evaluated_rule_count,
        risk_score: decision.risk.score,
        risk_level: decision.risk.level.to_string(),
        policy_version: record.policy_version,
        context_fingerprint: record.context_fingerprint,
        annotations: decision
            .annotations
            .into_iter()
            .map(|a| a.rule_id)
            .collect(),
    }
}
