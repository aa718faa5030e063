use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// One audit-trail entry describing a state change the engine made.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: &'static str,
    /// The user the change happened on behalf of, when there is one.
    pub actor: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub subject_type: &'static str,
    pub subject_id: String,
    pub data: Value,
}

/// Fire-and-forget audit sink. Implementations must swallow their own
/// delivery failures; settlement never blocks on the audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_event(&self, event: AuditEvent);
}

/// Default sink: emits the event as a structured tracing record.
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record_event(&self, event: AuditEvent) {
        tracing::info!(
            kind = event.kind,
            actor = ?event.actor,
            project_id = ?event.project_id,
            subject_type = event.subject_type,
            subject_id = %event.subject_id,
            data = %event.data,
            "audit event"
        );
    }
}
