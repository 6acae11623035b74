use threadline_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Forwards audit events into the tracing pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let workstream_id = event.workstream_id.as_ref().map(|id| id.as_str().to_string());
        match event.outcome {
            AuditOutcome::Failed => warn!(
                event_name = "audit.event",
                audit_event = %event.event_type,
                category = ?event.category,
                outcome = ?event.outcome,
                session_id = %event.session_id,
                workstream_id = ?workstream_id,
                correlation_id = %event.correlation_id,
                metadata = ?event.metadata,
                "audit event recorded"
            ),
            AuditOutcome::Success | AuditOutcome::Rejected => info!(
                event_name = "audit.event",
                audit_event = %event.event_type,
                category = ?event.category,
                outcome = ?event.outcome,
                session_id = %event.session_id,
                workstream_id = ?workstream_id,
                correlation_id = %event.correlation_id,
                metadata = ?event.metadata,
                "audit event recorded"
            ),
        }
    }
}
