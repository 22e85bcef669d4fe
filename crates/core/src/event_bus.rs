//! Audit event bus — trait for recording engine audit events from any module.
//!
//! Modules accept an `Arc<dyn AuditSink>`. Recording is fire-and-forget: the
//! signature cannot fail, so a broken sink never fails the operation it
//! annotates.

use crate::types::{AuditEvent, AuditEventType};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Trait for recording audit events. Implementations must not block for long
/// and must swallow their own failures.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// No-op sink for tests and callers that don't need auditing.
pub struct NoOpSink;

impl AuditSink for NoOpSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Sink that writes each audit event as a structured `tracing` record.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "nurture_audit",
            event_id = %event.event_id,
            event_type = ?event.event_type,
            tenant_id = %event.tenant_id,
            workflow_id = ?event.workflow_id,
            enrollment_id = ?event.enrollment_id,
            execution_log_id = ?event.execution_log_id,
            details = %event.details,
            "Audit event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: AuditEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for CaptureSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for an `AuditEvent` with only the tenant filled in.
/// Callers chain the `with_*` setters for the ids they know.
pub fn make_event(event_type: AuditEventType, tenant_id: Uuid) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4(),
        event_type,
        tenant_id,
        workflow_id: None,
        enrollment_id: None,
        execution_log_id: None,
        participant_id: None,
        details: serde_json::Value::Null,
        timestamp: Utc::now(),
    }
}

impl AuditEvent {
    pub fn with_workflow(mut self, workflow_id: Uuid) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    pub fn with_enrollment(mut self, enrollment_id: Uuid, participant_id: &str) -> Self {
        self.enrollment_id = Some(enrollment_id);
        self.participant_id = Some(participant_id.to_string());
        self
    }

    pub fn with_execution_log(mut self, log_id: Uuid) -> Self {
        self.execution_log_id = Some(log_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Convenience: create a no-op sink.
pub fn noop_sink() -> Arc<dyn AuditSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
