use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of engagement a participant can produce on delivered content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngagementEventType {
    Open,
    Click,
    Reply,
}

/// An engagement record owned by the engagement-history collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub participant_id: String,
    pub event_type: EngagementEventType,
    pub occurred_at: DateTime<Utc>,
}

/// Audit record emitted by the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: AuditEventType,
    pub tenant_id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub enrollment_id: Option<Uuid>,
    pub execution_log_id: Option<Uuid>,
    pub participant_id: Option<String>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Definition events
    WorkflowCreated,
    WorkflowDeleted,
    StepAdded,
    // Enrollment events
    EnrollmentCreated,
    EnrollmentCompleted,
    EnrollmentCancelled,
    // Execution events
    ActionExecuted,
    ActionFailed,
    StepSkipped,
    ExecutionRetried,
}
