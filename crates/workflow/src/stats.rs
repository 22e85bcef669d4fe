use std::sync::Arc;

use uuid::Uuid;

use nurture_core::{NurtureError, NurtureResult};

use crate::store::WorkflowStore;
use crate::types::{Enrollment, EnrollmentStatus, ExecutionLog, ExecutionStatus, WorkflowMetrics};

/// Read-only rollups over a workflow's enrollments and execution logs.
#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn WorkflowStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn workflow_metrics(&self, workflow_id: Uuid) -> NurtureResult<WorkflowMetrics> {
        if self.store.get_workflow(workflow_id).await?.is_none() {
            return Err(NurtureError::not_found("workflow", workflow_id));
        }
        let enrollments = self.store.enrollments_for_workflow(workflow_id).await?;
        let logs = self.store.logs_for_workflow(workflow_id).await?;
        Ok(rollup(workflow_id, &enrollments, &logs))
    }
}

/// Single pass over each collection. `processing` logs are in flight and not
/// counted in any bucket.
pub fn rollup(workflow_id: Uuid, enrollments: &[Enrollment], logs: &[ExecutionLog]) -> WorkflowMetrics {
    let mut metrics = WorkflowMetrics {
        workflow_id,
        enrolled: enrollments.len() as u64,
        ..WorkflowMetrics::default()
    };
    for enrollment in enrollments {
        match enrollment.status {
            EnrollmentStatus::Active => metrics.active += 1,
            EnrollmentStatus::Completed => metrics.completed += 1,
            EnrollmentStatus::Cancelled => metrics.cancelled += 1,
        }
    }
    for log in logs {
        match log.status {
            ExecutionStatus::Pending => metrics.pending += 1,
            ExecutionStatus::Sent => metrics.sent += 1,
            ExecutionStatus::Skipped => metrics.skipped += 1,
            ExecutionStatus::Failed => metrics.failed += 1,
            ExecutionStatus::Processing => {}
        }
    }
    metrics
}
