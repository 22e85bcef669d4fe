use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use nurture_core::event_bus::{make_event, AuditSink};
use nurture_core::types::AuditEventType;
use nurture_core::{NurtureError, NurtureResult};

use crate::collaborators::ActionService;
use crate::types::{Enrollment, ExecutionLog, Step};

/// Runs a step's action through the `ActionService` under a bounded timeout
/// and leaves one audit record per attempt.
#[derive(Clone)]
pub struct ActionExecutor {
    service: Arc<dyn ActionService>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(service: Arc<dyn ActionService>, audit: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        Self {
            service,
            audit,
            timeout,
        }
    }

    /// Returns the artifact id produced by the action.
    pub async fn execute(
        &self,
        step: &Step,
        enrollment: &Enrollment,
        log: &ExecutionLog,
    ) -> NurtureResult<String> {
        let kind = step.action.kind();
        let start = Instant::now();
        let result = match tokio::time::timeout(
            self.timeout,
            self.service.execute(&step.action, &enrollment.participant_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NurtureError::Timeout(self.timeout.as_millis() as u64)),
        };
        metrics::histogram!("nurture.actions.duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        let event = |event_type: AuditEventType| {
            make_event(event_type, enrollment.tenant_id)
                .with_workflow(enrollment.workflow_id)
                .with_enrollment(enrollment.id, &enrollment.participant_id)
                .with_execution_log(log.id)
        };

        match &result {
            Ok(artifact_id) => {
                info!(
                    enrollment_id = %enrollment.id,
                    step_number = step.step_number,
                    action = kind,
                    artifact_id = %artifact_id,
                    "Action executed"
                );
                metrics::counter!("nurture.actions.executed").increment(1);
                self.audit
                    .record(event(AuditEventType::ActionExecuted).with_details(json!({
                        "step_number": step.step_number,
                        "action": kind,
                        "artifact_id": artifact_id,
                    })));
            }
            Err(e) => {
                warn!(
                    enrollment_id = %enrollment.id,
                    step_number = step.step_number,
                    action = kind,
                    error = %e,
                    "Action failed"
                );
                metrics::counter!("nurture.actions.failed").increment(1);
                self.audit
                    .record(event(AuditEventType::ActionFailed).with_details(json!({
                        "step_number": step.step_number,
                        "action": kind,
                        "error": e.to_string(),
                    })));
            }
        }
        result
    }
}
