use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use nurture_core::config::{AppConfig, ConditionConfig, SchedulerConfig};
use nurture_core::event_bus::{make_event, noop_sink, AuditSink};
use nurture_core::types::AuditEventType;
use nurture_core::{NurtureError, NurtureResult};

use crate::collaborators::{
    ActionService, EngagementStore, InMemoryActionService, InMemoryEngagementStore,
    ParticipantDirectory,
};
use crate::evaluator::ConditionEvaluator;
use crate::executor::ActionExecutor;
use crate::scheduler::SweepProcessor;
use crate::stats::MetricsAggregator;
use crate::store::{InMemoryWorkflowStore, WorkflowStore};
use crate::types::{
    ConditionKind, Delay, Enrollment, ExecutionLog, Step, StepCondition, StepSpec, SweepReport,
    WorkflowDefinition, WorkflowMetrics, MAX_DELAY_HOURS, MAX_NAME_LEN, MAX_STEPS,
    MAX_WINDOW_DAYS,
};

/// Entry point for every workflow operation: definitions, enrollments,
/// sweeps and metrics.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    engagement: Arc<dyn EngagementStore>,
    actions: Arc<dyn ActionService>,
    audit: Arc<dyn AuditSink>,
    directory: Option<Arc<dyn ParticipantDirectory>>,
    scheduler: SchedulerConfig,
    conditions: ConditionConfig,
    sweep: SweepProcessor,
    stats: MetricsAggregator,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("scheduler", &self.scheduler)
            .field("directory", &self.directory.is_some())
            .finish()
    }
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        engagement: Arc<dyn EngagementStore>,
        actions: Arc<dyn ActionService>,
        config: &AppConfig,
    ) -> Self {
        let audit = noop_sink();
        let sweep = assemble_sweep(
            &store,
            &engagement,
            &actions,
            &audit,
            &config.scheduler,
        );
        Self {
            stats: MetricsAggregator::new(store.clone()),
            store,
            engagement,
            actions,
            audit,
            directory: None,
            scheduler: config.scheduler.clone(),
            conditions: config.conditions.clone(),
            sweep,
        }
    }

    /// Engine backed entirely by in-process collaborators.
    pub fn in_memory(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(InMemoryWorkflowStore::new()),
            Arc::new(InMemoryEngagementStore::new()),
            Arc::new(InMemoryActionService::new()),
            config,
        )
    }

    /// Attach an audit sink for definition, enrollment and execution events.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self.sweep = assemble_sweep(
            &self.store,
            &self.engagement,
            &self.actions,
            &self.audit,
            &self.scheduler,
        );
        self
    }

    /// Restrict enrollment to participants the directory knows about.
    pub fn with_participant_directory(mut self, directory: Arc<dyn ParticipantDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    // ─── Definitions ────────────────────────────────────────────────────

    pub async fn create_workflow(&self, tenant_id: Uuid, name: &str) -> NurtureResult<WorkflowDefinition> {
        let name = name.trim();
        if name.is_empty() {
            return Err(NurtureError::validation("workflow name must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(NurtureError::validation(format!(
                "workflow name exceeds {} characters",
                MAX_NAME_LEN
            )));
        }

        let workflow = WorkflowDefinition::new(tenant_id, name);
        self.store.insert_workflow(workflow.clone()).await?;
        info!(workflow_id = %workflow.id, tenant_id = %tenant_id, name = %name, "Workflow created");
        metrics::counter!("nurture.workflows.created").increment(1);
        self.audit.record(
            make_event(AuditEventType::WorkflowCreated, tenant_id)
                .with_workflow(workflow.id)
                .with_details(json!({ "name": name })),
        );
        Ok(workflow)
    }

    /// Validates the step description and appends it as the next step.
    pub async fn add_step(&self, workflow_id: Uuid, spec: StepSpec) -> NurtureResult<Step> {
        let workflow = self.require_workflow(workflow_id).await?;
        let step = self.build_step(&workflow, spec)?;
        self.store.append_step(step.clone()).await?;

        info!(
            workflow_id = %workflow_id,
            step_number = step.step_number,
            action = step.action.kind(),
            condition = %step.condition.kind,
            "Step added"
        );
        self.audit.record(
            make_event(AuditEventType::StepAdded, workflow.tenant_id)
                .with_workflow(workflow_id)
                .with_details(json!({
                    "step_id": step.id,
                    "step_number": step.step_number,
                    "action": step.action.kind(),
                })),
        );
        Ok(step)
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> NurtureResult<WorkflowDefinition> {
        self.require_workflow(workflow_id).await
    }

    /// Deletes a workflow no active enrollment references.
    pub async fn delete_workflow(&self, workflow_id: Uuid) -> NurtureResult<()> {
        let workflow = self.require_workflow(workflow_id).await?;
        if !self.store.delete_workflow(workflow_id).await? {
            return Err(NurtureError::not_found("workflow", workflow_id));
        }
        info!(workflow_id = %workflow_id, "Workflow deleted");
        self.audit.record(
            make_event(AuditEventType::WorkflowDeleted, workflow.tenant_id).with_workflow(workflow_id),
        );
        Ok(())
    }

    // ─── Enrollments ────────────────────────────────────────────────────

    pub async fn enroll(&self, workflow_id: Uuid, participant_id: &str) -> NurtureResult<Enrollment> {
        self.enroll_at(Utc::now(), workflow_id, participant_id).await
    }

    /// Enrolls `participant_id` as of `now`, scheduling step 1 at
    /// `now + step[1].delay`. Returns the existing enrollment unchanged when
    /// the participant is already active in or has completed the workflow.
    pub async fn enroll_at(
        &self,
        now: DateTime<Utc>,
        workflow_id: Uuid,
        participant_id: &str,
    ) -> NurtureResult<Enrollment> {
        if participant_id.trim().is_empty() {
            return Err(NurtureError::validation("participant_id must not be empty"));
        }
        let workflow = self.require_workflow(workflow_id).await?;
        let Some(first_step) = workflow.step(1) else {
            return Err(NurtureError::validation(format!(
                "workflow {} has no steps",
                workflow_id
            )));
        };
        if let Some((step_number, target)) = workflow.dangling_branch() {
            return Err(NurtureError::validation(format!(
                "step {} branches to step {} which does not exist",
                step_number, target
            )));
        }
        if let Some(directory) = &self.directory {
            if !directory.exists(workflow.tenant_id, participant_id).await? {
                return Err(NurtureError::not_found("participant", participant_id));
            }
        }

        let enrollment = Enrollment::new(&workflow, participant_id, now);
        let first_log = ExecutionLog::schedule(&enrollment, first_step, now)?;
        let scheduled_for = first_log.scheduled_for;
        let (enrollment, created) = self.store.insert_enrollment(enrollment, first_log).await?;

        if created {
            info!(
                enrollment_id = %enrollment.id,
                workflow_id = %workflow_id,
                participant_id = %participant_id,
                scheduled_for = %scheduled_for,
                "Participant enrolled"
            );
            metrics::counter!("nurture.enrollments.created").increment(1);
            self.audit.record(
                make_event(AuditEventType::EnrollmentCreated, enrollment.tenant_id)
                    .with_workflow(workflow_id)
                    .with_enrollment(enrollment.id, participant_id),
            );
        } else {
            debug!(enrollment_id = %enrollment.id, "Enroll returned existing enrollment");
        }
        Ok(enrollment)
    }

    pub async fn get_enrollment(&self, enrollment_id: Uuid) -> NurtureResult<Enrollment> {
        self.store
            .get_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| NurtureError::not_found("enrollment", enrollment_id))
    }

    /// Stops an active enrollment. A pending log is skipped at dispatch time.
    pub async fn cancel_enrollment(&self, enrollment_id: Uuid) -> NurtureResult<Enrollment> {
        let now = Utc::now();
        let enrollment = self.store.cancel_enrollment(enrollment_id, now).await?;
        if enrollment.cancelled_at == Some(now) {
            info!(enrollment_id = %enrollment_id, "Enrollment cancelled");
            metrics::counter!("nurture.enrollments.cancelled").increment(1);
            self.audit.record(
                make_event(AuditEventType::EnrollmentCancelled, enrollment.tenant_id)
                    .with_workflow(enrollment.workflow_id)
                    .with_enrollment(enrollment.id, &enrollment.participant_id),
            );
        }
        Ok(enrollment)
    }

    pub async fn execution_logs(&self, enrollment_id: Uuid) -> NurtureResult<Vec<ExecutionLog>> {
        self.get_enrollment(enrollment_id).await?;
        self.store.logs_for_enrollment(enrollment_id).await
    }

    /// Puts a failed log back to pending, due immediately.
    pub async fn retry_execution(&self, log_id: Uuid) -> NurtureResult<ExecutionLog> {
        let log = self.store.reset_failed_log(log_id, Utc::now()).await?;
        info!(log_id = %log_id, enrollment_id = %log.enrollment_id, "Execution retried");
        metrics::counter!("nurture.executions.retried").increment(1);
        self.audit.record(
            make_event(AuditEventType::ExecutionRetried, log.tenant_id)
                .with_workflow(log.workflow_id)
                .with_execution_log(log.id)
                .with_details(json!({ "step_number": log.step_number })),
        );
        Ok(log)
    }

    // ─── Scheduling ─────────────────────────────────────────────────────

    /// One sweep now. `batch_size` defaults to the configured batch.
    pub async fn run_sweep(&self, batch_size: Option<usize>) -> NurtureResult<SweepReport> {
        self.run_sweep_at(Utc::now(), batch_size.unwrap_or(self.scheduler.batch_size))
            .await
    }

    pub async fn run_sweep_at(&self, now: DateTime<Utc>, batch_size: usize) -> NurtureResult<SweepReport> {
        self.sweep.run_sweep_at(now, batch_size).await
    }

    // ─── Metrics ────────────────────────────────────────────────────────

    pub async fn get_metrics(&self, workflow_id: Uuid) -> NurtureResult<WorkflowMetrics> {
        self.stats.workflow_metrics(workflow_id).await
    }

    // ─── Internals ──────────────────────────────────────────────────────

    async fn require_workflow(&self, workflow_id: Uuid) -> NurtureResult<WorkflowDefinition> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| NurtureError::not_found("workflow", workflow_id))
    }

    fn build_step(&self, workflow: &WorkflowDefinition, spec: StepSpec) -> NurtureResult<Step> {
        let expected = workflow.step_count() + 1;
        if spec.step_number != expected {
            return Err(NurtureError::validation(format!(
                "step_number {} is not contiguous; expected {}",
                spec.step_number, expected
            )));
        }
        if spec.step_number > MAX_STEPS {
            return Err(NurtureError::validation(format!(
                "workflow cannot have more than {} steps",
                MAX_STEPS
            )));
        }

        let delay = Delay::new(
            delay_component("delay_days", spec.delay_days)?,
            delay_component("delay_hours", spec.delay_hours)?,
        );
        if delay.total_hours() > MAX_DELAY_HOURS {
            return Err(NurtureError::validation(format!(
                "delay of {}d {}h exceeds the maximum of {} days",
                delay.days,
                delay.hours,
                MAX_DELAY_HOURS / 24
            )));
        }

        let kind: ConditionKind = spec.condition.parse().map_err(NurtureError::Validation)?;
        let window_days = spec
            .condition_window_days
            .unwrap_or(self.conditions.default_window_days);
        if kind != ConditionKind::None && window_days == 0 {
            return Err(NurtureError::validation(format!(
                "condition {} needs a window of at least one day",
                kind
            )));
        }
        if window_days > MAX_WINDOW_DAYS {
            return Err(NurtureError::validation(format!(
                "condition_window_days {} exceeds the maximum of {}",
                window_days, MAX_WINDOW_DAYS
            )));
        }

        if let Some(target) = spec.next_step_if_false {
            if target <= spec.step_number || target > MAX_STEPS {
                return Err(NurtureError::validation(format!(
                    "next_step_if_false {} must point forward from step {} and not past step {}; \
                     branching back to an earlier step would loop",
                    target, spec.step_number, MAX_STEPS
                )));
            }
        }

        spec.action.validate().map_err(NurtureError::Validation)?;

        Ok(Step {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            step_number: spec.step_number,
            delay,
            condition: StepCondition::new(kind, window_days),
            action: spec.action,
            next_step_if_false: spec.next_step_if_false,
            created_at: Utc::now(),
        })
    }
}

fn delay_component(field: &str, value: i64) -> NurtureResult<u32> {
    if value < 0 {
        return Err(NurtureError::validation(format!("{} must not be negative", field)));
    }
    u32::try_from(value).map_err(|_| NurtureError::validation(format!("{} is too large", field)))
}

fn assemble_sweep(
    store: &Arc<dyn WorkflowStore>,
    engagement: &Arc<dyn EngagementStore>,
    actions: &Arc<dyn ActionService>,
    audit: &Arc<dyn AuditSink>,
    config: &SchedulerConfig,
) -> SweepProcessor {
    let evaluator = ConditionEvaluator::new(engagement.clone(), config.call_timeout());
    let executor = ActionExecutor::new(actions.clone(), audit.clone(), config.call_timeout());
    SweepProcessor::new(store.clone(), evaluator, executor, audit.clone(), config)
}
