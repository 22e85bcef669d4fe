//! Persistence for workflow definitions, enrollments and execution logs.
//!
//! `WorkflowStore` is the only shared mutable resource of the engine; every
//! cross-sweep guarantee (claim exclusivity, one pending log per enrollment,
//! cancellation winning over advancement) is enforced here by conditional
//! updates. `InMemoryWorkflowStore` backs development and tests with DashMap;
//! a relational implementation maps each conditional update onto
//! `UPDATE .. WHERE id = $1 AND status = $2` inside one transaction.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nurture_core::{NurtureError, NurtureResult};

use crate::state_machine::StateMachine;
use crate::types::{
    Advancement, CommitResult, Enrollment, EnrollmentStatus, ExecutionLog, ExecutionStatus,
    LogOutcome, Step, StepCommit, WorkflowDefinition,
};

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert_workflow(&self, workflow: WorkflowDefinition) -> NurtureResult<()>;

    async fn get_workflow(&self, id: Uuid) -> NurtureResult<Option<WorkflowDefinition>>;

    /// Appends `step` to its workflow. Fails unless `step.step_number` is
    /// exactly one past the current last step.
    async fn append_step(&self, step: Step) -> NurtureResult<()>;

    /// Removes a workflow. `Conflict` while any active enrollment references it;
    /// `Ok(false)` when it does not exist.
    async fn delete_workflow(&self, id: Uuid) -> NurtureResult<bool>;

    /// Atomically inserts `enrollment` and its first log, unless an active or
    /// completed enrollment already exists for the same (workflow, participant),
    /// in which case that one is returned and nothing is written.
    /// The flag is `true` when a new enrollment was created. `NotFound` when
    /// the workflow is gone by the time the rows would be written.
    async fn insert_enrollment(
        &self,
        enrollment: Enrollment,
        first_log: ExecutionLog,
    ) -> NurtureResult<(Enrollment, bool)>;

    async fn get_enrollment(&self, id: Uuid) -> NurtureResult<Option<Enrollment>>;

    /// Active -> cancelled. Cancelling a cancelled enrollment is a no-op.
    async fn cancel_enrollment(&self, id: Uuid, at: DateTime<Utc>) -> NurtureResult<Enrollment>;

    async fn enrollments_for_workflow(&self, workflow_id: Uuid) -> NurtureResult<Vec<Enrollment>>;

    async fn get_execution_log(&self, id: Uuid) -> NurtureResult<Option<ExecutionLog>>;

    /// Up to `limit` dispatchable logs, oldest first: pending logs with
    /// `scheduled_for <= now`, and processing logs whose claim was taken at or
    /// before `stale_before` and never committed.
    async fn due_logs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> NurtureResult<Vec<ExecutionLog>>;

    /// Conditional `pending -> processing`, or a re-claim of a processing log
    /// whose claim is no newer than `stale_before`. `Ok(false)` means zero
    /// rows were affected: the log holds a live claim or is terminal.
    async fn claim_log(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> NurtureResult<bool>;

    /// Writes a claimed log's terminal outcome and applies the advancement in
    /// one step. The advancement is dropped if the enrollment is no longer active.
    async fn commit_step(&self, commit: StepCommit) -> NurtureResult<CommitResult>;

    /// Explicit `failed -> pending` reset, due at `at`. Refused unless the
    /// owning enrollment is active.
    async fn reset_failed_log(&self, id: Uuid, at: DateTime<Utc>) -> NurtureResult<ExecutionLog>;

    async fn logs_for_enrollment(&self, enrollment_id: Uuid) -> NurtureResult<Vec<ExecutionLog>>;

    async fn logs_for_workflow(&self, workflow_id: Uuid) -> NurtureResult<Vec<ExecutionLog>>;
}

/// Thread-safe in-memory store.
///
/// Lock order is `workflows -> participant_index -> enrollments -> logs`; no
/// method takes a guard on a map it already holds a guard on.
pub struct InMemoryWorkflowStore {
    workflows: DashMap<Uuid, WorkflowDefinition>,
    enrollments: DashMap<Uuid, Enrollment>,
    /// (workflow_id, participant_id) -> most recent enrollment id
    participant_index: DashMap<(Uuid, String), Uuid>,
    logs: DashMap<Uuid, ExecutionLog>,
    log_states: StateMachine<ExecutionStatus>,
    enrollment_states: StateMachine<EnrollmentStatus>,
    offline: AtomicBool,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        info!("Workflow store initialized (in-memory)");
        Self {
            workflows: DashMap::new(),
            enrollments: DashMap::new(),
            participant_index: DashMap::new(),
            logs: DashMap::new(),
            log_states: StateMachine::execution_log(),
            enrollment_states: StateMachine::enrollment(),
            offline: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with `NurtureError::Store`, simulating
    /// an unreachable database.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> NurtureResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(NurtureError::Store("workflow store unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn write_outcome(&self, commit: &StepCommit) -> NurtureResult<()> {
        let mut log = self
            .logs
            .get_mut(&commit.log_id)
            .ok_or_else(|| NurtureError::not_found("execution log", commit.log_id))?;
        let target = commit.outcome.status();
        let trigger = self.log_states.check(log.status, target)?;
        debug!(log_id = %log.id, trigger, "Execution log transition");
        log.status = target;
        match &commit.outcome {
            LogOutcome::Sent { artifact_id } => {
                log.sent_at = Some(commit.at);
                log.artifact_id = Some(artifact_id.clone());
            }
            LogOutcome::Skipped { reason } => log.skip_reason = Some(reason.clone()),
            LogOutcome::Failed { error } => log.error_message = Some(error.clone()),
        }
        Ok(())
    }
}

fn is_stale(claimed_at: Option<DateTime<Utc>>, stale_before: DateTime<Utc>) -> bool {
    claimed_at.map_or(true, |at| at <= stale_before)
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert_workflow(&self, workflow: WorkflowDefinition) -> NurtureResult<()> {
        self.ensure_online()?;
        self.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> NurtureResult<Option<WorkflowDefinition>> {
        self.ensure_online()?;
        Ok(self.workflows.get(&id).map(|r| r.value().clone()))
    }

    async fn append_step(&self, step: Step) -> NurtureResult<()> {
        self.ensure_online()?;
        let mut workflow = self
            .workflows
            .get_mut(&step.workflow_id)
            .ok_or_else(|| NurtureError::not_found("workflow", step.workflow_id))?;
        let expected = workflow.step_count() + 1;
        if step.step_number != expected {
            return Err(NurtureError::Validation(format!(
                "step_number {} is not contiguous; expected {}",
                step.step_number, expected
            )));
        }
        workflow.updated_at = step.created_at;
        workflow.steps.push(step);
        Ok(())
    }

    async fn delete_workflow(&self, id: Uuid) -> NurtureResult<bool> {
        self.ensure_online()?;
        let Entry::Occupied(entry) = self.workflows.entry(id) else {
            return Ok(false);
        };
        let active = self
            .enrollments
            .iter()
            .filter(|e| e.workflow_id == id && e.status == EnrollmentStatus::Active)
            .count();
        if active > 0 {
            return Err(NurtureError::Conflict(format!(
                "workflow {} has {} active enrollments",
                id, active
            )));
        }
        entry.remove();
        Ok(true)
    }

    async fn insert_enrollment(
        &self,
        enrollment: Enrollment,
        first_log: ExecutionLog,
    ) -> NurtureResult<(Enrollment, bool)> {
        self.ensure_online()?;
        // Held until the rows are written so delete_workflow cannot slip in
        // between its active-enrollment count and our insert.
        let Some(_workflow) = self.workflows.get(&enrollment.workflow_id) else {
            return Err(NurtureError::not_found("workflow", enrollment.workflow_id));
        };
        let key = (enrollment.workflow_id, enrollment.participant_id.clone());
        // The index entry stays locked until the new rows are in place, so a
        // concurrent enroll for the same key waits and then sees them.
        let entry = self.participant_index.entry(key);
        if let Entry::Occupied(ref occupied) = entry {
            if let Some(existing) = self.enrollments.get(occupied.get()) {
                if existing.status != EnrollmentStatus::Cancelled {
                    debug!(enrollment_id = %existing.id, "Enrollment already exists");
                    return Ok((existing.value().clone(), false));
                }
            }
        }
        self.enrollments.insert(enrollment.id, enrollment.clone());
        self.logs.insert(first_log.id, first_log);
        entry.insert(enrollment.id);
        Ok((enrollment, true))
    }

    async fn get_enrollment(&self, id: Uuid) -> NurtureResult<Option<Enrollment>> {
        self.ensure_online()?;
        Ok(self.enrollments.get(&id).map(|r| r.value().clone()))
    }

    async fn cancel_enrollment(&self, id: Uuid, at: DateTime<Utc>) -> NurtureResult<Enrollment> {
        self.ensure_online()?;
        let mut enrollment = self
            .enrollments
            .get_mut(&id)
            .ok_or_else(|| NurtureError::not_found("enrollment", id))?;
        if enrollment.status == EnrollmentStatus::Cancelled {
            return Ok(enrollment.value().clone());
        }
        let trigger = self
            .enrollment_states
            .check(enrollment.status, EnrollmentStatus::Cancelled)?;
        debug!(enrollment_id = %id, trigger, "Enrollment transition");
        enrollment.status = EnrollmentStatus::Cancelled;
        enrollment.cancelled_at = Some(at);
        enrollment.updated_at = at;
        Ok(enrollment.value().clone())
    }

    async fn enrollments_for_workflow(&self, workflow_id: Uuid) -> NurtureResult<Vec<Enrollment>> {
        self.ensure_online()?;
        let mut enrollments: Vec<Enrollment> = self
            .enrollments
            .iter()
            .filter(|r| r.value().workflow_id == workflow_id)
            .map(|r| r.value().clone())
            .collect();
        enrollments.sort_by_key(|e| e.created_at);
        Ok(enrollments)
    }

    async fn get_execution_log(&self, id: Uuid) -> NurtureResult<Option<ExecutionLog>> {
        self.ensure_online()?;
        Ok(self.logs.get(&id).map(|r| r.value().clone()))
    }

    async fn due_logs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> NurtureResult<Vec<ExecutionLog>> {
        self.ensure_online()?;
        let mut due: Vec<ExecutionLog> = self
            .logs
            .iter()
            .filter(|r| match r.status {
                ExecutionStatus::Pending => r.scheduled_for <= now,
                ExecutionStatus::Processing => is_stale(r.claimed_at, stale_before),
                _ => false,
            })
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|l| (l.scheduled_for, l.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_log(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> NurtureResult<bool> {
        self.ensure_online()?;
        let Some(mut log) = self.logs.get_mut(&id) else {
            return Ok(false);
        };
        if log.status == ExecutionStatus::Processing && !is_stale(log.claimed_at, stale_before) {
            return Ok(false);
        }
        let Ok(trigger) = self.log_states.check(log.status, ExecutionStatus::Processing) else {
            return Ok(false);
        };
        if log.status == ExecutionStatus::Processing {
            warn!(
                log_id = %id,
                claimed_at = ?log.claimed_at,
                "Reclaiming execution log with an expired claim"
            );
        }
        debug!(log_id = %id, trigger, "Execution log transition");
        log.status = ExecutionStatus::Processing;
        log.claimed_at = Some(at);
        Ok(true)
    }

    async fn commit_step(&self, commit: StepCommit) -> NurtureResult<CommitResult> {
        self.ensure_online()?;
        let enrollment_id = self
            .logs
            .get(&commit.log_id)
            .map(|l| l.enrollment_id)
            .ok_or_else(|| NurtureError::not_found("execution log", commit.log_id))?;

        let mut guard = self.enrollments.get_mut(&enrollment_id);
        self.write_outcome(&commit)?;

        let Some(enrollment) = guard.as_mut() else {
            return Ok(CommitResult {
                enrollment: None,
                advanced: false,
            });
        };

        let advanced = if enrollment.status == EnrollmentStatus::Active {
            match commit.advancement {
                Advancement::Stay => false,
                Advancement::MoveTo {
                    step_number,
                    next_log,
                } => {
                    enrollment.current_step = step_number;
                    self.logs.insert(next_log.id, next_log);
                    true
                }
                Advancement::Complete { final_step } => {
                    let trigger = self
                        .enrollment_states
                        .check(enrollment.status, EnrollmentStatus::Completed)?;
                    debug!(enrollment_id = %enrollment_id, trigger, "Enrollment transition");
                    enrollment.current_step = final_step;
                    enrollment.status = EnrollmentStatus::Completed;
                    enrollment.completed_at = Some(commit.at);
                    true
                }
            }
        } else {
            false
        };
        if advanced {
            enrollment.updated_at = commit.at;
        }

        Ok(CommitResult {
            enrollment: Some(enrollment.value().clone()),
            advanced,
        })
    }

    async fn reset_failed_log(&self, id: Uuid, at: DateTime<Utc>) -> NurtureResult<ExecutionLog> {
        self.ensure_online()?;
        let enrollment_id = self
            .logs
            .get(&id)
            .map(|l| l.enrollment_id)
            .ok_or_else(|| NurtureError::not_found("execution log", id))?;
        let enrollment = self
            .enrollments
            .get(&enrollment_id)
            .ok_or_else(|| NurtureError::not_found("enrollment", enrollment_id))?;
        if enrollment.status != EnrollmentStatus::Active {
            return Err(NurtureError::Conflict(format!(
                "enrollment {} is {:?}",
                enrollment_id, enrollment.status
            )));
        }

        let mut log = self
            .logs
            .get_mut(&id)
            .ok_or_else(|| NurtureError::not_found("execution log", id))?;
        let trigger = self.log_states.check(log.status, ExecutionStatus::Pending)?;
        debug!(log_id = %id, trigger, "Execution log transition");
        log.status = ExecutionStatus::Pending;
        log.scheduled_for = at;
        log.claimed_at = None;
        log.error_message = None;
        Ok(log.value().clone())
    }

    async fn logs_for_enrollment(&self, enrollment_id: Uuid) -> NurtureResult<Vec<ExecutionLog>> {
        self.ensure_online()?;
        let mut logs: Vec<ExecutionLog> = self
            .logs
            .iter()
            .filter(|r| r.enrollment_id == enrollment_id)
            .map(|r| r.value().clone())
            .collect();
        logs.sort_by_key(|l| (l.created_at, l.step_number));
        Ok(logs)
    }

    async fn logs_for_workflow(&self, workflow_id: Uuid) -> NurtureResult<Vec<ExecutionLog>> {
        self.ensure_online()?;
        Ok(self
            .logs
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .map(|r| r.value().clone())
            .collect())
    }
}
