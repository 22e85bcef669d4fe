//! Sweep processor: one pass over due execution logs.
//!
//! A sweep holds no state between invocations. Each due log is claimed with a
//! conditional `pending -> processing` update, so concurrent sweeps (in one
//! process or many) never dispatch the same log twice. Claimed items run as
//! tasks bounded by a semaphore; an error on one item is written to that log
//! and never stops the rest of the batch.
//!
//! A claim whose outcome never got written (store outage mid-item, crashed
//! node) expires after the claim lease and is picked up by a later sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use nurture_core::config::SchedulerConfig;
use nurture_core::event_bus::{make_event, AuditSink};
use nurture_core::types::AuditEventType;
use nurture_core::{NurtureError, NurtureResult};

use crate::evaluator::ConditionEvaluator;
use crate::executor::ActionExecutor;
use crate::store::WorkflowStore;
use crate::types::{
    Advancement, Enrollment, EnrollmentStatus, ExecutionLog, LogOutcome, Step, StepCommit,
    SweepReport, WorkflowDefinition,
};

/// How a single due log ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Sent,
    Skipped,
    Failed,
    /// Another sweep claimed the log first.
    Conflict,
}

#[derive(Clone)]
pub struct SweepProcessor {
    store: Arc<dyn WorkflowStore>,
    evaluator: ConditionEvaluator,
    executor: ActionExecutor,
    audit: Arc<dyn AuditSink>,
    max_concurrency: usize,
    claim_timeout: Duration,
    claim_lease: Duration,
}

impl SweepProcessor {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        evaluator: ConditionEvaluator,
        executor: ActionExecutor,
        audit: Arc<dyn AuditSink>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            evaluator,
            executor,
            audit,
            max_concurrency: config.max_concurrency.max(1),
            claim_timeout: config.call_timeout(),
            claim_lease: config.claim_lease(),
        }
    }

    /// Claims taken at or before this instant have expired.
    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        ChronoDuration::from_std(self.claim_lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Processes up to `batch_size` logs due at `now`.
    ///
    /// Only a failure to select the batch is returned as an error; every
    /// per-item problem is recorded on the item and counted in the report.
    pub async fn run_sweep_at(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> NurtureResult<SweepReport> {
        if batch_size == 0 {
            return Err(NurtureError::validation("batch_size must be at least 1"));
        }
        let start = Instant::now();
        metrics::counter!("nurture.sweep.runs").increment(1);

        let due = self
            .store
            .due_logs(now, self.stale_before(now), batch_size)
            .await
            .map_err(|e| {
                error!(error = %e, "Sweep aborted: could not select due logs");
                metrics::counter!("nurture.sweep.aborted").increment(1);
                e
            })?;

        let mut report = SweepReport {
            selected: due.len(),
            ..SweepReport::default()
        };
        if due.is_empty() {
            debug!("Sweep found no due logs");
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        for log in due {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| NurtureError::Internal(e.into()))?;
            let processor = self.clone();
            tasks.spawn(async move {
                // Keep permit until done
                let _permit = permit;
                let claimed = log.clone();
                let item = tokio::spawn({
                    let processor = processor.clone();
                    async move { processor.process_item(log, now).await }
                });
                match item.await {
                    Ok(outcome) => outcome,
                    Err(e) => processor.release_aborted(&claimed, e, now).await,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ItemOutcome::Sent) => {
                    report.processed += 1;
                    report.sent += 1;
                }
                Ok(ItemOutcome::Skipped) => {
                    report.processed += 1;
                    report.skipped += 1;
                }
                Ok(ItemOutcome::Failed) => {
                    report.processed += 1;
                    report.failed += 1;
                }
                Ok(ItemOutcome::Conflict) => report.conflicts += 1,
                Err(e) => {
                    error!(error = %e, "Sweep item task aborted");
                    report.failed += 1;
                }
            }
        }

        metrics::histogram!("nurture.sweep.duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        info!(
            selected = report.selected,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            conflicts = report.conflicts,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Claims one log and drives it to a terminal state.
    pub async fn process_item(&self, log: ExecutionLog, now: DateTime<Utc>) -> ItemOutcome {
        let claim = self.store.claim_log(log.id, now, self.stale_before(now));
        match tokio::time::timeout(self.claim_timeout, claim).await {
            Ok(Ok(true)) => {
                metrics::counter!("nurture.sweep.claimed").increment(1);
            }
            Ok(Ok(false)) => {
                debug!(error = %NurtureError::ClaimConflict(log.id), "Skipping claimed log");
                metrics::counter!("nurture.sweep.conflicts").increment(1);
                return ItemOutcome::Conflict;
            }
            Ok(Err(e)) => {
                warn!(
                    log_id = %log.id,
                    error = %e,
                    "Claim failed; log is retried on a later tick"
                );
                return ItemOutcome::Failed;
            }
            Err(_) => {
                warn!(
                    log_id = %log.id,
                    timeout_ms = self.claim_timeout.as_millis() as u64,
                    "Claim timed out; log is retried on a later tick"
                );
                return ItemOutcome::Failed;
            }
        }

        let enrollment = match self.store.get_enrollment(log.enrollment_id).await {
            Ok(Some(enrollment)) => enrollment,
            Ok(None) => {
                let error = format!("enrollment {} not found", log.enrollment_id);
                return self.fail(&log, error, now).await;
            }
            Err(e) => return self.fail(&log, e.to_string(), now).await,
        };

        if enrollment.status != EnrollmentStatus::Active {
            let reason = match enrollment.status {
                EnrollmentStatus::Cancelled => "enrollment cancelled",
                _ => "enrollment no longer active",
            };
            return self
                .skip(&log, &enrollment, reason.to_string(), Advancement::Stay, now)
                .await;
        }

        let workflow = match self.store.get_workflow(log.workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                let error = format!("workflow {} not found", log.workflow_id);
                return self.fail(&log, error, now).await;
            }
            Err(e) => return self.fail(&log, e.to_string(), now).await,
        };
        let Some(step) = workflow.step(log.step_number) else {
            let error = format!("step {} not found", log.step_number);
            return self.fail(&log, error, now).await;
        };

        let holds = match self
            .evaluator
            .evaluate(&enrollment.participant_id, &step.condition, now)
            .await
        {
            Ok(holds) => holds,
            Err(e) => return self.fail(&log, e.to_string(), now).await,
        };

        if !holds {
            let reason = format!("condition {} not met", step.condition.kind);
            let advancement = match step.next_step_if_false {
                Some(target) => match workflow.step(target) {
                    Some(target_step) => ExecutionLog::schedule(&enrollment, target_step, now)
                        .map(|next_log| Advancement::MoveTo {
                            step_number: target,
                            next_log,
                        }),
                    None => {
                        let error = format!("branch target step {} not found", target);
                        return self.fail(&log, error, now).await;
                    }
                },
                None => next_advancement(&workflow, &enrollment, step, now),
            };
            return match advancement {
                Ok(advancement) => self.skip(&log, &enrollment, reason, advancement, now).await,
                Err(e) => self.fail(&log, e.to_string(), now).await,
            };
        }

        // Resolve the successor first: a sent step always has one scheduled.
        let advancement = match next_advancement(&workflow, &enrollment, step, now) {
            Ok(advancement) => advancement,
            Err(e) => return self.fail(&log, e.to_string(), now).await,
        };

        match self.executor.execute(step, &enrollment, &log).await {
            Ok(artifact_id) => {
                let commit = StepCommit {
                    log_id: log.id,
                    outcome: LogOutcome::Sent { artifact_id },
                    advancement,
                    at: now,
                };
                self.commit(&log, commit, ItemOutcome::Sent).await
            }
            Err(e) => self.fail(&log, e.to_string(), now).await,
        }
    }

    async fn skip(
        &self,
        log: &ExecutionLog,
        enrollment: &Enrollment,
        reason: String,
        advancement: Advancement,
        now: DateTime<Utc>,
    ) -> ItemOutcome {
        debug!(log_id = %log.id, reason = %reason, "Step skipped");
        self.audit.record(
            make_event(AuditEventType::StepSkipped, log.tenant_id)
                .with_workflow(log.workflow_id)
                .with_enrollment(enrollment.id, &enrollment.participant_id)
                .with_execution_log(log.id)
                .with_details(json!({
                    "step_number": log.step_number,
                    "reason": reason,
                })),
        );
        let commit = StepCommit {
            log_id: log.id,
            outcome: LogOutcome::Skipped { reason },
            advancement,
            at: now,
        };
        self.commit(log, commit, ItemOutcome::Skipped).await
    }

    /// Records a failure for an item whose task panicked or was cancelled.
    /// If the log was never claimed the write is refused and it stays pending.
    async fn release_aborted(
        &self,
        log: &ExecutionLog,
        cause: tokio::task::JoinError,
        now: DateTime<Utc>,
    ) -> ItemOutcome {
        error!(log_id = %log.id, error = %cause, "Sweep item task aborted");
        metrics::counter!("nurture.sweep.aborted_items").increment(1);
        self.fail(log, format!("step processing aborted: {}", cause), now)
            .await
    }

    async fn fail(&self, log: &ExecutionLog, error: String, now: DateTime<Utc>) -> ItemOutcome {
        warn!(log_id = %log.id, step_number = log.step_number, error = %error, "Step failed");
        let commit = StepCommit {
            log_id: log.id,
            outcome: LogOutcome::Failed { error },
            advancement: Advancement::Stay,
            at: now,
        };
        self.commit(log, commit, ItemOutcome::Failed).await
    }

    async fn commit(&self, log: &ExecutionLog, commit: StepCommit, outcome: ItemOutcome) -> ItemOutcome {
        let result = match self.store.commit_step(commit).await {
            Ok(result) => result,
            Err(e) => {
                error!(log_id = %log.id, error = %e, "Could not record step outcome");
                metrics::counter!("nurture.steps.failed").increment(1);
                return ItemOutcome::Failed;
            }
        };

        match outcome {
            ItemOutcome::Sent => metrics::counter!("nurture.steps.sent").increment(1),
            ItemOutcome::Skipped => metrics::counter!("nurture.steps.skipped").increment(1),
            ItemOutcome::Failed => metrics::counter!("nurture.steps.failed").increment(1),
            ItemOutcome::Conflict => {}
        }

        if !result.advanced {
            return outcome;
        }
        if let Some(enrollment) = result.enrollment {
            if enrollment.status == EnrollmentStatus::Completed {
                info!(
                    enrollment_id = %enrollment.id,
                    workflow_id = %enrollment.workflow_id,
                    "Enrollment completed"
                );
                metrics::counter!("nurture.enrollments.completed").increment(1);
                self.audit.record(
                    make_event(AuditEventType::EnrollmentCompleted, enrollment.tenant_id)
                        .with_workflow(enrollment.workflow_id)
                        .with_enrollment(enrollment.id, &enrollment.participant_id),
                );
            } else {
                debug!(
                    enrollment_id = %enrollment.id,
                    current_step = enrollment.current_step,
                    "Enrollment advanced"
                );
            }
        }
        outcome
    }
}

/// Moves to the step after `step`, or completes the enrollment when there is none.
fn next_advancement(
    workflow: &WorkflowDefinition,
    enrollment: &Enrollment,
    step: &Step,
    now: DateTime<Utc>,
) -> NurtureResult<Advancement> {
    let next = step.step_number + 1;
    Ok(match workflow.step(next) {
        Some(next_step) => Advancement::MoveTo {
            step_number: next,
            next_log: ExecutionLog::schedule(enrollment, next_step, now)?,
        },
        None => Advancement::Complete { final_step: next },
    })
}

impl std::fmt::Debug for SweepProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepProcessor")
            .field("max_concurrency", &self.max_concurrency)
            .field("claim_timeout", &self.claim_timeout)
            .field("claim_lease", &self.claim_lease)
            .finish()
    }
}
