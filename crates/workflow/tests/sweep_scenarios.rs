//! Integration tests for the enroll -> sweep -> advance flow, run against the
//! in-process store and collaborators.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Utc};
    use tower::ServiceExt;
    use uuid::Uuid;

    use nurture_core::event_bus::CaptureSink;
    use nurture_core::types::{AuditEventType, EngagementEventType};
    use nurture_core::{AppConfig, NurtureError, NurtureResult};
    use nurture_workflow::collaborators::{
        ActionService, InMemoryActionService, InMemoryEngagementStore,
    };
    use nurture_workflow::types::{
        ContentChannel, EnrollmentStatus, ExecutionStatus, StepAction, StepSpec,
        WorkflowDefinition,
    };
    use nurture_workflow::{nurture_router, InMemoryWorkflowStore, WorkflowEngine, WorkflowStore};

    struct Fixture {
        engine: WorkflowEngine,
        store: Arc<InMemoryWorkflowStore>,
        engagement: Arc<InMemoryEngagementStore>,
        actions: Arc<InMemoryActionService>,
        audit: Arc<CaptureSink>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let engagement = Arc::new(InMemoryEngagementStore::new());
        let actions = Arc::new(InMemoryActionService::new());
        let audit = Arc::new(CaptureSink::new());
        let engine = WorkflowEngine::new(
            store.clone(),
            engagement.clone(),
            actions.clone(),
            &AppConfig::default(),
        )
        .with_audit_sink(audit.clone());
        Fixture {
            engine,
            store,
            engagement,
            actions,
            audit,
        }
    }

    fn email(subject: &str) -> StepAction {
        StepAction::SendContent {
            channel: ContentChannel::Email,
            subject: Some(subject.to_string()),
            body: format!("Body of {}", subject),
        }
    }

    async fn workflow(f: &Fixture, specs: Vec<StepSpec>) -> WorkflowDefinition {
        let wf = f
            .engine
            .create_workflow(Uuid::new_v4(), "Lead nurture")
            .await
            .unwrap();
        for spec in specs {
            f.engine.add_step(wf.id, spec).await.unwrap();
        }
        f.engine.get_workflow(wf.id).await.unwrap()
    }

    async fn assert_current_step_bounds(f: &Fixture, wf: &WorkflowDefinition) {
        for e in f.store.enrollments_for_workflow(wf.id).await.unwrap() {
            assert!(e.current_step >= 1 && e.current_step <= wf.step_count() + 1);
        }
    }

    #[tokio::test]
    async fn test_linear_sequence_completes() {
        let f = fixture();
        let wf = workflow(
            &f,
            vec![
                StepSpec::immediate(1, email("Welcome")),
                StepSpec::immediate(2, email("Getting started")),
            ],
        )
        .await;
        let t0: DateTime<Utc> = Utc::now();
        let enrollment = f.engine.enroll_at(t0, wf.id, "lead-1").await.unwrap();

        let report = f.engine.run_sweep_at(t0, 50).await.unwrap();
        assert_eq!((report.selected, report.sent), (1, 1));
        let after_first = f.engine.get_enrollment(enrollment.id).await.unwrap();
        assert_eq!(after_first.current_step, 2);
        assert_eq!(after_first.status, EnrollmentStatus::Active);

        let logs = f.engine.execution_logs(enrollment.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, ExecutionStatus::Sent);
        assert!(logs[0].artifact_id.is_some());
        assert_eq!(logs[0].sent_at, Some(t0));
        assert_eq!(logs[1].status, ExecutionStatus::Pending);
        assert_eq!(logs[1].scheduled_for, t0);
        assert_current_step_bounds(&f, &wf).await;

        let report = f.engine.run_sweep_at(t0, 50).await.unwrap();
        assert_eq!(report.sent, 1);
        let done = f.engine.get_enrollment(enrollment.id).await.unwrap();
        assert_eq!(done.status, EnrollmentStatus::Completed);
        assert_eq!(done.current_step, 3);
        assert_eq!(done.completed_at, Some(t0));
        assert_eq!(f.actions.executed_for("lead-1").len(), 2);
        assert_eq!(f.audit.count_type(AuditEventType::EnrollmentCompleted), 1);

        // Nothing left to do.
        assert_eq!(f.engine.run_sweep_at(t0, 50).await.unwrap().selected, 0);
    }

    #[tokio::test]
    async fn test_false_condition_branches_forward() {
        let f = fixture();
        let mut first = StepSpec::immediate(1, email("Did you see this?"));
        first.condition = "if_opened".to_string();
        first.condition_window_days = Some(7);
        first.next_step_if_false = Some(3);
        let wf = workflow(
            &f,
            vec![
                first,
                StepSpec::immediate(2, email("Thanks for reading")),
                StepSpec::immediate(3, email("One more try")),
            ],
        )
        .await;
        let t0 = Utc::now();
        let enrollment = f.engine.enroll_at(t0, wf.id, "lead-1").await.unwrap();

        let report = f.engine.run_sweep_at(t0, 50).await.unwrap();
        assert_eq!(report.skipped, 1);
        let branched = f.engine.get_enrollment(enrollment.id).await.unwrap();
        assert_eq!(branched.current_step, 3);

        let logs = f.engine.execution_logs(enrollment.id).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Skipped);
        assert!(logs[0].skip_reason.is_some());
        assert_eq!(logs[1].step_number, 3);
        assert_eq!(logs[1].status, ExecutionStatus::Pending);
        assert!(f.actions.executed().is_empty());

        f.engine.run_sweep_at(t0, 50).await.unwrap();
        let done = f.engine.get_enrollment(enrollment.id).await.unwrap();
        assert_eq!(done.status, EnrollmentStatus::Completed);
        assert_eq!(done.current_step, 4);

        let logs = f.engine.execution_logs(enrollment.id).await.unwrap();
        assert!(logs.iter().all(|l| l.step_number != 2));
        // Steps traversed (1 and 3) each leave one terminal sent/skipped log.
        let terminal = logs
            .iter()
            .filter(|l| matches!(l.status, ExecutionStatus::Sent | ExecutionStatus::Skipped))
            .count();
        assert_eq!(terminal, 2);
    }

    #[tokio::test]
    async fn test_true_condition_executes_step() {
        let f = fixture();
        let mut first = StepSpec::immediate(1, email("Did you see this?"));
        first.condition = "if_opened".to_string();
        first.next_step_if_false = Some(2);
        let wf = workflow(
            &f,
            vec![first, StepSpec::immediate(2, email("Follow up"))],
        )
        .await;
        let t0 = Utc::now();
        f.engagement
            .record("lead-1", EngagementEventType::Open, t0 - chrono::Duration::days(1));
        let enrollment = f.engine.enroll_at(t0, wf.id, "lead-1").await.unwrap();

        let report = f.engine.run_sweep_at(t0, 50).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(f.engine.get_enrollment(enrollment.id).await.unwrap().current_step, 2);
    }

    #[tokio::test]
    async fn test_failed_action_stalls_until_retry() {
        let f = fixture();
        let wf = workflow(
            &f,
            vec![
                StepSpec::immediate(1, email("Welcome")),
                StepSpec::immediate(2, email("Next")),
            ],
        )
        .await;
        f.actions.fail_for("lead-1", "mailbox unavailable");
        let enrollment = f.engine.enroll(wf.id, "lead-1").await.unwrap();

        let report = f.engine.run_sweep(None).await.unwrap();
        assert_eq!(report.failed, 1);
        let logs = f.engine.execution_logs(enrollment.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Failed);
        assert!(logs[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("mailbox unavailable"));
        assert_eq!(f.engine.get_enrollment(enrollment.id).await.unwrap().current_step, 1);
        assert_eq!(f.audit.count_type(AuditEventType::ActionFailed), 1);

        // A failed log is never re-picked on its own.
        assert_eq!(f.engine.run_sweep(None).await.unwrap().selected, 0);

        f.actions.clear_failures();
        let retried = f.engine.retry_execution(logs[0].id).await.unwrap();
        assert_eq!(retried.status, ExecutionStatus::Pending);
        assert!(retried.error_message.is_none());

        let report = f.engine.run_sweep(None).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(f.engine.get_enrollment(enrollment.id).await.unwrap().current_step, 2);
    }

    #[tokio::test]
    async fn test_unreachable_engagement_history_fails_step() {
        let f = fixture();
        let mut first = StepSpec::immediate(1, email("Did you click?"));
        first.condition = "if_clicked".to_string();
        let wf = workflow(&f, vec![first]).await;
        let enrollment = f.engine.enroll(wf.id, "lead-1").await.unwrap();
        f.engagement.set_offline(true);

        let report = f.engine.run_sweep(None).await.unwrap();
        assert_eq!(report.failed, 1);
        let log = f.engine.execution_logs(enrollment.id).await.unwrap().remove(0);
        assert_eq!(log.status, ExecutionStatus::Failed);
        assert!(log.error_message.unwrap().contains("Condition evaluation"));
        assert!(f.actions.executed().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_enrollment_is_skipped() {
        let f = fixture();
        let wf = workflow(
            &f,
            vec![
                StepSpec::immediate(1, email("Welcome")),
                StepSpec::immediate(2, email("Next")),
            ],
        )
        .await;
        let enrollment = f.engine.enroll(wf.id, "lead-1").await.unwrap();
        f.engine.cancel_enrollment(enrollment.id).await.unwrap();

        let report = f.engine.run_sweep(None).await.unwrap();
        assert_eq!(report.skipped, 1);
        let logs = f.engine.execution_logs(enrollment.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Skipped);
        let stored = f.engine.get_enrollment(enrollment.id).await.unwrap();
        assert_eq!(stored.status, EnrollmentStatus::Cancelled);
        assert!(f.actions.executed().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_during_dispatch_wins() {
        let f = fixture();
        let wf = workflow(
            &f,
            vec![
                StepSpec::immediate(1, email("Welcome")),
                StepSpec::immediate(2, email("Next")),
            ],
        )
        .await;
        let enrollment = f.engine.enroll(wf.id, "lead-1").await.unwrap();
        f.actions.set_latency(Duration::from_millis(300));

        let engine = f.engine.clone();
        let sweep = tokio::spawn(async move { engine.run_sweep(None).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.engine.cancel_enrollment(enrollment.id).await.unwrap();
        sweep.await.unwrap().unwrap();

        let stored = f.engine.get_enrollment(enrollment.id).await.unwrap();
        assert_eq!(stored.status, EnrollmentStatus::Cancelled);
        assert_eq!(stored.current_step, 1);
        assert!(stored.completed_at.is_none());
        let logs = f.engine.execution_logs(enrollment.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].status.is_terminal());
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let f = fixture();
        let wf = workflow(&f, vec![StepSpec::immediate(1, email("Welcome"))]).await;

        let first = f.engine.enroll(wf.id, "lead-1").await.unwrap();
        let second = f.engine.enroll(wf.id, "lead-1").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(f.engine.execution_logs(first.id).await.unwrap().len(), 1);
        assert_eq!(f.audit.count_type(AuditEventType::EnrollmentCreated), 1);

        // Completed enrollments are returned as well.
        f.engine.run_sweep(None).await.unwrap();
        let third = f.engine.enroll(wf.id, "lead-1").await.unwrap();
        assert_eq!(third.id, first.id);
        assert_eq!(third.status, EnrollmentStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enroll_creates_one() {
        let f = fixture();
        let wf = workflow(&f, vec![StepSpec::immediate(1, email("Welcome"))]).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = f.engine.clone();
            handles.push(tokio::spawn(async move { engine.enroll(wf.id, "lead-1").await }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(f.store.logs_for_workflow(wf.id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sweeps_claim_exclusively() {
        let f = fixture();
        // Step 2 is not due at t0, so a sweep finishing early cannot pick it up.
        let mut second = StepSpec::immediate(2, email("Next"));
        second.delay_hours = 1;
        let wf = workflow(&f, vec![StepSpec::immediate(1, email("Welcome")), second]).await;
        let t0 = Utc::now();
        for i in 0..40 {
            f.engine
                .enroll_at(t0, wf.id, &format!("lead-{}", i))
                .await
                .unwrap();
        }

        let (a, b) = tokio::join!(
            f.engine.run_sweep_at(t0, 100),
            f.engine.run_sweep_at(t0, 100)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.sent + b.sent, 40);
        assert_eq!(f.actions.executed().len(), 40);
        for i in 0..40 {
            assert_eq!(f.actions.executed_for(&format!("lead-{}", i)).len(), 1);
        }
        assert_current_step_bounds(&f, &wf).await;

        let metrics = f.engine.get_metrics(wf.id).await.unwrap();
        assert_eq!(metrics.enrolled, 40);
        assert_eq!(metrics.active, 40);
        assert_eq!(metrics.sent, 40);
        assert_eq!(metrics.pending, 40);
    }

    #[tokio::test]
    async fn test_store_outage_aborts_sweep() {
        let f = fixture();
        let wf = workflow(&f, vec![StepSpec::immediate(1, email("Welcome"))]).await;
        f.engine.enroll(wf.id, "lead-1").await.unwrap();

        f.store.set_offline(true);
        assert!(matches!(
            f.engine.run_sweep(None).await,
            Err(NurtureError::Store(_))
        ));
        f.store.set_offline(false);
        assert_eq!(f.engine.run_sweep(None).await.unwrap().sent, 1);
    }

    #[tokio::test]
    async fn test_metrics_rollup() {
        let f = fixture();
        let wf = workflow(&f, vec![StepSpec::immediate(1, email("Welcome"))]).await;
        f.actions.fail_for("lead-2", "bounced");
        f.engine.enroll(wf.id, "lead-1").await.unwrap();
        f.engine.enroll(wf.id, "lead-2").await.unwrap();
        let cancelled = f.engine.enroll(wf.id, "lead-3").await.unwrap();
        f.engine.cancel_enrollment(cancelled.id).await.unwrap();
        f.engine.run_sweep(None).await.unwrap();

        let metrics = f.engine.get_metrics(wf.id).await.unwrap();
        assert_eq!(metrics.enrolled, 3);
        assert_eq!(
            (metrics.active, metrics.completed, metrics.cancelled),
            (1, 1, 1)
        );
        assert_eq!(
            (metrics.pending, metrics.sent, metrics.skipped, metrics.failed),
            (0, 1, 1, 1)
        );
    }

    /// Delivers the action, then takes the workflow store down on the first
    /// call, so the outcome of that claim cannot be written.
    struct OutageAfterDelivery {
        store: Arc<InMemoryWorkflowStore>,
        tripped: AtomicBool,
        inner: InMemoryActionService,
    }

    #[async_trait]
    impl ActionService for OutageAfterDelivery {
        async fn execute(&self, action: &StepAction, participant_id: &str) -> NurtureResult<String> {
            let artifact = self.inner.execute(action, participant_id).await?;
            if !self.tripped.swap(true, Ordering::SeqCst) {
                self.store.set_offline(true);
            }
            Ok(artifact)
        }
    }

    #[tokio::test]
    async fn test_uncommitted_claim_recovers_after_lease() {
        let config = AppConfig::default();
        let store = Arc::new(InMemoryWorkflowStore::new());
        let actions = Arc::new(OutageAfterDelivery {
            store: store.clone(),
            tripped: AtomicBool::new(false),
            inner: InMemoryActionService::new(),
        });
        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(InMemoryEngagementStore::new()),
            actions.clone(),
            &config,
        );
        let wf = engine.create_workflow(Uuid::new_v4(), "Lead nurture").await.unwrap();
        engine
            .add_step(wf.id, StepSpec::immediate(1, email("Welcome")))
            .await
            .unwrap();
        let t0 = Utc::now();
        let enrollment = engine.enroll_at(t0, wf.id, "lead-1").await.unwrap();

        let report = engine.run_sweep_at(t0, 10).await.unwrap();
        assert_eq!((report.selected, report.failed), (1, 1));
        store.set_offline(false);
        let logs = engine.execution_logs(enrollment.id).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Processing);

        // The claim is still within its lease.
        assert_eq!(engine.run_sweep_at(t0, 10).await.unwrap().selected, 0);
        assert!(matches!(
            engine.retry_execution(logs[0].id).await,
            Err(NurtureError::Conflict(_))
        ));

        let lease = chrono::Duration::from_std(config.scheduler.claim_lease()).unwrap();
        let later = t0 + lease + chrono::Duration::seconds(1);
        let report = engine.run_sweep_at(later, 10).await.unwrap();
        assert_eq!((report.selected, report.sent), (1, 1));

        let done = engine.get_enrollment(enrollment.id).await.unwrap();
        assert_eq!(done.status, EnrollmentStatus::Completed);
        let logs = engine.execution_logs(enrollment.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Sent);
        // Delivery is at-least-once across an uncommitted claim.
        assert_eq!(actions.inner.executed_for("lead-1").len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_delay_and_window_rejected() {
        let f = fixture();
        let wf = workflow(&f, vec![StepSpec::immediate(1, email("Welcome"))]).await;

        let mut late = StepSpec::immediate(2, email("Much later"));
        late.delay_days = 4_000_000_000;
        assert!(matches!(
            f.engine.add_step(wf.id, late).await,
            Err(NurtureError::Validation(_))
        ));

        let mut wide = StepSpec::immediate(2, email("Still there?"));
        wide.condition = "if_clicked".to_string();
        wide.condition_window_days = Some(4_000_000_000);
        assert!(matches!(
            f.engine.add_step(wf.id, wide).await,
            Err(NurtureError::Validation(_))
        ));

        // Rejections leave the workflow runnable end to end.
        let enrollment = f.engine.enroll(wf.id, "lead-1").await.unwrap();
        assert_eq!(f.engine.run_sweep(None).await.unwrap().sent, 1);
        let done = f.engine.get_enrollment(enrollment.id).await.unwrap();
        assert_eq!(done.status, EnrollmentStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enroll_racing_delete_never_orphans() {
        let f = fixture();
        for i in 0..50 {
            let wf = workflow(&f, vec![StepSpec::immediate(1, email("Welcome"))]).await;
            let engine = f.engine.clone();
            let participant = format!("lead-{}", i);
            let enroll = tokio::spawn(async move { engine.enroll(wf.id, &participant).await });
            let engine = f.engine.clone();
            let delete = tokio::spawn(async move { engine.delete_workflow(wf.id).await });
            let (enrolled, deleted) = (enroll.await.unwrap(), delete.await.unwrap());

            let remaining = f.store.enrollments_for_workflow(wf.id).await.unwrap();
            if deleted.is_ok() {
                assert!(matches!(enrolled, Err(NurtureError::NotFound(_))));
                assert!(remaining.is_empty());
                assert!(f.store.logs_for_workflow(wf.id).await.unwrap().is_empty());
            } else {
                assert!(matches!(deleted, Err(NurtureError::Conflict(_))));
                assert_eq!(remaining.len(), 1);
                assert!(f.engine.get_workflow(wf.id).await.is_ok());
            }
        }
    }

    // ─── HTTP ──────────────────────────────────────────────────────────

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_router_flow() {
        let f = fixture();
        let app = nurture_router(Arc::new(f.engine.clone()));

        let response = app
            .clone()
            .oneshot(post(
                "/api/v1/nurture/workflows",
                serde_json::json!({ "tenant_id": Uuid::new_v4(), "name": "Trial conversion" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let workflow_id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post(
                &format!("/api/v1/nurture/workflows/{}/steps", workflow_id),
                serde_json::json!({
                    "step_number": 1,
                    "condition": "if_replied",
                    "action": { "kind": "add_tag", "tag": "engaged" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(post(
                &format!("/api/v1/nurture/workflows/{}/steps", workflow_id),
                serde_json::json!({
                    "step_number": 2,
                    "delay_days": -2,
                    "action": { "kind": "add_tag", "tag": "late" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "validation_error");

        let response = app
            .clone()
            .oneshot(post(
                &format!("/api/v1/nurture/workflows/{}/enrollments", workflow_id),
                serde_json::json!({ "participant_id": "lead-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let enrollment_id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post("/api/v1/nurture/sweep", serde_json::json!({ "batch_size": 10 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["skipped"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/nurture/enrollments/{}/logs", enrollment_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await[0]["status"], "skipped");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/nurture/workflows/{}", workflow_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/nurture/workflows/{}/metrics", workflow_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not_found");
    }
}
