//! Nurture API router — mounts all workflow endpoints under /api/v1/nurture.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::engine::WorkflowEngine;
use crate::handlers::{self, WorkflowState};

/// Build the nurture router around a shared engine.
pub fn nurture_router(engine: Arc<WorkflowEngine>) -> Router {
    let state = WorkflowState { engine };

    Router::new()
        .route("/health", get(handlers::health))
        // Workflows
        .route("/api/v1/nurture/workflows", post(handlers::create_workflow))
        .route("/api/v1/nurture/workflows/:id", get(handlers::get_workflow).delete(handlers::delete_workflow))
        .route("/api/v1/nurture/workflows/:id/steps", post(handlers::add_step))
        .route("/api/v1/nurture/workflows/:id/enrollments", post(handlers::enroll))
        .route("/api/v1/nurture/workflows/:id/metrics", get(handlers::workflow_metrics))
        // Enrollments
        .route("/api/v1/nurture/enrollments/:id", get(handlers::get_enrollment))
        .route("/api/v1/nurture/enrollments/:id/cancel", post(handlers::cancel_enrollment))
        .route("/api/v1/nurture/enrollments/:id/logs", get(handlers::enrollment_logs))
        // Executions
        .route("/api/v1/nurture/executions/:id/retry", post(handlers::retry_execution))
        .route("/api/v1/nurture/sweep", post(handlers::run_sweep))
        .with_state(state)
}
