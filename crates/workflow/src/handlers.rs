//! Axum REST handlers for the nurture API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nurture_core::NurtureError;

use crate::engine::WorkflowEngine;
use crate::types::{
    Enrollment, ExecutionLog, Step, StepSpec, SweepReport, WorkflowDefinition, WorkflowMetrics,
};

/// Shared API state.
#[derive(Clone)]
pub struct WorkflowState {
    pub engine: Arc<WorkflowEngine>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub tenant_id: Uuid,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub participant_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    #[serde(default)]
    pub batch_size: Option<usize>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

fn api_error(e: NurtureError) -> ApiError {
    let status = match &e {
        NurtureError::Validation(_) => StatusCode::BAD_REQUEST,
        NurtureError::NotFound(_) => StatusCode::NOT_FOUND,
        NurtureError::Conflict(_) | NurtureError::ClaimConflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.code().to_string(),
            message: e.to_string(),
        }),
    )
}

// ─── Workflows ─────────────────────────────────────────────────────────────

pub async fn create_workflow(
    State(state): State<WorkflowState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowDefinition>)> {
    let workflow = state
        .engine
        .create_workflow(req.tenant_id, &req.name)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn get_workflow(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowDefinition>> {
    state.engine.get_workflow(id).await.map(Json).map_err(api_error)
}

pub async fn delete_workflow(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.delete_workflow(id).await.map_err(api_error)?;
    metrics::counter!("nurture.api.workflows.deleted").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_step(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
    Json(spec): Json<StepSpec>,
) -> ApiResult<(StatusCode, Json<Step>)> {
    let step = state.engine.add_step(id, spec).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(step)))
}

pub async fn workflow_metrics(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowMetrics>> {
    state.engine.get_metrics(id).await.map(Json).map_err(api_error)
}

// ─── Enrollments ───────────────────────────────────────────────────────────

pub async fn enroll(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EnrollRequest>,
) -> ApiResult<Json<Enrollment>> {
    state
        .engine
        .enroll(id, &req.participant_id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn get_enrollment(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    state.engine.get_enrollment(id).await.map(Json).map_err(api_error)
}

pub async fn cancel_enrollment(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    state
        .engine
        .cancel_enrollment(id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn enrollment_logs(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ExecutionLog>>> {
    state.engine.execution_logs(id).await.map(Json).map_err(api_error)
}

// ─── Executions ────────────────────────────────────────────────────────────

pub async fn retry_execution(
    State(state): State<WorkflowState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionLog>> {
    state
        .engine
        .retry_execution(id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Runs one sweep on demand; the body is optional.
pub async fn run_sweep(
    State(state): State<WorkflowState>,
    req: Option<Json<SweepRequest>>,
) -> ApiResult<Json<SweepReport>> {
    let batch_size = req.and_then(|Json(r)| r.batch_size);
    state
        .engine
        .run_sweep(batch_size)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
