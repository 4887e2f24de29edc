//! Run API Handlers
//!
//! HTTP endpoints for run records and the CLI reporting surface.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sqlx::PgPool;

use mantis_core::dto::run::{
    ReportJobStatusRequest, ReportProjectRequest, ReportRunRequest, RunDetails, SerializedBatch,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::OrgId;
use crate::service::run_service;

fn map_run_error(e: run_service::RunError) -> ApiError {
    match e {
        run_service::RunError::RunNotFound(id) => {
            ApiError::NotFound(format!("Run {} not found", id))
        }
        run_service::RunError::ProjectNotFound(id) => {
            ApiError::NotFound(format!("Project {} not found", id))
        }
        run_service::RunError::OrganisationNotFound(name) => {
            ApiError::NotFound(format!("Could not find organisation: {}", name))
        }
        run_service::RunError::Forbidden => {
            ApiError::Forbidden("Not allowed to access this resource".to_string())
        }
        run_service::RunError::NotApprovable(status) => ApiError::BadRequest(format!(
            "Approval not possible because run status is {}",
            status
        )),
        run_service::RunError::Transition(e) => ApiError::BadRequest(e.to_string()),
        run_service::RunError::DatabaseError(err) => ApiError::DatabaseError(err),
    }
}

// =============================================================================
// Run Endpoints
// =============================================================================

/// GET /projects/{project_id}/runs
/// List runs for a project
pub async fn runs_for_project(
    State(pool): State<PgPool>,
    OrgId(org): OrgId,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::debug!("Listing runs for project: {}", project_id);

    let runs = run_service::runs_for_project(&pool, &org, project_id)
        .await
        .map_err(map_run_error)?;

    Ok(Json(serde_json::json!({ "runs": runs })))
}

/// GET /runs/{run_id}
/// Get run details by id
pub async fn run_details(
    State(pool): State<PgPool>,
    OrgId(org): OrgId,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<RunDetails>> {
    tracing::debug!("Getting run: {}", run_id);

    let details = run_service::run_details(&pool, &org, run_id)
        .await
        .map_err(map_run_error)?;

    Ok(Json(details))
}

/// POST /runs/{run_id}/approve
/// Approve a run awaiting approval
pub async fn approve_run(
    State(pool): State<PgPool>,
    OrgId(org): OrgId,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<RunDetails>> {
    tracing::info!("Approving run: {}", run_id);

    let details = run_service::approve_run(&pool, &org, run_id)
        .await
        .map_err(map_run_error)?;

    Ok(Json(details))
}

// =============================================================================
// Reporting Endpoints (CLI surface)
// =============================================================================

/// PUT /repos/{repo}/projects/{project}
/// Record a project and its configuration
pub async fn report_project(
    State(pool): State<PgPool>,
    OrgId(org): OrgId,
    Path((repo, project)): Path<(String, String)>,
    Json(req): Json<ReportProjectRequest>,
) -> ApiResult<StatusCode> {
    tracing::debug!("Reporting project {}/{}", repo, project);

    run_service::report_project(&pool, &org, &repo, &project, &req.configuration)
        .await
        .map_err(map_run_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /repos/{repo}/projects/{project}/runs
/// Record one command execution
pub async fn report_run(
    State(pool): State<PgPool>,
    OrgId(org): OrgId,
    Path((repo, project)): Path<(String, String)>,
    Json(req): Json<ReportRunRequest>,
) -> ApiResult<Json<RunDetails>> {
    tracing::debug!(
        "Reporting {} run for {}/{}",
        req.command,
        repo,
        project
    );

    let details = run_service::report_run(&pool, &org, &repo, &project, req)
        .await
        .map_err(map_run_error)?;

    Ok(Json(details))
}

/// POST /repos/{repo}/projects/{project}/jobs/{job_id}/status
/// Record a batch job's terminal status; returns the updated batch view
pub async fn report_job_status(
    State(pool): State<PgPool>,
    OrgId(org): OrgId,
    Path((repo, project, job_id)): Path<(String, String, String)>,
    Json(req): Json<ReportJobStatusRequest>,
) -> ApiResult<Json<SerializedBatch>> {
    tracing::info!("Job {} reported status {}", job_id, req.status);

    let batch = run_service::report_job_status(&pool, &org, &repo, &project, &job_id, req)
        .await
        .map_err(map_run_error)?;

    Ok(Json(batch))
}
