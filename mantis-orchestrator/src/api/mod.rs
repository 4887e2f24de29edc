//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod run;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use error::ApiError;

/// Caller's organisation, taken from the `X-Organisation-Id` header.
///
/// Stands in for the session middleware, which is out of scope here; a
/// request without the header is not allowed to touch any resource.
pub struct OrgId(pub String);

impl<S> FromRequestParts<S> for OrgId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("X-Organisation-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| OrgId(v.to_string()))
            .ok_or_else(|| {
                ApiError::Forbidden("Not allowed to access this resource".to_string())
            })
    }
}

/// Create the main API router with all endpoints
pub fn create_router(pool: PgPool) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Run endpoints
        .route("/projects/{project_id}/runs", get(run::runs_for_project))
        .route("/runs/{run_id}", get(run::run_details))
        .route("/runs/{run_id}/approve", post(run::approve_run))
        // Reporting endpoints (CLI surface)
        .route("/repos/{repo}/projects/{project}", put(run::report_project))
        .route(
            "/repos/{repo}/projects/{project}/runs",
            post(run::report_run),
        )
        .route(
            "/repos/{repo}/projects/{project}/jobs/{job_id}/status",
            post(run::report_job_status),
        )
        // Add state and middleware
        .with_state(pool)
        .layer(TraceLayer::new_for_http())
}
