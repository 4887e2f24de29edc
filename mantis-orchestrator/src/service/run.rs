//! Run Service
//!
//! Business logic for run records: cross-organisation access checks, the
//! approval flow and the CLI reporting surface. Lifecycle changes go
//! through the domain state machine; illegal transitions never reach the
//! database.

use chrono::Utc;
use sqlx::PgPool;

use mantis_core::domain::run::{RunRecord, RunStatus, TransitionError};
use mantis_core::dto::run::{
    ReportJobStatusRequest, ReportRunRequest, RunDetails, RunReportStatus, SerializedBatch,
    SerializedJob,
};

use crate::repository::{
    batch_repository, organisation_repository, project_repository, repo_repository,
    run_repository,
};

/// Approver recorded until the API layer carries an authenticated user.
// TODO: take the approver from the session once auth middleware lands.
const APPROVAL_AUTHOR: &str = "a_user";

/// Service error type
#[derive(Debug)]
pub enum RunError {
    RunNotFound(i64),
    ProjectNotFound(i64),
    OrganisationNotFound(String),
    Forbidden,
    NotApprovable(RunStatus),
    Transition(TransitionError),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for RunError {
    fn from(err: sqlx::Error) -> Self {
        RunError::DatabaseError(err)
    }
}

/// List runs for a project, enforcing organisation ownership
pub async fn runs_for_project(
    pool: &PgPool,
    organisation: &str,
    project_id: i64,
) -> Result<Vec<RunDetails>, RunError> {
    let org = organisation_repository::find_by_name(pool, organisation)
        .await?
        .ok_or_else(|| RunError::OrganisationNotFound(organisation.to_string()))?;

    let project = project_repository::find_by_id(pool, project_id)
        .await?
        .ok_or(RunError::ProjectNotFound(project_id))?;

    if project.organisation_id != org.id {
        tracing::warn!(
            "Forbidden access: project {} belongs to organisation {}, caller is {}",
            project_id,
            project.organisation_id,
            org.id
        );
        return Err(RunError::Forbidden);
    }

    let runs = run_repository::list_for_project(pool, project_id).await?;
    Ok(runs.iter().map(run_to_details).collect())
}

/// Get one run, enforcing organisation ownership
pub async fn run_details(
    pool: &PgPool,
    organisation: &str,
    run_id: i64,
) -> Result<RunDetails, RunError> {
    let run = fetch_owned_run(pool, organisation, run_id).await?;
    Ok(run_to_details(&run))
}

/// Approve a run awaiting approval.
///
/// Only a run in `PendingApproval` may be approved; a second approval is a
/// no-op that still succeeds. The approver identity and timestamp are
/// recorded on the first call.
pub async fn approve_run(
    pool: &PgPool,
    organisation: &str,
    run_id: i64,
) -> Result<RunDetails, RunError> {
    let mut run = fetch_owned_run(pool, organisation, run_id).await?;

    match run.approve(APPROVAL_AUTHOR, Utc::now()) {
        Ok(true) => {
            run_repository::update_approval(pool, &run).await?;
            tracing::info!("Run {} approved by {}", run_id, APPROVAL_AUTHOR);
        }
        Ok(false) => {
            tracing::info!("Run {} has already been approved", run_id);
        }
        Err(TransitionError::NotApprovable(status)) => {
            return Err(RunError::NotApprovable(status));
        }
        Err(e) => return Err(RunError::Transition(e)),
    }

    Ok(run_to_details(&run))
}

/// Record a project and its configuration
pub async fn report_project(
    pool: &PgPool,
    organisation: &str,
    repo_name: &str,
    project_name: &str,
    configuration: &str,
) -> Result<(), RunError> {
    let org = organisation_repository::find_or_create(pool, organisation).await?;
    let repo_id = repo_repository::find_or_create(pool, org.id, repo_name).await?;
    let project = project_repository::find_or_create(pool, org.id, repo_id, project_name).await?;
    project_repository::set_configuration(pool, project.id, configuration).await?;
    Ok(())
}

/// Record one command execution against one project.
///
/// The record is driven through the lifecycle state machine to its
/// reported terminal status.
pub async fn report_run(
    pool: &PgPool,
    organisation: &str,
    repo_name: &str,
    project_name: &str,
    req: ReportRunRequest,
) -> Result<RunDetails, RunError> {
    let org = organisation_repository::find_or_create(pool, organisation).await?;
    let repo_id = repo_repository::find_or_create(pool, org.id, repo_name).await?;
    let project = project_repository::find_or_create(pool, org.id, repo_id, project_name).await?;

    let mut record = RunRecord {
        id: 0,
        project_id: project.id,
        repo_id,
        status: RunStatus::Queued,
        command: req.command.clone(),
        started_at: req.started_at,
        ended_at: Some(req.ended_at),
        output: req.output.clone(),
        plan_json: None,
        is_approved: false,
        approval_author: None,
        approval_date: None,
    };

    record.transition(RunStatus::Running).map_err(RunError::Transition)?;
    let terminal = match req.status {
        RunReportStatus::Success => RunStatus::Succeeded,
        RunReportStatus::Failed => RunStatus::Failed,
        RunReportStatus::Forbidden => RunStatus::Forbidden,
    };
    record.transition(terminal).map_err(RunError::Transition)?;

    let record = run_repository::create(pool, record).await?;
    tracing::info!(
        "Recorded run {} for {}/{} ({}, {})",
        record.id,
        repo_name,
        project_name,
        record.command,
        record.status
    );

    Ok(run_to_details(&record))
}

/// Record the terminal status of a batch job and return the whole batch.
pub async fn report_job_status(
    pool: &PgPool,
    organisation: &str,
    repo_name: &str,
    project_name: &str,
    job_id: &str,
    req: ReportJobStatusRequest,
) -> Result<SerializedBatch, RunError> {
    // Reports may arrive before any other traffic created the rows
    let org = organisation_repository::find_or_create(pool, organisation).await?;
    let repo_id = repo_repository::find_or_create(pool, org.id, repo_name).await?;
    project_repository::find_or_create(pool, org.id, repo_id, project_name).await?;

    // A job joins its existing batch; an unknown job opens a batch of its own
    let batch_id = match batch_repository::find(pool, job_id).await? {
        Some(existing) => existing.batch_id,
        None => job_id.to_string(),
    };

    let plan_result = req
        .plan_result
        .as_ref()
        .and_then(|p| serde_json::to_value(p).ok());

    batch_repository::upsert(
        pool,
        job_id,
        &batch_id,
        project_name,
        &req.status,
        &req.pr_comment_url,
        &req.terraform_output,
        plan_result,
        req.timestamp,
    )
    .await?;

    let rows = batch_repository::list_batch(pool, &batch_id).await?;
    Ok(SerializedBatch {
        id: batch_id,
        jobs: rows
            .into_iter()
            .map(|row| SerializedJob {
                id: row.id,
                project_name: row.project_name,
                status: row.status,
                pr_comment_url: row.pr_comment_url,
                updated_at: row.updated_at,
            })
            .collect(),
    })
}

// =============================================================================
// Helpers
// =============================================================================

async fn fetch_owned_run(
    pool: &PgPool,
    organisation: &str,
    run_id: i64,
) -> Result<RunRecord, RunError> {
    let org = organisation_repository::find_by_name(pool, organisation)
        .await?
        .ok_or_else(|| RunError::OrganisationNotFound(organisation.to_string()))?;

    let run = run_repository::find_by_id(pool, run_id)
        .await?
        .ok_or(RunError::RunNotFound(run_id))?;

    let repo_org = repo_repository::organisation_id(pool, run.repo_id)
        .await?
        .ok_or(RunError::Forbidden)?;
    if repo_org != org.id {
        tracing::warn!(
            "Forbidden access: run {} belongs to organisation {}, caller is {}",
            run_id,
            repo_org,
            org.id
        );
        return Err(RunError::Forbidden);
    }

    Ok(run)
}

fn run_to_details(record: &RunRecord) -> RunDetails {
    RunDetails {
        id: record.id,
        started_at: record.started_at.to_rfc3339(),
        ended_at: record
            .ended_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
        status: record.status.to_string(),
        command: record.command.clone(),
        output: record.output.clone(),
    }
    // TODO: the old UI converted ANSI-colored output to HTML and split on
    // the terraform provider marker before rendering; decide whether the
    // run details endpoint should grow that rendering once the new UI
    // needs it.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_to_details_formats_timestamps() {
        let started = Utc::now();
        let record = RunRecord {
            id: 3,
            project_id: 1,
            repo_id: 1,
            status: RunStatus::Succeeded,
            command: "mantis plan".to_string(),
            started_at: started,
            ended_at: None,
            output: "out".to_string(),
            plan_json: None,
            is_approved: false,
            approval_author: None,
            approval_date: None,
        };

        let details = run_to_details(&record);
        assert_eq!(details.id, 3);
        assert_eq!(details.started_at, started.to_rfc3339());
        assert_eq!(details.ended_at, "");
        assert_eq!(details.status, "Succeeded");
    }
}
