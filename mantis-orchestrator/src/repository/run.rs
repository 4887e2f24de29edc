//! Run repository
//!
//! Handles all database operations related to run records.

use mantis_core::domain::run::{RunRecord, RunStatus};
use sqlx::PgPool;
use sqlx::Row;

/// Insert a new run record, returning it with its assigned id
pub async fn create(pool: &PgPool, record: RunRecord) -> Result<RunRecord, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO runs (project_id, repo_id, status, command, started_at, ended_at,
                          output, plan_json, is_approved, approval_author, approval_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id
        "#,
    )
    .bind(record.project_id)
    .bind(record.repo_id)
    .bind(status_to_string(record.status))
    .bind(&record.command)
    .bind(record.started_at)
    .bind(record.ended_at)
    .bind(&record.output)
    .bind(&record.plan_json)
    .bind(record.is_approved)
    .bind(&record.approval_author)
    .bind(record.approval_date)
    .fetch_one(pool)
    .await?;

    let mut record = record;
    record.id = row.get("id");
    Ok(record)
}

/// Find a run by id
pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<RunRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, project_id, repo_id, status, command, started_at, ended_at,
               output, plan_json, is_approved, approval_author, approval_date
        FROM runs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List runs for a project, newest first
pub async fn list_for_project(
    pool: &PgPool,
    project_id: i64,
) -> Result<Vec<RunRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, project_id, repo_id, status, command, started_at, ended_at,
               output, plan_json, is_approved, approval_author, approval_date
        FROM runs
        WHERE project_id = $1
        ORDER BY started_at DESC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Persist an approval transition
pub async fn update_approval(pool: &PgPool, record: &RunRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE runs
        SET status = $1, is_approved = $2, approval_author = $3, approval_date = $4
        WHERE id = $5
        "#,
    )
    .bind(status_to_string(record.status))
    .bind(record.is_approved)
    .bind(&record.approval_author)
    .bind(record.approval_date)
    .bind(record.id)
    .execute(pool)
    .await?;
    Ok(())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: RunStatus) -> String {
    status.to_string()
}

fn string_to_status(s: &str) -> RunStatus {
    match s {
        "Queued" => RunStatus::Queued,
        "Running" => RunStatus::Running,
        "Succeeded" => RunStatus::Succeeded,
        "Failed" => RunStatus::Failed,
        "Forbidden" => RunStatus::Forbidden,
        "PendingApproval" => RunStatus::PendingApproval,
        "Approved" => RunStatus::Approved,
        "Applied" => RunStatus::Applied,
        _ => RunStatus::Queued,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    project_id: i64,
    repo_id: i64,
    status: String,
    command: String,
    started_at: chrono::DateTime<chrono::Utc>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
    output: String,
    plan_json: Option<String>,
    is_approved: bool,
    approval_author: Option<String>,
    approval_date: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        RunRecord {
            id: row.id,
            project_id: row.project_id,
            repo_id: row.repo_id,
            status: string_to_status(&row.status),
            command: row.command,
            started_at: row.started_at,
            ended_at: row.ended_at,
            output: row.output,
            plan_json: row.plan_json,
            is_approved: row.is_approved,
            approval_author: row.approval_author,
            approval_date: row.approval_date,
        }
    }
}
