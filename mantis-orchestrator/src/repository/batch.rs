//! Batch job repository
//!
//! Server-side view of batch jobs, updated by the CLI's job status reports
//! and read back to rewrite the aggregate PR comment.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchJobRow {
    pub id: String,
    pub batch_id: String,
    pub project_name: String,
    pub status: String,
    pub pr_comment_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Find a batch job by id
pub async fn find(pool: &PgPool, id: &str) -> Result<Option<BatchJobRow>, sqlx::Error> {
    sqlx::query_as::<_, BatchJobRow>(
        r#"
        SELECT id, batch_id, project_name, status, pr_comment_url, updated_at
        FROM batch_jobs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Insert or update a batch job with its latest reported state
#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    pool: &PgPool,
    id: &str,
    batch_id: &str,
    project_name: &str,
    status: &str,
    pr_comment_url: &str,
    terraform_output: &str,
    plan_result: Option<serde_json::Value>,
    updated_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO batch_jobs (id, batch_id, project_name, status, pr_comment_url,
                                terraform_output, plan_result, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            pr_comment_url = EXCLUDED.pr_comment_url,
            terraform_output = EXCLUDED.terraform_output,
            plan_result = EXCLUDED.plan_result,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(id)
    .bind(batch_id)
    .bind(project_name)
    .bind(status)
    .bind(pr_comment_url)
    .bind(terraform_output)
    .bind(plan_result)
    .bind(updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// All jobs sharing a batch, oldest update first
pub async fn list_batch(pool: &PgPool, batch_id: &str) -> Result<Vec<BatchJobRow>, sqlx::Error> {
    sqlx::query_as::<_, BatchJobRow>(
        r#"
        SELECT id, batch_id, project_name, status, pr_comment_url, updated_at
        FROM batch_jobs
        WHERE batch_id = $1
        ORDER BY updated_at ASC
        "#,
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await
}
