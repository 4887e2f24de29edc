use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create organisations table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organisations (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create repos table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            organisation_id BIGINT NOT NULL REFERENCES organisations(id) ON DELETE CASCADE,
            UNIQUE (name, organisation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create projects table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            repo_id BIGINT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
            organisation_id BIGINT NOT NULL REFERENCES organisations(id) ON DELETE CASCADE,
            configuration TEXT NOT NULL DEFAULT '',
            UNIQUE (name, repo_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id BIGSERIAL PRIMARY KEY,
            project_id BIGINT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            repo_id BIGINT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
            status VARCHAR(50) NOT NULL,
            command TEXT NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            ended_at TIMESTAMPTZ,
            output TEXT NOT NULL DEFAULT '',
            plan_json TEXT,
            is_approved BOOLEAN NOT NULL DEFAULT FALSE,
            approval_author VARCHAR(255),
            approval_date TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create batch jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_jobs (
            id VARCHAR(255) PRIMARY KEY,
            batch_id VARCHAR(255) NOT NULL,
            project_name VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            pr_comment_url TEXT,
            terraform_output TEXT NOT NULL DEFAULT '',
            plan_result JSONB,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_project_id ON runs(project_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_batch_jobs_batch_id ON batch_jobs(batch_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
