//! Repo repository

use sqlx::PgPool;
use sqlx::Row;

/// Find a repo by name within an organisation, creating it if missing.
/// Returns the repo id.
pub async fn find_or_create(
    pool: &PgPool,
    organisation_id: i64,
    name: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO repos (name, organisation_id)
        VALUES ($1, $2)
        ON CONFLICT (name, organisation_id) DO NOTHING
        "#,
    )
    .bind(name)
    .bind(organisation_id)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT id FROM repos WHERE name = $1 AND organisation_id = $2")
        .bind(name)
        .bind(organisation_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("id"))
}

/// The organisation owning a repo
pub async fn organisation_id(pool: &PgPool, repo_id: i64) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query("SELECT organisation_id FROM repos WHERE id = $1")
        .bind(repo_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("organisation_id")))
}
