//! Project repository

use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub repo_id: i64,
    pub organisation_id: i64,
}

/// Find a project by id
pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "SELECT id, name, repo_id, organisation_id FROM projects WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Find a project by name within a repo, creating it if missing
pub async fn find_or_create(
    pool: &PgPool,
    organisation_id: i64,
    repo_id: i64,
    name: &str,
) -> Result<Project, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO projects (name, repo_id, organisation_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (name, repo_id) DO NOTHING
        "#,
    )
    .bind(name)
    .bind(repo_id)
    .bind(organisation_id)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, Project>(
        "SELECT id, name, repo_id, organisation_id FROM projects WHERE name = $1 AND repo_id = $2",
    )
    .bind(name)
    .bind(repo_id)
    .fetch_one(pool)
    .await
}

/// Update a project's reported configuration
pub async fn set_configuration(
    pool: &PgPool,
    project_id: i64,
    configuration: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE projects SET configuration = $1 WHERE id = $2")
        .bind(configuration)
        .bind(project_id)
        .execute(pool)
        .await?;
    Ok(())
}
