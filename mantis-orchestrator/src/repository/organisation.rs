//! Organisation repository

use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Organisation {
    pub id: i64,
    pub name: String,
}

/// Find an organisation by name
pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Organisation>, sqlx::Error> {
    sqlx::query_as::<_, Organisation>("SELECT id, name FROM organisations WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
}

/// Find an organisation by name, creating it if missing
pub async fn find_or_create(pool: &PgPool, name: &str) -> Result<Organisation, sqlx::Error> {
    sqlx::query("INSERT INTO organisations (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;

    sqlx::query_as::<_, Organisation>("SELECT id, name FROM organisations WHERE name = $1")
        .bind(name)
        .fetch_one(pool)
        .await
}
