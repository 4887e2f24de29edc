//! Postgres-backed lock store
//!
//! The external KV variant: one row per held lock, acquired with
//! `INSERT ... ON CONFLICT DO NOTHING` (first write wins). Rows older than
//! the TTL count as free, so a crashed process cannot hold a project
//! hostage forever.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use sqlx::Row;

use super::{LockAcquisition, LockError, LockProvider};

pub struct PostgresLockProvider {
    pool: PgPool,
    ttl: Duration,
}

impl PostgresLockProvider {
    /// Connects to the lock database and ensures the schema exists.
    pub async fn connect(database_url: &str, ttl: Duration) -> Result<Self, LockError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let provider = Self { pool, ttl };
        provider.ensure_schema().await?;
        Ok(provider)
    }

    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    async fn ensure_schema(&self) -> Result<(), LockError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS project_locks (
                lock_id VARCHAR(255) PRIMARY KEY,
                pr_number BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn ttl_secs(&self) -> f64 {
        self.ttl.as_secs_f64()
    }

    async fn expire_stale(&self, id: &str) -> Result<(), LockError> {
        sqlx::query(
            "DELETE FROM project_locks WHERE lock_id = $1 AND created_at < now() - make_interval(secs => $2)",
        )
        .bind(id)
        .bind(self.ttl_secs())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LockProvider for PostgresLockProvider {
    async fn lock(&self, id: &str, pr_number: u64) -> Result<LockAcquisition, LockError> {
        // Two attempts cover the race where the holder vanishes between the
        // failed insert and the owner lookup.
        for _ in 0..2 {
            self.expire_stale(id).await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO project_locks (lock_id, pr_number, created_at)
                VALUES ($1, $2, now())
                ON CONFLICT (lock_id) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(pr_number as i64)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() > 0 {
                return Ok(LockAcquisition::Acquired);
            }

            let row = sqlx::query("SELECT pr_number FROM project_locks WHERE lock_id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

            match row {
                Some(row) => {
                    let owner: i64 = row.get("pr_number");
                    if owner as u64 == pr_number {
                        // Refresh the TTL for the existing holder
                        sqlx::query(
                            "UPDATE project_locks SET created_at = now() WHERE lock_id = $1",
                        )
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                        return Ok(LockAcquisition::Acquired);
                    }
                    return Ok(LockAcquisition::Held {
                        owner: owner as u64,
                    });
                }
                None => continue,
            }
        }

        Err(LockError::Store(format!(
            "could not settle lock acquisition for {}",
            id
        )))
    }

    async fn unlock(&self, id: &str, pr_number: u64) -> Result<bool, LockError> {
        let result = sqlx::query("DELETE FROM project_locks WHERE lock_id = $1 AND pr_number = $2")
            .bind(id)
            .bind(pr_number as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn force_unlock(&self, id: &str) -> Result<bool, LockError> {
        let result = sqlx::query("DELETE FROM project_locks WHERE lock_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_lock(&self, id: &str) -> Result<Option<u64>, LockError> {
        let row = sqlx::query(
            r#"
            SELECT pr_number FROM project_locks
            WHERE lock_id = $1 AND created_at >= now() - make_interval(secs => $2)
            "#,
        )
        .bind(id)
        .bind(self.ttl_secs())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let owner: i64 = r.get("pr_number");
            owner as u64
        }))
    }
}
