//! Project locking
//!
//! A named lock keyed by `{namespace}#{project}` arbitrates remote-state
//! mutations across concurrent pull requests. Acquisition is
//! first-write-wins; a lock is owned by the PR that acquired it and survives
//! process crashes (TTL-bounded).

mod memory;
mod postgres;

pub use memory::MemoryLockProvider;
pub use postgres::PostgresLockProvider;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::reporting::{CommentFormat, Reporter};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store error: {0}")]
    Store(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired,
    /// Another PR holds the lock.
    Held { owner: u64 },
}

/// Capability surface of the lock store.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Attempts to acquire `id` for `pr_number`. Re-acquiring a lock the
    /// same PR already holds succeeds and refreshes its TTL.
    async fn lock(&self, id: &str, pr_number: u64) -> Result<LockAcquisition, LockError>;

    /// Releases `id` if held by `pr_number`. Returns whether a lock was
    /// released.
    async fn unlock(&self, id: &str, pr_number: u64) -> Result<bool, LockError>;

    /// Releases `id` regardless of owner.
    async fn force_unlock(&self, id: &str) -> Result<bool, LockError>;

    /// Current owner of `id`, if locked.
    async fn get_lock(&self, id: &str) -> Result<Option<u64>, LockError>;
}

/// Lock handle scoped to one project within one pull request.
///
/// Wraps the lock store with PR-visible reporting: contention surfaces as a
/// comment naming the holding PR.
pub struct PullRequestLock<'a> {
    pub provider: &'a dyn LockProvider,
    pub reporter: &'a dyn Reporter,
    pub project_namespace: &'a str,
    pub project_name: &'a str,
    pub pr_number: u64,
}

impl PullRequestLock<'_> {
    pub fn lock_id(&self) -> String {
        format!("{}#{}", self.project_namespace, self.project_name)
    }

    /// Acquires the project lock, reporting contention to the PR.
    pub async fn acquire(&self) -> Result<LockAcquisition, LockError> {
        let id = self.lock_id();
        let acquisition = self.provider.lock(&id, self.pr_number).await?;

        match acquisition {
            LockAcquisition::Acquired => {
                info!("Lock {} acquired by PR #{}", id, self.pr_number);
            }
            LockAcquisition::Held { owner } => {
                let msg = format!(
                    "Project {} locked by another PR #{} (failed to acquire lock {}). \
                     The locking plan must be applied or discarded before future plans can execute",
                    self.project_name, owner, id
                );
                if let Err(e) = self
                    .reporter
                    .report(
                        &msg,
                        CommentFormat::Comment {
                            heading: format!("Lock contention for {}", self.project_name),
                        },
                    )
                    .await
                {
                    warn!("Failed to report lock contention: {}", e);
                }
            }
        }

        Ok(acquisition)
    }

    /// Releases the lock regardless of owner (the `mantis unlock` command).
    pub async fn force_release(&self) -> Result<bool, LockError> {
        let id = self.lock_id();
        let released = self.provider.force_unlock(&id).await?;
        if released {
            info!("Lock {} force-released", id);
        }
        Ok(released)
    }
}
