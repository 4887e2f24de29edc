//! In-process lock store
//!
//! Suitable for single-host runs and tests. Provides the same TTL semantics
//! as the external store so the two variants are interchangeable.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{LockAcquisition, LockError, LockProvider};

pub struct MemoryLockProvider {
    ttl: Duration,
    locks: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryLockProvider {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LockProvider for MemoryLockProvider {
    async fn lock(&self, id: &str, pr_number: u64) -> Result<LockAcquisition, LockError> {
        let mut locks = self.locks.lock().unwrap();

        if let Some((owner, acquired_at)) = locks.get(id).copied() {
            if acquired_at.elapsed() < self.ttl && owner != pr_number {
                return Ok(LockAcquisition::Held { owner });
            }
        }

        locks.insert(id.to_string(), (pr_number, Instant::now()));
        Ok(LockAcquisition::Acquired)
    }

    async fn unlock(&self, id: &str, pr_number: u64) -> Result<bool, LockError> {
        let mut locks = self.locks.lock().unwrap();
        match locks.get(id) {
            Some((owner, _)) if *owner == pr_number => {
                locks.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_unlock(&self, id: &str) -> Result<bool, LockError> {
        let mut locks = self.locks.lock().unwrap();
        Ok(locks.remove(id).is_some())
    }

    async fn get_lock(&self, id: &str) -> Result<Option<u64>, LockError> {
        let locks = self.locks.lock().unwrap();
        Ok(locks
            .get(id)
            .filter(|(_, acquired_at)| acquired_at.elapsed() < self.ttl)
            .map(|(owner, _)| *owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MemoryLockProvider {
        MemoryLockProvider::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let locks = provider();

        assert_eq!(
            locks.lock("acme/infra#web", 1).await.unwrap(),
            LockAcquisition::Acquired
        );
        assert_eq!(
            locks.lock("acme/infra#web", 2).await.unwrap(),
            LockAcquisition::Held { owner: 1 }
        );
        assert_eq!(locks.get_lock("acme/infra#web").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_reacquire_by_owner_succeeds() {
        let locks = provider();

        locks.lock("acme/infra#web", 1).await.unwrap();
        assert_eq!(
            locks.lock("acme/infra#web", 1).await.unwrap(),
            LockAcquisition::Acquired
        );
    }

    #[tokio::test]
    async fn test_unlock_requires_owner() {
        let locks = provider();

        locks.lock("acme/infra#web", 1).await.unwrap();
        assert!(!locks.unlock("acme/infra#web", 2).await.unwrap());
        assert!(locks.unlock("acme/infra#web", 1).await.unwrap());
        assert_eq!(locks.get_lock("acme/infra#web").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_force_unlock_ignores_owner() {
        let locks = provider();

        locks.lock("acme/infra#web", 1).await.unwrap();
        assert!(locks.force_unlock("acme/infra#web").await.unwrap());
        assert_eq!(
            locks.lock("acme/infra#web", 2).await.unwrap(),
            LockAcquisition::Acquired
        );
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken() {
        let locks = MemoryLockProvider::new(Duration::from_millis(0));

        locks.lock("acme/infra#web", 1).await.unwrap();
        assert_eq!(
            locks.lock("acme/infra#web", 2).await.unwrap(),
            LockAcquisition::Acquired
        );
    }

    #[tokio::test]
    async fn test_distinct_projects_do_not_contend() {
        let locks = provider();

        locks.lock("acme/infra#web", 1).await.unwrap();
        assert_eq!(
            locks.lock("acme/infra#db", 2).await.unwrap(),
            LockAcquisition::Acquired
        );
    }
}
