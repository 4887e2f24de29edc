//! Local filesystem plan store
//!
//! Plans live under `{root}/{artifact_name}/{file_name}`. This is the
//! default store for single-host setups and tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{PlanStore, StoreError};

pub struct LocalPlanStore {
    root: PathBuf,
}

impl LocalPlanStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn stored_path(&self, artifact_name: &str, file_name: &str) -> PathBuf {
        self.root.join(artifact_name).join(file_name)
    }
}

#[async_trait]
impl PlanStore for LocalPlanStore {
    async fn plan_exists(
        &self,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.stored_path(artifact_name, stored_path).is_file())
    }

    async fn store_plan(
        &self,
        contents: &[u8],
        artifact_name: &str,
        file_name: &str,
    ) -> Result<(), StoreError> {
        let path = self.stored_path(artifact_name, file_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        debug!("Stored plan at {}", path.display());
        Ok(())
    }

    async fn retrieve_plan(
        &self,
        local_path: &Path,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<Option<PathBuf>, StoreError> {
        let path = self.stored_path(artifact_name, stored_path);
        if !path.is_file() {
            return Ok(None);
        }

        let contents = std::fs::read(&path)?;
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local_path, contents)?;
        Ok(Some(local_path.to_path_buf()))
    }

    async fn delete_stored_plan(
        &self,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<(), StoreError> {
        let path = self.stored_path(artifact_name, stored_path);
        if path.is_file() {
            std::fs::remove_file(&path)?;
            debug!("Deleted stored plan {}", path.display());
        }
        Ok(())
    }
}
