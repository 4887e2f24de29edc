//! Object-store plan store
//!
//! Stores plans as objects under `{bucket_url}/{artifact_name}/{path}` via
//! plain HTTP PUT/GET/DELETE, which any S3-compatible bucket endpoint
//! accepts with pre-signed or proxy URLs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{PlanStore, StoreError};

pub struct BucketPlanStore {
    bucket_url: String,
    client: Client,
}

impl BucketPlanStore {
    pub fn new(bucket_url: impl Into<String>, client: Client) -> Self {
        let bucket_url = bucket_url.into();
        Self {
            bucket_url: bucket_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn object_url(&self, artifact_name: &str, path: &str) -> String {
        format!("{}/{}/{}", self.bucket_url, artifact_name, path)
    }
}

#[async_trait]
impl PlanStore for BucketPlanStore {
    async fn plan_exists(
        &self,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<bool, StoreError> {
        let url = self.object_url(artifact_name, stored_path);
        let response = self.client.head(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StoreError::Status {
                status: status.as_u16(),
            }),
        }
    }

    async fn store_plan(
        &self,
        contents: &[u8],
        artifact_name: &str,
        file_name: &str,
    ) -> Result<(), StoreError> {
        let url = self.object_url(artifact_name, file_name);
        debug!("Uploading plan to {}", url);

        let response = self.client.put(&url).body(contents.to_vec()).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn retrieve_plan(
        &self,
        local_path: &Path,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<Option<PathBuf>, StoreError> {
        let url = self.object_url(artifact_name, stored_path);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                if let Some(parent) = local_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(local_path, &bytes)?;
                Ok(Some(local_path.to_path_buf()))
            }
            status => Err(StoreError::Status {
                status: status.as_u16(),
            }),
        }
    }

    async fn delete_stored_plan(
        &self,
        artifact_name: &str,
        stored_path: &str,
    ) -> Result<(), StoreError> {
        let url = self.object_url(artifact_name, stored_path);
        let response = self.client.delete(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(StoreError::Status {
                status: status.as_u16(),
            }),
        }
    }
}
