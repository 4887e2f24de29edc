//! Write-only REST plan store
//!
//! Pushes plan JSON to an arbitrary HTTP collector. The collector offers no
//! way back, so retrieval and deletion are unsupported.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Serialize;
use tracing::debug;

use super::{PlanStore, StoreError};

pub struct RestPlanStore {
    endpoint: String,
    method: Method,
    pr_url: String,
    client: Client,
}

#[derive(Serialize)]
struct RestPlanBody {
    pr_url: String,
    tffile: String,
}

impl RestPlanStore {
    pub fn new(
        endpoint: impl Into<String>,
        method: Method,
        pr_url: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            pr_url: pr_url.into(),
            client,
        }
    }
}

#[async_trait]
impl PlanStore for RestPlanStore {
    async fn plan_exists(&self, _: &str, _: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn store_plan(
        &self,
        contents: &[u8],
        artifact_name: &str,
        _file_name: &str,
    ) -> Result<(), StoreError> {
        let body = RestPlanBody {
            pr_url: self.pr_url.clone(),
            tffile: String::from_utf8_lossy(contents).to_string(),
        };

        debug!("Pushing plan for {} to {}", artifact_name, self.endpoint);
        let response = self
            .client
            .request(self.method.clone(), &self.endpoint)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn retrieve_plan(
        &self,
        _: &Path,
        _: &str,
        _: &str,
    ) -> Result<Option<PathBuf>, StoreError> {
        Err(StoreError::Unsupported("retrieve"))
    }

    async fn delete_stored_plan(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("delete"))
    }
}
