//! Plan JSON upload side channel
//!
//! After each successful plan the JSON rendering can additionally be pushed
//! to an HTTP endpoint, keyed by the backend run id. A rejected upload is a
//! warning, never a pipeline failure.

use reqwest::{Client, Method};
use serde::Serialize;
use tracing::{debug, warn};

pub struct PlanUploader {
    endpoint: String,
    method: Method,
    client: Client,
}

#[derive(Serialize)]
struct PlanUploadBody<'a> {
    terraform_plan_json: &'a str,
    job_id: i64,
}

impl PlanUploader {
    pub fn new(endpoint: impl Into<String>, method: Method, client: Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            client,
        }
    }

    /// Uploads one plan JSON document. Failures are logged and swallowed.
    pub async fn upload(&self, plan_json: &str, run_id: i64) {
        if plan_json.is_empty() {
            return;
        }

        let body = PlanUploadBody {
            terraform_plan_json: plan_json,
            job_id: run_id,
        };

        let result = self
            .client
            .request(self.method.clone(), &self.endpoint)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Uploaded plan json for run {}", run_id);
            }
            Ok(response) => {
                warn!(
                    "Plan upload for run {} returned status {}",
                    run_id,
                    response.status()
                );
            }
            Err(e) => {
                warn!("Failed to upload plan json for run {}: {}", run_id, e);
            }
        }
    }
}
