//! Drift notification
//!
//! When an out-of-band plan finds differences between code and live
//! infrastructure, the notifier carries the plan to whoever watches for
//! drift.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait DriftNotifier: Send + Sync {
    async fn send(&self, project_name: &str, plan: &str) -> Result<(), NotifyError>;
}

/// Posts drift notifications to a webhook as JSON.
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

#[derive(Serialize)]
struct DriftPayload<'a> {
    project: &'a str,
    plan: &'a str,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl DriftNotifier for WebhookNotifier {
    async fn send(&self, project_name: &str, plan: &str) -> Result<(), NotifyError> {
        debug!("Sending drift notification for {}", project_name);

        let response = self
            .client
            .post(&self.url)
            .json(&DriftPayload {
                project: project_name,
                plan,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
