//! Mantis Backend Client
//!
//! A type-safe HTTP client for the Mantis orchestrator reporting API.
//!
//! The pipeline talks to the backend through the [`BackendApi`] capability:
//! one call per command execution ([`BackendApi::report_project_run`]), one
//! call per batch for the final job status, and an occasional configuration
//! report. [`HttpBackendApi`] is the real client; [`NoopBackendApi`] keeps
//! runs working when no backend is configured.

pub mod error;
mod runs;

pub use error::{ClientError, Result};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;

use mantis_core::dto::plan::PlanResult;
use mantis_core::dto::run::{RunDetails, RunReportStatus, SerializedBatch};

/// Reporting surface of the central backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Reports a project and its configuration to the backend.
    async fn report_project(
        &self,
        repo: &str,
        project_name: &str,
        configuration: &str,
    ) -> Result<()>;

    /// Reports one command execution against one project.
    async fn report_project_run(
        &self,
        repo: &str,
        project_name: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        status: RunReportStatus,
        command: &str,
        output: &str,
    ) -> Result<RunDetails>;

    /// Reports the terminal status of a batch job and returns the updated
    /// server-side batch view.
    #[allow(clippy::too_many_arguments)]
    async fn report_project_job_status(
        &self,
        repo: &str,
        project_name: &str,
        job_id: &str,
        status: &str,
        timestamp: DateTime<Utc>,
        plan_result: Option<&PlanResult>,
        pr_comment_url: &str,
        terraform_output: &str,
    ) -> Result<SerializedBatch>;
}

/// HTTP client for the Mantis orchestrator reporting API.
#[derive(Debug, Clone)]
pub struct HttpBackendApi {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// Organisation identifier sent with every request
    organisation: String,
    /// HTTP client instance
    client: Client,
}

impl HttpBackendApi {
    /// Creates a new backend client.
    pub fn new(base_url: impl Into<String>, organisation: impl Into<String>) -> Self {
        Self::with_client(base_url, organisation, Client::new())
    }

    /// Creates a backend client with a custom HTTP client.
    ///
    /// This is how callers configure timeouts, proxies and TLS settings;
    /// the pipeline always passes a client with a bounded timeout.
    pub fn with_client(
        base_url: impl Into<String>,
        organisation: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            organisation: organisation.into(),
            client,
        }
    }

    /// Base URL of the orchestrator.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn organisation(&self) -> &str {
        &self.organisation
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Checks the status code and deserializes the JSON body, or maps the
    /// failure to a [`ClientError`].
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Parse(format!("Failed to parse JSON response: {}", e)))
    }

    /// Checks the status code of a response with no useful body.
    pub(crate) async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

/// Backend client used when no backend is configured. All reports succeed
/// and return empty values.
#[derive(Debug, Clone, Default)]
pub struct NoopBackendApi;

#[async_trait]
impl BackendApi for NoopBackendApi {
    async fn report_project(&self, _: &str, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn report_project_run(
        &self,
        repo: &str,
        project_name: &str,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
        status: RunReportStatus,
        command: &str,
        _: &str,
    ) -> Result<RunDetails> {
        tracing::debug!(
            "No backend configured, dropping run report for {}/{} ({}, {})",
            repo,
            project_name,
            command,
            status
        );
        Ok(RunDetails::default())
    }

    async fn report_project_job_status(
        &self,
        _: &str,
        _: &str,
        job_id: &str,
        _: &str,
        _: DateTime<Utc>,
        _: Option<&PlanResult>,
        _: &str,
        _: &str,
    ) -> Result<SerializedBatch> {
        Ok(SerializedBatch {
            id: job_id.to_string(),
            jobs: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpBackendApi::new("http://localhost:8080", "acme");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = HttpBackendApi::new("http://localhost:8080/", "acme");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_noop_backend_reports_succeed() {
        let backend = NoopBackendApi;
        let details = backend
            .report_project_run(
                "acme-infra",
                "web",
                Utc::now(),
                Utc::now(),
                RunReportStatus::Success,
                "mantis plan",
                "",
            )
            .await
            .unwrap();
        assert_eq!(details.id, 0);
    }
}
