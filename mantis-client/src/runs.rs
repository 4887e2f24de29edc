//! Run reporting endpoints

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::{BackendApi, HttpBackendApi};
use mantis_core::dto::plan::PlanResult;
use mantis_core::dto::run::{
    ReportJobStatusRequest, ReportProjectRequest, ReportRunRequest, RunDetails, RunReportStatus,
    SerializedBatch,
};

const ORGANISATION_HEADER: &str = "X-Organisation-Id";

#[async_trait]
impl BackendApi for HttpBackendApi {
    async fn report_project(
        &self,
        repo: &str,
        project_name: &str,
        configuration: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/projects/{}",
            self.base_url(),
            repo,
            project_name
        );
        let response = self
            .http()
            .put(&url)
            .header(ORGANISATION_HEADER, self.organisation())
            .json(&ReportProjectRequest {
                configuration: configuration.to_string(),
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    async fn report_project_run(
        &self,
        repo: &str,
        project_name: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        status: RunReportStatus,
        command: &str,
        output: &str,
    ) -> Result<RunDetails> {
        let url = format!(
            "{}/repos/{}/projects/{}/runs",
            self.base_url(),
            repo,
            project_name
        );
        let response = self
            .http()
            .post(&url)
            .header(ORGANISATION_HEADER, self.organisation())
            .json(&ReportRunRequest {
                started_at,
                ended_at,
                status,
                command: command.to_string(),
                output: output.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

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
    ) -> Result<SerializedBatch> {
        let url = format!(
            "{}/repos/{}/projects/{}/jobs/{}/status",
            self.base_url(),
            repo,
            project_name,
            job_id
        );
        let response = self
            .http()
            .post(&url)
            .header(ORGANISATION_HEADER, self.organisation())
            .json(&ReportJobStatusRequest {
                status: status.to_string(),
                timestamp,
                plan_result: plan_result.cloned(),
                pr_comment_url: pr_comment_url.to_string(),
                terraform_output: terraform_output.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
