//! Run reporting DTOs
//!
//! Wire types for the backend reporting surface: per-command run reports,
//! batch job status updates and the serialized batch view the orchestrator
//! returns for aggregate PR comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dto::plan::PlanResult;

/// Terminal status of a reported command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunReportStatus {
    Success,
    Failed,
    Forbidden,
}

impl std::fmt::Display for RunReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunReportStatus::Success => "SUCCESS",
            RunReportStatus::Failed => "FAILED",
            RunReportStatus::Forbidden => "FORBIDDEN",
        };
        write!(f, "{}", s)
    }
}

/// Serialized view of a run record returned by the orchestrator.
///
/// Timestamps are RFC3339 strings; `endedAt` is empty while a run is still
/// in flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub id: i64,
    pub started_at: String,
    pub ended_at: String,
    pub status: String,
    pub command: String,
    pub output: String,
}

/// Body of a per-command run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRunRequest {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunReportStatus,
    pub command: String,
    pub output: String,
}

/// Body of a project configuration report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProjectRequest {
    pub configuration: String,
}

/// Body of a batch job status update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJobStatusRequest {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub plan_result: Option<PlanResult>,
    pub pr_comment_url: String,
    pub terraform_output: String,
}

/// Per-job server-side view inside a batch, with updated statuses. Used to
/// rewrite the aggregate PR comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedJob {
    pub id: String,
    pub project_name: String,
    pub status: String,
    pub pr_comment_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Server-side view of a whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedBatch {
    pub id: String,
    pub jobs: Vec<SerializedJob>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&RunReportStatus::Forbidden).unwrap(),
            "\"FORBIDDEN\""
        );
        assert_eq!(RunReportStatus::Success.to_string(), "SUCCESS");
    }

    #[test]
    fn test_run_details_field_names() {
        let details = RunDetails {
            id: 3,
            started_at: "2024-01-01T00:00:00Z".to_string(),
            ended_at: "2024-01-01T00:01:00Z".to_string(),
            status: "SUCCESS".to_string(),
            command: "mantis plan".to_string(),
            output: String::new(),
        };

        let json = serde_json::to_value(&details).unwrap();
        assert!(json.get("startedAt").is_some());
        assert!(json.get("endedAt").is_some());
    }
}
