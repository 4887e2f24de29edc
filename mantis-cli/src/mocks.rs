//! Test doubles for the pipeline capabilities
//!
//! One mock per capability trait, each recording what it was asked to do so
//! tests can assert the pipeline's observable behavior.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mantis_client::BackendApi;
use mantis_core::domain::policy::PolicyDecision;
use mantis_core::dto::plan::PlanResult;
use mantis_core::dto::run::{RunDetails, RunReportStatus, SerializedBatch, SerializedJob};

use crate::drift::{DriftNotifier, NotifyError};
use crate::iac::{CommandOutput, IacError, IacExecutor};
use crate::policy::{PolicyChecker, PolicyError};
use crate::pr::{Comment, CommitState, PrError, PrService};
use crate::reporting::{CommentFormat, PostedComment, ReportError, Reporter};

fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

// =============================================================================
// IaC executor
// =============================================================================

#[derive(Clone)]
pub struct MockIacExecutor {
    pub non_empty_plan: bool,
    pub plan_json: String,
    pub plan_output: String,
    pub fail_plan: bool,
    pub fail_apply: bool,
}

impl Default for MockIacExecutor {
    fn default() -> Self {
        Self {
            non_empty_plan: false,
            plan_json: r#"{"resource_changes": []}"#.to_string(),
            plan_output: "Terraform will perform the following actions".to_string(),
            fail_plan: false,
            fail_apply: false,
        }
    }
}

#[async_trait]
impl IacExecutor for MockIacExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn init(
        &self,
        _: &[String],
        _: &std::collections::HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        Ok(ok_output(""))
    }

    async fn plan(
        &self,
        _: &[String],
        plan_artifact: &Path,
        _: &std::collections::HashMap<String, String>,
    ) -> Result<(bool, CommandOutput), IacError> {
        if self.fail_plan {
            return Err(IacError::Failed {
                program: "mock".to_string(),
                code: 1,
                stderr: "plan exploded".to_string(),
            });
        }
        std::fs::write(plan_artifact, b"mock-plan").expect("write mock plan artifact");
        Ok((self.non_empty_plan, ok_output(&self.plan_output)))
    }

    async fn apply(
        &self,
        _: &[String],
        _: Option<&Path>,
        _: &std::collections::HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        if self.fail_apply {
            return Err(IacError::Failed {
                program: "mock".to_string(),
                code: 1,
                stderr: "apply exploded".to_string(),
            });
        }
        Ok(ok_output("Apply complete!"))
    }

    async fn destroy(
        &self,
        _: &[String],
        _: &std::collections::HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        Ok(ok_output("Destroy complete!"))
    }

    async fn show_plan_json(
        &self,
        _: &Path,
        _: &std::collections::HashMap<String, String>,
    ) -> Result<String, IacError> {
        Ok(self.plan_json.clone())
    }
}

// =============================================================================
// Policy checker
// =============================================================================

#[derive(Default)]
pub struct MockPolicyChecker {
    pub deny_access: bool,
    pub deny_plan: bool,
    pub plan_reasons: Vec<String>,
    pub drift_enabled: bool,
    /// plan_violations slices seen by check_access, in call order
    pub access_violations_seen: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl PolicyChecker for MockPolicyChecker {
    async fn check_access(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: Option<u64>,
        _: &str,
        plan_violations: &[String],
    ) -> Result<PolicyDecision, PolicyError> {
        self.access_violations_seen
            .lock()
            .unwrap()
            .push(plan_violations.to_vec());
        if self.deny_access {
            Ok(PolicyDecision::deny(vec!["denied by mock".to_string()]))
        } else {
            Ok(PolicyDecision::allow())
        }
    }

    async fn check_plan(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<PolicyDecision, PolicyError> {
        if self.deny_plan {
            Ok(PolicyDecision::deny(self.plan_reasons.clone()))
        } else {
            Ok(PolicyDecision::allow())
        }
    }

    async fn check_drift(&self, _: &str, _: &str, _: &str) -> Result<bool, PolicyError> {
        Ok(self.drift_enabled)
    }
}

// =============================================================================
// PR service
// =============================================================================

pub struct MockPrService {
    pub merged: bool,
    pub mergeable: bool,
    pub statuses: Mutex<Vec<(String, String)>>,
    pub comments: Mutex<Vec<String>>,
    pub edited_comments: Mutex<Vec<(String, String)>>,
    pub merged_prs: Mutex<Vec<u64>>,
}

impl Default for MockPrService {
    fn default() -> Self {
        Self {
            merged: false,
            mergeable: true,
            statuses: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            edited_comments: Mutex::new(Vec::new()),
            merged_prs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PrService for MockPrService {
    async fn publish_comment(&self, _: u64, body: &str) -> Result<Comment, PrError> {
        self.comments.lock().unwrap().push(body.to_string());
        Ok(Comment {
            id: "1".to_string(),
            url: "https://example.com/pr/1#comment-1".to_string(),
        })
    }

    async fn edit_comment(&self, _: u64, comment_id: &str, body: &str) -> Result<(), PrError> {
        self.edited_comments
            .lock()
            .unwrap()
            .push((comment_id.to_string(), body.to_string()));
        Ok(())
    }

    async fn set_status(
        &self,
        _: u64,
        state: CommitState,
        context: &str,
    ) -> Result<(), PrError> {
        self.statuses
            .lock()
            .unwrap()
            .push((context.to_string(), state.to_string()));
        Ok(())
    }

    async fn combined_status(&self, _: u64) -> Result<String, PrError> {
        Ok("success".to_string())
    }

    async fn is_merged(&self, _: u64) -> Result<bool, PrError> {
        Ok(self.merged)
    }

    async fn is_mergeable(&self, _: u64) -> Result<bool, PrError> {
        Ok(self.mergeable)
    }

    async fn merge_pull_request(&self, pr_number: u64) -> Result<(), PrError> {
        self.merged_prs.lock().unwrap().push(pr_number);
        Ok(())
    }
}

// =============================================================================
// Backend API
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReportedRun {
    pub repo: String,
    pub project: String,
    pub status: String,
    pub command: String,
    pub output: String,
}

#[derive(Default)]
pub struct MockBackendApi {
    pub runs: Mutex<Vec<ReportedRun>>,
    pub job_statuses: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl BackendApi for MockBackendApi {
    async fn report_project(&self, _: &str, _: &str, _: &str) -> mantis_client::Result<()> {
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
        output: &str,
    ) -> mantis_client::Result<RunDetails> {
        let mut runs = self.runs.lock().unwrap();
        runs.push(ReportedRun {
            repo: repo.to_string(),
            project: project_name.to_string(),
            status: status.to_string(),
            command: command.to_string(),
            output: output.to_string(),
        });
        Ok(RunDetails {
            id: runs.len() as i64,
            status: status.to_string(),
            command: command.to_string(),
            ..Default::default()
        })
    }

    async fn report_project_job_status(
        &self,
        _: &str,
        project_name: &str,
        job_id: &str,
        status: &str,
        timestamp: DateTime<Utc>,
        _: Option<&PlanResult>,
        _: &str,
        _: &str,
    ) -> mantis_client::Result<SerializedBatch> {
        self.job_statuses
            .lock()
            .unwrap()
            .push((job_id.to_string(), status.to_string()));
        Ok(SerializedBatch {
            id: job_id.to_string(),
            jobs: vec![SerializedJob {
                id: job_id.to_string(),
                project_name: project_name.to_string(),
                status: status.to_string(),
                pr_comment_url: None,
                updated_at: timestamp,
            }],
        })
    }
}

// =============================================================================
// Reporter
// =============================================================================

#[derive(Default)]
pub struct MockReporter {
    pub reports: Mutex<Vec<String>>,
    pub suppressed: AtomicBool,
}

impl MockReporter {
    pub fn contains(&self, needle: &str) -> bool {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.contains(needle))
    }
}

#[async_trait]
impl Reporter for MockReporter {
    async fn report(&self, body: &str, format: CommentFormat) -> Result<(), ReportError> {
        self.reports
            .lock()
            .unwrap()
            .push(format.render(body, true));
        Ok(())
    }

    async fn flush(&self) -> Result<Option<PostedComment>, ReportError> {
        if self.suppressed.load(Ordering::SeqCst) || self.reports.lock().unwrap().is_empty() {
            return Ok(None);
        }
        Ok(Some(Comment {
            id: "1".to_string(),
            url: "https://example.com/pr/1#comment-1".to_string(),
        }))
    }

    fn supports_markdown(&self) -> bool {
        true
    }

    fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Drift notifier
// =============================================================================

#[derive(Default)]
pub struct MockDriftNotifier {
    pub notifications: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DriftNotifier for MockDriftNotifier {
    async fn send(&self, project_name: &str, plan: &str) -> Result<(), NotifyError> {
        self.notifications
            .lock()
            .unwrap()
            .push((project_name.to_string(), plan.to_string()));
        Ok(())
    }
}
