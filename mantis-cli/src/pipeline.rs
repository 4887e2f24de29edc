//! Batch job pipeline
//!
//! The top-level orchestrator over a batch of jobs: orders jobs by the
//! dependency graph, gates every command through policy, dispatches through
//! the per-project executor, reports each run to the backend, and posts the
//! final aggregate status.
//!
//! Jobs within a batch run strictly sequentially; parallelism exists only
//! across batches and is arbitrated by the project lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use mantis_client::BackendApi;
use mantis_core::domain::graph::{DependencyGraph, GraphError};
use mantis_core::domain::job::Job;
use mantis_core::dto::plan::{ApplyResult, ExecutorResult, PlanResult};
use mantis_core::dto::run::{RunReportStatus, SerializedBatch, SerializedJob};

use crate::drift::DriftNotifier;
use crate::execution::{ExecError, LockingExecutorWrapper, PlanArtifactPaths, ProjectExecutor};
use crate::iac::{self, IacExecutor};
use crate::locking::{LockProvider, PullRequestLock};
use crate::policy::{PolicyChecker, PolicyError};
use crate::pr::{CommitState, PrError, PrService};
use crate::reporting::{CommentFormat, Reporter};
use crate::storage::{PlanStore, PlanUploader};

/// Command failure taxonomy. The pipeline decides per kind whether the
/// batch continues.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("User {user} is not allowed to perform action: {command}. Check your policies :x:")]
    PolicyDenied {
        user: String,
        command: String,
        reasons: Vec<String>,
    },

    #[error("{0}")]
    Tool(String),

    #[error("project locked by another PR #{owner}")]
    LockContention { owner: u64 },

    #[error("{0}")]
    Config(String),

    #[error("Command '{0}' is not supported")]
    Unsupported(String),

    #[error("error checking policy: {0}")]
    Policy(#[from] PolicyError),
}

/// The closed command set. Anything else is an `Unsupported` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MantisCommand {
    Plan,
    Apply,
    Destroy,
    Lock,
    Unlock,
    DriftDetect,
}

impl MantisCommand {
    pub fn parse(command: &str) -> Result<Self, CommandError> {
        match command {
            "mantis plan" | "mantis test" => Ok(MantisCommand::Plan),
            "mantis apply" => Ok(MantisCommand::Apply),
            "mantis destroy" => Ok(MantisCommand::Destroy),
            "mantis lock" => Ok(MantisCommand::Lock),
            "mantis unlock" => Ok(MantisCommand::Unlock),
            "mantis drift-detect" => Ok(MantisCommand::DriftDetect),
            other => Err(CommandError::Unsupported(other.to_string())),
        }
    }

    /// Apply-class commands participate in the batch apply bookkeeping.
    pub fn is_apply(&self) -> bool {
        matches!(self, MantisCommand::Apply)
    }
}

/// Result of one dispatched command.
#[derive(Debug, Default)]
struct CommandOutcome {
    result: ExecutorResult,
    output: String,
    plan_json: Option<String>,
}

/// Aggregate outcome of a batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    pub all_applies_success: bool,
    pub at_least_one_apply: bool,
}

/// Batch-level options supplied by the driver.
pub struct RunOptions {
    /// Identifier of this batch at the backend
    pub job_id: String,
    pub report_final_status_to_backend: bool,
    pub report_terraform_output: bool,
    /// PR comment rewritten with the aggregate batch results
    pub pr_comment_id: Option<String>,
    pub working_dir: PathBuf,
    /// Budget for each IaC child process
    pub iac_timeout: Duration,
}

/// Factory building the IaC executor for a job. Injected so tests can
/// substitute the tool.
pub type IacFactory = dyn Fn(&Job, PathBuf, Duration) -> Box<dyn IacExecutor> + Send + Sync;

pub fn default_iac_factory() -> Box<IacFactory> {
    Box::new(|job, project_path, timeout| {
        iac::for_engine(job.engine, project_path, job.workspace.clone(), timeout)
    })
}

/// Drives a batch of jobs to completion.
pub struct JobRunner {
    pub pr_service: Arc<dyn PrService>,
    pub policy: Arc<dyn PolicyChecker>,
    pub lock_provider: Arc<dyn LockProvider>,
    pub reporter: Arc<dyn Reporter>,
    pub plan_store: Arc<dyn PlanStore>,
    pub backend: Arc<dyn BackendApi>,
    pub drift_notifier: Option<Arc<dyn DriftNotifier>>,
    pub plan_uploader: Option<PlanUploader>,
    pub iac_factory: Box<IacFactory>,
    /// Observed at command boundaries; a running IaC child is never
    /// interrupted mid-flight.
    pub cancelled: Arc<AtomicBool>,
    pub opts: RunOptions,
}

impl JobRunner {
    /// Runs a batch: jobs in topological order, commands in listed order.
    ///
    /// A command failure skips the rest of its job but not other jobs.
    /// Cycles in the graph and unknown commands abort the whole batch.
    pub async fn run_jobs(
        &self,
        jobs: Vec<Job>,
        graph: &DependencyGraph,
    ) -> Result<BatchOutcome, CommandError> {
        let jobs = sort_jobs_by_dependency(jobs, graph)
            .map_err(|e| CommandError::Config(e.to_string()))?;

        let run_started_at = Utc::now();
        let mut executor_results: Vec<Option<ExecutorResult>> = Vec::new();
        executor_results.resize_with(jobs.len(), || None);
        let mut applies_per_project: HashMap<String, bool> = HashMap::new();

        'jobs: for (i, job) in jobs.iter().enumerate() {
            let (org, repo) = job.scm_org_and_repo();
            let backend_repo = job.backend_repo_name();

            for command_str in &job.commands {
                if self.cancelled.load(Ordering::SeqCst) {
                    warn!("Cancellation requested, aborting batch before the next command");
                    break 'jobs;
                }

                let command = MantisCommand::parse(command_str)?;

                let decision = self
                    .policy
                    .check_access(
                        org,
                        repo,
                        &job.project_name,
                        &job.project_dir,
                        command_str,
                        job.pull_request_number,
                        &job.requested_by,
                        &[],
                    )
                    .await?;

                if !decision.allowed {
                    let msg = self
                        .report_policy_error(&job.project_name, command_str, &job.requested_by)
                        .await;
                    info!(
                        "Skipping command {} for project {}",
                        command_str, job.project_name
                    );
                    if command.is_apply() {
                        applies_per_project.insert(job.project_name.clone(), false);
                    }
                    if let Err(e) = self
                        .backend
                        .report_project_run(
                            &backend_repo,
                            &job.project_name,
                            run_started_at,
                            Utc::now(),
                            RunReportStatus::Forbidden,
                            command_str,
                            &msg,
                        )
                        .await
                    {
                        warn!("Failed to report run to backend: {}", e);
                    }
                    continue;
                }

                match self
                    .run_command(command, command_str, job, org, repo, &mut applies_per_project)
                    .await
                {
                    Ok(outcome) => {
                        let run_details = match self
                            .backend
                            .report_project_run(
                                &backend_repo,
                                &job.project_name,
                                run_started_at,
                                Utc::now(),
                                RunReportStatus::Success,
                                command_str,
                                &outcome.output,
                            )
                            .await
                        {
                            Ok(details) => Some(details),
                            Err(e) => {
                                warn!("Failed to report run to backend: {}", e);
                                None
                            }
                        };

                        if let (Some(uploader), Some(plan_json), Some(details)) = (
                            self.plan_uploader.as_ref(),
                            outcome.plan_json.as_deref(),
                            run_details.as_ref(),
                        ) {
                            uploader.upload(plan_json, details.id).await;
                        }

                        executor_results[i] = Some(outcome.result);
                    }
                    Err(err) => {
                        if matches!(
                            err,
                            CommandError::Config(_) | CommandError::Unsupported(_)
                        ) {
                            return Err(err);
                        }

                        error!(
                            "Project {} command {} failed: {}",
                            job.project_name, command_str, err
                        );
                        applies_per_project.insert(job.project_name.clone(), false);

                        let status = match err {
                            CommandError::PolicyDenied { .. } => RunReportStatus::Forbidden,
                            _ => RunReportStatus::Failed,
                        };
                        if let Err(e) = self
                            .backend
                            .report_project_run(
                                &backend_repo,
                                &job.project_name,
                                run_started_at,
                                Utc::now(),
                                status,
                                command_str,
                                &err.to_string(),
                            )
                            .await
                        {
                            warn!("Failed to report run to backend: {}", e);
                        }

                        // remaining commands of this job are skipped
                        break;
                    }
                }
            }
        }

        let all_applies_success = applies_per_project.values().all(|v| *v);
        let at_least_one_apply = !applies_per_project.is_empty();

        if self.opts.report_final_status_to_backend && all_applies_success && !jobs.is_empty() {
            self.report_final_status(&jobs, &executor_results).await;
        } else if let Err(e) = self.reporter.flush().await {
            warn!("Failed to flush reporter: {}", e);
        }

        Ok(BatchOutcome {
            all_applies_success,
            at_least_one_apply,
        })
    }

    /// Dispatches one command through the executor.
    async fn run_command(
        &self,
        command: MantisCommand,
        command_str: &str,
        job: &Job,
        org: &str,
        repo: &str,
        applies: &mut HashMap<String, bool>,
    ) -> Result<CommandOutcome, CommandError> {
        info!(
            "Running '{}' for project '{}'",
            command_str, job.project_name
        );

        let project_path = self.opts.working_dir.join(&job.project_dir);
        let iac = (self.iac_factory)(job, project_path.clone(), self.opts.iac_timeout);
        let executor = ProjectExecutor {
            job,
            project_path,
            iac: iac.as_ref(),
            plan_store: self.plan_store.as_ref(),
            paths: PlanArtifactPaths::new(
                &job.namespace,
                &job.project_name,
                job.pull_request_number,
            ),
            step_timeout: self.opts.iac_timeout,
        };

        match command {
            MantisCommand::Plan => {
                let pr = require_pr(job, command_str)?;
                let wrapper = self.locking_wrapper(executor, job, pr);
                self.run_plan(job, org, repo, pr, wrapper).await
            }
            MantisCommand::Apply => {
                let pr = require_pr(job, command_str)?;
                let wrapper = self.locking_wrapper(executor, job, pr);
                self.run_apply(command_str, job, org, repo, pr, wrapper, applies)
                    .await
            }
            MantisCommand::Destroy => {
                let pr = require_pr(job, command_str)?;
                let wrapper = self.locking_wrapper(executor, job, pr);
                let output = match wrapper.destroy().await {
                    Ok(output) => output,
                    Err(ExecError::LockContention { owner }) => {
                        return Err(CommandError::LockContention { owner });
                    }
                    Err(e) => {
                        return Err(CommandError::Tool(format!(
                            "Failed to run mantis destroy command. {}",
                            e
                        )));
                    }
                };
                Ok(CommandOutcome {
                    result: ExecutorResult {
                        terraform_output: output.clone(),
                        ..Default::default()
                    },
                    output,
                    plan_json: None,
                })
            }
            MantisCommand::Lock => {
                let pr = require_pr(job, command_str)?;
                let wrapper = self.locking_wrapper(executor, job, pr);
                match wrapper.lock().await {
                    Ok(()) => Ok(CommandOutcome::default()),
                    Err(ExecError::LockContention { owner }) => {
                        Err(CommandError::LockContention { owner })
                    }
                    Err(e) => Err(CommandError::Tool(format!(
                        "Failed to lock project. {}",
                        e
                    ))),
                }
            }
            MantisCommand::Unlock => {
                let pr = require_pr(job, command_str)?;
                let wrapper = self.locking_wrapper(executor, job, pr);
                wrapper
                    .unlock()
                    .await
                    .map_err(|e| CommandError::Tool(format!("Failed to unlock project. {}", e)))?;
                if let Err(e) = wrapper.executor.delete_stored_plans().await {
                    warn!("Failed to delete stored plan files: {}", e);
                }
                Ok(CommandOutcome::default())
            }
            MantisCommand::DriftDetect => {
                self.run_drift_detection(job, org, repo, executor).await
            }
        }
    }

    async fn run_plan(
        &self,
        job: &Job,
        org: &str,
        repo: &str,
        pr: u64,
        wrapper: LockingExecutorWrapper<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        let status_context = format!("{}/plan", job.project_name);
        self.set_status(pr, CommitState::Pending, &status_context)
            .await?;

        let outcome = match wrapper.plan().await {
            Ok(outcome) => outcome,
            Err(ExecError::LockContention { owner }) => {
                self.set_status(pr, CommitState::Failure, &status_context)
                    .await?;
                return Err(CommandError::LockContention { owner });
            }
            Err(e) => {
                let msg = format!("Failed to run mantis plan command. {}", e);
                error!("{}", msg);
                self.set_status(pr, CommitState::Failure, &status_context)
                    .await?;
                return Err(CommandError::Tool(msg));
            }
        };

        let mut result = ExecutorResult::default();

        if outcome.performed {
            if outcome.non_empty {
                self.report_plan_output(&outcome.terraform_output).await;

                let decision = self
                    .policy
                    .check_plan(
                        org,
                        repo,
                        &job.project_name,
                        &job.project_dir,
                        &outcome.plan_json,
                    )
                    .await?;

                let validation_format = self.validation_format(&job.project_name);
                if !decision.allowed {
                    let preformatted: Vec<String> = decision
                        .reasons
                        .iter()
                        .map(|reason| format!("    {}", reason))
                        .collect();
                    let message = format!(
                        "Terraform plan failed validation checks :x:<br>{}",
                        preformatted.join("<br>")
                    );
                    self.report(&message, validation_format).await;
                    return Err(CommandError::Tool("Plan is not allowed".to_string()));
                }

                self.report(
                    "Terraform plan validation checks succeeded :white_check_mark:",
                    validation_format,
                )
                .await;
                if let Some(summary) = &outcome.summary {
                    self.report(
                        &summary.to_string(),
                        CommentFormat::Comment {
                            heading: "Terraform plan summary".to_string(),
                        },
                    )
                    .await;
                }
            } else {
                self.report(
                    &format!(
                        "→ No changes in terraform output for {}",
                        wrapper.lock.lock_id()
                    ),
                    CommentFormat::Identity,
                )
                .await;
                self.reporter.suppress();
            }

            self.set_status(pr, CommitState::Success, &status_context)
                .await?;

            result.terraform_output = outcome.terraform_output.clone();
            result.plan_result = Some(PlanResult {
                summary: outcome.summary.unwrap_or_default(),
                terraform_json: outcome.plan_json.clone(),
            });
        }

        let plan_json = if outcome.plan_json.is_empty() {
            None
        } else {
            Some(outcome.plan_json)
        };
        Ok(CommandOutcome {
            result,
            output: outcome.terraform_output,
            plan_json,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_apply(
        &self,
        command_str: &str,
        job: &Job,
        org: &str,
        repo: &str,
        pr: u64,
        wrapper: LockingExecutorWrapper<'_>,
        applies: &mut HashMap<String, bool>,
    ) -> Result<CommandOutcome, CommandError> {
        applies.insert(job.project_name.clone(), false);

        let is_merged = self
            .pr_service
            .is_merged(pr)
            .await
            .map_err(|e| CommandError::Tool(format!("Failed to check if PR is merged. {}", e)))?;
        let is_mergeable = self.pr_service.is_mergeable(pr).await.map_err(|e| {
            CommandError::Tool(format!("Failed to check if PR is mergeable. {}", e))
        })?;
        info!(
            "PR #{} status, mergeable: {}, merged: {}",
            pr, is_mergeable, is_merged
        );

        if !is_mergeable && !is_merged {
            let comment = "cannot perform Apply since the PR is not currently mergeable";
            let format = if self.reporter.supports_markdown() {
                CommentFormat::Collapsible {
                    summary: "Apply error".to_string(),
                    open: false,
                }
            } else {
                CommentFormat::Comment {
                    heading: "Apply error".to_string(),
                }
            };
            self.report(comment, format).await;
            return Err(CommandError::Tool(comment.to_string()));
        }

        let status_context = format!("{}/apply", job.project_name);
        self.set_status(pr, CommitState::Pending, &status_context)
            .await?;

        // When a plan-store destination is configured, the stored plan is
        // re-checked against plan policy and the violations feed the access
        // decision below.
        let plan_violations = if self.plan_uploader.is_some() {
            let plan_json = wrapper.executor.retrieve_plan_json().await.map_err(|e| {
                CommandError::Tool(format!("Failed to retrieve stored plan. {}", e))
            })?;
            let decision = self
                .policy
                .check_plan(org, repo, &job.project_name, &job.project_dir, &plan_json)
                .await?;
            if decision.allowed {
                Vec::new()
            } else {
                decision.reasons
            }
        } else {
            info!("Skipping plan policy checks because plan storage is not configured");
            Vec::new()
        };

        let decision = self
            .policy
            .check_access(
                org,
                repo,
                &job.project_name,
                &job.project_dir,
                command_str,
                Some(pr),
                &job.requested_by,
                &plan_violations,
            )
            .await?;
        if !decision.allowed {
            self.report_policy_error(&job.project_name, command_str, &job.requested_by)
                .await;
            return Err(CommandError::PolicyDenied {
                user: job.requested_by.clone(),
                command: command_str.to_string(),
                reasons: decision.reasons,
            });
        }

        let outcome = match wrapper.apply().await {
            Ok(outcome) => outcome,
            Err(ExecError::LockContention { owner }) => {
                self.set_status(pr, CommitState::Failure, &status_context)
                    .await?;
                return Err(CommandError::LockContention { owner });
            }
            Err(e) => {
                error!("Failed to run mantis apply command. {}", e);
                self.set_status(pr, CommitState::Failure, &status_context)
                    .await?;
                return Err(CommandError::Tool(format!(
                    "Failed to run mantis apply command. {}",
                    e
                )));
            }
        };

        if outcome.performed {
            self.set_status(pr, CommitState::Success, &status_context)
                .await?;
            applies.insert(job.project_name.clone(), true);
        }

        Ok(CommandOutcome {
            result: ExecutorResult {
                terraform_output: outcome.output.clone(),
                plan_result: None,
                apply_result: Some(ApplyResult::default()),
            },
            output: outcome.output,
            plan_json: None,
        })
    }

    async fn run_drift_detection(
        &self,
        job: &Job,
        org: &str,
        repo: &str,
        executor: ProjectExecutor<'_>,
    ) -> Result<CommandOutcome, CommandError> {
        let enabled = self
            .policy
            .check_drift(org, repo, &job.project_name)
            .await?;
        if !enabled {
            let msg = "skipping drift detection since it is not enabled for this project";
            info!("{}", msg);
            return Ok(CommandOutcome {
                output: msg.to_string(),
                ..Default::default()
            });
        }

        // Drift detection is a read-only plan; it runs lock-free
        let outcome = executor.plan().await.map_err(|e| {
            CommandError::Tool(format!("Failed to run mantis plan command. {}", e))
        })?;

        if outcome.performed && outcome.non_empty {
            match &self.drift_notifier {
                Some(notifier) => {
                    if let Err(e) = notifier
                        .send(&job.project_name, &outcome.terraform_output)
                        .await
                    {
                        warn!("Error sending drift notification: {}", e);
                    }
                }
                None => {
                    warn!("No drift notification configured, not sending any notifications");
                }
            }
        } else if outcome.performed {
            info!("No drift detected for project {}", job.project_name);
        } else {
            info!("No plan performed");
        }

        Ok(CommandOutcome {
            result: ExecutorResult {
                terraform_output: outcome.terraform_output.clone(),
                ..Default::default()
            },
            output: outcome.terraform_output,
            plan_json: None,
        })
    }

    /// Batch finale: flush buffered reports, report the terminal job status
    /// to the backend and rewrite the aggregate PR comment. All best-effort.
    async fn report_final_status(
        &self,
        jobs: &[Job],
        executor_results: &[Option<ExecutorResult>],
    ) {
        let posted = match self.reporter.flush().await {
            Ok(posted) => posted,
            Err(e) => {
                warn!("Error while sending job comments: {}", e);
                None
            }
        };
        let comment_url = posted.map(|c| c.url).unwrap_or_default();

        let first_job = &jobs[0];
        let first_result = executor_results.first().and_then(|r| r.as_ref());
        let plan_result = first_result.and_then(|r| r.plan_result.as_ref());
        let terraform_output = if self.opts.report_terraform_output {
            first_result
                .map(|r| r.terraform_output.clone())
                .unwrap_or_default()
        } else {
            String::new()
        };

        let batch = match self
            .backend
            .report_project_job_status(
                &first_job.backend_repo_name(),
                &first_job.project_name,
                &self.opts.job_id,
                "succeeded",
                Utc::now(),
                plan_result,
                &comment_url,
                &terraform_output,
            )
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Error reporting job status: {}", e);
                return;
            }
        };

        if let (Some(pr), Some(comment_id)) = (
            first_job.pull_request_number,
            self.opts.pr_comment_id.as_deref(),
        ) {
            let body = render_batch_comment(&batch.jobs);
            if let Err(e) = self.pr_service.edit_comment(pr, comment_id, &body).await {
                warn!("Error updating status comment: {}", e);
            }
            if let Err(e) = self.update_aggregate_status(&batch, pr).await {
                warn!("Error updating aggregate status check: {}", e);
            }
        }
    }

    async fn update_aggregate_status(
        &self,
        batch: &SerializedBatch,
        pr_number: u64,
    ) -> Result<(), PrError> {
        let all_ok = batch
            .jobs
            .iter()
            .all(|j| matches!(j.status.as_str(), "succeeded" | "applied"));
        let state = if all_ok {
            CommitState::Success
        } else {
            CommitState::Failure
        };
        self.pr_service
            .set_status(pr_number, state, "mantis/aggregate-status")
            .await
    }

    fn locking_wrapper<'a>(
        &'a self,
        executor: ProjectExecutor<'a>,
        job: &'a Job,
        pr_number: u64,
    ) -> LockingExecutorWrapper<'a> {
        LockingExecutorWrapper {
            lock: PullRequestLock {
                provider: self.lock_provider.as_ref(),
                reporter: self.reporter.as_ref(),
                project_namespace: &job.namespace,
                project_name: &job.project_name,
                pr_number,
            },
            executor,
        }
    }

    async fn report_policy_error(
        &self,
        project_name: &str,
        command: &str,
        requested_by: &str,
    ) -> String {
        let msg = format!(
            "User {} is not allowed to perform action: {}. Check your policies :x:",
            requested_by, command
        );
        let format = if self.reporter.supports_markdown() {
            CommentFormat::Collapsible {
                summary: format!("Policy violation for <b>{} - {}</b>", project_name, command),
                open: false,
            }
        } else {
            CommentFormat::Comment {
                heading: format!("Policy violation for {} - {}", project_name, command),
            }
        };
        self.report(&msg, format).await;
        msg
    }

    async fn report_plan_output(&self, plan: &str) {
        let format = if self.reporter.supports_markdown() {
            CommentFormat::TerraformOutput {
                summary: "Plan output".to_string(),
                open: true,
            }
        } else {
            CommentFormat::Comment {
                heading: "Plan output".to_string(),
            }
        };
        self.report(plan, format).await;
    }

    fn validation_format(&self, project_name: &str) -> CommentFormat {
        let summary = format!("Terraform plan validation check ({})", project_name);
        if self.reporter.supports_markdown() {
            CommentFormat::Collapsible {
                summary,
                open: false,
            }
        } else {
            CommentFormat::Comment { heading: summary }
        }
    }

    async fn report(&self, body: &str, format: CommentFormat) {
        if let Err(e) = self.reporter.report(body, format).await {
            warn!("Failed to publish report: {}", e);
        }
    }

    async fn set_status(
        &self,
        pr_number: u64,
        state: CommitState,
        context: &str,
    ) -> Result<(), CommandError> {
        self.pr_service
            .set_status(pr_number, state, context)
            .await
            .map_err(|e| CommandError::Tool(format!("Failed to set PR status. {}", e)))
    }
}

fn require_pr(job: &Job, command_str: &str) -> Result<u64, CommandError> {
    job.pull_request_number.ok_or_else(|| {
        CommandError::Config(format!(
            "command '{}' requires a pull request context",
            command_str
        ))
    })
}

/// Orders jobs by the dependency graph; ties break lexicographically by
/// project name. Projects missing from the graph join as isolated nodes.
pub fn sort_jobs_by_dependency(
    jobs: Vec<Job>,
    graph: &DependencyGraph,
) -> Result<Vec<Job>, GraphError> {
    let mut graph = graph.clone();
    for job in &jobs {
        graph.add_project(&job.project_name);
    }
    let order = graph.sorted()?;

    let mut remaining = jobs;
    let mut sorted = Vec::with_capacity(remaining.len());
    for node in order {
        let (matched, rest): (Vec<Job>, Vec<Job>) = remaining
            .into_iter()
            .partition(|job| job.project_name == node);
        sorted.extend(matched);
        remaining = rest;
    }
    Ok(sorted)
}

/// Markdown table of per-project batch results for the aggregate comment.
fn render_batch_comment(jobs: &[SerializedJob]) -> String {
    let mut body = String::from("| Project | Status |\n|---------|--------|\n");
    for job in jobs {
        let status = match job.status.as_str() {
            "succeeded" | "applied" => format!(":white_check_mark: {}", job.status),
            "failed" => ":x: failed".to_string(),
            other => other.to_string(),
        };
        body.push_str(&format!("| {} | {} |\n", job.project_name, status));
    }
    body
}

/// Drives the merge transition after a fully applied batch.
pub async fn merge_pull_request(
    pr_service: &dyn PrService,
    pr_number: u64,
) -> anyhow::Result<()> {
    // Give the PR platform time to settle status checks after the last apply
    tokio::time::sleep(Duration::from_secs(5)).await;

    if pr_service.is_merged(pr_number).await? {
        info!("PR #{} is already merged, skipping merge step", pr_number);
        return Ok(());
    }

    let combined_status = pr_service.combined_status(pr_number).await?;
    if combined_status != "success" {
        anyhow::bail!("PR is not mergeable. Status: {}", combined_status);
    }

    if !pr_service.is_mergeable(pr_number).await? {
        anyhow::bail!("PR is not mergeable");
    }

    pr_service.merge_pull_request(pr_number).await?;
    info!("PR #{} merged", pr_number);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use crate::locking::MemoryLockProvider;
    use crate::mocks::{
        MockBackendApi, MockDriftNotifier, MockIacExecutor, MockPolicyChecker, MockPrService,
        MockReporter,
    };
    use crate::storage::LocalPlanStore;
    use mantis_core::domain::job::IacEngine;

    fn test_job(project: &str, commands: &[&str]) -> Job {
        Job {
            namespace: "acme/infra".to_string(),
            project_name: project.to_string(),
            project_dir: project.to_string(),
            workspace: "default".to_string(),
            engine: IacEngine::Terraform,
            commands: commands.iter().map(|c| c.to_string()).collect(),
            pull_request_number: Some(1),
            event_name: "pull_request".to_string(),
            requested_by: "alice".to_string(),
            plan_stage: None,
            apply_stage: None,
            state_env_vars: HashMap::new(),
            run_env_vars: HashMap::new(),
            command_env_vars: HashMap::new(),
        }
    }

    struct Harness {
        workdir: tempfile::TempDir,
        policy: Arc<MockPolicyChecker>,
        pr: Arc<MockPrService>,
        backend: Arc<MockBackendApi>,
        reporter: Arc<MockReporter>,
        locks: Arc<MemoryLockProvider>,
        iac: MockIacExecutor,
        report_final_status: bool,
        pr_comment_id: Option<String>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                workdir: tempfile::tempdir().unwrap(),
                policy: Arc::new(MockPolicyChecker::default()),
                pr: Arc::new(MockPrService::default()),
                backend: Arc::new(MockBackendApi::default()),
                reporter: Arc::new(MockReporter::default()),
                locks: Arc::new(MemoryLockProvider::new(Duration::from_secs(60))),
                iac: MockIacExecutor::default(),
                report_final_status: false,
                pr_comment_id: None,
            }
        }

        fn with_project_dirs(self, projects: &[&str]) -> Self {
            for project in projects {
                std::fs::create_dir_all(self.workdir.path().join(project)).unwrap();
            }
            self
        }

        fn plan_store_root(&self) -> PathBuf {
            self.workdir.path().join(".plans")
        }

        fn runner(&self) -> JobRunner {
            let iac = self.iac.clone();
            JobRunner {
                pr_service: self.pr.clone(),
                policy: self.policy.clone(),
                lock_provider: self.locks.clone(),
                reporter: self.reporter.clone(),
                plan_store: Arc::new(LocalPlanStore::new(self.plan_store_root())),
                backend: self.backend.clone(),
                drift_notifier: None,
                plan_uploader: None,
                iac_factory: Box::new(move |_, _, _| Box::new(iac.clone())),
                cancelled: Arc::new(AtomicBool::new(false)),
                opts: RunOptions {
                    job_id: "batch-1".to_string(),
                    report_final_status_to_backend: self.report_final_status,
                    report_terraform_output: false,
                    pr_comment_id: self.pr_comment_id.clone(),
                    working_dir: self.workdir.path().to_path_buf(),
                    iac_timeout: Duration::from_secs(30),
                },
            }
        }
    }

    #[test]
    fn test_command_parse_closed_set() {
        assert_eq!(
            MantisCommand::parse("mantis plan").unwrap(),
            MantisCommand::Plan
        );
        assert_eq!(
            MantisCommand::parse("mantis test").unwrap(),
            MantisCommand::Plan
        );
        assert_eq!(
            MantisCommand::parse("mantis apply").unwrap(),
            MantisCommand::Apply
        );
        assert_eq!(
            MantisCommand::parse("mantis drift-detect").unwrap(),
            MantisCommand::DriftDetect
        );

        assert!(MantisCommand::parse("mantis Plan").is_err());
        assert!(MantisCommand::parse("terraform plan").is_err());
    }

    #[test]
    fn test_sort_jobs_by_dependency_order() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("b", "a");
        graph.add_dependency("c", "a");

        let jobs = vec![
            test_job("c", &["mantis plan"]),
            test_job("b", &["mantis plan"]),
            test_job("a", &["mantis plan"]),
        ];

        let sorted = sort_jobs_by_dependency(jobs, &graph).unwrap();
        let names: Vec<&str> = sorted.iter().map(|j| j.project_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_jobs_refuses_cycles() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "a");

        let jobs = vec![test_job("a", &["mantis plan"])];
        assert!(sort_jobs_by_dependency(jobs, &graph).is_err());
    }

    #[tokio::test]
    async fn test_denied_plan_reports_forbidden() {
        let mut harness = Harness::new().with_project_dirs(&["web"]);
        harness.policy = Arc::new(MockPolicyChecker {
            deny_access: true,
            ..Default::default()
        });
        let runner = harness.runner();

        let outcome = runner
            .run_jobs(
                vec![test_job("web", &["mantis plan"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        assert!(outcome.all_applies_success);
        assert!(!outcome.at_least_one_apply);

        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "FORBIDDEN");
        assert_eq!(runs[0].command, "mantis plan");
        assert_eq!(runs[0].repo, "acme-infra");

        assert!(harness
            .reporter
            .contains("User alice is not allowed to perform action: mantis plan"));
    }

    #[tokio::test]
    async fn test_plan_with_no_changes_is_suppressed() {
        let harness = Harness::new().with_project_dirs(&["web"]);
        let runner = harness.runner();

        let outcome = runner
            .run_jobs(
                vec![test_job("web", &["mantis plan"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        assert!(outcome.all_applies_success);
        assert!(!outcome.at_least_one_apply);

        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "SUCCESS");

        assert!(harness
            .reporter
            .contains("→ No changes in terraform output for acme/infra#web"));
        assert!(harness.reporter.suppressed.load(Ordering::SeqCst));

        let statuses = harness.pr.statuses.lock().unwrap();
        assert_eq!(
            *statuses,
            vec![
                ("web/plan".to_string(), "pending".to_string()),
                ("web/plan".to_string(), "success".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_plan_blocked_by_plan_policy() {
        let mut harness = Harness::new().with_project_dirs(&["web"]);
        harness.iac = MockIacExecutor {
            non_empty_plan: true,
            plan_json: r#"{"resource_changes": [{"change": {"actions": ["create"]}}]}"#
                .to_string(),
            ..Default::default()
        };
        harness.policy = Arc::new(MockPolicyChecker {
            deny_plan: true,
            plan_reasons: vec!["rule A".to_string(), "rule B".to_string()],
            ..Default::default()
        });
        let runner = harness.runner();

        let outcome = runner
            .run_jobs(
                vec![test_job("web", &["mantis plan"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.all_applies_success);

        assert!(harness.reporter.contains(
            "Terraform plan failed validation checks :x:<br>    rule A<br>    rule B"
        ));

        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "FAILED");
        assert_eq!(runs[0].output, "Plan is not allowed");
    }

    #[tokio::test]
    async fn test_apply_on_non_mergeable_pr() {
        let mut harness = Harness::new().with_project_dirs(&["web"]);
        harness.pr = Arc::new(MockPrService {
            merged: false,
            mergeable: false,
            ..Default::default()
        });
        let runner = harness.runner();

        let outcome = runner
            .run_jobs(
                vec![test_job("web", &["mantis apply"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.all_applies_success);
        assert!(outcome.at_least_one_apply);

        assert!(harness
            .reporter
            .contains("cannot perform Apply since the PR is not currently mergeable"));

        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "FAILED");

        // the refusal happens before any apply status is set
        assert!(harness.pr.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_apply_reports_final_status() {
        let mut harness = Harness::new().with_project_dirs(&["web"]);
        harness.report_final_status = true;
        harness.pr_comment_id = Some("42".to_string());
        let runner = harness.runner();

        let outcome = runner
            .run_jobs(
                vec![test_job("web", &["mantis apply"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        assert!(outcome.all_applies_success);
        assert!(outcome.at_least_one_apply);

        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs[0].status, "SUCCESS");
        assert_eq!(runs[0].command, "mantis apply");

        let job_statuses = harness.backend.job_statuses.lock().unwrap();
        assert_eq!(
            *job_statuses,
            vec![("batch-1".to_string(), "succeeded".to_string())]
        );

        let statuses = harness.pr.statuses.lock().unwrap();
        assert!(statuses.contains(&("web/apply".to_string(), "pending".to_string())));
        assert!(statuses.contains(&("web/apply".to_string(), "success".to_string())));
        assert!(statuses.contains(&("mantis/aggregate-status".to_string(), "success".to_string())));

        let edited = harness.pr.edited_comments.lock().unwrap();
        assert_eq!(edited.len(), 1);
        assert_eq!(edited[0].0, "42");
        assert!(edited[0].1.contains("web"));
    }

    #[tokio::test]
    async fn test_jobs_execute_in_dependency_order() {
        let harness = Harness::new().with_project_dirs(&["a", "b", "c"]);
        let runner = harness.runner();

        let mut graph = DependencyGraph::new();
        graph.add_dependency("b", "a");
        graph.add_dependency("c", "a");

        let jobs = vec![
            test_job("c", &["mantis plan"]),
            test_job("b", &["mantis plan"]),
            test_job("a", &["mantis plan"]),
        ];

        runner.run_jobs(jobs, &graph).await.unwrap();

        let runs = harness.backend.runs.lock().unwrap();
        let order: Vec<&str> = runs.iter().map(|r| r.project.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_command_failure_skips_rest_of_job() {
        let mut harness = Harness::new().with_project_dirs(&["web"]);
        harness.iac = MockIacExecutor {
            fail_plan: true,
            ..Default::default()
        };
        let runner = harness.runner();

        let outcome = runner
            .run_jobs(
                vec![test_job("web", &["mantis plan", "mantis apply"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.all_applies_success);

        // the apply after the failed plan never ran
        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "FAILED");
        assert_eq!(runs[0].command, "mantis plan");
    }

    #[tokio::test]
    async fn test_lock_contention_continues_with_other_projects() {
        use crate::locking::LockProvider;

        let harness = Harness::new().with_project_dirs(&["app", "web"]);
        harness
            .locks
            .lock("acme/infra#app", 99)
            .await
            .unwrap();
        let runner = harness.runner();

        let jobs = vec![
            test_job("app", &["mantis plan"]),
            test_job("web", &["mantis plan"]),
        ];

        let outcome = runner.run_jobs(jobs, &DependencyGraph::new()).await.unwrap();
        assert!(!outcome.all_applies_success);

        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].project, "app");
        assert_eq!(runs[0].status, "FAILED");
        assert_eq!(runs[1].project, "web");
        assert_eq!(runs[1].status, "SUCCESS");

        assert!(harness.reporter.contains("#99"));
    }

    #[tokio::test]
    async fn test_unknown_command_aborts_batch() {
        let harness = Harness::new().with_project_dirs(&["web"]);
        let runner = harness.runner();

        let err = runner
            .run_jobs(
                vec![test_job("web", &["mantis frobnicate"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_apply_recheck_threads_plan_violations_into_access() {
        use crate::storage::PlanStore;

        let mut harness = Harness::new().with_project_dirs(&["web"]);
        harness.policy = Arc::new(MockPolicyChecker {
            deny_plan: true,
            plan_reasons: vec!["rule A".to_string()],
            ..Default::default()
        });
        let mut runner = harness.runner();
        runner.plan_uploader = Some(PlanUploader::new(
            "http://127.0.0.1:9/never-called",
            reqwest::Method::POST,
            reqwest::Client::new(),
        ));

        // a plan earlier in the PR left its JSON rendering in the store
        let store = LocalPlanStore::new(harness.plan_store_root());
        store
            .store_plan(
                br#"{"resource_changes": [{"change": {"actions": ["delete"]}}]}"#,
                "web",
                "1/acme-infra-web-1.tfplan.json",
            )
            .await
            .unwrap();

        runner
            .run_jobs(
                vec![test_job("web", &["mantis apply"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        let seen = harness.policy.access_violations_seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // before dispatch: no plan was run
        assert_eq!(seen[0], Vec::<String>::new());
        // before apply: the stored plan's violations
        assert_eq!(seen[1], vec!["rule A".to_string()]);
    }

    #[tokio::test]
    async fn test_drift_detection_notifies_on_changes() {
        let mut harness = Harness::new().with_project_dirs(&["web"]);
        harness.policy = Arc::new(MockPolicyChecker {
            drift_enabled: true,
            ..Default::default()
        });
        harness.iac = MockIacExecutor {
            non_empty_plan: true,
            plan_json: r#"{"resource_changes": [{"change": {"actions": ["update"]}}]}"#
                .to_string(),
            ..Default::default()
        };
        let notifier = Arc::new(MockDriftNotifier::default());
        let mut runner = harness.runner();
        runner.drift_notifier = Some(notifier.clone());

        runner
            .run_jobs(
                vec![test_job("web", &["mantis drift-detect"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        let notifications = notifier.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].0, "web");

        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs[0].status, "SUCCESS");
    }

    #[tokio::test]
    async fn test_drift_detection_skipped_when_disabled() {
        let harness = Harness::new().with_project_dirs(&["web"]);
        let runner = harness.runner();

        runner
            .run_jobs(
                vec![test_job("web", &["mantis drift-detect"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        let runs = harness.backend.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "SUCCESS");
        assert!(runs[0].output.contains("not enabled"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_command() {
        let harness = Harness::new().with_project_dirs(&["web"]);
        let runner = harness.runner();
        runner.cancelled.store(true, Ordering::SeqCst);

        let outcome = runner
            .run_jobs(
                vec![test_job("web", &["mantis plan"])],
                &DependencyGraph::new(),
            )
            .await
            .unwrap();

        assert!(harness.backend.runs.lock().unwrap().is_empty());
        assert!(!outcome.at_least_one_apply);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_pull_request_merges_when_green() {
        let pr = MockPrService::default();
        merge_pull_request(&pr, 5).await.unwrap();
        assert_eq!(*pr.merged_prs.lock().unwrap(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_pull_request_skips_already_merged() {
        let pr = MockPrService {
            merged: true,
            ..Default::default()
        };
        merge_pull_request(&pr, 5).await.unwrap();
        assert!(pr.merged_prs.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_pull_request_refuses_non_mergeable() {
        let pr = MockPrService {
            mergeable: false,
            ..Default::default()
        };
        assert!(merge_pull_request(&pr, 5).await.is_err());
    }
}
