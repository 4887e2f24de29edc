//! Per-project execution driver
//!
//! [`ProjectExecutor`] runs one project's workflow stages through the IaC
//! tool and keeps the plan store in sync. [`LockingExecutorWrapper`] guards
//! every state-mutating operation with the project lock.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use mantis_core::domain::job::{Job, Stage, StepAction};
use mantis_core::dto::plan::PlanSummary;

use crate::iac::{run_shell, IacError, IacExecutor};
use crate::locking::{LockAcquisition, LockError, PullRequestLock};
use crate::storage::{PlanStore, StoreError};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Iac(#[from] IacError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("project locked by another PR #{owner}")]
    LockContention { owner: u64 },

    #[error("no stored plan found for this project")]
    PlanNotFound,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Naming scheme for plan artifacts.
///
/// Plans are stored under the project's artifact name, namespaced by PR so
/// a later apply in the same PR finds the plan its plan command produced.
#[derive(Debug, Clone)]
pub struct PlanArtifactPaths {
    namespace: String,
    project_name: String,
    pr_number: Option<u64>,
}

impl PlanArtifactPaths {
    pub fn new(namespace: &str, project_name: &str, pr_number: Option<u64>) -> Self {
        Self {
            namespace: namespace.to_string(),
            project_name: project_name.to_string(),
            pr_number,
        }
    }

    pub fn artifact_name(&self) -> &str {
        &self.project_name
    }

    pub fn local_plan_file_name(&self) -> String {
        let stem = match self.pr_number {
            Some(pr) => format!("{}-{}-{}", self.namespace, self.project_name, pr),
            None => format!("{}-{}", self.namespace, self.project_name),
        };
        format!("{}.tfplan", stem.replace('/', "-"))
    }

    pub fn local_plan_json_file_name(&self) -> String {
        format!("{}.json", self.local_plan_file_name())
    }

    pub fn stored_plan_file_path(&self) -> String {
        match self.pr_number {
            Some(pr) => format!("{}/{}", pr, self.local_plan_file_name()),
            None => self.local_plan_file_name(),
        }
    }

    pub fn stored_plan_json_path(&self) -> String {
        format!("{}.json", self.stored_plan_file_path())
    }
}

/// Result of a plan invocation.
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub performed: bool,
    pub non_empty: bool,
    pub summary: Option<PlanSummary>,
    pub terraform_output: String,
    pub plan_json: String,
}

/// Result of an apply invocation.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub performed: bool,
    pub output: String,
}

/// Runs one project's stages through the IaC tool.
pub struct ProjectExecutor<'a> {
    pub job: &'a Job,
    pub project_path: PathBuf,
    pub iac: &'a dyn IacExecutor,
    pub plan_store: &'a dyn PlanStore,
    pub paths: PlanArtifactPaths,
    pub step_timeout: Duration,
}

impl ProjectExecutor<'_> {
    /// Runs the plan stage: init, plan with artifact capture, custom steps.
    ///
    /// The plan binary and its JSON rendering are persisted to the plan
    /// store so a later apply (and the apply-time policy re-check) can read
    /// them back.
    pub async fn plan(&self) -> Result<PlanOutcome, ExecError> {
        let env = self.job.command_env();
        let stage = self
            .job
            .plan_stage
            .clone()
            .unwrap_or_else(Stage::default_plan);

        let mut outcome = PlanOutcome::default();

        for step in &stage.steps {
            match step.action {
                StepAction::Init => {
                    self.iac.init(&step.extra_args, &self.job.init_env()).await?;
                }
                StepAction::Plan => {
                    let plan_file = self.project_path.join(self.paths.local_plan_file_name());
                    let (non_empty, output) =
                        self.iac.plan(&step.extra_args, &plan_file, &env).await?;
                    let plan_json = self.iac.show_plan_json(&plan_file, &env).await?;

                    let contents = std::fs::read(&plan_file)?;
                    self.plan_store
                        .store_plan(
                            &contents,
                            self.paths.artifact_name(),
                            &self.paths.stored_plan_file_path(),
                        )
                        .await?;
                    self.plan_store
                        .store_plan(
                            plan_json.as_bytes(),
                            self.paths.artifact_name(),
                            &self.paths.stored_plan_json_path(),
                        )
                        .await?;

                    outcome.summary = match PlanSummary::from_terraform_json(&plan_json) {
                        Ok(summary) => Some(summary),
                        Err(e) => {
                            warn!("Failed to summarize plan json: {}", e);
                            None
                        }
                    };
                    outcome.performed = true;
                    outcome.non_empty = non_empty;
                    outcome.terraform_output = output.stdout;
                    outcome.plan_json = plan_json;
                }
                StepAction::Run => {
                    if let Some(script) = &step.value {
                        run_shell(script, &self.project_path, &self.job.run_env(), self.step_timeout)
                            .await?;
                    }
                }
                StepAction::Apply => {
                    warn!("Ignoring apply step inside plan stage");
                }
            }
        }

        Ok(outcome)
    }

    /// Runs the apply stage, preferring the stored plan artifact when the
    /// store can produce one.
    pub async fn apply(&self) -> Result<ApplyOutcome, ExecError> {
        let env = self.job.command_env();
        let stage = self
            .job
            .apply_stage
            .clone()
            .unwrap_or_else(Stage::default_apply);

        let mut outcome = ApplyOutcome::default();

        for step in &stage.steps {
            match step.action {
                StepAction::Init => {
                    self.iac.init(&step.extra_args, &self.job.init_env()).await?;
                }
                StepAction::Apply => {
                    let plan_file = self.retrieve_stored_plan().await?;
                    let output = self
                        .iac
                        .apply(&step.extra_args, plan_file.as_deref(), &env)
                        .await?;
                    outcome.performed = true;
                    outcome.output = output.stdout;
                }
                StepAction::Run => {
                    if let Some(script) = &step.value {
                        run_shell(script, &self.project_path, &self.job.run_env(), self.step_timeout)
                            .await?;
                    }
                }
                StepAction::Plan => {
                    warn!("Ignoring plan step inside apply stage");
                }
            }
        }

        Ok(outcome)
    }

    pub async fn destroy(&self) -> Result<String, ExecError> {
        let env = self.job.command_env();
        let output = self.iac.destroy(&[], &env).await?;
        Ok(output.stdout)
    }

    /// The stored plan JSON for this PR, for the apply-time policy re-check.
    /// A store that cannot produce it fails the pre-check.
    pub async fn retrieve_plan_json(&self) -> Result<String, ExecError> {
        let local = self.project_path.join(self.paths.local_plan_json_file_name());
        let retrieved = self
            .plan_store
            .retrieve_plan(
                &local,
                self.paths.artifact_name(),
                &self.paths.stored_plan_json_path(),
            )
            .await?;

        match retrieved {
            Some(path) => Ok(std::fs::read_to_string(path)?),
            None => Err(ExecError::PlanNotFound),
        }
    }

    /// Deletes the stored plan artifacts (the `mantis unlock` cleanup).
    pub async fn delete_stored_plans(&self) -> Result<(), ExecError> {
        self.plan_store
            .delete_stored_plan(self.paths.artifact_name(), &self.paths.stored_plan_file_path())
            .await?;
        self.plan_store
            .delete_stored_plan(self.paths.artifact_name(), &self.paths.stored_plan_json_path())
            .await?;
        Ok(())
    }

    async fn retrieve_stored_plan(&self) -> Result<Option<PathBuf>, ExecError> {
        let local = self.project_path.join(self.paths.local_plan_file_name());
        match self
            .plan_store
            .retrieve_plan(
                &local,
                self.paths.artifact_name(),
                &self.paths.stored_plan_file_path(),
            )
            .await
        {
            Ok(found) => Ok(found),
            // Write-only stores cannot hand the plan back; apply re-plans
            Err(StoreError::Unsupported(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Runs state-mutating operations under the held project lock.
pub struct LockingExecutorWrapper<'a> {
    pub lock: PullRequestLock<'a>,
    pub executor: ProjectExecutor<'a>,
}

impl LockingExecutorWrapper<'_> {
    async fn acquire(&self) -> Result<(), ExecError> {
        match self.lock.acquire().await? {
            LockAcquisition::Acquired => Ok(()),
            LockAcquisition::Held { owner } => Err(ExecError::LockContention { owner }),
        }
    }

    pub async fn plan(&self) -> Result<PlanOutcome, ExecError> {
        self.acquire().await?;
        self.executor.plan().await
    }

    pub async fn apply(&self) -> Result<ApplyOutcome, ExecError> {
        self.acquire().await?;
        self.executor.apply().await
    }

    pub async fn destroy(&self) -> Result<String, ExecError> {
        self.acquire().await?;
        self.executor.destroy().await
    }

    pub async fn lock(&self) -> Result<(), ExecError> {
        self.acquire().await
    }

    pub async fn unlock(&self) -> Result<(), ExecError> {
        self.lock.force_release().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_naming_with_pr() {
        let paths = PlanArtifactPaths::new("acme/infra", "web", Some(7));
        assert_eq!(paths.artifact_name(), "web");
        assert_eq!(paths.local_plan_file_name(), "acme-infra-web-7.tfplan");
        assert_eq!(paths.stored_plan_file_path(), "7/acme-infra-web-7.tfplan");
        assert_eq!(
            paths.stored_plan_json_path(),
            "7/acme-infra-web-7.tfplan.json"
        );
    }

    #[test]
    fn test_artifact_naming_without_pr() {
        let paths = PlanArtifactPaths::new("acme/infra", "web", None);
        assert_eq!(paths.local_plan_file_name(), "acme-infra-web.tfplan");
        assert_eq!(paths.stored_plan_file_path(), "acme-infra-web.tfplan");
    }
}
