//! Job domain types
//!
//! A job is the atomic unit of work in a batch: "run these commands against
//! this project in this pull-request context". Jobs are produced by the
//! configuration parser and consumed by the pipeline; they are immutable
//! once created.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The IaC tool a project is driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IacEngine {
    Terraform,
    #[serde(rename = "opentofu")]
    OpenTofu,
    Terragrunt,
}

impl std::fmt::Display for IacEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IacEngine::Terraform => write!(f, "terraform"),
            IacEngine::OpenTofu => write!(f, "opentofu"),
            IacEngine::Terragrunt => write!(f, "terragrunt"),
        }
    }
}

/// Commands to perform against a single project within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Source-control namespace, `{org}/{repo}`
    pub namespace: String,
    pub project_name: String,
    pub project_dir: String,
    /// Named state partition (Terraform/OpenTofu workspace)
    #[serde(default = "default_workspace")]
    pub workspace: String,
    pub engine: IacEngine,
    /// Ordered command sequence, e.g. `["mantis plan"]`
    pub commands: Vec<String>,
    pub pull_request_number: Option<u64>,
    pub event_name: String,
    pub requested_by: String,
    /// Custom workflow steps for plan; `None` means the default init+plan
    #[serde(default)]
    pub plan_stage: Option<Stage>,
    /// Custom workflow steps for apply; `None` means the default init+apply
    #[serde(default)]
    pub apply_stage: Option<Stage>,
    #[serde(default)]
    pub state_env_vars: HashMap<String, String>,
    #[serde(default)]
    pub run_env_vars: HashMap<String, String>,
    #[serde(default)]
    pub command_env_vars: HashMap<String, String>,
}

fn default_workspace() -> String {
    "default".to_string()
}

impl Job {
    /// Splits the namespace into `(organisation, repository)`.
    ///
    /// Namespaces are validated at parse time; a malformed namespace yields
    /// the whole string as the organisation and an empty repository.
    pub fn scm_org_and_repo(&self) -> (&str, &str) {
        match self.namespace.split_once('/') {
            Some((org, repo)) => (org, repo),
            None => (self.namespace.as_str(), ""),
        }
    }

    /// Repository identifier used when reporting to the backend
    /// (`{org}-{repo}`, safe for use in a URL path segment).
    pub fn backend_repo_name(&self) -> String {
        self.namespace.replace('/', "-")
    }

    /// Environment for state/backend initialisation steps.
    pub fn init_env(&self) -> HashMap<String, String> {
        self.state_env_vars.clone()
    }

    /// Environment for plan/apply/destroy invocations: command vars layered
    /// over state vars.
    pub fn command_env(&self) -> HashMap<String, String> {
        let mut env = self.state_env_vars.clone();
        env.extend(self.command_env_vars.clone());
        env
    }

    /// Environment for custom `run` workflow steps.
    pub fn run_env(&self) -> HashMap<String, String> {
        let mut env = self.state_env_vars.clone();
        env.extend(self.run_env_vars.clone());
        env
    }
}

/// A workflow stage: an ordered list of steps driving one IaC operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub steps: Vec<Step>,
}

impl Stage {
    /// The implicit plan stage used when the job does not override it.
    pub fn default_plan() -> Self {
        Stage {
            steps: vec![Step::action(StepAction::Init), Step::action(StepAction::Plan)],
        }
    }

    /// The implicit apply stage used when the job does not override it.
    pub fn default_apply() -> Self {
        Stage {
            steps: vec![Step::action(StepAction::Init), Step::action(StepAction::Apply)],
        }
    }
}

/// A single workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: StepAction,
    /// Extra arguments appended to the IaC invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Shell command for `run` steps
    #[serde(default)]
    pub value: Option<String>,
}

impl Step {
    pub fn action(action: StepAction) -> Self {
        Step {
            action,
            extra_args: Vec::new(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Init,
    Plan,
    Apply,
    Run,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_namespace(namespace: &str) -> Job {
        Job {
            namespace: namespace.to_string(),
            project_name: "web".to_string(),
            project_dir: "web".to_string(),
            workspace: "default".to_string(),
            engine: IacEngine::Terraform,
            commands: vec!["mantis plan".to_string()],
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

    #[test]
    fn test_scm_org_and_repo() {
        let job = job_with_namespace("acme/infra");
        assert_eq!(job.scm_org_and_repo(), ("acme", "infra"));
        assert_eq!(job.backend_repo_name(), "acme-infra");
    }

    #[test]
    fn test_command_env_layers_over_state_env() {
        let mut job = job_with_namespace("acme/infra");
        job.state_env_vars
            .insert("TF_VAR_region".to_string(), "eu-west-1".to_string());
        job.command_env_vars
            .insert("TF_VAR_region".to_string(), "us-east-1".to_string());

        let env = job.command_env();
        assert_eq!(env.get("TF_VAR_region"), Some(&"us-east-1".to_string()));
    }

    #[test]
    fn test_default_stages() {
        let plan = Stage::default_plan();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].action, StepAction::Init);
        assert_eq!(plan.steps[1].action, StepAction::Plan);

        let apply = Stage::default_apply();
        assert_eq!(apply.steps[1].action, StepAction::Apply);
    }
}
