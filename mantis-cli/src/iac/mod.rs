//! IaC tool executors
//!
//! Shell-out wrappers around the supported IaC tools. Each variant exposes
//! the same capability surface (init / plan / apply / destroy / show) and
//! differs only in the program it invokes and whether it honors workspaces.

mod command;
mod terraform;
mod terragrunt;

pub use command::{run_program, run_shell, CommandOutput};
pub use terraform::{OpenTofu, Terraform};
pub use terragrunt::Terragrunt;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use mantis_core::domain::job::IacEngine;

/// Errors from an IaC tool invocation.
#[derive(Debug, Error)]
pub enum IacError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("{program} exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },
}

/// Capability surface of an IaC tool.
///
/// `plan` returns `true` iff the plan contains resource changes. All
/// invocations run in the executor's working directory with the supplied
/// environment layered over the process environment.
#[async_trait]
pub trait IacExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn init(
        &self,
        extra_args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError>;

    async fn plan(
        &self,
        extra_args: &[String],
        plan_artifact: &Path,
        env: &HashMap<String, String>,
    ) -> Result<(bool, CommandOutput), IacError>;

    async fn apply(
        &self,
        extra_args: &[String],
        plan_artifact: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError>;

    async fn destroy(
        &self,
        extra_args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError>;

    async fn show_plan_json(
        &self,
        plan_artifact: &Path,
        env: &HashMap<String, String>,
    ) -> Result<String, IacError>;
}

/// Builds the executor variant for a job's engine.
pub fn for_engine(
    engine: IacEngine,
    working_dir: PathBuf,
    workspace: String,
    timeout: Duration,
) -> Box<dyn IacExecutor> {
    match engine {
        IacEngine::Terraform => Box::new(Terraform::new(working_dir, workspace, timeout)),
        IacEngine::OpenTofu => Box::new(OpenTofu::new(working_dir, workspace, timeout)),
        IacEngine::Terragrunt => Box::new(Terragrunt::new(working_dir, timeout)),
    }
}
