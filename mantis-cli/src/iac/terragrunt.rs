//! Terragrunt executor
//!
//! Terragrunt wraps the terraform CLI surface but has no workspace concept;
//! state partitioning comes from its directory layout instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::command::CommandOutput;
use super::{terraform, IacError, IacExecutor};

pub struct Terragrunt {
    working_dir: PathBuf,
    timeout: Duration,
}

impl Terragrunt {
    pub fn new(working_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            working_dir,
            timeout,
        }
    }
}

#[async_trait]
impl IacExecutor for Terragrunt {
    fn name(&self) -> &'static str {
        "terragrunt"
    }

    async fn init(
        &self,
        extra_args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        terraform::init("terragrunt", &self.working_dir, extra_args, env, self.timeout).await
    }

    async fn plan(
        &self,
        extra_args: &[String],
        plan_artifact: &Path,
        env: &HashMap<String, String>,
    ) -> Result<(bool, CommandOutput), IacError> {
        terraform::plan(
            "terragrunt",
            &self.working_dir,
            extra_args,
            plan_artifact,
            env,
            self.timeout,
        )
        .await
    }

    async fn apply(
        &self,
        extra_args: &[String],
        plan_artifact: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        terraform::apply(
            "terragrunt",
            &self.working_dir,
            extra_args,
            plan_artifact,
            env,
            self.timeout,
        )
        .await
    }

    async fn destroy(
        &self,
        extra_args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        terraform::destroy("terragrunt", &self.working_dir, extra_args, env, self.timeout).await
    }

    async fn show_plan_json(
        &self,
        plan_artifact: &Path,
        env: &HashMap<String, String>,
    ) -> Result<String, IacError> {
        terraform::show_plan_json("terragrunt", &self.working_dir, plan_artifact, env, self.timeout)
            .await
    }
}
