//! Terraform and OpenTofu executors
//!
//! Both tools share a CLI surface; the only differences are the program name
//! and branding. Both honor workspaces: a non-default workspace is selected
//! (or created) before every operation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::command::{run_program, CommandOutput};
use super::{IacError, IacExecutor};

/// Terraform CLI executor.
pub struct Terraform {
    working_dir: PathBuf,
    workspace: String,
    timeout: Duration,
}

impl Terraform {
    pub fn new(working_dir: PathBuf, workspace: String, timeout: Duration) -> Self {
        Self {
            working_dir,
            workspace,
            timeout,
        }
    }
}

/// OpenTofu CLI executor.
pub struct OpenTofu {
    working_dir: PathBuf,
    workspace: String,
    timeout: Duration,
}

impl OpenTofu {
    pub fn new(working_dir: PathBuf, workspace: String, timeout: Duration) -> Self {
        Self {
            working_dir,
            workspace,
            timeout,
        }
    }
}

#[async_trait]
impl IacExecutor for Terraform {
    fn name(&self) -> &'static str {
        "terraform"
    }

    async fn init(
        &self,
        extra_args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        init("terraform", &self.working_dir, extra_args, env, self.timeout).await
    }

    async fn plan(
        &self,
        extra_args: &[String],
        plan_artifact: &Path,
        env: &HashMap<String, String>,
    ) -> Result<(bool, CommandOutput), IacError> {
        select_workspace("terraform", &self.working_dir, &self.workspace, env, self.timeout)
            .await?;
        plan("terraform", &self.working_dir, extra_args, plan_artifact, env, self.timeout).await
    }

    async fn apply(
        &self,
        extra_args: &[String],
        plan_artifact: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        select_workspace("terraform", &self.working_dir, &self.workspace, env, self.timeout)
            .await?;
        apply("terraform", &self.working_dir, extra_args, plan_artifact, env, self.timeout).await
    }

    async fn destroy(
        &self,
        extra_args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        select_workspace("terraform", &self.working_dir, &self.workspace, env, self.timeout)
            .await?;
        destroy("terraform", &self.working_dir, extra_args, env, self.timeout).await
    }

    async fn show_plan_json(
        &self,
        plan_artifact: &Path,
        env: &HashMap<String, String>,
    ) -> Result<String, IacError> {
        show_plan_json("terraform", &self.working_dir, plan_artifact, env, self.timeout).await
    }
}

#[async_trait]
impl IacExecutor for OpenTofu {
    fn name(&self) -> &'static str {
        "tofu"
    }

    async fn init(
        &self,
        extra_args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        init("tofu", &self.working_dir, extra_args, env, self.timeout).await
    }

    async fn plan(
        &self,
        extra_args: &[String],
        plan_artifact: &Path,
        env: &HashMap<String, String>,
    ) -> Result<(bool, CommandOutput), IacError> {
        select_workspace("tofu", &self.working_dir, &self.workspace, env, self.timeout).await?;
        plan("tofu", &self.working_dir, extra_args, plan_artifact, env, self.timeout).await
    }

    async fn apply(
        &self,
        extra_args: &[String],
        plan_artifact: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        select_workspace("tofu", &self.working_dir, &self.workspace, env, self.timeout).await?;
        apply("tofu", &self.working_dir, extra_args, plan_artifact, env, self.timeout).await
    }

    async fn destroy(
        &self,
        extra_args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, IacError> {
        select_workspace("tofu", &self.working_dir, &self.workspace, env, self.timeout).await?;
        destroy("tofu", &self.working_dir, extra_args, env, self.timeout).await
    }

    async fn show_plan_json(
        &self,
        plan_artifact: &Path,
        env: &HashMap<String, String>,
    ) -> Result<String, IacError> {
        show_plan_json("tofu", &self.working_dir, plan_artifact, env, self.timeout).await
    }
}

// =============================================================================
// Shared terraform-family invocations
// =============================================================================

/// Selects the workspace, creating it when selection fails. The default
/// workspace always exists and is skipped.
async fn select_workspace(
    program: &str,
    working_dir: &Path,
    workspace: &str,
    env: &HashMap<String, String>,
    timeout: Duration,
) -> Result<(), IacError> {
    if workspace == "default" {
        return Ok(());
    }

    let select = vec![
        "workspace".to_string(),
        "select".to_string(),
        workspace.to_string(),
    ];
    let output = run_program(program, &select, working_dir, env, timeout).await?;
    if output.success() {
        return Ok(());
    }

    let create = vec![
        "workspace".to_string(),
        "new".to_string(),
        workspace.to_string(),
    ];
    let output = run_program(program, &create, working_dir, env, timeout).await?;
    if !output.success() {
        return Err(IacError::Failed {
            program: program.to_string(),
            code: output.exit_code,
            stderr: output.stderr,
        });
    }

    Ok(())
}

pub(super) async fn init(
    program: &str,
    working_dir: &Path,
    extra_args: &[String],
    env: &HashMap<String, String>,
    timeout: Duration,
) -> Result<CommandOutput, IacError> {
    let mut args = vec!["init".to_string(), "-input=false".to_string()];
    args.extend_from_slice(extra_args);

    let output = run_program(program, &args, working_dir, env, timeout).await?;
    if !output.success() {
        return Err(IacError::Failed {
            program: program.to_string(),
            code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

pub(super) async fn plan(
    program: &str,
    working_dir: &Path,
    extra_args: &[String],
    plan_artifact: &Path,
    env: &HashMap<String, String>,
    timeout: Duration,
) -> Result<(bool, CommandOutput), IacError> {
    let mut args = vec![
        "plan".to_string(),
        "-input=false".to_string(),
        "-detailed-exitcode".to_string(),
        format!("-out={}", plan_artifact.display()),
    ];
    args.extend_from_slice(extra_args);

    let output = run_program(program, &args, working_dir, env, timeout).await?;
    // -detailed-exitcode: 0 = empty plan, 2 = changes present
    match output.exit_code {
        0 => Ok((false, output)),
        2 => Ok((true, output)),
        code => Err(IacError::Failed {
            program: program.to_string(),
            code,
            stderr: output.stderr,
        }),
    }
}

pub(super) async fn apply(
    program: &str,
    working_dir: &Path,
    extra_args: &[String],
    plan_artifact: Option<&Path>,
    env: &HashMap<String, String>,
    timeout: Duration,
) -> Result<CommandOutput, IacError> {
    let mut args = vec![
        "apply".to_string(),
        "-input=false".to_string(),
        "-auto-approve".to_string(),
    ];
    args.extend_from_slice(extra_args);
    if let Some(plan_file) = plan_artifact {
        args.push(plan_file.display().to_string());
    }

    let output = run_program(program, &args, working_dir, env, timeout).await?;
    if !output.success() {
        return Err(IacError::Failed {
            program: program.to_string(),
            code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

pub(super) async fn destroy(
    program: &str,
    working_dir: &Path,
    extra_args: &[String],
    env: &HashMap<String, String>,
    timeout: Duration,
) -> Result<CommandOutput, IacError> {
    let mut args = vec![
        "destroy".to_string(),
        "-input=false".to_string(),
        "-auto-approve".to_string(),
    ];
    args.extend_from_slice(extra_args);

    let output = run_program(program, &args, working_dir, env, timeout).await?;
    if !output.success() {
        return Err(IacError::Failed {
            program: program.to_string(),
            code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

pub(super) async fn show_plan_json(
    program: &str,
    working_dir: &Path,
    plan_artifact: &Path,
    env: &HashMap<String, String>,
    timeout: Duration,
) -> Result<String, IacError> {
    let args = vec![
        "show".to_string(),
        "-json".to_string(),
        plan_artifact.display().to_string(),
    ];

    let output = run_program(program, &args, working_dir, env, timeout).await?;
    if !output.success() {
        return Err(IacError::Failed {
            program: program.to_string(),
            code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(output.stdout)
}
