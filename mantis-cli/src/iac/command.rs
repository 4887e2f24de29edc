//! Child-process execution
//!
//! Runs IaC tools and custom workflow steps with a bounded timeout. The
//! child is killed when the timeout elapses (`kill_on_drop`), so a hung
//! tool cannot wedge the batch.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::IacError;

/// Captured output of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs `program` with `args` in `working_dir`.
///
/// The supplied environment is layered over the inherited process
/// environment (credentials are shelled in this way). A non-zero exit is
/// NOT an error here; callers interpret exit codes (terraform's
/// `-detailed-exitcode` uses 2 for a non-empty plan).
pub async fn run_program(
    program: &str,
    args: &[String],
    working_dir: &Path,
    env: &HashMap<String, String>,
    timeout: Duration,
) -> Result<CommandOutput, IacError> {
    debug!("Running {} {:?} in {}", program, args, working_dir.display());

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result.map_err(|source| IacError::Spawn {
            program: program.to_string(),
            source,
        })?,
        Err(_) => {
            return Err(IacError::Timeout {
                program: program.to_string(),
                seconds: timeout.as_secs(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    if !output.status.success() {
        debug!(
            "{} exited with code {}: stderr='{}'",
            program,
            exit_code,
            stderr.trim()
        );
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Runs a custom workflow step through the shell.
pub async fn run_shell(
    script: &str,
    working_dir: &Path,
    env: &HashMap<String, String>,
    timeout: Duration,
) -> Result<CommandOutput, IacError> {
    let args = vec!["-c".to_string(), script.to_string()];
    let output = run_program("sh", &args, working_dir, env, timeout).await?;

    if !output.success() {
        return Err(IacError::Failed {
            program: "sh".to_string(),
            code: output.exit_code,
            stderr: output.stderr,
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_program_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_program(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            dir.path(),
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_program_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_program(
            "sh",
            &["-c".to_string(), "exit 2".to_string()],
            dir.path(),
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(output.exit_code, 2);
    }

    #[tokio::test]
    async fn test_run_program_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_program(
            "sh",
            &["-c".to_string(), "sleep 10".to_string()],
            dir.path(),
            &HashMap::new(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IacError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_shell_fails_on_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_shell("false", dir.path(), &HashMap::new(), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, IacError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_run_shell_sees_extra_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("MANTIS_TEST_VAR".to_string(), "42".to_string());

        let output = run_shell(
            "echo $MANTIS_TEST_VAR",
            dir.path(),
            &env,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(output.stdout.trim(), "42");
    }
}
