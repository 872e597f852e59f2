//! Command executor: runs one proposed command in a fresh shell.
//!
//! The [`CommandExecutor`] trait decouples the agent loop from process spawning.
//! Tests use scripted executors that return canned observations.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::ExecOutput;
use crate::io::config::ShellConfig;
use crate::io::process::run_with_timeout;

/// Runs a shell command and reports what it printed.
///
/// Implementations never fail: anything that goes wrong is described in the
/// returned text so the model can react to it on the next turn.
pub trait CommandExecutor {
    fn execute(&self, command: &str) -> ExecOutput;
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for &T {
    fn execute(&self, command: &str) -> ExecOutput {
        (**self).execute(command)
    }
}

/// Executor that hands each command to `sh -c` (or another configured shell).
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    /// Shell argv prefix; the script is appended as the final argument.
    shell: Vec<String>,
    workdir: Option<PathBuf>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellExecutor {
    pub fn new(shell: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            shell,
            workdir: None,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &ShellConfig) -> Self {
        Self {
            shell: cfg.command.clone(),
            workdir: cfg.workdir.clone(),
            timeout: Duration::from_secs(cfg.command_timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    /// Run every command inside `dir`.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    fn run(&self, command: &str) -> Result<ExecOutput> {
        let (program, args) = self
            .shell
            .split_first()
            .ok_or_else(|| anyhow!("shell command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(merged_script(command));
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = run_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)?;

        let mut text = output.stdout_text("command");
        // Stderr is already redirected into stdout; anything here came from the shell
        // itself before the redirect took effect.
        if !output.stderr.is_empty() {
            text.push_str(&output.stderr_text("command"));
        }
        if output.timed_out {
            text.push_str(&format!("\n[command timed out after {:?}]\n", self.timeout));
        }

        Ok(ExecOutput {
            text,
            success: output.succeeded(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }
}

impl CommandExecutor for ShellExecutor {
    #[instrument(skip_all, fields(command = %command))]
    fn execute(&self, command: &str) -> ExecOutput {
        match self.run(command) {
            Ok(output) => {
                if !output.success {
                    debug!(exit_code = ?output.exit_code, timed_out = output.timed_out, "command failed");
                }
                output
            }
            Err(err) => {
                warn!(err = %err, "could not run command");
                ExecOutput::failed(format!("failed to run command: {err:#}"), None)
            }
        }
    }
}

/// Prefix the script so the shell merges stderr into stdout for every statement.
fn merged_script(command: &str) -> String {
    format!("exec 2>&1\n{command}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> ShellExecutor {
        ShellExecutor::new(
            vec!["sh".to_string(), "-c".to_string()],
            Duration::from_secs(10),
            10_000,
        )
    }

    #[test]
    fn returns_stdout_on_success() {
        let output = executor().execute("echo hello");
        assert_eq!(output, ExecOutput::ok("hello\n"));
    }

    #[test]
    fn merges_stderr_in_order() {
        let output = executor().execute("echo one; echo two >&2; echo three");
        assert_eq!(output.text, "one\ntwo\nthree\n");
    }

    #[test]
    fn failure_is_reported_as_text() {
        let output = executor().execute("definitely-not-a-command-xyz");
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(127));
        assert!(output.text.contains("not found"), "got {:?}", output.text);
    }

    #[test]
    fn empty_output_is_empty_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let output = executor()
            .with_workdir(temp.path())
            .execute("echo 'Hello world.' > test.txt");
        assert_eq!(output, ExecOutput::ok(""));
        let written = std::fs::read_to_string(temp.path().join("test.txt")).expect("read");
        assert_eq!(written, "Hello world.\n");
    }

    #[test]
    fn shell_state_does_not_persist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let exec = executor().with_workdir(temp.path());
        exec.execute("export SHELLPILOT_PROBE=1; mkdir sub; cd sub");
        let output = exec.execute("echo \"${SHELLPILOT_PROBE:-unset}\"; basename \"$(pwd -P)\"");
        let expected_dir = temp
            .path()
            .canonicalize()
            .expect("canonicalize")
            .file_name()
            .expect("file name")
            .to_string_lossy()
            .into_owned();
        assert_eq!(output.text, format!("unset\n{expected_dir}\n"));
    }

    #[test]
    fn timeout_is_reported_as_text() {
        let exec = ShellExecutor::new(
            vec!["sh".to_string(), "-c".to_string()],
            Duration::from_millis(200),
            1000,
        );
        let started = std::time::Instant::now();
        let output = exec.execute("sleep 6; echo after");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(output.timed_out);
        assert!(!output.success);
        assert_eq!(output.text, "\n[command timed out after 200ms]\n");
    }

    #[test]
    fn spawn_failure_is_reported_as_text() {
        let exec = ShellExecutor::new(
            vec!["/no/such/shell".to_string()],
            Duration::from_secs(1),
            1000,
        );
        let output = exec.execute("ls");
        assert!(!output.success);
        assert_eq!(output.exit_code, None);
        assert!(output.text.starts_with("failed to run command:"));
    }
}
