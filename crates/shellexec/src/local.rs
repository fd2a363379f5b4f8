//! Runner for the machine stagehand itself runs on.

use crate::error::ProcessError;
use crate::process;
use converge::{CommandOutcome, CommandRunner, ExecError, Target};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Runs commands through the local `sh`.
#[derive(Debug)]
pub struct LocalRunner {
    target: Target,
    shell: PathBuf,
}

impl LocalRunner {
    /// Create a runner using the first `sh` on `PATH`.
    pub fn new() -> Self {
        let shell = which::which("sh").unwrap_or_else(|_| PathBuf::from("/bin/sh"));
        Self::with_shell(shell)
    }

    /// Create a runner using a specific shell binary.
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::Local,
            shell: shell.into(),
        }
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for LocalRunner {
    fn target(&self) -> &Target {
        &self.target
    }

    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutcome, ExecError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);

        process::run(cmd, timeout).map_err(|e| match e {
            ProcessError::TimedOut(timeout) => ExecError::Timeout {
                command: command.to_string(),
                timeout,
            },
            other => ExecError::Spawn {
                command: command.to_string(),
                message: other.to_string(),
            },
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use converge::{DependencyGraph, NoProgress, Orchestrator, RunOptions, ShellStep, StepOutcome};

    #[test]
    fn test_runs_through_shell() {
        let runner = LocalRunner::new();
        let out = runner
            .run("printf '%s' \"$((2 + 3))\"", Duration::from_secs(5))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "5");
    }

    #[test]
    fn test_non_zero_exit_is_not_an_error() {
        let runner = LocalRunner::new();
        let out = runner.run("exit 7", Duration::from_secs(5)).unwrap();
        assert_eq!(out.exit_code, Some(7));
    }

    #[test]
    fn test_timeout() {
        let runner = LocalRunner::new();
        let err = runner.run("sleep 5", Duration::from_millis(200)).unwrap_err();
        assert_eq!(
            err,
            ExecError::Timeout {
                command: "sleep 5".into(),
                timeout: Duration::from_millis(200),
            }
        );
    }

    #[test]
    fn test_missing_shell_is_spawn_error() {
        let runner = LocalRunner::with_shell("/nonexistent/sh");
        let err = runner.run("true", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn test_idempotent_run_against_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("installed");
        let marker = marker.display();

        let mut graph = DependencyGraph::new();
        graph
            .add_step(Box::new(
                ShellStep::new("marker")
                    .with_precondition(format!("test -f {marker}"))
                    .with_apply(format!("touch {marker}")),
            ))
            .unwrap();
        let orch = Orchestrator::new(graph, RunOptions::default());
        let runner = LocalRunner::new();

        let first = orch.run(&runner, &mut NoProgress).unwrap();
        assert_eq!(first.results[0].outcome, StepOutcome::Applied);

        let second = orch.run(&runner, &mut NoProgress).unwrap();
        assert_eq!(second.results[0].outcome, StepOutcome::Skipped);
    }

    #[test]
    fn test_step_timeout_is_reported_as_timeout() {
        let mut graph = DependencyGraph::new();
        graph
            .add_step(Box::new(
                ShellStep::new("slow")
                    .with_apply("sleep 5")
                    .with_timeout(Some(Duration::from_millis(200))),
            ))
            .unwrap();
        let report = Orchestrator::new(graph, RunOptions::default())
            .run(&LocalRunner::new(), &mut NoProgress)
            .unwrap();
        assert_eq!(
            report.results[0].outcome.failure_kind(),
            Some(converge::FailureKind::Timeout)
        );
        assert!(!report.is_success());
    }
}
