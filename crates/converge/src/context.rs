//! Runner and progress traits, and the context passed to steps
//!
//! These traits keep the crate free of any particular transport or UI:
//! the binary supplies an SSH or local [`CommandRunner`] and a terminal
//! [`ProgressCallback`].

use crate::error::ExecError;
use crate::report::{ExecutionResult, RunReport};
use crate::target::Target;
use crate::types::CommandOutcome;
use std::time::Duration;

/// Executes shell commands against one target
///
/// Implementations must not retry on their own: re-running a command that
/// is not idempotent could double-apply it. Retries belong to the step.
pub trait CommandRunner: Send + Sync {
    /// The target this runner talks to
    fn target(&self) -> &Target;

    /// Run a command, capturing its output, killing it once `timeout` elapses
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutcome, ExecError>;

    /// Check the target is reachable
    ///
    /// Any completed command counts as reachable, whatever its exit code.
    fn probe(&self, timeout: Duration) -> Result<(), ExecError> {
        self.run("true", timeout).map(|_| ())
    }
}

/// Progress callback for a run
///
/// Implement this trait to receive progress updates during execution.
/// In a concurrent run, calls are serialized but may come from worker threads.
pub trait ProgressCallback: Send {
    /// Called once the graph is validated, before the first step
    fn on_run_start(&mut self, total: usize);

    /// Called when a step is about to be evaluated
    fn on_step_start(&mut self, id: &str, label: &str);

    /// Called when a step has a terminal outcome (including not-attempted)
    fn on_step_complete(&mut self, result: &ExecutionResult);

    /// Called once with the finalized report
    fn on_run_complete(&mut self, report: &RunReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_step_start(&mut self, _id: &str, _label: &str) {}
    fn on_step_complete(&mut self, _result: &ExecutionResult) {}
    fn on_run_complete(&mut self, _report: &RunReport) {}
}

/// Context passed to a step's precondition, apply and verify
pub struct StepContext<'a> {
    /// Runner for the run's target
    pub runner: &'a dyn CommandRunner,
    /// Time budget for each command this step runs
    pub timeout: Duration,
}

impl<'a> StepContext<'a> {
    pub fn new(runner: &'a dyn CommandRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Run a command with this step's timeout
    pub fn run(&self, command: &str) -> Result<CommandOutcome, ExecError> {
        log::debug!("[{}] $ {}", self.runner.target(), command);
        self.runner.run(command, self.timeout)
    }

    /// Run a predicate command: true when it exits 0
    pub fn check(&self, command: &str) -> Result<bool, ExecError> {
        Ok(self.run(command)?.success())
    }
}
