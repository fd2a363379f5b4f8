//! Error types for step execution and graph validation.
//!
//! Errors are split by when they can happen:
//! - [`GraphError`] is raised before a run starts and is the only error that
//!   escapes [`crate::Orchestrator::run`].
//! - [`ExecError`] comes from a [`crate::CommandRunner`] and is contained in
//!   the step's [`crate::ExecutionResult`].
//! - [`ReportError`] guards the append-only report.

use crate::report::FailureKind;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while executing a command against a target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    /// The target could not be reached (ssh failed to connect, auth refused, ...)
    #[error("cannot reach {target}: {message}")]
    Connection {
        /// Host identity of the unreachable target
        target: String,
        /// What the transport reported
        message: String,
    },

    /// The command exceeded its time budget and was killed
    #[error("command timed out after {}s: {command}", .timeout.as_secs_f64())]
    Timeout {
        /// The command that was running
        command: String,
        /// The budget it exceeded
        timeout: Duration,
    },

    /// The command could not be started at all
    #[error("failed to start `{command}`: {message}")]
    Spawn {
        /// The command that failed to start
        command: String,
        /// Why it failed
        message: String,
    },
}

impl ExecError {
    /// Report category for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection { .. } => FailureKind::Connection,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Spawn { .. } => FailureKind::Command,
        }
    }

    /// Whether the target itself is unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Whether retrying the same command could plausibly succeed.
    ///
    /// A command that cannot even be spawned (missing shell, bad binary path)
    /// fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Spawn { .. })
    }
}

/// Errors in the step graph. Raised before any step runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Steps depend on each other in a loop
    #[error("dependency cycle between steps: {}", .ids.join(", "))]
    Cycle {
        /// Steps on (or between) cycles, in insertion order
        ids: Vec<String>,
    },

    /// Two steps share an identifier
    #[error("duplicate step identifier: {0}")]
    DuplicateStep(String),

    /// A step names a dependency that was never added
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        /// The dependent step
        step: String,
        /// The missing dependency
        dependency: String,
    },

    /// A step lists itself as a dependency
    #[error("step '{0}' cannot depend on itself")]
    SelfDependency(String),
}

/// Errors raised by the report builder.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    /// A result for this step was already recorded in this run
    #[error("step '{0}' already has a recorded result")]
    AlreadyRecorded(String),

    /// The step is not part of this run
    #[error("step '{0}' is not part of this run")]
    UnknownStep(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_kinds() {
        let conn = ExecError::Connection {
            target: "deploy@web1".into(),
            message: "Connection refused".into(),
        };
        assert_eq!(conn.kind(), FailureKind::Connection);
        assert!(conn.is_connection());
        assert!(conn.is_retryable());

        let spawn = ExecError::Spawn {
            command: "sh".into(),
            message: "No such file or directory".into(),
        };
        assert_eq!(spawn.kind(), FailureKind::Command);
        assert!(!spawn.is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let err = ExecError::Timeout {
            command: "sleep 10".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "command timed out after 5s: sleep 10");
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[test]
    fn test_cycle_message_names_steps() {
        let err = GraphError::Cycle {
            ids: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle between steps: a, b");
    }
}
