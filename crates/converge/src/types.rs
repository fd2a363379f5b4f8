//! Core types for step execution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default per-command time budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from one command run against a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Exit code, `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn new(
        exit_code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration,
        }
    }

    /// Outcome of a command that exited 0 with no output
    pub fn ok() -> Self {
        Self::new(Some(0), "", "", Duration::ZERO)
    }

    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Append another command's output (used for multi-command apply bodies)
    pub fn merge(&mut self, next: Self) {
        self.stdout.push_str(&next.stdout);
        self.stderr.push_str(&next.stderr);
        self.duration += next.duration;
        self.exit_code = next.exit_code;
    }

    /// Last `lines` lines of stderr, for compact diagnostics
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.trim_end().lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }

    /// Human-readable exit status
    pub fn status_text(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// What to do with the rest of the run once a step fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort immediately; every step not yet run is marked not-attempted
    #[default]
    HaltOnFailure,
    /// Keep going with every step whose dependencies did not fail
    ContinueOnFailure,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HaltOnFailure => write!(f, "halt-on-failure"),
            Self::ContinueOnFailure => write!(f, "continue-on-failure"),
        }
    }
}

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Aborted,
}

impl RunState {
    /// Whether the run has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Allowed transitions: Pending -> Running -> {Completed, Aborted}.
    /// Pending -> Aborted covers a target that is unreachable before the first step.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Aborted)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Aborted)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Options for a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Failure handling policy
    pub policy: FailurePolicy,
    /// Number of steps that may execute at once (1 = strictly sequential)
    pub concurrency: usize,
    /// Default time budget for each command; steps may override it
    pub timeout: Duration,
    /// Check the target is reachable before the first step
    pub probe: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::default(),
            concurrency: 1,
            timeout: DEFAULT_TIMEOUT,
            probe: true,
        }
    }
}

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
