//! Run reports: per-step results, summary counts, and sinks

use crate::error::ReportError;
use crate::target::Target;
use crate::types::{CommandOutcome, FailurePolicy, RunState, duration_ms};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Runs started by this process so far; keeps ids unique within a millisecond
static RUN_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Why a step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Target unreachable
    Connection,
    /// A command exceeded its time budget
    Timeout,
    /// A command exited non-zero or could not be started
    Command,
    /// Apply succeeded but verify returned false; target state is ambiguous
    Verification,
}

/// Terminal outcome of one step in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StepOutcome {
    /// Precondition already held; apply was not called
    Skipped,
    /// Apply ran and verify passed
    Applied,
    /// Apply errored, exited non-zero, or verify failed
    Failed { kind: FailureKind, message: String },
    /// Never evaluated: the run aborted or a dependency did not succeed
    NotAttempted { reason: String },
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Skipped or applied: dependents may proceed
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Applied)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Short lowercase label (`skipped`, `applied`, `failed`, `not-attempted`)
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Applied => "applied",
            Self::Failed { .. } => "failed",
            Self::NotAttempted { .. } => "not-attempted",
        }
    }
}

/// Recorded result of one step. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step_id: String,
    pub label: String,
    pub outcome: StepOutcome,
    /// Output of the apply commands (or of the failing predicate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CommandOutcome>,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Number of apply attempts (0 when apply never ran)
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(id: &str, label: &str, outcome: StepOutcome) -> Self {
        Self {
            step_id: id.to_string(),
            label: label.to_string(),
            outcome,
            output: None,
            duration: Duration::ZERO,
            attempts: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn not_attempted(id: &str, label: &str, reason: impl Into<String>) -> Self {
        Self::new(
            id,
            label,
            StepOutcome::NotAttempted {
                reason: reason.into(),
            },
        )
    }

    pub fn with_output(mut self, output: Option<CommandOutcome>) -> Self {
        self.output = output;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Count of outcomes in a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub skipped: usize,
    pub applied: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

impl Summary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.add(&result.outcome);
        }
        summary
    }

    pub fn add(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Skipped => self.skipped += 1,
            StepOutcome::Applied => self.applied += 1,
            StepOutcome::Failed { .. } => self.failed += 1,
            StepOutcome::NotAttempted { .. } => self.not_attempted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.skipped + self.applied + self.failed + self.not_attempted
    }
}

/// The finalized record of one run. Terminal artifact handed to sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub target: Target,
    pub policy: FailurePolicy,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Results in the order they were recorded
    pub results: Vec<ExecutionResult>,
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Hash of the step definitions this run executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_digest: Option<String>,
}

impl RunReport {
    /// Completed with zero failures
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed && self.summary.failed == 0
    }

    /// First failed step in record order
    pub fn first_failure(&self) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.outcome.is_failed())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| r.outcome.is_failed())
    }

    /// Steps whose apply ran but whose verify failed
    pub fn verification_failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results
            .iter()
            .filter(|r| r.outcome.failure_kind() == Some(FailureKind::Verification))
    }

    pub fn result(&self, step_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Append-only report under construction
///
/// Each step of the run gets exactly one result. `finalize` consumes the
/// builder, so nothing can be appended to a finished report.
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: String,
    target: Target,
    policy: FailurePolicy,
    started_at: DateTime<Utc>,
    steps_digest: Option<String>,
    /// (id, label) of every step in the run, in topological order
    expected: Vec<(String, String)>,
    recorded: HashSet<String>,
    results: Vec<ExecutionResult>,
}

impl ReportBuilder {
    pub fn new(target: Target, policy: FailurePolicy, expected: Vec<(String, String)>) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: new_run_id(started_at),
            target,
            policy,
            started_at,
            steps_digest: None,
            expected,
            recorded: HashSet::new(),
            results: Vec::new(),
        }
    }

    pub fn with_steps_digest(mut self, digest: Option<String>) -> Self {
        self.steps_digest = digest;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append a result
    pub fn record(&mut self, result: ExecutionResult) -> Result<(), ReportError> {
        if !self.expected.iter().any(|(id, _)| *id == result.step_id) {
            return Err(ReportError::UnknownStep(result.step_id));
        }
        if !self.recorded.insert(result.step_id.clone()) {
            return Err(ReportError::AlreadyRecorded(result.step_id));
        }
        self.results.push(result);
        Ok(())
    }

    pub fn is_recorded(&self, step_id: &str) -> bool {
        self.recorded.contains(step_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Freeze the report and compute summary counts
    ///
    /// Any step still without a result is recorded as not-attempted so the
    /// report always covers every step exactly once.
    pub fn finalize(mut self, state: RunState, abort_reason: Option<String>) -> RunReport {
        let missing: Vec<(String, String)> = self
            .expected
            .iter()
            .filter(|(id, _)| !self.recorded.contains(id))
            .cloned()
            .collect();
        for (id, label) in missing {
            let reason = abort_reason
                .as_deref()
                .map(|r| format!("run aborted: {r}"))
                .unwrap_or_else(|| "no result recorded".to_string());
            self.recorded.insert(id.clone());
            self.results
                .push(ExecutionResult::not_attempted(&id, &label, reason));
        }

        let summary = Summary::from_results(&self.results);
        RunReport {
            run_id: self.run_id,
            target: self.target,
            policy: self.policy,
            state,
            started_at: self.started_at,
            finished_at: Utc::now(),
            results: self.results,
            summary,
            abort_reason,
            steps_digest: self.steps_digest,
        }
    }
}

/// `<timestamp>-<pid>-<sequence>`, sortable by start time
fn new_run_id(started_at: DateTime<Utc>) -> String {
    let sequence = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xffff;
    format!(
        "{}-{:05x}-{sequence:04x}",
        started_at.format("%Y%m%dT%H%M%S%3fZ"),
        std::process::id() & 0xfffff
    )
}

/// Destination for finalized reports (terminal, file, webhook, ...)
pub trait ReportSink {
    fn accept(&mut self, report: &RunReport) -> anyhow::Result<()>;
}

/// Sink that keeps reports in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub reports: Vec<RunReport>,
}

impl ReportSink for MemorySink {
    fn accept(&mut self, report: &RunReport) -> anyhow::Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}
