//! Orchestrator - walks the step graph against one target
//!
//! A run moves `Pending -> Running -> {Completed, Aborted}`. Graph errors are
//! returned before anything executes; every other failure is contained in the
//! step's result, so a run always ends with a report.

use crate::context::{CommandRunner, ProgressCallback, StepContext};
use crate::error::GraphError;
use crate::graph::DependencyGraph;
use crate::report::{ExecutionResult, FailureKind, ReportBuilder, RunReport, StepOutcome};
use crate::retry::LogCallback;
use crate::step::{Step, execute_step};
use crate::types::{FailurePolicy, RunOptions, RunState};
use rayon::ThreadPoolBuilder;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, mpsc};
use std::time::Instant;

/// Result of evaluating one step's precondition without applying anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCheck {
    pub step_id: String,
    pub label: String,
    pub status: CheckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    /// Precondition holds; a run would skip this step
    Satisfied,
    /// A run would apply this step. `after` lists dependencies that would
    /// also change first, which may be why the precondition is false.
    Pending { after: Vec<String> },
    /// The precondition could not be evaluated
    Error(String),
}

/// Per-step progress inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Waiting,
    Running,
    Succeeded,
    /// Failed or not attempted: dependents must not run
    Blocked,
}

/// State machine for one run
struct RunControl {
    state: RunState,
    abort_reason: Option<String>,
}

impl RunControl {
    fn new() -> Self {
        Self {
            state: RunState::Pending,
            abort_reason: None,
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state.can_transition_to(next) {
            log::debug!("run state {} -> {}", self.state, next);
            self.state = next;
        } else {
            log::error!("ignoring invalid run transition {} -> {}", self.state, next);
        }
    }

    /// Stop scheduling new steps; the first reason wins
    fn halt(&mut self, reason: String) {
        if self.abort_reason.is_none() {
            log::warn!("halting run: {reason}");
            self.abort_reason = Some(reason);
        }
    }

    fn is_halted(&self) -> bool {
        self.abort_reason.is_some()
    }
}

/// Runs a validated step graph against a target
pub struct Orchestrator {
    graph: DependencyGraph,
    options: RunOptions,
    steps_digest: Option<String>,
}

impl Orchestrator {
    pub fn new(graph: DependencyGraph, options: RunOptions) -> Self {
        Self {
            graph,
            options,
            steps_digest: None,
        }
    }

    /// Attach a hash of the step definitions to every report
    pub fn with_steps_digest(mut self, digest: impl Into<String>) -> Self {
        self.steps_digest = Some(digest.into());
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Execute every step in dependency order
    ///
    /// Returns `Err` only for an invalid graph, before any command runs.
    pub fn run<P: ProgressCallback>(
        &self,
        runner: &dyn CommandRunner,
        progress: &mut P,
    ) -> Result<RunReport, GraphError> {
        let order = self.graph.order_indices()?;

        let expected = order
            .iter()
            .map(|&i| {
                let step = self.graph.step_at(i);
                (step.id().to_string(), step.label())
            })
            .collect();
        let mut builder = ReportBuilder::new(runner.target().clone(), self.options.policy, expected)
            .with_steps_digest(self.steps_digest.clone());
        let mut control = RunControl::new();

        log::info!(
            "run {} against {}: {} steps, {}, concurrency {}",
            builder.run_id(),
            runner.target(),
            order.len(),
            self.options.policy,
            self.options.concurrency.max(1)
        );

        if self.options.probe
            && !order.is_empty()
            && let Err(e) = runner.probe(self.options.timeout)
        {
            control.halt(format!("target unreachable: {e}"));
            control.transition(RunState::Aborted);
            progress.on_run_start(order.len());
            return Ok(self.finish(builder, control, &order, progress));
        }

        control.transition(RunState::Running);
        progress.on_run_start(order.len());

        if self.options.concurrency > 1 && order.len() > 1 {
            self.run_parallel(&order, runner, progress, &mut builder, &mut control);
        } else {
            self.run_sequential(&order, runner, progress, &mut builder, &mut control);
        }

        let final_state = if control.is_halted() {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        control.transition(final_state);
        Ok(self.finish(builder, control, &order, progress))
    }

    /// Evaluate preconditions only, in dependency order
    pub fn check(&self, runner: &dyn CommandRunner) -> Result<Vec<StepCheck>, GraphError> {
        let order = self.graph.order_indices()?;
        let mut pending = BTreeSet::new();
        let mut checks = Vec::with_capacity(order.len());

        for &index in &order {
            let step = self.graph.step_at(index);
            let ctx = StepContext::new(runner, self.step_timeout(step));
            let after: Vec<String> = self
                .graph
                .dependency_indices(index)
                .into_iter()
                .filter(|d| pending.contains(d))
                .map(|d| self.graph.step_at(d).id().to_string())
                .collect();

            let status = match step.precondition(&ctx) {
                Ok(true) => CheckStatus::Satisfied,
                Ok(false) => {
                    pending.insert(index);
                    CheckStatus::Pending { after }
                }
                Err(e) => {
                    pending.insert(index);
                    CheckStatus::Error(e.to_string())
                }
            };
            checks.push(StepCheck {
                step_id: step.id().to_string(),
                label: step.label(),
                status,
            });
        }

        Ok(checks)
    }

    fn step_timeout(&self, step: &dyn Step) -> std::time::Duration {
        step.timeout().unwrap_or(self.options.timeout)
    }

    /// Fill in not-attempted results and freeze the report
    fn finish<P: ProgressCallback>(
        &self,
        mut builder: ReportBuilder,
        control: RunControl,
        order: &[usize],
        progress: &mut P,
    ) -> RunReport {
        for &index in order {
            let step = self.graph.step_at(index);
            if builder.is_recorded(step.id()) {
                continue;
            }
            let reason = control
                .abort_reason
                .as_deref()
                .map(|r| format!("run aborted: {r}"))
                .unwrap_or_else(|| "dependency did not succeed".to_string());
            let result = ExecutionResult::not_attempted(step.id(), &step.label(), reason);
            progress.on_step_complete(&result);
            record(&mut builder, result);
        }

        let report = builder.finalize(control.state, control.abort_reason);
        log::info!(
            "run {} {}: {} applied, {} skipped, {} failed, {} not attempted",
            report.run_id,
            report.state,
            report.summary.applied,
            report.summary.skipped,
            report.summary.failed,
            report.summary.not_attempted
        );
        progress.on_run_complete(&report);
        report
    }

    /// First dependency of `index` that did not succeed
    fn blocked_dependency(&self, index: usize, slots: &[Slot]) -> Option<usize> {
        self.graph
            .dependency_indices(index)
            .into_iter()
            .find(|&d| slots[d] == Slot::Blocked)
    }

    /// Apply the failure policy to a finished step
    ///
    /// A lost connection stops the run whatever the policy: every later
    /// command would fail the same way.
    fn settle(&self, step_id: &str, kind: Option<FailureKind>, control: &mut RunControl) {
        match kind {
            Some(FailureKind::Connection) => {
                control.halt(format!("target unreachable during step '{step_id}'"));
            }
            Some(_) if self.options.policy == FailurePolicy::HaltOnFailure => {
                control.halt(format!("step '{step_id}' failed"));
            }
            _ => {}
        }
    }

    fn run_sequential<P: ProgressCallback>(
        &self,
        order: &[usize],
        runner: &dyn CommandRunner,
        progress: &mut P,
        builder: &mut ReportBuilder,
        control: &mut RunControl,
    ) {
        let mut slots = vec![Slot::Waiting; self.graph.len()];

        for &index in order {
            if control.is_halted() {
                // finish() records the rest as not attempted
                break;
            }

            let step = self.graph.step_at(index);
            if let Some(dep) = self.blocked_dependency(index, &slots) {
                slots[index] = Slot::Blocked;
                let result = blocked_result(step, self.graph.step_at(dep).id());
                progress.on_step_complete(&result);
                record(builder, result);
                continue;
            }

            progress.on_step_start(step.id(), &step.label());
            let ctx = StepContext::new(runner, self.step_timeout(step));
            let result = run_step(step, &ctx);
            log_outcome(&result);

            slots[index] = if result.outcome.is_success() {
                Slot::Succeeded
            } else {
                Slot::Blocked
            };
            self.settle(&result.step_id, result.outcome.failure_kind(), control);
            progress.on_step_complete(&result);
            record(builder, result);
        }
    }

    /// Width-wise walk: every step whose dependencies all succeeded may run,
    /// up to `concurrency` at a time
    fn run_parallel<P: ProgressCallback>(
        &self,
        order: &[usize],
        runner: &dyn CommandRunner,
        progress: &mut P,
        builder: &mut ReportBuilder,
        control: &mut RunControl,
    ) {
        let workers = self.options.concurrency;
        let pool = match ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("failed to create worker pool ({e}); running sequentially");
                return self.run_sequential(order, runner, progress, builder, control);
            }
        };

        // Position in topological order: ready steps are started in that order
        let mut position = vec![0; self.graph.len()];
        for (pos, &index) in order.iter().enumerate() {
            position[index] = pos;
        }
        let dependents = self.graph.dependents_by_index();
        let mut remaining: Vec<usize> = (0..self.graph.len())
            .map(|i| self.graph.dependency_indices(i).len())
            .collect();
        let mut slots = vec![Slot::Waiting; self.graph.len()];
        let mut ready: BTreeSet<usize> = order
            .iter()
            .filter(|&&i| remaining[i] == 0)
            .map(|&i| position[i])
            .collect();

        let shared_builder = Mutex::new(builder);
        let shared_progress = Mutex::new(progress);
        let (tx, rx) = mpsc::channel::<(usize, Option<FailureKind>, bool)>();

        pool.in_place_scope(|scope| {
            let mut in_flight = 0usize;
            loop {
                while !control.is_halted() && in_flight < workers {
                    let Some(pos) = ready.pop_first() else { break };
                    let index = order[pos];
                    slots[index] = Slot::Running;
                    in_flight += 1;

                    let tx = tx.clone();
                    let step = self.graph.step_at(index);
                    let timeout = self.step_timeout(step);
                    let builder = &shared_builder;
                    let progress = &shared_progress;
                    scope.spawn(move |_| {
                        lock(progress).on_step_start(step.id(), &step.label());
                        let ctx = StepContext::new(runner, timeout);
                        let result = run_step(step, &ctx);
                        log_outcome(&result);
                        let kind = result.outcome.failure_kind();
                        let succeeded = result.outcome.is_success();
                        lock(progress).on_step_complete(&result);
                        record(&mut lock(builder), result);
                        let _ = tx.send((index, kind, succeeded));
                    });
                }

                if in_flight == 0 {
                    break;
                }

                let Ok((index, kind, succeeded)) = rx.recv() else {
                    break;
                };
                in_flight -= 1;

                if succeeded {
                    slots[index] = Slot::Succeeded;
                    for &child in &dependents[index] {
                        remaining[child] -= 1;
                        if remaining[child] == 0 && slots[child] == Slot::Waiting {
                            ready.insert(position[child]);
                        }
                    }
                } else {
                    slots[index] = Slot::Blocked;
                    self.settle(self.graph.step_at(index).id(), kind, control);
                }
            }
        });

        let builder = shared_builder
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let progress = shared_progress
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Steps that never became ready sit downstream of a failure
        if !control.is_halted() {
            for &index in order {
                if slots[index] != Slot::Waiting {
                    continue;
                }
                if let Some(dep) = self.blocked_dependency(index, &slots) {
                    slots[index] = Slot::Blocked;
                    let result =
                        blocked_result(self.graph.step_at(index), self.graph.step_at(dep).id());
                    progress.on_step_complete(&result);
                    record(builder, result);
                }
            }
        }
    }
}

/// Execute one step; a panic inside it becomes a failed result
///
/// In the parallel walk the scheduler waits for every started step to
/// report back, so a step must never unwind past this point.
fn run_step(step: &dyn Step, ctx: &StepContext) -> ExecutionResult {
    let started = Instant::now();
    panic::catch_unwind(AssertUnwindSafe(|| {
        execute_step(step, ctx, Some(&LogCallback))
    }))
    .unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        ExecutionResult::new(
            step.id(),
            &step.label(),
            StepOutcome::Failed {
                kind: FailureKind::Command,
                message: format!("step panicked: {message}"),
            },
        )
        .with_duration(started.elapsed())
    })
}

fn blocked_result(step: &dyn Step, dependency: &str) -> ExecutionResult {
    ExecutionResult::not_attempted(
        step.id(),
        &step.label(),
        format!("dependency '{dependency}' did not succeed"),
    )
}

fn record(builder: &mut ReportBuilder, result: ExecutionResult) {
    if let Err(e) = builder.record(result) {
        log::error!("dropping result: {e}");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn log_outcome(result: &ExecutionResult) {
    match &result.outcome {
        StepOutcome::Failed { message, .. } => {
            log::warn!("step '{}' failed: {}", result.step_id, message);
        }
        outcome => log::info!("step '{}' {}", result.step_id, outcome.label()),
    }
}
