//! # Converge
//!
//! Idempotent provisioning steps, ordered by their dependencies and run
//! against a single target.
//!
//! ## Core Concepts
//!
//! - **Step**: a unit of work with a precondition, an apply and a verify
//! - **DependencyGraph**: steps plus "must run after" edges, ordered topologically
//! - **Orchestrator**: walks the graph, applying a failure policy
//! - **RunReport**: one result per step, frozen when the run ends
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     DependencyGraph, NoProgress, Orchestrator, RunOptions, ShellStep,
//! };
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_step(Box::new(
//!     ShellStep::new("docker")
//!         .with_precondition("command -v docker")
//!         .with_apply("curl -fsSL https://get.docker.com | sh"),
//! ))?;
//! graph.add_step(Box::new(
//!     ShellStep::new("containers")
//!         .with_dependency("docker")
//!         .with_precondition("docker compose -f /srv/app/compose.yml ps -q | grep -q .")
//!         .with_apply("docker compose -f /srv/app/compose.yml up -d"),
//! ))?;
//!
//! let report = Orchestrator::new(graph, RunOptions::default())
//!     .run(&runner, &mut NoProgress)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`CommandRunner`]: executes commands on the target (local shell, SSH, ...)
//! - [`ProgressCallback`]: receives progress updates
//! - [`ReportSink`]: receives the finalized report
//! - [`RetryCallback`]: notified before a step's apply is retried
//!
//! This keeps the crate free of any transport or UI dependency.

pub mod context;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod step;
pub mod target;
pub mod types;

// Re-export main types at crate root
pub use context::{CommandRunner, NoProgress, ProgressCallback, StepContext};
pub use error::{ExecError, GraphError, ReportError};
pub use graph::DependencyGraph;
pub use orchestrator::{CheckStatus, Orchestrator, StepCheck};
pub use report::{
    ExecutionResult, FailureKind, MemorySink, ReportBuilder, ReportSink, RunReport, StepOutcome,
    Summary,
};
pub use retry::{LogCallback, RetryCallback, RetryConfig, with_retry, with_retry_if};
pub use step::{BoxedStep, ShellStep, Step, execute_step};
pub use target::{SshTarget, Target, TargetParseError};
pub use types::{CommandOutcome, DEFAULT_TIMEOUT, FailurePolicy, RunOptions, RunState};
