//! Step trait for idempotent provisioning work
//!
//! A Step is checked before it is changed: if its precondition already
//! holds, the orchestrator records it as skipped and never calls `apply`.

use crate::context::StepContext;
use crate::error::ExecError;
use crate::report::{ExecutionResult, FailureKind, StepOutcome};
use crate::retry::{self, RetryCallback, RetryConfig};
use crate::types::CommandOutcome;
use std::fmt;
use std::time::{Duration, Instant};

/// Core trait for provisioning steps
///
/// Every step provides:
/// - Identity (id, label, dependencies)
/// - A cheap check for "nothing to do" (precondition)
/// - The change itself (apply)
/// - A post-change check (verify)
///
/// # Example
///
/// ```ignore
/// use converge::{CommandOutcome, ExecError, Step, StepContext};
///
/// #[derive(Debug)]
/// struct DockerInstalled { deps: Vec<String> }
///
/// impl Step for DockerInstalled {
///     fn id(&self) -> &str { "docker" }
///     fn dependencies(&self) -> &[String] { &self.deps }
///
///     fn precondition(&self, ctx: &StepContext) -> Result<bool, ExecError> {
///         ctx.check("command -v docker")
///     }
///
///     fn apply(&self, ctx: &StepContext) -> Result<CommandOutcome, ExecError> {
///         ctx.run("curl -fsSL https://get.docker.com | sh")
///     }
///
///     fn verify(&self, ctx: &StepContext) -> Result<bool, ExecError> {
///         ctx.check("docker info >/dev/null")
///     }
/// }
/// ```
pub trait Step: Send + Sync + fmt::Debug {
    /// Unique identifier within the run (e.g. "docker", "nginx-site")
    fn id(&self) -> &str;

    /// Human-readable label
    fn label(&self) -> String {
        self.id().to_string()
    }

    /// Identifiers of steps that must reach a successful outcome first
    fn dependencies(&self) -> &[String];

    /// True if the step's postcondition already holds
    fn precondition(&self, ctx: &StepContext) -> Result<bool, ExecError>;

    /// Make the change
    fn apply(&self, ctx: &StepContext) -> Result<CommandOutcome, ExecError>;

    /// Check the change took effect
    ///
    /// Must be side-effect free so it can be re-checked any number of times.
    fn verify(&self, ctx: &StepContext) -> Result<bool, ExecError>;

    /// Retry policy for `apply`
    fn retry(&self) -> RetryConfig {
        RetryConfig::no_retry()
    }

    /// Per-command time budget, overriding the run default
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// A boxed step for type-erased storage
pub type BoxedStep = Box<dyn Step>;

/// A step whose check, change and verification are shell commands
///
/// - `precondition`: exit 0 means satisfied; absent means never satisfied
/// - `apply`: commands run in order, stopping at the first non-zero exit
/// - `verify`: exit 0 means verified; absent means re-run the precondition,
///   and with neither, a successful apply counts as verified
#[derive(Debug, Clone)]
pub struct ShellStep {
    pub id: String,
    pub label: Option<String>,
    pub depends_on: Vec<String>,
    pub precondition: Option<String>,
    pub apply: Vec<String>,
    pub verify: Option<String>,
    pub retry: RetryConfig,
    pub timeout: Option<Duration>,
}

impl ShellStep {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            depends_on: Vec::new(),
            precondition: None,
            apply: Vec::new(),
            verify: None,
            retry: RetryConfig::no_retry(),
            timeout: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_precondition(mut self, command: impl Into<String>) -> Self {
        self.precondition = Some(command.into());
        self
    }

    /// Append an apply command
    pub fn with_apply(mut self, command: impl Into<String>) -> Self {
        self.apply.push(command.into());
        self
    }

    pub fn with_verify(mut self, command: impl Into<String>) -> Self {
        self.verify = Some(command.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Step for ShellStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.id.clone())
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    fn precondition(&self, ctx: &StepContext) -> Result<bool, ExecError> {
        match &self.precondition {
            Some(command) => ctx.check(command),
            None => Ok(false),
        }
    }

    fn apply(&self, ctx: &StepContext) -> Result<CommandOutcome, ExecError> {
        let mut combined = CommandOutcome::ok();
        for command in &self.apply {
            let outcome = ctx.run(command)?;
            let failed = !outcome.success();
            combined.merge(outcome);
            if failed {
                break;
            }
        }
        Ok(combined)
    }

    fn verify(&self, ctx: &StepContext) -> Result<bool, ExecError> {
        match (&self.verify, &self.precondition) {
            (Some(command), _) | (None, Some(command)) => ctx.check(command),
            (None, None) => Ok(true),
        }
    }

    fn retry(&self) -> RetryConfig {
        self.retry.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Why an apply attempt did not succeed
enum ApplyFailure {
    Exec(ExecError),
    Exit(CommandOutcome),
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec(e) => write!(f, "{e}"),
            Self::Exit(out) => write!(f, "apply failed with {}", out.status_text()),
        }
    }
}

/// Evaluate one step: precondition, then apply (with retry), then verify
///
/// Never returns an error: every failure is folded into the result.
pub fn execute_step(
    step: &dyn Step,
    ctx: &StepContext,
    retry_callback: Option<&dyn RetryCallback>,
) -> ExecutionResult {
    let started = Instant::now();
    let id = step.id();
    let label = step.label();

    let failed = |kind: FailureKind, message: String| {
        ExecutionResult::new(id, &label, StepOutcome::Failed { kind, message })
    };

    match step.precondition(ctx) {
        Ok(true) => {
            return ExecutionResult::new(id, &label, StepOutcome::Skipped)
                .with_duration(started.elapsed());
        }
        Ok(false) => {}
        Err(e) => {
            return failed(e.kind(), format!("precondition check failed: {e}"))
                .with_duration(started.elapsed());
        }
    }

    let mut attempts = 0;
    let applied = retry::with_retry_if(
        &step.retry(),
        retry_callback,
        |failure: &ApplyFailure| match failure {
            ApplyFailure::Exec(e) => e.is_retryable(),
            ApplyFailure::Exit(_) => true,
        },
        || {
            attempts += 1;
            match step.apply(ctx) {
                Ok(out) if out.success() => Ok(out),
                Ok(out) => Err(ApplyFailure::Exit(out)),
                Err(e) => Err(ApplyFailure::Exec(e)),
            }
        },
    );

    let result = match applied {
        Err(ApplyFailure::Exec(e)) => failed(e.kind(), e.to_string()),
        Err(ApplyFailure::Exit(out)) => {
            let message = format!("apply failed with {}", out.status_text());
            failed(FailureKind::Command, message).with_output(Some(out))
        }
        Ok(out) => {
            let verified = match step.verify(ctx) {
                Ok(true) => ExecutionResult::new(id, &label, StepOutcome::Applied),
                Ok(false) => failed(
                    FailureKind::Verification,
                    "apply succeeded but verification failed; target state is ambiguous".into(),
                ),
                Err(e) => failed(e.kind(), format!("verification check failed: {e}")),
            };
            verified.with_output(Some(out))
        }
    };

    result
        .with_attempts(attempts)
        .with_duration(started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CommandRunner;
    use crate::target::Target;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Runner that answers from a table and logs every command
    struct TableRunner {
        target: Target,
        answers: HashMap<String, Result<i32, ExecError>>,
        log: Mutex<Vec<String>>,
    }

    impl TableRunner {
        fn new(answers: &[(&str, Result<i32, ExecError>)]) -> Self {
            Self {
                target: Target::Local,
                answers: answers
                    .iter()
                    .map(|(c, a)| (c.to_string(), a.clone()))
                    .collect(),
                log: Mutex::new(Vec::new()),
            }
        }

        fn ran(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl CommandRunner for TableRunner {
        fn target(&self) -> &Target {
            &self.target
        }

        fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutcome, ExecError> {
            self.log.lock().unwrap().push(command.to_string());
            match self.answers.get(command) {
                Some(Ok(code)) => Ok(CommandOutcome::new(
                    Some(*code),
                    "",
                    if *code == 0 { "" } else { "E: failed\n" },
                    Duration::ZERO,
                )),
                Some(Err(e)) => Err(e.clone()),
                None => panic!("unexpected command: {command}"),
            }
        }
    }

    fn ctx(runner: &TableRunner) -> StepContext<'_> {
        StepContext::new(runner, Duration::from_secs(5))
    }

    fn nginx_step() -> ShellStep {
        ShellStep::new("nginx")
            .with_precondition("dpkg -s nginx")
            .with_apply("apt-get install -y nginx")
            .with_verify("nginx -v")
    }

    #[test]
    fn test_satisfied_precondition_skips_apply() {
        let runner = TableRunner::new(&[("dpkg -s nginx", Ok(0))]);
        let result = execute_step(&nginx_step(), &ctx(&runner), None);
        assert_eq!(result.outcome, StepOutcome::Skipped);
        assert_eq!(result.attempts, 0);
        assert_eq!(runner.ran(), vec!["dpkg -s nginx"]);
    }

    #[test]
    fn test_apply_then_verify() {
        let runner = TableRunner::new(&[
            ("dpkg -s nginx", Ok(1)),
            ("apt-get install -y nginx", Ok(0)),
            ("nginx -v", Ok(0)),
        ]);
        let result = execute_step(&nginx_step(), &ctx(&runner), None);
        assert_eq!(result.outcome, StepOutcome::Applied);
        assert_eq!(result.attempts, 1);
        assert!(result.output.is_some());
    }

    #[test]
    fn test_apply_failure_skips_verify() {
        let runner = TableRunner::new(&[
            ("dpkg -s nginx", Ok(1)),
            ("apt-get install -y nginx", Ok(100)),
        ]);
        let result = execute_step(&nginx_step(), &ctx(&runner), None);
        assert_eq!(result.outcome.failure_kind(), Some(FailureKind::Command));
        assert!(!runner.ran().contains(&"nginx -v".to_string()));
        assert_eq!(result.output.unwrap().stderr, "E: failed\n");
    }

    #[test]
    fn test_verify_false_is_verification_failure() {
        let runner = TableRunner::new(&[
            ("dpkg -s nginx", Ok(1)),
            ("apt-get install -y nginx", Ok(0)),
            ("nginx -v", Ok(1)),
        ]);
        let result = execute_step(&nginx_step(), &ctx(&runner), None);
        assert_eq!(
            result.outcome.failure_kind(),
            Some(FailureKind::Verification)
        );
    }

    #[test]
    fn test_timeout_in_apply_fails_step() {
        let runner = TableRunner::new(&[
            ("dpkg -s nginx", Ok(1)),
            (
                "apt-get install -y nginx",
                Err(ExecError::Timeout {
                    command: "apt-get install -y nginx".into(),
                    timeout: Duration::from_secs(5),
                }),
            ),
        ]);
        let result = execute_step(&nginx_step(), &ctx(&runner), None);
        assert_eq!(result.outcome.failure_kind(), Some(FailureKind::Timeout));
    }

    #[test]
    fn test_precondition_error_fails_step() {
        let runner = TableRunner::new(&[(
            "dpkg -s nginx",
            Err(ExecError::Connection {
                target: "web1".into(),
                message: "Connection refused".into(),
            }),
        )]);
        let result = execute_step(&nginx_step(), &ctx(&runner), None);
        assert_eq!(result.outcome.failure_kind(), Some(FailureKind::Connection));
        assert_eq!(runner.ran().len(), 1);
    }

    #[test]
    fn test_multi_command_apply_stops_at_first_failure() {
        let step = ShellStep::new("app")
            .with_apply("git pull")
            .with_apply("docker compose build")
            .with_apply("docker compose up -d");
        let runner = TableRunner::new(&[("git pull", Ok(0)), ("docker compose build", Ok(1))]);
        let result = execute_step(&step, &ctx(&runner), None);
        assert!(result.outcome.is_failed());
        assert_eq!(runner.ran(), vec!["git pull", "docker compose build"]);
    }

    #[test]
    fn test_verify_falls_back_to_precondition() {
        let step = ShellStep::new("dir")
            .with_precondition("test -d /srv/app")
            .with_apply("mkdir -p /srv/app");
        let runner = TableRunner::new(&[("test -d /srv/app", Ok(1)), ("mkdir -p /srv/app", Ok(0))]);
        let result = execute_step(&step, &ctx(&runner), None);
        // precondition (1) and verify (1) both answer 1 from the table
        assert_eq!(
            result.outcome.failure_kind(),
            Some(FailureKind::Verification)
        );
        assert_eq!(
            runner.ran(),
            vec!["test -d /srv/app", "mkdir -p /srv/app", "test -d /srv/app"]
        );
    }

    #[test]
    fn test_step_retry_reapplies() {
        let step = nginx_step().with_retry(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(1),
        });
        let runner = TableRunner::new(&[
            ("dpkg -s nginx", Ok(1)),
            ("apt-get install -y nginx", Ok(100)),
        ]);
        let result = execute_step(&step, &ctx(&runner), None);
        assert!(result.outcome.is_failed());
        assert_eq!(result.attempts, 3);
    }

    #[test]
    fn test_label_defaults_to_id() {
        assert_eq!(ShellStep::new("ufw").label(), "ufw");
        assert_eq!(
            ShellStep::new("ufw").with_label("Firewall").label(),
            "Firewall"
        );
    }
}
