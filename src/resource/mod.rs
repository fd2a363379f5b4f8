//! Step kinds for declarative host provisioning
//!
//! Every kind in a steps file expands into a [`ShellStep`]:
//! - A precondition that detects "already done" cheaply
//! - Apply commands that converge the host
//! - An optional verify (defaults to re-running the precondition)

use anyhow::{Result, bail};
use converge::{DependencyGraph, RetryConfig, ShellStep};
use serde::{Deserialize, Serialize};
use shellexec::shell::{quote, sudo};
use std::time::Duration;

use crate::config::{StepSpec, StepsFile};

pub mod command;
pub mod compose;
pub mod directory;
pub mod file;
pub mod firewall;
pub mod git;
pub mod package;
pub mod service;

pub use command::CommandStep;
pub use compose::ComposeProject;
pub use directory::Directory;
pub use file::FileContent;
pub use firewall::Firewall;
pub use git::GitCheckout;
pub use package::Package;
pub use service::Service;

/// Delay before the first retry when a step sets `retries` without a delay
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Shell commands that make up one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commands {
    pub precondition: Option<String>,
    pub apply: Vec<String>,
    pub verify: Option<String>,
}

/// A kind of step that describes itself as shell commands
pub trait Resource {
    /// Short description used when the step has no label
    fn describe(&self) -> String;

    /// Reject definitions that could never work, before anything runs
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Commands run on the target
    fn commands(&self) -> Commands;
}

/// The `kind` field of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Command(CommandStep),
    Package(Package),
    Service(Service),
    File(FileContent),
    Directory(Directory),
    Firewall(Firewall),
    Git(GitCheckout),
    Compose(ComposeProject),
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Package(_) => "package",
            Self::Service(_) => "service",
            Self::File(_) => "file",
            Self::Directory(_) => "directory",
            Self::Firewall(_) => "firewall",
            Self::Git(_) => "git",
            Self::Compose(_) => "compose",
        }
    }

    pub fn resource(&self) -> &dyn Resource {
        match self {
            Self::Command(r) => r,
            Self::Package(r) => r,
            Self::Service(r) => r,
            Self::File(r) => r,
            Self::Directory(r) => r,
            Self::Firewall(r) => r,
            Self::Git(r) => r,
            Self::Compose(r) => r,
        }
    }
}

/// A single string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Build the step for one definition
pub fn build_step(spec: &StepSpec) -> Result<ShellStep> {
    let resource = spec.kind.resource();
    resource
        .validate()
        .map_err(|e| anyhow::anyhow!("step '{}' ({}): {e}", spec.id, spec.kind.name()))?;

    let wrap = |command: String| {
        if spec.privileged {
            sudo(&command)
        } else {
            command
        }
    };

    let commands = resource.commands();
    let mut step = ShellStep::new(&spec.id)
        .with_label(spec.label.clone().unwrap_or_else(|| resource.describe()))
        .with_timeout(spec.timeout_secs.map(Duration::from_secs));
    for dep in &spec.depends_on {
        step = step.with_dependency(dep);
    }
    if let Some(check) = commands.precondition {
        step = step.with_precondition(wrap(check));
    }
    for command in commands.apply {
        step = step.with_apply(wrap(command));
    }
    if let Some(verify) = commands.verify {
        step = step.with_verify(wrap(verify));
    }
    if spec.retries > 0 {
        let delay = spec
            .retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_DELAY);
        step = step.with_retry(RetryConfig::new(spec.retries + 1, delay, 2.0));
    }
    Ok(step)
}

/// Build the dependency graph for a whole steps file
///
/// Unknown dependencies and cycles are rejected here, before any target
/// is contacted.
pub fn build_graph(file: &StepsFile) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    for spec in &file.steps {
        graph.add_step(Box::new(build_step(spec)?))?;
    }
    graph.validate()?;
    graph.topological_order()?;
    Ok(graph)
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Checks that `path` has the given mode and owner
fn attribute_checks(path: &str, mode: Option<&str>, owner: Option<&str>) -> Vec<String> {
    let mut checks = Vec::new();
    if let Some(mode) = mode {
        // stat prints no leading zeros, but prints 0 for an all-zero mode
        let mode = match mode.trim_start_matches('0') {
            "" => "0",
            trimmed => trimmed,
        };
        checks.push(format!(
            "[ \"$(stat -c %a {})\" = {} ]",
            quote(path),
            quote(mode)
        ));
    }
    if let Some(owner) = owner {
        let format = if owner.contains(':') { "%U:%G" } else { "%U" };
        checks.push(format!(
            "[ \"$(stat -c {format} {})\" = {} ]",
            quote(path),
            quote(owner)
        ));
    }
    checks
}

/// Commands that set the mode and owner of `path`
fn attribute_commands(path: &str, mode: Option<&str>, owner: Option<&str>) -> Vec<String> {
    let mut commands = Vec::new();
    if let Some(mode) = mode {
        commands.push(format!("chmod {} {}", quote(mode), quote(path)));
    }
    if let Some(owner) = owner {
        commands.push(format!("chown {} {}", quote(owner), quote(path)));
    }
    commands
}

fn validate_absolute(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("path '{path}' must be absolute");
    }
    Ok(())
}

fn validate_mode(mode: Option<&str>) -> Result<()> {
    if let Some(mode) = mode {
        let octal =
            (3..=4).contains(&mode.len()) && mode.chars().all(|c| ('0'..='7').contains(&c));
        if !octal {
            bail!("mode '{mode}' must be octal, like 644 or 0750");
        }
    }
    Ok(())
}
