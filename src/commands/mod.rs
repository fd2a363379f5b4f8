//! Subcommand implementations
//!
//! Each command returns `Ok(true)` when it succeeded in the user's sense
//! (a clean run, nothing pending), `Ok(false)` when it ran but the outcome
//! was not clean, and `Err` when it could not run at all.

pub mod check;
pub mod plan;
pub mod report;
pub mod run;

use anyhow::{Context as _, Result};
use converge::{DependencyGraph, Target};
use shellexec::RunnerOptions;
use std::time::Duration;

use crate::cli::{ConnectArgs, StepsArgs, TargetArgs};
use crate::config::{self, LoadedSteps, Settings};
use crate::{paths, resource};

/// Parse the target and fill in user, port and identity from flags
pub(crate) fn resolve_target(args: &TargetArgs) -> Result<Target> {
    let target = Target::parse(&args.target)
        .with_context(|| format!("Invalid target '{}'", args.target))?;
    Ok(target
        .with_default_user(args.user.clone())
        .with_default_port(args.port)
        .with_identity(args.identity.as_deref().map(paths::expand)))
}

/// Load the steps file and build its graph; fails before touching any host
pub(crate) fn load_graph(args: &StepsArgs) -> Result<(LoadedSteps, DependencyGraph)> {
    let path = paths::expand(&args.steps.to_string_lossy());
    let loaded = config::load(&path, &args.vars)?;
    let graph = resource::build_graph(&loaded.file)
        .with_context(|| format!("Invalid steps in {}", path.display()))?;
    Ok((loaded, graph))
}

/// ssh transport settings from flags, then `[settings]`
pub(crate) fn runner_options(
    args: &ConnectArgs,
    settings: &Settings,
    target: &Target,
) -> Result<RunnerOptions> {
    let mut options = RunnerOptions {
        accept_new_host_keys: args.accept_new_host_keys,
        ..RunnerOptions::default()
    };
    if let Some(secs) = args.connect_timeout.or(settings.connect_timeout_secs) {
        options.connect_timeout = Duration::from_secs(secs);
    }
    if !args.no_multiplex && !target.is_local() {
        let dir = paths::ssh_control_dir()?;
        create_private_dir(&dir)?;
        options.control_dir = Some(dir);
    }
    Ok(options)
}

fn create_private_dir(dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to restrict {}", dir.display()))?;
    }
    Ok(())
}
