//! `stagehand run` - converge a target

use anyhow::{Context as _, Result, bail};
use converge::{FailurePolicy, Orchestrator, ReportSink, RunOptions, Target};
use std::io::IsTerminal;
use std::time::Duration;

use crate::Context;
use crate::cli::RunArgs;
use crate::config::Settings;
use crate::lock::TargetLock;
use crate::paths;
use crate::progress::TerminalProgress;
use crate::state::{JsonFileSink, ReportStore};
use crate::ui::{self, JsonStdoutSink, TerminalSink};

pub fn run(ctx: &Context, args: RunArgs) -> Result<bool> {
    let (loaded, graph) = super::load_graph(&args.steps)?;
    let target = super::resolve_target(&args.target)?;
    let options = run_options(&args, &loaded.file.settings);
    log::info!(
        "{} steps from {} against {} ({}, concurrency {})",
        graph.len(),
        loaded.path.display(),
        target,
        options.policy,
        options.concurrency
    );

    if !args.yes && !target.is_local() {
        confirm(&target, graph.len())?;
    }

    let _lock = TargetLock::acquire(&paths::locks_dir()?, &target)?;
    let runner = shellexec::runner_for(
        &target,
        &super::runner_options(&args.connect, &loaded.file.settings, &target)?,
    );

    let orchestrator = Orchestrator::new(graph, options).with_steps_digest(loaded.digest);
    let mut progress = TerminalProgress::new(!ctx.quiet && !args.json);
    let report = orchestrator.run(runner.as_ref(), &mut progress)?;

    if !args.no_save {
        let mut sink = JsonFileSink::new(ReportStore::open()?);
        match sink.accept(&report) {
            Ok(()) => {
                if let Some(path) = &sink.saved {
                    log::info!("Report saved to {}", path.display());
                }
            }
            Err(e) => ui::warn(&format!("Could not save report: {e:#}")),
        }
    }

    if args.json {
        JsonStdoutSink.accept(&report)?;
    } else if !ctx.quiet {
        TerminalSink.accept(&report)?;
    } else if !report.is_success() {
        let reason = report
            .first_failure()
            .map(|r| format!("step '{}' failed", r.step_id))
            .or_else(|| report.abort_reason.clone())
            .unwrap_or_else(|| "run did not complete".to_string());
        ui::error(&reason);
    }

    Ok(report.is_success())
}

/// Flags first, then `[settings]`, then built-in defaults
fn run_options(args: &RunArgs, settings: &Settings) -> RunOptions {
    let defaults = RunOptions::default();
    let policy = if args.continue_on_failure {
        FailurePolicy::ContinueOnFailure
    } else if args.halt_on_failure {
        FailurePolicy::HaltOnFailure
    } else {
        settings.policy.unwrap_or(defaults.policy)
    };
    RunOptions {
        policy,
        concurrency: args
            .concurrency
            .map(usize::from)
            .or(settings.concurrency)
            .unwrap_or(defaults.concurrency)
            .max(1),
        timeout: args
            .timeout
            .or(settings.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        probe: true,
    }
}

/// Ask before changing a remote host; never prompt without a terminal
fn confirm(target: &Target, steps: usize) -> Result<()> {
    if !std::io::stdin().is_terminal() {
        bail!("refusing to change {target} without confirmation; pass --yes to run unattended");
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(format!("Converge {target} ({steps} steps)?"))
        .default(false)
        .interact()
        .context("Failed to read confirmation")?;
    if !confirmed {
        bail!("run against {target} cancelled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["stagehand", "run", "-t", "local", "-s", "web.toml"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_defaults() {
        let options = run_options(&args(&[]), &Settings::default());
        assert_eq!(options.policy, FailurePolicy::HaltOnFailure);
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.timeout, converge::DEFAULT_TIMEOUT);
        assert!(options.probe);
    }

    #[test]
    fn test_settings_apply_without_flags() {
        let settings = Settings {
            timeout_secs: Some(60),
            policy: Some(FailurePolicy::ContinueOnFailure),
            concurrency: Some(3),
            connect_timeout_secs: None,
        };
        let options = run_options(&args(&[]), &settings);
        assert_eq!(options.policy, FailurePolicy::ContinueOnFailure);
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_flags_override_settings() {
        let settings = Settings {
            timeout_secs: Some(60),
            policy: Some(FailurePolicy::ContinueOnFailure),
            concurrency: Some(3),
            connect_timeout_secs: None,
        };
        let options = run_options(
            &args(&["--halt-on-failure", "-j", "8", "--timeout", "900"]),
            &settings,
        );
        assert_eq!(options.policy, FailurePolicy::HaltOnFailure);
        assert_eq!(options.concurrency, 8);
        assert_eq!(options.timeout, Duration::from_secs(900));
    }

    #[test]
    fn test_zero_concurrency_in_settings_is_sequential() {
        let settings = Settings {
            concurrency: Some(0),
            ..Settings::default()
        };
        assert_eq!(run_options(&args(&[]), &settings).concurrency, 1);
    }
}
