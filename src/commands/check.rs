//! `stagehand check` - evaluate preconditions against a target (dry run)

use anyhow::Result;
use converge::{CheckStatus, Orchestrator, RunOptions};
use std::time::Duration;

use crate::Context;
use crate::cli::CheckArgs;
use crate::ui;

pub fn run(ctx: &Context, args: CheckArgs) -> Result<bool> {
    let (loaded, graph) = super::load_graph(&args.steps)?;
    let target = super::resolve_target(&args.target)?;
    let settings = &loaded.file.settings;

    let options = RunOptions {
        timeout: args
            .timeout
            .or(settings.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(converge::DEFAULT_TIMEOUT),
        ..RunOptions::default()
    };
    let runner = shellexec::runner_for(
        &target,
        &super::runner_options(&args.connect, settings, &target)?,
    );
    runner.probe(options.timeout)?;

    let checks = Orchestrator::new(graph, options).check(runner.as_ref())?;

    let satisfied = checks
        .iter()
        .filter(|c| c.status == CheckStatus::Satisfied)
        .count();
    let errors = checks
        .iter()
        .filter(|c| matches!(c.status, CheckStatus::Error(_)))
        .count();
    let pending = checks.len() - satisfied - errors;

    if !ctx.quiet {
        ui::header(&format!("Check {target}"));
        ui::print_checks(&checks);
        println!();
        let summary = format!("{satisfied} satisfied, {pending} would apply, {errors} errors");
        if satisfied == checks.len() {
            ui::success(&summary);
        } else {
            ui::warn(&summary);
        }
    }

    Ok(satisfied == checks.len())
}
