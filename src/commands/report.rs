//! `stagehand report` - inspect saved reports

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use converge::{RunState, Target};
use std::path::Path;

use crate::Context;
use crate::cli::ReportCommand;
use crate::state::ReportStore;
use crate::ui;

pub fn run(ctx: &Context, cmd: ReportCommand) -> Result<bool> {
    let store = ReportStore::open()?;
    match cmd {
        ReportCommand::List { target } => list(ctx, &store, target.as_deref()),
        ReportCommand::Show {
            report,
            target,
            json,
        } => show(&store, &report, target.as_deref(), json),
    }
}

fn parse_target(target: Option<&str>) -> Result<Option<Target>> {
    target
        .map(|t| Target::parse(t).with_context(|| format!("Invalid target '{t}'")))
        .transpose()
}

fn list(ctx: &Context, store: &ReportStore, target: Option<&str>) -> Result<bool> {
    let target = parse_target(target)?;
    let reports = store.list(target.as_ref())?;
    if reports.is_empty() {
        if !ctx.quiet {
            ui::info(&format!("No reports in {}", store.root().display()));
        }
        return Ok(true);
    }

    for stored in &reports {
        let r = &stored.report;
        let state = match r.state {
            RunState::Completed if r.is_success() => "ok".green(),
            RunState::Completed => "failed".red(),
            _ => r.state.to_string().yellow(),
        };
        println!(
            "{}  {:<28} {:<7} {} applied, {} skipped, {} failed, {} not attempted",
            r.started_at.format("%Y-%m-%d %H:%M:%S"),
            r.target.to_string(),
            state,
            r.summary.applied,
            r.summary.skipped,
            r.summary.failed,
            r.summary.not_attempted
        );
        if ctx.verbose > 0 {
            ui::dim(&stored.path.display().to_string());
        }
    }
    Ok(true)
}

fn show(store: &ReportStore, which: &str, target: Option<&str>, json: bool) -> Result<bool> {
    let report = if which == "latest" {
        let target = parse_target(target)?;
        match store.latest(target.as_ref())? {
            Some(stored) => stored.report,
            None => bail!("no saved reports in {}", store.root().display()),
        }
    } else {
        ReportStore::load(Path::new(which))?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        ui::print_report(&report);
        if let Some(digest) = &report.steps_digest {
            ui::kv("steps digest", digest);
        }
    }
    Ok(true)
}
