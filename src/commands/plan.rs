//! `stagehand plan` - show the execution order without contacting a host

use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::cli::PlanArgs;
use crate::{resource, ui};

pub fn run(ctx: &Context, args: PlanArgs) -> Result<bool> {
    let (loaded, graph) = super::load_graph(&args.steps)?;
    let order = graph.topological_order()?;

    if ctx.quiet {
        for id in &order {
            println!("{id}");
        }
        return Ok(true);
    }

    ui::print_plan(&graph, &order);

    if args.commands {
        for id in &order {
            let Some(spec) = loaded.file.steps.iter().find(|s| &s.id == id) else {
                continue;
            };
            let step = resource::build_step(spec)?;
            ui::header(id);
            if let Some(check) = &step.precondition {
                println!("  {} {}", "check ".dimmed(), check);
            }
            for command in &step.apply {
                println!("  {} {}", "apply ".cyan(), command);
            }
            if let Some(verify) = &step.verify {
                println!("  {} {}", "verify".dimmed(), verify);
            }
        }
    }

    println!();
    ui::kv("steps file", &loaded.path.display().to_string());
    ui::kv("digest", &loaded.digest);
    Ok(true)
}
