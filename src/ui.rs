use anyhow::Result;
use colored::{ColoredString, Colorize};
use converge::{
    CheckStatus, DependencyGraph, FailureKind, ReportSink, RunReport, RunState, StepCheck,
    StepOutcome,
};
use std::time::Duration;

/// Lines of stderr shown for the first failing step
const STDERR_TAIL: usize = 20;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Outcomes
// ============================================================================

/// Symbol for a step outcome
pub fn outcome_symbol(outcome: &StepOutcome) -> ColoredString {
    match outcome {
        StepOutcome::Skipped => "○".dimmed(),
        StepOutcome::Applied => "✓".green(),
        StepOutcome::Failed { .. } => "✗".red(),
        StepOutcome::NotAttempted { .. } => "-".yellow(),
    }
}

/// Format a duration for humans: `850ms`, `4.2s`, `3m 07s`
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Print a finalized run report
pub fn print_report(report: &RunReport) {
    header(&format!("Run {} against {}", report.run_id, report.target));

    for result in &report.results {
        let detail = match &result.outcome {
            StepOutcome::Skipped => "already satisfied".to_string(),
            StepOutcome::Applied => format_duration(result.duration),
            StepOutcome::Failed { message, .. } => message.clone(),
            StepOutcome::NotAttempted { reason } => reason.clone(),
        };
        println!(
            "{} {} {}",
            outcome_symbol(&result.outcome),
            result.step_id.bold(),
            format!("({})", result.label).dimmed()
        );
        println!("    {}", detail.dimmed());
    }

    let verification: Vec<_> = report.verification_failures().collect();
    if !verification.is_empty() {
        println!();
        for result in verification {
            println!(
                "{} {}",
                "⚠ VERIFICATION FAILED:".yellow().bold(),
                format!(
                    "'{}' applied without error but its check still fails; the target may be half-changed",
                    result.step_id
                )
                .yellow()
            );
        }
    }

    if let Some(failure) = report.first_failure() {
        section_failure(failure);
    }

    let s = &report.summary;
    println!();
    println!(
        "{} applied, {} skipped, {} failed, {} not attempted in {}",
        s.applied.to_string().green(),
        s.skipped,
        if s.failed > 0 {
            s.failed.to_string().red()
        } else {
            s.failed.to_string().normal()
        },
        s.not_attempted,
        format_duration(report.duration())
    );

    match report.state {
        RunState::Aborted => error(&format!(
            "Run aborted: {}",
            report.abort_reason.as_deref().unwrap_or("unknown reason")
        )),
        _ if report.is_success() => success("Run completed"),
        _ => warn("Run completed with failures"),
    }
}

fn section_failure(failure: &converge::ExecutionResult) {
    println!();
    println!(
        "{} {}",
        "First failure:".red().bold(),
        failure.step_id.bold()
    );
    if let StepOutcome::Failed { kind, message } = &failure.outcome {
        kv("kind", kind_label(*kind));
        kv("error", message);
    }
    if let Some(output) = &failure.output {
        kv("status", &output.status_text());
        let tail = output.stderr_tail(STDERR_TAIL);
        if !tail.is_empty() {
            println!("  {}", "stderr:".dimmed());
            for line in tail.lines() {
                println!("    {line}");
            }
        }
    }
}

fn kind_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Connection => "connection",
        FailureKind::Timeout => "timeout",
        FailureKind::Command => "command",
        FailureKind::Verification => "verification",
    }
}

/// Print the execution order of a graph
pub fn print_plan(graph: &DependencyGraph, order: &[String]) {
    header(&format!("{} steps", order.len()));
    for (i, id) in order.iter().enumerate() {
        let Some(step) = graph.get(id) else {
            continue;
        };
        println!(
            "{} {} {}",
            format!("[{}/{}]", i + 1, order.len()).blue().bold(),
            id.bold(),
            format!("({})", step.label()).dimmed()
        );
        if !step.dependencies().is_empty() {
            dim(&format!("after {}", step.dependencies().join(", ")));
        }
    }
}

/// Print precondition results from a dry run
pub fn print_checks(checks: &[StepCheck]) {
    for check in checks {
        match &check.status {
            CheckStatus::Satisfied => println!(
                "{} {} {}",
                "○".dimmed(),
                check.step_id.bold(),
                "satisfied".dimmed()
            ),
            CheckStatus::Pending { after } => {
                println!("{} {} {}", "●".yellow(), check.step_id.bold(), "would apply".yellow());
                if !after.is_empty() {
                    dim(&format!("after changes to {}", after.join(", ")));
                }
            }
            CheckStatus::Error(message) => {
                println!("{} {} {}", "✗".red(), check.step_id.bold(), message.red());
            }
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Prints the colored summary
pub struct TerminalSink;

impl ReportSink for TerminalSink {
    fn accept(&mut self, report: &RunReport) -> Result<()> {
        print_report(report);
        Ok(())
    }
}

/// Prints the report as JSON on stdout
pub struct JsonStdoutSink;

impl ReportSink for JsonStdoutSink {
    fn accept(&mut self, report: &RunReport) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(report)?);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration(Duration::ZERO), "0ms");
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
    }

    #[test]
    fn test_format_duration_secs() {
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59.0s");
    }

    #[test]
    fn test_format_duration_minutes() {
        assert_eq!(format_duration(Duration::from_secs(187)), "3m 07s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "60m 00s");
    }

    #[test]
    fn test_kind_label() {
        assert_eq!(kind_label(FailureKind::Verification), "verification");
        assert_eq!(kind_label(FailureKind::Connection), "connection");
    }
}
