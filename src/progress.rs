//! Live progress for a run
//!
//! One spinner per step in flight; a finished step is replaced by a single
//! outcome line. Concurrent runs show several spinners at once.

use colored::Colorize;
use converge::{ExecutionResult, ProgressCallback, RunReport, StepOutcome};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

use crate::ui;

/// Terminal progress display
pub struct TerminalProgress {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    total: usize,
    done: usize,
}

impl TerminalProgress {
    /// `visible = false` draws nothing (quiet or JSON output)
    pub fn new(visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
            total: 0,
            done: 0,
        }
    }

    fn spinner(&self, msg: String) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(msg);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn counter(&self) -> String {
        format!("[{}/{}]", self.done, self.total)
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_run_start(&mut self, total: usize) {
        self.total = total;
        self.done = 0;
    }

    fn on_step_start(&mut self, id: &str, label: &str) {
        let pb = self.spinner(format!("{} {}", id.bold(), label.dimmed()));
        self.bars.insert(id.to_string(), pb);
    }

    fn on_step_complete(&mut self, result: &ExecutionResult) {
        self.done += 1;
        if let Some(pb) = self.bars.remove(&result.step_id) {
            pb.finish_and_clear();
            self.multi.remove(&pb);
        }
        let detail = match &result.outcome {
            StepOutcome::Skipped => "skipped".dimmed(),
            StepOutcome::Applied => format!("applied in {}", ui::format_duration(result.duration))
                .green(),
            StepOutcome::Failed { message, .. } => message.red(),
            StepOutcome::NotAttempted { reason } => reason.yellow(),
        };
        let line = format!(
            "{} {} {} {}",
            self.counter().blue(),
            ui::outcome_symbol(&result.outcome),
            result.step_id.bold(),
            detail
        );
        // Hidden targets drop the line as well
        let _ = self.multi.println(line);
    }

    fn on_run_complete(&mut self, _report: &RunReport) {
        for (_, pb) in self.bars.drain() {
            pb.finish_and_clear();
        }
    }
}
