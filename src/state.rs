//! Persisted run reports
//!
//! Each finalized report is written as JSON to
//! `<state>/reports/<host-key>/<run-id>.json`. Run ids start with the
//! start timestamp, so file names sort chronologically.

use anyhow::{Context, Result};
use converge::{ReportSink, RunReport, Target};
use std::fs;
use std::path::{Path, PathBuf};

use crate::lock::sanitize;
use crate::paths;

/// A report read back from disk
#[derive(Debug, Clone)]
pub struct StoredReport {
    pub path: PathBuf,
    pub report: RunReport,
}

/// Directory of saved reports
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the default state directory
    pub fn open() -> Result<Self> {
        Ok(Self::new(paths::reports_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, target: &Target) -> PathBuf {
        self.root.join(sanitize(&target.host_key()))
    }

    /// Write a report; returns its path
    pub fn save(&self, report: &RunReport) -> Result<PathBuf> {
        let dir = self.target_dir(&report.target);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;

        let path = dir.join(format!("{}.json", report.run_id));
        let tmp = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write report: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;

        log::debug!("Saved report to {}", path.display());
        Ok(path)
    }

    /// Read one report file
    pub fn load(path: &Path) -> Result<RunReport> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read report: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse report: {}", path.display()))
    }

    /// Saved reports, oldest first, optionally for one target only
    ///
    /// Unreadable files are logged and left out.
    pub fn list(&self, target: Option<&Target>) -> Result<Vec<StoredReport>> {
        let dirs: Vec<PathBuf> = match target {
            Some(target) => vec![self.target_dir(target)],
            None => match fs::read_dir(&self.root) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.is_dir())
                    .collect(),
                Err(_) => Vec::new(),
            },
        };

        let mut reports = Vec::new();
        for dir in dirs {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                match Self::load(&path) {
                    Ok(report) => reports.push(StoredReport { path, report }),
                    Err(e) => log::warn!("Skipping report: {e:#}"),
                }
            }
        }
        reports.sort_by(|a, b| {
            a.report
                .started_at
                .cmp(&b.report.started_at)
                .then_with(|| a.report.run_id.cmp(&b.report.run_id))
        });
        Ok(reports)
    }

    /// Most recent report, optionally for one target only
    pub fn latest(&self, target: Option<&Target>) -> Result<Option<StoredReport>> {
        Ok(self.list(target)?.pop())
    }
}

/// Sink that saves every report to a [`ReportStore`]
#[derive(Debug)]
pub struct JsonFileSink {
    store: ReportStore,
    /// Path of the last report written
    pub saved: Option<PathBuf>,
}

impl JsonFileSink {
    pub fn new(store: ReportStore) -> Self {
        Self { store, saved: None }
    }
}

impl ReportSink for JsonFileSink {
    fn accept(&mut self, report: &RunReport) -> Result<()> {
        self.saved = Some(self.store.save(report)?);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{
        ExecutionResult, FailurePolicy, ReportBuilder, RunState, SshTarget, StepOutcome,
    };

    fn report(target: Target, outcome: StepOutcome) -> RunReport {
        let mut builder = ReportBuilder::new(
            target,
            FailurePolicy::HaltOnFailure,
            vec![("nginx".into(), "apt package nginx".into())],
        );
        builder
            .record(ExecutionResult::new("nginx", "apt package nginx", outcome))
            .unwrap();
        builder.finalize(RunState::Completed, None)
    }

    fn web1() -> Target {
        Target::Ssh(SshTarget::new("web1"))
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        let original = report(web1(), StepOutcome::Applied);

        let path = store.save(&original).unwrap();
        assert!(path.starts_with(dir.path().join("web1_22")));
        assert_eq!(ReportStore::load(&path).unwrap(), original);
    }

    #[test]
    fn test_list_filters_by_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        store.save(&report(web1(), StepOutcome::Applied)).unwrap();
        store
            .save(&report(Target::Local, StepOutcome::Skipped))
            .unwrap();

        assert_eq!(store.list(None).unwrap().len(), 2);
        let local = store.list(Some(&Target::Local)).unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].report.target, Target::Local);
    }

    #[test]
    fn test_runs_as_any_user_are_listed_for_the_host() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        let mut deploy = SshTarget::new("web1");
        deploy.user = Some("deploy".into());
        let saved = store
            .save(&report(Target::Ssh(deploy), StepOutcome::Applied))
            .unwrap();
        assert!(saved.starts_with(dir.path().join("web1_22")));

        let listed = store.list(Some(&web1())).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].report.target.to_string(), "deploy@web1");
    }

    #[test]
    fn test_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        assert!(store.latest(None).unwrap().is_none());

        store.save(&report(web1(), StepOutcome::Applied)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = report(web1(), StepOutcome::Skipped);
        store.save(&newer).unwrap();

        let latest = store.latest(Some(&web1())).unwrap().unwrap();
        assert_eq!(latest.report.run_id, newer.run_id);
    }

    #[test]
    fn test_corrupt_report_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        store.save(&report(web1(), StepOutcome::Applied)).unwrap();
        fs::write(dir.path().join("web1_22").join("broken.json"), "{").unwrap();
        assert_eq!(store.list(None).unwrap().len(), 1);
    }

    #[test]
    fn test_json_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonFileSink::new(ReportStore::new(dir.path()));
        sink.accept(&report(Target::Local, StepOutcome::Applied))
            .unwrap();
        assert!(sink.saved.unwrap().exists());
    }
}
