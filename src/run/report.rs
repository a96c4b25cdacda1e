// src/run/report.rs

//! Structured report emitted when a run reaches a terminal status.

use std::fmt::Write as _;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifacts::ArtifactRef;
use crate::dag::Scheduler;
use crate::errors::Result;
use crate::run::ledger::RunLedger;
use crate::types::{ArtifactName, RunId, RunStatus, TaskName, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: TaskName,
    pub status: TaskStatus,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub artifacts: Vec<ArtifactRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable_inputs: Vec<ArtifactName>,
    pub log_tail: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub cancelled: bool,
    pub fatal_error: Option<String>,
    /// Every task, in declaration order.
    pub tasks: Vec<TaskReport>,
    /// Everything published in the run.
    pub artifacts: Vec<ArtifactRef>,
    /// Tasks whose own execution failed.
    pub failed_tasks: Vec<TaskName>,
}

impl RunReport {
    pub fn build(scheduler: &Scheduler, ledger: RunLedger, artifacts: Vec<ArtifactRef>) -> Self {
        let status = if ledger.fatal_error().is_some() {
            RunStatus::Failed
        } else {
            match scheduler.run_status() {
                RunStatus::Succeeded => RunStatus::Succeeded,
                // A run that stopped before every task was terminal did not
                // succeed.
                _ => RunStatus::Failed,
            }
        };

        let tasks = scheduler
            .statuses()
            .into_iter()
            .map(|(name, status)| {
                let record = ledger.task(&name).cloned().unwrap_or_default();
                TaskReport {
                    status,
                    attempts: record.attempts,
                    duration_ms: record.duration.map(|d| d.as_millis() as u64),
                    exit_code: record.exit_code,
                    error: record.error,
                    artifacts: record.artifacts,
                    unavailable_inputs: record.unavailable_inputs,
                    log_tail: record.log_tail,
                    name,
                }
            })
            .collect();

        let duration_ms = match (ledger.started_at(), ledger.finished_at()) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().try_into().ok(),
            _ => None,
        };

        Self {
            run_id: ledger.run_id(),
            pipeline: ledger.pipeline().to_string(),
            status,
            started_at: ledger.started_at(),
            finished_at: ledger.finished_at(),
            duration_ms,
            cancelled: ledger.is_cancelled(),
            fatal_error: ledger.fatal_error().map(str::to_string),
            tasks,
            artifacts,
            failed_tasks: scheduler.failed_tasks(),
        }
    }

    /// Process exit code: 0 iff the run succeeded.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Succeeded => 0,
            _ => 1,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Status of `name`, for quick assertions.
    pub fn status_of(&self, name: &str) -> Option<&TaskStatus> {
        self.task(name).map(|t| &t.status)
    }

    /// Human-readable summary printed at the end of a run.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "pipeline '{}' run {}: {}",
            self.pipeline, self.run_id, self.status
        );
        for task in &self.tasks {
            let _ = write!(out, "  {:<20} {}", task.name, task.status);
            if task.attempts > 1 {
                let _ = write!(out, " after {} attempts", task.attempts);
            }
            if let Some(ms) = task.duration_ms {
                let _ = write!(out, " [{ms} ms]");
            }
            if let Some(err) = &task.error {
                let _ = write!(out, ": {err}");
            }
            if !task.unavailable_inputs.is_empty() {
                let _ = write!(out, " (ran without {})", task.unavailable_inputs.join(", "));
            }
            out.push('\n');
        }
        if let Some(fatal) = &self.fatal_error {
            let _ = writeln!(out, "fatal: {fatal}");
        }
        if self.cancelled {
            out.push_str("run was cancelled\n");
        }
        if !self.failed_tasks.is_empty() {
            let _ = writeln!(out, "failed tasks: {}", self.failed_tasks.join(", "));
        }
        out
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::{PipelineFile, RawPipelineFile};
    use crate::engine::{TaskExecution, TaskOutcome};

    fn scheduler(src: &str) -> Scheduler {
        let raw: RawPipelineFile = toml::from_str(src).unwrap();
        let pipeline = PipelineFile::try_from(raw).unwrap();
        Scheduler::from_pipeline(&pipeline, RunId::new_v4(), &BTreeMap::new(), 4)
    }

    const PAIR: &str = r#"
[pipeline]
name = "pair"
[task.build]
cmd = "make"
[task.test]
cmd = "make test"
needs = ["build"]
"#;

    #[test]
    fn failed_run_lists_failing_tasks() {
        let mut sched = scheduler(PAIR);
        let mut ledger = RunLedger::new(sched.run_id(), "pair");
        ledger.start();
        sched.start();
        let outcome = TaskOutcome::Failed {
            exit_code: Some(2),
            reason: "exit code 2".into(),
        };
        sched.handle_completion("build", &outcome);
        ledger.record_completion("build", &outcome, TaskExecution::default());
        ledger.finish();

        let report = RunReport::build(&sched, ledger, Vec::new());
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failed_tasks, vec!["build".to_string()]);
        assert_eq!(report.task("build").unwrap().exit_code, Some(2));
        assert!(matches!(report.status_of("test"), Some(TaskStatus::Skipped { .. })));

        let summary = report.summary();
        assert!(summary.contains("failed tasks: build"));
        assert!(summary.contains("exit code 2"));
    }

    #[test]
    fn report_serializes_to_json_file() {
        let mut sched = scheduler(PAIR);
        let mut ledger = RunLedger::new(sched.run_id(), "pair");
        ledger.start();
        sched.start();
        sched.handle_completion("build", &TaskOutcome::Success);
        sched.handle_completion("test", &TaskOutcome::Success);
        ledger.finish();
        let report = RunReport::build(&sched, ledger, Vec::new());
        assert!(report.succeeded());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        report.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["tasks"][0]["name"], "build");
        assert_eq!(value["tasks"][1]["status"]["state"], "succeeded");
    }

    #[test]
    fn unfinished_run_is_reported_failed() {
        let mut sched = scheduler(PAIR);
        sched.start();
        let ledger = RunLedger::new(sched.run_id(), "pair");
        let report = RunReport::build(&sched, ledger, Vec::new());
        assert_eq!(report.status, RunStatus::Failed);
    }
}
